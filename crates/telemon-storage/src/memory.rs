use crate::{MetricStore, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use telemon_common::{Metric, MetricKind, MetricValue};

#[derive(Default)]
struct Maps {
    counters: HashMap<String, i64>,
    gauges: HashMap<String, f64>,
}

impl Maps {
    fn merge(&mut self, metric: Metric) -> Result<Metric> {
        metric.validate()?;
        let merged = match metric.value {
            MetricValue::Counter(delta) => {
                let total = self.counters.entry(metric.name.clone()).or_insert(0);
                *total = total.wrapping_add(delta);
                MetricValue::Counter(*total)
            }
            MetricValue::Gauge(value) => {
                self.gauges.insert(metric.name.clone(), value);
                MetricValue::Gauge(value)
            }
        };
        Ok(Metric {
            name: metric.name,
            value: merged,
        })
    }
}

/// In-memory counter/gauge store. One mutex guards both maps.
#[derive(Default)]
pub struct MemStorage {
    maps: Mutex<Maps>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the maps, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Maps> {
        self.maps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        let maps = self.lock();
        maps.counters.is_empty() && maps.gauges.is_empty()
    }

    pub fn len(&self) -> usize {
        let maps = self.lock();
        maps.counters.len() + maps.gauges.len()
    }
}

impl MetricStore for MemStorage {
    fn add(&self, metric: Metric) -> Result<Metric> {
        self.lock().merge(metric)
    }

    fn batch(&self, metrics: &[Metric]) -> Result<()> {
        let mut maps = self.lock();
        for metric in metrics {
            maps.merge(metric.clone())?;
        }
        Ok(())
    }

    fn get(&self, kind: MetricKind, name: &str) -> Option<Metric> {
        let maps = self.lock();
        match kind {
            MetricKind::Counter => maps
                .counters
                .get(name)
                .map(|total| Metric::counter(name, *total)),
            MetricKind::Gauge => maps
                .gauges
                .get(name)
                .map(|value| Metric::gauge(name, *value)),
        }
    }

    fn list(&self) -> Vec<Metric> {
        let maps = self.lock();
        let counters = maps
            .counters
            .iter()
            .map(|(name, total)| Metric::counter(name.clone(), *total));
        let gauges = maps
            .gauges
            .iter()
            .map(|(name, value)| Metric::gauge(name.clone(), *value));
        counters.chain(gauges).collect()
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
