use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Validation failures for metric input. These are never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    /// The type is neither counter nor gauge, or the value does not match it.
    #[error("incorrect metric type or value: {0}")]
    IncorrectMetricTypeOrValue(String),

    #[error("metric name must not be empty")]
    EmptyName,
}

/// Metric type. The text form is `"counter"` / `"gauge"`.
///
/// # Examples
///
/// ```
/// use telemon_common::metric::MetricKind;
///
/// let kind: MetricKind = "gauge".parse().unwrap();
/// assert_eq!(kind, MetricKind::Gauge);
/// assert_eq!(MetricKind::Counter.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(MetricError::IncorrectMetricTypeOrValue(format!(
                "unknown metric type '{other}'"
            ))),
        }
    }
}

/// Typed metric payload: counters carry an integer delta, gauges a reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }

    /// Parses a raw text value for the given kind without coercion: a
    /// counter only accepts integers.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        match kind {
            MetricKind::Counter => raw.parse::<i64>().map(MetricValue::Counter).map_err(|_| {
                MetricError::IncorrectMetricTypeOrValue(format!("'{raw}' is not a counter delta"))
            }),
            MetricKind::Gauge => raw.parse::<f64>().map(MetricValue::Gauge).map_err(|_| {
                MetricError::IncorrectMetricTypeOrValue(format!("'{raw}' is not a gauge value"))
            }),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Counter(delta) => write!(f, "{delta}"),
            MetricValue::Gauge(value) => write!(f, "{value}"),
        }
    }
}

/// A named metric sample.
///
/// Serialises to the snapshot/wire record
/// `{"id": .., "type": "counter"|"gauge", "delta"|"value": ..}`.
///
/// # Examples
///
/// ```
/// use telemon_common::metric::{Metric, MetricKind};
///
/// let m: Metric = serde_json::from_str(r#"{"id":"PollCount","type":"counter","delta":5}"#).unwrap();
/// assert_eq!(m, Metric::counter("PollCount", 5));
/// assert_eq!(m.kind(), MetricKind::Counter);
///
/// let bad = serde_json::from_str::<Metric>(r#"{"id":"PollCount","type":"counter","value":1.5}"#);
/// assert!(bad.is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricRecord", into = "MetricRecord")]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    /// Builds a metric from the text form used by `/update/{type}/{name}/{value}`.
    pub fn parse(kind: &str, name: &str, raw: &str) -> Result<Self, MetricError> {
        let kind: MetricKind = kind.parse()?;
        let metric = Self {
            name: name.to_string(),
            value: MetricValue::parse(kind, raw)?,
        };
        metric.validate()?;
        Ok(metric)
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Rejects empty names and gauges that are not finite. NaN and the
    /// infinities have no JSON form and cannot be stored as SQL `REAL`.
    pub fn validate(&self) -> Result<(), MetricError> {
        if self.name.is_empty() {
            return Err(MetricError::EmptyName);
        }
        if let MetricValue::Gauge(value) = self.value {
            if !value.is_finite() {
                return Err(MetricError::IncorrectMetricTypeOrValue(format!(
                    "gauge '{}' must be finite, got {value}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Counter delta, `None` for gauges.
    pub fn delta(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(delta) => Some(delta),
            MetricValue::Gauge(_) => None,
        }
    }

    /// Gauge reading, `None` for counters.
    pub fn gauge_value(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(value) => Some(value),
            MetricValue::Counter(_) => None,
        }
    }
}

/// Untyped wire record, the shape used on disk and over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl TryFrom<MetricRecord> for Metric {
    type Error = MetricError;

    fn try_from(record: MetricRecord) -> Result<Self, Self::Error> {
        let kind: MetricKind = record.mtype.parse()?;
        let value = match (kind, record.delta, record.value) {
            (MetricKind::Counter, Some(delta), None) => MetricValue::Counter(delta),
            (MetricKind::Gauge, None, Some(value)) => MetricValue::Gauge(value),
            _ => {
                return Err(MetricError::IncorrectMetricTypeOrValue(format!(
                    "{kind} '{}' must carry exactly the {} field",
                    record.id,
                    if kind == MetricKind::Counter { "delta" } else { "value" }
                )))
            }
        };
        let metric = Metric {
            name: record.id,
            value,
        };
        metric.validate()?;
        Ok(metric)
    }
}

impl From<Metric> for MetricRecord {
    fn from(metric: Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Counter(delta) => (Some(delta), None),
            MetricValue::Gauge(value) => (None, Some(value)),
        };
        MetricRecord {
            id: metric.name,
            mtype: metric.value.kind().to_string(),
            delta,
            value,
        }
    }
}

/// Lookup request body for `POST /value/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: String,
}

impl MetricQuery {
    pub fn kind(&self) -> Result<MetricKind, MetricError> {
        self.mtype.parse()
    }
}
