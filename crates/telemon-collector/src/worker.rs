use crate::{fan_in, Collector, LatestCell};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use telemon_common::{Metric, MetricValue};
use telemon_transport::{Sender, TransportError};
use tokio::sync::mpsc;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

/// Result of one delivery: the number of metrics sent, or why it failed.
pub type SendOutcome = Result<usize, TransportError>;

type SharedCollector = Arc<Mutex<Box<dyn Collector>>>;

/// Polls collectors into the latest-batch cell and ships that batch through
/// a [`Sender`].
///
/// `PollCount` is a counter of polls not yet acknowledged by the server.
/// A failed send leaves it untouched so the next delivery carries the
/// backlog as its delta.
pub struct Worker {
    collectors: Vec<SharedCollector>,
    sender: Arc<dyn Sender>,
    latest: LatestCell<Vec<Metric>>,
    pending_polls: AtomicI64,
    send_lock: tokio::sync::Mutex<()>,
    outcome_tx: Mutex<Option<mpsc::Sender<SendOutcome>>>,
    outcome_rx: Mutex<Option<mpsc::Receiver<SendOutcome>>>,
}

impl Worker {
    pub fn new(
        collectors: Vec<Box<dyn Collector>>,
        sender: Arc<dyn Sender>,
        outcome_buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(outcome_buffer.max(1));
        Self {
            collectors: collectors
                .into_iter()
                .map(|c| Arc::new(Mutex::new(c)))
                .collect(),
            sender,
            latest: LatestCell::new(),
            pending_polls: AtomicI64::new(0),
            send_lock: tokio::sync::Mutex::new(()),
            outcome_tx: Mutex::new(Some(tx)),
            outcome_rx: Mutex::new(Some(rx)),
        }
    }

    /// Hands out the outcome receiver. Only the first call returns it.
    pub fn outcomes(&self) -> Option<mpsc::Receiver<SendOutcome>> {
        self.outcome_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Polls not yet acknowledged by the server.
    pub fn pending_polls(&self) -> i64 {
        self.pending_polls.load(Ordering::SeqCst)
    }

    /// Samples every collector concurrently and publishes the merged batch,
    /// replacing any batch that was not sent yet. Returns the batch size.
    pub async fn poll(&self) -> usize {
        let mut inputs = Vec::with_capacity(self.collectors.len());
        for collector in &self.collectors {
            let (tx, rx) = mpsc::channel(1);
            let collector = Arc::clone(collector);
            tokio::task::spawn_blocking(move || {
                let mut collector = collector
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                match collector.collect() {
                    Ok(metrics) => {
                        let _ = tx.blocking_send(metrics);
                    }
                    Err(e) => {
                        tracing::warn!(collector = collector.name(), error = %e, "Collection failed")
                    }
                }
            });
            inputs.push(rx);
        }

        let mut merged = fan_in(inputs);
        let mut batch = Vec::new();
        while let Some(metrics) = merged.recv().await {
            batch.extend(metrics);
        }
        // One unusable sample would make the server reject the whole batch.
        batch.retain(|metric| match metric.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(metric = %metric.name, error = %e, "Dropping invalid sample");
                false
            }
        });

        let polls = self.pending_polls.fetch_add(1, Ordering::SeqCst) + 1;
        batch.push(Metric::gauge(RANDOM_VALUE, rand::random::<f64>()));
        batch.push(Metric::counter(POLL_COUNT, polls));

        let size = batch.len();
        if let Some(stale) = self.latest.put(batch) {
            tracing::debug!(dropped = stale.len(), "Replaced unsent batch");
        }
        tracing::debug!(count = size, pending_polls = polls, "Poll complete");
        size
    }

    /// Sends the latest batch, if any, and reports the outcome.
    ///
    /// The `PollCount` delta is read at send time, so polls finishing while
    /// the request is in flight stay pending after the subtraction.
    pub async fn send(&self) {
        let _guard = self.send_lock.lock().await;
        let Some(mut batch) = self.latest.take() else {
            tracing::debug!("No batch to send");
            return;
        };

        let drained = self.pending_polls.load(Ordering::SeqCst);
        set_poll_count(&mut batch, drained);

        let outcome = match self.sender.send(&batch).await {
            Ok(()) => {
                self.pending_polls.fetch_sub(drained, Ordering::SeqCst);
                tracing::info!(
                    transport = self.sender.name(),
                    count = batch.len(),
                    "Metrics reported"
                );
                Ok(batch.len())
            }
            Err(e) => {
                tracing::warn!(
                    transport = self.sender.name(),
                    error = %e,
                    pending_polls = drained,
                    "Failed to report metrics"
                );
                Err(e)
            }
        };
        self.publish(outcome);
    }

    fn publish(&self, outcome: SendOutcome) {
        let guard = self
            .outcome_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = guard.as_ref() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(outcome) {
                tracing::debug!("Outcome channel full, dropping outcome");
            }
        }
    }

    /// Closes the outcome channel. Receivers drain what is buffered and then
    /// read `None`.
    pub fn close(&self) {
        self.outcome_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

fn set_poll_count(batch: &mut Vec<Metric>, pending: i64) {
    match batch.iter_mut().find(|m| m.name == POLL_COUNT) {
        Some(metric) => metric.value = MetricValue::Counter(pending),
        None => batch.push(Metric::counter(POLL_COUNT, pending)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use telemon_common::MetricKind;
    use tokio::sync::Notify;
    use telemon_transport::AttemptError;

    struct Fixed(Vec<Metric>);

    impl Collector for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Metric>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl Collector for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Metric>> {
            anyhow::bail!("sensor unavailable")
        }
    }

    #[derive(Default)]
    struct Recorder {
        fail: AtomicBool,
        sent: Mutex<Vec<Vec<Metric>>>,
    }

    #[async_trait]
    impl Sender for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Exhausted {
                    attempts: 1,
                    last: AttemptError::Status {
                        status: 503,
                        body: String::new(),
                    },
                });
            }
            self.sent.lock().unwrap().push(metrics.to_vec());
            Ok(())
        }
    }

    /// Holds every send until released.
    #[derive(Default)]
    struct Gate {
        entered: Notify,
        release: Notify,
        sent: Mutex<Vec<Vec<Metric>>>,
    }

    #[async_trait]
    impl Sender for Gate {
        fn name(&self) -> &'static str {
            "gate"
        }

        async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.sent.lock().unwrap().push(metrics.to_vec());
            Ok(())
        }
    }

    fn worker(sender: Arc<Recorder>) -> Worker {
        Worker::new(
            vec![
                Box::new(Fixed(vec![Metric::gauge("Alloc", 1.0)])),
                Box::new(Fixed(vec![Metric::gauge("TotalMemory", 2.0)])),
                Box::new(Broken),
            ],
            sender,
            4,
        )
    }

    fn poll_count(batch: &[Metric]) -> Option<i64> {
        batch
            .iter()
            .find(|m| m.name == POLL_COUNT && m.kind() == MetricKind::Counter)
            .and_then(Metric::delta)
    }

    #[tokio::test]
    async fn poll_merges_collectors_and_appends_samples() {
        let sender = Arc::new(Recorder::default());
        let worker = worker(sender.clone());

        assert_eq!(worker.poll().await, 4);
        worker.send().await;

        let sent = sender.sent.lock().unwrap();
        let batch = &sent[0];
        assert!(batch.contains(&Metric::gauge("Alloc", 1.0)));
        assert!(batch.contains(&Metric::gauge("TotalMemory", 2.0)));
        assert!(batch.iter().any(|m| m.name == RANDOM_VALUE));
        assert_eq!(poll_count(batch), Some(1));
    }

    #[tokio::test]
    async fn newer_poll_replaces_unsent_batch() {
        let sender = Arc::new(Recorder::default());
        let worker = worker(sender.clone());

        worker.poll().await;
        worker.poll().await;
        worker.poll().await;
        worker.send().await;
        worker.send().await;

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(poll_count(&sent[0]), Some(3));
    }

    #[tokio::test]
    async fn successful_send_clears_pending_polls() {
        let sender = Arc::new(Recorder::default());
        let worker = worker(sender.clone());

        worker.poll().await;
        worker.poll().await;
        worker.send().await;
        assert_eq!(worker.pending_polls(), 0);

        worker.poll().await;
        worker.send().await;
        let sent = sender.sent.lock().unwrap();
        assert_eq!(poll_count(&sent[1]), Some(1));
    }

    #[tokio::test]
    async fn failed_send_keeps_backlog_for_next_delivery() {
        let sender = Arc::new(Recorder::default());
        let worker = worker(sender.clone());
        let mut outcomes = worker.outcomes().unwrap();

        sender.fail.store(true, Ordering::SeqCst);
        worker.poll().await;
        worker.poll().await;
        worker.send().await;
        assert!(matches!(
            outcomes.recv().await,
            Some(Err(TransportError::Exhausted { .. }))
        ));
        assert_eq!(worker.pending_polls(), 2);

        sender.fail.store(false, Ordering::SeqCst);
        worker.poll().await;
        worker.send().await;
        assert!(matches!(outcomes.recv().await, Some(Ok(4))));
        assert_eq!(poll_count(&sender.sent.lock().unwrap()[0]), Some(3));
        assert_eq!(worker.pending_polls(), 0);
    }

    #[tokio::test]
    async fn send_without_batch_is_a_no_op() {
        let sender = Arc::new(Recorder::default());
        let worker = worker(sender.clone());
        let mut outcomes = worker.outcomes().unwrap();

        worker.send().await;
        worker.close();
        assert!(outcomes.recv().await.is_none());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_outcomes_read_none_repeatedly() {
        let sender = Arc::new(Recorder::default());
        let worker = worker(sender);
        let mut outcomes = worker.outcomes().unwrap();
        assert!(worker.outcomes().is_none());

        worker.poll().await;
        worker.send().await;
        worker.close();

        assert!(matches!(outcomes.recv().await, Some(Ok(_))));
        assert!(outcomes.recv().await.is_none());
        assert!(outcomes.recv().await.is_none());

        worker.poll().await;
        worker.send().await;
        assert!(outcomes.recv().await.is_none());
    }

    #[tokio::test]
    async fn poll_during_send_is_counted_in_next_batch() {
        let gate = Arc::new(Gate::default());
        let worker = Arc::new(Worker::new(
            vec![Box::new(Fixed(vec![Metric::gauge("Alloc", 1.0)]))],
            gate.clone(),
            4,
        ));

        worker.poll().await;
        let in_flight = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.send().await }
        });
        gate.entered.notified().await;

        worker.poll().await;
        assert_eq!(worker.pending_polls(), 2);

        gate.release.notify_one();
        in_flight.await.unwrap();
        assert_eq!(worker.pending_polls(), 1);

        gate.release.notify_one();
        worker.send().await;
        assert_eq!(worker.pending_polls(), 0);

        let sent = gate.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(poll_count(&sent[0]), Some(1));
        assert_eq!(poll_count(&sent[1]), Some(1));
    }

    #[tokio::test]
    async fn non_finite_samples_are_dropped() {
        let sender = Arc::new(Recorder::default());
        let worker = Worker::new(
            vec![Box::new(Fixed(vec![
                Metric::gauge("Alloc", 1.0),
                Metric::gauge("CPUutilization1", f64::NAN),
            ]))],
            sender.clone(),
            4,
        );

        assert_eq!(worker.poll().await, 3);
        worker.send().await;

        let sent = sender.sent.lock().unwrap();
        assert!(sent[0].iter().all(|m| m.validate().is_ok()));
        assert!(!sent[0].iter().any(|m| m.name == "CPUutilization1"));
    }
}
