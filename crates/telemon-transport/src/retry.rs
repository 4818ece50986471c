//! Fixed-schedule retry executor.
//!
//! A schedule of N delays allows N attempts in total. The delay at position
//! `i` is slept between attempt `i + 1` and attempt `i + 2`, so the last
//! delay is never used and nothing is slept after a success or after the
//! final attempt. An empty schedule still makes one attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;

/// Delays used when the configuration does not override them: three
/// attempts, 1s then 3s apart.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Total attempts made for a delay schedule.
pub fn attempts_for(delays: &[Duration]) -> usize {
    delays.len().max(1)
}

/// Runs `op` until it succeeds or the attempts are used up, returning the
/// last error in the latter case.
pub async fn retry<T, E, F, Fut>(delays: &[Duration], mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = attempts_for(delays);
    let mut attempt = 1usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let Some(&delay) = delays.get(attempt - 1).filter(|_| attempt < attempts) else {
                    return Err(e);
                };
                tracing::warn!(
                    attempt,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Runs [`retry`] on its own task and delivers the outcome through a
/// single-value channel.
///
/// Dropping the receiver abandons the remaining attempts, including one
/// that is in flight.
pub fn spawn_retry<T, E, F, Fut>(delays: Vec<Duration>, op: F) -> oneshot::Receiver<Result<T, E>>
where
    T: Send + 'static,
    E: Display + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let (mut tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        tokio::select! {
            outcome = retry(&delays, op) => {
                let _ = tx.send(outcome);
            }
            _ = tx.closed() => {
                tracing::debug!("Outcome receiver dropped, abandoning retries");
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    const DELAYS: [Duration; 3] = DEFAULT_RETRY_DELAYS;

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt_does_not_sleep() {
        let start = Instant::now();
        let calls = AtomicUsize::new(0);
        let result: Result<u32, String> = retry(&DELAYS, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let start = Instant::now();
        let calls = AtomicUsize::new(0);
        let result: Result<&str, String> = retry(&DELAYS, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(format!("refused #{n}"))
                } else {
                    Ok("sent")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("sent"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error_without_trailing_sleep() {
        let start = Instant::now();
        let calls = AtomicUsize::new(0);
        let result: Result<(), String> = retry(&DELAYS, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("refused #{n}")) }
        })
        .await;
        assert_eq!(result, Err("refused #2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(attempts_for(&DELAYS), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_schedule_means_single_attempt() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), &str> = retry(&[], || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;
        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(attempts_for(&[]), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_delay_means_single_attempt() {
        let start = Instant::now();
        let calls = AtomicUsize::new(0);
        let result: Result<(), &str> = retry(&[Duration::from_secs(2)], || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;
        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_retry_delivers_outcome() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let rx = spawn_retry(DELAYS.to_vec(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err("timeout".to_string())
                } else {
                    Ok(n)
                }
            }
        });
        assert_eq!(rx.await.unwrap(), Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_retry_reports_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let start = Instant::now();
        let rx = spawn_retry(DELAYS.to_vec(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("down".to_string()) }
        });
        assert_eq!(rx.await.unwrap(), Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_receiver_stops_retrying() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let rx = spawn_retry(DELAYS.to_vec(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("down".to_string()) }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        drop(rx);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
