mod config;

use anyhow::{Context, Result};
use config::{AgentConfig, TransportKind};
use std::sync::Arc;
use telemon_collector::{Collector, ProcessCollector, SystemCollector, Worker};
use telemon_common::crypto::PayloadEncryptor;
use telemon_transport::{GrpcSender, HttpSender, Sender};
use tokio::signal;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn build_sender(config: &AgentConfig) -> Result<Arc<dyn Sender>> {
    let delays = config.retry_delays();
    let hash_key = config.hash_key().unwrap_or_default();
    match config.transport {
        TransportKind::Http => {
            let mut sender = HttpSender::new(&config.server_endpoint)?
                .with_hash_key(hash_key)
                .with_retry_delays(delays);
            if let Some(path) = &config.crypto_key {
                let encryptor = PayloadEncryptor::load(path)
                    .with_context(|| format!("loading public key {}", path.display()))?;
                sender = sender.with_encryptor(encryptor);
            }
            Ok(Arc::new(sender))
        }
        TransportKind::Grpc => {
            if config.crypto_key.is_some() {
                tracing::warn!("crypto_key is ignored by the gRPC transport");
            }
            let sender = GrpcSender::new(&config.server_endpoint)?
                .with_hash_key(hash_key)
                .with_retry_delays(delays);
            Ok(Arc::new(sender))
        }
    }
}

/// Drives polling and reporting until `shutdown` fires, then waits for
/// in-flight reports.
async fn run(worker: Arc<Worker>, config: &AgentConfig, shutdown: CancellationToken) {
    let mut poll_tick = interval(config.poll_interval());
    let mut report_tick = interval(config.report_interval());
    poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    report_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first report tick fires immediately; skip it so there is a batch.
    report_tick.tick().await;

    let mut reports = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = poll_tick.tick() => {
                worker.poll().await;
            }
            _ = report_tick.tick() => {
                let worker = Arc::clone(&worker);
                reports.spawn(async move { worker.send().await });
            }
            Some(joined) = reports.join_next(), if !reports.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Report task failed");
                }
            }
        }
    }

    tracing::info!(in_flight = reports.len(), "Waiting for in-flight reports");
    while reports.join_next().await.is_some() {}
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());
    let config = AgentConfig::load(&config_path)?;

    tracing::info!(
        server = %config.server_endpoint,
        transport = ?config.transport,
        poll_interval_secs = config.poll_interval_secs,
        report_interval_secs = config.report_interval_secs,
        signed = config.hash_key().is_some(),
        encrypted = config.crypto_key.is_some(),
        "telemon-agent starting"
    );

    let sender = build_sender(&config)?;
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(ProcessCollector::new()?),
        Box::new(SystemCollector::new()),
    ];
    let worker = Arc::new(Worker::new(collectors, sender, config.outcome_buffer));

    let outcome_log = worker.outcomes().map(|mut outcomes| {
        tokio::spawn(async move {
            let mut failures = 0u64;
            while let Some(outcome) = outcomes.recv().await {
                match outcome {
                    Ok(count) => tracing::debug!(count, "Report delivered"),
                    Err(e) => {
                        failures += 1;
                        tracing::error!(error = %e, failures, "Report failed");
                    }
                }
            }
        })
    });

    let shutdown = CancellationToken::new();
    let loop_task = tokio::spawn({
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        let config = config.clone();
        async move { run(worker, &config, shutdown).await }
    });

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    shutdown.cancel();
    loop_task.await?;

    worker.close();
    if let Some(task) = outcome_log {
        task.await?;
    }
    tracing::info!("telemon-agent stopped");
    Ok(())
}
