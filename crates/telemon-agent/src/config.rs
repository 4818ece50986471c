use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Grpc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// `host:port` or URL of the server (HTTP or gRPC listener, matching `transport`).
    #[serde(default = "default_server_endpoint")]
    pub server_endpoint: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Shared signing key; unset or empty disables the `Hash` header.
    #[serde(default)]
    pub hash_key: Option<String>,
    /// Server public key file (hex). Enables gzip + encryption over HTTP.
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,
    #[serde(default = "default_outcome_buffer")]
    pub outcome_buffer: usize,
}

fn default_server_endpoint() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_retry_delays() -> Vec<u64> {
    vec![1, 3, 5]
}

fn default_outcome_buffer() -> usize {
    16
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");
        anyhow::ensure!(
            self.report_interval_secs > 0,
            "report_interval_secs must be positive"
        );
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }

    /// Signing key with empty strings treated as unset.
    pub fn hash_key(&self) -> Option<&str> {
        self.hash_key.as_deref().filter(|key| !key.is_empty())
    }
}
