use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,
    /// JSON snapshot file; used when no database is configured.
    #[serde(default)]
    pub store_file: Option<PathBuf>,
    /// Snapshot period; 0 writes the snapshot after every update.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    /// Load the snapshot at startup instead of truncating it.
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// SQLite connection string (`sqlite://path`, `sqlite::memory:`). Takes
    /// precedence over `store_file`.
    #[serde(default)]
    pub database_dsn: Option<String>,
    /// Shared signing key; unset or empty disables verification and response signing.
    #[serde(default)]
    pub hash_key: Option<String>,
    /// Private key file (hex) for encrypted agent payloads.
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    /// CIDR that `X-Real-IP` must fall into; unset accepts any source.
    #[serde(default)]
    pub trusted_subnet: Option<String>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_grpc_addr() -> String {
    "0.0.0.0:3200".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_restore() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            grpc_addr: default_grpc_addr(),
            store_file: None,
            store_interval_secs: default_store_interval(),
            restore: default_restore(),
            database_dsn: None,
            hash_key: None,
            crypto_key: None,
            trusted_subnet: None,
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Signing key with empty strings treated as unset.
    pub fn hash_key(&self) -> Option<&str> {
        self.hash_key.as_deref().filter(|key| !key.is_empty())
    }
}
