use crate::config::ServerConfig;
use anyhow::Context;
use ipnet::IpNet;
use std::sync::Arc;
use telemon_common::crypto::PayloadDecryptor;
use telemon_storage::MetricStore;

/// Shared state for HTTP handlers, middleware and the gRPC service.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn MetricStore>,
    pub hash_key: Option<Arc<str>>,
    pub decryptor: Option<Arc<PayloadDecryptor>>,
    pub trusted_subnet: Option<IpNet>,
}

impl AppState {
    /// State with every payload check disabled.
    pub fn new(storage: Arc<dyn MetricStore>) -> Self {
        Self {
            storage,
            hash_key: None,
            decryptor: None,
            trusted_subnet: None,
        }
    }

    /// Loads the key file and parses the subnet named by `config`.
    pub fn from_config(config: &ServerConfig, storage: Arc<dyn MetricStore>) -> anyhow::Result<Self> {
        let decryptor = match &config.crypto_key {
            Some(path) => Some(Arc::new(
                PayloadDecryptor::load(path)
                    .with_context(|| format!("loading private key {}", path.display()))?,
            )),
            None => None,
        };
        let trusted_subnet = match config.trusted_subnet.as_deref().map(str::trim) {
            Some(cidr) if !cidr.is_empty() => Some(
                cidr.parse::<IpNet>()
                    .with_context(|| format!("invalid trusted_subnet '{cidr}'"))?,
            ),
            _ => None,
        };
        Ok(Self {
            storage,
            hash_key: config.hash_key().map(Arc::from),
            decryptor,
            trusted_subnet,
        })
    }
}
