use crate::config::ServerConfig;
use anyhow::Context;
use std::sync::Arc;
use telemon_storage::{FileStorage, FileStoreOptions, MemStorage, MetricStore, SqlStorage};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The selected backend plus its snapshot flusher, when it has one.
pub struct OpenedStore {
    pub store: Arc<dyn MetricStore>,
    pub flusher: Option<JoinHandle<()>>,
}

/// Picks the backend: a database DSN wins over a snapshot file, and with
/// neither configured metrics live in memory only.
///
/// Spawns the periodic flusher for a file store, so this must run inside a
/// Tokio runtime.
pub fn open_store(config: &ServerConfig, shutdown: CancellationToken) -> anyhow::Result<OpenedStore> {
    if let Some(dsn) = config.database_dsn.as_deref().filter(|d| !d.is_empty()) {
        let store = SqlStorage::open(dsn).with_context(|| format!("opening database {dsn}"))?;
        tracing::info!(dsn = %dsn, "Using SQLite storage");
        return Ok(OpenedStore {
            store: Arc::new(store),
            flusher: None,
        });
    }

    if let Some(path) = &config.store_file {
        let store = Arc::new(
            FileStorage::new(FileStoreOptions {
                path: Some(path.clone()),
                restore: config.restore,
                store_interval: config.store_interval(),
            })
            .with_context(|| format!("opening snapshot file {}", path.display()))?,
        );
        tracing::info!(
            path = %path.display(),
            restore = config.restore,
            interval_secs = config.store_interval_secs,
            "Using file storage"
        );
        let flusher = store.spawn_flusher(shutdown);
        return Ok(OpenedStore {
            store,
            flusher,
        });
    }

    tracing::info!("Using in-memory storage");
    Ok(OpenedStore {
        store: Arc::new(MemStorage::new()),
        flusher: None,
    })
}
