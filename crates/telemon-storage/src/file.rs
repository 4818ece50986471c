use crate::memory::MemStorage;
use crate::{MetricStore, Result, StorageError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use telemon_common::{Metric, MetricKind};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Construction parameters for [`FileStorage`].
#[derive(Debug, Clone, Default)]
pub struct FileStoreOptions {
    /// Snapshot file; `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Load the existing snapshot instead of truncating it.
    pub restore: bool,
    /// Zero flushes after every successful write, otherwise the period of
    /// the background flusher.
    pub store_interval: Duration,
}

/// [`MemStorage`] plus a JSON snapshot file.
///
/// The snapshot is a pretty-printed array of metric records holding
/// counter totals and gauge readings. Every save rewrites the whole file
/// from offset 0.
pub struct FileStorage {
    mem: MemStorage,
    file: Mutex<Option<File>>,
    path: Option<PathBuf>,
    store_interval: Duration,
}

impl FileStorage {
    pub fn new(options: FileStoreOptions) -> Result<Self> {
        let file = match &options.path {
            Some(path) => Some(open_snapshot(path)?),
            None => None,
        };
        let store = Self {
            mem: MemStorage::new(),
            file: Mutex::new(file),
            path: options.path,
            store_interval: options.store_interval,
        };

        if let Some(path) = &store.path {
            if options.restore {
                let loaded = store.load_metrics_from_file()?;
                tracing::info!(path = %path.display(), loaded, "Restored metrics snapshot");
            } else {
                if let Some(file) = store.lock_file().as_mut() {
                    file.set_len(0)?;
                }
                tracing::info!(path = %path.display(), "Truncated metrics snapshot");
            }
        }
        Ok(store)
    }

    /// Lock the file handle, recovering from a poisoned Mutex if necessary.
    fn lock_file(&self) -> MutexGuard<'_, Option<File>> {
        self.file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether every write is flushed before it returns.
    pub fn is_synchronous(&self) -> bool {
        self.store_interval.is_zero()
    }

    /// Overwrites the snapshot with the current contents of the store.
    pub fn save_metrics_to_file(&self) -> Result<()> {
        // Holding the file lock across list + write keeps concurrent saves
        // from interleaving an older listing after a newer one.
        let mut guard = self.lock_file();
        let file = guard.as_mut().ok_or(StorageError::NoFileConfigured)?;

        let data = serde_json::to_vec_pretty(&self.mem.list())?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(())
    }

    /// Replays the snapshot through the merge path. Returns how many
    /// records were loaded.
    ///
    /// Counter records hold totals, so the store must still be empty.
    pub fn load_metrics_from_file(&self) -> Result<usize> {
        let mut guard = self.lock_file();
        let file = guard.as_mut().ok_or(StorageError::NoFileConfigured)?;
        if !self.mem.is_empty() {
            return Err(StorageError::NotEmpty);
        }

        let mut data = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut data)?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(0);
        }

        let metrics: Vec<Metric> = serde_json::from_slice(&data)?;
        let count = metrics.len();
        for metric in metrics {
            self.mem.add(metric)?;
        }
        Ok(count)
    }

    /// Starts the periodic flusher. Returns `None` in synchronous mode or
    /// without a file.
    ///
    /// The task exits once `shutdown` is cancelled. Flush errors are logged
    /// and the loop keeps running.
    pub fn spawn_flusher(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if self.is_synchronous() || self.path.is_none() {
            return None;
        }
        let store = Arc::clone(self);
        let period = self.store_interval;
        Some(tokio::spawn(async move {
            tracing::info!(interval_secs = period.as_secs_f64(), "Snapshot flusher started");
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        match store.save_metrics_to_file() {
                            Ok(()) => tracing::debug!("Metrics snapshot saved"),
                            Err(e) => tracing::error!(error = %e, "Periodic snapshot failed"),
                        }
                    }
                }
            }
            tracing::info!("Snapshot flusher stopped");
        }))
    }

    fn flush_if_synchronous(&self) -> Result<()> {
        if self.is_synchronous() && self.path.is_some() {
            self.save_metrics_to_file()?;
        }
        Ok(())
    }
}

fn open_snapshot(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

impl MetricStore for FileStorage {
    fn add(&self, metric: Metric) -> Result<Metric> {
        let merged = self.mem.add(metric)?;
        self.flush_if_synchronous()?;
        Ok(merged)
    }

    fn batch(&self, metrics: &[Metric]) -> Result<()> {
        // Entries before a rejected one stay merged, so they are flushed too.
        let applied = self.mem.batch(metrics);
        self.flush_if_synchronous()?;
        applied
    }

    fn get(&self, kind: MetricKind, name: &str) -> Option<Metric> {
        self.mem.get(kind, name)
    }

    fn list(&self) -> Vec<Metric> {
        self.mem.list()
    }

    fn close(&self) -> Result<()> {
        if self.lock_file().is_none() {
            return Ok(());
        }
        if let Err(e) = self.save_metrics_to_file() {
            tracing::error!(error = %e, "Final snapshot on close failed");
        }
        if let Some(file) = self.lock_file().take() {
            file.sync_all()?;
        }
        tracing::info!("Metrics snapshot closed");
        Ok(())
    }
}
