//! Metric storage for the telemon server.
//!
//! Three backends share the [`MetricStore`] contract:
//!
//! - [`memory::MemStorage`]: two maps behind one mutex, the merge rules live here;
//! - [`file::FileStorage`]: wraps `MemStorage` and snapshots it to a JSON file,
//!   either after every write or on a background timer;
//! - [`sql::SqlStorage`]: writes through to a SQLite database.

pub mod error;
pub mod file;
pub mod memory;
pub mod sql;


pub use error::{ErrorClass, Result, StorageError};
pub use file::{FileStorage, FileStoreOptions};
pub use memory::MemStorage;
pub use sql::SqlStorage;

use telemon_common::{Metric, MetricKind};

/// Persistence backend for counters and gauges.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because the storage is accessed from both the gRPC handlers and the
/// HTTP handlers concurrently.
///
/// Counters accumulate (`total += delta`), gauges are replaced.
pub trait MetricStore: Send + Sync {
    /// Merges one metric and returns the stored result (the new total for
    /// counters).
    fn add(&self, metric: Metric) -> Result<Metric>;

    /// Merges metrics left to right.
    ///
    /// In-memory backends stop at the first invalid metric and keep what was
    /// merged before it; transactional backends reject the whole batch.
    fn batch(&self, metrics: &[Metric]) -> Result<()>;

    /// Type-qualified lookup.
    fn get(&self, kind: MetricKind, name: &str) -> Option<Metric>;

    /// Unordered snapshot of every stored metric.
    fn list(&self) -> Vec<Metric>;

    /// Flushes and releases resources.
    fn close(&self) -> Result<()>;

    /// Liveness probe for the backing store.
    fn check_connection(&self) -> bool {
        true
    }
}
