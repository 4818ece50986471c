//! Metric sampling for the telemon agent.
//!
//! Each [`Collector`] samples one source (this process, the host) and
//! returns gauges. The [`worker::Worker`] runs every collector concurrently
//! on each poll, merges their output with [`fan_in::fan_in`] and keeps only
//! the newest batch in a [`cell::LatestCell`] until the report timer sends it.

pub mod cell;
pub mod fan_in;
pub mod process;
pub mod system;
pub mod worker;

pub use cell::LatestCell;
pub use fan_in::fan_in;
pub use process::ProcessCollector;
pub use system::SystemCollector;
pub use worker::Worker;

use anyhow::Result;
use telemon_common::Metric;

/// A metric source sampled on every poll.
///
/// `collect` runs on a blocking thread, so implementations may call
/// synchronous OS APIs.
pub trait Collector: Send + Sync {
    /// Short name used in logs (e.g. `"process"`).
    fn name(&self) -> &str;

    /// Samples the source once.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}
