//! Delivery of metric batches from the agent to the server.
//!
//! Both senders encode, sign and (HTTP only) encrypt a batch once, then run
//! the network call through [`retry::retry`].

pub mod error;
pub mod grpc;
pub mod http;
pub mod retry;

pub use error::{AttemptError, TransportError};
pub use grpc::GrpcSender;
pub use http::HttpSender;
pub use retry::{retry, spawn_retry, DEFAULT_RETRY_DELAYS};

use async_trait::async_trait;
use telemon_common::Metric;

/// One-way delivery of a metric batch.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Protocol name for logs.
    fn name(&self) -> &'static str;

    /// Delivers `metrics`, retrying transient failures.
    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError>;
}

/// Prefixes `http://` when the endpoint has no scheme and drops a trailing
/// slash.
///
/// ```
/// use telemon_transport::normalize_endpoint;
///
/// assert_eq!(normalize_endpoint("localhost:8080"), "http://localhost:8080");
/// assert_eq!(normalize_endpoint("https://metrics.local/"), "https://metrics.local");
/// ```
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}
