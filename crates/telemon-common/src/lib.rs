//! Shared types for the telemon agent and server.
//!
//! [`metric`] defines the typed counter/gauge sample and its JSON/text
//! codec, [`proto`] the gRPC schema, and [`signature`] / [`crypto`] the
//! optional payload protection applied by transports.

pub mod crypto;
pub mod metric;
pub mod net;
pub mod proto;
pub mod signature;

pub use metric::{Metric, MetricError, MetricKind, MetricValue};
