//! telemon collector server.
//!
//! HTTP routes live in [`api`] behind the middleware stack assembled in
//! [`app::build_http_app`]; [`grpc::MetricsService`] serves the same store
//! over `telemon.Metrics`.

pub mod api;
pub mod app;
pub mod config;
pub mod grpc;
pub mod logging;
pub mod middleware;
pub mod state;
pub mod storage;
