//! gRPC schema for the `telemon.Metrics` service.
//!
//! Messages are declared with `prost` derives; the client and server stubs
//! (`metrics_client`, `metrics_server`) are generated by `build.rs`.
#![allow(clippy::pedantic)]
#![allow(clippy::derive_partial_eq_without_eq)]

use crate::metric::{Metric as DomainMetric, MetricError, MetricKind, MetricValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MType {
    Unspecified = 0,
    Counter = 1,
    Gauge = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(enumeration = "MType", tag = "2")]
    pub mtype: i32,
    #[prost(double, tag = "3")]
    pub value: f64,
    #[prost(int64, tag = "4")]
    pub delta: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddMetricRequest {
    #[prost(message, optional, tag = "1")]
    pub metric: ::core::option::Option<Metric>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddMetricResponse {
    #[prost(message, optional, tag = "1")]
    pub metric: ::core::option::Option<Metric>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchAddMetricRequest {
    #[prost(message, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<Metric>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchAddMetricResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetricRequest {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(enumeration = "MType", tag = "2")]
    pub mtype: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetricResponse {
    #[prost(message, optional, tag = "1")]
    pub metric: ::core::option::Option<Metric>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListMetricsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListMetricsResponse {
    #[prost(message, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<Metric>,
}

include!(concat!(env!("OUT_DIR"), "/telemon.Metrics.rs"));

impl From<MetricKind> for MType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MType::Counter,
            MetricKind::Gauge => MType::Gauge,
        }
    }
}

/// Maps a raw wire enum to a metric kind; `UNSPECIFIED` and unknown values
/// are rejected.
pub fn kind_from_wire(mtype: i32) -> Result<MetricKind, MetricError> {
    match MType::try_from(mtype) {
        Ok(MType::Counter) => Ok(MetricKind::Counter),
        Ok(MType::Gauge) => Ok(MetricKind::Gauge),
        Ok(MType::Unspecified) | Err(_) => Err(MetricError::IncorrectMetricTypeOrValue(
            format!("unsupported wire metric type {mtype}"),
        )),
    }
}

impl From<&DomainMetric> for Metric {
    fn from(metric: &DomainMetric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Counter(delta) => (delta, 0.0),
            MetricValue::Gauge(value) => (0, value),
        };
        Metric {
            id: metric.name.clone(),
            mtype: MType::from(metric.kind()) as i32,
            value,
            delta,
        }
    }
}

impl TryFrom<Metric> for DomainMetric {
    type Error = MetricError;

    fn try_from(wire: Metric) -> Result<Self, Self::Error> {
        let value = match kind_from_wire(wire.mtype)? {
            MetricKind::Counter => MetricValue::Counter(wire.delta),
            MetricKind::Gauge => MetricValue::Gauge(wire.value),
        };
        let metric = DomainMetric {
            name: wire.id,
            value,
        };
        metric.validate()?;
        Ok(metric)
    }
}
