use crate::state::AppState;
use prost::Message;
use std::net::IpAddr;
use telemon_common::net::REAL_IP_METADATA;
use telemon_common::proto::metrics_server::Metrics;
use telemon_common::proto::{
    self, kind_from_wire, AddMetricRequest, AddMetricResponse, BatchAddMetricRequest,
    BatchAddMetricResponse, GetMetricRequest, GetMetricResponse, ListMetricsRequest,
    ListMetricsResponse,
};
use telemon_common::signature::{self, HASH_METADATA};
use telemon_common::{Metric, MetricError};
use telemon_storage::{ErrorClass, StorageError};
use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status};

/// `telemon.Metrics` over the shared store.
///
/// Applies the same trusted-subnet and signature rules as the HTTP
/// middleware, reading `x-real-ip` and `hash` from request metadata. The
/// signature covers the protobuf encoding of the request message.
pub struct MetricsService {
    state: AppState,
}

impl MetricsService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn check_source<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let Some(subnet) = self.state.trusted_subnet else {
            return Ok(());
        };
        let real_ip = request
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        match real_ip {
            Some(ip) if subnet.contains(&ip) => Ok(()),
            other => {
                tracing::warn!(real_ip = ?other, subnet = %subnet, "gRPC call rejected: source outside trusted subnet");
                Err(Status::permission_denied("source address is not trusted"))
            }
        }
    }

    fn check_hash<T: Message>(&self, request: &Request<T>) -> Result<(), Status> {
        let Some(key) = self.state.hash_key.as_deref() else {
            return Ok(());
        };
        let received = request
            .metadata()
            .get(HASH_METADATA)
            .and_then(|v| v.to_str().ok());
        if !signature::is_present(received) {
            return Ok(());
        }
        let encoded = request.get_ref().encode_to_vec();
        if signature::verify(&encoded, key, received.unwrap_or_default()) {
            Ok(())
        } else {
            tracing::warn!("gRPC call rejected: hash mismatch");
            Err(Status::invalid_argument("hash mismatch"))
        }
    }

    fn admit<T: Message>(&self, request: &Request<T>) -> Result<(), Status> {
        self.check_source(request)?;
        self.check_hash(request)
    }

    /// Wraps `message`, signing it when a key is configured.
    fn respond<T: Message>(&self, message: T) -> Response<T> {
        let hash = self
            .state
            .hash_key
            .as_deref()
            .map(|key| signature::sign(&message.encode_to_vec(), key));
        let mut response = Response::new(message);
        if let Some(value) = hash.and_then(|h| MetadataValue::try_from(h).ok()) {
            response.metadata_mut().insert(HASH_METADATA, value);
        }
        response
    }
}

fn invalid(err: MetricError) -> Status {
    Status::invalid_argument(err.to_string())
}

fn storage_status(err: StorageError) -> Status {
    match err.class() {
        ErrorClass::BadInput => Status::invalid_argument(err.to_string()),
        ErrorClass::Unavailable => {
            tracing::error!(error = %err, "Storage unavailable");
            Status::unavailable(err.to_string())
        }
        ErrorClass::Internal => {
            tracing::error!(error = %err, "Storage operation failed");
            Status::internal("storage failure")
        }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn add_metric(
        &self,
        request: Request<AddMetricRequest>,
    ) -> Result<Response<AddMetricResponse>, Status> {
        self.admit(&request)?;
        let wire = request
            .into_inner()
            .metric
            .ok_or_else(|| Status::invalid_argument("metric is required"))?;
        let metric = Metric::try_from(wire).map_err(invalid)?;
        let merged = self.state.storage.add(metric).map_err(storage_status)?;
        Ok(self.respond(AddMetricResponse {
            metric: Some(proto::Metric::from(&merged)),
        }))
    }

    async fn batch_add_metric(
        &self,
        request: Request<BatchAddMetricRequest>,
    ) -> Result<Response<BatchAddMetricResponse>, Status> {
        self.admit(&request)?;
        let metrics = request
            .into_inner()
            .metrics
            .into_iter()
            .map(Metric::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        self.state.storage.batch(&metrics).map_err(storage_status)?;
        tracing::debug!(count = metrics.len(), "gRPC batch stored");
        Ok(self.respond(BatchAddMetricResponse {}))
    }

    async fn get_metric(
        &self,
        request: Request<GetMetricRequest>,
    ) -> Result<Response<GetMetricResponse>, Status> {
        self.admit(&request)?;
        let query = request.into_inner();
        let kind = kind_from_wire(query.mtype).map_err(invalid)?;
        let metric = self
            .state
            .storage
            .get(kind, &query.id)
            .ok_or_else(|| Status::not_found(format!("{kind} '{}' not found", query.id)))?;
        Ok(self.respond(GetMetricResponse {
            metric: Some(proto::Metric::from(&metric)),
        }))
    }

    async fn list_metrics(
        &self,
        request: Request<ListMetricsRequest>,
    ) -> Result<Response<ListMetricsResponse>, Status> {
        self.admit(&request)?;
        let mut metrics = self.state.storage.list();
        metrics.sort_by(|a, b| (a.kind(), &a.name).cmp(&(b.kind(), &b.name)));
        Ok(self.respond(ListMetricsResponse {
            metrics: metrics.iter().map(proto::Metric::from).collect(),
        }))
    }
}
