use crate::retry::{attempts_for, spawn_retry, DEFAULT_RETRY_DELAYS};
use crate::{normalize_endpoint, AttemptError, Sender, TransportError};
use async_trait::async_trait;
use prost::Message;
use std::net::IpAddr;
use std::time::Duration;
use telemon_common::net::{outbound_ip, REAL_IP_METADATA};
use telemon_common::proto::metrics_client::MetricsClient;
use telemon_common::proto::{self, BatchAddMetricRequest};
use telemon_common::signature::{sign, HASH_METADATA};
use telemon_common::Metric;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends batches through `telemon.Metrics/BatchAddMetric`.
///
/// The `hash` metadata signs the protobuf encoding of the request message,
/// which the server re-encodes to verify.
pub struct GrpcSender {
    client: MetricsClient<Channel>,
    hash_key: Option<String>,
    real_ip: Option<IpAddr>,
    delays: Vec<Duration>,
}

impl GrpcSender {
    /// Must be called inside a Tokio runtime. The channel connects lazily on
    /// the first request and reconnects after failures.
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let uri = normalize_endpoint(endpoint);
        let channel = Endpoint::from_shared(uri.clone())
            .map_err(|e| TransportError::InvalidEndpoint {
                endpoint: uri.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .connect_lazy();
        Ok(Self {
            client: MetricsClient::new(channel),
            hash_key: None,
            real_ip: outbound_ip(&uri),
            delays: DEFAULT_RETRY_DELAYS.to_vec(),
        })
    }

    /// Signs every request with `key`. An empty key disables signing.
    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.hash_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }
}

fn build_request(
    message: &BatchAddMetricRequest,
    hash: Option<&str>,
    real_ip: Option<IpAddr>,
) -> tonic::Request<BatchAddMetricRequest> {
    let mut request = tonic::Request::new(message.clone());
    if let Some(hash) = hash {
        if let Ok(value) = MetadataValue::try_from(hash) {
            request.metadata_mut().insert(HASH_METADATA, value);
        }
    }
    if let Some(ip) = real_ip {
        if let Ok(value) = MetadataValue::try_from(ip.to_string()) {
            request.metadata_mut().insert(REAL_IP_METADATA, value);
        }
    }
    request
}

async fn call(
    mut client: MetricsClient<Channel>,
    request: tonic::Request<BatchAddMetricRequest>,
) -> Result<(), AttemptError> {
    client.batch_add_metric(request).await?;
    Ok(())
}

#[async_trait]
impl Sender for GrpcSender {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        if metrics.is_empty() {
            return Ok(());
        }
        let message = BatchAddMetricRequest {
            metrics: metrics.iter().map(proto::Metric::from).collect(),
        };
        let hash = self
            .hash_key
            .as_deref()
            .map(|key| sign(&message.encode_to_vec(), key));

        let client = self.client.clone();
        let real_ip = self.real_ip;
        spawn_retry(self.delays.clone(), move || {
            call(
                client.clone(),
                build_request(&message, hash.as_deref(), real_ip),
            )
        })
        .await
        .map_err(|_| TransportError::Abandoned)?
        .map_err(|last| TransportError::Exhausted {
            attempts: attempts_for(&self.delays),
            last,
        })?;
        tracing::debug!(count = metrics.len(), "Batch delivered over gRPC");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemon_common::signature::verify;

    #[tokio::test]
    async fn request_carries_signature_of_encoded_message() {
        let sender = GrpcSender::new("127.0.0.1:3200")
            .unwrap()
            .with_hash_key("secret");
        let message = BatchAddMetricRequest {
            metrics: vec![proto::Metric::from(&Metric::counter("PollCount", 3))],
        };
        let hash = sign(&message.encode_to_vec(), "secret");
        let request = build_request(&message, Some(&hash), sender.real_ip);

        let received = request
            .metadata()
            .get(HASH_METADATA)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(verify(&request.get_ref().encode_to_vec(), "secret", received));
        assert_eq!(
            request
                .metadata()
                .get(REAL_IP_METADATA)
                .unwrap()
                .to_str()
                .unwrap(),
            "127.0.0.1"
        );
    }

    #[tokio::test]
    async fn malformed_endpoint_is_rejected() {
        let err = GrpcSender::new("http://bad host:3200").err().unwrap();
        assert!(matches!(err, TransportError::InvalidEndpoint { .. }));
    }
}
