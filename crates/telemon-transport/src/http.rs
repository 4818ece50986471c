use crate::retry::{attempts_for, spawn_retry, DEFAULT_RETRY_DELAYS};
use crate::{normalize_endpoint, AttemptError, Sender, TransportError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::net::IpAddr;
use std::time::Duration;
use telemon_common::crypto::{self, CryptoError, PayloadEncryptor, ENCRYPTED_HEADER, ENCRYPTION_SCHEME};
use telemon_common::net::{outbound_ip, REAL_IP_HEADER};
use telemon_common::signature::{sign, HASH_HEADER};
use telemon_common::Metric;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts JSON batches to `{endpoint}/updates/`.
pub struct HttpSender {
    client: reqwest::Client,
    url: String,
    hash_key: Option<String>,
    encryptor: Option<PayloadEncryptor>,
    real_ip: Option<IpAddr>,
    delays: Vec<Duration>,
}

impl HttpSender {
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let base = normalize_endpoint(endpoint);
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::InvalidEndpoint {
                endpoint: base.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: format!("{base}/updates/"),
            hash_key: None,
            encryptor: None,
            real_ip: outbound_ip(&base),
            delays: DEFAULT_RETRY_DELAYS.to_vec(),
        })
    }

    /// Signs every payload with `key`. An empty key disables signing.
    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.hash_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn with_encryptor(mut self, encryptor: PayloadEncryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Builds headers and body once for all attempts. The signature covers
    /// the JSON payload before compression and encryption.
    fn prepare(&self, metrics: &[Metric]) -> Result<(HeaderMap, Vec<u8>), TransportError> {
        let payload = serde_json::to_vec(metrics)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.hash_key {
            put_header(&mut headers, HASH_HEADER, &sign(&payload, key));
        }
        if let Some(ip) = self.real_ip {
            put_header(&mut headers, REAL_IP_HEADER, &ip.to_string());
        }

        let body = match &self.encryptor {
            Some(encryptor) => {
                let packed = crypto::compress(&payload).map_err(CryptoError::Io)?;
                let sealed = encryptor.seal(&packed)?;
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                put_header(&mut headers, ENCRYPTED_HEADER, ENCRYPTION_SCHEME);
                sealed
            }
            None => payload,
        };
        Ok((headers, body))
    }
}

/// One delivery attempt. Non-2xx responses are failures.
async fn post(
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    body: Vec<u8>,
) -> Result<(), AttemptError> {
    let resp = client.post(url).headers(headers).body(body).send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AttemptError::Status {
        status: status.as_u16(),
        body,
    })
}

fn put_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        headers.insert(name, value);
    }
}

#[async_trait]
impl Sender for HttpSender {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        if metrics.is_empty() {
            return Ok(());
        }
        let (headers, body) = self.prepare(metrics)?;
        let bytes = body.len();
        let client = self.client.clone();
        let url = self.url.clone();
        spawn_retry(self.delays.clone(), move || {
            post(client.clone(), url.clone(), headers.clone(), body.clone())
        })
        .await
        .map_err(|_| TransportError::Abandoned)?
        .map_err(|last| TransportError::Exhausted {
            attempts: attempts_for(&self.delays),
            last,
        })?;
        tracing::debug!(count = metrics.len(), bytes, "Batch delivered over HTTP");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemon_common::crypto::PayloadDecryptor;
    use telemon_common::signature::verify;

    #[test]
    fn url_targets_batch_route() {
        let sender = HttpSender::new("localhost:8080").unwrap();
        assert_eq!(sender.url(), "http://localhost:8080/updates/");
    }

    #[test]
    fn plain_payload_is_signed_json() {
        let sender = HttpSender::new("127.0.0.1:8080")
            .unwrap()
            .with_hash_key("secret");
        let metrics = [Metric::counter("PollCount", 1)];
        let (headers, body) = sender.prepare(&metrics).unwrap();

        assert_eq!(body, serde_json::to_vec(&metrics).unwrap());
        let hash = headers.get(HASH_HEADER).unwrap().to_str().unwrap();
        assert!(verify(&body, "secret", hash));
        assert!(headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(
            headers.get(REAL_IP_HEADER).unwrap().to_str().unwrap(),
            "127.0.0.1"
        );
    }

    #[test]
    fn empty_key_disables_signing() {
        let sender = HttpSender::new("127.0.0.1:8080").unwrap().with_hash_key("");
        let (headers, _) = sender.prepare(&[Metric::gauge("Alloc", 1.0)]).unwrap();
        assert!(headers.get(HASH_HEADER).is_none());
    }

    #[test]
    fn encrypted_payload_opens_to_compressed_json() {
        let server = PayloadDecryptor::generate();
        let sender = HttpSender::new("127.0.0.1:8080")
            .unwrap()
            .with_hash_key("secret")
            .with_encryptor(PayloadEncryptor::from_hex(&server.public_key_hex()).unwrap());
        let metrics = [Metric::gauge("RandomValue", 0.42)];
        let (headers, body) = sender.prepare(&metrics).unwrap();

        assert_eq!(headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(headers.get(ENCRYPTED_HEADER).unwrap(), ENCRYPTION_SCHEME);
        let plain = crypto::decompress(&server.open(&body).unwrap(), usize::MAX).unwrap();
        assert_eq!(plain, serde_json::to_vec(&metrics).unwrap());
        let hash = headers.get(HASH_HEADER).unwrap().to_str().unwrap();
        assert!(verify(&plain, "secret", hash));
    }
}
