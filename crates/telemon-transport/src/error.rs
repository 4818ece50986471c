use telemon_common::crypto::CryptoError;

/// Failure of a single delivery attempt. These are retried.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The batch could not be serialized. Not retried.
    #[error("Transport: encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    /// Compression or encryption failed. Not retried.
    #[error("Transport: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Transport: invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The retry task ended without reporting an outcome.
    #[error("Transport: delivery task ended without an outcome")]
    Abandoned,

    /// Every attempt failed; `last` is the final attempt's error.
    #[error("Transport: delivery failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: AttemptError,
    },
}
