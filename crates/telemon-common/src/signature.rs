//! Shared-secret payload signatures carried in the `Hash` header.

use sha2::{Digest, Sha256};

/// Header (HTTP) carrying the payload signature. gRPC metadata uses the
/// lowercase form.
pub const HASH_HEADER: &str = "Hash";

/// gRPC metadata key carrying the signature of the encoded request message.
pub const HASH_METADATA: &str = "hash";

/// Header value that explicitly disables verification.
pub const HASH_DISABLED: &str = "none";

/// Returns `hex(sha256(payload || key))`.
///
/// # Examples
///
/// ```
/// use telemon_common::signature::{sign, verify};
///
/// let hash = sign(b"[]", "secret");
/// assert_eq!(hash.len(), 64);
/// assert!(verify(b"[]", "secret", &hash));
/// assert!(!verify(b"[ ]", "secret", &hash));
/// ```
pub fn sign(payload: &[u8], key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks a received signature. Hex case and surrounding whitespace are
/// ignored.
pub fn verify(payload: &[u8], key: &str, received: &str) -> bool {
    sign(payload, key) == received.trim().to_ascii_lowercase()
}

/// Whether a received header value asks for verification at all.
pub fn is_present(received: Option<&str>) -> bool {
    matches!(received, Some(v) if !v.is_empty() && v != HASH_DISABLED)
}
