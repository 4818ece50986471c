//! Payload compression and public-key encryption for agent → server batches.
//!
//! Encryption uses an ephemeral X25519 key agreement with the server's
//! static key, HKDF-SHA256 key derivation and AES-256-GCM. The sealed
//! envelope is `ephemeral_pk (32) || nonce (12) || ciphertext || tag`.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use std::io::{Read, Write};
use std::path::Path;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

/// Header marking an encrypted request body.
pub const ENCRYPTED_HEADER: &str = "X-Encrypted";

/// Value of [`ENCRYPTED_HEADER`] for the scheme implemented here.
pub const ENCRYPTION_SCHEME: &str = "x25519-aes256gcm";

const HKDF_INFO: &[u8] = b"telemon-payload-x25519-aes256gcm-v1";
const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Crypto: invalid key: {0}")]
    InvalidKey(String),

    #[error("Crypto: I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto: encrypted payload is truncated")]
    Truncated,

    #[error("Crypto: encryption failed")]
    Seal,

    #[error("Crypto: decryption failed")]
    Open,

    #[error("Crypto: decompressed payload exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

fn parse_key(text: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let bytes = hex::decode(text.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {len}")))
}

fn derive_key(shared: &[u8; KEY_LEN], salt: &[u8; KEY_LEN]) -> Result<LessSafeKey, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared);
    let mut okm = [0u8; KEY_LEN];
    hkdf.expand(HKDF_INFO, &mut okm)
        .map_err(|_| CryptoError::InvalidKey("key derivation failed".to_string()))?;
    let unbound = UnboundKey::new(&AES_256_GCM, &okm)
        .map_err(|_| CryptoError::InvalidKey("invalid AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Agent side: seals payloads for the server's public key.
pub struct PayloadEncryptor {
    recipient: PublicKey,
}

impl PayloadEncryptor {
    pub fn from_hex(public_key: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            recipient: PublicKey::from(parse_key(public_key)?),
        })
    }

    /// Loads a hex-encoded public key file.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_hex(&text)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_pk = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.recipient);
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey(
                "recipient key is a low-order point".to_string(),
            ));
        }
        let key = derive_key(shared.as_bytes(), ephemeral_pk.as_bytes())?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Seal)?;

        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(ephemeral_pk.as_bytes()),
            &mut in_out,
        )
        .map_err(|_| CryptoError::Seal)?;

        let mut sealed = Vec::with_capacity(KEY_LEN + NONCE_LEN + in_out.len());
        sealed.extend_from_slice(ephemeral_pk.as_bytes());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }
}

/// Server side: opens payloads sealed for its public key.
pub struct PayloadDecryptor {
    secret: StaticSecret,
}

impl PayloadDecryptor {
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_hex(private_key: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            secret: StaticSecret::from(parse_key(private_key)?),
        })
    }

    /// Loads a hex-encoded private key file.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_hex(&text)
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(PublicKey::from(&self.secret).as_bytes())
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < KEY_LEN + NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CryptoError::Truncated);
        }
        let (pk_bytes, rest) = sealed.split_at(KEY_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let ephemeral_pk: [u8; KEY_LEN] = pk_bytes.try_into().map_err(|_| CryptoError::Truncated)?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(ephemeral_pk));
        let key = derive_key(shared.as_bytes(), &ephemeral_pk)?;
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::Truncated)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::from(&ephemeral_pk), &mut in_out)
            .map_err(|_| CryptoError::Open)?;
        Ok(plaintext.to_vec())
    }
}

/// Gzip with the best compression level.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflates a gzip payload, reading at most `limit` bytes of output.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>, CryptoError> {
    let mut decoder = GzDecoder::new(data).take((limit as u64).saturating_add(1));
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(CryptoError::TooLarge { limit });
    }
    Ok(out)
}
