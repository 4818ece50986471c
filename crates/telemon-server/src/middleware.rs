use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::IpAddr;
use telemon_common::crypto::{self, CryptoError, ENCRYPTED_HEADER, ENCRYPTION_SCHEME};
use telemon_common::net::REAL_IP_HEADER;
use telemon_common::signature::{self, HASH_HEADER};

use crate::api::ErrorBody;
use crate::logging::TraceId;
use crate::state::AppState;

/// Upper bound for request bodies buffered by the middleware.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

fn reject(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn trace_id(req: &Request) -> String {
    req.extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Rejects requests whose `X-Real-IP` is missing or outside the configured
/// subnet with 403. Passes everything through when no subnet is set.
pub async fn trusted_subnet(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(subnet) = state.trusted_subnet else {
        return next.run(req).await;
    };

    let real_ip = header(req.headers(), REAL_IP_HEADER).and_then(|v| v.trim().parse::<IpAddr>().ok());
    match real_ip {
        Some(ip) if subnet.contains(&ip) => next.run(req).await,
        other => {
            tracing::warn!(
                trace_id = %trace_id(&req),
                real_ip = ?other,
                subnet = %subnet,
                "Request rejected: source outside trusted subnet"
            );
            reject(StatusCode::FORBIDDEN, "source address is not trusted")
        }
    }
}

/// Opens encrypted bodies and inflates gzip bodies so handlers always see
/// plain JSON. Inflating past [`MAX_BODY_BYTES`] is a 413, any other failure
/// a 400.
pub async fn decode_body(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let scheme = header(req.headers(), ENCRYPTED_HEADER).map(str::to_string);
    let gzipped = header(req.headers(), CONTENT_ENCODING.as_str())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));
    if scheme.is_none() && !gzipped {
        return next.run(req).await;
    }

    let trace_id = trace_id(&req);
    let (mut parts, body) = req.into_parts();
    let mut data = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Failed to read request body");
            return reject(StatusCode::BAD_REQUEST, "unreadable request body");
        }
    };

    if let Some(scheme) = scheme {
        if scheme != ENCRYPTION_SCHEME {
            tracing::warn!(trace_id = %trace_id, scheme = %scheme, "Unsupported encryption scheme");
            return reject(StatusCode::BAD_REQUEST, "unsupported encryption scheme");
        }
        let Some(decryptor) = state.decryptor.as_deref() else {
            tracing::warn!(trace_id = %trace_id, "Encrypted payload received but no private key is configured");
            return reject(StatusCode::BAD_REQUEST, "encrypted payloads are not accepted");
        };
        data = match decryptor.open(&data) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::warn!(trace_id = %trace_id, error = %e, "Failed to decrypt payload");
                return reject(StatusCode::BAD_REQUEST, "payload could not be decrypted");
            }
        };
        parts.headers.remove(ENCRYPTED_HEADER);
    }

    if gzipped {
        data = match crypto::decompress(&data, MAX_BODY_BYTES) {
            Ok(plain) => plain,
            Err(e @ CryptoError::TooLarge { .. }) => {
                tracing::warn!(trace_id = %trace_id, error = %e, "Inflated payload too large");
                return reject(StatusCode::PAYLOAD_TOO_LARGE, "decompressed payload is too large");
            }
            Err(e) => {
                tracing::warn!(trace_id = %trace_id, error = %e, "Failed to inflate payload");
                return reject(StatusCode::BAD_REQUEST, "payload is not valid gzip");
            }
        };
        parts.headers.remove(CONTENT_ENCODING);
    }

    parts.headers.remove(CONTENT_LENGTH);
    next.run(Request::from_parts(parts, Body::from(data))).await
}

/// With a key configured: verifies the `Hash` header over the decoded body
/// (400 on mismatch) and signs every response body. A missing header or
/// `none` skips verification.
pub async fn verify_hash(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(key) = state.hash_key.clone() else {
        return next.run(req).await;
    };

    let received = header(req.headers(), HASH_HEADER).map(str::to_string);
    let req = if signature::is_present(received.as_deref()) {
        let trace_id = trace_id(&req);
        let (parts, body) = req.into_parts();
        let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(trace_id = %trace_id, error = %e, "Failed to read request body");
                return reject(StatusCode::BAD_REQUEST, "unreadable request body");
            }
        };
        if !signature::verify(&bytes, &key, received.as_deref().unwrap_or_default()) {
            tracing::warn!(trace_id = %trace_id, "Request rejected: hash mismatch");
            return reject(StatusCode::BAD_REQUEST, "hash mismatch");
        }
        Request::from_parts(parts, Body::from(bytes))
    } else {
        req
    };

    let response = next.run(req).await;
    sign_response(response, &key).await
}

async fn sign_response(response: Response, key: &str) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes: Bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response for signing");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let (Ok(name), Ok(value)) = (
        HeaderName::try_from(HASH_HEADER),
        HeaderValue::try_from(signature::sign(&bytes, key)),
    ) {
        parts.headers.insert(name, value);
    }
    Response::from_parts(parts, Body::from(bytes))
}
