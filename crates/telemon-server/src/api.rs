use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Write;
use telemon_common::metric::MetricQuery;
use telemon_common::{Metric, MetricError, MetricKind};
use telemon_storage::{ErrorClass, StorageError};

/// Error body returned by every route.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Failure of an HTTP handler, rendered as a status plus [`ErrorBody`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<MetricError> for ApiError {
    fn from(err: MetricError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(err) => match err.class() {
                ErrorClass::BadInput => StatusCode::BAD_REQUEST,
                ErrorClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

fn plain(text: String) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response()
}

fn not_found(kind: MetricKind, name: &str) -> ApiError {
    ApiError::NotFound(format!("{kind} '{name}' not found"))
}

/// `POST /update/{type}/{name}/{value}`; answers with the stored value.
pub async fn update_from_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let metric = Metric::parse(&kind, &name, &value)?;
    let merged = state.storage.add(metric)?;
    Ok(plain(merged.value.to_string()))
}

/// `POST /update/` with one JSON metric; answers with the stored metric.
pub async fn update_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let metric: Metric = decode(&body)?;
    Ok(Json(state.storage.add(metric)?))
}

/// `POST /updates/` with a JSON array.
pub async fn update_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let metrics: Vec<Metric> = decode(&body)?;
    state.storage.batch(&metrics)?;
    tracing::debug!(count = metrics.len(), "Batch stored");
    Ok(StatusCode::OK)
}

/// `GET /value/{type}/{name}`; the value as text.
pub async fn value_from_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind: MetricKind = kind.parse()?;
    let metric = state
        .storage
        .get(kind, &name)
        .ok_or_else(|| not_found(kind, &name))?;
    Ok(plain(metric.value.to_string()))
}

/// `POST /value/` with `{"id", "type"}`; answers with the full metric.
pub async fn value_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let query: MetricQuery = decode(&body)?;
    let kind = query.kind()?;
    state
        .storage
        .get(kind, &query.id)
        .map(Json)
        .ok_or_else(|| not_found(kind, &query.id))
}

/// `GET /`: every stored metric as an HTML list, sorted by type then name.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let mut metrics = state.storage.list();
    metrics.sort_by(|a, b| (a.kind(), &a.name).cmp(&(b.kind(), &b.name)));

    let mut page = String::from("<!DOCTYPE html>\n<html><head><title>telemon</title></head><body>\n<ul>\n");
    for metric in &metrics {
        let _ = writeln!(
            page,
            "<li>{} ({}): {}</li>",
            escape_html(&metric.name),
            metric.kind(),
            metric.value
        );
    }
    page.push_str("</ul>\n</body></html>\n");
    Html(page)
}

/// `GET /ping`: 200 while the backing store answers, 500 otherwise.
pub async fn ping(State(state): State<AppState>) -> Response {
    if state.storage.check_connection() {
        return plain("OK".to_string());
    }
    tracing::error!("Storage connection check failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "storage is unreachable".to_string(),
        }),
    )
        .into_response()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
