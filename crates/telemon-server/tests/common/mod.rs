#![allow(dead_code)]

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use std::sync::Arc;
use telemon_server::app;
use telemon_server::state::AppState;
use telemon_storage::{MemStorage, MetricStore};
use tower::util::ServiceExt;

pub struct TestContext {
    pub storage: Arc<dyn MetricStore>,
    pub state: AppState,
    pub app: axum::Router,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with(|state| state)
    }

    /// Starts from an in-memory store and lets the caller enable checks.
    pub fn with(configure: impl FnOnce(AppState) -> AppState) -> Self {
        let storage: Arc<dyn MetricStore> = Arc::new(MemStorage::new());
        let state = configure(AppState::new(storage.clone()));
        let app = app::build_http_app(state.clone());
        Self {
            storage,
            state,
            app,
        }
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response should be JSON")
    }
}

pub async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(body.into()).expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    Reply {
        status,
        headers,
        body,
    }
}

pub async fn post_json(app: &axum::Router, uri: &str, body: serde_json::Value) -> Reply {
    send(
        app,
        "POST",
        uri,
        &[("Content-Type", "application/json")],
        body.to_string(),
    )
    .await
}

pub async fn get(app: &axum::Router, uri: &str) -> Reply {
    send(app, "GET", uri, &[], Body::empty()).await
}
