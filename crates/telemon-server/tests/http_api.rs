mod common;

use axum::body::Body;
use axum::http::StatusCode;
use common::{get, post_json, send, TestContext};
use serde_json::json;
use telemon_common::{Metric, MetricKind};

#[tokio::test]
async fn counters_accumulate_through_path_updates() {
    let ctx = TestContext::new();

    let first = send(&ctx.app, "POST", "/update/counter/PollCount/3", &[], Body::empty()).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.text(), "3");

    let second = send(&ctx.app, "POST", "/update/counter/PollCount/4", &[], Body::empty()).await;
    assert_eq!(second.text(), "7");

    let value = get(&ctx.app, "/value/counter/PollCount").await;
    assert_eq!(value.status, StatusCode::OK);
    assert_eq!(value.text(), "7");
}

#[tokio::test]
async fn gauges_are_replaced() {
    let ctx = TestContext::new();
    send(&ctx.app, "POST", "/update/gauge/Alloc/1.5", &[], Body::empty()).await;
    send(&ctx.app, "POST", "/update/gauge/Alloc/7.07", &[], Body::empty()).await;

    assert_eq!(get(&ctx.app, "/value/gauge/Alloc").await.text(), "7.07");
}

#[tokio::test]
async fn path_update_rejects_bad_type_and_value() {
    let ctx = TestContext::new();

    let bad_type = send(&ctx.app, "POST", "/update/histogram/x/1", &[], Body::empty()).await;
    assert_eq!(bad_type.status, StatusCode::BAD_REQUEST);

    let bad_delta = send(&ctx.app, "POST", "/update/counter/x/1.5", &[], Body::empty()).await;
    assert_eq!(bad_delta.status, StatusCode::BAD_REQUEST);

    let bad_gauge = send(&ctx.app, "POST", "/update/gauge/x/abc", &[], Body::empty()).await;
    assert_eq!(bad_gauge.status, StatusCode::BAD_REQUEST);

    assert!(ctx.storage.list().is_empty());
}

#[tokio::test]
async fn missing_name_is_not_found() {
    let ctx = TestContext::new();
    let reply = send(&ctx.app, "POST", "/update/counter/", &[], Body::empty()).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn json_update_returns_stored_metric() {
    let ctx = TestContext::new();
    post_json(&ctx.app, "/update/", json!({"id": "PollCount", "type": "counter", "delta": 2})).await;
    let reply = post_json(
        &ctx.app,
        "/update/",
        json!({"id": "PollCount", "type": "counter", "delta": 5}),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.json(),
        json!({"id": "PollCount", "type": "counter", "delta": 7})
    );
}

#[tokio::test]
async fn json_update_rejects_mismatched_fields() {
    let ctx = TestContext::new();
    let reply = post_json(
        &ctx.app,
        "/update/",
        json!({"id": "PollCount", "type": "counter", "value": 1.5}),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.json()["error"].as_str().is_some());

    let empty_name = post_json(&ctx.app, "/update/", json!({"id": "", "type": "gauge", "value": 1.0})).await;
    assert_eq!(empty_name.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_update_merges_every_metric() {
    let ctx = TestContext::new();
    let reply = post_json(
        &ctx.app,
        "/updates/",
        json!([
            {"id": "PollCount", "type": "counter", "delta": 1},
            {"id": "PollCount", "type": "counter", "delta": 2},
            {"id": "RandomValue", "type": "gauge", "value": 0.25}
        ]),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    assert_eq!(
        ctx.storage.get(MetricKind::Counter, "PollCount"),
        Some(Metric::counter("PollCount", 3))
    );
    assert_eq!(
        ctx.storage.get(MetricKind::Gauge, "RandomValue"),
        Some(Metric::gauge("RandomValue", 0.25))
    );
}

#[tokio::test]
async fn batch_with_invalid_entry_stores_nothing() {
    let ctx = TestContext::new();
    let reply = post_json(
        &ctx.app,
        "/updates/",
        json!([
            {"id": "Alloc", "type": "gauge", "value": 1.0},
            {"id": "Broken", "type": "counter"}
        ]),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(ctx.storage.list().is_empty());
}

#[tokio::test]
async fn value_lookup_by_json() {
    let ctx = TestContext::new();
    ctx.storage.add(Metric::gauge("Alloc", 42.5)).unwrap();

    let found = post_json(&ctx.app, "/value/", json!({"id": "Alloc", "type": "gauge"})).await;
    assert_eq!(found.status, StatusCode::OK);
    assert_eq!(found.json(), json!({"id": "Alloc", "type": "gauge", "value": 42.5}));

    let wrong_kind = post_json(&ctx.app, "/value/", json!({"id": "Alloc", "type": "counter"})).await;
    assert_eq!(wrong_kind.status, StatusCode::NOT_FOUND);

    let bad_kind = post_json(&ctx.app, "/value/", json!({"id": "Alloc", "type": "summary"})).await;
    assert_eq!(bad_kind.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_metric_is_not_found() {
    let ctx = TestContext::new();
    assert_eq!(get(&ctx.app, "/value/gauge/Missing").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&ctx.app, "/value/timer/Missing").await.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn index_lists_metrics_sorted() {
    let ctx = TestContext::new();
    ctx.storage.add(Metric::gauge("Zeta", 1.0)).unwrap();
    ctx.storage.add(Metric::gauge("Alpha", 2.0)).unwrap();
    ctx.storage.add(Metric::counter("PollCount", 4)).unwrap();
    ctx.storage.add(Metric::gauge("<script>", 0.0)).unwrap();

    let reply = get(&ctx.app, "/").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let page = reply.text();
    let counter = page.find("PollCount (counter): 4").unwrap();
    let alpha = page.find("Alpha (gauge): 2").unwrap();
    let zeta = page.find("Zeta (gauge): 1").unwrap();
    assert!(counter < alpha && alpha < zeta);
    assert!(page.contains("&lt;script&gt;"));
}

#[tokio::test]
async fn ping_reports_storage_health() {
    let ctx = TestContext::new();
    let reply = get(&ctx.app, "/ping").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "OK");

    let sql = std::sync::Arc::new(telemon_storage::SqlStorage::open("sqlite::memory:").unwrap());
    let state = telemon_server::state::AppState::new(sql.clone());
    let app = telemon_server::app::build_http_app(state);
    telemon_storage::MetricStore::close(sql.as_ref()).unwrap();
    assert_eq!(get(&app, "/ping").await.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn closed_store_is_unavailable() {
    let sql = std::sync::Arc::new(telemon_storage::SqlStorage::open("sqlite::memory:").unwrap());
    let app = telemon_server::app::build_http_app(telemon_server::state::AppState::new(sql.clone()));
    telemon_storage::MetricStore::close(sql.as_ref()).unwrap();

    let reply = send(&app, "POST", "/update/gauge/Alloc/1", &[], Body::empty()).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn responses_carry_trace_id() {
    let ctx = TestContext::new();
    let reply = get(&ctx.app, "/ping").await;
    let trace_id = reply.headers["x-trace-id"].to_str().unwrap();
    assert_eq!(trace_id.len(), 16);
}

fn large_batch(count: usize) -> String {
    let entries: Vec<String> = (0..count)
        .map(|i| format!(r#"{{"id":"Gauge{i:05}","type":"gauge","value":{i}.5}}"#))
        .collect();
    format!("[{}]", entries.join(","))
}

#[tokio::test]
async fn batch_larger_than_log_capture_is_stored_whole() {
    let ctx = TestContext::new();
    let body = large_batch(30_000);
    assert!(body.len() > 1024 * 1024);
    let length = body.len().to_string();

    let reply = send(
        &ctx.app,
        "POST",
        "/updates/",
        &[
            ("Content-Type", "application/json"),
            ("Content-Length", length.as_str()),
        ],
        body,
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(ctx.storage.list().len(), 30_000);
    assert_eq!(
        ctx.storage.get(MetricKind::Gauge, "Gauge29999"),
        Some(Metric::gauge("Gauge29999", 29999.5))
    );
}

#[tokio::test]
async fn non_finite_gauge_is_rejected() {
    let ctx = TestContext::new();
    for raw in ["NaN", "inf"] {
        let reply = send(
            &ctx.app,
            "POST",
            &format!("/update/gauge/Weird/{raw}"),
            &[],
            Body::empty(),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }
    assert!(ctx.storage.list().is_empty());
}
