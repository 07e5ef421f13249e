// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /snapshot
// - POST /refresh
// - GET /snapshot/history
// - GET /collectors/health
// - GET /stream (channel validation + SSE content type)

mod common;

use http::{header, Request, StatusCode};
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use common::*;
use wildfire_pipeline::pipeline::Pipeline;

const BODY_LIMIT: usize = 1024 * 1024;

fn test_app() -> (Router, Pipeline) {
    let (reg, _) = healthy_registry();
    let (pipeline, _) = pipeline_with(reg);
    (wildfire_pipeline::router(pipeline.clone()), pipeline)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET request")
}

async fn json_body(resp: shuttle_axum::axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = test_app();
    let resp = app.oneshot(get("/health")).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn snapshot_before_first_cycle_is_placeholder() {
    let (app, _) = test_app();
    let resp = app.oneshot(get("/snapshot")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["quality"], "fallback");
    for field in ["fires", "weather", "terrain", "derived", "sources", "generated_at"] {
        assert!(!v[field].is_null(), "{field} must be populated");
    }
}

#[tokio::test]
async fn refresh_runs_a_cycle_and_returns_the_new_snapshot() {
    let (app, pipeline) = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/refresh")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["quality"], "high");
    assert_eq!(v["fires"].as_array().map(Vec::len), Some(2));
    assert_eq!(pipeline.history(10).len(), 1);
}

#[tokio::test]
async fn history_respects_limit() {
    let (app, pipeline) = test_app();
    for _ in 0..3 {
        pipeline.run_cycle(true).await;
    }
    let resp = app.oneshot(get("/snapshot/history?limit=2")).await.unwrap();
    let v = json_body(resp).await;
    assert_eq!(v["count"], 2);
    assert_eq!(v["items"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn collector_health_lists_every_collector() {
    let (app, pipeline) = test_app();
    pipeline.run_cycle(false).await;
    let resp = app.oneshot(get("/collectors/health")).await.unwrap();
    let v = json_body(resp).await;
    for id in ["firms", "weather", "terrain"] {
        assert_eq!(v[id]["healthy"], true, "{id}");
        assert_eq!(v[id]["consecutive_failures"], 0);
        assert!(v[id]["last_success_at"].is_string());
    }
}

#[tokio::test]
async fn stream_rejects_unknown_channel() {
    let (app, _) = test_app();
    let resp = app.oneshot(get("/stream?channel=terrain")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stream_is_server_sent_events() {
    let (app, pipeline) = test_app();
    let resp = app.oneshot(get("/stream?channel=fires")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(ct.starts_with("text/event-stream"), "got {ct}");
    assert_eq!(pipeline.hub().subscriber_count(), 1);

    drop(resp);
    assert_eq!(pipeline.hub().subscriber_count(), 0, "disconnect unsubscribes");
}
