use std::collections::BTreeMap;
use std::convert::Infallible;

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::hub::{Channel, Subscription};
use crate::ingest::scheduler::CollectorHealth;
use crate::pipeline::Pipeline;
use crate::snapshot::UnifiedSnapshot;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
}

pub fn router(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/snapshot", get(latest_snapshot))
        .route("/refresh", post(force_refresh))
        .route("/snapshot/history", get(snapshot_history))
        .route("/collectors/health", get(collector_health))
        .route("/stream", get(stream_snapshots))
        .layer(CorsLayer::very_permissive())
        .with_state(AppState { pipeline })
}

async fn latest_snapshot(State(state): State<AppState>) -> Json<UnifiedSnapshot> {
    Json(state.pipeline.latest_snapshot().as_ref().clone())
}

async fn force_refresh(State(state): State<AppState>) -> Json<UnifiedSnapshot> {
    Json(state.pipeline.force_refresh().await.as_ref().clone())
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResp {
    count: usize,
    items: Vec<UnifiedSnapshot>,
}

async fn snapshot_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<HistoryResp> {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let items: Vec<UnifiedSnapshot> = state
        .pipeline
        .history(limit)
        .iter()
        .map(|s| s.as_ref().clone())
        .collect();
    Json(HistoryResp {
        count: items.len(),
        items,
    })
}

async fn collector_health(State(state): State<AppState>) -> Json<BTreeMap<String, CollectorHealth>> {
    Json(state.pipeline.collector_health().await)
}

#[derive(Deserialize)]
struct StreamQuery {
    channel: Option<String>,
}

async fn stream_snapshots(State(state): State<AppState>, Query(q): Query<StreamQuery>) -> Response {
    let channel = match q.channel.as_deref().map(str::parse::<Channel>).transpose() {
        Ok(c) => c.unwrap_or(Channel::All),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let sub = state.pipeline.subscribe(channel);
    Sse::new(snapshot_events(sub))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Ends when the subscription closes; dropping the stream (client gone) unsubscribes.
fn snapshot_events(sub: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(sub, |sub| async move {
        let snap = sub.recv().await?;
        let event = match serde_json::to_string(snap.as_ref()) {
            Ok(body) => Event::default().event(sub.channel().as_str()).data(body),
            Err(e) => {
                tracing::warn!(target: "hub", error = %e, "snapshot encode failed");
                Event::default().comment("encode error")
            }
        };
        Some((Ok(event), sub))
    })
}
