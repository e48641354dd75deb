use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use viewstats::ViewData;

use super::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ViewRef {
    pub view: String,
}

// ─── GET /api/views ──────────────────────────────────────────────
/// Current data of every registered view.

pub async fn list_views(State(state): State<Arc<AppState>>) -> Json<Vec<ViewData>> {
    Json(snapshot_all(&state))
}

fn snapshot_all(state: &AppState) -> Vec<ViewData> {
    state
        .registry
        .view_names()
        .iter()
        // A view unregistered between the two calls is simply skipped
        .filter_map(|name| state.registry.retrieve_data(name).ok())
        .collect()
}

// ─── GET /api/views/*name ────────────────────────────────────────

pub async fn get_view(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ViewData>, AppError> {
    let name = name.trim_start_matches('/');
    Ok(Json(state.registry.retrieve_data(name)?))
}

// ─── GET /api/stream ─────────────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes every view's data as one JSON array each second.

pub async fn views_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_secs(1));

    let stream = IntervalStream::new(interval).map(move |_| {
        let json = serde_json::to_string(&snapshot_all(&state)).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ─── GET /api/exports ────────────────────────────────────────────
/// Snapshots the reporter pushed onto the export channel, oldest first.

pub async fn recent_exports(State(state): State<Arc<AppState>>) -> Json<Vec<ViewData>> {
    let recent = state.recent_exports.lock();
    Json(recent.iter().map(|d| ViewData::clone(d)).collect())
}

// ─── POST /api/exports/collect ───────────────────────────────────

pub async fn force_collect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ViewRef>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.reporter.force_collect(&req.view)?;
    Ok(Json(serde_json::json!({ "collected": req.view })))
}

// ─── Subscriptions ───────────────────────────────────────────────

pub async fn subscriptions(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.registry.subscribed())
}

pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ViewRef>,
) -> Result<Json<Vec<String>>, AppError> {
    state.registry.subscribe(&req.view)?;
    Ok(Json(state.registry.subscribed()))
}

pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ViewRef>,
) -> Result<Json<Vec<String>>, AppError> {
    state.registry.unsubscribe(&req.view)?;
    Ok(Json(state.registry.subscribed()))
}
