use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::AppState;

/// Service name every demo route is tagged with.
const SERVICE: &str = "viewstats-demo";

/// Tracks each matched request as a server-side call and adds two
/// response headers:
///
///   X-Response-Time-Us: total handler wall time in microseconds
///   Server-Timing: same value in the standard Server-Timing format
pub async fn timing_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let mut call = state
        .server_rpc
        .start_call(SERVICE, &format!("{method} {route}"));
    call.on_request(content_length(req.headers()));

    let start = std::time::Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    call.on_response(content_length(response.headers()));
    let status = response.status();
    call.finish_with_latency(status_name(status), elapsed.as_secs_f64() * 1000.0);

    // ── Inject response headers ─────────────────────────────────
    let us = elapsed.as_micros();
    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert("X-Response-Time-Us", val);
    }
    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    // SSE connections stay open; their latency is meaningless here
    if !route.ends_with("/stream") {
        tracing::debug!(status = status.as_u16(), %method, %route, us = us as u64, "request");
    }

    response
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Maps an HTTP status onto the RPC status vocabulary.
fn status_name(status: StatusCode) -> &'static str {
    match status.as_u16() {
        200..=299 => viewstats::rpc::STATUS_OK,
        400 => "INVALID_ARGUMENT",
        404 => "NOT_FOUND",
        409 => "ABORTED",
        429 => "RESOURCE_EXHAUSTED",
        500..=599 => "INTERNAL",
        _ => "UNKNOWN",
    }
}
