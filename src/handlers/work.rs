use axum::{extract::Path, Json};
use rand::Rng;
use serde::Serialize;
use std::time::{Duration, Instant};

use super::AppError;

#[derive(Debug, Serialize)]
pub struct WorkResult {
    pub kind: String,
    pub slept_us: u64,
}

// ─── GET /api/work/:kind ─────────────────────────────────────────
/// Simulated unit of work so the server-side views have something to
/// aggregate. `fast` and `slow` sleep for different ranges; `fail`
/// returns an error.

pub async fn do_work(Path(kind): Path<String>) -> Result<Json<WorkResult>, AppError> {
    let range_ms = match kind.as_str() {
        "fast" => 0..5u64,
        "slow" => 50..250u64,
        "fail" => return Err(AppError::BadRequest("requested failure".into())),
        other => return Err(AppError::NotFound(format!("unknown work kind {other:?}"))),
    };

    let sleep_ms = rand::thread_rng().gen_range(range_ms);
    let t0 = Instant::now();
    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

    Ok(Json(WorkResult {
        kind,
        slept_us: t0.elapsed().as_micros() as u64,
    }))
}
