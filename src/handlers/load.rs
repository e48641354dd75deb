use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::load_generator::LoadReport;
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    /// Number of concurrent Tokio tasks recording synthetic calls
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// How long the run lasts (seconds)
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Percentage of calls that finish with an error status (0–100)
    #[serde(default = "default_error_pct")]
    pub error_pct: u8,
}

fn default_concurrency() -> u32 {
    10
}
fn default_duration() -> u64 {
    30
}
fn default_error_pct() -> u8 {
    5
}

impl LoadConfig {
    fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 || self.concurrency > 500 {
            return Err(AppError::BadRequest(
                "concurrency must be between 1 and 500".into(),
            ));
        }
        if self.duration_secs == 0 || self.duration_secs > 300 {
            return Err(AppError::BadRequest(
                "duration_secs must be between 1 and 300".into(),
            ));
        }
        if self.error_pct > 100 {
            return Err(AppError::BadRequest(
                "error_pct must be between 0 and 100".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct LoadStatus {
    pub running: bool,
    pub message: String,
    pub last_run: Option<LoadReport>,
}

// ─── POST /api/load/start ────────────────────────────────────────

pub async fn start_load(
    State(state): State<Arc<AppState>>,
    Json(config): Json<LoadConfig>,
) -> Result<Json<LoadStatus>, AppError> {
    // Guard: only one run at a time
    if state.load_running.load(Ordering::SeqCst) {
        return Err(AppError::AlreadyRunning);
    }
    config.validate()?;

    // Flip the flag BEFORE spawning so workers see it immediately
    state.load_running.store(true, Ordering::SeqCst);

    let msg = format!(
        "Started: {} workers × {}s, {}% errors",
        config.concurrency, config.duration_secs, config.error_pct,
    );
    tracing::info!(
        concurrency = config.concurrency,
        duration_secs = config.duration_secs,
        "load run started"
    );

    let task_state = Arc::clone(&state);
    let handle = tokio::spawn(async move {
        let report = crate::load_generator::run(
            task_state.load_running.clone(),
            task_state.client_rpc.clone(),
            config.concurrency,
            config.duration_secs,
            config.error_pct,
        )
        .await;
        tracing::info!(
            calls = report.calls,
            p99_ns = report.record_cost_ns.value_at(0.99).unwrap_or(0),
            "load run finished"
        );
        *task_state.last_load.lock() = Some(report);
    });

    // Stash the handle so `stop` can await clean shutdown
    *state.load_handle.lock().await = Some(handle);

    Ok(Json(LoadStatus {
        running: true,
        message: msg,
        last_run: None,
    }))
}

// ─── POST /api/load/stop ─────────────────────────────────────────

pub async fn stop_load(State(state): State<Arc<AppState>>) -> Json<LoadStatus> {
    if !state.load_running.load(Ordering::SeqCst) {
        return Json(LoadStatus {
            running: false,
            message: "No load run in progress".into(),
            last_run: state.last_load.lock().clone(),
        });
    }

    // Signal all workers to stop
    state.load_running.store(false, Ordering::SeqCst);

    // Await the generator task so its report is in place
    let handle = state.load_handle.lock().await.take();
    if let Some(handle) = handle {
        // The task may have already finished
        let _ = handle.await;
    }

    Json(LoadStatus {
        running: false,
        message: "Load run stopped".into(),
        last_run: state.last_load.lock().clone(),
    })
}

// ─── GET /api/load/status ────────────────────────────────────────

pub async fn load_status(State(state): State<Arc<AppState>>) -> Json<LoadStatus> {
    let running = state.load_running.load(Ordering::SeqCst);
    Json(LoadStatus {
        running,
        message: if running {
            "Load run in progress".into()
        } else {
            "Idle".into()
        },
        last_run: state.last_load.lock().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_bounds() {
        let config: LoadConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.concurrency, 10);
        assert!(config.validate().is_ok());

        let bad: LoadConfig = serde_json::from_str(r#"{"error_pct": 101}"#).unwrap();
        assert!(bad.validate().is_err());
        let bad: LoadConfig = serde_json::from_str(r#"{"concurrency": 0}"#).unwrap();
        assert!(bad.validate().is_err());
    }
}
