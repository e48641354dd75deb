use hdrhistogram::Histogram;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use viewstats::rpc::{RpcStats, STATUS_OK};

use crate::percentiles::PercentileSet;

/// Histogram range for a single `finish` call: 1 ns → 10 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 10_000_000_000;
const HIST_SIGFIG: u8 = 3;

/// Synthetic services and methods the workers pretend to call.
static METHODS: &[(&str, &str)] = &[
    ("users", "Get"),
    ("users", "Create"),
    ("products", "Get"),
    ("products", "Search"),
    ("sessions", "Create"),
];

/// Outcome of one load run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub calls: u64,
    pub errors: u64,
    pub elapsed_secs: f64,
    pub calls_per_sec: f64,
    /// Cost of recording one call into every client-side view
    pub record_cost_ns: PercentileSet,
}

/// Per-worker tallies, merged once the worker stops.
struct WorkerTally {
    calls: u64,
    errors: u64,
    record_cost: Histogram<u64>,
}

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `concurrency` Tokio tasks that record synthetic client calls
/// until the deadline or the `running` flag is set to false.
pub async fn run(
    running: Arc<AtomicBool>,
    rpc: Arc<RpcStats>,
    concurrency: u32,
    duration_secs: u64,
    error_pct: u8,
) -> LoadReport {
    let started = Instant::now();
    let deadline = started + Duration::from_secs(duration_secs);

    let mut handles = Vec::with_capacity(concurrency as usize);
    for worker_id in 0..concurrency {
        let running = running.clone();
        let rpc = rpc.clone();
        handles.push(tokio::spawn(async move {
            worker(worker_id, running, rpc, deadline, error_pct).await
        }));
    }

    let mut calls = 0;
    let mut errors = 0;
    let mut record_cost = new_histogram();
    for h in handles {
        // A panicked worker just contributes nothing
        if let Ok(tally) = h.await {
            calls += tally.calls;
            errors += tally.errors;
            let _ = record_cost.add(&tally.record_cost);
        }
    }

    // Mark the run as finished
    running.store(false, Ordering::SeqCst);

    let elapsed_secs = started.elapsed().as_secs_f64();
    LoadReport {
        calls,
        errors,
        elapsed_secs,
        calls_per_sec: if elapsed_secs > 0.0 {
            calls as f64 / elapsed_secs
        } else {
            0.0
        },
        record_cost_ns: PercentileSet::from_histogram(&record_cost),
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("histogram creation")
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: u32,
    running: Arc<AtomicBool>,
    rpc: Arc<RpcStats>,
    deadline: Instant,
    error_pct: u8,
) -> WorkerTally {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);
    let mut tally = WorkerTally {
        calls: 0,
        errors: 0,
        record_cost: new_histogram(),
    };

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        let (service, method) = METHODS[rng.gen_range(0..METHODS.len())];
        let failed = rng.gen_range(0u8..100) < error_pct;
        // Log-normal-ish latency: mostly a few ms, occasionally hundreds
        let latency_ms = rng.gen_range(0.2f64..4.0) * if rng.gen_bool(0.05) { 60.0 } else { 1.0 };

        let mut call = rpc.start_call(service, method);
        call.on_request(rng.gen_range(64..4096));
        call.on_response(rng.gen_range(128..65536));

        // ── Timed section: the recording hot path ───────────────
        let t0 = Instant::now();
        call.finish_with_latency(if failed { "UNAVAILABLE" } else { STATUS_OK }, latency_ms);
        let cost_ns = t0.elapsed().as_nanos() as u64;
        // ────────────────────────────────────────────────────────

        let _ = tally.record_cost.record(cost_ns.max(HIST_LOW));
        tally.calls += 1;
        if failed {
            tally.errors += 1;
        }

        // Let other workers and the HTTP server breathe
        if tally.calls % 64 == 0 {
            tokio::task::yield_now().await;
        }
    }

    tally
}
