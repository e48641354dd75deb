use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use viewstats::export::{self, ExportReceiver, Reporter};
use viewstats::rpc::{RpcStats, Side};
use viewstats::{Registry, StatsConfig, ViewData};

mod handlers;
mod load_generator;
mod middleware;
mod percentiles;
mod server;

/// How many exported snapshots the demo keeps for `/api/exports`.
const MAX_RECENT_EXPORTS: usize = 200;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Keys, measures and views for the whole process.
    pub registry: Arc<Registry>,

    /// Server-side RPC views, fed by the timing middleware.
    pub server_rpc: Arc<RpcStats>,

    /// Client-side RPC views, fed by the load generator.
    pub client_rpc: Arc<RpcStats>,

    /// Most recent snapshots drained from the export channel.
    pub recent_exports: Mutex<VecDeque<Arc<ViewData>>>,

    /// Periodic exporter; also serves force-collect requests.
    pub reporter: Reporter,

    /// Flag checked by every load-generator worker on each iteration.
    pub load_running: Arc<AtomicBool>,

    /// Handle to the spawned load-generator task so we can await clean shutdown.
    pub load_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,

    /// Recording-cost summary of the last finished load run.
    pub last_load: Mutex<Option<load_generator::LoadReport>>,
}

/// Demo-only settings layered over [`StatsConfig`].
struct DemoConfig {
    addr: SocketAddr,
    log_format: String,
}

impl DemoConfig {
    fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let addr = std::env::var("VIEWSTATS_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()?;
        let log_format =
            std::env::var("VIEWSTATS_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
        Ok(Self { addr, log_format })
    }
}

fn init_logging(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        _ => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
    }
    Ok(())
}

/// Drains the export channel into the bounded recent-exports buffer.
async fn drain_exports(state: Arc<AppState>, mut rx: ExportReceiver) {
    while let Some(data) = rx.recv().await {
        tracing::debug!(view = %data.view, rows = data.rows.len(), "exported view");
        let mut recent = state.recent_exports.lock();
        recent.push_back(data);
        if recent.len() > MAX_RECENT_EXPORTS {
            recent.pop_front();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let demo = DemoConfig::from_env()?;
    init_logging(&demo.log_format)?;
    let config = StatsConfig::from_env()?;

    // ── 1. Registry and default RPC views ───────────────────────
    let registry = Arc::new(Registry::new());
    let server_rpc = Arc::new(RpcStats::register(
        Arc::clone(&registry),
        Side::Server,
        config.subbuckets,
    )?);
    let client_rpc = Arc::new(RpcStats::register(
        Arc::clone(&registry),
        Side::Client,
        config.subbuckets,
    )?);
    for view in server_rpc.views() {
        registry.subscribe(view)?;
    }

    // ── 2. Export channel + periodic reporter ───────────────────
    let (tx, rx) = export::channel(config.export_capacity);
    let reporter = Reporter::spawn(Arc::clone(&registry), tx, config.reporting_period());

    // ── 3. Build shared state ───────────────────────────────────
    let state = Arc::new(AppState {
        registry,
        server_rpc,
        client_rpc,
        recent_exports: Mutex::new(VecDeque::with_capacity(MAX_RECENT_EXPORTS + 1)),
        reporter,
        load_running: Arc::new(AtomicBool::new(false)),
        load_handle: tokio::sync::Mutex::new(None),
        last_load: Mutex::new(None),
    });
    tokio::spawn(drain_exports(Arc::clone(&state), rx));

    // ── 4. Build Axum router ────────────────────────────────────
    let app = server::create_router(state);

    // ── 5. Bind & serve ─────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(demo.addr).await?;
    tracing::info!(addr = %demo.addr, "viewstats demo listening");
    tracing::info!("views  → http://{}/api/views", demo.addr);
    tracing::info!("stream → http://{}/api/stream", demo.addr);

    axum::serve(listener, app).await?;
    Ok(())
}
