//! Export channel, reporter and RPC defaults wired together.

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use viewstats::export::{self, Reporter};
use viewstats::rpc::{RpcStats, Side, STATUS_OK};
use viewstats::{Aggregation, Registry, TagMap, View, Window};

fn registry_with_counter(name: &str) -> (Arc<Registry>, viewstats::MeasureInt64) {
    let reg = Arc::new(Registry::new());
    let m = reg.new_measure_int64("events", "", "1").unwrap();
    reg.register_view(View::new(
        name,
        "",
        &m,
        Aggregation::count(),
        Window::cumulative(),
        vec![],
    ))
    .unwrap();
    (reg, m)
}

// =============================================================================
// Export channel
// =============================================================================

#[tokio::test]
async fn test_slow_consumer_sees_newest_snapshots() {
    let (reg, m) = registry_with_counter("events_total");
    let (tx, mut rx) = export::channel(4);

    for _ in 0..10 {
        reg.record(&TagMap::new(), &[m.m(1)]);
        tx.send(reg.retrieve_data("events_total").unwrap());
    }

    let mut seen = Vec::new();
    while let Some(data) = rx.try_recv() {
        seen.push(data.rows[0].data.as_count().unwrap().value);
    }
    assert_eq!(seen, vec![7, 8, 9, 10]);
    assert_eq!(rx.dropped(), 6);
}

#[tokio::test]
async fn test_stream_ends_when_senders_drop() {
    let (reg, _) = registry_with_counter("events_total");
    let (tx, rx) = export::channel(8);
    tx.send(reg.retrieve_data("events_total").unwrap());
    tx.send(reg.retrieve_data("events_total").unwrap());
    drop(tx);

    let got: Vec<_> = rx.into_stream().collect().await;
    assert_eq!(got.len(), 2);
}

// =============================================================================
// Reporter
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reporter_exports_only_subscribed_views() {
    let (reg, m) = registry_with_counter("events_total");
    reg.register_view(View::new(
        "events_quiet",
        "",
        &m,
        Aggregation::count(),
        Window::cumulative(),
        vec![],
    ))
    .unwrap();
    reg.subscribe("events_total").unwrap();
    reg.record(&TagMap::new(), &[m.m(1)]);

    let (tx, mut rx) = export::channel(16);
    let reporter = Reporter::spawn(Arc::clone(&reg), tx, Duration::from_secs(5));

    for _ in 0..3 {
        let data = rx.recv().await.unwrap();
        assert_eq!(data.view, "events_total");
    }

    reg.unsubscribe("events_total").unwrap();
    reporter.force_collect("events_quiet").unwrap();
    assert_eq!(rx.recv().await.unwrap().view, "events_quiet");

    reporter.shutdown().await;
    assert!(rx.recv().await.is_none());
}

// =============================================================================
// RPC defaults
// =============================================================================

#[test]
fn test_server_calls_feed_default_views() {
    let reg = Arc::new(Registry::new());
    let rpc = Arc::new(RpcStats::register(Arc::clone(&reg), Side::Server, 6).unwrap());
    assert_eq!(rpc.views().len(), 9);

    let mut ok = rpc.start_call("users", "Get");
    ok.on_request(100);
    ok.on_response(2_000);
    ok.finish_with_latency(STATUS_OK, 3.0);

    let failed = rpc.start_call("users", "Get");
    failed.finish_with_latency("UNAVAILABLE", 40.0);

    let latency = reg.retrieve_data("rpc.server/latency/cumulative").unwrap();
    assert_eq!(latency.rows.len(), 1);
    let dist = latency.rows[0].data.as_distribution().unwrap();
    assert_eq!(dist.count(), 2);
    assert_eq!(dist.max(), Some(40.0));

    let completed = reg.retrieve_data("rpc.server/completed/hour").unwrap();
    assert_eq!(completed.rows.len(), 2);

    let errors = reg.retrieve_data("rpc.server/error_count/cumulative").unwrap();
    let total: u64 = errors
        .rows
        .iter()
        .map(|r| r.data.as_count().map_or(0, |c| c.value))
        .sum();
    assert_eq!(total, 1);
}
