//! Well-known keys, measures and views for request/response instrumentation.
//!
//! An RPC or HTTP layer registers these once per side with
//! [`RpcStats::register`] and then drives a [`CallTracker`] per call.

mod tracker;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::stats::{Aggregation, Measure, MeasureFloat64, MeasureInt64, Registry, View, Window};
use crate::tags::Key;

pub use tracker::CallTracker;

pub const KEY_SERVICE: &str = "rpc.service";
pub const KEY_METHOD: &str = "rpc.method";
pub const KEY_STATUS: &str = "rpc.status";

/// Status recorded for calls that succeeded.
pub const STATUS_OK: &str = "OK";

const UNIT_BYTES: &str = "By";
const UNIT_COUNT: &str = "1";
const UNIT_MILLIS: &str = "ms";

pub const BYTES_BOUNDS: &[f64] = &[
    0.0, 1024.0, 2048.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0,
    16777216.0, 67108864.0, 268435456.0, 1073741824.0, 4294967296.0,
];

pub const MILLIS_BOUNDS: &[f64] = &[
    0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0, 13.0, 16.0, 20.0, 25.0, 30.0, 40.0, 50.0,
    65.0, 80.0, 100.0, 130.0, 160.0, 200.0, 250.0, 300.0, 400.0, 500.0, 650.0, 800.0, 1000.0,
    2000.0, 5000.0, 10000.0, 20000.0, 50000.0, 100000.0,
];

pub const COUNT_BOUNDS: &[f64] = &[
    0.0, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0,
    8192.0, 16384.0, 32768.0, 65536.0,
];

/// Which end of a call is being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn prefix(&self) -> &'static str {
        match self {
            Side::Client => "rpc.client",
            Side::Server => "rpc.server",
        }
    }
}

/// The three keys every RPC measurement is tagged with.
#[derive(Debug, Clone)]
pub struct RpcKeys {
    pub service: Key,
    pub method: Key,
    pub status: Key,
}

impl RpcKeys {
    /// Creates or looks up the keys. Safe to call from either side, in
    /// any order.
    pub fn register(registry: &Registry) -> Result<Self> {
        Ok(Self {
            service: registry.new_string_key(KEY_SERVICE)?,
            method: registry.new_string_key(KEY_METHOD)?,
            status: registry.new_string_key(KEY_STATUS)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RpcMeasures {
    pub latency: MeasureFloat64,
    pub request_count: MeasureInt64,
    pub response_count: MeasureInt64,
    pub request_bytes: MeasureInt64,
    pub response_bytes: MeasureInt64,
    pub error_count: MeasureInt64,
}

impl RpcMeasures {
    fn register(registry: &Registry, side: Side) -> Result<Self> {
        let p = side.prefix();
        Ok(Self {
            latency: registry.new_measure_float64(
                &format!("{p}.latency"),
                "Time between first byte of request and last byte of response",
                UNIT_MILLIS,
            )?,
            request_count: registry.new_measure_int64(
                &format!("{p}.request_count"),
                "Request messages per call",
                UNIT_COUNT,
            )?,
            response_count: registry.new_measure_int64(
                &format!("{p}.response_count"),
                "Response messages per call",
                UNIT_COUNT,
            )?,
            request_bytes: registry.new_measure_int64(
                &format!("{p}.request_bytes"),
                "Request payload bytes per call",
                UNIT_BYTES,
            )?,
            response_bytes: registry.new_measure_int64(
                &format!("{p}.response_bytes"),
                "Response payload bytes per call",
                UNIT_BYTES,
            )?,
            error_count: registry.new_measure_int64(
                &format!("{p}.error_count"),
                "Calls that finished with a non-OK status",
                UNIT_COUNT,
            )?,
        })
    }
}

/// Keys, measures and default views for one side, registered together.
pub struct RpcStats {
    registry: Arc<Registry>,
    side: Side,
    keys: RpcKeys,
    measures: RpcMeasures,
    views: Vec<String>,
}

impl RpcStats {
    /// Registers the default views for `side`. Fails rather than aborting
    /// so the caller decides whether missing instrumentation is fatal.
    pub fn register(registry: Arc<Registry>, side: Side, subbuckets: usize) -> Result<Self> {
        let keys = RpcKeys::register(&registry)?;
        let measures = RpcMeasures::register(&registry, side)?;

        let millis = Aggregation::distribution(MILLIS_BOUNDS.to_vec())?;
        let bytes = Aggregation::distribution(BYTES_BOUNDS.to_vec())?;
        let counts = Aggregation::distribution(COUNT_BOUNDS.to_vec())?;
        let minute = Window::sliding_time(Duration::from_secs(60), subbuckets)?;
        let hour = Window::sliding_time(Duration::from_secs(3600), subbuckets)?;
        let cumulative = Window::cumulative();

        let call_keys = vec![keys.service.clone(), keys.method.clone()];
        let status_keys = vec![
            keys.service.clone(),
            keys.method.clone(),
            keys.status.clone(),
        ];

        let p = side.prefix();
        let m = &measures;
        let specs: Vec<(&str, &str, Measure, Aggregation, Window, &[Key])> = vec![
            (
                "latency/cumulative",
                "Latency by method",
                Measure::from(&m.latency),
                millis.clone(),
                cumulative,
                call_keys.as_slice(),
            ),
            (
                "latency/minute",
                "Latency by method, last minute",
                Measure::from(&m.latency),
                millis.clone(),
                minute,
                call_keys.as_slice(),
            ),
            (
                "latency/hour",
                "Latency by method, last hour",
                Measure::from(&m.latency),
                millis,
                hour,
                call_keys.as_slice(),
            ),
            (
                "completed/hour",
                "Completed calls, last hour",
                Measure::from(&m.latency),
                Aggregation::count(),
                hour,
                status_keys.as_slice(),
            ),
            (
                "error_count/cumulative",
                "Errors by method and status",
                Measure::from(&m.error_count),
                Aggregation::count(),
                cumulative,
                status_keys.as_slice(),
            ),
            (
                "request_count/cumulative",
                "Request messages per call",
                Measure::from(&m.request_count),
                counts.clone(),
                cumulative,
                call_keys.as_slice(),
            ),
            (
                "response_count/cumulative",
                "Response messages per call",
                Measure::from(&m.response_count),
                counts,
                cumulative,
                call_keys.as_slice(),
            ),
            (
                "request_bytes/cumulative",
                "Request bytes per call",
                Measure::from(&m.request_bytes),
                bytes.clone(),
                cumulative,
                call_keys.as_slice(),
            ),
            (
                "response_bytes/cumulative",
                "Response bytes per call",
                Measure::from(&m.response_bytes),
                bytes,
                cumulative,
                call_keys.as_slice(),
            ),
        ];

        let mut names = Vec::with_capacity(specs.len());
        for (suffix, description, measure, aggregation, window, view_keys) in specs {
            let view = View::new(
                format!("{p}/{suffix}"),
                description,
                measure,
                aggregation,
                window,
                view_keys.to_vec(),
            );
            names.push(view.name().to_owned());
            registry.register_view(view)?;
        }
        tracing::debug!(side = p, views = names.len(), "registered rpc views");

        Ok(Self {
            registry,
            side,
            keys,
            measures,
            views: names,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn keys(&self) -> &RpcKeys {
        &self.keys
    }

    pub fn measures(&self) -> &RpcMeasures {
        &self.measures
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Names of the views this side registered.
    pub fn views(&self) -> &[String] {
        &self.views
    }

    /// Begins tracking one call.
    pub fn start_call(self: &Arc<Self>, service: &str, method: &str) -> CallTracker {
        CallTracker::start(Arc::clone(self), service, method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatsError;

    #[test]
    fn both_sides_share_keys() {
        let reg = Arc::new(Registry::new());
        let server = RpcStats::register(Arc::clone(&reg), Side::Server, 6).unwrap();
        let client = RpcStats::register(Arc::clone(&reg), Side::Client, 6).unwrap();
        assert!(server.keys().method.same_identity(&client.keys().method));
        assert_eq!(reg.view_names().len(), server.views().len() * 2);
        assert_eq!(reg.views_count("rpc.server.latency"), 4);
    }

    #[test]
    fn key_type_conflict_surfaces_as_error() {
        let reg = Arc::new(Registry::new());
        reg.new_int64_key(KEY_METHOD).unwrap();
        let err = RpcStats::register(reg, Side::Server, 6).err().unwrap();
        assert!(matches!(err, StatsError::DuplicateKeyMismatch { .. }));
    }

    #[test]
    fn registering_a_side_twice_fails() {
        let reg = Arc::new(Registry::new());
        RpcStats::register(Arc::clone(&reg), Side::Client, 6).unwrap();
        let err = RpcStats::register(reg, Side::Client, 6).err().unwrap();
        assert!(matches!(err, StatsError::DuplicateView { .. }));
    }
}
