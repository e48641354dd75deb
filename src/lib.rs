//! In-process statistics collection.
//!
//! Application code declares **measures**, records **measurements** against
//! them together with a [`TagMap`] of context, and registers **views** that
//! aggregate matching measurements into counts or distributions, either
//! cumulatively or over a sliding time window. Snapshots ([`ViewData`]) are
//! pulled on demand or pushed periodically onto a bounded export channel.
//!
//! ```no_run
//! use viewstats::{Aggregation, Registry, TagMap, View, Window};
//!
//! # fn main() -> viewstats::Result<()> {
//! let registry = Registry::new();
//! let method = registry.new_string_key("method")?;
//! let latency = registry.new_measure_float64("latency", "request latency", "ms")?;
//! registry.register_view(View::new(
//!     "latency_by_method",
//!     "",
//!     &latency,
//!     Aggregation::distribution(vec![0.0, 10.0, 100.0])?,
//!     Window::cumulative(),
//!     vec![method.clone()],
//! ))?;
//!
//! let mut tags = TagMap::with_capacity(1);
//! tags.upsert(method.clone(), method.encode_str("GET"));
//! registry.record(&tags, &[latency.m(4.2)]);
//!
//! let snapshot = registry.retrieve_data("latency_by_method")?;
//! # let _ = snapshot;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod rpc;
pub mod stats;
pub mod tags;

pub use config::StatsConfig;
pub use error::{Result, StatsError};
pub use stats::{
    Aggregation, AggregationData, Measure, MeasureFloat64, MeasureInt64, Measurement, Registry,
    View, ViewData, Window,
};
pub use tags::{Key, KeyRegistry, Mutation, Tag, TagMap};
