//! Measures, aggregations, windows and views, plus the [`Registry`] that
//! routes recorded measurements into them.

mod aggregation;
mod measure;
mod registry;
mod view;
mod window;

pub use aggregation::{Aggregation, AggregationData, Bounds, CountData, DistributionData};
pub use measure::{
    Measure, MeasureFloat64, MeasureInt64, MeasureKind, Measurement, MeasurementValue,
};
pub use registry::Registry;
pub use view::{Row, TagSubset, View, ViewData};
pub use window::{Window, WindowState, DEFAULT_SUBBUCKETS};
