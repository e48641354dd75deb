use thiserror::Error;

/// Errors surfaced by setup-time operations (keys, measures, views).
///
/// Recording never fails: a measurement for a measure without views is
/// silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    #[error("tag key {name:?} already exists with type {existing}, requested {requested}")]
    DuplicateKeyMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("unknown measure {name:?}")]
    UnknownMeasure { name: String },

    #[error("measure {name:?} already exists with a different declaration")]
    MeasureMismatch { name: String },

    #[error("measure {name:?} is still referenced by {views} view(s)")]
    MeasureInUse { name: String, views: usize },

    #[error("view {name:?} is already registered")]
    DuplicateView { name: String },

    #[error("view {name:?} not found")]
    ViewNotFound { name: String },

    #[error("invalid aggregation: {0}")]
    InvalidAggregation(String),

    #[error("invalid window: {0}")]
    InvalidWindow(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, StatsError>;
