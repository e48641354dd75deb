use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, StatsError};
use crate::export::MAX_EXPORT_CAPACITY;
use crate::stats::DEFAULT_SUBBUCKETS;

/// Tunables for the export side of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatsConfig {
    /// Snapshots the export channel holds before dropping the oldest
    #[serde(default = "default_export_capacity")]
    pub export_capacity: usize,

    /// How often subscribed views are exported (milliseconds)
    #[serde(default = "default_reporting_period_ms")]
    pub reporting_period_ms: u64,

    /// Subbuckets per sliding window when a view does not say otherwise
    #[serde(default = "default_subbuckets")]
    pub subbuckets: usize,
}

fn default_export_capacity() -> usize {
    64
}
fn default_reporting_period_ms() -> u64 {
    10_000
}
fn default_subbuckets() -> usize {
    DEFAULT_SUBBUCKETS
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            export_capacity: default_export_capacity(),
            reporting_period_ms: default_reporting_period_ms(),
            subbuckets: default_subbuckets(),
        }
    }
}

impl StatsConfig {
    /// Defaults overlaid with `VIEWSTATS_EXPORT_CAPACITY`,
    /// `VIEWSTATS_REPORTING_PERIOD_MS` and `VIEWSTATS_SUBBUCKETS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("VIEWSTATS_EXPORT_CAPACITY") {
            config.export_capacity = parse("VIEWSTATS_EXPORT_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("VIEWSTATS_REPORTING_PERIOD_MS") {
            config.reporting_period_ms = parse("VIEWSTATS_REPORTING_PERIOD_MS", &v)?;
        }
        if let Some(v) = lookup("VIEWSTATS_SUBBUCKETS") {
            config.subbuckets = parse("VIEWSTATS_SUBBUCKETS", &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.export_capacity == 0 {
            return Err(StatsError::Configuration(
                "export_capacity must be at least 1".into(),
            ));
        }
        if self.export_capacity > MAX_EXPORT_CAPACITY {
            return Err(StatsError::Configuration(format!(
                "export_capacity must be at most {MAX_EXPORT_CAPACITY}"
            )));
        }
        if self.reporting_period_ms == 0 {
            return Err(StatsError::Configuration(
                "reporting_period_ms must be at least 1".into(),
            ));
        }
        if self.subbuckets == 0 {
            return Err(StatsError::Configuration(
                "subbuckets must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn reporting_period(&self) -> Duration {
        Duration::from_millis(self.reporting_period_ms)
    }
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| StatsError::Configuration(format!("{name}: cannot parse {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn serde_fills_missing_fields() {
        let config: StatsConfig = serde_json::from_str(r#"{"export_capacity": 8}"#).unwrap();
        assert_eq!(config.export_capacity, 8);
        assert_eq!(config.reporting_period(), Duration::from_secs(10));
        assert_eq!(config.subbuckets, 6);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("VIEWSTATS_EXPORT_CAPACITY", "128"),
            ("VIEWSTATS_SUBBUCKETS", " 12 "),
        ]
        .into_iter()
        .collect();
        let config = StatsConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.export_capacity, 128);
        assert_eq!(config.subbuckets, 12);
        assert_eq!(config.reporting_period_ms, 10_000);
    }

    #[test]
    fn rejects_garbage_and_zero() {
        let bad = StatsConfig::from_lookup(|k| {
            (k == "VIEWSTATS_REPORTING_PERIOD_MS").then(|| "soon".to_string())
        });
        assert!(matches!(bad, Err(StatsError::Configuration(_))));

        let zero = StatsConfig::from_lookup(|k| {
            (k == "VIEWSTATS_SUBBUCKETS").then(|| "0".to_string())
        });
        assert!(zero.is_err());
    }

    #[test]
    fn rejects_oversized_export_capacity() {
        let huge = (usize::MAX / 2 + 1).to_string();
        let bad = StatsConfig::from_lookup(|k| {
            (k == "VIEWSTATS_EXPORT_CAPACITY").then(|| huge.clone())
        });
        assert!(matches!(bad, Err(StatsError::Configuration(_))));

        let edge = MAX_EXPORT_CAPACITY.to_string();
        let ok = StatsConfig::from_lookup(|k| {
            (k == "VIEWSTATS_EXPORT_CAPACITY").then(|| edge.clone())
        })
        .unwrap();
        assert_eq!(ok.export_capacity, MAX_EXPORT_CAPACITY);
    }
}
