use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Value type of a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureKind {
    Int64,
    Float64,
}

/// Immutable description shared by a measure handle and its measurements.
#[derive(Debug, PartialEq, Eq)]
pub struct MeasureDesc {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub kind: MeasureKind,
}

/// A measure of type i64. Obtain one from
/// [`Registry::new_measure_int64`](crate::Registry::new_measure_int64).
#[derive(Debug, Clone)]
pub struct MeasureInt64 {
    desc: Arc<MeasureDesc>,
}

/// A measure of type f64.
#[derive(Debug, Clone)]
pub struct MeasureFloat64 {
    desc: Arc<MeasureDesc>,
}

impl MeasureInt64 {
    pub(crate) fn new(desc: Arc<MeasureDesc>) -> Self {
        Self { desc }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn unit(&self) -> &str {
        &self.desc.unit
    }

    pub fn description(&self) -> &str {
        &self.desc.description
    }

    /// Creates a measurement of `v` against this measure.
    pub fn m(&self, v: i64) -> Measurement {
        Measurement {
            desc: Arc::clone(&self.desc),
            value: MeasurementValue::Int64(v),
        }
    }
}

impl MeasureFloat64 {
    pub(crate) fn new(desc: Arc<MeasureDesc>) -> Self {
        Self { desc }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn unit(&self) -> &str {
        &self.desc.unit
    }

    pub fn description(&self) -> &str {
        &self.desc.description
    }

    pub fn m(&self, v: f64) -> Measurement {
        Measurement {
            desc: Arc::clone(&self.desc),
            value: MeasurementValue::Float64(v),
        }
    }
}

/// Either flavour of measure, used where the value type does not matter.
#[derive(Debug, Clone)]
pub enum Measure {
    Int64(MeasureInt64),
    Float64(MeasureFloat64),
}

impl Measure {
    pub(crate) fn from_desc(desc: Arc<MeasureDesc>) -> Self {
        match desc.kind {
            MeasureKind::Int64 => Measure::Int64(MeasureInt64::new(desc)),
            MeasureKind::Float64 => Measure::Float64(MeasureFloat64::new(desc)),
        }
    }

    pub(crate) fn desc(&self) -> &Arc<MeasureDesc> {
        match self {
            Measure::Int64(m) => &m.desc,
            Measure::Float64(m) => &m.desc,
        }
    }

    pub fn name(&self) -> &str {
        &self.desc().name
    }

    pub fn unit(&self) -> &str {
        &self.desc().unit
    }

    pub fn kind(&self) -> MeasureKind {
        self.desc().kind
    }
}

impl From<&MeasureInt64> for Measure {
    fn from(m: &MeasureInt64) -> Self {
        Measure::Int64(m.clone())
    }
}

impl From<&MeasureFloat64> for Measure {
    fn from(m: &MeasureFloat64) -> Self {
        Measure::Float64(m.clone())
    }
}

// ─── Measurement ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementValue {
    Int64(i64),
    Float64(f64),
}

impl MeasurementValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            MeasurementValue::Int64(v) => v as f64,
            MeasurementValue::Float64(v) => v,
        }
    }
}

impl fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementValue::Int64(v) => write!(f, "{v}"),
            MeasurementValue::Float64(v) => write!(f, "{v}"),
        }
    }
}

/// One observed value tied to its measure. Immutable once created.
#[derive(Debug, Clone)]
pub struct Measurement {
    desc: Arc<MeasureDesc>,
    value: MeasurementValue,
}

impl Measurement {
    pub fn measure_name(&self) -> &str {
        &self.desc.name
    }

    pub(crate) fn desc(&self) -> &Arc<MeasureDesc> {
        &self.desc
    }

    pub fn value(&self) -> MeasurementValue {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(kind: MeasureKind) -> Arc<MeasureDesc> {
        Arc::new(MeasureDesc {
            name: "rpc.latency".into(),
            description: "latency".into(),
            unit: "ms".into(),
            kind,
        })
    }

    #[test]
    fn measurements_carry_measure_and_value() {
        let m = MeasureInt64::new(desc(MeasureKind::Int64));
        let x = m.m(7);
        assert_eq!(x.measure_name(), "rpc.latency");
        assert_eq!(x.value(), MeasurementValue::Int64(7));
        assert_eq!(x.value().as_f64(), 7.0);
    }

    #[test]
    fn measure_enum_follows_desc_kind() {
        let m = Measure::from_desc(desc(MeasureKind::Float64));
        assert!(matches!(m, Measure::Float64(_)));
        assert_eq!(m.kind(), MeasureKind::Float64);
        assert_eq!(m.unit(), "ms");
    }
}
