use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::{Result, StatsError};

// ─── Declarations ────────────────────────────────────────────────

/// Strictly ascending, finite bucket boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds(Arc<[f64]>);

impl Bounds {
    pub fn new(bounds: Vec<f64>) -> Result<Self> {
        if let Some(bad) = bounds.iter().find(|b| !b.is_finite()) {
            return Err(StatsError::InvalidAggregation(format!(
                "bucket boundary {bad} is not finite"
            )));
        }
        if let Some(pair) = bounds.windows(2).find(|w| w[0] >= w[1]) {
            return Err(StatsError::InvalidAggregation(format!(
                "bucket boundaries must be strictly ascending, got {} then {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self(bounds.into()))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Number of buckets these boundaries produce.
    pub fn bucket_count(&self) -> usize {
        self.0.len().max(1)
    }

    /// Bucket `i` holds values in `(b[i-1], b[i]]`; bucket 0 is open below
    /// and the last bucket is open above.
    pub fn bucket_for(&self, v: f64) -> usize {
        self.0
            .partition_point(|b| *b < v)
            .min(self.bucket_count() - 1)
    }
}

/// Which statistic a view keeps.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Number of recorded values.
    Count,
    /// Bucketed histogram with count, sum, mean, min, max and variance.
    Distribution(Bounds),
}

impl Aggregation {
    pub fn count() -> Self {
        Aggregation::Count
    }

    pub fn distribution(bounds: Vec<f64>) -> Result<Self> {
        Ok(Aggregation::Distribution(Bounds::new(bounds)?))
    }

    /// A zero-valued accumulator; the template cloned for every new tag
    /// subset and subbucket.
    pub fn new_data(&self) -> AggregationData {
        match self {
            Aggregation::Count => AggregationData::Count(CountData::default()),
            Aggregation::Distribution(bounds) => {
                AggregationData::Distribution(DistributionData::new(bounds.clone()))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Distribution(_) => "distribution",
        }
    }
}

// ─── Accumulators ────────────────────────────────────────────────

/// Live accumulator state. Cloning yields an independent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AggregationData {
    Count(CountData),
    Distribution(DistributionData),
}

impl AggregationData {
    pub fn add(&mut self, v: f64) {
        self.add_weighted(v, 1);
    }

    pub fn add_weighted(&mut self, v: f64, weight: u64) {
        match self {
            AggregationData::Count(c) => c.add(weight),
            AggregationData::Distribution(d) => d.add_weighted(v, weight),
        }
    }

    /// Folds `other` into `self`. Mismatched variants are ignored; a view
    /// only ever merges data built from its own template.
    pub fn merge(&mut self, other: &AggregationData) {
        match (self, other) {
            (AggregationData::Count(a), AggregationData::Count(b)) => a.merge(b),
            (AggregationData::Distribution(a), AggregationData::Distribution(b)) => a.merge(b),
            _ => debug_assert!(false, "merging mismatched aggregation data"),
        }
    }

    /// Resets to zero while keeping parameters.
    pub fn clear(&mut self) {
        match self {
            AggregationData::Count(c) => *c = CountData::default(),
            AggregationData::Distribution(d) => *d = DistributionData::new(d.bounds.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AggregationData::Count(c) => c.value == 0,
            AggregationData::Distribution(d) => d.count == 0,
        }
    }

    pub fn as_count(&self) -> Option<&CountData> {
        match self {
            AggregationData::Count(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_distribution(&self) -> Option<&DistributionData> {
        match self {
            AggregationData::Distribution(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountData {
    pub value: u64,
}

impl CountData {
    fn add(&mut self, weight: u64) {
        self.value = self.value.saturating_add(weight);
    }

    fn merge(&mut self, other: &CountData) {
        self.value = self.value.saturating_add(other.value);
    }
}

/// Histogram plus running moments.
///
/// `sum_of_squared_dev` is maintained with Welford's update on `add` and
/// Chan's pairwise combination on `merge`; raw samples are never kept.
/// Non-finite values are skipped and counts saturate at `u64::MAX`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionData {
    bounds: Bounds,
    counts_per_bucket: Vec<u64>,
    count: u64,
    sum: f64,
    mean: f64,
    sum_of_squared_dev: f64,
    min: f64,
    max: f64,
}

impl DistributionData {
    fn new(bounds: Bounds) -> Self {
        let buckets = bounds.bucket_count();
        Self {
            bounds,
            counts_per_bucket: vec![0; buckets],
            count: 0,
            sum: 0.0,
            mean: 0.0,
            sum_of_squared_dev: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn add_weighted(&mut self, v: f64, weight: u64) {
        // NaN and infinities would turn mean and variance into NaN for good
        if !v.is_finite() || weight == 0 {
            return;
        }

        let bucket = &mut self.counts_per_bucket[self.bounds.bucket_for(v)];
        *bucket = bucket.saturating_add(weight);

        let w = weight as f64;
        self.count = self.count.saturating_add(weight);
        self.sum += v * w;
        let delta = v - self.mean;
        self.mean += delta * w / self.count as f64;
        self.sum_of_squared_dev += w * delta * (v - self.mean);
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    fn merge(&mut self, other: &DistributionData) {
        debug_assert_eq!(self.bounds, other.bounds);
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }

        for (mine, theirs) in self.counts_per_bucket.iter_mut().zip(&other.counts_per_bucket) {
            *mine = mine.saturating_add(*theirs);
        }

        let (na, nb) = (self.count as f64, other.count as f64);
        let n = na + nb;
        let delta = other.mean - self.mean;
        self.sum_of_squared_dev += other.sum_of_squared_dev + delta * delta * na * nb / n;
        self.mean += delta * nb / n;
        self.count = self.count.saturating_add(other.count);
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn bounds(&self) -> &[f64] {
        self.bounds.as_slice()
    }

    pub fn counts_per_bucket(&self) -> &[u64] {
        &self.counts_per_bucket
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sum_of_squared_dev(&self) -> f64 {
        self.sum_of_squared_dev
    }

    /// Sample variance; zero until two values have been seen.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.sum_of_squared_dev / (self.count - 1) as f64
        }
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }
}

impl Serialize for DistributionData {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DistributionData", 8)?;
        s.serialize_field("bounds", self.bounds())?;
        s.serialize_field("counts_per_bucket", &self.counts_per_bucket)?;
        s.serialize_field("count", &self.count)?;
        s.serialize_field("sum", &self.sum)?;
        s.serialize_field("mean", &self.mean)?;
        s.serialize_field("sum_of_squared_dev", &self.sum_of_squared_dev)?;
        s.serialize_field("min", &self.min())?;
        s.serialize_field("max", &self.max())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RPC_COUNT_BOUNDS: [f64; 18] = [
        0.0, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0,
        8192.0, 16384.0, 32768.0, 65536.0,
    ];

    fn dist(bounds: &[f64]) -> AggregationData {
        Aggregation::distribution(bounds.to_vec()).unwrap().new_data()
    }

    #[test]
    fn distribution_buckets_and_extremes() {
        let mut d = dist(&RPC_COUNT_BOUNDS);
        for v in [0.0, 1.0, 1.5, 5.0, 70000.0] {
            d.add(v);
        }
        let d = d.as_distribution().unwrap();
        assert_eq!(
            d.counts_per_bucket(),
            &[1, 1, 1, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]
        );
        assert_eq!(d.count(), 5);
        assert_eq!(d.min(), Some(0.0));
        assert_eq!(d.max(), Some(70000.0));
        assert!((d.sum() - 70007.5).abs() < 1e-9);
    }

    #[test]
    fn welford_matches_two_pass_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut d = dist(&[5.0]);
        for v in values {
            d.add(v);
        }
        let d = d.as_distribution().unwrap();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let ssd: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        assert!((d.mean() - 5.0).abs() < 1e-12);
        assert!((d.sum_of_squared_dev() - ssd).abs() < 1e-9);
    }

    #[test]
    fn weighted_add_equals_repeated_add() {
        let mut a = dist(&[1.0, 10.0]);
        let mut b = a.clone();
        a.add_weighted(3.0, 4);
        a.add(8.0);
        for _ in 0..4 {
            b.add(3.0);
        }
        b.add(8.0);
        let (a, b) = (a.as_distribution().unwrap(), b.as_distribution().unwrap());
        assert_eq!(a.counts_per_bucket(), b.counts_per_bucket());
        assert!((a.sum_of_squared_dev() - b.sum_of_squared_dev()).abs() < 1e-9);
    }

    #[test]
    fn chan_merge_equals_sequential() {
        let left = [1.0, 2.0, 3.0, 1000.0];
        let right = [0.5, 0.25, 77.0];

        let mut whole = dist(&[1.0, 100.0]);
        let mut a = whole.clone();
        let mut b = whole.clone();
        for v in left {
            a.add(v);
            whole.add(v);
        }
        for v in right {
            b.add(v);
            whole.add(v);
        }
        a.merge(&b);

        let (m, w) = (a.as_distribution().unwrap(), whole.as_distribution().unwrap());
        assert_eq!(m.count(), w.count());
        assert_eq!(m.counts_per_bucket(), w.counts_per_bucket());
        assert!((m.mean() - w.mean()).abs() < 1e-9);
        assert!((m.sum_of_squared_dev() - w.sum_of_squared_dev()).abs() < 1e-6);
        assert_eq!(m.min(), Some(0.25));
        assert_eq!(m.max(), Some(1000.0));
    }

    #[test]
    fn merge_into_empty_and_from_empty() {
        let mut empty = dist(&[1.0]);
        let mut full = empty.clone();
        full.add(3.0);
        full.merge(&empty.clone());
        assert_eq!(full.as_distribution().unwrap().count(), 1);
        empty.merge(&full);
        assert_eq!(empty, full);
    }

    #[test]
    fn non_finite_values_are_skipped() {
        let mut d = dist(&[1.0]);
        d.add(f64::INFINITY);
        d.add(f64::NEG_INFINITY);
        d.add(f64::NAN);
        d.add(2.0);
        let d = d.as_distribution().unwrap();
        assert_eq!(d.count(), 1);
        assert_eq!(d.mean(), 2.0);
        assert_eq!(d.sum_of_squared_dev(), 0.0);
        assert_eq!(d.max(), Some(2.0));
    }

    #[test]
    fn distribution_counts_saturate() {
        let mut d = dist(&[1.0]);
        d.add_weighted(0.5, u64::MAX);
        d.add(0.5);
        let mut other = d.clone();
        other.merge(&d);
        for data in [&d, &other] {
            let d = data.as_distribution().unwrap();
            assert_eq!(d.count(), u64::MAX);
            assert_eq!(d.counts_per_bucket(), &[u64::MAX]);
            assert!(d.mean().is_finite());
        }
    }

    #[test]
    fn count_ignores_value() {
        let mut c = Aggregation::count().new_data();
        c.add(-3.0);
        c.add_weighted(100.0, 2);
        assert_eq!(c.as_count().unwrap().value, 3);
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn rejects_bad_bounds() {
        assert!(matches!(
            Aggregation::distribution(vec![1.0, 1.0]),
            Err(StatsError::InvalidAggregation(_))
        ));
        assert!(Aggregation::distribution(vec![0.0, f64::NAN]).is_err());
        assert!(Aggregation::distribution(vec![]).is_ok());
    }

    #[test]
    fn empty_distribution_serializes_without_extremes() {
        let d = dist(&[1.0]);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["type"], "distribution");
        assert!(json["min"].is_null());
        assert_eq!(json["counts_per_bucket"], serde_json::json!([0]));
    }
}
