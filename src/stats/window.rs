use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::aggregation::AggregationData;
use crate::error::{Result, StatsError};

/// Subbucket count used when a sliding window does not name one.
pub const DEFAULT_SUBBUCKETS: usize = 6;

// ─── Declaration ─────────────────────────────────────────────────

/// How long recorded values stay visible in a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Window {
    /// Everything since the view was registered.
    Cumulative,
    /// The trailing `duration`, tracked in `subbuckets` slices.
    SlidingTime { duration: Duration, subbuckets: usize },
}

impl Window {
    pub fn cumulative() -> Self {
        Window::Cumulative
    }

    pub fn sliding_time(duration: Duration, subbuckets: usize) -> Result<Self> {
        if subbuckets == 0 {
            return Err(StatsError::InvalidWindow(
                "sliding window needs at least one subbucket".into(),
            ));
        }
        if duration.as_millis() < subbuckets as u128 {
            return Err(StatsError::InvalidWindow(format!(
                "duration {duration:?} is too short for {subbuckets} subbuckets"
            )));
        }
        Ok(Window::SlidingTime {
            duration,
            subbuckets,
        })
    }

    /// Start of the range a snapshot taken at `now` covers.
    pub fn range_start(&self, created: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Window::Cumulative => created,
            Window::SlidingTime { duration, .. } => chrono::Duration::from_std(*duration)
                .ok()
                .and_then(|d| now.checked_sub_signed(d))
                .unwrap_or(created),
        }
    }
}

// ─── Per-view state ──────────────────────────────────────────────

/// Aggregation state of one view, one slot per distinct tag subset.
///
/// The outer map is only write-locked to add a new subset; recording into
/// existing subsets takes the read lock plus that subset's own mutex, so
/// different subsets never contend.
pub struct WindowState<K> {
    window: Window,
    template: AggregationData,
    slots: RwLock<HashMap<K, Arc<Mutex<Slot>>>>,
}

impl<K> WindowState<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(window: Window, template: AggregationData) -> Self {
        Self {
            window,
            template,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn record_for(&self, key: &K, value: f64, now: DateTime<Utc>) {
        let existing = self.slots.read().get(key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => self
                .slots
                .write()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(self.new_slot(now))))
                .clone(),
        };
        slot.lock().record(value, now);
    }

    /// Snapshot of one subset, or `None` if nothing was ever recorded for it.
    pub fn snapshot_for(&self, key: &K, now: DateTime<Utc>) -> Option<AggregationData> {
        let slot = self.slots.read().get(key).cloned()?;
        let snapshot = slot.lock().snapshot(&self.template, now);
        Some(snapshot)
    }

    /// Snapshots of every subset with data visible at `now`.
    pub fn snapshot_all(&self, now: DateTime<Utc>) -> Vec<(K, AggregationData)> {
        let slots: Vec<(K, Arc<Mutex<Slot>>)> = self
            .slots
            .read()
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();

        slots
            .into_iter()
            .filter_map(|(k, slot)| {
                let data = slot.lock().snapshot(&self.template, now);
                (!data.is_empty()).then_some((k, data))
            })
            .collect()
    }

    pub fn subset_count(&self) -> usize {
        self.slots.read().len()
    }

    fn new_slot(&self, now: DateTime<Utc>) -> Slot {
        match self.window {
            Window::Cumulative => Slot::Cumulative(self.template.clone()),
            Window::SlidingTime {
                duration,
                subbuckets,
            } => Slot::Sliding(SlidingBuckets::new(
                &self.template,
                duration,
                subbuckets,
                now,
            )),
        }
    }
}

enum Slot {
    Cumulative(AggregationData),
    Sliding(SlidingBuckets),
}

impl Slot {
    fn record(&mut self, value: f64, now: DateTime<Utc>) {
        match self {
            Slot::Cumulative(data) => data.add(value),
            Slot::Sliding(ring) => ring.record(value, now),
        }
    }

    fn snapshot(&mut self, template: &AggregationData, now: DateTime<Utc>) -> AggregationData {
        match self {
            Slot::Cumulative(data) => data.clone(),
            Slot::Sliding(ring) => ring.snapshot(template, now),
        }
    }
}

// ─── Sliding ring ────────────────────────────────────────────────

/// `subbuckets + 1` accumulators arranged as a ring.
///
/// Periods are aligned to the Unix epoch: period `p` covers
/// `[p * span, (p + 1) * span)` milliseconds. `head` holds period
/// `head_period`; the slot `k` steps behind it holds `head_period - k`.
struct SlidingBuckets {
    buckets: Vec<AggregationData>,
    head: usize,
    head_period: i64,
    span_ms: i64,
    duration_ms: i64,
}

impl SlidingBuckets {
    fn new(template: &AggregationData, duration: Duration, subbuckets: usize, now: DateTime<Utc>) -> Self {
        let duration_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        // Rounded up so the ring always reaches back a full duration
        let n = subbuckets as i64;
        let span_ms = (duration_ms.saturating_add(n - 1) / n).max(1);
        Self {
            buckets: vec![template.clone(); subbuckets + 1],
            head: 0,
            head_period: now.timestamp_millis().div_euclid(span_ms),
            span_ms,
            duration_ms,
        }
    }

    fn record(&mut self, value: f64, now: DateTime<Utc>) {
        self.advance(now);
        // A clock that stepped backwards lands in the head, never in the past
        self.buckets[self.head].add(value);
    }

    /// Rotates the ring forward to the period containing `now`.
    ///
    /// At most `buckets.len()` slots are cleared no matter how long the
    /// gap; anything older than the whole ring is reset in one pass.
    fn advance(&mut self, now: DateTime<Utc>) {
        let period = now.timestamp_millis().div_euclid(self.span_ms);
        if period <= self.head_period {
            return;
        }

        let ring = self.buckets.len();
        let steps = period - self.head_period;
        if steps >= ring as i64 {
            self.buckets.iter_mut().for_each(AggregationData::clear);
            self.head = 0;
        } else {
            for _ in 0..steps {
                self.head = (self.head + 1) % ring;
                self.buckets[self.head].clear();
            }
        }
        self.head_period = period;
    }

    /// Merge of every subbucket overlapping `[now - duration, now]`.
    fn snapshot(&mut self, template: &AggregationData, now: DateTime<Utc>) -> AggregationData {
        self.advance(now);

        let now_ms = now.timestamp_millis();
        let window_start = now_ms.saturating_sub(self.duration_ms);
        let ring = self.buckets.len();

        let mut merged = template.clone();
        for back in 0..ring {
            let period = self.head_period - back as i64;
            let start = period.saturating_mul(self.span_ms);
            let end = start.saturating_add(self.span_ms);
            if end > window_start && start <= now_ms {
                let idx = (self.head + ring - back) % ring;
                merged.merge(&self.buckets[idx]);
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Aggregation;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn count(data: &AggregationData) -> u64 {
        data.as_count().unwrap().value
    }

    fn sliding(duration_secs: u64, subbuckets: usize) -> WindowState<&'static str> {
        let window = Window::sliding_time(Duration::from_secs(duration_secs), subbuckets).unwrap();
        WindowState::new(window, Aggregation::count().new_data())
    }

    // 10-minute aligned instant
    const T0: i64 = 1_700_000_400;

    #[test]
    fn cumulative_never_expires() {
        let w = WindowState::new(Window::cumulative(), Aggregation::count().new_data());
        w.record_for(&"a", 1.0, at(T0));
        w.record_for(&"a", 1.0, at(T0 + 86_400 * 365));
        w.record_for(&"b", 1.0, at(T0));
        assert_eq!(count(&w.snapshot_for(&"a", at(T0 + 86_400 * 900)).unwrap()), 2);
        assert_eq!(w.snapshot_all(at(T0)).len(), 2);
        assert!(w.snapshot_for(&"missing", at(T0)).is_none());
    }

    #[test]
    fn sliding_hour_keeps_trailing_sixty_minutes() {
        let w = sliding(3600, 6);
        for i in 0..18 {
            w.record_for(&"k", 1.0, at(T0 + i * 300));
        }
        let snap = w.snapshot_for(&"k", at(T0 + 90 * 60)).unwrap();
        assert_eq!(count(&snap), 12);
    }

    #[test]
    fn partially_covered_subbucket_is_included() {
        let w = sliding(3600, 6);
        for i in 0..18 {
            w.record_for(&"k", 1.0, at(T0 + i * 300));
        }
        // Window [T0+25m, T0+85m] still touches the T0+20m subbucket
        let snap = w.snapshot_for(&"k", at(T0 + 85 * 60)).unwrap();
        assert_eq!(count(&snap), 14);
    }

    #[test]
    fn uneven_span_still_covers_full_duration() {
        // 65 s over 6 subbuckets does not divide evenly into milliseconds
        let w = sliding(65, 6);
        let span_ms = 10_834;
        let now = DateTime::from_timestamp_millis(157_000_000 * span_ms).unwrap();
        let oldest = now - chrono::Duration::milliseconds(64_999);
        w.record_for(&"k", 1.0, oldest);
        assert_eq!(count(&w.snapshot_for(&"k", now).unwrap()), 1);
    }

    #[test]
    fn long_gap_resets_everything() {
        let w = sliding(60, 6);
        for i in 0..10 {
            w.record_for(&"k", 1.0, at(T0 + i * 5));
        }
        // Far beyond the ring; must not spin through every missed period
        let later = at(T0 + 86_400 * 365 * 50);
        w.record_for(&"k", 1.0, later);
        assert_eq!(count(&w.snapshot_for(&"k", later).unwrap()), 1);
    }

    #[test]
    fn expired_subsets_drop_out_of_snapshot_all() {
        let w = sliding(60, 6);
        w.record_for(&"old", 1.0, at(T0));
        w.record_for(&"new", 1.0, at(T0 + 120));
        let rows = w.snapshot_all(at(T0 + 121));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "new");
        assert_eq!(w.subset_count(), 2);
    }

    #[test]
    fn snapshot_is_idempotent_and_backwards_clock_is_safe() {
        let w = sliding(60, 6);
        w.record_for(&"k", 1.0, at(T0 + 30));
        w.record_for(&"k", 1.0, at(T0 + 10));
        let first = w.snapshot_for(&"k", at(T0 + 30)).unwrap();
        let second = w.snapshot_for(&"k", at(T0 + 30)).unwrap();
        assert_eq!(first, second);
        assert_eq!(count(&first), 2);
    }

    #[test]
    fn sliding_distribution_merges_moments() {
        let agg = Aggregation::distribution(vec![10.0]).unwrap();
        let window = Window::sliding_time(Duration::from_secs(60), 6).unwrap();
        let w = WindowState::new(window, agg.new_data());
        for (i, v) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
            w.record_for(&"k", v, at(T0 + i as i64 * 10));
        }
        let snap = w.snapshot_for(&"k", at(T0 + 35)).unwrap();
        let d = snap.as_distribution().unwrap();
        assert_eq!(d.count(), 4);
        assert!((d.mean() - 2.5).abs() < 1e-12);
        assert!((d.sum_of_squared_dev() - 5.0).abs() < 1e-9);
        assert_eq!(d.min(), Some(1.0));
    }

    #[test]
    fn rejects_degenerate_sliding_windows() {
        assert!(Window::sliding_time(Duration::from_secs(60), 0).is_err());
        assert!(Window::sliding_time(Duration::from_millis(3), 6).is_err());
    }

    #[test]
    fn range_start_depends_on_window() {
        let created = at(T0);
        let now = at(T0 + 7200);
        assert_eq!(Window::cumulative().range_start(created, now), created);
        let hour = Window::sliding_time(Duration::from_secs(3600), 6).unwrap();
        assert_eq!(hour.range_start(created, now), at(T0 + 3600));
    }
}
