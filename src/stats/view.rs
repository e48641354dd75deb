use chrono::{DateTime, Utc};
use serde::Serialize;

use super::aggregation::{Aggregation, AggregationData};
use super::measure::Measure;
use super::window::{Window, WindowState};
use crate::tags::{Key, Tag, TagMap};

// ─── View declaration ────────────────────────────────────────────

/// Binds a measure to an aggregation, a window and the tag keys that
/// group its measurements. Register it with
/// [`Registry::register_view`](crate::Registry::register_view).
#[derive(Debug, Clone)]
pub struct View {
    name: String,
    description: String,
    measure: Measure,
    aggregation: Aggregation,
    window: Window,
    keys: Vec<Key>,
}

impl View {
    /// Grouping keys are kept sorted by name with duplicates removed.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        measure: impl Into<Measure>,
        aggregation: Aggregation,
        window: Window,
        mut keys: Vec<Key>,
    ) -> Self {
        keys.sort();
        keys.dedup();
        Self {
            name: name.into(),
            description: description.into(),
            measure: measure.into(),
            aggregation,
            window,
            keys,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn measure(&self) -> &Measure {
        &self.measure
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }
}

// ─── Tag subsets ─────────────────────────────────────────────────

/// Projection of a tag map onto a view's keys, one entry per key in
/// the view's key order. `None` marks a key absent from the map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagSubset(Vec<Option<Vec<u8>>>);

impl TagSubset {
    pub fn project(map: &TagMap, keys: &[Key]) -> Self {
        Self(keys.iter().map(|k| map.get(k).map(<[u8]>::to_vec)).collect())
    }

    /// The tags that were set, paired with their keys.
    pub fn tags(&self, keys: &[Key]) -> Vec<Tag> {
        keys.iter()
            .zip(&self.0)
            .filter_map(|(k, v)| v.as_ref().map(|v| Tag::new(k.clone(), v.clone())))
            .collect()
    }
}

// ─── Snapshots ───────────────────────────────────────────────────

/// One tag subset's aggregate inside a [`ViewData`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub tags: Vec<Tag>,
    pub data: AggregationData,
}

/// Point-in-time copy of a view's aggregates. Owns its data; nothing in
/// it aliases live engine state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewData {
    pub view: String,
    pub measure: String,
    pub aggregation: &'static str,
    pub window: Window,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rows: Vec<Row>,
}

impl ViewData {
    /// The row whose set tags are exactly `tags` (order-insensitive).
    pub fn row(&self, tags: &[Tag]) -> Option<&Row> {
        let mut wanted = tags.to_vec();
        wanted.sort();
        self.rows.iter().find(|r| r.tags == wanted)
    }
}

// ─── Registered state ────────────────────────────────────────────

/// A registered view together with its live aggregation state.
pub(crate) struct ViewState {
    view: View,
    created: DateTime<Utc>,
    data: WindowState<TagSubset>,
}

impl ViewState {
    pub(crate) fn new(view: View, created: DateTime<Utc>) -> Self {
        let data = WindowState::new(*view.window(), view.aggregation().new_data());
        Self {
            view,
            created,
            data,
        }
    }

    pub(crate) fn view(&self) -> &View {
        &self.view
    }

    pub(crate) fn record(&self, tags: &TagMap, value: f64, now: DateTime<Utc>) {
        let subset = TagSubset::project(tags, self.view.keys());
        self.data.record_for(&subset, value, now);
    }

    pub(crate) fn retrieve(&self, now: DateTime<Utc>) -> ViewData {
        let keys = self.view.keys();
        let mut rows: Vec<Row> = self
            .data
            .snapshot_all(now)
            .into_iter()
            .map(|(subset, data)| Row {
                tags: subset.tags(keys),
                data,
            })
            .collect();
        rows.sort_by(|a, b| a.tags.cmp(&b.tags));

        ViewData {
            view: self.view.name().to_owned(),
            measure: self.view.measure().name().to_owned(),
            aggregation: self.view.aggregation().name(),
            window: *self.view.window(),
            start: self.view.window().range_start(self.created, now),
            end: now,
            rows,
        }
    }

    pub(crate) fn retrieve_for(&self, tags: &TagMap, now: DateTime<Utc>) -> Option<AggregationData> {
        let subset = TagSubset::project(tags, self.view.keys());
        self.data.snapshot_for(&subset, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::KeyRegistry;

    #[test]
    fn projection_marks_missing_keys_unset() {
        let reg = KeyRegistry::new();
        let method = reg.new_string_key("method").unwrap();
        let service = reg.new_string_key("service").unwrap();
        let other = reg.new_string_key("other").unwrap();

        let mut map = TagMap::new();
        map.upsert(service.clone(), b"billing".to_vec());
        map.upsert(other, b"ignored".to_vec());

        let keys = vec![method, service.clone()];
        let subset = TagSubset::project(&map, &keys);
        assert_eq!(subset, TagSubset(vec![None, Some(b"billing".to_vec())]));
        assert_eq!(subset.tags(&keys), vec![Tag::new(service, b"billing".to_vec())]);
    }

    #[test]
    fn subsets_differ_between_unset_and_empty_value() {
        let reg = KeyRegistry::new();
        let k = reg.new_string_key("k").unwrap();
        let mut empty_value = TagMap::new();
        empty_value.upsert(k.clone(), Vec::new());
        let keys = [k];
        assert_ne!(
            TagSubset::project(&empty_value, &keys),
            TagSubset::project(&TagMap::new(), &keys)
        );
    }
}
