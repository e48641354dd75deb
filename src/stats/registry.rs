use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::aggregation::AggregationData;
use super::measure::{Measure, MeasureDesc, MeasureFloat64, MeasureInt64, MeasureKind, Measurement};
use super::view::{View, ViewData, ViewState};
use crate::error::{Result, StatsError};
use crate::tags::{Key, KeyRegistry, TagMap};

/// Views receiving a measure's measurements, indexed by measure name.
type RouteTable = HashMap<String, Route>;

/// The declaration a measure name currently stands for, and its views.
/// Measurements only follow a route when they carry this exact declaration.
#[derive(Clone)]
struct Route {
    desc: Arc<MeasureDesc>,
    views: Arc<[Arc<ViewState>]>,
}

// ─── Public types ────────────────────────────────────────────────

/// Owns every tag key, measure and view of one process (or one test).
///
/// Recording reads an immutable route table that is swapped wholesale
/// whenever a view is registered or removed, so the hot path never waits
/// on setup work. Each view guards its own aggregation state.
pub struct Registry {
    keys: KeyRegistry,
    inner: RwLock<Inner>,
    routes: RwLock<Arc<RouteTable>>,
}

// ─── Internal state ──────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    measures: HashMap<String, MeasureEntry>,
    views: HashMap<String, Arc<ViewState>>,
    subscribed: BTreeSet<String>,
}

struct MeasureEntry {
    desc: Arc<MeasureDesc>,
    // View names only; the registry owns the views themselves.
    views: BTreeSet<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            keys: KeyRegistry::new(),
            inner: RwLock::new(Inner::default()),
            routes: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    // ── Tag keys ────────────────────────────────────────────────

    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    pub fn new_string_key(&self, name: &str) -> Result<Key> {
        self.keys.new_string_key(name)
    }

    pub fn new_int64_key(&self, name: &str) -> Result<Key> {
        self.keys.new_int64_key(name)
    }

    // ── Measures ────────────────────────────────────────────────

    /// Creates an i64 measure, or returns the existing one if `name` was
    /// already declared identically.
    pub fn new_measure_int64(&self, name: &str, description: &str, unit: &str) -> Result<MeasureInt64> {
        let desc = self.declare_measure(name, description, unit, MeasureKind::Int64)?;
        Ok(MeasureInt64::new(desc))
    }

    pub fn new_measure_float64(&self, name: &str, description: &str, unit: &str) -> Result<MeasureFloat64> {
        let desc = self.declare_measure(name, description, unit, MeasureKind::Float64)?;
        Ok(MeasureFloat64::new(desc))
    }

    pub fn find_measure(&self, name: &str) -> Option<Measure> {
        self.inner
            .read()
            .measures
            .get(name)
            .map(|e| Measure::from_desc(Arc::clone(&e.desc)))
    }

    /// Removes a measure that no view references any more.
    pub fn delete_measure(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .measures
            .get(name)
            .ok_or_else(|| StatsError::UnknownMeasure { name: name.into() })?;
        if !entry.views.is_empty() {
            return Err(StatsError::MeasureInUse {
                name: name.into(),
                views: entry.views.len(),
            });
        }
        inner.measures.remove(name);
        tracing::debug!(measure = name, "deleted measure");
        Ok(())
    }

    /// Number of registered views fed by the named measure.
    pub fn views_count(&self, measure: &str) -> usize {
        self.inner
            .read()
            .measures
            .get(measure)
            .map_or(0, |e| e.views.len())
    }

    fn declare_measure(
        &self,
        name: &str,
        description: &str,
        unit: &str,
        kind: MeasureKind,
    ) -> Result<Arc<MeasureDesc>> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.measures.get(name) {
            let d = &existing.desc;
            if d.kind == kind && d.unit == unit && d.description == description {
                return Ok(Arc::clone(d));
            }
            return Err(StatsError::MeasureMismatch { name: name.into() });
        }

        let desc = Arc::new(MeasureDesc {
            name: name.to_owned(),
            description: description.to_owned(),
            unit: unit.to_owned(),
            kind,
        });
        inner.measures.insert(
            name.to_owned(),
            MeasureEntry {
                desc: Arc::clone(&desc),
                views: BTreeSet::new(),
            },
        );
        tracing::debug!(measure = name, unit, "created measure");
        Ok(desc)
    }

    // ── Views ───────────────────────────────────────────────────

    pub fn register_view(&self, view: View) -> Result<()> {
        self.register_view_at(view, Utc::now())
    }

    /// Registers `view`; cumulative snapshots cover time from `created` on.
    pub fn register_view_at(&self, view: View, created: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();

        if inner.views.contains_key(view.name()) {
            return Err(StatsError::DuplicateView {
                name: view.name().into(),
            });
        }

        let measure_name = view.measure().name().to_owned();
        let entry = inner
            .measures
            .get_mut(&measure_name)
            .filter(|e| *e.desc == **view.measure().desc())
            .ok_or_else(|| StatsError::UnknownMeasure {
                name: measure_name.clone(),
            })?;

        let name = view.name().to_owned();
        entry.views.insert(name.clone());
        inner.views.insert(name.clone(), Arc::new(ViewState::new(view, created)));
        self.rebuild_route(&inner, &measure_name);

        tracing::debug!(view = %name, measure = %measure_name, "registered view");
        Ok(())
    }

    /// Detaches a view. It stops receiving measurements immediately and
    /// later retrievals report [`StatsError::ViewNotFound`].
    pub fn unregister_view(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let state = inner
            .views
            .remove(name)
            .ok_or_else(|| StatsError::ViewNotFound { name: name.into() })?;

        let measure_name = state.view().measure().name().to_owned();
        if let Some(entry) = inner.measures.get_mut(&measure_name) {
            entry.views.remove(name);
        }
        inner.subscribed.remove(name);
        self.rebuild_route(&inner, &measure_name);

        tracing::debug!(view = name, measure = %measure_name, "unregistered view");
        Ok(())
    }

    pub fn find_view(&self, name: &str) -> Option<View> {
        self.inner.read().views.get(name).map(|s| s.view().clone())
    }

    /// Names of all registered views, sorted.
    pub fn view_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().views.keys().cloned().collect();
        names.sort();
        names
    }

    /// Swaps in a route table where `measure` maps to its current views.
    /// Called with the admin lock held so rebuilds never interleave.
    fn rebuild_route(&self, inner: &Inner, measure: &str) {
        let route = inner.measures.get(measure).and_then(|e| {
            let views: Vec<Arc<ViewState>> = e
                .views
                .iter()
                .filter_map(|v| inner.views.get(v).cloned())
                .collect();
            (!views.is_empty()).then(|| Route {
                desc: Arc::clone(&e.desc),
                views: views.into(),
            })
        });

        let mut table: RouteTable = (**self.routes.read()).clone();
        match route {
            Some(route) => table.insert(measure.to_owned(), route),
            None => table.remove(measure),
        };
        *self.routes.write() = Arc::new(table);
    }

    // ── Recording ───────────────────────────────────────────────

    /// Routes every measurement to the views of its measure. Measurements
    /// without views are dropped, and so are measurements whose handle is
    /// not the declaration this registry holds under that name (a handle
    /// from another registry, or one kept across delete and redeclare).
    /// `tags` is only read.
    pub fn record(&self, tags: &TagMap, measurements: &[Measurement]) {
        self.record_at(Utc::now(), tags, measurements);
    }

    pub fn record_at(&self, now: DateTime<Utc>, tags: &TagMap, measurements: &[Measurement]) {
        let routes = Arc::clone(&self.routes.read());
        for m in measurements {
            let Some(route) = routes.get(m.measure_name()) else {
                continue;
            };
            if !Arc::ptr_eq(&route.desc, m.desc()) {
                continue;
            }
            let value = m.value().as_f64();
            for view in route.views.iter() {
                view.record(tags, value, now);
            }
        }
    }

    // ── Retrieval ───────────────────────────────────────────────

    pub fn retrieve_data(&self, view: &str) -> Result<ViewData> {
        self.retrieve_data_at(view, Utc::now())
    }

    pub fn retrieve_data_at(&self, view: &str, now: DateTime<Utc>) -> Result<ViewData> {
        Ok(self.view_state(view)?.retrieve(now))
    }

    /// Aggregate of the single tag subset `tags` projects onto, if any
    /// value was recorded for it.
    pub fn retrieve_row_at(
        &self,
        view: &str,
        tags: &TagMap,
        now: DateTime<Utc>,
    ) -> Result<Option<AggregationData>> {
        Ok(self.view_state(view)?.retrieve_for(tags, now))
    }

    fn view_state(&self, name: &str) -> Result<Arc<ViewState>> {
        self.inner
            .read()
            .views
            .get(name)
            .cloned()
            .ok_or_else(|| StatsError::ViewNotFound { name: name.into() })
    }

    // ── Subscriptions ───────────────────────────────────────────

    /// Marks a view for periodic export by a [`Reporter`](crate::export::Reporter).
    pub fn subscribe(&self, view: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.views.contains_key(view) {
            return Err(StatsError::ViewNotFound { name: view.into() });
        }
        if inner.subscribed.insert(view.to_owned()) {
            tracing::debug!(view, "subscribed view");
        }
        Ok(())
    }

    pub fn unsubscribe(&self, view: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.views.contains_key(view) {
            return Err(StatsError::ViewNotFound { name: view.into() });
        }
        if inner.subscribed.remove(view) {
            tracing::debug!(view, "unsubscribed view");
        }
        Ok(())
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.inner.read().subscribed.iter().cloned().collect()
    }

    /// Snapshots of every subscribed view.
    pub fn collect_subscribed_at(&self, now: DateTime<Utc>) -> Vec<ViewData> {
        let states: Vec<Arc<ViewState>> = {
            let inner = self.inner.read();
            inner
                .subscribed
                .iter()
                .filter_map(|v| inner.views.get(v).cloned())
                .collect()
        };
        states.iter().map(|s| s.retrieve(now)).collect()
    }
}
