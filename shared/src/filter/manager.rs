use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, error, instrument, trace};

use super::engine::filter_records;
use super::facets::{collect_facets, FacetOptions};
use super::labels::{display_value, filter_label};
use super::state::{FilterState, SortDirection, SortSpec, SEARCH_KEY};
use super::FilterError;
use crate::config::FilterOptions;
use crate::model::VehicleRecord;
use crate::scheduler::Debouncer;

/// The shell's address bar. Only the query string part is read and written.
pub trait LocationSync: Send + Sync {
    fn current_query(&self) -> String;
    fn replace_query(&self, query: &str);
}

/// Location kept in memory; what tests and headless shells use.
#[derive(Debug, Default)]
pub struct MemoryLocation {
    query: Mutex<String>,
    writes: AtomicU64,
}

impl MemoryLocation {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            query: Mutex::new(initial.into()),
            writes: AtomicU64::new(0),
        }
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl LocationSync for MemoryLocation {
    fn current_query(&self) -> String {
        self.query.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace_query(&self, query: &str) {
        *self.query.lock().unwrap_or_else(PoisonError::into_inner) = query.to_string();
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Input controls bound to the filter state (search box, dropdowns, sort select).
pub trait BoundControls: Send + Sync {
    /// Puts every control back to its empty/default value.
    fn clear(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveFilter {
    pub key: String,
    pub label: String,
    pub value: String,
    pub display_value: String,
}

/// What a render pass receives after every apply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterView {
    pub records: Vec<VehicleRecord>,
    pub active_filters: Vec<ActiveFilter>,
    pub query: String,
}

pub type FilterCallback = Arc<dyn Fn(&FilterView) + Send + Sync>;

struct State {
    filter: FilterState,
    records: Vec<VehicleRecord>,
    debouncer: Debouncer,
    last_view: Option<FilterView>,
}

struct Inner {
    options: FilterOptions,
    state: Mutex<State>,
    location: Option<Arc<dyn LocationSync>>,
    controls: Option<Arc<dyn BoundControls>>,
    on_filter: Option<FilterCallback>,
    applies: AtomicU64,
}

/// Search, filter and sort state over a retained snapshot of all records.
///
/// Cheap to clone; clones share state. Text input (`set_search`, `set_filter`) is
/// debounced, discrete actions (`set_sort`, `reset`, `remove_filter`) apply at once.
#[derive(Clone)]
pub struct FilterManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for FilterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FilterManager")
            .field("filter", &state.filter)
            .field("records", &state.records.len())
            .field("pending", &state.debouncer.is_pending())
            .finish()
    }
}

#[derive(Default)]
pub struct FilterManagerBuilder {
    options: FilterOptions,
    records: Vec<VehicleRecord>,
    location: Option<Arc<dyn LocationSync>>,
    controls: Option<Arc<dyn BoundControls>>,
    on_filter: Option<FilterCallback>,
}

impl FilterManagerBuilder {
    pub fn options(mut self, options: FilterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn records(mut self, records: Vec<VehicleRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn location(mut self, location: Arc<dyn LocationSync>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn controls(mut self, controls: Arc<dyn BoundControls>) -> Self {
        self.controls = Some(controls);
        self
    }

    pub fn on_filter<F>(mut self, callback: F) -> Self
    where
        F: Fn(&FilterView) + Send + Sync + 'static,
    {
        self.on_filter = Some(Arc::new(callback));
        self
    }

    /// Builds the manager, restoring state from the location's query string when
    /// location sync is enabled.
    pub fn build(self) -> FilterManager {
        let filter = match (&self.location, self.options.sync_location) {
            (Some(location), true) => FilterState::from_query_string(&location.current_query()),
            _ => FilterState::default(),
        };
        debug!(
            restored = !filter.is_default(),
            debounce_ms = self.options.debounce_ms,
            "filter manager created"
        );

        let debouncer = Debouncer::new(Duration::from_millis(self.options.debounce_ms));
        FilterManager {
            inner: Arc::new(Inner {
                options: self.options,
                state: Mutex::new(State {
                    filter,
                    records: self.records,
                    debouncer,
                    last_view: None,
                }),
                location: self.location,
                controls: self.controls,
                on_filter: self.on_filter,
                applies: AtomicU64::new(0),
            }),
        }
    }
}

impl FilterManager {
    pub fn builder() -> FilterManagerBuilder {
        FilterManagerBuilder::default()
    }

    pub fn new(options: FilterOptions) -> Self {
        Self::builder().options(options).build()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_search(&self, query: &str) {
        self.lock().filter.set_search(query);
        self.schedule_apply();
    }

    /// Sets or clears (`None` or blank) one exact-match constraint.
    pub fn set_filter(&self, key: &str, value: Option<&str>) -> Result<(), FilterError> {
        self.lock().filter.set_filter(key, value)?;
        self.schedule_apply();
        Ok(())
    }

    pub fn set_sort(&self, field: &str, direction: SortDirection) -> FilterView {
        {
            let mut state = self.lock();
            state.filter.set_sort(SortSpec::new(field, direction));
            state.debouncer.cancel();
        }
        self.apply()
    }

    /// Applies a sort dropdown value such as `marketValue-desc`.
    pub fn set_sort_preset(&self, preset: &str) -> Result<FilterView, FilterError> {
        let spec = SortSpec::parse_preset(preset)?;
        Ok(self.set_sort(&spec.field, spec.direction))
    }

    pub fn reset(&self) -> FilterView {
        {
            let mut state = self.lock();
            state.filter.clear();
            state.debouncer.cancel();
        }
        if let Some(controls) = &self.inner.controls {
            controls.clear();
        }
        self.apply()
    }

    /// Drops one constraint (`"search"` for the search text) and applies at once.
    pub fn remove_filter(&self, key: &str) -> FilterView {
        {
            let mut state = self.lock();
            state.filter.remove(key);
            state.debouncer.cancel();
        }
        self.apply()
    }

    /// Applies any pending debounced change now.
    pub fn flush(&self) -> FilterView {
        self.lock().debouncer.cancel();
        self.apply()
    }

    pub fn has_pending_apply(&self) -> bool {
        self.lock().debouncer.is_pending()
    }

    /// Replaces the retained record snapshot and returns fresh facet options. Does not
    /// apply; the caller decides when to re-render.
    pub fn populate(&self, records: Vec<VehicleRecord>) -> FacetOptions {
        let facets = collect_facets(&records);
        let mut state = self.lock();
        debug!(count = records.len(), "record snapshot replaced");
        state.records = records;
        facets
    }

    pub fn facets(&self) -> FacetOptions {
        collect_facets(&self.lock().records)
    }

    /// Filters and sorts `records` with the current state.
    pub fn get_filtered_data(&self, records: &[VehicleRecord]) -> Vec<VehicleRecord> {
        let filter = self.lock().filter.clone();
        filter_records(records, &filter)
    }

    /// Filters and sorts the retained snapshot with the current state.
    pub fn filtered(&self) -> Vec<VehicleRecord> {
        let state = self.lock();
        filter_records(&state.records, &state.filter)
    }

    pub fn state(&self) -> FilterState {
        self.lock().filter.clone()
    }

    pub fn active_filters(&self) -> Vec<ActiveFilter> {
        active_filters(&self.lock().filter, &self.inner.options)
    }

    pub fn active_filters_count(&self) -> usize {
        self.lock().filter.active_count()
    }

    pub fn last_view(&self) -> Option<FilterView> {
        self.lock().last_view.clone()
    }

    /// Number of completed apply passes.
    pub fn apply_count(&self) -> u64 {
        self.inner.applies.load(Ordering::SeqCst)
    }

    /// Writes the state to the location, recomputes the view from the retained
    /// snapshot and hands it to the render callback. A panicking callback is logged and
    /// otherwise ignored.
    #[instrument(skip(self), level = "debug")]
    pub fn apply(&self) -> FilterView {
        let view = {
            let mut state = self.lock();
            let view = FilterView {
                records: filter_records(&state.records, &state.filter),
                active_filters: active_filters(&state.filter, &self.inner.options),
                query: state.filter.to_query_string(),
            };
            state.last_view = Some(view.clone());
            view
        };

        if self.inner.options.sync_location {
            if let Some(location) = &self.inner.location {
                location.replace_query(&view.query);
            }
        }

        if let Some(callback) = &self.inner.on_filter {
            if catch_unwind(AssertUnwindSafe(|| callback(&view))).is_err() {
                error!("filter render callback panicked; view dropped for this cycle");
            }
        }

        let applies = self.inner.applies.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(applies, shown = view.records.len(), "filters applied");
        view
    }

    fn schedule_apply(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let scheduled = self.lock().debouncer.schedule(async move {
            if let Some(inner) = weak.upgrade() {
                FilterManager { inner }.apply();
            }
        });
        if let Err(e) = scheduled {
            debug!(error = %e, "applying filters immediately");
            self.apply();
        }
    }
}

fn active_filters(filter: &FilterState, options: &FilterOptions) -> Vec<ActiveFilter> {
    let locale = options.locale;
    let mut out = Vec::with_capacity(filter.active_count());
    if !filter.search().is_empty() {
        out.push(ActiveFilter {
            key: SEARCH_KEY.to_string(),
            label: filter_label(SEARCH_KEY, locale),
            value: filter.search().to_string(),
            display_value: filter.search().to_string(),
        });
    }
    for (key, value) in filter.filters() {
        out.push(ActiveFilter {
            key: key.clone(),
            label: filter_label(key, locale),
            value: value.clone(),
            display_value: display_value(key, value, locale),
        });
    }
    out
}
