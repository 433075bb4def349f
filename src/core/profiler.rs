//! Profiler facade - the one object a presentation layer talks to.
//!
//! Owns the mirror tree, the synchronizer, the sampler (and its thread), the
//! column set and the filter/sort state. Read entry points take view paths,
//! i.e. row paths through the filtered and sorted projection.
//!
//! Column arguments are indices into [`Profiler::columns`]. Tree events carry
//! node ids; [`Profiler::view_path`] maps them onto view paths.
//!
//! The projection is cached and rebuilt only when the tree revision moves or
//! the filter/sort selection changes.

use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::ProfilerSettings;
use crate::entities::{
    CellValue, ColumnId, ColumnRegistry, ColumnSpec, Engine, MirrorTree, NodeId, Severity, ValueContext, ViewMode,
};

use super::event_bus::{BoxedEvent, EventBus};
use super::sampler::{clamp_interval, SampleStats, Sampler, SamplerThread};
use super::synchronizer::{Projection as SyncProjection, Synchronizer};
use super::tree_events::EventBatch;
use super::view::{Projection, SortKey, SortOrder, ViewState};

pub struct Profiler {
    engine: Arc<dyn Engine>,
    tree: Arc<Mutex<MirrorTree>>,
    sync: Arc<Synchronizer>,
    sampler: Sampler,
    thread: Option<SamplerThread>,
    columns: ColumnRegistry,
    hidden: BTreeSet<ColumnId>,
    view: ViewState,
    events: EventBus,
    interval_ms: Arc<AtomicU64>,
    frame_interval: Arc<AtomicU64>,
    projection_cache: Mutex<Option<CachedProjection>>,
}

struct CachedProjection {
    revision: u64,
    projection: Arc<Projection>,
}

impl Profiler {
    /// Switch engine profiling on, subscribe, and mirror the graph.
    ///
    /// The sampler thread is not started; call [`start`](Self::start) or
    /// drive passes with [`sample_now`](Self::sample_now).
    pub fn new(engine: Arc<dyn Engine>, settings: &ProfilerSettings) -> Self {
        let settings = settings.clone().sanitize();
        let columns = ColumnRegistry::standard();
        let gpu = columns.spec(ColumnId::RenderGpu).is_some();
        engine.set_profiling(true, gpu);

        let tree = Arc::new(Mutex::new(MirrorTree::new()));
        let sync = Arc::new(Synchronizer::new(
            Arc::clone(&engine),
            SyncProjection {
                mode: settings.view_mode,
                active_only: settings.active_only,
            },
        ));
        sync.attach();

        let events = EventBus::new();
        let frame_interval = Arc::new(AtomicU64::new(engine.frame_interval_ns()));
        let sampler = Sampler::new(
            Arc::clone(&engine),
            Arc::clone(&tree),
            Arc::clone(&sync),
            events.clone(),
            Arc::clone(&frame_interval),
        );

        let profiler = Self {
            engine,
            tree,
            sync,
            sampler,
            thread: None,
            columns,
            hidden: settings.hidden_columns.iter().copied().collect(),
            view: ViewState::new(),
            events,
            interval_ms: Arc::new(AtomicU64::new(settings.refresh_interval_ms)),
            frame_interval,
            projection_cache: Mutex::new(None),
        };
        profiler.rebuild();
        info!(
            "Profiler ready: mode {}, active_only {}, every {} ms",
            settings.view_mode, settings.active_only, settings.refresh_interval_ms
        );
        profiler
    }

    /// Start the background sampler. No-op if already running.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.thread.as_ref().is_some_and(|t| t.is_running()) {
            return Ok(());
        }
        let thread = SamplerThread::spawn(self.sampler.clone(), Arc::clone(&self.interval_ms))?;
        self.thread = Some(thread);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| t.is_running())
    }

    // ========== Read side ==========

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn columns(&self) -> &ColumnRegistry {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Columns not hidden by the user, in registry order
    pub fn visible_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.hidden.contains(&c.id))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn is_column_hidden(&self, id: ColumnId) -> bool {
        self.hidden.contains(&id)
    }

    pub fn value_context(&self) -> ValueContext {
        ValueContext {
            frame_interval_ns: self.frame_interval.load(Ordering::Relaxed),
        }
    }

    /// Current filtered/sorted view of the tree
    pub fn projection(&self) -> Arc<Projection> {
        let tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
        let mut cache = self.projection_cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.as_ref().filter(|c| c.revision == tree.revision()) {
            return Arc::clone(&cached.projection);
        }

        let projection = Arc::new(self.view.project(&tree, &self.columns, &self.value_context()));
        *cache = Some(CachedProjection {
            revision: tree.revision(),
            projection: Arc::clone(&projection),
        });
        projection
    }

    /// View path of a mirrored node, `None` while it is filtered out
    pub fn view_path(&self, node: NodeId) -> Option<Vec<usize>> {
        self.projection().path_of(node)
    }

    pub fn row_count(&self, path: &[usize]) -> usize {
        self.projection().row_count(path)
    }

    pub fn child_at(&self, path: &[usize], row: usize) -> Option<NodeId> {
        self.projection().child_at(path, row)
    }

    /// Cell at (view path, column). Unknown paths yield [`CellValue::Empty`].
    pub fn value(&self, path: &[usize], column: usize) -> CellValue {
        let Some(spec) = self.columns.get(column) else {
            return CellValue::Empty;
        };
        let Some(id) = self.projection().node_at(path) else {
            return CellValue::Empty;
        };
        self.with_tree(|tree| match tree.get(id) {
            Some(node) => spec.value(node, &self.value_context()),
            None => CellValue::Empty,
        })
    }

    pub fn severity(&self, path: &[usize], column: usize) -> Severity {
        let (Some(spec), Some(id)) = (self.columns.get(column), self.projection().node_at(path)) else {
            return Severity::Normal;
        };
        self.with_tree(|tree| match tree.get(id) {
            Some(node) => spec.severity(node, &self.value_context()),
            None => Severity::Normal,
        })
    }

    /// Run `f` with the tree locked. Do not call back into the profiler from `f`.
    pub fn with_tree<R>(&self, f: impl FnOnce(&MirrorTree) -> R) -> R {
        let tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
        f(&tree)
    }

    pub fn view_mode(&self) -> ViewMode {
        self.sync.projection().mode
    }

    pub fn active_only(&self) -> bool {
        self.sync.projection().active_only
    }

    pub fn filter_text(&self) -> &str {
        self.view.filter_text()
    }

    pub fn sort(&self) -> Option<SortKey> {
        self.view.sort()
    }

    pub fn refresh_interval(&self) -> u64 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    // ========== Mutations ==========

    /// Switch view mode; rebuilds the tree when it changes
    pub fn set_view_mode(&mut self, mode: ViewMode) -> bool {
        let current = self.sync.projection();
        if current.mode == mode {
            return false;
        }
        debug!("View mode {} -> {}", current.mode, mode);
        self.sync.set_projection(SyncProjection { mode, ..current });
        self.rebuild();
        true
    }

    pub fn set_active_only(&mut self, active_only: bool) -> bool {
        let current = self.sync.projection();
        if current.active_only == active_only {
            return false;
        }
        self.sync.set_projection(SyncProjection { active_only, ..current });
        self.rebuild();
        true
    }

    pub fn set_filter_text(&mut self, text: &str) {
        self.view.set_filter_text(text);
        self.invalidate_projection();
    }

    /// Explicit sort selection; `None` restores tree order
    pub fn set_sort_column(&mut self, column: Option<usize>, order: SortOrder) {
        let key = column
            .filter(|c| *c < self.columns.len())
            .map(|column| SortKey { column, order });
        self.view.set_sort(key);
        self.invalidate_projection();
    }

    /// Header click: same column flips, new column starts at its default direction
    pub fn toggle_sort(&mut self, column: usize) -> Option<SortKey> {
        let spec: &ColumnSpec = self.columns.get(column)?;
        let default = if spec.sort_desc {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        };
        let key = self.view.toggle_sort(column, default);
        self.invalidate_projection();
        Some(key)
    }

    /// Returns the interval actually applied
    pub fn set_refresh_interval(&self, ms: u64) -> u64 {
        let ms = clamp_interval(ms);
        self.interval_ms.store(ms, Ordering::Relaxed);
        ms
    }

    pub fn set_column_hidden(&mut self, id: ColumnId, hidden: bool) {
        if id == ColumnId::Name {
            return;
        }
        if hidden {
            self.hidden.insert(id);
        } else {
            self.hidden.remove(&id);
        }
    }

    /// Re-enumerate the engine from scratch
    pub fn refresh_sources(&self) {
        self.rebuild();
    }

    /// Apply queued structural edits and hand back everything emitted since the last call
    pub fn process_events(&self) -> Vec<BoxedEvent> {
        let mut batch = EventBatch::new();
        {
            let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
            self.sync.apply_pending(&mut tree, &mut batch);
        }
        batch.flush(&self.events);
        self.events.poll()
    }

    /// One sampling pass on the calling thread
    pub fn sample_now(&self) -> Option<SampleStats> {
        self.sampler.tick()
    }

    /// Current state, for persisting
    pub fn settings(&self) -> ProfilerSettings {
        let projection = self.sync.projection();
        ProfilerSettings {
            view_mode: projection.mode,
            active_only: projection.active_only,
            hidden_columns: self.hidden.iter().copied().collect(),
            refresh_interval_ms: self.refresh_interval(),
        }
    }

    fn invalidate_projection(&self) {
        *self.projection_cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn rebuild(&self) {
        // Guard before the lock so a concurrent sampler pass skips instead of waiting
        let Some(guard) = self.sync.begin_rebuild() else { return };
        let mut batch = EventBatch::new();
        {
            let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
            self.sync.rebuild_with(guard, &mut tree, &mut batch);
        }
        batch.flush(&self.events);
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        self.stop();
        let removed = {
            let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
            self.sync.teardown(&mut tree)
        };
        self.sync.detach();
        self.engine.set_profiling(false, false);
        debug!("Profiler shut down, released {} nodes", removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::downcast_event;
    use crate::core::tree_events::{NodeChangedEvent, RowInsertedEvent, TreeResetEvent};
    use crate::entities::MetricsSnapshot;
    use crate::sim::SimEngine;

    fn demo() -> Arc<SimEngine> {
        let engine = SimEngine::new();
        let x = engine.add_scene("X");
        let y = engine.add_scene("Y");
        let z = engine.add_input("Z", "Image");
        engine.add_item(&y, &z);
        engine.add_item(&x, &y);
        engine.set_sample(
            z.id(),
            MetricsSnapshot {
                tick_avg: 2_000_000,
                ..MetricsSnapshot::zero()
            },
        );
        engine
    }

    fn name_col(p: &Profiler) -> usize {
        p.columns().index_of(ColumnId::Name).unwrap()
    }

    #[test]
    fn test_lifecycle_toggles_profiling_and_subscriptions() {
        let engine = demo();
        let profiler = Profiler::new(engine.clone(), &ProfilerSettings::default());
        assert!(engine.is_profiling());
        assert!(engine.subscription_count() > 0);

        drop(profiler);
        assert!(!engine.is_profiling());
        assert_eq!(engine.subscription_count(), 0);
    }

    #[test]
    fn test_rows_and_values() {
        let engine = demo();
        let profiler = Profiler::new(engine, &ProfilerSettings::default());
        let name = name_col(&profiler);

        // Flat scene mode: X > Y, Y > Z
        assert_eq!(profiler.row_count(&[]), 2);
        assert_eq!(profiler.value(&[0], name), CellValue::Text("X".into()));
        assert_eq!(profiler.value(&[1, 0], name), CellValue::Text("Z".into()));
        assert_eq!(profiler.value(&[7], name), CellValue::Empty);
        assert_eq!(profiler.value(&[0], 999), CellValue::Empty);
        assert!(profiler.child_at(&[0], 0).is_some());
    }

    #[test]
    fn test_view_mode_switch_resets() {
        let engine = demo();
        let mut profiler = Profiler::new(engine, &ProfilerSettings::default());
        profiler.events().poll();

        assert!(profiler.set_view_mode(ViewMode::SceneNested));
        assert!(!profiler.set_view_mode(ViewMode::SceneNested));
        let events = profiler.process_events();
        let resets: Vec<&TreeResetEvent> = events.iter().filter_map(downcast_event::<TreeResetEvent>).collect();
        assert_eq!(resets.len(), 1);
        assert_eq!(resets[0].mode, ViewMode::SceneNested);
        assert_eq!(resets[0].nodes, 3);

        assert_eq!(profiler.with_tree(|t| t.outline()), "X\n  Y\n    Z\n");
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let engine = demo();
        let profiler = Profiler::new(engine.clone(), &ProfilerSettings::default());
        let before = profiler.with_tree(|t| t.outline());
        let subs = engine.subscription_count();
        profiler.refresh_sources();
        profiler.refresh_sources();
        assert_eq!(profiler.with_tree(|t| t.outline()), before);
        assert_eq!(engine.subscription_count(), subs);
    }

    #[test]
    fn test_process_events_applies_edits() {
        let engine = demo();
        let profiler = Profiler::new(engine.clone(), &ProfilerSettings::default());
        profiler.events().poll();

        engine.add_scene("W");
        let events = profiler.process_events();
        assert_eq!(profiler.row_count(&[]), 3);
        assert!(events.iter().any(|e| downcast_event::<RowInsertedEvent>(e).is_some()));
    }

    #[test]
    fn test_filter_and_sort() {
        let engine = demo();
        let mut profiler = Profiler::new(engine, &ProfilerSettings::default());
        let name = name_col(&profiler);
        let tick = profiler.columns().index_of(ColumnId::Tick).unwrap();
        profiler.sample_now().unwrap();

        profiler.set_filter_text("z");
        // Only Y holds Z in flat mode
        assert_eq!(profiler.row_count(&[]), 1);
        assert_eq!(profiler.value(&[0], name), CellValue::Text("Y".into()));
        profiler.set_filter_text("");

        // Tick defaults to worst-first
        let key = profiler.toggle_sort(tick).unwrap();
        assert_eq!(key.order, SortOrder::Descending);
        assert_eq!(profiler.value(&[0], name), CellValue::Text("Y".into()));
        assert_eq!(profiler.toggle_sort(tick).unwrap().order, SortOrder::Ascending);
        assert_eq!(profiler.value(&[0], name), CellValue::Text("X".into()));

        profiler.set_sort_column(None, SortOrder::Ascending);
        assert_eq!(profiler.sort(), None);
    }

    #[test]
    fn test_view_path_maps_tree_events() {
        let engine = demo();
        let mut profiler = Profiler::new(engine.clone(), &ProfilerSettings::default());
        let tick = profiler.columns().index_of(ColumnId::Tick).unwrap();
        let z = engine.find("Z").unwrap();
        let z_node = profiler.with_tree(|t| t.find_by_source(z.id())[0]);
        profiler.sample_now().unwrap();

        // Y (holding Z) is the heavier root, so it sorts first
        profiler.toggle_sort(tick);
        profiler.process_events();

        engine.set_sample(
            z.id(),
            MetricsSnapshot {
                tick_avg: 3_000_000,
                ..MetricsSnapshot::zero()
            },
        );
        profiler.sample_now().unwrap();
        let events = profiler.process_events();
        let changed = events
            .iter()
            .filter_map(downcast_event::<NodeChangedEvent>)
            .find(|e| e.node == z_node)
            .unwrap();
        assert_eq!(changed.path, vec![1, 0]);
        assert_eq!(profiler.view_path(changed.node), Some(vec![0, 0]));

        profiler.set_filter_text("^x$");
        assert_eq!(profiler.view_path(z_node), None);
    }

    #[test]
    fn test_projection_cached_until_change() {
        let engine = demo();
        let mut profiler = Profiler::new(engine, &ProfilerSettings::default());

        let first = profiler.projection();
        assert!(Arc::ptr_eq(&first, &profiler.projection()));
        profiler.row_count(&[]);
        assert!(Arc::ptr_eq(&first, &profiler.projection()));

        profiler.set_filter_text("y");
        let filtered = profiler.projection();
        assert!(!Arc::ptr_eq(&first, &filtered));

        // A sampling pass may reorder rows
        profiler.sample_now().unwrap();
        assert!(!Arc::ptr_eq(&filtered, &profiler.projection()));
    }

    #[test]
    fn test_settings_roundtrip() {
        let engine = demo();
        let settings = ProfilerSettings {
            view_mode: ViewMode::Source,
            active_only: false,
            hidden_columns: vec![ColumnId::Type],
            refresh_interval_ms: 3000,
        };
        let mut profiler = Profiler::new(engine, &settings);
        assert_eq!(profiler.settings(), settings);

        profiler.set_column_hidden(ColumnId::Tick, true);
        profiler.set_column_hidden(ColumnId::Type, false);
        profiler.set_column_hidden(ColumnId::Name, true);
        assert_eq!(profiler.set_refresh_interval(20), 500);

        let saved = profiler.settings();
        assert_eq!(saved.hidden_columns, vec![ColumnId::Tick]);
        assert_eq!(saved.refresh_interval_ms, 500);
        assert!(profiler.visible_columns().contains(&name_col(&profiler)));
    }

    #[test]
    fn test_start_and_stop_thread() {
        let engine = demo();
        let mut profiler = Profiler::new(engine, &ProfilerSettings::default());
        profiler.start().unwrap();
        assert!(profiler.is_running());
        profiler.start().unwrap();
        profiler.stop();
        assert!(!profiler.is_running());
    }
}
