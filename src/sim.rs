//! In-process engine simulation.
//!
//! Implements [`Engine`] over a small mutable graph so the profiler can be
//! driven without a real compositor: unit tests build graphs with it and the
//! binary runs a demo scene collection on top of it.
//!
//! Mutators emit the same signals a compositor would, synchronously on the
//! calling thread. Handlers are invoked with no internal lock held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::entities::{
    Engine, EngineSignal, IconKind, ItemId, MetricsSnapshot, SceneItem, SignalHandler, SignalScope, Source,
    SourceId, SourceKind, SubscriptionId, WeakSource,
};

/// 60 fps
pub const DEFAULT_FRAME_INTERVAL_NS: u64 = 16_666_667;

#[derive(Default)]
struct SourceState {
    name: Option<String>,
    enabled: bool,
    active: bool,
    showing: bool,
    /// Bottom-most first
    items: Vec<Arc<SimItem>>,
    filters: Vec<Arc<SimSource>>,
    leg: Option<Weak<SimSource>>,
}

/// Simulated source
pub struct SimSource {
    id: SourceId,
    kind: SourceKind,
    type_label: String,
    private: bool,
    async_video: bool,
    icon: IconKind,
    owner: Option<Weak<SimSource>>,
    state: RwLock<SourceState>,
}

impl SimSource {
    pub fn id(&self) -> SourceId {
        self.id
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SourceState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SourceState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Source for SimSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn name(&self) -> Option<String> {
        self.read().name.clone()
    }

    fn type_label(&self) -> String {
        self.type_label.clone()
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn is_private(&self) -> bool {
        self.private
    }

    fn is_async_video(&self) -> bool {
        self.async_video
    }

    fn icon(&self) -> IconKind {
        self.icon
    }

    fn enabled(&self) -> bool {
        self.read().enabled
    }

    fn active(&self) -> bool {
        self.read().active
    }

    fn showing(&self) -> bool {
        self.read().showing
    }

    fn items(&self) -> Vec<Arc<dyn SceneItem>> {
        self.read().items.iter().map(|i| Arc::clone(i) as Arc<dyn SceneItem>).collect()
    }

    fn filters(&self) -> Vec<Arc<dyn Source>> {
        self.read().filters.iter().map(|f| Arc::clone(f) as Arc<dyn Source>).collect()
    }

    fn filter_owner(&self) -> Option<Arc<dyn Source>> {
        let owner = self.owner.as_ref()?.upgrade()?;
        Some(owner as Arc<dyn Source>)
    }

    fn transition_active_source(&self) -> Option<Arc<dyn Source>> {
        let leg = self.read().leg.as_ref()?.upgrade()?;
        Some(leg as Arc<dyn Source>)
    }
}

/// Simulated scene item
pub struct SimItem {
    id: ItemId,
    source: Arc<SimSource>,
    visible: AtomicBool,
}

impl SceneItem for SimItem {
    fn id(&self) -> ItemId {
        self.id
    }

    fn source(&self) -> Option<Arc<dyn Source>> {
        Some(Arc::clone(&self.source) as Arc<dyn Source>)
    }

    fn visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }
}

fn weak_source(source: &Arc<SimSource>) -> WeakSource {
    let source: Arc<dyn Source> = Arc::clone(source) as Arc<dyn Source>;
    Arc::downgrade(&source)
}

/// Icon and async flag implied by an input's type label
fn classify(type_label: &str) -> (IconKind, bool) {
    match type_label {
        "Image" => (IconKind::Image, false),
        "Color" => (IconKind::Color, false),
        "Image Slideshow" => (IconKind::Slideshow, false),
        "Audio Input Capture" => (IconKind::AudioInput, false),
        "Audio Output Capture" => (IconKind::AudioOutput, false),
        "Application Audio Capture" => (IconKind::ProcessAudioOutput, false),
        "Display Capture" => (IconKind::DesktopCapture, false),
        "Window Capture" => (IconKind::WindowCapture, false),
        "Game Capture" => (IconKind::GameCapture, false),
        "Video Capture" => (IconKind::Camera, true),
        "Text" => (IconKind::Text, false),
        "Media Source" => (IconKind::Media, true),
        "Browser" => (IconKind::Browser, false),
        _ => (IconKind::Default, false),
    }
}

type Subscriber = (SubscriptionId, SignalScope, SignalHandler);

/// Simulated compositing engine.
pub struct SimEngine {
    next_id: AtomicU64,
    /// Creation order
    sources: RwLock<Vec<Arc<SimSource>>>,
    subscribers: RwLock<Vec<Subscriber>>,
    samples: RwLock<HashMap<SourceId, MetricsSnapshot>>,
    preview: RwLock<Option<Weak<SimSource>>>,
    frame_interval: AtomicU64,
    profiling: AtomicBool,
    gpu_profiling: AtomicBool,
}

impl SimEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            sources: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            samples: RwLock::new(HashMap::new()),
            preview: RwLock::new(None),
            frame_interval: AtomicU64::new(DEFAULT_FRAME_INTERVAL_NS),
            profiling: AtomicBool::new(false),
            gpu_profiling: AtomicBool::new(false),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn create(
        &self,
        kind: SourceKind,
        name: Option<&str>,
        type_label: &str,
        private: bool,
        owner: Option<&Arc<SimSource>>,
    ) -> Arc<SimSource> {
        let (icon, async_video) = match kind {
            SourceKind::Scene => (IconKind::Scene, false),
            SourceKind::Group => (IconKind::Group, false),
            SourceKind::Filter => (IconKind::Filter, false),
            SourceKind::Transition => (IconKind::Default, false),
            SourceKind::Input => classify(type_label),
        };
        let source = Arc::new(SimSource {
            id: self.next_id(),
            kind,
            type_label: type_label.to_string(),
            private,
            async_video,
            icon,
            owner: owner.map(Arc::downgrade),
            state: RwLock::new(SourceState {
                name: name.map(str::to_string),
                enabled: true,
                ..Default::default()
            }),
        });
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&source));

        let mut signals = vec![EngineSignal::SourceCreated(weak_source(&source))];
        if let Some(owner) = owner {
            owner.write().filters.push(Arc::clone(&source));
            signals.push(EngineSignal::FilterAdded {
                source: owner.id,
                filter: weak_source(&source),
            });
        }
        self.dispatch(signals);
        source
    }

    pub fn add_scene(&self, name: &str) -> Arc<SimSource> {
        self.create(SourceKind::Scene, Some(name), "Scene", false, None)
    }

    pub fn add_group(&self, name: &str) -> Arc<SimSource> {
        self.create(SourceKind::Group, Some(name), "Group", false, None)
    }

    pub fn add_input(&self, name: &str, type_label: &str) -> Arc<SimSource> {
        self.create(SourceKind::Input, Some(name), type_label, false, None)
    }

    pub fn add_unnamed_input(&self, type_label: &str) -> Arc<SimSource> {
        self.create(SourceKind::Input, None, type_label, false, None)
    }

    pub fn add_private_input(&self, name: &str) -> Arc<SimSource> {
        self.create(SourceKind::Input, Some(name), "Private", true, None)
    }

    pub fn add_transition(&self, name: &str) -> Arc<SimSource> {
        self.create(SourceKind::Transition, Some(name), "Transition", false, None)
    }

    pub fn add_filter(&self, owner: &Arc<SimSource>, name: &str) -> Arc<SimSource> {
        self.create(SourceKind::Filter, Some(name), name, false, Some(owner))
    }

    /// Put `source` on top of `scene`. Returns the new item's id.
    pub fn add_item(&self, scene: &Arc<SimSource>, source: &Arc<SimSource>) -> ItemId {
        let item = Arc::new(SimItem {
            id: self.next_id(),
            source: Arc::clone(source),
            visible: AtomicBool::new(true),
        });
        let id = item.id;
        let weak: Weak<dyn SceneItem> = {
            let item: Arc<dyn SceneItem> = Arc::clone(&item) as Arc<dyn SceneItem>;
            Arc::downgrade(&item)
        };
        scene.write().items.push(item);
        self.dispatch(vec![EngineSignal::ItemAdded { scene: scene.id, item: weak }]);
        id
    }

    pub fn remove_item(&self, scene: &Arc<SimSource>, item: ItemId) {
        let removed = {
            let mut state = scene.write();
            let before = state.items.len();
            state.items.retain(|i| i.id != item);
            before != state.items.len()
        };
        if removed {
            self.dispatch(vec![EngineSignal::ItemRemoved { scene: scene.id, item }]);
        }
    }

    pub fn set_item_visible(&self, scene: &Arc<SimSource>, item: ItemId, visible: bool) {
        let found = scene.read().items.iter().find(|i| i.id == item).map(Arc::clone);
        if let Some(found) = found {
            found.visible.store(visible, Ordering::Release);
            self.dispatch(vec![EngineSignal::ItemVisibility { scene: scene.id, item, visible }]);
        }
    }

    /// Delete a source the way the engine does: members and filter links go first
    pub fn remove_source(&self, id: SourceId) {
        if let Some(mut signals) = self.detach(id) {
            signals.push(EngineSignal::SourceRemoved(id));
            self.dispatch(signals);
        }
    }

    /// Drop every engine reference to a source without telling anyone
    pub fn forget_source(&self, id: SourceId) {
        self.detach(id);
    }

    /// Unlink a source from the graph. Returns the item/filter signals to emit.
    fn detach(&self, id: SourceId) -> Option<Vec<EngineSignal>> {
        let removed = {
            let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
            let pos = sources.iter().position(|s| s.id == id)?;
            sources.remove(pos)
        };

        let mut signals = Vec::new();
        let containers: Vec<Arc<SimSource>> = self
            .sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.kind.has_items())
            .cloned()
            .collect();
        for scene in containers {
            scene.write().items.retain(|item| {
                if item.source.id == id {
                    signals.push(EngineSignal::ItemRemoved { scene: scene.id, item: item.id });
                    false
                } else {
                    true
                }
            });
        }

        if let Some(owner) = removed.owner.as_ref().and_then(Weak::upgrade) {
            owner.write().filters.retain(|f| f.id != id);
            signals.push(EngineSignal::FilterRemoved { source: owner.id, filter: id });
        }

        // Filters die with their owner
        let filters = std::mem::take(&mut removed.write().filters);
        let filter_ids: Vec<SourceId> = filters.iter().map(|f| f.id).collect();
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| !filter_ids.contains(&s.id));

        let mut samples = self.samples.write().unwrap_or_else(|e| e.into_inner());
        samples.remove(&id);
        for filter in &filter_ids {
            samples.remove(filter);
        }
        Some(signals)
    }

    /// Toggle program activity; emits activate/deactivate on change
    pub fn set_active(&self, source: &Arc<SimSource>, active: bool) {
        let changed = {
            let mut state = source.write();
            let changed = state.active != active;
            state.active = active;
            changed
        };
        if !changed {
            return;
        }
        let signal = if active {
            EngineSignal::SourceActivated(weak_source(source))
        } else {
            EngineSignal::SourceDeactivated(source.id)
        };
        self.dispatch(vec![signal]);
    }

    pub fn set_showing(&self, source: &Arc<SimSource>, showing: bool) {
        source.write().showing = showing;
    }

    pub fn set_enabled(&self, source: &Arc<SimSource>, enabled: bool) {
        source.write().enabled = enabled;
    }

    pub fn rename(&self, source: &Arc<SimSource>, name: &str) {
        source.write().name = Some(name.to_string());
    }

    pub fn set_transition_leg(&self, transition: &Arc<SimSource>, leg: Option<&Arc<SimSource>>) {
        transition.write().leg = leg.map(Arc::downgrade);
    }

    pub fn set_preview(&self, scene: Option<&Arc<SimSource>>) {
        *self.preview.write().unwrap_or_else(|e| e.into_inner()) = scene.map(Arc::downgrade);
    }

    pub fn set_sample(&self, source: SourceId, sample: MetricsSnapshot) {
        self.samples
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(source, sample);
    }

    pub fn clear_sample(&self, source: SourceId) {
        self.samples.write().unwrap_or_else(|e| e.into_inner()).remove(&source);
    }

    pub fn set_frame_interval_ns(&self, ns: u64) {
        self.frame_interval.store(ns, Ordering::Relaxed);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    pub fn is_gpu_profiling(&self) -> bool {
        self.gpu_profiling.load(Ordering::Relaxed)
    }

    pub fn find(&self, name: &str) -> Option<Arc<SimSource>> {
        self.sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|s| s.read().name.as_deref() == Some(name))
            .cloned()
    }

    fn dispatch(&self, signals: Vec<EngineSignal>) {
        for signal in signals {
            let scope = signal.scope();
            let handlers: Vec<SignalHandler> = self
                .subscribers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .filter(|(_, s, _)| *s == scope)
                .map(|(_, _, h)| Arc::clone(h))
                .collect();
            for handler in handlers {
                handler(&signal);
            }
        }
    }
}

impl Engine for SimEngine {
    fn scenes(&self) -> Vec<Arc<dyn Source>> {
        self.sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.kind == SourceKind::Scene)
            .map(|s| Arc::clone(s) as Arc<dyn Source>)
            .collect()
    }

    fn all_sources(&self) -> Vec<Arc<dyn Source>> {
        self.sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn Source>)
            .collect()
    }

    fn preview_scene(&self) -> Option<Arc<dyn Source>> {
        let preview = self.preview.read().unwrap_or_else(|e| e.into_inner()).as_ref()?.upgrade()?;
        Some(preview as Arc<dyn Source>)
    }

    fn sample(&self, source: &dyn Source) -> Option<MetricsSnapshot> {
        self.samples
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&source.id())
            .copied()
    }

    fn frame_interval_ns(&self) -> u64 {
        self.frame_interval.load(Ordering::Relaxed)
    }

    fn subscribe(&self, scope: SignalScope, handler: SignalHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, scope, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(sub, _, _)| *sub != id);
    }

    fn set_profiling(&self, enabled: bool, gpu: bool) {
        self.profiling.store(enabled, Ordering::Relaxed);
        self.gpu_profiling.store(enabled && gpu, Ordering::Relaxed);
    }
}

// ========== Demo ==========

fn ms(value: f64) -> u64 {
    (value * 1_000_000.0) as u64
}

fn timing(tick: f64, render: f64) -> MetricsSnapshot {
    MetricsSnapshot {
        tick_avg: ms(tick),
        tick_max: ms(tick * 1.8),
        render_avg: ms(render),
        render_max: ms(render * 2.2),
        render_sum: ms(render * 60.0),
        gpu_render_avg: ms(render * 0.6),
        gpu_render_max: ms(render * 1.4),
        gpu_render_sum: ms(render * 36.0),
        ..MetricsSnapshot::zero()
    }
}

/// Small scene collection with a bit of everything
pub fn demo_engine() -> Arc<SimEngine> {
    let engine = SimEngine::new();

    let main = engine.add_scene("Main");
    let brb = engine.add_scene("Be Right Back");
    let overlay = engine.add_scene("Overlay");

    let camera = engine.add_input("Camera", "Video Capture");
    let screen = engine.add_input("Screen", "Display Capture");
    let mic = engine.add_input("Mic", "Audio Input Capture");
    let title = engine.add_input("Title", "Text");
    let logo = engine.add_input("Logo", "Image");
    let still = engine.add_input("Still", "Image");
    let clip = engine.add_input("Intro Clip", "Media Source");
    engine.add_unnamed_input("Color");

    let correction = engine.add_filter(&camera, "Color Correction");
    let sharpen = engine.add_filter(&camera, "Sharpen");
    let chroma = engine.add_filter(&screen, "Crop/Pad");

    let lower_third = engine.add_group("Lower Third");
    engine.add_item(&lower_third, &logo);
    engine.add_item(&lower_third, &title);

    engine.add_item(&overlay, &lower_third);
    engine.add_item(&main, &screen);
    engine.add_item(&main, &camera);
    engine.add_item(&main, &mic);
    engine.add_item(&main, &overlay);
    engine.add_item(&brb, &still);
    engine.add_item(&brb, &clip);
    engine.add_item(&brb, &overlay);

    let fade = engine.add_transition("Fade");
    engine.set_transition_leg(&fade, Some(&main));

    for source in [&main, &overlay, &lower_third, &camera, &screen, &mic, &title, &logo, &fade] {
        engine.set_active(source, true);
        engine.set_showing(source, true);
    }
    for filter in [&correction, &sharpen, &chroma] {
        engine.set_showing(filter, true);
    }
    engine.set_preview(Some(&brb));
    engine.set_showing(&brb, true);
    engine.set_showing(&still, true);

    engine.set_sample(main.id(), timing(0.02, 0.10));
    engine.set_sample(overlay.id(), timing(0.01, 0.05));
    engine.set_sample(lower_third.id(), timing(0.01, 0.04));
    engine.set_sample(screen.id(), timing(0.30, 2.10));
    engine.set_sample(mic.id(), timing(0.05, 0.0));
    engine.set_sample(title.id(), timing(0.12, 0.35));
    engine.set_sample(logo.id(), timing(0.01, 0.08));
    engine.set_sample(still.id(), timing(0.01, 0.07));
    engine.set_sample(correction.id(), timing(0.02, 1.40));
    engine.set_sample(sharpen.id(), timing(0.02, 0.90));
    engine.set_sample(chroma.id(), timing(0.01, 0.20));
    engine.set_sample(
        camera.id(),
        MetricsSnapshot {
            async_input_fps: 29.97,
            async_input_best: ms(31.0),
            async_input_worst: ms(36.5),
            async_rendered_fps: 29.97,
            async_rendered_best: ms(32.0),
            async_rendered_worst: ms(40.1),
            ..timing(0.40, 0.60)
        },
    );
    engine.set_sample(
        clip.id(),
        MetricsSnapshot {
            async_input_fps: 24.0,
            async_input_best: ms(41.2),
            async_input_worst: ms(45.0),
            ..timing(0.25, 0.0)
        },
    );
    engine
}

/// Scale every demo sample a little so successive passes differ
pub fn perturb(engine: &SimEngine, pass: u64) {
    let factor = 1.0 + 0.15 * ((pass % 4) as f64);
    let mut samples = engine.samples.write().unwrap_or_else(|e| e.into_inner());
    for sample in samples.values_mut() {
        let scale = |v: u64| ((v as f64) * factor / (1.0 + 0.15 * (((pass + 3) % 4) as f64))) as u64;
        sample.tick_avg = scale(sample.tick_avg);
        sample.render_avg = scale(sample.render_avg);
        sample.gpu_render_avg = scale(sample.gpu_render_avg);
    }
}
