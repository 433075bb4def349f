//! Abstract engine interface for dependency inversion.
//!
//! The compositing engine owns every source, scene item and filter. The
//! profiler only ever holds `Weak` references to them and upgrades for the
//! duration of a single read, so a handle can go stale at any moment.
//!
//! Implementations live outside this crate (or in [`crate::sim`] for tests
//! and the demo binary).

use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::metrics::MetricsSnapshot;

/// Engine-assigned source identity, stable for the source's lifetime
pub type SourceId = u64;

/// Engine-assigned scene item identity
pub type ItemId = u64;

/// Weak handle to an engine source
pub type WeakSource = Weak<dyn Source>;

/// Weak handle to an engine scene item
pub type WeakItem = Weak<dyn SceneItem>;

/// What a source is, from the engine's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Input,
    Filter,
    Transition,
    Scene,
    Group,
}

impl SourceKind {
    /// Scenes and groups both carry scene items
    pub fn has_items(&self) -> bool {
        matches!(self, SourceKind::Scene | SourceKind::Group)
    }
}

/// Icon category reported by the engine, cached for the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IconKind {
    #[default]
    Default,
    Scene,
    Group,
    Filter,
    Image,
    Color,
    Slideshow,
    AudioInput,
    AudioOutput,
    DesktopCapture,
    WindowCapture,
    GameCapture,
    Camera,
    Text,
    Media,
    Browser,
    ProcessAudioOutput,
}

/// A live engine source (input, filter, transition, scene or group).
pub trait Source: Send + Sync {
    fn id(&self) -> SourceId;

    /// Display name. `None` for unnamed sources.
    fn name(&self) -> Option<String>;

    /// Human readable type ("Image", "Color Correction", ...)
    fn type_label(&self) -> String;

    fn kind(&self) -> SourceKind;

    /// Private sources are engine internals and never listed as roots
    fn is_private(&self) -> bool {
        false
    }

    /// Source delivers asynchronous video frames (cameras, media)
    fn is_async_video(&self) -> bool {
        false
    }

    fn icon(&self) -> IconKind {
        IconKind::Default
    }

    /// User toggle state
    fn enabled(&self) -> bool;

    /// Participating in program output
    fn active(&self) -> bool;

    /// Currently showing anywhere (program, preview, projector)
    fn showing(&self) -> bool;

    /// Scene items in engine order, bottom-most first. Empty unless scene or group.
    fn items(&self) -> Vec<Arc<dyn SceneItem>> {
        Vec::new()
    }

    /// Attached filters in chain order
    fn filters(&self) -> Vec<Arc<dyn Source>> {
        Vec::new()
    }

    /// Source a filter is attached to
    fn filter_owner(&self) -> Option<Arc<dyn Source>> {
        None
    }

    /// Currently active leg of a transition
    fn transition_active_source(&self) -> Option<Arc<dyn Source>> {
        None
    }
}

/// Membership of a source inside a scene or group.
pub trait SceneItem: Send + Sync {
    fn id(&self) -> ItemId;

    fn source(&self) -> Option<Arc<dyn Source>>;

    /// Item visibility, independent of the source's enabled flag
    fn visible(&self) -> bool;
}

/// Structural notification delivered by the engine.
///
/// Global signals (created/removed/activated/deactivated) arrive on
/// [`SignalScope::Global`] subscriptions; item and filter signals only on the
/// subscription scoped to the affected scene or source.
#[derive(Debug, Clone)]
pub enum EngineSignal {
    SourceCreated(WeakSource),
    SourceRemoved(SourceId),
    SourceActivated(WeakSource),
    SourceDeactivated(SourceId),
    ItemAdded { scene: SourceId, item: WeakItem },
    ItemRemoved { scene: SourceId, item: ItemId },
    ItemVisibility { scene: SourceId, item: ItemId, visible: bool },
    FilterAdded { source: SourceId, filter: WeakSource },
    FilterRemoved { source: SourceId, filter: SourceId },
}

impl EngineSignal {
    /// Scope this signal is delivered on
    pub fn scope(&self) -> SignalScope {
        match self {
            EngineSignal::SourceCreated(_)
            | EngineSignal::SourceRemoved(_)
            | EngineSignal::SourceActivated(_)
            | EngineSignal::SourceDeactivated(_) => SignalScope::Global,
            EngineSignal::ItemAdded { scene, .. }
            | EngineSignal::ItemRemoved { scene, .. }
            | EngineSignal::ItemVisibility { scene, .. } => SignalScope::Source(*scene),
            EngineSignal::FilterAdded { source, .. } | EngineSignal::FilterRemoved { source, .. } => {
                SignalScope::Source(*source)
            }
        }
    }
}

/// Subscription scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalScope {
    Global,
    Source(SourceId),
}

/// Handle returned by [`Engine::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Signal callback. May be invoked on any engine thread.
pub type SignalHandler = Arc<dyn Fn(&EngineSignal) + Send + Sync>;

/// Abstract compositing engine.
///
/// Enumeration returns strong handles for the duration of the call only;
/// callers downgrade before storing.
pub trait Engine: Send + Sync {
    /// Top-level scenes (groups excluded)
    fn scenes(&self) -> Vec<Arc<dyn Source>>;

    /// Every source, filters and private sources included
    fn all_sources(&self) -> Vec<Arc<dyn Source>>;

    /// Scene in preview when studio mode is on and it differs from program
    fn preview_scene(&self) -> Option<Arc<dyn Source>> {
        None
    }

    /// Latest profiler result for a source. `None` if the profiler has no data.
    fn sample(&self, source: &dyn Source) -> Option<MetricsSnapshot>;

    /// Target frame interval in nanoseconds
    fn frame_interval_ns(&self) -> u64;

    fn subscribe(&self, scope: SignalScope, handler: SignalHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// Switch per-source profiling on or off
    fn set_profiling(&self, _enabled: bool, _gpu: bool) {}
}
