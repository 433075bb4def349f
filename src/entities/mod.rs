//! Entities module - the mirrored graph and everything attached to its nodes.
//!
//! - `engine`: abstract interface of the compositing engine being observed
//! - `mirror`: local tree of mirrored nodes
//! - `metrics`: one profiler sample per node
//! - `columns`: what the viewer can show per node
//! - `view_mode`: which slice of the engine graph is mirrored

pub mod columns;
pub mod engine;
pub mod metrics;
pub mod mirror;
pub mod view_mode;

pub use columns::{CellValue, ColumnId, ColumnRegistry, ColumnSpec, ColumnType, Severity, ValueContext};
pub use engine::{
    Engine, EngineSignal, IconKind, ItemId, SceneItem, SignalHandler, SignalScope, Source, SourceId,
    SourceKind, SubscriptionId, WeakItem, WeakSource,
};
pub use metrics::{ns_to_ms, MetricsSnapshot};
pub use mirror::{MirrorNode, MirrorTree, NodeFlags, NodeId, NodeKind, Placement};
pub use view_mode::ViewMode;
