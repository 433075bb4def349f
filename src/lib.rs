//! profview - live per-source performance viewer for compositing engines.
//!
//! Mirrors an engine's scene/source/filter/transition graph into a local
//! tree, keeps it in sync from engine signals, samples per-node profiler
//! counters on a background thread and exposes a filtered, sorted view.

// Core (sync, sampling, view)
pub mod core;

// Graph model and engine interface
pub mod entities;

// App modules
pub mod cli;
pub mod config;
pub mod paths;
pub mod sim;

// Re-export commonly used types
pub use crate::core::{downcast_event, BoxedEvent, EventBus, NodeChangedEvent, Profiler, SortOrder, TreeResetEvent};
pub use crate::config::ProfilerSettings;
pub use crate::entities::{CellValue, ColumnId, Engine, MetricsSnapshot, MirrorTree, SceneItem, Source, ViewMode};
