//! Core modules - everything that keeps the mirror tree alive and current.
//!
//! - `synchronizer`: engine signals -> tree structure
//! - `sampler`: periodic metric refresh and aggregation
//! - `view`: filter/sort projection
//! - `profiler`: facade tying the above together
//!
//! Independent of any presentation layer; consumers read through
//! [`Profiler`] and listen on its [`EventBus`].

pub mod event_bus;
pub mod profiler;
pub mod sampler;
pub mod synchronizer;
pub mod tree_events;
pub mod view;

// Re-exports for convenience
pub use event_bus::{downcast_event, BoxedEvent, EventBus};
pub use profiler::Profiler;
pub use sampler::{SampleStats, Sampler, SamplerThread};
pub use synchronizer::{SyncMessage, Synchronizer};
pub use tree_events::{EventBatch, NodeChangedEvent, RowInsertedEvent, RowRemovedEvent, TreeResetEvent};
pub use view::{ProjectedRow, Projection, SortKey, SortOrder, ViewState};
