//! Mirror tree events for view updates.
//!
//! Paths are row indices from the root of the mirror tree (not of the
//! filtered/sorted view), captured at the moment the event was produced.
//! Consumers showing a filtered or sorted view resolve the event's node id
//! with `Profiler::view_path`.
//!
//! Producers collect events in an [`EventBatch`] while holding the tree lock
//! and flush after releasing it.

use crate::entities::{NodeId, ViewMode};

use super::event_bus::{BoxedEvent, Event, EventBus};

/// Node attributes or metrics changed during a sampling pass
#[derive(Clone, Debug)]
pub struct NodeChangedEvent {
    pub node: NodeId,
    pub path: Vec<usize>,
}

/// A node was inserted at `path`
#[derive(Clone, Debug)]
pub struct RowInsertedEvent {
    pub node: NodeId,
    pub path: Vec<usize>,
}

/// A node (and its subtree) was removed from `path`
#[derive(Clone, Debug)]
pub struct RowRemovedEvent {
    pub node: NodeId,
    pub path: Vec<usize>,
    /// Nodes destroyed, the node itself included
    pub count: usize,
}

/// The whole tree was rebuilt; views must re-read everything
#[derive(Clone, Debug)]
pub struct TreeResetEvent {
    pub mode: ViewMode,
    pub active_only: bool,
    /// Nodes in the new tree, root excluded
    pub nodes: usize,
}

/// Events held back until the tree lock is released
#[derive(Default)]
pub struct EventBatch {
    events: Vec<BoxedEvent>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push event to be dispatched
    pub fn send<E: Event>(&mut self, event: E) {
        self.events.push(Box::new(event));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn append(&mut self, other: EventBatch) {
        self.events.extend(other.events);
    }

    /// Emit everything on `bus`, in order
    pub fn flush(self, bus: &EventBus) -> usize {
        let count = self.events.len();
        for event in self.events {
            bus.emit_boxed(event);
        }
        count
    }
}
