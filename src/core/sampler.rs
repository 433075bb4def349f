//! Periodic sampler - refreshes metrics and flags for every mirrored node.
//!
//! One pass:
//! 1. drain queued structural edits from the [`Synchronizer`]
//! 2. post-order walk of the tree, pulling a fresh sample per node and
//!    folding children into parents
//! 3. emit [`NodeChangedEvent`] for nodes whose stored values changed
//!
//! Events are collected under the tree lock and emitted after it is
//! released. A node whose engine handle went stale is zeroed, skipped (with
//! its subtree) and queued for disposal on the next pass.

use anyhow::Context;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, trace};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::{Engine, MetricsSnapshot, MirrorTree, NodeFlags, NodeId};

use super::event_bus::EventBus;
use super::synchronizer::Synchronizer;
use super::tree_events::{EventBatch, NodeChangedEvent};

/// Shortest allowed refresh interval
pub const MIN_INTERVAL_MS: u64 = 500;
/// Longest allowed refresh interval
pub const MAX_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_INTERVAL_MS: u64 = 1_000;

/// Clamp a requested refresh interval to the supported range
pub fn clamp_interval(ms: u64) -> u64 {
    ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS)
}

/// Outcome of one sampling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleStats {
    /// Nodes looked at (root excluded)
    pub visited: usize,
    /// Nodes whose stored values changed
    pub changed: usize,
    /// Nodes found with a dead engine handle
    pub stale: usize,
    /// Structural edits applied before the walk
    pub applied: usize,
}

/// Walks the mirror tree and refreshes it from the engine.
#[derive(Clone)]
pub struct Sampler {
    engine: Arc<dyn Engine>,
    tree: Arc<Mutex<MirrorTree>>,
    sync: Arc<Synchronizer>,
    events: EventBus,
    frame_interval: Arc<AtomicU64>,
}

impl Sampler {
    pub fn new(
        engine: Arc<dyn Engine>,
        tree: Arc<Mutex<MirrorTree>>,
        sync: Arc<Synchronizer>,
        events: EventBus,
        frame_interval: Arc<AtomicU64>,
    ) -> Self {
        Self {
            engine,
            tree,
            sync,
            events,
            frame_interval,
        }
    }

    /// Run one pass. `None` if a rebuild is in progress.
    pub fn tick(&self) -> Option<SampleStats> {
        if self.sync.is_rebuilding() {
            trace!("Sampler: rebuild in progress, skipping pass");
            return None;
        }
        let start = Instant::now();
        self.frame_interval
            .store(self.engine.frame_interval_ns(), Ordering::Relaxed);

        let mut batch = EventBatch::new();
        let stats = {
            let Some(mut tree) = self.lock_for_pass() else {
                trace!("Sampler: tree held by a rebuild, skipping pass");
                return None;
            };
            let mut stats = SampleStats {
                applied: self.sync.apply_pending(&mut tree, &mut batch),
                ..Default::default()
            };
            let root = tree.root();
            let top: Vec<NodeId> = tree.children(root).to_vec();
            for child in top {
                self.visit(&mut tree, child, None, &mut stats, &mut batch);
            }
            stats
        };
        batch.flush(&self.events);

        trace!(
            "Sampler pass: {} nodes, {} changed, {} stale, {} edits in {:?}",
            stats.visited,
            stats.changed,
            stats.stale,
            stats.applied,
            start.elapsed()
        );
        Some(stats)
    }

    /// Tree lock for one pass, or `None` when a rebuild holds it.
    ///
    /// Readers only hold the lock briefly, so those are waited out.
    fn lock_for_pass(&self) -> Option<MutexGuard<'_, MirrorTree>> {
        match self.tree.try_lock() {
            Ok(tree) => Some(tree),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => {
                if self.sync.is_rebuilding() {
                    return None;
                }
                let tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
                // A rebuild may have started while we waited
                if self.sync.is_rebuilding() {
                    return None;
                }
                Some(tree)
            }
        }
    }

    /// Refresh `id` after its children. Returns what it contributes to its parent.
    fn visit(
        &self,
        tree: &mut MirrorTree,
        id: NodeId,
        parent_rendered: Option<bool>,
        stats: &mut SampleStats,
        batch: &mut EventBatch,
    ) -> Option<(MetricsSnapshot, bool)> {
        let (source, item, is_filter) = {
            let node = tree.get(id)?;
            (node.upgrade_source(), node.upgrade_item(), node.is_filter())
        };
        stats.visited += 1;

        let Some(source) = source else {
            stats.stale += 1;
            if tree.get_mut(id).is_some_and(|n| n.degrade()) {
                self.changed(tree, id, batch);
            }
            self.sync.schedule_dispose(id);
            return None;
        };

        let enabled = match &item {
            Some(item) => item.visible(),
            None => source.enabled(),
        };
        let rendered = if is_filter {
            let upstream = match parent_rendered {
                Some(rendered) => rendered,
                None => source.filter_owner().is_some_and(|owner| owner.showing()),
            };
            upstream && enabled
        } else {
            source.showing()
        };
        let flags = NodeFlags {
            active: source.active(),
            rendered,
            enabled,
        };
        let own = self.engine.sample(source.as_ref()).unwrap_or_default();
        drop(item);
        drop(source);

        let children: Vec<NodeId> = tree.children(id).to_vec();
        let mut contributions = Vec::with_capacity(children.len());
        for child in children {
            if let Some(contribution) = self.visit(tree, child, Some(rendered), stats, batch) {
                contributions.push(contribution);
            }
        }
        let metrics = MetricsSnapshot::aggregate(own, contributions);

        if tree.get_mut(id).is_some_and(|n| n.update(metrics, flags)) {
            stats.changed += 1;
            self.changed(tree, id, batch);
        }
        Some((metrics, is_filter))
    }

    fn changed(&self, tree: &MirrorTree, id: NodeId, batch: &mut EventBatch) {
        if let Some(path) = tree.path_of(id) {
            batch.send(NodeChangedEvent { node: id, path });
        }
    }
}

/// Background thread running [`Sampler::tick`] on a fixed interval.
///
/// The interval is re-read every cycle, so changes apply from the next wait.
/// Dropping the handle stops and joins the thread.
pub struct SamplerThread {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Option<Sender<()>>,
}

impl SamplerThread {
    pub fn spawn(sampler: Sampler, interval_ms: Arc<AtomicU64>) -> anyhow::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("profview-sampler".into())
            .spawn(move || {
                debug!("Sampler thread started");
                loop {
                    let wait = Duration::from_millis(clamp_interval(interval_ms.load(Ordering::Relaxed)));
                    match shutdown_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            sampler.tick();
                        }
                        // Explicit stop or handle dropped
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Sampler thread stopped");
            })
            .context("Failed to spawn sampler thread")?;

        Ok(Self {
            handle: Some(handle),
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Interrupt the current wait and join
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Sampler thread panicked");
            }
        }
    }
}

impl Drop for SamplerThread {
    fn drop(&mut self) {
        self.stop();
    }
}
