//! Graph synchronizer - keeps the mirror tree in step with the engine.
//!
//! Engine callbacks never touch the tree. They post a [`SyncMessage`] on a
//! channel and return; whoever holds the tree lock drains the channel with
//! [`Synchronizer::apply_pending`]. Node disposal therefore always happens
//! outside the engine's own signal dispatch.
//!
//! While a full rebuild runs, incoming signals are dropped: the rebuild
//! enumerates the engine afresh and already reflects them.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::entities::{
    Engine, EngineSignal, ItemId, MirrorNode, MirrorTree, NodeId, Placement, SceneItem, SignalHandler,
    SignalScope, Source, SourceId, SourceKind, SubscriptionId, ViewMode, WeakItem, WeakSource,
};

use super::tree_events::{EventBatch, NodeChangedEvent, RowInsertedEvent, RowRemovedEvent, TreeResetEvent};

/// Deferred structural edit, applied by the tree owner
#[derive(Debug, Clone)]
pub enum SyncMessage {
    SourceCreated(WeakSource),
    SourceRemoved(SourceId),
    SourceActivated(WeakSource),
    SourceDeactivated(SourceId),
    ItemAdded { parent: NodeId, item: WeakItem },
    ItemRemoved { parent: NodeId, item: ItemId },
    ItemVisibility { parent: NodeId, item: ItemId, visible: bool },
    FilterAdded { parent: NodeId, filter: WeakSource },
    FilterRemoved { parent: NodeId, filter: SourceId },
    /// Node's engine handle went stale
    Dispose(NodeId),
}

/// Which part of the engine graph is mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Projection {
    pub mode: ViewMode,
    pub active_only: bool,
}

/// Translates engine signals into tree edits.
pub struct Synchronizer {
    engine: Arc<dyn Engine>,
    sender: Sender<SyncMessage>,
    receiver: Receiver<SyncMessage>,
    rebuilding: Arc<AtomicBool>,
    projection: RwLock<Projection>,
    global_subs: Mutex<Vec<SubscriptionId>>,
}

impl Synchronizer {
    pub fn new(engine: Arc<dyn Engine>, projection: Projection) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            engine,
            sender,
            receiver,
            rebuilding: Arc::new(AtomicBool::new(false)),
            projection: RwLock::new(projection),
            global_subs: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to engine-wide create/remove/activate/deactivate signals
    pub fn attach(&self) {
        let mut subs = self.global_subs.lock().unwrap_or_else(|e| e.into_inner());
        if !subs.is_empty() {
            return;
        }

        let sender = self.sender.clone();
        let rebuilding = Arc::clone(&self.rebuilding);
        let handler: SignalHandler = Arc::new(move |signal: &EngineSignal| {
            if rebuilding.load(Ordering::Acquire) {
                trace!("Dropping {:?} during rebuild", signal);
                return;
            }
            let msg = match signal {
                EngineSignal::SourceCreated(source) => SyncMessage::SourceCreated(source.clone()),
                EngineSignal::SourceRemoved(id) => SyncMessage::SourceRemoved(*id),
                EngineSignal::SourceActivated(source) => SyncMessage::SourceActivated(source.clone()),
                EngineSignal::SourceDeactivated(id) => SyncMessage::SourceDeactivated(*id),
                _ => return,
            };
            // Receiver lives as long as the synchronizer; a failed send means shutdown
            let _ = sender.send(msg);
        });
        subs.push(self.engine.subscribe(SignalScope::Global, handler));
        debug!("Synchronizer attached to engine signals");
    }

    /// Drop engine-wide subscriptions
    pub fn detach(&self) {
        let subs = std::mem::take(&mut *self.global_subs.lock().unwrap_or_else(|e| e.into_inner()));
        for sub in subs {
            self.engine.unsubscribe(sub);
        }
    }

    pub fn projection(&self) -> Projection {
        *self.projection.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the projection. Takes effect on the next [`rebuild`](Self::rebuild).
    pub fn set_projection(&self, projection: Projection) {
        *self.projection.write().unwrap_or_else(|e| e.into_inner()) = projection;
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }

    /// Queue a node for disposal on the next drain
    pub fn schedule_dispose(&self, id: NodeId) {
        let _ = self.sender.send(SyncMessage::Dispose(id));
    }

    /// Messages waiting to be applied
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Raise the rebuilding guard. `None` if a rebuild is already running.
    ///
    /// Callers that lock the tree themselves take the guard first, so the
    /// sampler skips its pass instead of queueing on the lock.
    pub fn begin_rebuild(&self) -> Option<RebuildGuard<'_>> {
        if self.rebuilding.swap(true, Ordering::AcqRel) {
            debug!("Rebuild already in progress, skipping");
            return None;
        }
        Some(RebuildGuard {
            flag: self.rebuilding.as_ref(),
        })
    }

    /// Tear the tree down and enumerate the engine again
    pub fn rebuild(&self, tree: &mut MirrorTree, batch: &mut EventBatch) {
        if let Some(guard) = self.begin_rebuild() {
            self.rebuild_with(guard, tree, batch);
        }
    }

    /// [`rebuild`](Self::rebuild) under a guard taken before the tree lock
    pub fn rebuild_with(&self, guard: RebuildGuard<'_>, tree: &mut MirrorTree, batch: &mut EventBatch) {
        // Queued edits refer to the old tree or are covered by the new enumeration
        let stale = self.receiver.try_iter().count();
        let removed = tree.clear(|node| self.release(node));

        let projection = self.projection();
        self.enumerate(tree, projection);
        drop(guard);

        let nodes = tree.len() - 1;
        debug!(
            "Rebuilt mirror ({}, active_only={}): removed {}, mirrored {}, dropped {} stale messages",
            projection.mode, projection.active_only, removed, nodes, stale
        );
        batch.send(TreeResetEvent {
            mode: projection.mode,
            active_only: projection.active_only,
            nodes,
        });
    }

    /// Remove every node and release its subscriptions
    pub fn teardown(&self, tree: &mut MirrorTree) -> usize {
        let _ = self.receiver.try_iter().count();
        tree.clear(|node| self.release(node))
    }

    /// Apply queued messages. Returns the number applied.
    pub fn apply_pending(&self, tree: &mut MirrorTree, batch: &mut EventBatch) -> usize {
        if self.is_rebuilding() {
            return 0;
        }
        let projection = self.projection();
        let mut applied = 0;
        while let Ok(msg) = self.receiver.try_recv() {
            self.apply(tree, msg, projection, batch);
            applied += 1;
        }
        if applied > 0 {
            trace!("Applied {} sync messages", applied);
        }
        applied
    }

    fn apply(&self, tree: &mut MirrorTree, msg: SyncMessage, projection: Projection, batch: &mut EventBatch) {
        match msg {
            SyncMessage::SourceCreated(source) => {
                let Some(source) = source.upgrade() else {
                    trace!("Created source vanished before it was mirrored");
                    return;
                };
                self.insert_root(tree, &source, projection, batch);
            }
            SyncMessage::SourceRemoved(id) => {
                for node in tree.find_by_source(id) {
                    // May already be gone with an ancestor
                    if tree.contains(node) {
                        self.remove_node(tree, node, batch);
                    }
                }
            }
            SyncMessage::SourceActivated(source) => {
                // Without active-only the sampler picks the flag up on its next pass
                if !projection.active_only {
                    return;
                }
                let Some(source) = source.upgrade() else { return };
                self.insert_root(tree, &source, projection, batch);
                self.reconcile_members(tree, &source, projection, batch);
            }
            SyncMessage::SourceDeactivated(id) => {
                if !projection.active_only {
                    return;
                }
                for node in tree.find_by_source(id) {
                    if tree.contains(node) {
                        self.remove_node(tree, node, batch);
                    }
                }
            }
            // Only nodes with mirrored members take item edits. A nested scene
            // shown as a leaf is still watched for its filters.
            SyncMessage::ItemAdded { parent, item } => {
                if !is_expanded(tree, parent) {
                    return;
                }
                let Some(item) = item.upgrade() else { return };
                if tree.find_child_item(parent, item.id()).is_some() {
                    return;
                }
                if let Some(id) = self.mirror_item(tree, parent, &item, projection) {
                    self.inserted(tree, id, batch);
                }
            }
            SyncMessage::ItemRemoved { parent, item } => {
                if !is_expanded(tree, parent) {
                    return;
                }
                if let Some(child) = tree.find_child_item(parent, item) {
                    self.remove_node(tree, child, batch);
                }
            }
            SyncMessage::ItemVisibility { parent, item, visible } => {
                if !is_expanded(tree, parent) {
                    return;
                }
                let Some(child) = tree.find_child_item(parent, item) else { return };
                let changed = tree.get_mut(child).is_some_and(|n| n.set_item_visible(visible));
                if changed {
                    if let Some(path) = tree.path_of(child) {
                        batch.send(NodeChangedEvent { node: child, path });
                    }
                }
            }
            SyncMessage::FilterAdded { parent, filter } => {
                if !tree.contains(parent) || !projection.mode.descends() {
                    return;
                }
                let Some(filter) = filter.upgrade() else { return };
                if tree.find_child_source(parent, filter.id()).is_some() {
                    return;
                }
                if let Some(id) = self.mirror_filter(tree, parent, &filter, false) {
                    self.inserted(tree, id, batch);
                }
            }
            SyncMessage::FilterRemoved { parent, filter } => {
                if let Some(child) = tree.find_child_source(parent, filter) {
                    self.remove_node(tree, child, batch);
                }
            }
            SyncMessage::Dispose(id) => {
                if tree.contains(id) {
                    debug!("Disposing stale node {}", id);
                    self.remove_node(tree, id, batch);
                }
            }
        }
    }

    // ========== Enumeration ==========

    fn enumerate(&self, tree: &mut MirrorTree, projection: Projection) {
        let root = tree.root();
        match projection.mode {
            ViewMode::Scene | ViewMode::SceneNested => {
                let scenes: Vec<Arc<dyn Source>> = self
                    .engine
                    .scenes()
                    .into_iter()
                    .filter(|s| s.kind() == SourceKind::Scene)
                    .filter(|s| !projection.active_only || s.active())
                    .collect();

                // Nested scenes show up under their parent instead of at the top.
                // Only parents that get mirrored themselves count.
                let dedup = projection.mode.dedups_nested_scenes();
                let nested = if dedup {
                    nested_scene_ids(&scenes, projection.active_only)
                } else {
                    HashSet::new()
                };

                for scene in &scenes {
                    if nested.contains(&scene.id()) {
                        continue;
                    }
                    if dedup && tree.contains_source(scene.id()) {
                        continue;
                    }
                    self.mirror_source(tree, root, scene, Placement::Append, projection);
                }

                // Anything nested only under a parent that could not be expanded
                // (cycle, duplicate) would otherwise vanish
                if dedup {
                    for scene in scenes.iter().filter(|s| nested.contains(&s.id())) {
                        if !tree.contains_source(scene.id()) {
                            debug!("Nested scene {} has no mirrored parent, listing at top level", scene.id());
                            self.mirror_source(tree, root, scene, Placement::Append, projection);
                        }
                    }
                }

                // Studio mode: the previewed scene is listed even when not live
                if let Some(preview) = self.engine.preview_scene() {
                    if !tree.contains_source(preview.id()) {
                        trace!("Mirroring preview scene {}", preview.id());
                        self.mirror_source(tree, root, &preview, Placement::Append, projection);
                    }
                }
            }
            _ => {
                for source in self.engine.all_sources() {
                    if !projection.mode.accepts_root(source.as_ref()) {
                        continue;
                    }
                    if projection.active_only && !source.active() {
                        continue;
                    }
                    if source.kind() == SourceKind::Filter {
                        self.mirror_filter(tree, root, &source, projection.mode.qualifies_filters());
                    } else {
                        self.mirror_source(tree, root, &source, Placement::Append, projection);
                    }
                }
            }
        }
    }

    /// List `source` at the top level if the projection wants it there
    fn insert_root(&self, tree: &mut MirrorTree, source: &Arc<dyn Source>, projection: Projection, batch: &mut EventBatch) {
        if !projection.mode.accepts_root(source.as_ref()) {
            return;
        }
        if projection.active_only && !source.active() {
            return;
        }
        let root = tree.root();
        if tree.find_child_source(root, source.id()).is_some() {
            return;
        }
        if projection.mode.dedups_nested_scenes() && tree.contains_source(source.id()) {
            trace!("Source {} already mirrored, not listing at top level", source.id());
            return;
        }

        let id = if source.kind() == SourceKind::Filter {
            self.mirror_filter(tree, root, source, projection.mode.qualifies_filters())
        } else {
            self.mirror_source(tree, root, source, Placement::Append, projection)
        };
        if let Some(id) = id {
            self.inserted(tree, id, batch);
        }
    }

    /// Active-only: a source just went live, add it to every expanded scene that holds it
    fn reconcile_members(
        &self,
        tree: &mut MirrorTree,
        source: &Arc<dyn Source>,
        projection: Projection,
        batch: &mut EventBatch,
    ) {
        let expanded: Vec<(NodeId, Arc<dyn Source>)> = tree
            .depth_first(tree.root())
            .into_iter()
            .filter_map(|id| {
                let node = tree.get(id)?;
                if !node.is_expanded() {
                    return None;
                }
                Some((id, node.upgrade_source()?))
            })
            .collect();

        for (parent, scene) in expanded {
            for item in scene.items() {
                let holds = item.source().is_some_and(|s| s.id() == source.id());
                if !holds || tree.find_child_item(parent, item.id()).is_some() {
                    continue;
                }
                if let Some(id) = self.mirror_item(tree, parent, &item, projection) {
                    self.inserted(tree, id, batch);
                }
            }
        }
    }

    fn mirror_source(
        &self,
        tree: &mut MirrorTree,
        parent: NodeId,
        source: &Arc<dyn Source>,
        placement: Placement,
        projection: Projection,
    ) -> Option<NodeId> {
        let id = tree.insert(parent, MirrorNode::from_source(source), placement)?;
        self.expand(tree, id, source, source.kind().has_items(), projection);
        Some(id)
    }

    fn mirror_item(
        &self,
        tree: &mut MirrorTree,
        parent: NodeId,
        item: &Arc<dyn SceneItem>,
        projection: Projection,
    ) -> Option<NodeId> {
        let source = item.source()?;
        if projection.active_only && !source.active() {
            return None;
        }

        let kind = source.kind();
        if kind.has_items() && tree.ancestors_contain(parent, source.id()) {
            warn!("Scene {} contains itself, not expanding", source.id());
            return None;
        }
        let nested_scene = kind == SourceKind::Scene;
        if nested_scene && projection.mode.dedups_nested_scenes() && tree.contains_source(source.id()) {
            debug!("Nested scene {} already mirrored, skipping duplicate", source.id());
            return None;
        }

        let id = tree.prepend(parent, MirrorNode::from_item(item, &source))?;
        let members = kind == SourceKind::Group || (nested_scene && projection.mode.expands_nested_scenes());
        self.expand(tree, id, &source, members, projection);
        Some(id)
    }

    fn mirror_filter(&self, tree: &mut MirrorTree, parent: NodeId, filter: &Arc<dyn Source>, qualify: bool) -> Option<NodeId> {
        let mut node = MirrorNode::from_source(filter);
        if qualify {
            if let Some(owner) = filter.filter_owner() {
                let owner_name = owner.name().unwrap_or_else(|| crate::entities::mirror::NO_NAME.to_string());
                let label = format!("{} / {}", owner_name, node.name());
                node = node.with_name(label);
            }
        }
        tree.append(parent, node)
    }

    /// Subscribe to the node's scoped signals and mirror what hangs below it
    fn expand(&self, tree: &mut MirrorTree, id: NodeId, source: &Arc<dyn Source>, members: bool, projection: Projection) {
        let descends = projection.mode.descends();
        if members || descends {
            self.watch(tree, id, source);
        }

        if members {
            if let Some(node) = tree.get_mut(id) {
                node.set_expanded(true);
            }
            // Engine order is bottom-first; prepending leaves the top item first
            for item in source.items() {
                self.mirror_item(tree, id, &item, projection);
            }
        }

        if !descends {
            return;
        }

        for filter in source.filters() {
            self.mirror_filter(tree, id, &filter, false);
        }

        if source.kind() == SourceKind::Transition {
            if let Some(leg) = source.transition_active_source() {
                if !tree.ancestors_contain(id, leg.id()) {
                    self.mirror_source(tree, id, &leg, Placement::Append, projection);
                }
            }
        }
    }

    fn watch(&self, tree: &mut MirrorTree, id: NodeId, source: &Arc<dyn Source>) {
        let sender = self.sender.clone();
        let rebuilding = Arc::clone(&self.rebuilding);
        let handler: SignalHandler = Arc::new(move |signal: &EngineSignal| {
            if rebuilding.load(Ordering::Acquire) {
                return;
            }
            let msg = match signal {
                EngineSignal::ItemAdded { item, .. } => SyncMessage::ItemAdded { parent: id, item: item.clone() },
                EngineSignal::ItemRemoved { item, .. } => SyncMessage::ItemRemoved { parent: id, item: *item },
                EngineSignal::ItemVisibility { item, visible, .. } => SyncMessage::ItemVisibility {
                    parent: id,
                    item: *item,
                    visible: *visible,
                },
                EngineSignal::FilterAdded { filter, .. } => SyncMessage::FilterAdded {
                    parent: id,
                    filter: filter.clone(),
                },
                EngineSignal::FilterRemoved { filter, .. } => SyncMessage::FilterRemoved {
                    parent: id,
                    filter: *filter,
                },
                _ => return,
            };
            let _ = sender.send(msg);
        });

        let sub = self.engine.subscribe(SignalScope::Source(source.id()), handler);
        match tree.get_mut(id) {
            Some(node) => node.add_subscription(sub),
            None => self.engine.unsubscribe(sub),
        }
    }

    // ========== Removal ==========

    fn release(&self, node: &mut MirrorNode) {
        for sub in node.take_subscriptions() {
            self.engine.unsubscribe(sub);
        }
    }

    fn remove_node(&self, tree: &mut MirrorTree, id: NodeId, batch: &mut EventBatch) {
        let Some(path) = tree.path_of(id) else { return };
        let count = tree.remove(id, |node| self.release(node));
        if count > 0 {
            batch.send(RowRemovedEvent { node: id, path, count });
        }
    }

    fn inserted(&self, tree: &MirrorTree, id: NodeId, batch: &mut EventBatch) {
        if let Some(path) = tree.path_of(id) {
            batch.send(RowInsertedEvent { node: id, path });
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Guard for a rebuild in progress; dropping it lowers the flag.
pub struct RebuildGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn is_expanded(tree: &MirrorTree, id: NodeId) -> bool {
    tree.get(id).is_some_and(|node| node.is_expanded())
}

/// Scenes used as members of `scenes` (directly or through groups).
///
/// With `active_only`, inactive members are not mirrored, so they neither
/// count as nested nor lead into their own members.
fn nested_scene_ids(scenes: &[Arc<dyn Source>], active_only: bool) -> HashSet<SourceId> {
    let mut nested = HashSet::new();
    for scene in scenes {
        let mut visited = HashSet::new();
        let mut stack: Vec<Arc<dyn SceneItem>> = scene.items();
        while let Some(item) = stack.pop() {
            let Some(source) = item.source() else { continue };
            if active_only && !source.active() {
                continue;
            }
            match source.kind() {
                SourceKind::Scene => {
                    nested.insert(source.id());
                }
                SourceKind::Group => {
                    if visited.insert(source.id()) {
                        stack.extend(source.items());
                    }
                }
                _ => {}
            }
        }
    }
    nested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::{downcast_event, EventBus};
    use crate::sim::SimEngine;

    fn setup(engine: &Arc<SimEngine>, mode: ViewMode) -> (Synchronizer, MirrorTree) {
        let sync = Synchronizer::new(engine.clone(), Projection { mode, active_only: false });
        sync.attach();
        let mut tree = MirrorTree::new();
        sync.rebuild(&mut tree, &mut EventBatch::new());
        (sync, tree)
    }

    fn drain(sync: &Synchronizer, tree: &mut MirrorTree) -> Vec<crate::core::event_bus::BoxedEvent> {
        let bus = EventBus::new();
        let mut batch = EventBatch::new();
        sync.apply_pending(tree, &mut batch);
        batch.flush(&bus);
        bus.poll()
    }

    #[test]
    fn test_scene_mode_order_and_flat_nesting() {
        let engine = SimEngine::new();
        let main = engine.add_scene("Main");
        let inner = engine.add_scene("Inner");
        let cam = engine.add_input("Camera", "Video Capture");
        let text = engine.add_input("Title", "Text");
        engine.add_item(&inner, &text);
        engine.add_item(&main, &cam);
        engine.add_item(&main, &inner);
        engine.add_filter(&cam, "Crop");

        let (_sync, tree) = setup(&engine, ViewMode::Scene);
        // Top item first; nested scene is a leaf in flat mode; filters after members
        assert_eq!(tree.outline(), "Main\n  Inner\n  Camera\n    Crop\nInner\n  Title\n");
        assert!(tree.descendants_consistent());
    }

    #[test]
    fn test_switch_to_nested_mode() {
        let engine = SimEngine::new();
        let x = engine.add_scene("X");
        let y = engine.add_scene("Y");
        let z = engine.add_input("Z", "Image");
        engine.add_item(&y, &z);
        engine.add_item(&x, &y);

        let (sync, mut tree) = setup(&engine, ViewMode::Scene);
        assert_eq!(tree.outline(), "X\n  Y\nY\n  Z\n");

        sync.set_projection(Projection { mode: ViewMode::SceneNested, active_only: false });
        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.outline(), "X\n  Y\n    Z\n");
        assert_eq!(tree.find_by_source(y.id()).len(), 1);
        assert_eq!(tree.find_by_source(z.id()).len(), 1);
        let z_node = tree.find_by_source(z.id())[0];
        assert_eq!(tree.path_of(z_node), Some(vec![0, 0, 0]));
    }

    #[test]
    fn test_nested_mode_skips_second_occurrence() {
        let engine = SimEngine::new();
        let a = engine.add_scene("A");
        let b = engine.add_scene("B");
        let shared = engine.add_scene("Shared");
        let img = engine.add_input("Img", "Image");
        engine.add_item(&shared, &img);
        engine.add_item(&a, &shared);
        engine.add_item(&b, &shared);

        let (_sync, tree) = setup(&engine, ViewMode::SceneNested);
        assert_eq!(tree.outline(), "A\n  Shared\n    Img\nB\n");
    }

    #[test]
    fn test_groups_expand_in_flat_mode() {
        let engine = SimEngine::new();
        let scene = engine.add_scene("Scene");
        let group = engine.add_group("Group");
        let img = engine.add_input("Img", "Image");
        engine.add_item(&group, &img);
        engine.add_item(&scene, &group);

        let (_sync, tree) = setup(&engine, ViewMode::Scene);
        assert_eq!(tree.outline(), "Scene\n  Group\n    Img\n");
    }

    #[test]
    fn test_source_filter_transition_all_modes() {
        let engine = SimEngine::new();
        let scene = engine.add_scene("Scene");
        let cam = engine.add_input("Camera", "Video Capture");
        engine.add_private_input("Hidden");
        engine.add_filter(&cam, "Sharpen");
        engine.add_item(&scene, &cam);
        let fade = engine.add_transition("Fade");
        engine.set_transition_leg(&fade, Some(&scene));

        let (_s, tree) = setup(&engine, ViewMode::Source);
        assert_eq!(tree.outline(), "Camera\n  Sharpen\n");

        let (_s, tree) = setup(&engine, ViewMode::Filter);
        assert_eq!(tree.outline(), "Camera / Sharpen\n");

        let (_s, tree) = setup(&engine, ViewMode::Transition);
        assert_eq!(tree.outline(), "Fade\n  Scene\n    Camera\n      Sharpen\n");

        let (_s, tree) = setup(&engine, ViewMode::All);
        let roots: Vec<&str> = tree
            .children(tree.root())
            .iter()
            .map(|id| tree.get(*id).unwrap().name())
            .collect();
        assert_eq!(roots, vec!["Scene", "Camera", "Hidden", "Sharpen", "Fade"]);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let engine = SimEngine::new();
        let s = engine.add_scene("S");
        for name in ["a", "b", "c"] {
            let src = engine.add_input(name, "Color");
            engine.add_item(&s, &src);
            engine.add_filter(&src, "fx");
        }

        let (sync, mut tree) = setup(&engine, ViewMode::Scene);
        let first = tree.outline();
        let subs = engine.subscription_count();
        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.outline(), first);
        assert_eq!(engine.subscription_count(), subs);
        assert!(tree.descendants_consistent());
    }

    #[test]
    fn test_item_signals() {
        let engine = SimEngine::new();
        let scene = engine.add_scene("Scene");
        let a = engine.add_input("A", "Image");
        engine.add_item(&scene, &a);
        let (sync, mut tree) = setup(&engine, ViewMode::Scene);

        let b = engine.add_input("B", "Image");
        let item = engine.add_item(&scene, &b);
        let events = drain(&sync, &mut tree);
        // New member goes on top; B is not a scene so no root is added for it
        assert_eq!(tree.outline(), "Scene\n  B\n  A\n");
        assert!(events.iter().any(|e| downcast_event::<RowInsertedEvent>(e).is_some_and(|r| r.path == vec![0, 0])));

        engine.set_item_visible(&scene, item, false);
        let events = drain(&sync, &mut tree);
        let changed: Vec<&NodeChangedEvent> = events.iter().filter_map(downcast_event::<NodeChangedEvent>).collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].path, vec![0, 0]);

        engine.remove_item(&scene, item);
        drain(&sync, &mut tree);
        assert_eq!(tree.outline(), "Scene\n  A\n");
        assert!(tree.descendants_consistent());
    }

    #[test]
    fn test_flat_mode_leaf_scene_ignores_member_edits() {
        let engine = SimEngine::new();
        let x = engine.add_scene("X");
        let y = engine.add_scene("Y");
        engine.add_item(&x, &y);
        let (sync, mut tree) = setup(&engine, ViewMode::Scene);

        let z = engine.add_input("Z", "Image");
        let item = engine.add_item(&y, &z);
        drain(&sync, &mut tree);
        // Only the top-level Y shows its members
        assert_eq!(tree.outline(), "X\n  Y\nY\n  Z\n");
        assert!(tree.descendants_consistent());

        let incremental = tree.outline();
        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.outline(), incremental);

        engine.set_item_visible(&y, item, false);
        engine.remove_item(&y, item);
        drain(&sync, &mut tree);
        assert_eq!(tree.outline(), "X\n  Y\nY\n");
    }

    #[test]
    fn test_filter_signals_and_unsubscribe() {
        let engine = SimEngine::new();
        let scene = engine.add_scene("Scene");
        let a = engine.add_input("A", "Image");
        engine.add_item(&scene, &a);
        let (sync, mut tree) = setup(&engine, ViewMode::Scene);
        let before = engine.subscription_count();

        let blur = engine.add_filter(&a, "Blur");
        drain(&sync, &mut tree);
        assert_eq!(tree.outline(), "Scene\n  A\n    Blur\n");

        engine.remove_source(blur.id());
        drain(&sync, &mut tree);
        assert_eq!(tree.outline(), "Scene\n  A\n");

        // Removing the member drops the node and its scoped subscription
        engine.remove_source(a.id());
        drain(&sync, &mut tree);
        assert_eq!(tree.outline(), "Scene\n");
        assert_eq!(engine.subscription_count(), before - 1);
    }

    #[test]
    fn test_new_scene_listed_at_top_level() {
        let engine = SimEngine::new();
        engine.add_scene("One");
        let (sync, mut tree) = setup(&engine, ViewMode::Scene);

        engine.add_scene("Two");
        engine.add_input("Loose", "Image");
        drain(&sync, &mut tree);
        assert_eq!(tree.outline(), "One\nTwo\n");
    }

    #[test]
    fn test_signals_dropped_during_rebuild() {
        let engine = SimEngine::new();
        let (sync, mut tree) = setup(&engine, ViewMode::Scene);

        sync.rebuilding.store(true, Ordering::Release);
        engine.add_scene("Late");
        assert_eq!(sync.pending(), 0);
        assert_eq!(sync.apply_pending(&mut tree, &mut EventBatch::new()), 0);
        sync.rebuilding.store(false, Ordering::Release);

        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.outline(), "Late\n");
    }

    #[test]
    fn test_active_only() {
        let engine = SimEngine::new();
        let live = engine.add_scene("Live");
        let idle = engine.add_scene("Idle");
        let cam = engine.add_input("Cam", "Video Capture");
        engine.add_item(&live, &cam);
        engine.set_active(&live, true);
        engine.set_active(&cam, true);

        let sync = Synchronizer::new(engine.clone(), Projection { mode: ViewMode::Scene, active_only: true });
        sync.attach();
        let mut tree = MirrorTree::new();
        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.outline(), "Live\n  Cam\n");

        engine.set_active(&idle, true);
        drain(&sync, &mut tree);
        assert_eq!(tree.outline(), "Live\n  Cam\nIdle\n");

        engine.set_active(&cam, false);
        drain(&sync, &mut tree);
        assert_eq!(tree.outline(), "Live\nIdle\n");

        engine.set_active(&cam, true);
        drain(&sync, &mut tree);
        assert_eq!(tree.outline(), "Live\n  Cam\nIdle\n");
    }

    #[test]
    fn test_nested_active_only_under_inactive_parent() {
        let engine = SimEngine::new();
        let x = engine.add_scene("X");
        let y = engine.add_scene("Y");
        let z = engine.add_input("Z", "Image");
        engine.add_item(&y, &z);
        engine.add_item(&x, &y);
        engine.set_active(&y, true);
        engine.set_active(&z, true);

        let sync = Synchronizer::new(engine.clone(), Projection { mode: ViewMode::SceneNested, active_only: true });
        let mut tree = MirrorTree::new();
        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.outline(), "Y\n  Z\n");

        engine.set_active(&x, true);
        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.outline(), "X\n  Y\n    Z\n");
    }

    #[test]
    fn test_nested_mode_scene_cycle_still_listed() {
        let engine = SimEngine::new();
        let a = engine.add_scene("A");
        let b = engine.add_scene("B");
        engine.add_item(&a, &b);
        engine.add_item(&b, &a);

        let (_sync, tree) = setup(&engine, ViewMode::SceneNested);
        assert_eq!(tree.outline(), "A\n  B\n");
        assert!(tree.descendants_consistent());
    }

    #[test]
    fn test_rebuild_picks_up_renames() {
        let engine = SimEngine::new();
        let scene = engine.add_scene("Old");
        let (sync, mut tree) = setup(&engine, ViewMode::Scene);

        // Labels are fixed when a node is mirrored
        engine.rename(&scene, "New");
        assert_eq!(tree.outline(), "Old\n");
        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.outline(), "New\n");
    }

    #[test]
    fn test_preview_scene_added_once() {
        let engine = SimEngine::new();
        let program = engine.add_scene("Program");
        let preview = engine.add_scene("Preview");
        engine.set_active(&program, true);
        engine.set_preview(Some(&preview));

        let sync = Synchronizer::new(engine.clone(), Projection { mode: ViewMode::Scene, active_only: true });
        let mut tree = MirrorTree::new();
        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.outline(), "Program\nPreview\n");

        sync.set_projection(Projection { mode: ViewMode::Scene, active_only: false });
        sync.rebuild(&mut tree, &mut EventBatch::new());
        assert_eq!(tree.find_by_source(preview.id()).len(), 1);
    }

    #[test]
    fn test_dispose_and_stale_messages() {
        let engine = SimEngine::new();
        let scene = engine.add_scene("Scene");
        let (sync, mut tree) = setup(&engine, ViewMode::Scene);
        let node = tree.find_by_source(scene.id())[0];

        sync.schedule_dispose(node);
        sync.schedule_dispose(node);
        let events = drain(&sync, &mut tree);
        assert!(tree.is_empty());
        assert_eq!(events.iter().filter(|e| downcast_event::<RowRemovedEvent>(e).is_some()).count(), 1);
        assert_eq!(sync.pending(), 0);
    }
}
