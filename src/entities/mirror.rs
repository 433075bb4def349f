//! Mirror tree - local copy of the engine graph with per-node metrics.
//!
//! Nodes live in an arena keyed by [`NodeId`]. Each node is owned by its
//! parent's ordered child list; the root has no parent. Order is significant:
//! scene members are prepended so the top-most composited item comes first.
//!
//! `descendants` is maintained incrementally on insert/remove and never
//! recomputed by traversal.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::engine::{IconKind, ItemId, SceneItem, Source, SourceId, SourceKind, SubscriptionId};
use super::metrics::MetricsSnapshot;

/// Mirror node identity
pub type NodeId = Uuid;

/// Shown for sources without a name
pub const NO_NAME: &str = "(no name)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Source,
    SceneItem,
    Filter,
}

/// Activity flags refreshed on every sampling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags {
    /// Participating in output
    pub active: bool,
    /// Contributing pixels/audio right now
    pub rendered: bool,
    /// User toggle (item visibility for scene items)
    pub enabled: bool,
}

/// One mirrored engine node.
pub struct MirrorNode {
    id: NodeId,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,

    source: Option<Weak<dyn Source>>,
    item: Option<Weak<dyn SceneItem>>,
    source_id: Option<SourceId>,
    item_id: Option<ItemId>,

    // Fixed for the node's identity
    name: String,
    type_label: String,
    source_kind: Option<SourceKind>,
    is_filter: bool,
    is_async: bool,
    icon: IconKind,

    metrics: MetricsSnapshot,
    flags: NodeFlags,
    descendants: usize,
    expanded: bool,
    subscriptions: Vec<SubscriptionId>,
}

impl MirrorNode {
    /// Root placeholder: no source, no metrics
    pub fn root() -> Self {
        Self {
            id: Uuid::new_v4(),
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Root,
            source: None,
            item: None,
            source_id: None,
            item_id: None,
            name: String::new(),
            type_label: String::new(),
            source_kind: None,
            is_filter: false,
            is_async: false,
            icon: IconKind::Default,
            metrics: MetricsSnapshot::zero(),
            flags: NodeFlags::default(),
            descendants: 0,
            expanded: false,
            subscriptions: Vec::new(),
        }
    }

    /// Node for a bare source (root-level listing, filter, transition leg)
    pub fn from_source(source: &Arc<dyn Source>) -> Self {
        let kind = source.kind();
        let is_filter = kind == SourceKind::Filter;
        Self {
            kind: if is_filter { NodeKind::Filter } else { NodeKind::Source },
            source: Some(Arc::downgrade(source)),
            source_id: Some(source.id()),
            name: source.name().unwrap_or_else(|| NO_NAME.to_string()),
            type_label: source.type_label(),
            source_kind: Some(kind),
            is_filter,
            is_async: !is_filter && source.is_async_video(),
            icon: source.icon(),
            flags: NodeFlags {
                active: source.active(),
                rendered: source.showing(),
                enabled: source.enabled(),
            },
            ..Self::root()
        }
    }

    /// Node for a scene member
    pub fn from_item(item: &Arc<dyn SceneItem>, source: &Arc<dyn Source>) -> Self {
        let mut node = Self::from_source(source);
        node.kind = NodeKind::SceneItem;
        node.item = Some(Arc::downgrade(item));
        node.item_id = Some(item.id());
        node.flags.enabled = item.visible();
        node
    }

    /// Sourceless node, for tests that only need names and values
    #[cfg(test)]
    pub(crate) fn placeholder(name: &str) -> Self {
        Self {
            kind: NodeKind::Source,
            name: name.to_string(),
            ..Self::root()
        }
    }

    /// Override the display name (owner-qualified filters)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::Root
    }

    pub fn source_id(&self) -> Option<SourceId> {
        self.source_id
    }

    pub fn item_id(&self) -> Option<ItemId> {
        self.item_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_label(&self) -> &str {
        &self.type_label
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source_kind
    }

    pub fn is_filter(&self) -> bool {
        self.is_filter
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn icon(&self) -> IconKind {
        self.icon
    }

    pub fn metrics(&self) -> &MetricsSnapshot {
        &self.metrics
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn descendants(&self) -> usize {
        self.descendants
    }

    /// Scene/group members are mirrored under this node
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.expanded = expanded;
    }

    pub fn add_subscription(&mut self, id: SubscriptionId) {
        self.subscriptions.push(id);
    }

    /// Hand over all subscriptions for release
    pub fn take_subscriptions(&mut self) -> Vec<SubscriptionId> {
        std::mem::take(&mut self.subscriptions)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Borrow the engine source if it still exists.
    ///
    /// Scene item nodes are considered gone as soon as the item is, even if
    /// the underlying source lives on in other scenes.
    pub fn upgrade_source(&self) -> Option<Arc<dyn Source>> {
        if let Some(item) = &self.item {
            item.upgrade()?;
        }
        self.source.as_ref()?.upgrade()
    }

    pub fn upgrade_item(&self) -> Option<Arc<dyn SceneItem>> {
        self.item.as_ref()?.upgrade()
    }

    /// Store a new sample; returns true if anything visible changed
    pub fn update(&mut self, metrics: MetricsSnapshot, flags: NodeFlags) -> bool {
        let changed = self.metrics != metrics || self.flags != flags;
        self.metrics = metrics;
        self.flags = flags;
        changed
    }

    /// Engine handle went stale: zero everything
    pub fn degrade(&mut self) -> bool {
        self.update(MetricsSnapshot::zero(), NodeFlags::default())
    }

    /// Scene item visibility toggled; returns true if the flag changed
    pub fn set_item_visible(&mut self, visible: bool) -> bool {
        let changed = self.flags.enabled != visible;
        self.flags.enabled = visible;
        changed
    }
}

impl std::fmt::Debug for MirrorNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("source_id", &self.source_id)
            .field("children", &self.children.len())
            .field("descendants", &self.descendants)
            .finish()
    }
}

/// Where a new child goes in its parent's list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Prepend,
    Append,
}

/// Arena-backed mirror of the engine graph.
#[derive(Debug)]
pub struct MirrorTree {
    nodes: HashMap<NodeId, MirrorNode>,
    root: NodeId,
    /// Bumped on every structural edit and every mutable node access
    revision: u64,
}

impl Default for MirrorTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorTree {
    pub fn new() -> Self {
        let root = MirrorNode::root();
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            nodes,
            root: root_id,
            revision: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only the root is left
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn get(&self, id: NodeId) -> Option<&MirrorNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut MirrorNode> {
        let node = self.nodes.get_mut(&id)?;
        self.revision += 1;
        Some(node)
    }

    /// Changes whenever the tree may have changed; equal revisions mean equal content
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Insert `node` under `parent`. Returns the new id, or None if the parent is gone.
    pub fn insert(&mut self, parent: NodeId, mut node: MirrorNode, placement: Placement) -> Option<NodeId> {
        let id = node.id;
        let parent_node = self.nodes.get_mut(&parent)?;
        match placement {
            Placement::Prepend => parent_node.children.insert(0, id),
            Placement::Append => parent_node.children.push(id),
        }
        node.parent = Some(parent);
        node.descendants = 0;
        self.nodes.insert(id, node);
        self.revision += 1;

        // Every ancestor gains exactly one descendant
        let mut cursor = Some(parent);
        while let Some(ancestor) = cursor {
            let Some(n) = self.nodes.get_mut(&ancestor) else { break };
            n.descendants += 1;
            cursor = n.parent;
        }
        Some(id)
    }

    pub fn append(&mut self, parent: NodeId, node: MirrorNode) -> Option<NodeId> {
        self.insert(parent, node, Placement::Append)
    }

    pub fn prepend(&mut self, parent: NodeId, node: MirrorNode) -> Option<NodeId> {
        self.insert(parent, node, Placement::Prepend)
    }

    /// Detach and destroy a subtree.
    ///
    /// `release` runs on each node before its children are destroyed
    /// (pre-order), so subscriptions go away parent-first. Returns the number
    /// of nodes removed. The root itself cannot be removed; use [`clear`](Self::clear).
    pub fn remove(&mut self, id: NodeId, mut release: impl FnMut(&mut MirrorNode)) -> usize {
        if id == self.root {
            return 0;
        }
        let Some(node) = self.nodes.get(&id) else { return 0 };
        let removed = node.descendants + 1;
        let parent = node.parent;
        self.revision += 1;

        if let Some(parent_id) = parent {
            if let Some(p) = self.nodes.get_mut(&parent_id) {
                p.children.retain(|c| *c != id);
            }
        }

        let mut cursor = parent;
        while let Some(ancestor) = cursor {
            let Some(n) = self.nodes.get_mut(&ancestor) else { break };
            n.descendants = n.descendants.saturating_sub(removed);
            cursor = n.parent;
        }

        self.destroy(id, &mut release);
        removed
    }

    fn destroy(&mut self, id: NodeId, release: &mut impl FnMut(&mut MirrorNode)) {
        let children = match self.nodes.get_mut(&id) {
            Some(node) => {
                release(node);
                std::mem::take(&mut node.children)
            }
            None => return,
        };
        for child in children {
            self.destroy(child, release);
        }
        self.nodes.remove(&id);
    }

    /// Remove everything below the root
    pub fn clear(&mut self, mut release: impl FnMut(&mut MirrorNode)) -> usize {
        let children: Vec<NodeId> = self.children(self.root).to_vec();
        children.into_iter().map(|c| self.remove(c, &mut release)).sum()
    }

    /// Row index of `id` within its parent
    pub fn row_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.nodes.get(&id)?.parent?;
        self.nodes.get(&parent)?.children.iter().position(|c| *c == id)
    }

    /// Row path from the root to `id` (empty for the root)
    pub fn path_of(&self, id: NodeId) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut cursor = id;
        while cursor != self.root {
            path.push(self.row_of(cursor)?);
            cursor = self.nodes.get(&cursor)?.parent?;
        }
        path.reverse();
        Some(path)
    }

    /// Resolve a row path (empty path = root)
    pub fn node_at(&self, path: &[usize]) -> Option<NodeId> {
        let mut cursor = self.root;
        for &row in path {
            cursor = *self.nodes.get(&cursor)?.children.get(row)?;
        }
        Some(cursor)
    }

    /// Pre-order walk below `id`, `id` included
    pub fn depth_first(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get(&next) else { continue };
            out.push(next);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Full-tree existence check for an engine source
    pub fn contains_source(&self, source_id: SourceId) -> bool {
        self.depth_first(self.root)
            .into_iter()
            .any(|id| self.nodes.get(&id).and_then(|n| n.source_id) == Some(source_id))
    }

    /// True if `id` or any of its ancestors mirrors `source_id`
    pub fn ancestors_contain(&self, id: NodeId, source_id: SourceId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(&current) else { return false };
            if node.source_id == Some(source_id) {
                return true;
            }
            cursor = node.parent;
        }
        false
    }

    /// Every node mirroring `source_id`, in tree order
    pub fn find_by_source(&self, source_id: SourceId) -> Vec<NodeId> {
        self.depth_first(self.root)
            .into_iter()
            .filter(|id| self.nodes.get(id).and_then(|n| n.source_id) == Some(source_id))
            .collect()
    }

    /// Direct child of `parent` wrapping scene item `item_id`
    pub fn find_child_item(&self, parent: NodeId, item_id: ItemId) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).and_then(|n| n.item_id) == Some(item_id))
    }

    /// Direct child of `parent` wrapping source `source_id` (not via a scene item)
    pub fn find_child_source(&self, parent: NodeId, source_id: SourceId) -> Option<NodeId> {
        self.children(parent).iter().copied().find(|c| {
            self.nodes
                .get(c)
                .is_some_and(|n| n.item_id.is_none() && n.source_id == Some(source_id))
        })
    }

    /// Recount descendants from scratch and compare with the maintained counters
    #[cfg(test)]
    pub(crate) fn descendants_consistent(&self) -> bool {
        self.nodes.keys().all(|id| {
            let node = &self.nodes[id];
            let expected: usize = node
                .children
                .iter()
                .map(|c| 1 + self.nodes.get(c).map(|n| n.descendants).unwrap_or(0))
                .sum();
            expected == node.descendants
        })
    }

    /// Indented outline for debugging and tests
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.outline_into(self.root, 0, &mut out);
        out
    }

    fn outline_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else { return };
        if !node.is_root() {
            out.push_str(&"  ".repeat(depth - 1));
            out.push_str(&node.name);
            out.push('\n');
        }
        for child in &node.children {
            self.outline_into(*child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> MirrorNode {
        MirrorNode::placeholder(name)
    }

    #[test]
    fn test_prepend_and_append_order() {
        let mut tree = MirrorTree::new();
        let root = tree.root();
        tree.append(root, named("a"));
        tree.append(root, named("b"));
        tree.prepend(root, named("top"));

        assert_eq!(tree.outline(), "top\na\nb\n");
        assert_eq!(tree.get(root).map(|n| n.descendants()), Some(3));
    }

    #[test]
    fn test_descendants_after_inserts_and_removes() {
        let mut tree = MirrorTree::new();
        let root = tree.root();
        let a = tree.append(root, named("a")).unwrap();
        let b = tree.append(a, named("b")).unwrap();
        let c = tree.append(b, named("c")).unwrap();
        tree.append(b, named("d"));
        let e = tree.append(root, named("e")).unwrap();
        tree.prepend(e, named("f"));

        assert!(tree.descendants_consistent());
        assert_eq!(tree.get(root).unwrap().descendants(), 6);
        assert_eq!(tree.get(a).unwrap().descendants(), 3);

        assert_eq!(tree.remove(c, |_| {}), 1);
        assert!(tree.descendants_consistent());
        assert_eq!(tree.get(a).unwrap().descendants(), 2);

        assert_eq!(tree.remove(a, |_| {}), 3);
        assert!(tree.descendants_consistent());
        assert_eq!(tree.get(root).unwrap().descendants(), 2);
        assert_eq!(tree.len(), 3);
        assert!(!tree.contains(b));
    }

    #[test]
    fn test_remove_releases_parent_first() {
        let mut tree = MirrorTree::new();
        let root = tree.root();
        let a = tree.append(root, named("a")).unwrap();
        let b = tree.append(a, named("b")).unwrap();
        tree.append(b, named("c"));

        let mut order = Vec::new();
        tree.remove(a, |n| order.push(n.name().to_string()));
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_paths() {
        let mut tree = MirrorTree::new();
        let root = tree.root();
        let a = tree.append(root, named("a")).unwrap();
        tree.append(root, named("b"));
        tree.append(a, named("a0"));
        let a1 = tree.append(a, named("a1")).unwrap();

        assert_eq!(tree.path_of(a1), Some(vec![0, 1]));
        assert_eq!(tree.node_at(&[0, 1]), Some(a1));
        assert_eq!(tree.node_at(&[]), Some(root));
        assert_eq!(tree.node_at(&[2]), None);
        assert_eq!(tree.path_of(root), Some(vec![]));
    }

    #[test]
    fn test_revision_tracks_edits() {
        let mut tree = MirrorTree::new();
        let root = tree.root();
        let start = tree.revision();

        let a = tree.append(root, named("a")).unwrap();
        let after_insert = tree.revision();
        assert!(after_insert > start);

        let _ = tree.get(a);
        let _ = tree.node_at(&[0]);
        assert_eq!(tree.revision(), after_insert);

        tree.get_mut(a).unwrap().set_expanded(true);
        assert!(tree.revision() > after_insert);

        let before_remove = tree.revision();
        tree.remove(a, |_| {});
        assert!(tree.revision() > before_remove);
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let mut tree = MirrorTree::new();
        let root = tree.root();
        tree.append(root, named("a"));
        assert_eq!(tree.remove(root, |_| {}), 0);
        assert_eq!(tree.clear(|_| {}), 1);
        assert!(tree.is_empty());
        assert_eq!(tree.get(root).unwrap().descendants(), 0);
    }
}
