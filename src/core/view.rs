//! Filter/sort view over the mirror tree.
//!
//! [`ViewState`] holds the user's text pattern and sort key; [`ViewState::project`]
//! turns the current tree into a [`Projection`] of visible rows in display
//! order. Projections are snapshots: re-project after the tree changes.

use log::debug;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

use crate::entities::{CellValue, ColumnRegistry, MirrorNode, MirrorTree, NodeId, ValueContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn flipped(self) -> Self {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

/// Column index into the registry plus direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: usize,
    pub order: SortOrder,
}

/// Text filter and sort selection
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    filter_text: String,
    pattern: Option<Regex>,
    sort: Option<SortKey>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    /// Case-insensitive regex; invalid patterns match as literal text
    pub fn set_filter_text(&mut self, text: &str) {
        self.filter_text = text.to_string();
        if text.is_empty() {
            self.pattern = None;
            return;
        }

        let pattern = match RegexBuilder::new(text).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => {
                debug!("Filter {:?} is not a regex ({}), matching literally", text, e);
                match RegexBuilder::new(&regex::escape(text)).case_insensitive(true).build() {
                    Ok(re) => re,
                    Err(_) => {
                        self.pattern = None;
                        return;
                    }
                }
            }
        };
        self.pattern = Some(pattern);
    }

    pub fn sort(&self) -> Option<SortKey> {
        self.sort
    }

    pub fn set_sort(&mut self, sort: Option<SortKey>) {
        self.sort = sort;
    }

    /// Same column flips direction, a new column starts at `default_order`
    pub fn toggle_sort(&mut self, column: usize, default_order: SortOrder) -> SortKey {
        let key = match self.sort {
            Some(current) if current.column == column => SortKey {
                column,
                order: current.order.flipped(),
            },
            _ => SortKey {
                column,
                order: default_order,
            },
        };
        self.sort = Some(key);
        key
    }

    /// Own-name match, ignoring descendants
    pub fn matches(&self, node: &MirrorNode) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(node.name()),
            None => true,
        }
    }

    /// Visible rows of `tree`, sorted per level
    pub fn project(&self, tree: &MirrorTree, columns: &ColumnRegistry, ctx: &ValueContext) -> Projection {
        let mut projection = Projection {
            root: tree.root(),
            children: HashMap::new(),
            parents: HashMap::new(),
        };
        self.build(tree, tree.root(), columns, ctx, &mut projection);
        projection
    }

    /// Fill `out` below `id`; returns whether `id` itself is visible
    fn build(
        &self,
        tree: &MirrorTree,
        id: NodeId,
        columns: &ColumnRegistry,
        ctx: &ValueContext,
        out: &mut Projection,
    ) -> bool {
        let Some(node) = tree.get(id) else { return false };

        let mut visible: Vec<NodeId> = node
            .children()
            .iter()
            .copied()
            .filter(|child| self.build(tree, *child, columns, ctx, out))
            .collect();

        let shown = node.is_root() || self.matches(node) || !visible.is_empty();
        if !shown {
            return false;
        }

        if let Some(key) = self.sort {
            if let Some(spec) = columns.get(key.column) {
                let mut keyed: Vec<(CellValue, NodeId)> = visible
                    .iter()
                    .filter_map(|c| Some((spec.value(tree.get(*c)?, ctx), *c)))
                    .collect();
                // Stable: equal keys keep tree order
                keyed.sort_by(|(a, _), (b, _)| {
                    let ord = a.compare(b);
                    match key.order {
                        SortOrder::Ascending => ord,
                        SortOrder::Descending => ord.reverse(),
                    }
                });
                visible = keyed.into_iter().map(|(_, c)| c).collect();
            }
        }

        for child in &visible {
            out.parents.insert(*child, id);
        }
        out.children.insert(id, visible);
        true
    }
}

/// One row of a flattened projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectedRow {
    pub node: NodeId,
    /// 0 for top-level rows
    pub depth: usize,
}

/// Visible rows in display order. Paths here are view paths, not tree paths.
#[derive(Debug, Clone)]
pub struct Projection {
    root: NodeId,
    children: HashMap<NodeId, Vec<NodeId>>,
    parents: HashMap<NodeId, NodeId>,
}

impl Projection {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_visible(&self, id: NodeId) -> bool {
        self.children.contains_key(&id)
    }

    /// Visible rows, root excluded
    pub fn len(&self) -> usize {
        self.children.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(&id).map(|c| c.as_slice()).unwrap_or(&[])
    }

    /// Resolve a view path (empty = root)
    pub fn node_at(&self, path: &[usize]) -> Option<NodeId> {
        let mut cursor = self.root;
        for &row in path {
            cursor = *self.children(cursor).get(row)?;
        }
        Some(cursor)
    }

    /// View path of a visible node; `None` if filtered out or unknown.
    ///
    /// Tree events carry the node id, this maps them onto display rows.
    pub fn path_of(&self, id: NodeId) -> Option<Vec<usize>> {
        if !self.is_visible(id) {
            return None;
        }
        let mut path = Vec::new();
        let mut cursor = id;
        while cursor != self.root {
            let parent = *self.parents.get(&cursor)?;
            path.push(self.children(parent).iter().position(|c| *c == cursor)?);
            cursor = parent;
        }
        path.reverse();
        Some(path)
    }

    pub fn row_count(&self, path: &[usize]) -> usize {
        self.node_at(path).map(|id| self.children(id).len()).unwrap_or(0)
    }

    pub fn child_at(&self, path: &[usize], row: usize) -> Option<NodeId> {
        self.children(self.node_at(path)?).get(row).copied()
    }

    /// Pre-order listing with depth
    pub fn flatten(&self) -> Vec<ProjectedRow> {
        let mut rows = Vec::with_capacity(self.len());
        let mut stack: Vec<(NodeId, usize)> = self.children(self.root).iter().rev().map(|c| (*c, 0)).collect();
        while let Some((node, depth)) = stack.pop() {
            rows.push(ProjectedRow { node, depth });
            stack.extend(self.children(node).iter().rev().map(|c| (*c, depth + 1)));
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ColumnId, MetricsSnapshot, NodeFlags};

    fn ctx() -> ValueContext {
        ValueContext {
            frame_interval_ns: 16_666_667,
        }
    }

    fn names(tree: &MirrorTree, projection: &Projection) -> Vec<String> {
        projection
            .flatten()
            .iter()
            .map(|row| format!("{}{}", "  ".repeat(row.depth), tree.get(row.node).unwrap().name()))
            .collect()
    }

    fn leaf(name: &str, tick: u64) -> MirrorNode {
        let mut node = MirrorNode::placeholder(name);
        node.update(
            MetricsSnapshot {
                tick_avg: tick,
                ..MetricsSnapshot::zero()
            },
            NodeFlags::default(),
        );
        node
    }

    /// Root > [A > B > C, D > E, F]
    fn sample_tree() -> MirrorTree {
        let mut tree = MirrorTree::new();
        let root = tree.root();
        let a = tree.append(root, leaf("Alpha", 3)).unwrap();
        let b = tree.append(a, leaf("Bravo", 1)).unwrap();
        tree.append(b, leaf("Charlie cam", 7)).unwrap();
        let d = tree.append(root, leaf("Delta", 9)).unwrap();
        tree.append(d, leaf("Echo", 2)).unwrap();
        tree.append(root, leaf("foxtrot", 5)).unwrap();
        tree
    }

    #[test]
    fn test_no_filter_shows_tree_order() {
        let tree = sample_tree();
        let p = ViewState::new().project(&tree, &ColumnRegistry::standard(), &ctx());
        assert_eq!(p.len(), 6);
        assert_eq!(
            names(&tree, &p),
            vec!["Alpha", "  Bravo", "    Charlie cam", "Delta", "  Echo", "foxtrot"]
        );
    }

    #[test]
    fn test_match_keeps_ancestor_chain() {
        let tree = sample_tree();
        let mut view = ViewState::new();
        view.set_filter_text("CAM");
        let p = view.project(&tree, &ColumnRegistry::standard(), &ctx());

        assert_eq!(names(&tree, &p), vec!["Alpha", "  Bravo", "    Charlie cam"]);
        let delta = tree.node_at(&[1]).unwrap();
        assert!(!p.is_visible(delta));
        assert_eq!(p.row_count(&[]), 1);
        assert_eq!(p.row_count(&[0, 0]), 1);
    }

    #[test]
    fn test_regex_and_literal_fallback() {
        let tree = sample_tree();
        let columns = ColumnRegistry::standard();
        let mut view = ViewState::new();

        view.set_filter_text("^(delta|echo)$");
        assert_eq!(names(&tree, &view.project(&tree, &columns, &ctx())), vec!["Delta", "  Echo"]);

        // Unbalanced paren is not a regex; matches nothing literally here
        view.set_filter_text("(cam");
        assert!(view.project(&tree, &columns, &ctx()).is_empty());

        view.set_filter_text("");
        assert_eq!(view.project(&tree, &columns, &ctx()).len(), 6);
    }

    #[test]
    fn test_sort_per_level() {
        let tree = sample_tree();
        let columns = ColumnRegistry::standard();
        let tick = columns.index_of(ColumnId::Tick).unwrap();
        let mut view = ViewState::new();

        view.toggle_sort(tick, SortOrder::Descending);
        let p = view.project(&tree, &columns, &ctx());
        assert_eq!(
            names(&tree, &p),
            vec!["Delta", "  Echo", "foxtrot", "Alpha", "  Bravo", "    Charlie cam"]
        );

        // Second click on the same column flips
        assert_eq!(view.toggle_sort(tick, SortOrder::Descending).order, SortOrder::Ascending);
        let p = view.project(&tree, &columns, &ctx());
        let top: Vec<String> = p.children(p.root()).iter().map(|id| tree.get(*id).unwrap().name().to_string()).collect();
        assert_eq!(top, vec!["Alpha", "foxtrot", "Delta"]);
    }

    #[test]
    fn test_name_sort_is_case_folded() {
        let tree = sample_tree();
        let columns = ColumnRegistry::standard();
        let name = columns.index_of(ColumnId::Name).unwrap();
        let mut view = ViewState::new();
        view.set_sort(Some(SortKey {
            column: name,
            order: SortOrder::Descending,
        }));

        let p = view.project(&tree, &columns, &ctx());
        assert_eq!(p.child_at(&[], 0), tree.node_at(&[2]));
        assert_eq!(p.child_at(&[], 2), tree.node_at(&[0]));
        assert_eq!(p.child_at(&[5], 0), None);
    }

    #[test]
    fn test_path_of_follows_sort_and_filter() {
        let tree = sample_tree();
        let columns = ColumnRegistry::standard();
        let tick = columns.index_of(ColumnId::Tick).unwrap();
        let echo = tree.node_at(&[1, 0]).unwrap();
        let charlie = tree.node_at(&[0, 0, 0]).unwrap();

        let mut view = ViewState::new();
        assert_eq!(view.project(&tree, &columns, &ctx()).path_of(echo), Some(vec![1, 0]));

        // Delta sorts first by tick
        view.toggle_sort(tick, SortOrder::Descending);
        let p = view.project(&tree, &columns, &ctx());
        assert_eq!(p.path_of(echo), Some(vec![0, 0]));
        assert_eq!(p.path_of(charlie), Some(vec![2, 0, 0]));
        assert_eq!(p.node_at(&[2, 0, 0]), Some(charlie));
        assert_eq!(p.path_of(p.root()), Some(vec![]));

        view.set_filter_text("charlie");
        let p = view.project(&tree, &columns, &ctx());
        assert_eq!(p.path_of(echo), None);
        assert_eq!(p.path_of(charlie), Some(vec![0, 0, 0]));
    }

    #[test]
    fn test_toggle_new_column_uses_default() {
        let mut view = ViewState::new();
        view.toggle_sort(0, SortOrder::Ascending);
        let key = view.toggle_sort(3, SortOrder::Descending);
        assert_eq!(key, SortKey { column: 3, order: SortOrder::Descending });
    }
}
