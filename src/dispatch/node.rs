//! Dependency tree for recursive operations.
//!
//! A bulk action ("reindex container X and its descendants") fans out into one
//! node per object, parented under a root node for the originating message.
//! Nodes track how many descendant requests are pending and processed so the
//! engine can answer "is this subtree done" without scanning the queue.
//!
//! Nodes live in an id-addressed arena: parent/child links are plain
//! [`NodeId`]s, so there is no cyclic ownership to manage and no back
//! reference can outlive the arena.
//!
//! Settled trees are pruned: once a root's own work and every descendant's
//! work have completed, the whole tree is dropped from the arena. Requests
//! still blocked on a pruned node observe it as missing, which counts as
//! terminal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Opaque handle to a node in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

/// Lifecycle of a node's logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Queued,
    Active,
    /// Own unit of work is done but descendants are still outstanding.
    InProgress,
    Blocked,
    Finished,
    Failed,
}

#[derive(Debug)]
struct NodeEntry {
    message_id: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Total live descendants under this node.
    children_pending: u32,
    /// Descendant completions propagated up to this node.
    children_processed: u32,
    status: NodeStatus,
    /// Whether this node's own request has reported completion.
    own_completed: bool,
    finished_at: Option<DateTime<Utc>>,
}

impl NodeEntry {
    fn new(message_id: Option<String>, parent: Option<NodeId>) -> Self {
        Self {
            message_id,
            parent,
            children: Vec::new(),
            children_pending: 0,
            children_processed: 0,
            status: NodeStatus::Queued,
            own_completed: false,
            finished_at: None,
        }
    }

    fn all_children_processed(&self) -> bool {
        self.children_processed == self.children_pending
    }
}

struct ArenaInner {
    nodes: HashMap<u64, NodeEntry>,
    next_id: u64,
}

/// Arena of dependency-tree nodes shared by producers, the dispatcher, and
/// workers.
pub struct NodeArena {
    inner: RwLock<ArenaInner>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ArenaInner {
                nodes: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Create a parentless node for a new logical operation.
    pub fn new_root(&self, message_id: Option<&str>) -> NodeId {
        let mut inner = self.inner.write();
        let id = NodeId(inner.next_id);
        inner.next_id += 1;
        inner
            .nodes
            .insert(id.0, NodeEntry::new(message_id.map(String::from), None));
        id
    }

    /// Create a node under `parent`. The pending increment propagates up the
    /// full ancestor chain, so a root's pending count always equals its total
    /// live descendant count.
    pub fn add_child(&self, parent: NodeId, message_id: Option<&str>) -> NodeId {
        let mut inner = self.inner.write();
        let id = NodeId(inner.next_id);
        inner.next_id += 1;
        inner.nodes.insert(
            id.0,
            NodeEntry::new(message_id.map(String::from), Some(parent)),
        );
        if let Some(entry) = inner.nodes.get_mut(&parent.0) {
            entry.children.push(id);
        }

        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            match inner.nodes.get_mut(&current.0) {
                Some(entry) => {
                    entry.children_pending += 1;
                    cursor = entry.parent;
                }
                None => break,
            }
        }
        id
    }

    /// Detach `child` (and everything under it) from the tree, rolling its
    /// contribution out of every ancestor's counters.
    pub fn remove_child(&self, child: NodeId) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.nodes.get(&child.0) else {
            return;
        };
        let parent = entry.parent;
        let pending_delta = 1 + entry.children_pending;
        let processed_delta = u32::from(entry.own_completed) + entry.children_processed;

        // Drop the whole subtree from the arena.
        let mut stack = vec![child];
        while let Some(current) = stack.pop() {
            if let Some(removed) = inner.nodes.remove(&current.0) {
                stack.extend(removed.children);
            }
        }

        if let Some(parent) = parent {
            if let Some(entry) = inner.nodes.get_mut(&parent.0) {
                entry.children.retain(|c| *c != child);
            }
        }

        let mut cursor = parent;
        let mut top = None;
        while let Some(current) = cursor {
            match inner.nodes.get_mut(&current.0) {
                Some(entry) => {
                    entry.children_pending -= pending_delta.min(entry.children_pending);
                    entry.children_processed -= processed_delta.min(entry.children_processed);
                    if entry.status == NodeStatus::InProgress && entry.all_children_processed() {
                        entry.status = NodeStatus::Finished;
                        entry.finished_at = Some(Utc::now());
                    }
                    top = Some(current);
                    cursor = entry.parent;
                }
                None => break,
            }
        }
        if let Some(top) = top {
            Self::prune_settled(&mut inner, top);
        }
    }

    /// Report that one unit of work somewhere below `node` has completed.
    ///
    /// Increments this node's processed count and propagates upward
    /// unconditionally, so ancestor counts stay accurate even when this node
    /// is not yet terminal. A node whose own work is already done flips to
    /// `Finished` the moment its counts meet.
    pub fn child_completed(&self, node: NodeId) {
        let mut inner = self.inner.write();
        Self::propagate_child_completed(&mut inner, node);
    }

    fn propagate_child_completed(inner: &mut ArenaInner, start: NodeId) {
        let mut cursor = Some(start);
        let mut top = start;
        while let Some(current) = cursor {
            match inner.nodes.get_mut(&current.0) {
                Some(entry) => {
                    debug_assert!(entry.children_processed < entry.children_pending);
                    entry.children_processed =
                        (entry.children_processed + 1).min(entry.children_pending);
                    if entry.status == NodeStatus::InProgress && entry.all_children_processed() {
                        entry.status = NodeStatus::Finished;
                        entry.finished_at = Some(Utc::now());
                    }
                    top = current;
                    cursor = entry.parent;
                }
                None => break,
            }
        }
        Self::prune_settled(inner, top);
    }

    /// Drop a settled tree from the arena. A parentless node whose own work
    /// and every descendant's work have completed carries no information the
    /// engine still needs, and without pruning a long-running process would
    /// retain one dead tree per finished bulk operation.
    fn prune_settled(inner: &mut ArenaInner, node: NodeId) {
        let Some(entry) = inner.nodes.get(&node.0) else {
            return;
        };
        if entry.parent.is_some() || !entry.own_completed || !entry.all_children_processed() {
            return;
        }
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(removed) = inner.nodes.remove(&current.0) {
                stack.extend(removed.children);
            }
        }
    }

    /// Report that this node's own unit of work has finished (success or
    /// failure). Called exactly once per node, from the worker's completion
    /// path. When this settles the whole tree, the tree is pruned from the
    /// arena.
    pub fn request_completed(&self, node: NodeId) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.nodes.get_mut(&node.0) else {
            return;
        };
        let parent = entry.parent;
        match entry.status {
            NodeStatus::Finished => return,
            NodeStatus::Failed => {
                if entry.own_completed {
                    return;
                }
                // Keep the failure visible, but the parent still counts this
                // subtree as settled.
                entry.own_completed = true;
                entry.finished_at = Some(Utc::now());
            }
            _ => {
                if entry.own_completed {
                    return;
                }
                entry.own_completed = true;
                if entry.all_children_processed() {
                    entry.status = NodeStatus::Finished;
                    entry.finished_at = Some(Utc::now());
                } else {
                    entry.status = NodeStatus::InProgress;
                }
            }
        }
        if let Some(parent) = parent {
            Self::propagate_child_completed(&mut inner, parent);
        } else {
            Self::prune_settled(&mut inner, node);
        }
    }

    pub fn set_status(&self, node: NodeId, status: NodeStatus) {
        if let Some(entry) = self.inner.write().nodes.get_mut(&node.0) {
            entry.status = status;
        }
    }

    pub fn status(&self, node: NodeId) -> Option<NodeStatus> {
        self.inner.read().nodes.get(&node.0).map(|e| e.status)
    }

    /// A node that has been removed from the arena counts as terminal: the
    /// work it tracked no longer exists.
    pub fn is_terminal(&self, node: NodeId) -> bool {
        match self.status(node) {
            Some(NodeStatus::Finished) | Some(NodeStatus::Failed) | None => true,
            Some(_) => false,
        }
    }

    pub fn message_id(&self, node: NodeId) -> Option<String> {
        self.inner
            .read()
            .nodes
            .get(&node.0)
            .and_then(|e| e.message_id.clone())
    }

    /// (pending, processed) descendant counts, for the status surface.
    pub fn counts(&self, node: NodeId) -> Option<(u32, u32)> {
        self.inner
            .read()
            .nodes
            .get(&node.0)
            .map(|e| (e.children_pending, e.children_processed))
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .read()
            .nodes
            .get(&node.0)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_child_propagates_pending_up_the_chain() {
        let arena = NodeArena::new();
        let root = arena.new_root(Some("msg-1"));
        let mid = arena.add_child(root, None);
        arena.add_child(mid, None);
        arena.add_child(mid, None);

        assert_eq!(arena.counts(root), Some((3, 0)));
        assert_eq!(arena.counts(mid), Some((2, 0)));
    }

    #[test]
    fn root_finishes_only_after_all_children() {
        let arena = NodeArena::new();
        let root = arena.new_root(None);
        let c1 = arena.add_child(root, None);
        let c2 = arena.add_child(root, None);

        arena.request_completed(root);
        assert_eq!(arena.status(root), Some(NodeStatus::InProgress));

        arena.request_completed(c1);
        assert_eq!(arena.status(root), Some(NodeStatus::InProgress));
        assert!(!arena.is_terminal(root));

        // The last completion settles the tree and prunes it.
        arena.request_completed(c2);
        assert!(arena.is_terminal(root));
        assert!(arena.is_empty());
    }

    #[test]
    fn children_completing_before_root_request() {
        let arena = NodeArena::new();
        let root = arena.new_root(None);
        let c1 = arena.add_child(root, None);
        let c2 = arena.add_child(root, None);

        arena.request_completed(c1);
        arena.request_completed(c2);
        assert_eq!(arena.status(root), Some(NodeStatus::Queued));
        assert_eq!(arena.counts(root), Some((2, 2)));

        arena.request_completed(root);
        assert!(arena.is_terminal(root));
        assert!(arena.is_empty());
    }

    #[test]
    fn failed_child_still_settles_the_parent() {
        let arena = NodeArena::new();
        let root = arena.new_root(None);
        let c1 = arena.add_child(root, None);

        arena.set_status(c1, NodeStatus::Failed);
        arena.request_completed(c1);
        assert_eq!(arena.status(c1), Some(NodeStatus::Failed));
        assert!(arena.is_terminal(c1));
        assert_eq!(arena.counts(root), Some((1, 1)));

        arena.request_completed(root);
        assert!(arena.is_terminal(root));
        assert!(arena.is_empty());
    }

    #[test]
    fn repeated_request_completed_is_a_noop() {
        let arena = NodeArena::new();
        let root = arena.new_root(None);
        let c1 = arena.add_child(root, None);
        let c2 = arena.add_child(root, None);

        arena.request_completed(root);
        arena.request_completed(c1);
        assert_eq!(arena.counts(root), Some((2, 1)));

        // A second completion must not double-count at the parent.
        arena.request_completed(c1);
        assert_eq!(arena.counts(root), Some((2, 1)));

        arena.request_completed(c2);
        assert!(arena.is_empty());
    }

    #[test]
    fn remove_child_rolls_back_subtree_counts() {
        let arena = NodeArena::new();
        let root = arena.new_root(None);
        let keep = arena.add_child(root, None);
        let drop = arena.add_child(root, None);
        arena.add_child(drop, None);
        arena.add_child(drop, None);
        assert_eq!(arena.counts(root), Some((4, 0)));

        arena.remove_child(drop);
        assert_eq!(arena.counts(root), Some((1, 0)));
        assert_eq!(arena.len(), 2);

        arena.request_completed(root);
        arena.request_completed(keep);
        assert!(arena.is_terminal(root));
        assert!(arena.is_empty());
    }

    #[test]
    fn remove_child_can_finish_a_waiting_parent() {
        let arena = NodeArena::new();
        let root = arena.new_root(None);
        let c1 = arena.add_child(root, None);
        let c2 = arena.add_child(root, None);

        arena.request_completed(root);
        arena.request_completed(c1);
        assert_eq!(arena.status(root), Some(NodeStatus::InProgress));

        arena.remove_child(c2);
        assert!(arena.is_terminal(root));
        assert!(arena.is_empty());
    }

    #[test]
    fn settled_tree_is_pruned_while_live_trees_remain() {
        let arena = NodeArena::new();
        let done = arena.new_root(None);
        let done_child = arena.add_child(done, None);
        let live = arena.new_root(None);
        arena.add_child(live, None);
        assert_eq!(arena.len(), 4);

        arena.request_completed(done_child);
        arena.request_completed(done);

        // The settled tree is gone; the live one is untouched.
        assert_eq!(arena.len(), 2);
        assert!(arena.status(done).is_none());
        assert!(arena.is_terminal(done));
        assert_eq!(arena.status(live), Some(NodeStatus::Queued));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Root pending always equals the total live descendant count.
            #[test]
            fn root_pending_matches_descendants(parents in prop::collection::vec(0usize..16, 1..16)) {
                let arena = NodeArena::new();
                let root = arena.new_root(None);
                let mut ids = vec![root];
                for parent_index in &parents {
                    let parent = ids[*parent_index % ids.len()];
                    ids.push(arena.add_child(parent, None));
                }
                prop_assert_eq!(arena.counts(root).unwrap().0 as usize, parents.len());
            }

            /// Completing every node, in any order, settles and prunes the
            /// whole tree.
            #[test]
            fn any_completion_order_settles_the_tree(
                parents in prop::collection::vec(0usize..16, 1..16),
                order_keys in prop::collection::vec(any::<u64>(), 17),
            ) {
                let arena = NodeArena::new();
                let root = arena.new_root(None);
                let mut ids = vec![root];
                for parent_index in &parents {
                    let parent = ids[*parent_index % ids.len()];
                    ids.push(arena.add_child(parent, None));
                }

                let mut order: Vec<usize> = (0..ids.len()).collect();
                order.sort_by_key(|i| order_keys[*i % order_keys.len()]);
                for i in order {
                    arena.request_completed(ids[i]);
                }

                for id in &ids {
                    prop_assert!(arena.is_terminal(*id));
                }
                prop_assert!(arena.is_empty());
            }
        }
    }
}
