//! Spanning tree construction and incremental repair

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use plexus_membership::{Member, NodeId};

use crate::error::TreeError;

/// A node in the spanning tree.
///
/// Links are by id into the owning tree's index, so the structure stays
/// acyclic from the borrow checker's point of view while keeping O(1) parent
/// and O(children) fan-out lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// The node id.
    pub id: NodeId,
    /// The node's HTTP address (`host:port`).
    pub address: String,
    /// Parent id; `None` only for the root.
    pub parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    height: i32,
}

impl TreeNode {
    fn new(id: NodeId, address: String) -> Self {
        Self {
            id,
            address,
            parent: None,
            left: None,
            right: None,
            height: 1,
        }
    }

    /// The node's children in deterministic order
    pub fn children(&self) -> Vec<NodeId> {
        self.left.into_iter().chain(self.right).collect()
    }
}

/// The multicast spanning tree: the leader as root, an AVL tree of the
/// remaining members by id beneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanTree {
    nodes: HashMap<NodeId, TreeNode>,
    root: Option<NodeId>,
}

impl SpanTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the tree from a membership snapshot rooted at `leader`.
    ///
    /// Followers are inserted in ascending id order, which pins the shape:
    /// every node running this over the same snapshot gets the same tree.
    pub fn construct(
        members: &HashMap<NodeId, Member>,
        leader: NodeId,
    ) -> Result<Self, TreeError> {
        let leader_member = members
            .get(&leader)
            .ok_or(TreeError::LeaderNotInMembership(leader))?;

        let mut tree = Self::new();
        tree.nodes
            .insert(leader, TreeNode::new(leader, leader_member.address.clone()));
        tree.root = Some(leader);

        let mut follower_ids: Vec<NodeId> =
            members.keys().copied().filter(|id| *id != leader).collect();
        follower_ids.sort();

        for id in follower_ids {
            tree.add_node(id, members[&id].address.clone())?;
        }

        Ok(tree)
    }

    /// The root (current leader) id
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Whether the tree contains `id`
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All ids currently in the tree, ascending
    pub fn ids(&self) -> BTreeSet<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Number of nodes in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id
    pub fn find(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    /// The children of `id`, cloned for use outside the tree lock
    pub fn children_of(&self, id: NodeId) -> Result<Vec<TreeNode>, TreeError> {
        let node = self.nodes.get(&id).ok_or(TreeError::NodeNotFound(id))?;
        Ok(node
            .children()
            .into_iter()
            .filter_map(|child| self.nodes.get(&child).cloned())
            .collect())
    }

    /// Insert `id` into the AVL ordering beneath the root
    pub fn add_node(&mut self, id: NodeId, address: String) -> Result<(), TreeError> {
        let root = self.root.ok_or(TreeError::NodeNotFound(id))?;

        if let Some(existing) = self.nodes.get_mut(&id) {
            existing.address = address;
            return Ok(());
        }

        self.nodes.insert(id, TreeNode::new(id, address));
        let avl_root = self.node(root).left;
        let new_avl_root = self.insert(avl_root, id);
        self.set_left(root, Some(new_avl_root));

        Ok(())
    }

    /// Detach the subtree at `id` and re-insert its descendants one by one
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), TreeError> {
        let root = self.root.ok_or(TreeError::NodeNotFound(id))?;
        if id == root {
            return Err(TreeError::CannotRemoveRoot(id));
        }
        if !self.nodes.contains_key(&id) {
            return Err(TreeError::NodeNotFound(id));
        }

        // Unhook the subtree from its parent
        let parent = self.node(id).parent;
        if let Some(p) = parent {
            let parent_node = self.nodes.get_mut(&p).unwrap();
            if parent_node.left == Some(id) {
                parent_node.left = None;
            } else if parent_node.right == Some(id) {
                parent_node.right = None;
            }
        }

        // Ascending order keeps the rebuild deterministic across nodes
        let mut descendants = Vec::new();
        self.collect_subtree(self.node(id).left, &mut descendants);
        self.collect_subtree(self.node(id).right, &mut descendants);
        descendants.sort();

        self.nodes.remove(&id);

        for descendant in descendants {
            let node = self.nodes.get_mut(&descendant).unwrap();
            node.parent = None;
            node.left = None;
            node.right = None;
            node.height = 1;

            let avl_root = self.node(root).left;
            let new_avl_root = self.insert(avl_root, descendant);
            self.set_left(root, Some(new_avl_root));
        }

        // Heights above the detach point may be stale; one full rebuild pass
        // of the balance restores the AVL shape deterministically.
        if let Some(avl_root) = self.node(root).left {
            let rebalanced = self.rebuild_balance(avl_root);
            self.set_left(root, Some(rebalanced));
        }

        Ok(())
    }

    /// Repair the tree against a fresh membership snapshot.
    ///
    /// A leader change forces a full rebuild; otherwise departed members are
    /// removed and joiners added, each in ascending id order. Returns whether
    /// the tree changed.
    pub fn reconcile(
        &mut self,
        members: &HashMap<NodeId, Member>,
        leader: NodeId,
    ) -> Result<bool, TreeError> {
        if self.root != Some(leader) {
            *self = Self::construct(members, leader)?;
            return Ok(true);
        }

        let current = self.ids();
        let target: BTreeSet<NodeId> = members.keys().copied().collect();

        let mut changed = false;

        for departed in current.difference(&target) {
            self.remove_node(*departed)?;
            changed = true;
        }

        for joined in target.difference(&current) {
            self.add_node(*joined, members[joined].address.clone())?;
            changed = true;
        }

        Ok(changed)
    }

    /// Render the tree as an indented listing, for logs
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.render_node(root, 0, &mut out);
        }
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[&id];
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{} @ {}\n", node.id, node.address));
        for child in node.children() {
            self.render_node(child, depth + 1, out);
        }
    }

    fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[&id]
    }

    fn set_left(&mut self, id: NodeId, child: Option<NodeId>) {
        self.nodes.get_mut(&id).unwrap().left = child;
        if let Some(c) = child {
            self.nodes.get_mut(&c).unwrap().parent = Some(id);
        }
    }

    fn set_right(&mut self, id: NodeId, child: Option<NodeId>) {
        self.nodes.get_mut(&id).unwrap().right = child;
        if let Some(c) = child {
            self.nodes.get_mut(&c).unwrap().parent = Some(id);
        }
    }

    fn height_of(&self, node: Option<NodeId>) -> i32 {
        node.map_or(0, |n| self.nodes[&n].height)
    }

    fn update_height(&mut self, id: NodeId) {
        let height = 1 + self
            .height_of(self.node(id).left)
            .max(self.height_of(self.node(id).right));
        self.nodes.get_mut(&id).unwrap().height = height;
    }

    fn balance_factor(&self, id: NodeId) -> i32 {
        self.height_of(self.node(id).left) - self.height_of(self.node(id).right)
    }

    fn insert(&mut self, subtree: Option<NodeId>, id: NodeId) -> NodeId {
        let Some(current) = subtree else {
            return id;
        };

        if id < current {
            let new_left = self.insert(self.node(current).left, id);
            self.set_left(current, Some(new_left));
        } else if id > current {
            let new_right = self.insert(self.node(current).right, id);
            self.set_right(current, Some(new_right));
        } else {
            return current;
        }

        self.update_height(current);
        self.rebalance(current)
    }

    fn rebalance(&mut self, id: NodeId) -> NodeId {
        let balance = self.balance_factor(id);

        if balance > 1 {
            let left = self.node(id).left.unwrap();
            if self.balance_factor(left) < 0 {
                let rotated = self.rotate_left(left);
                self.set_left(id, Some(rotated));
            }
            return self.rotate_right(id);
        }

        if balance < -1 {
            let right = self.node(id).right.unwrap();
            if self.balance_factor(right) > 0 {
                let rotated = self.rotate_right(right);
                self.set_right(id, Some(rotated));
            }
            return self.rotate_left(id);
        }

        id
    }

    fn rotate_right(&mut self, y: NodeId) -> NodeId {
        let x = self.node(y).left.unwrap();
        let t2 = self.node(x).right;

        self.set_left(y, t2);
        self.set_right(x, Some(y));

        self.update_height(y);
        self.update_height(x);
        x
    }

    fn rotate_left(&mut self, x: NodeId) -> NodeId {
        let y = self.node(x).right.unwrap();
        let t2 = self.node(y).left;

        self.set_right(x, t2);
        self.set_left(y, Some(x));

        self.update_height(x);
        self.update_height(y);
        y
    }

    fn collect_subtree(&self, node: Option<NodeId>, out: &mut Vec<NodeId>) {
        if let Some(n) = node {
            out.push(n);
            self.collect_subtree(self.node(n).left, out);
            self.collect_subtree(self.node(n).right, out);
        }
    }

    /// Recompute heights and restore AVL balance over a whole subtree,
    /// returning its (possibly new) root.
    fn rebuild_balance(&mut self, id: NodeId) -> NodeId {
        if let Some(left) = self.node(id).left {
            let new_left = self.rebuild_balance(left);
            self.set_left(id, Some(new_left));
        }
        if let Some(right) = self.node(id).right {
            let new_right = self.rebuild_balance(right);
            self.set_right(id, Some(new_right));
        }
        self.update_height(id);

        // A detached subtree can leave an imbalance deeper than one rotation
        // repairs; rotate until the node is back within AVL bounds.
        let mut current = id;
        while self.balance_factor(current).abs() > 1 {
            current = self.rebalance(current);
        }
        current
    }
}
