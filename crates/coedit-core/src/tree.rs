//! Replicated character tree.
//!
//! Every character is a node anchored after a parent (another character
//! or the document root). Siblings are ordered by
//! `(timestamp, author)` ascending and the document text is the pre-order
//! traversal of the tree from the root, so any two replicas holding the
//! same set of nodes produce the same text regardless of the order the
//! nodes arrived in.

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::{Result, TreeError};
use crate::lattice::Lattice;
use crate::node::{AuthorId, CharId, CharacterNode, ParentId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Outcome of [`ReplicatedTree::reparent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reparent {
    /// The node now hangs under the new parent.
    Moved,
    /// The node already had that parent.
    Unchanged,
    /// The move would have made the node its own ancestor; nothing changed.
    CycleRejected,
}

/// Serializable form of a tree: the node table alone.
///
/// The children index is derived and rebuilt on load.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub nodes: Vec<CharacterNode>,
}

/// The replicated character tree for one document.
#[derive(Clone, Debug)]
pub struct ReplicatedTree {
    /// All nodes, tombstones included.
    nodes: HashMap<CharId, CharacterNode>,
    /// Parent -> children, kept sorted by sibling order.
    children: HashMap<ParentId, Vec<CharId>>,
    /// Last timestamp handed out per author, so derived ids never repeat.
    last_stamp: HashMap<AuthorId, Timestamp>,
    clock: Arc<dyn Clock>,
}

impl ReplicatedTree {
    /// Create an empty tree stamped by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty tree stamped by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut children = HashMap::new();
        children.insert(ParentId::Root, Vec::new());

        Self {
            nodes: HashMap::new(),
            children,
            last_stamp: HashMap::new(),
            clock,
        }
    }

    /// Rebuild a tree from a snapshot.
    pub fn from_snapshot(snapshot: TreeSnapshot, clock: Arc<dyn Clock>) -> Self {
        let mut tree = Self::with_clock(clock);
        for node in snapshot.nodes {
            tree.note_stamp(&node.author, node.timestamp);
            tree.nodes.insert(node.id.clone(), node);
        }
        tree.rebuild_index();
        tree
    }

    /// Capture the node table, ordered by id.
    pub fn snapshot(&self) -> TreeSnapshot {
        let mut nodes: Vec<_> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        TreeSnapshot { nodes }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Hand out a creation timestamp for `author`.
    ///
    /// This is the clock reading, bumped past the last timestamp issued to
    /// the same author so that `(author, timestamp)` stays unique even when
    /// the clock is coarse or steps backwards.
    pub fn stamp(&mut self, author: &AuthorId) -> Timestamp {
        let now = self.clock.now_millis();
        let mut stamp = match self.last_stamp.get(author) {
            Some(&last) if now <= last => last + 1,
            _ => now,
        };
        while self.nodes.contains_key(&CharId::derive(author, stamp)) {
            stamp += 1;
        }
        self.last_stamp.insert(author.clone(), stamp);
        stamp
    }

    fn note_stamp(&mut self, author: &AuthorId, timestamp: Timestamp) {
        let last = self.last_stamp.entry(author.clone()).or_insert(timestamp);
        if *last < timestamp {
            *last = timestamp;
        }
    }

    /// Insert a new character after `parent` (the root when `None`).
    ///
    /// The parent is not checked: a character anchored on an unknown id
    /// is kept and surfaces once that id is integrated.
    pub fn insert(
        &mut self,
        author: &AuthorId,
        value: char,
        parent: Option<ParentId>,
    ) -> CharacterNode {
        let timestamp = self.stamp(author);
        let node = CharacterNode::new(author.clone(), value, parent.unwrap_or_default(), timestamp);
        self.nodes.insert(node.id.clone(), node.clone());
        self.link(&node.id);
        node
    }

    /// Integrate a node whose identity was decided elsewhere.
    ///
    /// Returns `false` if the id was already present; in that case only the
    /// tombstone is merged.
    pub fn insert_existing(&mut self, node: CharacterNode) -> bool {
        if let Some(existing) = self.nodes.get_mut(&node.id) {
            existing.deleted |= node.deleted;
            return false;
        }

        self.note_stamp(&node.author, node.timestamp);
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        self.link(&id);
        true
    }

    /// Tombstone a character. Returns `false` if it was already deleted.
    pub fn delete(&mut self, id: &CharId) -> Result<bool> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| TreeError::NotFound(id.clone()))?;
        if node.deleted {
            return Ok(false);
        }
        node.deleted = true;
        Ok(true)
    }

    /// Clear a character's tombstone. Returns `false` if it was visible.
    pub fn restore(&mut self, id: &CharId) -> Result<bool> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| TreeError::NotFound(id.clone()))?;
        if !node.deleted {
            return Ok(false);
        }
        node.deleted = false;
        Ok(true)
    }

    /// Move a character under a new parent.
    ///
    /// The move is refused when `new_parent` is the character itself or one
    /// of its descendants.
    pub fn reparent(&mut self, id: &CharId, new_parent: ParentId) -> Result<Reparent> {
        let old_parent = match self.nodes.get(id) {
            Some(node) => node.parent.clone(),
            None => return Err(TreeError::NotFound(id.clone())),
        };

        if self.would_create_cycle(id, &new_parent) {
            return Ok(Reparent::CycleRejected);
        }
        if old_parent == new_parent {
            return Ok(Reparent::Unchanged);
        }

        self.unlink(id, &old_parent);
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = new_parent;
        }
        self.link(id);
        Ok(Reparent::Moved)
    }

    /// Walk the ancestor chain of `new_parent` looking for `id`.
    fn would_create_cycle(&self, id: &CharId, new_parent: &ParentId) -> bool {
        let mut visited = HashSet::new();
        let mut cursor = new_parent.as_char();
        while let Some(current) = cursor {
            if current == id {
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            cursor = self.nodes.get(current).and_then(|n| n.parent.as_char());
        }
        false
    }

    /// Add `id` to its parent's child list at its sorted position.
    fn link(&mut self, id: &CharId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let nodes = &self.nodes;
        let siblings = self.children.entry(node.parent.clone()).or_default();
        let pos = siblings.partition_point(|sibling| {
            nodes
                .get(sibling)
                .map(|s| s.sibling_cmp(node) == Ordering::Less)
                .unwrap_or(true)
        });
        siblings.insert(pos, id.clone());
    }

    fn unlink(&mut self, id: &CharId, parent: &ParentId) {
        if let Some(siblings) = self.children.get_mut(parent) {
            siblings.retain(|sibling| sibling != id);
        }
    }

    fn rebuild_index(&mut self) {
        self.children.clear();
        self.children.insert(ParentId::Root, Vec::new());

        let mut ids: Vec<CharId> = self.nodes.keys().cloned().collect();
        ids.sort();
        for id in ids {
            self.link(&id);
        }
    }

    // === Queries ===

    pub fn get(&self, id: &CharId) -> Option<&CharacterNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &CharId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Children of `parent` in sibling order, tombstones included.
    pub fn children(&self, parent: &ParentId) -> Vec<&CharacterNode> {
        self.children
            .get(parent)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Number of visible characters.
    pub fn len(&self) -> usize {
        self.nodes.values().filter(|n| n.is_visible()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of nodes, tombstones included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tombstones(&self) -> BTreeSet<CharId> {
        self.nodes
            .values()
            .filter(|n| n.deleted)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Nodes whose parent id is not in the tree. They are invisible until
    /// the parent is integrated.
    pub fn orphans(&self) -> Vec<&CharacterNode> {
        let mut orphans: Vec<_> = self
            .nodes
            .values()
            .filter(|n| matches!(n.parent.as_char(), Some(p) if !self.nodes.contains_key(p)))
            .collect();
        orphans.sort_by(|a, b| a.sibling_cmp(b));
        orphans
    }

    /// The document text.
    pub fn text(&self) -> String {
        self.iter().collect()
    }

    /// Visible characters in document order.
    pub fn iter(&self) -> impl Iterator<Item = char> + '_ {
        self.visible_nodes().map(|n| n.value)
    }

    /// Visible ids in document order.
    pub fn visible_ids(&self) -> impl Iterator<Item = &CharId> + '_ {
        self.visible_nodes().map(|n| &n.id)
    }

    fn visible_nodes(&self) -> impl Iterator<Item = &CharacterNode> + '_ {
        self.iter_nodes().filter(|n| n.is_visible())
    }

    /// Every node reachable from the root, in document order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &CharacterNode> + '_ {
        let mut stack: Vec<&CharId> = Vec::new();
        if let Some(top) = self.children.get(&ParentId::Root) {
            stack.extend(top.iter().rev());
        }
        TreeIterator { tree: self, stack }
    }

    /// Visible index of a character, if it is visible.
    pub fn id_to_position(&self, id: &CharId) -> Option<usize> {
        self.visible_ids().position(|i| i == id)
    }

    /// Id of the visible character at `position`.
    pub fn position_to_id(&self, position: usize) -> Option<CharId> {
        self.visible_ids().nth(position).cloned()
    }
}

/// Pre-order traversal that still descends through tombstones.
struct TreeIterator<'a> {
    tree: &'a ReplicatedTree,
    stack: Vec<&'a CharId>,
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = &'a CharacterNode;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let Some(node) = self.tree.nodes.get(id) else {
                continue;
            };
            if let Some(children) = self.tree.children.get(&ParentId::Char(id.clone())) {
                self.stack.extend(children.iter().rev());
            }
            return Some(node);
        }
        None
    }
}

impl Default for ReplicatedTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReplicatedTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

impl PartialEq for ReplicatedTree {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl Eq for ReplicatedTree {}

impl Lattice for ReplicatedTree {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for node in other.nodes.values() {
            result.insert_existing(node.clone());
        }
        result
    }
}
