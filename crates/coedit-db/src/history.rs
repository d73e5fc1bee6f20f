//! Undo/Redo - per-author bounded history over tree operations.
//!
//! Each author gets:
//! - a short undo history (the most recent `depth` operations, oldest
//!   evicted first)
//! - an unbounded redo stack, cleared whenever the author records a new
//!   operation
//!
//! Undo and redo act on the original character ids, so the operations
//! they return can be broadcast as ordinary inserts and deletes.

use crate::error::{DbError, Result};
use crate::op::{OpKind, OperationLog};
use coedit_core::{AuthorId, ReplicatedTree};
use std::collections::{HashMap, VecDeque};

/// Number of operations each author can undo.
pub const DEFAULT_HISTORY_DEPTH: usize = 3;

#[derive(Clone, Debug, Default)]
struct AuthorHistory {
    undo: VecDeque<OperationLog>,
    redo: Vec<OperationLog>,
}

/// Undo/redo bookkeeping for every author of one document.
#[derive(Clone, Debug)]
pub struct HistoryManager {
    depth: usize,
    authors: HashMap<AuthorId, AuthorHistory>,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_HISTORY_DEPTH)
    }

    pub fn with_depth(depth: usize) -> Self {
        Self {
            depth,
            authors: HashMap::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Record an operation performed by `author` and invalidate their redo stack.
    pub fn record(&mut self, author: &AuthorId, op: OperationLog) {
        let depth = self.depth;
        let history = self.authors.entry(author.clone()).or_default();
        push_bounded(&mut history.undo, op, depth);
        history.redo.clear();
    }

    /// Undo the author's most recent operation.
    ///
    /// Applies the inverse to `tree` and returns it for broadcast, or `None`
    /// when there is nothing to undo.
    pub fn undo(
        &mut self,
        author: &AuthorId,
        tree: &mut ReplicatedTree,
    ) -> Result<Option<OperationLog>> {
        let Some(history) = self.authors.get_mut(author) else {
            return Ok(None);
        };
        let Some(last) = history.undo.pop_back() else {
            return Ok(None);
        };

        if let Err(err) = apply_undo(tree, &last) {
            history.undo.push_back(last);
            return Err(err);
        }

        let mut inverse = last.inverse(author.clone(), tree.clock().now_millis());
        if let Some(current) = tree.get(&last.character_id) {
            if !inverse.is_delete() {
                inverse.parent = Some(current.parent.clone());
            }
            inverse.node = Some(current.clone());
        }

        history.redo.push(last);
        Ok(Some(inverse))
    }

    /// Re-apply the author's most recently undone operation.
    ///
    /// Returns the original operation, or `None` when the redo stack is empty.
    pub fn redo(
        &mut self,
        author: &AuthorId,
        tree: &mut ReplicatedTree,
    ) -> Result<Option<OperationLog>> {
        let depth = self.depth;
        let Some(history) = self.authors.get_mut(author) else {
            return Ok(None);
        };
        let Some(op) = history.redo.pop() else {
            return Ok(None);
        };

        if let Err(err) = apply_redo(tree, &op) {
            history.redo.push(op);
            return Err(err);
        }

        push_bounded(&mut history.undo, op.clone(), depth);
        Ok(Some(op))
    }

    pub fn can_undo(&self, author: &AuthorId) -> bool {
        self.undo_depth(author) > 0
    }

    pub fn can_redo(&self, author: &AuthorId) -> bool {
        self.redo_depth(author) > 0
    }

    pub fn undo_depth(&self, author: &AuthorId) -> usize {
        self.authors.get(author).map(|h| h.undo.len()).unwrap_or(0)
    }

    pub fn redo_depth(&self, author: &AuthorId) -> usize {
        self.authors.get(author).map(|h| h.redo.len()).unwrap_or(0)
    }

    /// Drop everything recorded for `author`.
    pub fn forget(&mut self, author: &AuthorId) {
        self.authors.remove(author);
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(queue: &mut VecDeque<OperationLog>, op: OperationLog, depth: usize) {
    queue.push_back(op);
    while queue.len() > depth {
        queue.pop_front();
    }
}

/// Put the tree back the way it was before `op`.
fn apply_undo(tree: &mut ReplicatedTree, op: &OperationLog) -> Result<()> {
    match op.kind {
        OpKind::Insert => {
            tree.delete(&op.character_id)?;
        }
        OpKind::Delete => revive(tree, op)?,
        OpKind::Reparent => {
            if let Some(node) = &op.node {
                tree.reparent(&op.character_id, node.parent.clone())?;
            }
        }
    }
    Ok(())
}

fn apply_redo(tree: &mut ReplicatedTree, op: &OperationLog) -> Result<()> {
    match op.kind {
        OpKind::Insert => revive(tree, op)?,
        OpKind::Delete => {
            tree.delete(&op.character_id)?;
        }
        OpKind::Reparent => {
            if let Some(parent) = &op.parent {
                tree.reparent(&op.character_id, parent.clone())?;
            }
        }
    }
    Ok(())
}

/// Make the operation's character visible again, re-integrating the
/// snapshot if this replica never saw the character.
fn revive(tree: &mut ReplicatedTree, op: &OperationLog) -> Result<()> {
    if tree.contains(&op.character_id) {
        tree.restore(&op.character_id)?;
        return Ok(());
    }

    match &op.node {
        Some(node) => {
            let mut node = node.clone();
            node.deleted = false;
            tree.insert_existing(node);
            Ok(())
        }
        None => Err(DbError::CharacterNotFound(op.character_id.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_core::{CharacterNode, ManualClock, ParentId};
    use std::sync::Arc;

    struct Fixture {
        tree: ReplicatedTree,
        history: HistoryManager,
        author: AuthorId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tree: ReplicatedTree::with_clock(Arc::new(ManualClock::new(1_000))),
                history: HistoryManager::new(),
                author: AuthorId::from("user1"),
            }
        }

        fn insert(&mut self, value: char, parent: Option<&CharacterNode>) -> CharacterNode {
            let parent = parent.map(|p| ParentId::from(&p.id));
            let node = self.tree.insert(&self.author, value, parent);
            let op = OperationLog::insert(self.author.clone(), node.clone(), node.timestamp);
            self.history.record(&self.author, op);
            node
        }

        fn type_text(&mut self, text: &str) -> Vec<CharacterNode> {
            let mut nodes: Vec<CharacterNode> = Vec::new();
            for ch in text.chars() {
                let parent = nodes.last().cloned();
                nodes.push(self.insert(ch, parent.as_ref()));
            }
            nodes
        }

        fn delete(&mut self, node: &CharacterNode) {
            self.tree.delete(&node.id).unwrap();
            let snapshot = self.tree.get(&node.id).cloned().unwrap();
            let op = OperationLog::delete(self.author.clone(), snapshot, 0);
            self.history.record(&self.author, op);
        }

        fn undo(&mut self) -> Option<OperationLog> {
            self.history.undo(&self.author, &mut self.tree).unwrap()
        }

        fn redo(&mut self) -> Option<OperationLog> {
            self.history.redo(&self.author, &mut self.tree).unwrap()
        }
    }

    #[test]
    fn test_undo_insert_hides_character() {
        let mut f = Fixture::new();
        let nodes = f.type_text("Hello");

        let inverse = f.undo().unwrap();
        assert!(inverse.is_delete());
        assert_eq!(inverse.character_id, nodes[4].id);
        assert_eq!(f.tree.text(), "Hell");
    }

    #[test]
    fn test_redo_restores_same_character() {
        let mut f = Fixture::new();
        let nodes = f.type_text("Hello");

        f.undo();
        f.undo();
        assert_eq!(f.tree.text(), "Hel");

        let redone = f.redo().unwrap();
        assert!(redone.is_insert());
        assert_eq!(redone.character_id, nodes[3].id);
        f.redo();
        assert_eq!(f.tree.text(), "Hello");

        let restored = f.tree.get(&nodes[4].id).unwrap();
        assert_eq!(restored.value, 'o');
        assert_eq!(restored.parent, ParentId::from(&nodes[3].id));
    }

    #[test]
    fn test_history_depth_is_three() {
        let mut f = Fixture::new();
        f.type_text("Hello");
        assert_eq!(f.history.undo_depth(&f.author), 3);

        // Four undos: only the last three inserts are undoable.
        assert!(f.undo().is_some());
        assert!(f.undo().is_some());
        assert!(f.undo().is_some());
        assert!(f.undo().is_none());
        assert_eq!(f.tree.text(), "He");

        // Redo pops the most recently undone insert, the first 'l'.
        f.redo();
        assert_eq!(f.tree.text(), "Hel");
    }

    #[test]
    fn test_record_clears_redo() {
        let mut f = Fixture::new();
        let nodes = f.type_text("ab");

        f.undo();
        assert!(f.history.can_redo(&f.author));

        f.insert('c', Some(&nodes[0]));
        assert!(!f.history.can_redo(&f.author));
        assert!(f.redo().is_none());
    }

    #[test]
    fn test_redo_does_not_exceed_depth() {
        let mut f = Fixture::new();
        f.type_text("abcd");
        f.undo();
        f.redo();
        assert_eq!(f.history.undo_depth(&f.author), 3);
        assert_eq!(f.history.redo_depth(&f.author), 0);
    }

    #[test]
    fn test_undo_delete_reinserts_snapshot() {
        let mut f = Fixture::new();
        let nodes = f.type_text("Hello");
        f.delete(&nodes[2]);
        assert_eq!(f.tree.text(), "Helo");

        let inverse = f.undo().unwrap();
        assert!(inverse.is_insert());
        assert_eq!(inverse.character_id, nodes[2].id);
        assert_eq!(inverse.parent, Some(ParentId::from(&nodes[1].id)));
        assert!(!inverse.node.unwrap().deleted);
        assert_eq!(f.tree.text(), "Hello");

        f.redo();
        assert_eq!(f.tree.text(), "Helo");
    }

    #[test]
    fn test_redo_insert_on_replica_missing_the_character() {
        let mut f = Fixture::new();
        let nodes = f.type_text("a");
        f.undo();

        // A fresh replica that never saw the character.
        let mut other = ReplicatedTree::with_clock(Arc::new(ManualClock::new(0)));
        let redone = f.history.redo(&f.author, &mut other).unwrap().unwrap();
        assert_eq!(redone.character_id, nodes[0].id);
        assert_eq!(other.text(), "a");
    }

    #[test]
    fn test_authors_are_independent() {
        let mut f = Fixture::new();
        f.type_text("ab");

        let other = AuthorId::from("user2");
        let node = f.tree.insert(&other, 'z', None);
        f.history
            .record(&other, OperationLog::insert(other.clone(), node, 0));

        let undone = f.history.undo(&other, &mut f.tree).unwrap().unwrap();
        assert_eq!(undone.author, other);
        assert_eq!(f.tree.text(), "ab");
        assert_eq!(f.history.undo_depth(&f.author), 2);

        f.history.forget(&f.author);
        assert!(!f.history.can_undo(&f.author));
    }

    #[test]
    fn test_recorded_move_undoes_and_redoes() {
        let mut f = Fixture::new();
        let nodes = f.type_text("ab");
        let before = f.tree.get(&nodes[1].id).cloned().unwrap();
        f.tree.reparent(&nodes[1].id, ParentId::Root).unwrap();
        let op = OperationLog::reparent(f.author.clone(), before, ParentId::Root, 0);
        f.history.record(&f.author, op);

        let inverse = f.undo().unwrap();
        assert!(inverse.is_reparent());
        assert_eq!(inverse.parent, Some(ParentId::from(&nodes[0].id)));
        assert_eq!(f.tree.get(&nodes[1].id).unwrap().parent, ParentId::from(&nodes[0].id));

        f.redo();
        assert_eq!(f.tree.get(&nodes[1].id).unwrap().parent, ParentId::Root);
    }

    #[test]
    fn test_failed_undo_keeps_entry() {
        let mut f = Fixture::new();
        f.type_text("ab");

        // A tree that has never seen the characters cannot be edited.
        let mut empty = ReplicatedTree::with_clock(Arc::new(ManualClock::new(0)));
        assert!(f.history.undo(&f.author, &mut empty).is_err());
        assert_eq!(f.history.undo_depth(&f.author), 2);
        assert_eq!(f.history.redo_depth(&f.author), 0);

        f.undo();
        assert_eq!(f.tree.text(), "a");
        assert_eq!(f.history.redo_depth(&f.author), 1);
    }

    #[test]
    fn test_failed_redo_keeps_entry() {
        let mut f = Fixture::new();
        let nodes = f.type_text("a");
        f.delete(&nodes[0]);
        f.undo();

        // Redoing the delete needs the character to exist.
        let mut empty = ReplicatedTree::with_clock(Arc::new(ManualClock::new(0)));
        assert!(f.history.redo(&f.author, &mut empty).is_err());
        assert_eq!(f.history.redo_depth(&f.author), 1);

        f.redo();
        assert_eq!(f.tree.text(), "");
    }

    #[test]
    fn test_empty_history_is_none() {
        let mut f = Fixture::new();
        assert!(f.undo().is_none());
        assert!(f.redo().is_none());
    }
}
