//! Replayable, invertible edit records.

use coedit_core::{AuthorId, CharId, CharacterNode, ParentId, Timestamp};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for an operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    Insert,
    Delete,
    Reparent,
}

/// One atomic, externally observable edit.
///
/// The node snapshot lets a Delete be replayed as an Insert on undo and
/// lets a redone Insert restore the exact character it created. For a
/// Reparent the snapshot holds the node before the move and `parent` is
/// the new parent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLog {
    pub id: OperationId,
    pub author: AuthorId,
    pub kind: OpKind,
    pub character_id: CharId,
    pub node: Option<CharacterNode>,
    pub parent: Option<ParentId>,
    pub timestamp: Timestamp,
}

impl OperationLog {
    /// An Insert of `node` performed by `author`.
    pub fn insert(author: AuthorId, node: CharacterNode, timestamp: Timestamp) -> Self {
        Self {
            id: OperationId::new(),
            author,
            kind: OpKind::Insert,
            character_id: node.id.clone(),
            parent: Some(node.parent.clone()),
            node: Some(node),
            timestamp,
        }
    }

    /// A Delete of `node` performed by `author`.
    pub fn delete(author: AuthorId, node: CharacterNode, timestamp: Timestamp) -> Self {
        Self {
            id: OperationId::new(),
            author,
            kind: OpKind::Delete,
            character_id: node.id.clone(),
            parent: None,
            node: Some(node),
            timestamp,
        }
    }

    /// A move of `node` (as it was before the move) under `new_parent`.
    pub fn reparent(
        author: AuthorId,
        node: CharacterNode,
        new_parent: ParentId,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: OperationId::new(),
            author,
            kind: OpKind::Reparent,
            character_id: node.id.clone(),
            parent: Some(new_parent),
            node: Some(node),
            timestamp,
        }
    }

    pub fn is_insert(&self) -> bool {
        self.kind == OpKind::Insert
    }

    pub fn is_delete(&self) -> bool {
        self.kind == OpKind::Delete
    }

    pub fn is_reparent(&self) -> bool {
        self.kind == OpKind::Reparent
    }

    /// The operation that cancels this one, attributed to `author`.
    ///
    /// The inverse acts on the same character id; no new ids are minted.
    pub fn inverse(&self, author: AuthorId, timestamp: Timestamp) -> Self {
        let mut node = self.node.clone();
        match self.kind {
            OpKind::Insert => {
                if let Some(node) = node.as_mut() {
                    node.deleted = true;
                }
                Self {
                    id: OperationId::new(),
                    author,
                    kind: OpKind::Delete,
                    character_id: self.character_id.clone(),
                    parent: None,
                    node,
                    timestamp,
                }
            }
            OpKind::Delete => {
                if let Some(node) = node.as_mut() {
                    node.deleted = false;
                }
                Self {
                    id: OperationId::new(),
                    author,
                    kind: OpKind::Insert,
                    character_id: self.character_id.clone(),
                    parent: node.as_ref().map(|n| n.parent.clone()),
                    node,
                    timestamp,
                }
            }
            OpKind::Reparent => {
                let old_parent = node.as_ref().map(|n| n.parent.clone());
                if let (Some(node), Some(moved_to)) = (node.as_mut(), self.parent.as_ref()) {
                    node.parent = moved_to.clone();
                }
                Self {
                    id: OperationId::new(),
                    author,
                    kind: OpKind::Reparent,
                    character_id: self.character_id.clone(),
                    parent: old_parent,
                    node,
                    timestamp,
                }
            }
        }
    }
}
