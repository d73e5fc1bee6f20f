//! Document - one document's replicated state.
//!
//! Bundles the character tree, the per-author undo/redo history and the
//! session registry. Every edit that produces an [`OperationLog`] is
//! queued for reconnecting participants before it is handed back for
//! broadcast. Inserts and deletes are also recorded in the acting
//! author's history; moves are not.

use crate::error::{DbError, Result};
use crate::history::{HistoryManager, DEFAULT_HISTORY_DEPTH};
use crate::op::OperationLog;
use crate::session::{Cursor, Participant, SessionRegistry};
use coedit_core::{
    AuthorId, CharId, CharacterNode, Clock, ParentId, Reparent, ReplicatedTree, SystemClock,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ulid::Ulid;

/// Unique identifier for a document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A collaboratively edited plain-text document.
#[derive(Clone, Debug)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    tree: ReplicatedTree,
    history: HistoryManager,
    /// Present while anyone is joined or reconnecting.
    session: Option<SessionRegistry>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Document {
    /// Create an empty document stamped by `clock`.
    pub fn new(id: DocumentId, name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let created_at = clock.now_millis();
        Self {
            id,
            name: name.into(),
            tree: ReplicatedTree::with_clock(clock),
            history: HistoryManager::with_depth(DEFAULT_HISTORY_DEPTH),
            session: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Create an empty document on the system clock.
    pub fn with_system_clock(id: DocumentId, name: impl Into<String>) -> Self {
        Self::new(id, name, Arc::new(SystemClock))
    }

    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history = HistoryManager::with_depth(depth);
        self
    }

    /// Create a document whose text is `content`, chained under the root.
    ///
    /// Imported characters are attributed to `author` but are not part of
    /// anyone's undo history.
    pub fn import(
        id: DocumentId,
        name: impl Into<String>,
        author: &AuthorId,
        content: &str,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut doc = Self::new(id, name, clock);
        let mut parent = ParentId::Root;
        for ch in content.chars() {
            let node = doc.tree.insert(author, ch, Some(parent));
            parent = ParentId::from(&node.id);
        }
        doc
    }

    fn now(&self) -> Timestamp {
        self.tree.clock().now_millis()
    }

    /// Record a locally applied operation and queue it for reconnecting peers.
    fn commit(&mut self, author: &AuthorId, op: OperationLog) -> OperationLog {
        self.history.record(author, op.clone());
        self.fan_out(&op);
        op
    }

    fn fan_out(&mut self, op: &OperationLog) {
        if let Some(session) = self.session.as_mut() {
            session.record_for_reconnecting(op);
        }
        self.updated_at = self.now();
    }

    // === Edits ===

    /// Insert a character with a server-chosen id.
    pub fn insert(
        &mut self,
        author: &AuthorId,
        value: char,
        parent: Option<ParentId>,
    ) -> OperationLog {
        let node = self.tree.insert(author, value, parent);
        let op = OperationLog::insert(author.clone(), node, self.now());
        self.commit(author, op)
    }

    /// Insert a character whose id the client chose; the timestamp is
    /// issued here.
    ///
    /// Returns `None` if the id is already present.
    pub fn integrate(
        &mut self,
        author: &AuthorId,
        id: CharId,
        value: char,
        parent: Option<ParentId>,
    ) -> Option<OperationLog> {
        if self.tree.contains(&id) {
            return None;
        }
        let timestamp = self.tree.stamp(author);
        let node = CharacterNode::with_id(
            id,
            author.clone(),
            value,
            parent.unwrap_or_default(),
            timestamp,
        );
        self.tree.insert_existing(node.clone());
        let op = OperationLog::insert(author.clone(), node, self.now());
        Some(self.commit(author, op))
    }

    /// Tombstone a character.
    ///
    /// Returns `None` when the character was already deleted: nothing is
    /// recorded and nothing needs broadcasting.
    pub fn delete(&mut self, author: &AuthorId, id: &CharId) -> Result<Option<OperationLog>> {
        if !self.tree.delete(id)? {
            return Ok(None);
        }
        let snapshot = self
            .tree
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::CharacterNotFound(id.clone()))?;
        let op = OperationLog::delete(author.clone(), snapshot, self.now());
        Ok(Some(self.commit(author, op)))
    }

    /// Move a character under a new parent. Moves are not undoable.
    ///
    /// A successful move yields an operation that replicas and reconnecting
    /// participants replay; `Unchanged` and `CycleRejected` yield none.
    pub fn reparent(
        &mut self,
        author: &AuthorId,
        id: &CharId,
        new_parent: ParentId,
    ) -> Result<(Reparent, Option<OperationLog>)> {
        let before = self
            .tree
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::CharacterNotFound(id.clone()))?;
        let outcome = self.tree.reparent(id, new_parent.clone())?;
        if outcome != Reparent::Moved {
            return Ok((outcome, None));
        }
        let op = OperationLog::reparent(author.clone(), before, new_parent, self.now());
        self.fan_out(&op);
        Ok((outcome, Some(op)))
    }

    /// Insert `text` as a chain of characters after `parent`.
    pub fn paste(
        &mut self,
        author: &AuthorId,
        text: &str,
        parent: Option<ParentId>,
    ) -> Vec<OperationLog> {
        let mut parent = parent.unwrap_or_default();
        let mut ops = Vec::with_capacity(text.chars().count());
        for ch in text.chars() {
            let op = self.insert(author, ch, Some(parent));
            parent = ParentId::from(&op.character_id);
            ops.push(op);
        }
        ops
    }

    pub fn undo(&mut self, author: &AuthorId) -> Result<Option<OperationLog>> {
        let op = self.history.undo(author, &mut self.tree)?;
        if let Some(op) = &op {
            self.fan_out(op);
        }
        Ok(op)
    }

    pub fn redo(&mut self, author: &AuthorId) -> Result<Option<OperationLog>> {
        let op = self.history.redo(author, &mut self.tree)?;
        if let Some(op) = &op {
            self.fan_out(op);
        }
        Ok(op)
    }

    /// Apply an operation produced by another replica.
    ///
    /// Operations must arrive in the order the hub broadcast them: an
    /// Insert for a known id revives it, which is how undo of a delete and
    /// redo of an insert travel. Nothing is recorded in history. Returns
    /// `false` when the operation changed nothing here.
    pub fn apply_remote(&mut self, op: &OperationLog) -> Result<bool> {
        let changed = if op.is_reparent() {
            self.apply_remote_move(op)?
        } else if self.tree.contains(&op.character_id) {
            if op.is_insert() {
                self.tree.restore(&op.character_id)?
            } else {
                self.tree.delete(&op.character_id)?
            }
        } else {
            let mut node = op
                .node
                .clone()
                .ok_or_else(|| DbError::CharacterNotFound(op.character_id.clone()))?;
            node.deleted = op.is_delete();
            self.tree.insert_existing(node)
        };
        if changed {
            self.fan_out(op);
        }
        Ok(changed)
    }

    fn apply_remote_move(&mut self, op: &OperationLog) -> Result<bool> {
        let new_parent = op.parent.clone().unwrap_or_default();
        if self.tree.contains(&op.character_id) {
            let outcome = self.tree.reparent(&op.character_id, new_parent)?;
            return Ok(outcome == Reparent::Moved);
        }
        // Never seen here: integrate the snapshot already under its new parent.
        let mut node = op
            .node
            .clone()
            .ok_or_else(|| DbError::CharacterNotFound(op.character_id.clone()))?;
        node.parent = new_parent;
        Ok(self.tree.insert_existing(node))
    }

    // === Session ===

    /// Join the session, opening it if needed. Returns the active list.
    pub fn join(&mut self, participant: Participant) -> Vec<Participant> {
        let now = self.now();
        self.session
            .get_or_insert_with(SessionRegistry::new)
            .join(participant, now)
    }

    /// Leave the session. Returns the remaining active list, or `None`
    /// if the participant was not in it. The session closes once empty.
    pub fn leave(&mut self, id: &AuthorId) -> Option<Vec<Participant>> {
        let session = self.session.as_mut()?;
        if !session.leave(id) {
            return None;
        }
        let remaining = session.active_participants();
        self.close_if_empty();
        Some(remaining)
    }

    pub fn disconnect(&mut self, id: &AuthorId) -> bool {
        let now = self.now();
        self.session
            .as_mut()
            .map(|session| session.disconnect(id, now))
            .unwrap_or(false)
    }

    /// Hand back the operations a reconnecting participant missed.
    pub fn reconnect(&mut self, id: &AuthorId) -> Option<Vec<OperationLog>> {
        let now = self.now();
        self.session.as_mut()?.reconnect(id, now)
    }

    /// Evict participants that have been reconnecting for longer than
    /// `window_ms`, closing the session if nobody is left.
    pub fn expire_reconnecting(&mut self, now: Timestamp, window_ms: i64) -> Vec<AuthorId> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let expired = session.expire(now, window_ms);
        self.close_if_empty();
        expired
    }

    pub fn move_cursor(&mut self, id: &AuthorId, cursor: Cursor) -> Result<()> {
        let now = self.now();
        let moved = self
            .session
            .as_mut()
            .map(|session| session.move_cursor(id, cursor, now))
            .unwrap_or(false);
        if moved {
            Ok(())
        } else {
            Err(DbError::ParticipantNotFound(id.clone()))
        }
    }

    fn close_if_empty(&mut self) {
        if self.session.as_ref().is_some_and(SessionRegistry::is_empty) {
            self.session = None;
        }
    }

    // === Queries ===

    pub fn text(&self) -> String {
        self.tree.text()
    }

    pub fn tree(&self) -> &ReplicatedTree {
        &self.tree
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn session(&self) -> Option<&SessionRegistry> {
        self.session.as_ref()
    }

    /// Active participants, empty when no session is open.
    pub fn participants(&self) -> Vec<Participant> {
        self.session
            .as_ref()
            .map(SessionRegistry::active_participants)
            .unwrap_or_default()
    }
}
