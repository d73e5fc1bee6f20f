//! Session registry - document membership and reconnection buffering.
//!
//! A participant is either:
//! - active: receives operations live
//! - reconnecting: dropped off the transport; operations applied in the
//!   meantime are queued and handed back on reconnect
//!
//! Reconnecting participants that stay away longer than the reconnection
//! window are evicted together with their queues.

use crate::op::OperationLog;
use coedit_core::{AuthorId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How long a reconnecting participant's queue is kept (5 minutes).
pub const DEFAULT_RECONNECT_WINDOW_MS: i64 = 5 * 60 * 1000;

/// What a participant is allowed to do in a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Editor,
    Viewer,
}

/// A caret position as the editor reports it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub line: u32,
    pub column: u32,
}

impl Cursor {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A member of a document session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: AuthorId,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub cursor: Option<Cursor>,
    /// Milliseconds of the last join, disconnect or cursor move.
    #[serde(default)]
    pub last_activity: Timestamp,
}

impl Participant {
    pub fn new(id: impl Into<AuthorId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Editor,
            cursor: None,
            last_activity: 0,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn can_edit(&self) -> bool {
        self.role == Role::Editor
    }
}

/// Membership and missed-operation queues for one document.
#[derive(Clone, Debug)]
pub struct SessionRegistry {
    active: HashMap<AuthorId, Participant>,
    reconnecting: HashMap<AuthorId, Participant>,
    missed: HashMap<AuthorId, Vec<OperationLog>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
            reconnecting: HashMap::new(),
            missed: HashMap::new(),
        }
    }

    /// Add a participant to the active set and return the active list.
    ///
    /// Joining while reconnecting counts as a fresh join: the queued
    /// operations are dropped since the client reloads the document.
    pub fn join(&mut self, mut participant: Participant, now: Timestamp) -> Vec<Participant> {
        participant.last_activity = now;
        self.reconnecting.remove(&participant.id);
        self.missed.remove(&participant.id);
        self.active.insert(participant.id.clone(), participant);
        self.active_participants()
    }

    /// Remove a participant entirely. Returns `false` if it was unknown.
    pub fn leave(&mut self, id: &AuthorId) -> bool {
        let was_active = self.active.remove(id).is_some();
        let was_reconnecting = self.reconnecting.remove(id).is_some();
        self.missed.remove(id);
        was_active || was_reconnecting
    }

    /// Move an active participant to reconnecting with an empty queue.
    pub fn disconnect(&mut self, id: &AuthorId, now: Timestamp) -> bool {
        let Some(mut participant) = self.active.remove(id) else {
            return false;
        };
        participant.last_activity = now;
        self.reconnecting.insert(id.clone(), participant);
        self.missed.insert(id.clone(), Vec::new());
        true
    }

    /// Queue `op` for every reconnecting participant.
    ///
    /// Returns the number of queues the operation was appended to.
    pub fn record_for_reconnecting(&mut self, op: &OperationLog) -> usize {
        for queue in self.missed.values_mut() {
            queue.push(op.clone());
        }
        self.missed.len()
    }

    /// Move a reconnecting participant back to active and hand over its queue.
    ///
    /// Returns `None` if the participant was not reconnecting, e.g. because
    /// its window already expired.
    pub fn reconnect(&mut self, id: &AuthorId, now: Timestamp) -> Option<Vec<OperationLog>> {
        let mut participant = self.reconnecting.remove(id)?;
        participant.last_activity = now;
        self.active.insert(id.clone(), participant);
        Some(self.missed.remove(id).unwrap_or_default())
    }

    /// Evict reconnecting participants idle for longer than `window_ms`.
    pub fn expire(&mut self, now: Timestamp, window_ms: i64) -> Vec<AuthorId> {
        let mut expired: Vec<AuthorId> = self
            .reconnecting
            .values()
            .filter(|p| now - p.last_activity > window_ms)
            .map(|p| p.id.clone())
            .collect();
        expired.sort();

        for id in &expired {
            self.reconnecting.remove(id);
            self.missed.remove(id);
        }
        expired
    }

    /// Update an active participant's cursor.
    pub fn move_cursor(&mut self, id: &AuthorId, cursor: Cursor, now: Timestamp) -> bool {
        match self.active.get_mut(id) {
            Some(participant) => {
                participant.cursor = Some(cursor);
                participant.last_activity = now;
                true
            }
            None => false,
        }
    }

    // === Queries ===

    /// Active participants ordered by id.
    pub fn active_participants(&self) -> Vec<Participant> {
        let mut participants: Vec<_> = self.active.values().cloned().collect();
        participants.sort_by(|a, b| a.id.cmp(&b.id));
        participants
    }

    pub fn participant(&self, id: &AuthorId) -> Option<&Participant> {
        self.active.get(id).or_else(|| self.reconnecting.get(id))
    }

    pub fn is_active(&self, id: &AuthorId) -> bool {
        self.active.contains_key(id)
    }

    pub fn is_reconnecting(&self, id: &AuthorId) -> bool {
        self.reconnecting.contains_key(id)
    }

    pub fn has_reconnecting(&self) -> bool {
        !self.reconnecting.is_empty()
    }

    pub fn missed_count(&self, id: &AuthorId) -> usize {
        self.missed.get(id).map(Vec::len).unwrap_or(0)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// No active and no reconnecting participants.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.reconnecting.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
