//! Inbound commands and outbound events.
//!
//! Both are closed enums tagged by `"type"`, decoded and encoded once at the
//! transport boundary.

use crate::error::{Result, SdkError};
use coedit_core::{AuthorId, CharId, ParentId};
use coedit_db::{Cursor, DocumentId, OperationLog, Participant};
use serde::{Deserialize, Serialize};

/// A request from the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Insert one character. The client may choose the character id.
    Insert {
        document_id: DocumentId,
        author: AuthorId,
        value: String,
        #[serde(default)]
        parent: Option<ParentId>,
        #[serde(default)]
        character_id: Option<CharId>,
    },
    Delete {
        document_id: DocumentId,
        author: AuthorId,
        character_id: CharId,
    },
    Reparent {
        document_id: DocumentId,
        author: AuthorId,
        character_id: CharId,
        new_parent: ParentId,
    },
    Undo {
        document_id: DocumentId,
        author: AuthorId,
    },
    Redo {
        document_id: DocumentId,
        author: AuthorId,
    },
    /// Insert a run of text as chained characters.
    Paste {
        document_id: DocumentId,
        author: AuthorId,
        text: String,
        #[serde(default)]
        parent: Option<ParentId>,
    },
    #[serde(rename = "CURSOR_MOVE")]
    MoveCursor {
        document_id: DocumentId,
        author: AuthorId,
        cursor: Cursor,
    },
    Join {
        document_id: DocumentId,
        participant: Participant,
    },
    Leave {
        document_id: DocumentId,
        author: AuthorId,
    },
    Disconnect {
        document_id: DocumentId,
        author: AuthorId,
    },
    Reconnect {
        document_id: DocumentId,
        author: AuthorId,
    },
}

impl Command {
    /// Decode a command from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn document_id(&self) -> &DocumentId {
        match self {
            Command::Insert { document_id, .. }
            | Command::Delete { document_id, .. }
            | Command::Reparent { document_id, .. }
            | Command::Undo { document_id, .. }
            | Command::Redo { document_id, .. }
            | Command::Paste { document_id, .. }
            | Command::MoveCursor { document_id, .. }
            | Command::Join { document_id, .. }
            | Command::Leave { document_id, .. }
            | Command::Disconnect { document_id, .. }
            | Command::Reconnect { document_id, .. } => document_id,
        }
    }

    /// Who issued the command.
    pub fn author(&self) -> &AuthorId {
        match self {
            Command::Join { participant, .. } => &participant.id,
            Command::Insert { author, .. }
            | Command::Delete { author, .. }
            | Command::Reparent { author, .. }
            | Command::Undo { author, .. }
            | Command::Redo { author, .. }
            | Command::Paste { author, .. }
            | Command::MoveCursor { author, .. }
            | Command::Leave { author, .. }
            | Command::Disconnect { author, .. }
            | Command::Reconnect { author, .. } => author,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Insert { .. } => "insert",
            Command::Delete { .. } => "delete",
            Command::Reparent { .. } => "reparent",
            Command::Undo { .. } => "undo",
            Command::Redo { .. } => "redo",
            Command::Paste { .. } => "paste",
            Command::MoveCursor { .. } => "cursor_move",
            Command::Join { .. } => "join",
            Command::Leave { .. } => "leave",
            Command::Disconnect { .. } => "disconnect",
            Command::Reconnect { .. } => "reconnect",
        }
    }
}

/// Extract the single character an Insert carries.
pub(crate) fn single_char(value: &str) -> Result<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(ch),
        _ => Err(SdkError::InvalidCommand(format!(
            "insert expects exactly one character, got {:?}",
            value
        ))),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Undo,
    Redo,
}

/// Something the transport should deliver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// An insert or delete, for every participant.
    Operation {
        document_id: DocumentId,
        operation: OperationLog,
    },
    /// A successful move, replayable through `Document::apply_remote`.
    Reparented {
        document_id: DocumentId,
        operation: OperationLog,
    },
    /// The full materialized text.
    Content {
        document_id: DocumentId,
        text: String,
    },
    /// The active participant list.
    Presence {
        document_id: DocumentId,
        participants: Vec<Participant>,
    },
    /// Operations a participant missed, for that participant only.
    MissedOperations {
        document_id: DocumentId,
        recipient: AuthorId,
        operations: Vec<OperationLog>,
    },
    Cursor {
        document_id: DocumentId,
        author: AuthorId,
        cursor: Cursor,
    },
    /// Acknowledges an undo or redo to the author who asked for it.
    HistoryResult {
        document_id: DocumentId,
        recipient: AuthorId,
        action: HistoryAction,
        success: bool,
    },
}

impl Event {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn document_id(&self) -> &DocumentId {
        match self {
            Event::Operation { document_id, .. }
            | Event::Reparented { document_id, .. }
            | Event::Content { document_id, .. }
            | Event::Presence { document_id, .. }
            | Event::MissedOperations { document_id, .. }
            | Event::Cursor { document_id, .. }
            | Event::HistoryResult { document_id, .. } => document_id,
        }
    }

    /// The single participant this event is addressed to, or `None` for a
    /// broadcast to the whole document.
    pub fn recipient(&self) -> Option<&AuthorId> {
        match self {
            Event::MissedOperations { recipient, .. } | Event::HistoryResult { recipient, .. } => {
                Some(recipient)
            }
            _ => None,
        }
    }
}
