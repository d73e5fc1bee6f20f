//! Character identities and the per-character node record.

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Wire spelling of [`ParentId::Root`].
pub const ROOT_ID: &str = "ROOT";

/// Identity of an author (a user or a replica acting on their behalf).
///
/// Ordering is lexical; it is the second component of the sibling
/// tie-break key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(pub String);

impl AuthorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Unique identifier of one inserted character.
///
/// Locally generated ids are derived from `(author, timestamp)`; ids
/// chosen by a remote peer are carried verbatim.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharId(String);

impl CharId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The deterministic id for a character created by `author` at `timestamp`.
    pub fn derive(author: &AuthorId, timestamp: Timestamp) -> Self {
        Self(format!("{}-{}", author.0, timestamp))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CharId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CharId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The anchor a character is positioned after.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParentId {
    /// First in the document.
    #[default]
    Root,
    Char(CharId),
}

impl ParentId {
    pub fn is_root(&self) -> bool {
        matches!(self, ParentId::Root)
    }

    pub fn as_char(&self) -> Option<&CharId> {
        match self {
            ParentId::Root => None,
            ParentId::Char(id) => Some(id),
        }
    }
}

impl From<CharId> for ParentId {
    fn from(id: CharId) -> Self {
        ParentId::Char(id)
    }
}

impl From<&CharId> for ParentId {
    fn from(id: &CharId) -> Self {
        ParentId::Char(id.clone())
    }
}

impl From<String> for ParentId {
    fn from(raw: String) -> Self {
        if raw == ROOT_ID {
            ParentId::Root
        } else {
            ParentId::Char(CharId(raw))
        }
    }
}

impl From<ParentId> for String {
    fn from(parent: ParentId) -> Self {
        match parent {
            ParentId::Root => ROOT_ID.to_string(),
            ParentId::Char(id) => id.0,
        }
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentId::Root => f.write_str(ROOT_ID),
            ParentId::Char(id) => f.write_str(id.as_str()),
        }
    }
}

/// One inserted character.
///
/// Everything except `parent` and `deleted` is fixed at creation.
/// Deleted nodes stay in the tree so that characters anchored on them
/// remain addressable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterNode {
    pub id: CharId,
    pub value: char,
    pub author: AuthorId,
    pub parent: ParentId,
    pub timestamp: Timestamp,
    pub deleted: bool,
}

impl CharacterNode {
    /// A live node with an id derived from `(author, timestamp)`.
    pub fn new(author: AuthorId, value: char, parent: ParentId, timestamp: Timestamp) -> Self {
        Self {
            id: CharId::derive(&author, timestamp),
            value,
            author,
            parent,
            timestamp,
            deleted: false,
        }
    }

    /// A live node with an externally chosen id.
    pub fn with_id(
        id: CharId,
        author: AuthorId,
        value: char,
        parent: ParentId,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            value,
            author,
            parent,
            timestamp,
            deleted: false,
        }
    }

    pub fn is_visible(&self) -> bool {
        !self.deleted
    }

    /// Sibling order: timestamp, then author, then id.
    ///
    /// The id comparison only matters for remote nodes that share both
    /// timestamp and author, which locally generated ids never do.
    pub fn sibling_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.author.cmp(&other.author))
            .then_with(|| self.id.cmp(&other.id))
    }
}
