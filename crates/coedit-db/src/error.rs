//! Error types for the document layer.

use coedit_core::{AuthorId, CharId, TreeError};
use thiserror::Error;

/// Errors that can occur in document operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Character not found: {0}")]
    CharacterNotFound(CharId),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(AuthorId),
}

impl From<TreeError> for DbError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound(id) => DbError::CharacterNotFound(id),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
