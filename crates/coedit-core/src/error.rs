//! Error types for tree operations.

use crate::node::CharId;
use thiserror::Error;

/// Errors raised by [`crate::ReplicatedTree`] mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Character not found: {0}")]
    NotFound(CharId),
}

pub type Result<T> = std::result::Result<T, TreeError>;
