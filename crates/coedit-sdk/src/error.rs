//! Error types for the Coedit SDK.

use coedit_db::{DbError, DocumentId};
use thiserror::Error;

/// Error type for SDK operations.
#[derive(Error, Debug)]
pub enum SdkError {
    /// Document not found.
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// An import named a document that is already open.
    #[error("Document already exists: {0}")]
    DocumentExists(DocumentId),

    /// A command that decoded but cannot be carried out.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Document-level failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Command could not be decoded or an event could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
