//! # coedit-db
//!
//! Document layer for Coedit.
//!
//! This crate provides:
//! - Invertible operation records ([`OperationLog`])
//! - Per-author bounded undo/redo ([`HistoryManager`])
//! - Session membership with reconnection buffering ([`SessionRegistry`])
//! - [`Document`], which ties the three to one replicated tree
//!
//! ## Example
//!
//! ```rust,ignore
//! use coedit_db::{Document, DocumentId, Participant};
//! use coedit_core::AuthorId;
//!
//! let mut doc = Document::with_system_clock(DocumentId::new(), "notes");
//! doc.join(Participant::new("alice", "Alice"));
//!
//! let alice = AuthorId::from("alice");
//! doc.paste(&alice, "Hello", None);
//! doc.undo(&alice).unwrap();
//! assert_eq!(doc.text(), "Hell");
//! ```

pub mod document;
pub mod error;
pub mod history;
pub mod op;
pub mod session;

pub use document::{Document, DocumentId};
pub use error::{DbError, Result};
pub use history::{HistoryManager, DEFAULT_HISTORY_DEPTH};
pub use op::{OpKind, OperationId, OperationLog};
pub use session::{Cursor, Participant, Role, SessionRegistry, DEFAULT_RECONNECT_WINDOW_MS};
