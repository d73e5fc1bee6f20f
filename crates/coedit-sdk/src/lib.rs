//! Coedit SDK - the collaboration hub a transport layer talks to.
//!
//! The transport decodes each inbound message into a [`Command`], hands it
//! to [`Hub::dispatch`], and delivers the returned [`Event`]s: events with a
//! [`Event::recipient`] go to that participant only, the rest to everyone
//! in the document.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use coedit_sdk::{Command, Hub, HubConfig};
//! use std::sync::Arc;
//!
//! let hub = Arc::new(Hub::new(HubConfig::default()));
//! let doc_id = hub.create_document("meeting-notes");
//! let _sweeper = hub.spawn_expiry_sweeper();
//!
//! let events = hub.dispatch(Command::Paste {
//!     document_id: doc_id.clone(),
//!     author: "alice".into(),
//!     text: "Hello".to_string(),
//!     parent: None,
//! })?;
//! ```
//!
//! # Architecture
//!
//! - [`hub`] - per-document locking, dispatch and expiry sweeps
//! - [`command`] - inbound commands and outbound events
//! - [`config`] - hub configuration
//! - [`error`] - error types

pub mod command;
pub mod config;
pub mod error;
pub mod hub;

pub use command::{Command, Event, HistoryAction};
pub use config::{HubConfig, HubConfigBuilder};
pub use error::{Result, SdkError};
pub use hub::{DocumentHandle, Hub};

// Re-export commonly used types from the lower layers
pub use coedit_core::{AuthorId, CharId, ParentId};
pub use coedit_db::{Cursor, DocumentId, OperationLog, Participant, Role};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::command::{Command, Event};
    pub use crate::config::HubConfig;
    pub use crate::error::SdkError;
    pub use crate::hub::Hub;
    pub use coedit_core::{AuthorId, ParentId};
    pub use coedit_db::{DocumentId, Participant};
}
