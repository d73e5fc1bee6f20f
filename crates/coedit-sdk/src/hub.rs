//! The hub: entry point for the transport layer.
//!
//! Each document sits behind its own mutex. A command locks only the
//! document it names, so documents never contend with each other. Events
//! are published while the document lock is still held, which keeps the
//! broadcast order identical to the order operations were applied.

use crate::command::{single_char, Command, Event, HistoryAction};
use crate::config::HubConfig;
use crate::error::{Result, SdkError};
use coedit_core::{AuthorId, Clock, Reparent, SystemClock, Timestamp};
use coedit_db::{Document, DocumentId, OperationLog};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};

/// Shared handle to one document.
pub type DocumentHandle = Arc<Mutex<Document>>;

/// Routes commands to documents and fans events out to subscribers.
pub struct Hub {
    config: HubConfig,
    clock: Arc<dyn Clock>,
    documents: RwLock<HashMap<DocumentId, DocumentHandle>>,
    event_tx: broadcast::Sender<Event>,
}

impl Hub {
    /// Create a hub on the system clock.
    pub fn new(config: HubConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: HubConfig, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            clock,
            documents: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Subscribe to every event the hub publishes.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    // === Documents ===

    /// Create an empty document with a fresh id.
    pub fn create_document(&self, name: impl Into<String>) -> DocumentId {
        let id = DocumentId::new();
        self.open_document(id.clone(), name);
        id
    }

    /// Get a document, creating it empty if it does not exist.
    pub fn open_document(&self, id: DocumentId, name: impl Into<String>) -> DocumentHandle {
        if let Some(doc) = self.documents.read().get(&id) {
            return doc.clone();
        }

        let mut documents = self.documents.write();
        documents
            .entry(id.clone())
            .or_insert_with(|| {
                info!(document = %id, "document opened");
                Arc::new(Mutex::new(
                    Document::new(id, name, self.clock.clone())
                        .with_history_depth(self.config.history_depth),
                ))
            })
            .clone()
    }

    /// Create a document from existing text and publish its content.
    ///
    /// Refuses an id that is already open, since tasks holding its handle
    /// would keep editing a document nobody else can reach.
    pub fn import_document(
        &self,
        id: DocumentId,
        name: impl Into<String>,
        author: &AuthorId,
        content: &str,
    ) -> Result<Event> {
        let doc = Document::import(id.clone(), name, author, content, self.clock.clone())
            .with_history_depth(self.config.history_depth);
        let event = Event::Content {
            document_id: id.clone(),
            text: doc.text(),
        };

        let handle = Arc::new(Mutex::new(doc));
        let guard = handle.lock();
        {
            let mut documents = self.documents.write();
            if documents.contains_key(&id) {
                warn!(document = %id, "import refused, document already open");
                return Err(SdkError::DocumentExists(id));
            }
            documents.insert(id.clone(), handle.clone());
        }
        info!(document = %id, chars = content.chars().count(), "document imported");
        self.publish(&[event.clone()]);
        drop(guard);
        Ok(event)
    }

    pub fn document(&self, id: &DocumentId) -> Option<DocumentHandle> {
        self.documents.read().get(id).cloned()
    }

    pub fn remove_document(&self, id: &DocumentId) -> bool {
        self.documents.write().remove(id).is_some()
    }

    /// Ids of all open documents, sorted.
    pub fn document_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = self.documents.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The current text of a document.
    pub fn text(&self, id: &DocumentId) -> Result<String> {
        let doc = self
            .document(id)
            .ok_or_else(|| SdkError::DocumentNotFound(id.clone()))?;
        let text = doc.lock().text();
        Ok(text)
    }

    // === Commands ===

    /// Decode and dispatch a JSON command.
    pub fn dispatch_json(&self, json: &str) -> Result<Vec<Event>> {
        self.dispatch(Command::from_json(json)?)
    }

    /// Apply a command to its document.
    ///
    /// Returns the events produced, which are also published to
    /// subscribers.
    pub fn dispatch(&self, command: Command) -> Result<Vec<Event>> {
        let document_id = command.document_id().clone();
        let span = info_span!(
            "dispatch",
            document = %document_id,
            command = command.name(),
            author = %command.author()
        );
        let _enter = span.enter();

        let Some(handle) = self.document(&document_id) else {
            warn!("command for unknown document");
            return Err(SdkError::DocumentNotFound(document_id));
        };

        let mut doc = handle.lock();
        let events = apply(&mut doc, command)?;
        self.publish(&events);
        Ok(events)
    }

    fn publish(&self, events: &[Event]) {
        for event in events {
            // No subscribers is not an error.
            let _ = self.event_tx.send(event.clone());
        }
    }

    // === Expiry ===

    /// Evict reconnecting participants whose window has passed, in every
    /// document. Returns the presence updates that were published.
    pub fn expire_reconnecting(&self, now: Timestamp) -> Vec<Event> {
        let handles: Vec<(DocumentId, DocumentHandle)> = self
            .documents
            .read()
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();

        let mut events = Vec::new();
        for (id, handle) in handles {
            let mut doc = handle.lock();
            let expired = doc.expire_reconnecting(now, self.config.reconnect_window_ms);
            if expired.is_empty() {
                continue;
            }
            info!(document = %id, expired = expired.len(), "reconnection window passed");
            let event = Event::Presence {
                document_id: id,
                participants: doc.participants(),
            };
            self.publish(std::slice::from_ref(&event));
            events.push(event);
        }
        events
    }

    /// Run one expiry sweep at the hub clock's current time.
    pub fn sweep(&self) -> Vec<Event> {
        self.expire_reconnecting(self.clock.now_millis())
    }

    /// Run [`Hub::sweep`] every `sweep_interval_ms` until the hub is dropped.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub: Weak<Hub> = Arc::downgrade(self);
        let period = self.config.sweep_interval().max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(hub) = hub.upgrade() else {
                    debug!("hub dropped, stopping expiry sweeper");
                    break;
                };
                hub.sweep();
            }
        })
    }
}

/// Apply one command under the document lock.
fn apply(doc: &mut Document, command: Command) -> Result<Vec<Event>> {
    let document_id = doc.id.clone();
    let operation = |op: OperationLog| Event::Operation {
        document_id: document_id.clone(),
        operation: op,
    };

    let events = match command {
        Command::Insert {
            author,
            value,
            parent,
            character_id,
            ..
        } => {
            let value = single_char(&value)?;
            let op = match character_id {
                Some(id) => match doc.integrate(&author, id, value, parent) {
                    Some(op) => op,
                    None => {
                        debug!("insert for an existing character id ignored");
                        return Ok(Vec::new());
                    }
                },
                None => doc.insert(&author, value, parent),
            };
            debug!(character = %op.character_id, "inserted");
            vec![operation(op)]
        }
        Command::Delete {
            author,
            character_id,
            ..
        } => match doc.delete(&author, &character_id)? {
            Some(op) => {
                debug!(character = %character_id, "deleted");
                vec![operation(op)]
            }
            None => Vec::new(),
        },
        Command::Reparent {
            author,
            character_id,
            new_parent,
            ..
        } => match doc.reparent(&author, &character_id, new_parent.clone())? {
            (_, Some(op)) => vec![Event::Reparented {
                document_id: document_id.clone(),
                operation: op,
            }],
            (Reparent::CycleRejected, None) => {
                warn!(character = %character_id, parent = %new_parent, "reparent would create a cycle");
                Vec::new()
            }
            (_, None) => Vec::new(),
        },
        Command::Undo { author, .. } => {
            let op = doc.undo(&author)?;
            history_events(&document_id, author, HistoryAction::Undo, op)
        }
        Command::Redo { author, .. } => {
            let op = doc.redo(&author)?;
            history_events(&document_id, author, HistoryAction::Redo, op)
        }
        Command::Paste {
            author,
            text,
            parent,
            ..
        } => {
            let ops = doc.paste(&author, &text, parent);
            debug!(chars = ops.len(), "pasted");
            let mut events: Vec<Event> = ops.into_iter().map(&operation).collect();
            events.push(Event::Content {
                document_id: document_id.clone(),
                text: doc.text(),
            });
            events
        }
        Command::MoveCursor { author, cursor, .. } => {
            doc.move_cursor(&author, cursor)?;
            vec![Event::Cursor {
                document_id: document_id.clone(),
                author,
                cursor,
            }]
        }
        Command::Join { participant, .. } => {
            info!(participant = %participant.id, role = ?participant.role, "joined");
            vec![Event::Presence {
                document_id: document_id.clone(),
                participants: doc.join(participant),
            }]
        }
        Command::Leave { author, .. } => match doc.leave(&author) {
            Some(participants) => {
                info!(participant = %author, "left");
                vec![Event::Presence {
                    document_id: document_id.clone(),
                    participants,
                }]
            }
            None => Vec::new(),
        },
        Command::Disconnect { author, .. } => {
            if !doc.disconnect(&author) {
                return Ok(Vec::new());
            }
            info!(participant = %author, "disconnected, buffering operations");
            vec![Event::Presence {
                document_id: document_id.clone(),
                participants: doc.participants(),
            }]
        }
        Command::Reconnect { author, .. } => match doc.reconnect(&author) {
            Some(missed) => {
                info!(participant = %author, missed = missed.len(), "reconnected");
                vec![
                    Event::MissedOperations {
                        document_id: document_id.clone(),
                        recipient: author,
                        operations: missed,
                    },
                    Event::Presence {
                        document_id: document_id.clone(),
                        participants: doc.participants(),
                    },
                ]
            }
            None => {
                info!(participant = %author, "reconnect without a pending window");
                Vec::new()
            }
        },
    };
    Ok(events)
}

fn history_events(
    document_id: &DocumentId,
    author: AuthorId,
    action: HistoryAction,
    op: Option<OperationLog>,
) -> Vec<Event> {
    let success = op.is_some();
    let mut events: Vec<Event> = op
        .into_iter()
        .map(|operation| Event::Operation {
            document_id: document_id.clone(),
            operation,
        })
        .collect();
    events.push(Event::HistoryResult {
        document_id: document_id.clone(),
        recipient: author,
        action,
        success,
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_core::{CharId, ManualClock, ParentId};
    use coedit_db::{Cursor, Participant};

    fn hub() -> (Hub, Arc<ManualClock>, DocumentId) {
        let clock = Arc::new(ManualClock::new(1_000));
        let hub = Hub::with_clock(HubConfig::default(), clock.clone());
        let id = DocumentId::from("doc1");
        hub.open_document(id.clone(), "notes");
        (hub, clock, id)
    }

    fn insert(id: &DocumentId, author: &str, value: &str, parent: Option<ParentId>) -> Command {
        Command::Insert {
            document_id: id.clone(),
            author: AuthorId::from(author),
            value: value.to_string(),
            parent,
            character_id: None,
        }
    }

    fn inserted_id(events: &[Event]) -> CharId {
        match &events[0] {
            Event::Operation { operation, .. } => operation.character_id.clone(),
            other => panic!("expected an operation, got {:?}", other),
        }
    }

    #[test]
    fn test_insert_and_delete_events() {
        let (hub, _, id) = hub();
        let events = hub.dispatch(insert(&id, "user1", "a", None)).unwrap();
        let a = inserted_id(&events);

        let delete = Command::Delete {
            document_id: id.clone(),
            author: AuthorId::from("user1"),
            character_id: a.clone(),
        };
        assert_eq!(hub.dispatch(delete.clone()).unwrap().len(), 1);
        // Second delete of the same character: nothing to broadcast.
        assert!(hub.dispatch(delete).unwrap().is_empty());
        assert_eq!(hub.text(&id).unwrap(), "");
    }

    #[test]
    fn test_delete_unknown_character_is_error() {
        let (hub, _, id) = hub();
        let err = hub
            .dispatch(Command::Delete {
                document_id: id,
                author: AuthorId::from("user1"),
                character_id: CharId::from("user1-42"),
            })
            .unwrap_err();
        assert!(matches!(err, SdkError::Db(_)));
    }

    #[test]
    fn test_unknown_document() {
        let (hub, _, _) = hub();
        let err = hub
            .dispatch(insert(&DocumentId::from("missing"), "user1", "a", None))
            .unwrap_err();
        assert!(matches!(err, SdkError::DocumentNotFound(_)));
    }

    #[test]
    fn test_multi_char_insert_is_invalid() {
        let (hub, _, id) = hub();
        let err = hub.dispatch(insert(&id, "user1", "ab", None)).unwrap_err();
        assert!(matches!(err, SdkError::InvalidCommand(_)));
    }

    #[test]
    fn test_undo_on_empty_history_acks_failure() {
        let (hub, _, id) = hub();
        let events = hub
            .dispatch(Command::Undo {
                document_id: id.clone(),
                author: AuthorId::from("user1"),
            })
            .unwrap();

        assert_eq!(
            events,
            vec![Event::HistoryResult {
                document_id: id,
                recipient: AuthorId::from("user1"),
                action: HistoryAction::Undo,
                success: false,
            }]
        );
    }

    #[test]
    fn test_undo_emits_operation_and_ack() {
        let (hub, _, id) = hub();
        hub.dispatch(insert(&id, "user1", "a", None)).unwrap();
        let events = hub
            .dispatch(Command::Undo {
                document_id: id.clone(),
                author: AuthorId::from("user1"),
            })
            .unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::Operation { operation, .. } if operation.is_delete()));
        assert!(matches!(events[1], Event::HistoryResult { success: true, .. }));
    }

    #[test]
    fn test_reparent_cycle_produces_no_event() {
        let (hub, _, id) = hub();
        let a = inserted_id(&hub.dispatch(insert(&id, "user1", "a", None)).unwrap());
        let b = inserted_id(
            &hub.dispatch(insert(&id, "user1", "b", Some(ParentId::from(&a))))
                .unwrap(),
        );

        let events = hub
            .dispatch(Command::Reparent {
                document_id: id.clone(),
                author: AuthorId::from("user1"),
                character_id: a.clone(),
                new_parent: ParentId::from(&b),
            })
            .unwrap();
        assert!(events.is_empty());

        let events = hub
            .dispatch(Command::Reparent {
                document_id: id.clone(),
                author: AuthorId::from("user1"),
                character_id: b,
                new_parent: ParentId::Root,
            })
            .unwrap();
        match &events[0] {
            Event::Reparented { operation, .. } => {
                assert!(operation.is_reparent());
                assert_eq!(operation.parent, Some(ParentId::Root));
            }
            other => panic!("expected reparent, got {:?}", other),
        }
        assert_eq!(hub.text(&id).unwrap(), "ab");
    }

    #[test]
    fn test_paste_emits_content() {
        let (hub, _, id) = hub();
        let events = hub
            .dispatch(Command::Paste {
                document_id: id.clone(),
                author: AuthorId::from("user1"),
                text: "Hello".to_string(),
                parent: None,
            })
            .unwrap();

        assert_eq!(events.len(), 6);
        assert_eq!(
            events.last(),
            Some(&Event::Content {
                document_id: id,
                text: "Hello".to_string(),
            })
        );
    }

    #[test]
    fn test_cursor_requires_active_participant() {
        let (hub, _, id) = hub();
        let cursor = Command::MoveCursor {
            document_id: id.clone(),
            author: AuthorId::from("alice"),
            cursor: Cursor::new(1, 2),
        };
        assert!(hub.dispatch(cursor.clone()).is_err());

        hub.dispatch(Command::Join {
            document_id: id,
            participant: Participant::new("alice", "Alice"),
        })
        .unwrap();
        let events = hub.dispatch(cursor).unwrap();
        assert!(matches!(events[0], Event::Cursor { .. }));
    }

    #[test]
    fn test_import_publishes_content() {
        let (hub, _, _) = hub();
        let mut rx = hub.subscribe();
        let id = DocumentId::from("imported");
        hub.import_document(id.clone(), "readme", &AuthorId::from("owner"), "Hi")
            .unwrap();

        assert_eq!(hub.text(&id).unwrap(), "Hi");
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::Content {
                document_id: id,
                text: "Hi".to_string(),
            }
        );
    }

    #[test]
    fn test_import_refuses_open_document() {
        let (hub, _, id) = hub();
        hub.dispatch(insert(&id, "user1", "a", None)).unwrap();
        let handle = hub.document(&id).unwrap();

        let err = hub
            .import_document(id.clone(), "again", &AuthorId::from("owner"), "zzz")
            .unwrap_err();
        assert!(matches!(err, SdkError::DocumentExists(ref existing) if existing == &id));

        // The open handle is still the one the hub routes to.
        handle.lock().insert(&AuthorId::from("user1"), 'b', None);
        assert_eq!(hub.text(&id).unwrap(), "ab");
    }

    #[test]
    fn test_subscribers_see_dispatched_events() {
        let (hub, _, id) = hub();
        let mut rx = hub.subscribe();
        let events = hub.dispatch(insert(&id, "user1", "a", None)).unwrap();

        let received = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(received, events[0]);
    }

    #[test]
    fn test_dispatch_json() {
        let (hub, _, _) = hub();
        let events = hub
            .dispatch_json(r#"{"type":"INSERT","document_id":"doc1","author":"u","value":"z"}"#)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(hub.dispatch_json("not json").is_err());
    }

    #[test]
    fn test_expire_reconnecting_publishes_presence() {
        let (hub, clock, id) = hub();
        for name in ["alice", "bob"] {
            hub.dispatch(Command::Join {
                document_id: id.clone(),
                participant: Participant::new(name, name),
            })
            .unwrap();
        }
        hub.dispatch(Command::Disconnect {
            document_id: id.clone(),
            author: AuthorId::from("alice"),
        })
        .unwrap();

        assert!(hub.sweep().is_empty());
        clock.advance(hub.config().reconnect_window_ms + 1);
        let events = hub.sweep();

        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Presence { participants, .. } => {
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].id, AuthorId::from("bob"));
            }
            other => panic!("expected presence, got {:?}", other),
        }
    }
}
