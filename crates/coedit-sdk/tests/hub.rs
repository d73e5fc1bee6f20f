//! Integration tests for the hub.
//!
//! These tests verify:
//! - Concurrent commands on one document are serialized and broadcast in
//!   the order they were applied
//! - Documents are independent
//! - The background sweeper evicts expired reconnecting participants
//! - A reconnecting participant receives its missed operations, moves included

use coedit_core::{AuthorId, ManualClock, ParentId};
use coedit_db::{Document, DocumentId, Participant};
use coedit_sdk::{Command, Event, Hub, HubConfig, HubConfigBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

fn hub_with(config: HubConfig) -> (Arc<Hub>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    (Arc::new(Hub::with_clock(config, clock.clone())), clock)
}

fn insert(id: &DocumentId, author: &str, value: char, parent: Option<ParentId>) -> Command {
    Command::Insert {
        document_id: id.clone(),
        author: AuthorId::from(author),
        value: value.to_string(),
        parent,
        character_id: None,
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) => return events,
            Err(err) => panic!("receiver failed: {:?}", err),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_authors_converge_with_broadcast_replica() {
    let (hub, _) = hub_with(HubConfigBuilder::new().event_capacity(4096).build());
    let id = DocumentId::from("shared");
    hub.open_document(id.clone(), "shared");
    let mut rx = hub.subscribe();

    let mut tasks = Vec::new();
    for n in 0..8 {
        let hub = hub.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            let author = format!("user{}", n);
            let mut parent = None;
            for i in 0..50u32 {
                let value = char::from_u32('a' as u32 + (i % 26)).unwrap();
                let events = hub.dispatch(insert(&id, &author, value, parent)).unwrap();
                parent = match &events[0] {
                    Event::Operation { operation, .. } => {
                        Some(ParentId::from(&operation.character_id))
                    }
                    other => panic!("unexpected event {:?}", other),
                };
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let text = hub.text(&id).unwrap();
    assert_eq!(text.chars().count(), 400);

    // A client replaying the broadcast stream ends up with the same text.
    let mut replica = Document::new(id.clone(), "replica", Arc::new(ManualClock::new(0)));
    for event in drain(&mut rx) {
        match event {
            Event::Operation { operation, .. } | Event::Reparented { operation, .. } => {
                replica.apply_remote(&operation).unwrap();
            }
            _ => {}
        }
    }
    assert_eq!(replica.text(), text);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn documents_are_independent() {
    let (hub, _) = hub_with(HubConfig::default());
    let first = hub.create_document("first");
    let second = hub.create_document("second");

    let a = {
        let hub = hub.clone();
        let id = first.clone();
        tokio::spawn(async move { hub.dispatch(insert(&id, "user1", 'x', None)) })
    };
    let b = {
        let hub = hub.clone();
        let id = second.clone();
        tokio::spawn(async move { hub.dispatch(insert(&id, "user2", 'y', None)) })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(hub.text(&first).unwrap(), "x");
    assert_eq!(hub.text(&second).unwrap(), "y");

    // A failure in one document leaves the other untouched.
    assert!(hub.dispatch(insert(&first, "user1", 'z', None)).is_ok());
    assert!(hub
        .dispatch(Command::Delete {
            document_id: second.clone(),
            author: AuthorId::from("user2"),
            character_id: "user2-1".into(),
        })
        .is_err());
    assert_eq!(hub.text(&first).unwrap(), "xz");
    assert_eq!(hub.text(&second).unwrap(), "y");
}

#[tokio::test]
async fn sweeper_evicts_expired_participants() {
    let config = HubConfigBuilder::new()
        .reconnect_window(100)
        .sweep_interval(10)
        .build();
    let (hub, clock) = hub_with(config);
    let id = DocumentId::from("doc");
    hub.open_document(id.clone(), "doc");

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

    let mut rx = hub.subscribe();
    let sweeper = hub.spawn_expiry_sweeper();
    clock.advance(101);

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("sweeper did not publish")
        .unwrap();
    match event {
        Event::Presence { participants, .. } => {
            let ids: Vec<_> = participants.into_iter().map(|p| p.id).collect();
            assert_eq!(ids, vec![AuthorId::from("bob")]);
        }
        other => panic!("expected presence, got {:?}", other),
    }

    let events = hub
        .dispatch(Command::Reconnect {
            document_id: id,
            author: AuthorId::from("alice"),
        })
        .unwrap();
    assert!(events.is_empty());
    sweeper.abort();
}

#[tokio::test]
async fn reconnect_delivers_missed_operations_to_recipient() {
    let (hub, _) = hub_with(HubConfig::default());
    let id = DocumentId::from("doc");
    hub.open_document(id.clone(), "doc");
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

    hub.dispatch(Command::Paste {
        document_id: id.clone(),
        author: AuthorId::from("bob"),
        text: "hey".to_string(),
        parent: None,
    })
    .unwrap();

    let events = hub
        .dispatch(Command::Reconnect {
            document_id: id.clone(),
            author: AuthorId::from("alice"),
        })
        .unwrap();

    match &events[0] {
        Event::MissedOperations {
            recipient,
            operations,
            ..
        } => {
            assert_eq!(recipient, &AuthorId::from("alice"));
            assert_eq!(operations.len(), 3);
            assert_eq!(events[0].recipient(), Some(&AuthorId::from("alice")));
        }
        other => panic!("expected missed operations, got {:?}", other),
    }
    assert!(matches!(&events[1], Event::Presence { participants, .. } if participants.len() == 2));
}

#[tokio::test]
async fn reconnecting_participant_catches_up_on_moves() {
    let (hub, _) = hub_with(HubConfig::default());
    let id = DocumentId::from("doc");
    hub.open_document(id.clone(), "doc");
    for name in ["alice", "bob"] {
        hub.dispatch(Command::Join {
            document_id: id.clone(),
            participant: Participant::new(name, name),
        })
        .unwrap();
    }

    // Alice's client follows the broadcast until she drops.
    let mut rx = hub.subscribe();
    let mut alice = Document::new(id.clone(), "alice", Arc::new(ManualClock::new(0)));
    hub.dispatch(insert(&id, "bob", 'x', None)).unwrap();
    hub.dispatch(Command::Paste {
        document_id: id.clone(),
        author: AuthorId::from("bob"),
        text: "ab".to_string(),
        parent: None,
    })
    .unwrap();
    let mut last = None;
    for event in drain(&mut rx) {
        if let Event::Operation { operation, .. } = event {
            alice.apply_remote(&operation).unwrap();
            last = Some(operation.character_id);
        }
    }
    assert_eq!(alice.text(), "xab");

    hub.dispatch(Command::Disconnect {
        document_id: id.clone(),
        author: AuthorId::from("alice"),
    })
    .unwrap();
    let x = alice.tree().position_to_id(0).unwrap();
    hub.dispatch(Command::Reparent {
        document_id: id.clone(),
        author: AuthorId::from("bob"),
        character_id: x,
        new_parent: ParentId::from(&last.unwrap()),
    })
    .unwrap();
    assert_eq!(hub.text(&id).unwrap(), "abx");

    let events = hub
        .dispatch(Command::Reconnect {
            document_id: id.clone(),
            author: AuthorId::from("alice"),
        })
        .unwrap();
    match &events[0] {
        Event::MissedOperations { operations, .. } => {
            for op in operations {
                alice.apply_remote(op).unwrap();
            }
        }
        other => panic!("expected missed operations, got {:?}", other),
    }
    assert_eq!(alice.text(), hub.text(&id).unwrap());
}
