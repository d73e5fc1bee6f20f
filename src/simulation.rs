use async_stream::stream;
use coedit_core::{AuthorId, CharacterNode, ParentId, ReplicatedTree};
use coedit_db::{Document, DocumentId, Participant};
use coedit_sdk::{Command, Event, Hub, HubConfigBuilder};
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::TryRecvError;

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub name: &'static str,
    pub num_authors: usize,
    pub edits_per_author: usize,
    pub events_replayed: usize,
    pub final_length: usize,
    pub replicas_converged: usize,
    pub replicas_total: usize,
    pub total_time: Duration,
    pub edits_per_second: f64,
}

impl SimulationStats {
    pub fn converged(&self) -> bool {
        self.replicas_converged == self.replicas_total
    }

    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║  {:<58}║", self.name);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Authors:                   {:>30} ║", self.num_authors);
        println!("║  Edits per Author:          {:>30} ║", self.edits_per_author);
        println!("║  Events Replayed:           {:>30} ║", self.events_replayed);
        println!("║  Final Visible Length:      {:>30} ║", self.final_length);
        println!(
            "║  Converged Replicas:        {:>30} ║",
            format!("{}/{}", self.replicas_converged, self.replicas_total)
        );
        println!(
            "║  Total Time:                {:>29}s ║",
            format!("{:.3}", self.total_time.as_secs_f64())
        );
        println!("║  Edits/Second:              {:>30.0} ║", self.edits_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

#[derive(Clone, Copy, Debug)]
enum Edit {
    Insert(char),
    Delete,
    Undo,
    Redo,
    Move,
}

/// Generator that yields a random edit mix for one author
fn edit_generator(num_edits: usize) -> impl Stream<Item = Edit> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for _ in 0..num_edits {
            let roll = rng.gen_range(0..100);
            yield match roll {
                0..=54 => Edit::Insert(rng.gen_range(b'a'..=b'z') as char),
                55..=74 => Edit::Delete,
                75..=84 => Edit::Undo,
                85..=94 => Edit::Redo,
                _ => Edit::Move,
            };
        }
    }
}

/// Turn an edit into a command against the document's current state
fn to_command(hub: &Hub, id: &DocumentId, author: &AuthorId, edit: Edit) -> Option<Command> {
    let handle = hub.document(id)?;
    let visible: Vec<_> = handle.lock().tree().visible_ids().cloned().collect();

    let mut rng = rand::thread_rng();
    let command = match edit {
        Edit::Insert(value) => Command::Insert {
            document_id: id.clone(),
            author: author.clone(),
            value: value.to_string(),
            parent: visible.choose(&mut rng).map(ParentId::from),
            character_id: None,
        },
        Edit::Delete => Command::Delete {
            document_id: id.clone(),
            author: author.clone(),
            character_id: visible.choose(&mut rng)?.clone(),
        },
        Edit::Undo => Command::Undo {
            document_id: id.clone(),
            author: author.clone(),
        },
        Edit::Redo => Command::Redo {
            document_id: id.clone(),
            author: author.clone(),
        },
        // Moves onto a descendant are rejected by the hub.
        Edit::Move => Command::Reparent {
            document_id: id.clone(),
            author: author.clone(),
            character_id: visible.choose(&mut rng)?.clone(),
            new_parent: visible.choose(&mut rng).map(ParentId::from).unwrap_or_default(),
        },
    };
    Some(command)
}

/// Concurrent authors edit one document through the hub while client
/// replicas follow the broadcast stream. One author stays offline for the
/// whole run and catches up from its missed-operation queue.
pub async fn simulate_collaboration(
    num_authors: usize,
    edits_per_author: usize,
    num_replicas: usize,
) -> SimulationStats {
    println!("\n[Collaboration] Authors: {} | Edits/Author: {} | Replicas: {}",
             num_authors, edits_per_author, num_replicas);

    let capacity = num_authors * edits_per_author * 2 + 64;
    let hub = Arc::new(Hub::new(HubConfigBuilder::new().event_capacity(capacity).build()));
    let id = hub.create_document("simulation");
    let mut rx = hub.subscribe();

    let authors: Vec<AuthorId> = (0..num_authors)
        .map(|n| AuthorId::new(format!("user{}", n)))
        .collect();
    for author in &authors {
        let participant = Participant::new(author.clone(), author.as_str());
        let _ = hub.dispatch(Command::Join { document_id: id.clone(), participant });
    }

    let start = Instant::now();
    println!("[Phase 1/2] Editing...");

    // The last author goes offline and keeps a stale copy.
    let offline = authors.last().cloned();
    if let Some(author) = &offline {
        let _ = hub.dispatch(Command::Disconnect { document_id: id.clone(), author: author.clone() });
    }

    let mut handles = vec![];
    for author in authors.iter().take(num_authors.saturating_sub(1)).cloned() {
        let hub = Arc::clone(&hub);
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            let mut edits = Box::pin(edit_generator(edits_per_author));
            let mut applied = 0;
            while let Some(edit) = edits.next().await {
                if let Some(command) = to_command(&hub, &id, &author, edit) {
                    if hub.dispatch(command).is_ok() {
                        applied += 1;
                    }
                }
                if applied % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            applied
        }));
    }

    let mut total_edits = 0usize;
    for handle in handles {
        total_edits += handle.await.unwrap_or(0);
    }
    println!("[Phase 1/2] ✓ Completed");
    println!("[Phase 2/2] Replaying broadcast stream...");

    let mut replicas: Vec<Document> = (0..num_replicas)
        .map(|n| Document::with_system_clock(id.clone(), format!("replica-{}", n)))
        .collect();
    let mut events_replayed = 0;
    loop {
        match rx.try_recv() {
            Ok(Event::Operation { operation, .. }) | Ok(Event::Reparented { operation, .. }) => {
                for replica in replicas.iter_mut() {
                    let _ = replica.apply_remote(&operation);
                }
                events_replayed += 1;
            }
            Ok(_) => {}
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "replica fell behind the broadcast channel");
            }
            Err(_) => break,
        }
    }

    // The offline author reconnects and replays only what it missed.
    if let Some(author) = offline {
        let mut stale = Document::with_system_clock(id.clone(), "offline");
        if let Ok(events) = hub.dispatch(Command::Reconnect { document_id: id.clone(), author }) {
            for event in events {
                if let Event::MissedOperations { operations, .. } = event {
                    for op in &operations {
                        let _ = stale.apply_remote(op);
                    }
                }
            }
        }
        replicas.push(stale);
    }

    let text = hub.text(&id).unwrap_or_default();
    let replicas_converged = replicas.iter().filter(|r| r.text() == text).count();
    let total_time = start.elapsed();
    println!("[Phase 2/2] ✓ Completed");

    SimulationStats {
        name: "Hub Collaboration",
        num_authors,
        edits_per_author,
        events_replayed,
        final_length: text.chars().count(),
        replicas_converged,
        replicas_total: replicas.len(),
        total_time,
        edits_per_second: total_edits as f64 / total_time.as_secs_f64(),
    }
}

/// Replicas receive the same inserts and deletes in independently shuffled
/// orders and must still agree on the text.
pub async fn simulate_shuffled_delivery(
    num_authors: usize,
    edits_per_author: usize,
    num_replicas: usize,
) -> SimulationStats {
    println!("\n[Shuffled Delivery] Authors: {} | Edits/Author: {} | Replicas: {}",
             num_authors, edits_per_author, num_replicas);

    let start = Instant::now();
    let mut rng = StdRng::from_entropy();
    let mut source = ReplicatedTree::new();
    let mut nodes: Vec<CharacterNode> = Vec::new();

    for _ in 0..edits_per_author {
        for n in 0..num_authors {
            let author = AuthorId::new(format!("user{}", n));
            if !nodes.is_empty() && rng.gen_bool(0.2) {
                let index = rng.gen_range(0..nodes.len());
                nodes[index].deleted = true;
                continue;
            }
            let parent = nodes.choose(&mut rng).map(|node| ParentId::from(&node.id));
            let value = rng.gen_range(b'a'..=b'z') as char;
            nodes.push(source.insert(&author, value, parent));
        }
    }

    let reference = {
        let mut tree = ReplicatedTree::new();
        for node in &nodes {
            tree.insert_existing(node.clone());
        }
        tree
    };

    let mut replicas_converged = 0;
    for _ in 0..num_replicas {
        let mut delivery = nodes.clone();
        delivery.shuffle(&mut rng);
        let mut replica = ReplicatedTree::new();
        for node in delivery {
            replica.insert_existing(node);
        }
        if replica.text() == reference.text() && replica.tombstones() == reference.tombstones() {
            replicas_converged += 1;
        }
        tokio::task::yield_now().await;
    }

    let total_time = start.elapsed();
    let total_edits = num_authors * edits_per_author;

    SimulationStats {
        name: "Shuffled Delivery",
        num_authors,
        edits_per_author,
        events_replayed: nodes.len() * num_replicas,
        final_length: reference.len(),
        replicas_converged,
        replicas_total: num_replicas,
        total_time,
        edits_per_second: total_edits as f64 / total_time.as_secs_f64(),
    }
}
