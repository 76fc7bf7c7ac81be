// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room routing and the store-channel forwarder.

use crate::subscriber::{SubscriberId, SubscriberState, Subscription};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vg_core::{Clock, NotificationEvent, VigilConfig, WorkflowId};
use vg_store::{decode, keys, StateStore};

/// A routing scope a subscriber may join.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Every workflow event.
    Global,
    /// One workflow's events.
    Workflow(WorkflowId),
    /// Events addressed to one recipient scope.
    User(String),
}

impl Room {
    /// Parse `"global"`, `"workflow:{id}"`, or `"user:{id}"`.
    pub fn parse(raw: &str) -> Option<Room> {
        if raw == "global" {
            return Some(Room::Global);
        }
        if let Some(id) = raw.strip_prefix("workflow:") {
            return Some(Room::Workflow(WorkflowId::from_string(id)));
        }
        raw.strip_prefix("user:").map(|id| Room::User(id.to_string()))
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Room::Global => f.write_str("global"),
            Room::Workflow(id) => write!(f, "workflow:{id}"),
            Room::User(id) => write!(f, "user:{id}"),
        }
    }
}

struct Connection {
    state: Arc<SubscriberState>,
    rooms: HashSet<Room>,
}

/// Fan-out hub for observer connections.
pub struct ObserverPlane<C: Clock> {
    connections: Mutex<HashMap<SubscriberId, Connection>>,
    queue_size: usize,
    heartbeat_ms: u64,
    clock: C,
}

impl<C: Clock> ObserverPlane<C> {
    pub fn new(config: &VigilConfig, clock: C) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            queue_size: config.observer_queue_size,
            heartbeat_ms: config.heartbeat_ms,
            clock,
        }
    }

    /// Open a connection joined to the given rooms.
    pub fn subscribe(&self, rooms: impl IntoIterator<Item = Room>) -> Subscription {
        let id = SubscriberId::new();
        let state = Arc::new(SubscriberState::new(self.clock.epoch_ms()));
        self.connections.lock().insert(
            id,
            Connection { state: state.clone(), rooms: rooms.into_iter().collect() },
        );
        Subscription { id, state }
    }

    pub fn join(&self, id: &SubscriberId, room: Room) {
        if let Some(connection) = self.connections.lock().get_mut(id) {
            connection.rooms.insert(room);
        }
    }

    pub fn leave(&self, id: &SubscriberId, room: &Room) {
        if let Some(connection) = self.connections.lock().get_mut(id) {
            connection.rooms.remove(room);
        }
    }

    /// Record a heartbeat from a live connection.
    pub fn heartbeat(&self, id: &SubscriberId) {
        if let Some(connection) = self.connections.lock().get(id) {
            connection
                .state
                .last_seen_ms
                .store(self.clock.epoch_ms(), Ordering::Release);
        }
    }

    pub fn disconnect(&self, id: &SubscriberId) {
        if let Some(connection) = self.connections.lock().remove(id) {
            connection.state.close();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Route a workflow event to every matching subscriber.
    pub fn publish(&self, event: &NotificationEvent) {
        let workflow_room = event.workflow_id().map(Room::Workflow);
        let connections = self.connections.lock();
        for connection in connections.values() {
            let matches = connection.rooms.contains(&Room::Global)
                || workflow_room
                    .as_ref()
                    .is_some_and(|room| connection.rooms.contains(room));
            if matches {
                connection.state.push(event.clone(), self.queue_size);
            }
        }
    }

    /// Deliver to one room only (user-scoped pushes).
    pub fn publish_to(&self, room: &Room, event: &NotificationEvent) {
        let connections = self.connections.lock();
        for connection in connections.values() {
            if connection.rooms.contains(room) {
                connection.state.push(event.clone(), self.queue_size);
            }
        }
    }

    /// Close connections that missed two heartbeat intervals. Returns the
    /// closed ids.
    pub fn prune_stale(&self) -> Vec<SubscriberId> {
        let cutoff = self.clock.epoch_ms().saturating_sub(2 * self.heartbeat_ms);
        let mut connections = self.connections.lock();
        let stale: Vec<SubscriberId> = connections
            .iter()
            .filter(|(_, connection)| {
                connection.state.last_seen_ms.load(Ordering::Acquire) < cutoff
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(connection) = connections.remove(id) {
                connection.state.close();
            }
        }
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "closed stale observer connections");
        }
        stale
    }
}

/// Forward the store's workflow-event channel into the plane until
/// cancelled. Broadcast overruns are skipped; observers are lossy by
/// contract.
pub async fn run_forwarder<C: Clock>(
    store: Arc<dyn StateStore>,
    plane: Arc<ObserverPlane<C>>,
    cancel: CancellationToken,
) {
    let mut rx = store.subscribe(keys::EVENTS_CHANNEL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(payload) => match decode::<NotificationEvent>(&payload) {
                    Ok(event) => plane.publish(&event),
                    Err(e) => tracing::warn!(error = %e, "undecodable observer event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "observer forwarder lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
#[path = "plane_tests.rs"]
mod tests;
