//! Connection registry.
//!
//! Tracks the live connections of one transport binding and notifies
//! listeners on connect and disconnect. Add and remove are idempotent:
//! re-adding a present connection or removing an absent one changes
//! nothing and fires no event, and concurrent removers of the same
//! connection produce exactly one disconnect notification (the winner is
//! decided under the write lock). Snapshots are point-in-time consistent.

use crate::error::ServerError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uarpc_wire::{Frame, SecurityHeader};
use uuid::Uuid;

/// Handle to one live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Registry identity.
    pub id: Uuid,
    /// Remote peer address.
    pub remote_addr: SocketAddr,
    /// When the connection was established.
    pub established_at: DateTime<Utc>,
    /// Security negotiated at channel open.
    pub security: SecurityHeader,
    /// Channel id assigned at open.
    pub channel_id: u32,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl ConnectionHandle {
    pub fn new(
        remote_addr: SocketAddr,
        security: SecurityHeader,
        channel_id: u32,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            established_at: Utc::now(),
            security,
            channel_id,
            outbound,
        }
    }

    /// Queues a frame for the connection's writer task.
    pub fn send(&self, frame: Frame) -> Result<(), ServerError> {
        self.outbound
            .send(frame)
            .map_err(|_| ServerError::ConnectionGone)
    }

    /// Sender for building per-request contexts.
    pub(crate) fn outbound(&self) -> mpsc::UnboundedSender<Frame> {
        self.outbound.clone()
    }
}

/// Observer of registry membership changes.
pub trait ConnectionListener: Send + Sync {
    fn on_connected(&self, connection: &ConnectionHandle);
    fn on_disconnected(&self, connection: &ConnectionHandle);
}

/// Token returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>,
    listeners: RwLock<Vec<(u64, Arc<dyn ConnectionListener>)>>,
    next_listener_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. Returns false (and fires nothing) if a
    /// connection with the same id is already present.
    pub fn add_connection(&self, connection: Arc<ConnectionHandle>) -> bool {
        {
            let mut connections = self.connections.write();
            if connections.contains_key(&connection.id) {
                return false;
            }
            connections.insert(connection.id, connection.clone());
        }
        for listener in self.listeners_snapshot() {
            listener.on_connected(&connection);
        }
        true
    }

    /// Removes a connection. Exactly one caller wins under concurrent
    /// removal; only the winner's listeners fire.
    pub fn remove_connection(&self, id: &Uuid) -> bool {
        let removed = { self.connections.write().remove(id) };
        match removed {
            Some(connection) => {
                for listener in self.listeners_snapshot() {
                    listener.on_disconnected(&connection);
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().get(id).cloned()
    }

    /// A point-in-time copy of the current connection set.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Registers a listener. Events fired before registration are never
    /// replayed to it.
    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push((id, listener));
        ListenerId(id)
    }

    /// Removes a listener; safe to call while events are being delivered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id.0);
        listeners.len() != before
    }

    /// Delivery iterates over a snapshot so listener mutation during an
    /// event cannot skip or double-notify unrelated listeners.
    fn listeners_snapshot(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}
