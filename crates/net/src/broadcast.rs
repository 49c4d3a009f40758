//! Room broadcast channel
//!
//! The coordinator talks to connected clients only through
//! [`BroadcastChannel`]. [`RoomHub`] is the in-process implementation used by
//! the TCP server: every connection owns an outbound queue and is attached to
//! at most one room. A connection whose queue overflows is dropped from the
//! hub, which closes it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::Event;

/// Identifier of a transport connection
pub type ConnectionId = u64;

/// Delivery of events to connections and rooms
pub trait BroadcastChannel: Send + Sync {
    /// Deliver to a single connection
    fn send_to(&self, connection: ConnectionId, event: Event);

    /// Attach a connection to a room, leaving any previous one
    fn join(&self, connection: ConnectionId, room: Uuid);

    /// Deliver to every connection in the room
    fn broadcast(&self, room: Uuid, event: Event);

    /// Deliver to every connection in the room but one
    fn broadcast_except(&self, room: Uuid, except: ConnectionId, event: Event);

    /// Detach every connection from a room
    fn close_room(&self, room: Uuid);
}

struct Peer {
    room: Option<Uuid>,
    tx: mpsc::Sender<Event>,
}

/// Connection registry keyed by connection id
#[derive(Default)]
pub struct RoomHub {
    peers: RwLock<HashMap<ConnectionId, Peer>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue
    pub fn register(&self, connection: ConnectionId, tx: mpsc::Sender<Event>) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        peers.insert(connection, Peer { room: None, tx });
    }

    /// Forget a connection
    pub fn unregister(&self, connection: ConnectionId) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        peers.remove(&connection);
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Room a connection is attached to
    pub fn room_of(&self, connection: ConnectionId) -> Option<Uuid> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&connection)
            .and_then(|p| p.room)
    }

    /// Queue an event; `false` once the connection's queue has overflowed
    fn deliver(connection: ConnectionId, peer: &Peer, event: Event) -> bool {
        match peer.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection, "Outbound queue full, evicting connection");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection, "Failed to queue event for closed connection");
                true
            }
        }
    }

    /// Drop lagging connections so their writers exit and the socket closes.
    /// A client that missed events must rejoin to get a fresh snapshot.
    fn evict(&self, lagging: Vec<ConnectionId>) {
        if lagging.is_empty() {
            return;
        }
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        for connection in lagging {
            peers.remove(&connection);
        }
    }

    fn fan_out(&self, room: Uuid, except: Option<ConnectionId>, event: Event) {
        let lagging: Vec<_> = {
            let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
            peers
                .iter()
                .filter(|(id, peer)| peer.room == Some(room) && except != Some(**id))
                .filter(|(id, peer)| !Self::deliver(**id, peer, event.clone()))
                .map(|(id, _)| *id)
                .collect()
        };
        self.evict(lagging);
    }
}

impl BroadcastChannel for RoomHub {
    fn send_to(&self, connection: ConnectionId, event: Event) {
        let delivered = {
            let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
            peers
                .get(&connection)
                .map_or(true, |peer| Self::deliver(connection, peer, event))
        };
        if !delivered {
            self.evict(vec![connection]);
        }
    }

    fn join(&self, connection: ConnectionId, room: Uuid) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(peer) = peers.get_mut(&connection) {
            peer.room = Some(room);
        }
    }

    fn broadcast(&self, room: Uuid, event: Event) {
        self.fan_out(room, None, event);
    }

    fn broadcast_except(&self, room: Uuid, except: ConnectionId, event: Event) {
        self.fan_out(room, Some(except), event);
    }

    fn close_room(&self, room: Uuid) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        for peer in peers.values_mut().filter(|p| p.room == Some(room)) {
            peer.room = None;
        }
    }
}
