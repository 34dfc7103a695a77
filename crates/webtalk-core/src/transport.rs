//! Peer transport seam and an in-process implementation
//!
//! The room core treats connectivity as a black box: one connection with a
//! `peer_id`, join/leave for the room, broadcast or targeted sends of a
//! serialized payload, and a stream of [`TransportEvent`]s.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  MemoryNetwork (shared, cloneable)                              │
//! │  └── rooms: RoomId -> { PeerId -> event sender }                │
//! │                                                                 │
//! │  MemoryTransport (one per connection / tab)                     │
//! │  ├── join_room(): announce to every member, and every member    │
//! │  │                to the newcomer                               │
//! │  ├── leave_room(): announce departure                           │
//! │  └── send(): deliver to all other members or to targets         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{RoomError, RoomResult};
use crate::types::{PeerId, RoomId};

/// Notification from the transport to the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A serialized payload arrived from a peer
    Message {
        /// The delivering peer
        from: PeerId,
        /// Raw payload text
        payload: String,
    },
    /// A peer connected to the room
    PeerJoined(PeerId),
    /// A peer disconnected from the room
    PeerLeft(PeerId),
    /// Connectivity failure
    Error(String),
}

/// Receiving half handed to the room driver alongside the transport.
pub type TransportReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// One live connection to a room.
///
/// Calls are fire-and-forget: they return once the transport has accepted
/// the request and report failures as errors, never by blocking.
pub trait Transport: Send + Sync + 'static {
    /// Id of this connection
    fn peer_id(&self) -> PeerId;

    /// Connect to the room
    fn join_room(&self) -> RoomResult<()>;

    /// Disconnect from the room
    fn leave_room(&self) -> RoomResult<()>;

    /// Send a payload to `targets`, or to every other peer when `None`
    fn send(&self, payload: &str, targets: Option<&[PeerId]>) -> RoomResult<()>;
}

type Members = HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>;

/// An in-process mesh of rooms.
///
/// Behaves like a WebRTC mesh: a joining peer learns about every member
/// already present, and every member learns about the newcomer.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    rooms: Arc<Mutex<HashMap<RoomId, Members>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection for `room_id` with a random peer id.
    pub fn connect(&self, room_id: &RoomId) -> (MemoryTransport, TransportReceiver) {
        self.connect_as(room_id, PeerId::random())
    }

    /// Open a new connection for `room_id` with a chosen peer id.
    pub fn connect_as(
        &self,
        room_id: &RoomId,
        peer_id: PeerId,
    ) -> (MemoryTransport, TransportReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport {
            network: self.clone(),
            room_id: room_id.clone(),
            peer_id,
            events: tx,
        };
        (transport, rx)
    }

    /// Peers currently joined to `room_id`
    pub fn members(&self, room_id: &RoomId) -> Vec<PeerId> {
        let rooms = self.rooms.lock();
        let mut members: Vec<PeerId> = rooms
            .get(room_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Forcibly drop a peer, as if its connection died.
    ///
    /// Remaining members see `PeerLeft`; the dropped peer sees an error.
    pub fn disconnect(&self, room_id: &RoomId, peer_id: &PeerId) {
        let mut rooms = self.rooms.lock();
        let Some(members) = rooms.get_mut(room_id) else {
            return;
        };
        if let Some(events) = members.remove(peer_id) {
            let _ = events.send(TransportEvent::Error("Connection lost".to_string()));
            for other in members.values() {
                let _ = other.send(TransportEvent::PeerLeft(peer_id.clone()));
            }
            warn!(room = %room_id, peer = %peer_id.short(), "Peer disconnected");
        }
    }
}

/// One connection on a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    room_id: RoomId,
    peer_id: PeerId,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryTransport {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Whether this connection is currently a member of its room
    pub fn is_joined(&self) -> bool {
        let rooms = self.network.rooms.lock();
        rooms
            .get(&self.room_id)
            .is_some_and(|m| m.contains_key(&self.peer_id))
    }
}

impl Transport for MemoryTransport {
    fn peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    fn join_room(&self) -> RoomResult<()> {
        let mut rooms = self.network.rooms.lock();
        let members = rooms.entry(self.room_id.clone()).or_default();
        if members.contains_key(&self.peer_id) {
            debug!(peer = %self.peer_id.short(), "Already joined");
            return Ok(());
        }

        for (id, other) in members.iter() {
            let _ = other.send(TransportEvent::PeerJoined(self.peer_id.clone()));
            let _ = self.events.send(TransportEvent::PeerJoined(id.clone()));
        }
        members.insert(self.peer_id.clone(), self.events.clone());

        info!(
            room = %self.room_id,
            peer = %self.peer_id.short(),
            members = members.len(),
            "Joined room"
        );
        Ok(())
    }

    fn leave_room(&self) -> RoomResult<()> {
        let mut rooms = self.network.rooms.lock();
        let members = rooms
            .get_mut(&self.room_id)
            .ok_or_else(|| RoomError::Transport("Room not joined".to_string()))?;
        if members.remove(&self.peer_id).is_none() {
            return Err(RoomError::Transport("Room not joined".to_string()));
        }

        for other in members.values() {
            let _ = other.send(TransportEvent::PeerLeft(self.peer_id.clone()));
        }
        if members.is_empty() {
            rooms.remove(&self.room_id);
        }

        info!(room = %self.room_id, peer = %self.peer_id.short(), "Left room");
        Ok(())
    }

    fn send(&self, payload: &str, targets: Option<&[PeerId]>) -> RoomResult<()> {
        let rooms = self.network.rooms.lock();
        let members = rooms
            .get(&self.room_id)
            .filter(|m| m.contains_key(&self.peer_id))
            .ok_or_else(|| {
                RoomError::SendFailed("Connection is not established yet.".to_string())
            })?;

        let event = TransportEvent::Message {
            from: self.peer_id.clone(),
            payload: payload.to_string(),
        };

        match targets {
            Some(targets) => {
                for target in targets {
                    match members.get(target) {
                        Some(tx) => {
                            let _ = tx.send(event.clone());
                        }
                        None => debug!(target = %target.short(), "Target not in room"),
                    }
                }
            }
            None => {
                for (id, tx) in members.iter() {
                    if *id != self.peer_id {
                        let _ = tx.send(event.clone());
                    }
                }
            }
        }

        debug!(peer = %self.peer_id.short(), len = payload.len(), "Sent payload");
        Ok(())
    }
}
