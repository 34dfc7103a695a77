//! Room events and effects
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Effect: what a core handler asks the driver to do              │
//! │  ├── Store: mutate the message store                            │
//! │  ├── Transport: join / leave / send (optionally delayed)        │
//! │  └── Emit: publish a RoomEvent to subscribers                   │
//! │                                                                 │
//! │  RoomEvent: notifications for the UI layer                      │
//! │  ├── Joined / SelfJoined / Left / SelfLeft                      │
//! │  ├── PeerJoined / PeerLeft                                      │
//! │  ├── MessageReceived / TextReceived                             │
//! │  ├── TextSent / LikeSent / HateSent                             │
//! │  ├── SyncUserSent / SyncHistorySent                             │
//! │  └── Error                                                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use crate::error::RoomError;
use crate::protocol::{
    ReactionMessage, RoomMessage, SyncHistoryMessage, SyncUserMessage, TextMessage,
};
use crate::store::StoreCommand;
use crate::types::{PeerId, RoomId};

/// Events emitted by a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// The room was joined (by anyone observing this room instance)
    Joined(RoomId),
    /// The local user joined the room
    SelfJoined(RoomId),
    /// The room was left
    Left(RoomId),
    /// The local user left the room
    SelfLeft(RoomId),
    /// A transport connection joined
    PeerJoined(PeerId),
    /// A transport connection left
    PeerLeft(PeerId),
    /// A validated message arrived
    MessageReceived(RoomMessage),
    /// A text message arrived
    TextReceived(TextMessage),
    TextSent(TextMessage),
    LikeSent(ReactionMessage),
    HateSent(ReactionMessage),
    SyncUserSent(SyncUserMessage),
    SyncHistorySent(SyncHistoryMessage),
    /// Something failed; never fatal
    Error(RoomError),
}

impl RoomEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, RoomEvent::Error(_))
    }

    /// The error carried by this event, if it is one
    pub fn error(&self) -> Option<&RoomError> {
        match self {
            RoomEvent::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// When a send is handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Send inline. A failure discards the rest of the handler's effects.
    Immediate,
    /// Fire-and-forget after a delay. Failures are only logged.
    After(Duration),
}

/// Request to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Join,
    Leave,
    Send {
        message: RoomMessage,
        /// `None` broadcasts to every peer in the room
        targets: Option<Vec<PeerId>>,
        delivery: Delivery,
    },
}

/// Follow-up work returned by a core handler, applied in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Store(StoreCommand),
    Transport(TransportCommand),
    Emit(RoomEvent),
}

impl Effect {
    pub fn emit(event: RoomEvent) -> Self {
        Effect::Emit(event)
    }

    pub fn error(err: RoomError) -> Self {
        Effect::Emit(RoomEvent::Error(err))
    }

    pub fn broadcast(message: RoomMessage) -> Self {
        Effect::Transport(TransportCommand::Send {
            message,
            targets: None,
            delivery: Delivery::Immediate,
        })
    }

    pub fn unicast(message: RoomMessage, peer_id: PeerId, delivery: Delivery) -> Self {
        Effect::Transport(TransportCommand::Send {
            message,
            targets: Some(vec![peer_id]),
            delivery,
        })
    }

    /// The message this effect sends, if it is a transport send
    pub fn as_send(&self) -> Option<(&RoomMessage, Option<&[PeerId]>, Delivery)> {
        match self {
            Effect::Transport(TransportCommand::Send {
                message,
                targets,
                delivery,
            }) => Some((message, targets.as_deref(), *delivery)),
            _ => None,
        }
    }

    /// The event this effect emits, if it is an `Emit`
    pub fn as_event(&self) -> Option<&RoomEvent> {
        match self {
            Effect::Emit(event) => Some(event),
            _ => None,
        }
    }
}
