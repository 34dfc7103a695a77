//! WebTalk Core Library
//!
//! Room membership and chat-history synchronization for site-scoped,
//! peer-to-peer chat rooms.
//!
//! ## Overview
//!
//! Every visitor of a web page joins the room for that page's host. Peers
//! talk over a mesh transport; there is no server holding the chat log.
//! Each peer keeps its own log, and newcomers are caught up by whoever is
//! ahead of them.
//!
//! ## Core Principles
//!
//! - **Local-first**: every peer owns its copy of the history
//! - **Transport-agnostic**: the room talks to a [`Transport`] trait
//! - **Single writer**: one task per room owns membership and the store
//!
//! ## Quick Start
//!
//! ```ignore
//! use webtalk_core::{MemoryMessageStore, MemoryNetwork, Room, RoomId, StaticIdentity};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = MemoryNetwork::new();
//!     let room_id = RoomId::from_host("example.com");
//!
//!     let (transport, events) = network.connect(&room_id);
//!     let room = Room::new(
//!         room_id,
//!         transport,
//!         events,
//!         MemoryMessageStore::new(),
//!         StaticIdentity::named("alice"),
//!     )
//!     .spawn();
//!
//!     room.join()?;
//!     room.send_text("hello")?;
//!
//!     for message in room.messages().await? {
//!         println!("{}: {}", message.username, message.body);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod protocol;
pub mod room;
pub mod storage;
pub mod store;
pub mod transport;
pub mod types;

// Re-exports
pub use config::RoomConfig;
pub use error::{RoomError, RoomResult};
pub use identity::{IdentityProvider, StaticIdentity};
pub use protocol::{
    Inbound, ReactionMessage, RoomMessage, SyncHistoryMessage, SyncUserMessage, TextMessage,
};
pub use room::{
    Delivery, Effect, JoinStatus, ReactionKind, Room, RoomCore, RoomEvent, RoomHandle, TextDraft,
    TransportCommand,
};
pub use storage::Storage;
pub use store::{MemoryMessageStore, MessageStore, StoreCommand};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, TransportEvent, TransportReceiver};
pub use types::*;
