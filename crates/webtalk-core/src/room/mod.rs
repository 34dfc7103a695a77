//! Room membership and history synchronization
//!
//! ## Overview
//!
//! A room is every tab open on one site. Each tab is a transport connection
//! (a peer); several peers may belong to one logical user. When two peers
//! meet they exchange `SyncUser` handshakes, and whichever side holds newer
//! messages pushes the difference as paced `SyncHistory` batches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  core       RoomCore: pure handlers returning Vec<Effect>       │
//! │  ├── membership   user_id -> RoomUser { peer_ids }              │
//! │  └── history      eligibility window, batching, pacing          │
//! │                                                                 │
//! │  driver     Room / RoomHandle: one tokio task per room          │
//! │  └── applies effects against MessageStore and Transport         │
//! │                                                                 │
//! │  events     RoomEvent, Effect, Delivery                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod core;
pub mod driver;
pub mod events;
pub mod history;
pub mod membership;

pub use self::core::{JoinStatus, ReactionKind, RoomCore, TextDraft};
pub use driver::{Clock, Room, RoomHandle};
pub use events::{Delivery, Effect, RoomEvent, TransportCommand};
pub use history::{eligible_messages, plan_history_sync, HistoryPlan, PlannedSend};
pub use membership::{Membership, PeerPresence};
