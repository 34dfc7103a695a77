//! Wire protocol exchanged between peers in a room
//!
//! Messages are JSON objects tagged by a `type` discriminator with camelCase
//! field names. There is no version field: peers running newer builds may
//! send tags this build does not know, and those are ignored rather than
//! rejected.
//!
//! ## Message Flow
//!
//! ```text
//! Peer A                                   Peer B
//!   |                                        |
//!   |   (transport: B joined)                |
//!   |--- SyncUser {lastMessageTime: 10} ---->|
//!   |<-- SyncUser {lastMessageTime: 0} ------|
//!   |                                        |
//!   |    (A is ahead: 10 > 0)                |
//!   |                                        |
//!   |--- SyncHistory {messages: [..]} ------>|   paced batches
//!   |--- SyncHistory {messages: [..]} ------>|
//!   |                                        |
//!   |<-- Text / Like / Hate (broadcast) -----|
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{RoomError, RoomResult};
use crate::types::{AtUser, MessageUser, NormalMessage, PeerId};

/// Tags this build understands.
pub const KNOWN_TYPES: [&str; 5] = ["Text", "Like", "Hate", "SyncUser", "SyncHistory"];

/// A chat message as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessage {
    pub id: String,
    pub body: String,
    pub send_time: i64,
    pub at_users: Vec<AtUser>,
    pub user_id: String,
    pub username: String,
    pub user_avatar: String,
}

/// A like or hate toggle; `id` is the target message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionMessage {
    pub id: String,
    pub send_time: i64,
    pub user_id: String,
    pub username: String,
    pub user_avatar: String,
}

/// Presence handshake carrying the sender's history cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUserMessage {
    pub id: String,
    pub peer_id: PeerId,
    pub join_time: i64,
    pub send_time: i64,
    /// Send time of the newest normal message the sender holds
    pub last_message_time: i64,
    pub user_id: String,
    pub username: String,
    pub user_avatar: String,
}

/// A batch of past normal messages pushed to a peer that is behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryMessage {
    pub id: String,
    pub send_time: i64,
    pub messages: Vec<NormalMessage>,
    pub user_id: String,
    pub username: String,
    pub user_avatar: String,
}

/// Messages exchanged between peers of a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomMessage {
    Text(TextMessage),
    Like(ReactionMessage),
    Hate(ReactionMessage),
    SyncUser(SyncUserMessage),
    SyncHistory(SyncHistoryMessage),
}

/// Result of decoding an inbound payload that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A well-formed message of a known type
    Message(RoomMessage),
    /// A JSON object whose `type` tag this build does not know
    Unsupported(String),
}

impl RoomMessage {
    /// Encode to a JSON string
    pub fn encode(&self) -> RoomResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialized size in bytes (UTF-8 length of the JSON encoding)
    pub fn byte_size(&self) -> RoomResult<usize> {
        Ok(self.encode()?.len())
    }

    /// Decode and validate an inbound payload.
    ///
    /// Fails with [`RoomError::MalformedMessage`] when the payload is not a
    /// JSON object, has no string `type`, or does not match the schema of
    /// its declared type.
    pub fn decode(payload: &str) -> RoomResult<Inbound> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| RoomError::MalformedMessage(format!("invalid JSON: {}", e)))?;

        let tag = match value.get("type") {
            Some(serde_json::Value::String(tag)) => tag.clone(),
            Some(_) => {
                return Err(RoomError::MalformedMessage(
                    "`type` is not a string".to_string(),
                ))
            }
            None if value.is_object() => {
                return Err(RoomError::MalformedMessage("missing `type`".to_string()))
            }
            None => {
                return Err(RoomError::MalformedMessage(
                    "payload is not an object".to_string(),
                ))
            }
        };

        if !KNOWN_TYPES.contains(&tag.as_str()) {
            return Ok(Inbound::Unsupported(tag));
        }

        serde_json::from_value(value)
            .map(Inbound::Message)
            .map_err(|e| RoomError::MalformedMessage(format!("{}: {}", tag, e)))
    }

    /// The wire tag of this message
    pub fn kind(&self) -> &'static str {
        match self {
            RoomMessage::Text(_) => "Text",
            RoomMessage::Like(_) => "Like",
            RoomMessage::Hate(_) => "Hate",
            RoomMessage::SyncUser(_) => "SyncUser",
            RoomMessage::SyncHistory(_) => "SyncHistory",
        }
    }

    /// Message id (for Like/Hate, the id of the target message)
    pub fn id(&self) -> &str {
        match self {
            RoomMessage::Text(m) => &m.id,
            RoomMessage::Like(m) | RoomMessage::Hate(m) => &m.id,
            RoomMessage::SyncUser(m) => &m.id,
            RoomMessage::SyncHistory(m) => &m.id,
        }
    }

    /// Identity of the sender
    pub fn author(&self) -> MessageUser {
        let (user_id, username, user_avatar) = match self {
            RoomMessage::Text(m) => (&m.user_id, &m.username, &m.user_avatar),
            RoomMessage::Like(m) | RoomMessage::Hate(m) => (&m.user_id, &m.username, &m.user_avatar),
            RoomMessage::SyncUser(m) => (&m.user_id, &m.username, &m.user_avatar),
            RoomMessage::SyncHistory(m) => (&m.user_id, &m.username, &m.user_avatar),
        };
        MessageUser {
            user_id: user_id.clone(),
            username: username.clone(),
            user_avatar: user_avatar.clone(),
        }
    }

    pub fn send_time(&self) -> i64 {
        match self {
            RoomMessage::Text(m) => m.send_time,
            RoomMessage::Like(m) | RoomMessage::Hate(m) => m.send_time,
            RoomMessage::SyncUser(m) => m.send_time,
            RoomMessage::SyncHistory(m) => m.send_time,
        }
    }
}

impl TextMessage {
    /// Local chat-log record for this text, received at `receive_time`.
    pub fn to_normal(&self, receive_time: i64) -> NormalMessage {
        NormalMessage {
            id: self.id.clone(),
            kind: crate::types::MessageType::Normal,
            body: self.body.clone(),
            send_time: self.send_time,
            receive_time,
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            user_avatar: self.user_avatar.clone(),
            like_users: Vec::new(),
            hate_users: Vec::new(),
            at_users: self.at_users.clone(),
        }
    }
}

impl ReactionMessage {
    pub fn reactor(&self) -> MessageUser {
        MessageUser {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            user_avatar: self.user_avatar.clone(),
        }
    }
}
