//! Core types for WebTalk rooms

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fresh unique id for messages.
pub fn new_message_id() -> String {
    Ulid::new().to_string()
}

/// Identifier of a room.
///
/// A room is scoped to one site origin: every tab open on the same host
/// lands in the same room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the room id for a page host by hex-encoding its UTF-8 bytes.
    pub fn from_host(host: &str) -> Self {
        Self(hex::encode(host.as_bytes()))
    }

    /// Decode the host this room id was derived from, if it was.
    pub fn host(&self) -> Option<String> {
        hex::decode(&self.0)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ephemeral id of one live transport connection.
///
/// A new id is minted for every tab and every reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a random peer id.
    pub fn random() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The local user's stable identity, as supplied by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub avatar: String,
}

impl UserInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: avatar.into(),
        }
    }

    /// Generate a fresh identity with the given display name.
    pub fn generate(name: impl Into<String>) -> Self {
        Self::new(Ulid::new().to_string(), name, "")
    }

    pub fn as_message_user(&self) -> MessageUser {
        MessageUser {
            user_id: self.id.clone(),
            username: self.name.clone(),
            user_avatar: self.avatar.clone(),
        }
    }
}

/// Identity triple stamped on every protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUser {
    pub user_id: String,
    pub username: String,
    pub user_avatar: String,
}

/// A mention inside a text body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtUser {
    pub user_id: String,
    pub username: String,
    pub user_avatar: String,
    /// Character ranges `[start, end]` of each occurrence of the mention
    pub positions: Vec<(u32, u32)>,
}

/// Kind of a local chat-log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// A chat message authored by a user; the only kind that is synced
    Normal,
}

/// A chat-log record as kept by the message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub body: String,
    pub send_time: i64,
    pub receive_time: i64,
    pub user_id: String,
    pub username: String,
    pub user_avatar: String,
    pub like_users: Vec<MessageUser>,
    pub hate_users: Vec<MessageUser>,
    pub at_users: Vec<AtUser>,
}

impl NormalMessage {
    pub fn is_normal(&self) -> bool {
        self.kind == MessageType::Normal
    }

    pub fn author(&self) -> MessageUser {
        MessageUser {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            user_avatar: self.user_avatar.clone(),
        }
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.like_users.iter().any(|u| u.user_id == user_id)
    }

    pub fn is_hated_by(&self, user_id: &str) -> bool {
        self.hate_users.iter().any(|u| u.user_id == user_id)
    }
}

/// Toggle `user` in a reaction set keyed by `user_id`: remove it when
/// present, append it otherwise.
pub fn toggle_reactor(reactors: &[MessageUser], user: MessageUser) -> Vec<MessageUser> {
    if reactors.iter().any(|u| u.user_id == user.user_id) {
        reactors
            .iter()
            .filter(|u| u.user_id != user.user_id)
            .cloned()
            .collect()
    } else {
        let mut next = reactors.to_vec();
        next.push(user);
        next
    }
}

/// One logical user present in the room, possibly over several connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    pub user_id: String,
    pub username: String,
    pub user_avatar: String,
    pub peer_ids: BTreeSet<PeerId>,
    pub join_time: i64,
}

impl RoomUser {
    pub fn as_message_user(&self) -> MessageUser {
        MessageUser {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            user_avatar: self.user_avatar.clone(),
        }
    }

    pub fn has_peer(&self, peer_id: &PeerId) -> bool {
        self.peer_ids.contains(peer_id)
    }

    /// Number of live connections held by this user.
    pub fn connection_count(&self) -> usize {
        self.peer_ids.len()
    }
}
