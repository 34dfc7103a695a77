//! Message store abstraction
//!
//! The room core never holds its own copy of the chat log. It reads through
//! [`MessageStore`] and mutates it only by issuing [`StoreCommand`]s, which
//! the room driver applies in order.

use std::collections::HashMap;

use tracing::debug;

use crate::error::RoomResult;
use crate::types::NormalMessage;

/// Mutation issued by the room core against the message store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Append a new message (ignored when the id already exists)
    Create(NormalMessage),
    /// Replace an existing message (ignored when the id is unknown)
    Update(NormalMessage),
    /// Insert if absent, else replace
    Upsert(NormalMessage),
    /// Remove every message
    Clear,
}

/// Ordered, keyed collection of chat messages.
pub trait MessageStore: Send + 'static {
    /// All messages in insertion order
    fn list(&self) -> RoomResult<Vec<NormalMessage>>;

    fn get(&self, id: &str) -> RoomResult<Option<NormalMessage>>;

    fn has(&self, id: &str) -> RoomResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    fn create(&mut self, message: NormalMessage) -> RoomResult<()>;

    fn update(&mut self, message: NormalMessage) -> RoomResult<()>;

    fn upsert(&mut self, message: NormalMessage) -> RoomResult<()>;

    fn clear(&mut self) -> RoomResult<()>;

    /// Apply one command issued by the room core.
    fn apply(&mut self, command: StoreCommand) -> RoomResult<()> {
        match command {
            StoreCommand::Create(message) => self.create(message),
            StoreCommand::Update(message) => self.update(message),
            StoreCommand::Upsert(message) => self.upsert(message),
            StoreCommand::Clear => self.clear(),
        }
    }

    /// Send time of the newest normal message, or 0 when there is none.
    fn last_message_time(&self) -> RoomResult<i64> {
        Ok(self
            .list()?
            .iter()
            .filter(|m| m.is_normal())
            .map(|m| m.send_time)
            .max()
            .unwrap_or(0))
    }
}

/// In-memory message store
#[derive(Debug, Default, Clone)]
pub struct MemoryMessageStore {
    messages: Vec<NormalMessage>,
    index: HashMap<String, usize>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: impl IntoIterator<Item = NormalMessage>) -> Self {
        let mut store = Self::new();
        for message in messages {
            store.insert_or_replace(message);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Ids in insertion order
    pub fn ids(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    fn insert_or_replace(&mut self, message: NormalMessage) {
        match self.index.get(&message.id) {
            Some(&pos) => self.messages[pos] = message,
            None => {
                self.index.insert(message.id.clone(), self.messages.len());
                self.messages.push(message);
            }
        }
    }
}

impl MessageStore for MemoryMessageStore {
    fn list(&self) -> RoomResult<Vec<NormalMessage>> {
        Ok(self.messages.clone())
    }

    fn get(&self, id: &str) -> RoomResult<Option<NormalMessage>> {
        Ok(self.index.get(id).map(|&pos| self.messages[pos].clone()))
    }

    fn has(&self, id: &str) -> RoomResult<bool> {
        Ok(self.index.contains_key(id))
    }

    fn create(&mut self, message: NormalMessage) -> RoomResult<()> {
        if self.index.contains_key(&message.id) {
            debug!(id = %message.id, "Ignoring create for existing message");
            return Ok(());
        }
        self.insert_or_replace(message);
        Ok(())
    }

    fn update(&mut self, message: NormalMessage) -> RoomResult<()> {
        if let Some(&pos) = self.index.get(&message.id) {
            self.messages[pos] = message;
        } else {
            debug!(id = %message.id, "Ignoring update for unknown message");
        }
        Ok(())
    }

    fn upsert(&mut self, message: NormalMessage) -> RoomResult<()> {
        self.insert_or_replace(message);
        Ok(())
    }

    fn clear(&mut self) -> RoomResult<()> {
        self.messages.clear();
        self.index.clear();
        Ok(())
    }
}
