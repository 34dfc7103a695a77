//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - The chat log (normal messages, in insertion order)
//! - The local user's identity
//!
//! [`Storage`] implements [`MessageStore`], so a room can run directly on
//! top of it and keep its history across restarts.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RoomResult;
use crate::store::MessageStore;
use crate::types::{NormalMessage, UserInfo};

// Table definitions
const MESSAGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");
const IDENTITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("identity");

const NEXT_SEQ_KEY: &str = "next_seq";
const USER_INFO_KEY: &str = "user_info";

/// A message plus its insertion position.
#[derive(Serialize, Deserialize)]
struct StoredMessage {
    seq: u64,
    message: NormalMessage,
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> RoomResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(MESSAGES_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
            let _ = write_txn.open_table(IDENTITY_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Identity Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save the local user's identity, replacing any previous one.
    pub fn save_identity(&self, user: &UserInfo) -> RoomResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITY_TABLE)?;
            let data = serde_json::to_vec(user)?;
            table.insert(USER_INFO_KEY, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the local user's identity, if one has been saved.
    pub fn load_identity(&self) -> RoomResult<Option<UserInfo>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(IDENTITY_TABLE)?;

        match table.get(USER_INFO_KEY)? {
            Some(data) => Ok(Some(serde_json::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Load the saved identity, generating and saving one named `name` on
    /// first use.
    pub fn load_or_create_identity(&self, name: &str) -> RoomResult<UserInfo> {
        if let Some(user) = self.load_identity()? {
            return Ok(user);
        }
        let user = UserInfo::generate(name);
        self.save_identity(&user)?;
        debug!(user_id = %user.id, "Generated new identity");
        Ok(user)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Message Operations
    // ═══════════════════════════════════════════════════════════════════════

    fn write_message(&self, message: NormalMessage, mode: WriteMode) -> RoomResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut messages = write_txn.open_table(MESSAGES_TABLE)?;
            let existing_seq = match messages.get(message.id.as_str())? {
                Some(data) => {
                    let stored: StoredMessage = serde_json::from_slice(data.value())?;
                    Some(stored.seq)
                }
                None => None,
            };

            let seq = match (existing_seq, mode) {
                (Some(_), WriteMode::Create) | (None, WriteMode::Update) => {
                    debug!(id = %message.id, ?mode, "Skipping message write");
                    return Ok(());
                }
                (Some(seq), _) => seq,
                (None, _) => {
                    let mut meta = write_txn.open_table(META_TABLE)?;
                    let next = meta.get(NEXT_SEQ_KEY)?.map(|v| v.value()).unwrap_or(0);
                    meta.insert(NEXT_SEQ_KEY, next + 1)?;
                    next
                }
            };

            let id = message.id.clone();
            let data = serde_json::to_vec(&StoredMessage { seq, message })?;
            messages.insert(id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Number of stored messages.
    pub fn message_count(&self) -> RoomResult<usize> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        Ok(table.len()? as usize)
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Create,
    Update,
    Upsert,
}

impl MessageStore for Storage {
    fn list(&self) -> RoomResult<Vec<NormalMessage>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;

        let mut stored = Vec::new();
        for entry in table.iter()? {
            let (_, data) = entry?;
            let message: StoredMessage = serde_json::from_slice(data.value())?;
            stored.push(message);
        }
        stored.sort_by_key(|s| s.seq);

        Ok(stored.into_iter().map(|s| s.message).collect())
    }

    fn get(&self, id: &str) -> RoomResult<Option<NormalMessage>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;

        match table.get(id)? {
            Some(data) => {
                let stored: StoredMessage = serde_json::from_slice(data.value())?;
                Ok(Some(stored.message))
            }
            None => Ok(None),
        }
    }

    fn create(&mut self, message: NormalMessage) -> RoomResult<()> {
        self.write_message(message, WriteMode::Create)
    }

    fn update(&mut self, message: NormalMessage) -> RoomResult<()> {
        self.write_message(message, WriteMode::Update)
    }

    fn upsert(&mut self, message: NormalMessage) -> RoomResult<()> {
        self.write_message(message, WriteMode::Upsert)
    }

    fn clear(&mut self) -> RoomResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(MESSAGES_TABLE)?;
            let mut ids = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                ids.push(key.value().to_string());
            }
            for id in ids {
                table.remove(id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}
