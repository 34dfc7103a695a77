//! Room tuning knobs
//!
//! Defaults match the limits of a WebRTC data channel and the catch-up
//! window the extension ships with.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RoomError, RoomResult};

/// Largest serialized message a data channel accepts without dropping the
/// connection (256 KiB).
pub const WEB_RTC_MAX_MESSAGE_SIZE: usize = 262_144;

/// History older than this many days is never pushed to a peer.
pub const SYNC_HISTORY_MAX_DAYS: u32 = 3;

/// Number of messages packed into one `SyncHistory` payload.
pub const SYNC_MESSAGES_BATCH_SIZE: usize = 50;

/// Delay between consecutive history batches.
pub const SYNC_BATCH_DELAY_MS: u64 = 500;

/// Delay between single-message payloads of an exploded batch.
pub const SYNC_MESSAGE_DELAY_MS: u64 = 50;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Configuration for a single room.
///
/// All fields have defaults, so a JSON config file only needs to name the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Transport ceiling in bytes; messages must serialize strictly below it
    pub max_message_size: usize,
    /// Retention window for history sync, in days
    pub sync_history_max_days: u32,
    /// Messages per `SyncHistory` batch
    pub sync_batch_size: usize,
    /// Delay between batches, in milliseconds
    pub sync_batch_delay_ms: u64,
    /// Delay between exploded single-message payloads, in milliseconds
    pub sync_message_delay_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_message_size: WEB_RTC_MAX_MESSAGE_SIZE,
            sync_history_max_days: SYNC_HISTORY_MAX_DAYS,
            sync_batch_size: SYNC_MESSAGES_BATCH_SIZE,
            sync_batch_delay_ms: SYNC_BATCH_DELAY_MS,
            sync_message_delay_ms: SYNC_MESSAGE_DELAY_MS,
        }
    }
}

impl RoomConfig {
    /// Load a config from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> RoomResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RoomError::Storage(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn with_history_days(mut self, days: u32) -> Self {
        self.sync_history_max_days = days;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.sync_batch_size = size.max(1);
        self
    }

    pub fn with_delays(mut self, batch: Duration, message: Duration) -> Self {
        self.sync_batch_delay_ms = batch.as_millis() as u64;
        self.sync_message_delay_ms = message.as_millis() as u64;
        self
    }

    /// Retention window in milliseconds.
    pub fn retention_ms(&self) -> i64 {
        i64::from(self.sync_history_max_days) * DAY_MS
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.sync_batch_delay_ms)
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.sync_message_delay_ms)
    }

    /// Batch size, never zero.
    pub fn batch_size(&self) -> usize {
        self.sync_batch_size.max(1)
    }
}
