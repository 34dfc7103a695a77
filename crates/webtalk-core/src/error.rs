//! Error types for WebTalk rooms

use thiserror::Error;

/// Main error type for room operations
///
/// Every variant carries owned strings so errors can ride on broadcast
/// [`RoomEvent`](crate::room::RoomEvent)s to any number of subscribers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// An application send was attempted before the room join completed
    #[error("Please wait for connection to be established.")]
    NotJoined,

    /// Outbound message is at or above the transport ceiling
    #[error("Message size {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Serialized size of the rejected message
        size: usize,
        /// Transport ceiling in bytes
        limit: usize,
    },

    /// Inbound payload failed structural validation
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Failure reported by the underlying transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport refused to deliver a message
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Reaction or update targets a message that is not in the local store
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// The room task has shut down
    #[error("Room is closed")]
    Closed,
}

impl From<serde_json::Error> for RoomError {
    fn from(err: serde_json::Error) -> Self {
        RoomError::Serialization(err.to_string())
    }
}

impl From<redb::DatabaseError> for RoomError {
    fn from(err: redb::DatabaseError) -> Self {
        RoomError::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for RoomError {
    fn from(err: redb::TransactionError) -> Self {
        RoomError::Storage(err.to_string())
    }
}

impl From<redb::TableError> for RoomError {
    fn from(err: redb::TableError) -> Self {
        RoomError::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for RoomError {
    fn from(err: redb::StorageError) -> Self {
        RoomError::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for RoomError {
    fn from(err: redb::CommitError) -> Self {
        RoomError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for RoomError {
    fn from(err: std::io::Error) -> Self {
        RoomError::Storage(err.to_string())
    }
}

/// Result type alias using RoomError
pub type RoomResult<T> = Result<T, RoomError>;
