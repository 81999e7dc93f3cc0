//! Messaging error types.

use thiserror::Error;

use crate::MessageId;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The broker refused or failed to accept a message.
    #[error("Send failed: {0}")]
    Send(String),

    /// A transaction was ended for a message the broker does not hold as a half message.
    #[error("Unknown half message: {0}")]
    UnknownHalfMessage(MessageId),

    /// Delay levels are 1 through 18.
    #[error("Invalid delay level: {0}")]
    InvalidDelayLevel(u8),

    /// Message body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
