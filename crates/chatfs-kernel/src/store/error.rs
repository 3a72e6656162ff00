//! Blob store error types.

use std::io;
use thiserror::Error;

/// Blob store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No chat with this id.
    #[error("chat not found: {0}")]
    ChatNotFound(String),

    /// No message with this id in the chat.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// A chat with this display name already exists.
    #[error("chat already exists: {0}")]
    ChatExists(String),

    /// Uploaded byte count differs from the declared size.
    #[error("size mismatch: declared {declared} bytes, received {received}")]
    SizeMismatch { declared: u64, received: u64 },

    /// Failure injected by a test backend.
    #[error("injected failure: {0}")]
    Injected(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Metadata (de)serialization error.
    #[error("metadata error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Create a ChatNotFound error.
    pub fn chat_not_found(chat: impl ToString) -> Self {
        Self::ChatNotFound(chat.to_string())
    }

    /// Create a MessageNotFound error.
    pub fn message_not_found(id: impl ToString) -> Self {
        Self::MessageNotFound(id.to_string())
    }

    /// Create an Injected error.
    pub fn injected(what: impl Into<String>) -> Self {
        Self::Injected(what.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True if the target message is already gone.
    pub fn is_message_not_found(&self) -> bool {
        matches!(self, StoreError::MessageNotFound(_))
    }
}

/// Blob store result type.
pub type StoreResult<T> = Result<T, StoreError>;
