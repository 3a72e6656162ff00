//! Blob store abstraction.
//!
//! The durable side of chatfs is an append-only message service: chats hold
//! messages, each message carries one attachment and a caption. This module
//! defines that contract and two in-tree backends.
//!
//! # Architecture
//!
//! ```text
//! Drive / SyncEngine
//!        │
//!        ▼
//! Arc<dyn BlobStore>
//!   ├── MemoryBlobStore   (tests, demos, fault injection)
//!   └── LocalBlobStore    (one directory per chat on disk)
//! ```
//!
//! Message ids are opaque strings; callers hand them back unparsed.

mod error;
pub mod local;
pub mod memory;

pub use error::{StoreError, StoreResult};
pub use local::LocalBlobStore;
pub use memory::{Fault, MemoryBlobStore};

use async_trait::async_trait;
use chatfs_types::{ClusterId, MessageId};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;

/// Attachment bytes flowing in or out of the store.
pub type ByteStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// One message as enumerated from a chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreItem {
    pub id: MessageId,
    pub caption: String,
    /// Attachment size in bytes.
    pub size: u64,
    pub mime_type: String,
    /// Unix milliseconds.
    pub date: i64,
}

/// Metadata for a new upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBlob {
    pub caption: String,
    /// Declared size in bytes; backends reject a stream of a different length.
    pub size: u64,
    pub mime_type: String,
}

/// Blob store operations.
#[async_trait]
pub trait BlobStore: Send + Sync {
    // ========================================================================
    // Chats
    // ========================================================================

    /// Look up a chat by display name.
    async fn find_chat_by_name(&self, name: &str) -> StoreResult<Option<ClusterId>>;

    /// Create a chat with the given display name.
    async fn create_chat(&self, name: &str) -> StoreResult<ClusterId>;

    // ========================================================================
    // Messages
    // ========================================================================

    /// All messages in a chat, oldest first.
    async fn enumerate(&self, chat: ClusterId) -> StoreResult<Vec<StoreItem>>;

    /// Append a message carrying the streamed attachment.
    async fn upload(&self, chat: ClusterId, data: ByteStream, blob: NewBlob)
    -> StoreResult<MessageId>;

    /// Stream a message's attachment.
    async fn download(&self, chat: ClusterId, id: &MessageId) -> StoreResult<ByteStream>;

    /// Replace a message's caption.
    async fn edit_caption(&self, chat: ClusterId, id: &MessageId, caption: &str)
    -> StoreResult<()>;

    /// Delete a message.
    async fn delete(&self, chat: ClusterId, id: &MessageId) -> StoreResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a message exists.
    async fn contains(&self, chat: ClusterId, id: &MessageId) -> StoreResult<bool> {
        Ok(self.enumerate(chat).await?.iter().any(|item| &item.id == id))
    }
}

/// Wrap an in-memory buffer as a single-chunk stream.
pub fn bytes_stream(data: impl Into<Vec<u8>>) -> ByteStream {
    stream::once(futures::future::ready(Ok(data.into()))).boxed()
}

/// Drain a stream into one buffer.
pub async fn collect_bytes(mut data: ByteStream) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = data.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
