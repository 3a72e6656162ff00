//! In-memory blob store.
//!
//! Used for tests and demos. All data is ephemeral. Failures can be
//! injected per operation and per chat to exercise partial-failure paths.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chatfs_types::{now_millis, ClusterId, MessageId};

use super::{bytes_stream, collect_bytes, BlobStore, ByteStream, NewBlob, StoreError, StoreItem, StoreResult};

/// An operation that should fail until cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    CreateChat,
    Enumerate(ClusterId),
    Upload(ClusterId),
    Download(ClusterId),
    EditCaption(ClusterId),
    Delete(ClusterId),
}

#[derive(Debug, Clone)]
struct Message {
    item: StoreItem,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Chat {
    name: String,
    next_message: u64,
    messages: BTreeMap<u64, Message>,
}

#[derive(Debug, Default)]
struct State {
    next_chat: i64,
    chats: BTreeMap<ClusterId, Chat>,
}

/// In-memory blob store.
///
/// Thread-safe via internal `RwLock`. Message ids are per-chat counters.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    state: RwLock<State>,
    faults: Mutex<Vec<Fault>>,
    deletes: AtomicUsize,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `fault` fail until [`clear`](Self::clear) or
    /// [`clear_faults`](Self::clear_faults).
    pub fn inject(&self, fault: Fault) {
        let mut faults = self.faults.lock();
        if !faults.contains(&fault) {
            faults.push(fault);
        }
    }

    /// Stop failing `fault`.
    pub fn clear(&self, fault: Fault) {
        self.faults.lock().retain(|f| *f != fault);
    }

    /// Stop failing everything.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Number of successful deletes so far.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Number of messages currently in `chat` (0 for unknown chats).
    pub fn message_count(&self, chat: ClusterId) -> usize {
        self.state
            .read()
            .chats
            .get(&chat)
            .map(|c| c.messages.len())
            .unwrap_or(0)
    }

    fn check(&self, fault: Fault) -> StoreResult<()> {
        if self.faults.lock().contains(&fault) {
            Err(StoreError::injected(format!("{fault:?}")))
        } else {
            Ok(())
        }
    }

    fn message_key(id: &MessageId) -> StoreResult<u64> {
        id.as_str()
            .parse()
            .map_err(|_| StoreError::message_not_found(id))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn find_chat_by_name(&self, name: &str) -> StoreResult<Option<ClusterId>> {
        let state = self.state.read();
        Ok(state
            .chats
            .iter()
            .find(|(_, chat)| chat.name == name)
            .map(|(id, _)| *id))
    }

    async fn create_chat(&self, name: &str) -> StoreResult<ClusterId> {
        self.check(Fault::CreateChat)?;
        let mut state = self.state.write();
        if state.chats.values().any(|chat| chat.name == name) {
            return Err(StoreError::ChatExists(name.to_string()));
        }
        state.next_chat += 1;
        let id = ClusterId::new(-1000 - state.next_chat);
        state.chats.insert(
            id,
            Chat {
                name: name.to_string(),
                ..Chat::default()
            },
        );
        Ok(id)
    }

    async fn enumerate(&self, chat: ClusterId) -> StoreResult<Vec<StoreItem>> {
        self.check(Fault::Enumerate(chat))?;
        let state = self.state.read();
        let chat_state = state
            .chats
            .get(&chat)
            .ok_or_else(|| StoreError::chat_not_found(chat))?;
        Ok(chat_state.messages.values().map(|m| m.item.clone()).collect())
    }

    async fn upload(&self, chat: ClusterId, data: ByteStream, blob: NewBlob) -> StoreResult<MessageId> {
        self.check(Fault::Upload(chat))?;
        if !self.state.read().chats.contains_key(&chat) {
            return Err(StoreError::chat_not_found(chat));
        }

        let data = collect_bytes(data).await?;
        if data.len() as u64 != blob.size {
            return Err(StoreError::SizeMismatch {
                declared: blob.size,
                received: data.len() as u64,
            });
        }

        let mut state = self.state.write();
        let chat_state = state
            .chats
            .get_mut(&chat)
            .ok_or_else(|| StoreError::chat_not_found(chat))?;
        chat_state.next_message += 1;
        let key = chat_state.next_message;
        let id = MessageId::new(key.to_string());
        chat_state.messages.insert(
            key,
            Message {
                item: StoreItem {
                    id: id.clone(),
                    caption: blob.caption,
                    size: blob.size,
                    mime_type: blob.mime_type,
                    date: now_millis(),
                },
                data,
            },
        );
        Ok(id)
    }

    async fn download(&self, chat: ClusterId, id: &MessageId) -> StoreResult<ByteStream> {
        self.check(Fault::Download(chat))?;
        let key = Self::message_key(id)?;
        let state = self.state.read();
        let message = state
            .chats
            .get(&chat)
            .ok_or_else(|| StoreError::chat_not_found(chat))?
            .messages
            .get(&key)
            .ok_or_else(|| StoreError::message_not_found(id))?;
        Ok(bytes_stream(message.data.clone()))
    }

    async fn edit_caption(&self, chat: ClusterId, id: &MessageId, caption: &str) -> StoreResult<()> {
        self.check(Fault::EditCaption(chat))?;
        let key = Self::message_key(id)?;
        let mut state = self.state.write();
        let message = state
            .chats
            .get_mut(&chat)
            .ok_or_else(|| StoreError::chat_not_found(chat))?
            .messages
            .get_mut(&key)
            .ok_or_else(|| StoreError::message_not_found(id))?;
        message.item.caption = caption.to_string();
        Ok(())
    }

    async fn delete(&self, chat: ClusterId, id: &MessageId) -> StoreResult<()> {
        self.check(Fault::Delete(chat))?;
        let key = Self::message_key(id)?;
        let mut state = self.state.write();
        state
            .chats
            .get_mut(&chat)
            .ok_or_else(|| StoreError::chat_not_found(chat))?
            .messages
            .remove(&key)
            .ok_or_else(|| StoreError::message_not_found(id))?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
