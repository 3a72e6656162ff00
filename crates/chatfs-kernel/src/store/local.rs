//! Local directory blob store.
//!
//! Each chat is a directory under `<root>/chats/<chat id>/` holding a
//! `chat.json` header and, per message, an attachment file `<id>.blob` plus
//! its `<id>.meta.json`. The metadata file is written last, so a message
//! only becomes visible to `enumerate` once its bytes are on disk.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

use chatfs_types::{now_millis, ClusterId, MessageId};

use super::{BlobStore, ByteStream, NewBlob, StoreError, StoreItem, StoreResult};

const CHAT_HEADER: &str = "chat.json";
const META_SUFFIX: &str = ".meta.json";
const BLOB_SUFFIX: &str = ".blob";

/// Stream `data` into a new file at `path`. Any failure removes the partial
/// file before returning.
async fn write_blob(path: &Path, data: ByteStream) -> StoreResult<u64> {
    let result: StoreResult<u64> = async {
        let mut file = fs::File::create(path).await?;
        copy_stream(&mut file, data).await
    }
    .await;
    if result.is_err() {
        let _ = fs::remove_file(path).await;
    }
    result
}

async fn copy_stream<W>(writer: &mut W, mut data: ByteStream) -> StoreResult<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut received = 0u64;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        received += chunk.len() as u64;
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;
    Ok(received)
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatHeader {
    id: ClusterId,
    name: String,
    next_message: u64,
}

/// Blob store backed by a local directory.
///
/// Writers are serialized by an async mutex; readers go straight to disk.
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("chats")).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chats_dir(&self) -> PathBuf {
        self.root.join("chats")
    }

    fn chat_dir(&self, chat: ClusterId) -> PathBuf {
        self.chats_dir().join(chat.to_string())
    }

    fn meta_path(&self, chat: ClusterId, id: &MessageId) -> PathBuf {
        self.chat_dir(chat).join(format!("{id}{META_SUFFIX}"))
    }

    fn blob_path(&self, chat: ClusterId, id: &MessageId) -> PathBuf {
        self.chat_dir(chat).join(format!("{id}{BLOB_SUFFIX}"))
    }

    /// Reject ids that could address files outside the chat directory.
    fn check_id(id: &MessageId) -> StoreResult<()> {
        let raw = id.as_str();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(StoreError::message_not_found(id));
        }
        Ok(())
    }

    async fn read_header(&self, chat: ClusterId) -> StoreResult<ChatHeader> {
        let path = self.chat_dir(chat).join(CHAT_HEADER);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::chat_not_found(chat))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_header(&self, header: &ChatHeader) -> StoreResult<()> {
        let path = self.chat_dir(header.id).join(CHAT_HEADER);
        fs::write(&path, serde_json::to_vec_pretty(header)?).await?;
        Ok(())
    }

    async fn read_meta(&self, chat: ClusterId, id: &MessageId) -> StoreResult<StoreItem> {
        Self::check_id(id)?;
        match fs::read(self.meta_path(chat, id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Distinguish a missing chat from a missing message.
                self.read_header(chat).await?;
                Err(StoreError::message_not_found(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn headers(&self) -> StoreResult<Vec<ChatHeader>> {
        let mut headers = Vec::new();
        let mut dir = fs::read_dir(self.chats_dir()).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path().join(CHAT_HEADER);
            match fs::read(&path).await {
                Ok(bytes) => headers.push(serde_json::from_slice::<ChatHeader>(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn find_chat_by_name(&self, name: &str) -> StoreResult<Option<ClusterId>> {
        Ok(self
            .headers()
            .await?
            .into_iter()
            .find(|h| h.name == name)
            .map(|h| h.id))
    }

    async fn create_chat(&self, name: &str) -> StoreResult<ClusterId> {
        let _guard = self.write_lock.lock().await;
        let headers = self.headers().await?;
        if headers.iter().any(|h| h.name == name) {
            return Err(StoreError::ChatExists(name.to_string()));
        }
        let lowest = headers.iter().map(|h| h.id.get()).min().unwrap_or(-1000);
        let id = ClusterId::new(lowest.min(-1000) - 1);

        fs::create_dir_all(self.chat_dir(id)).await?;
        self.write_header(&ChatHeader {
            id,
            name: name.to_string(),
            next_message: 0,
        })
        .await?;
        tracing::debug!(chat = %id, name, "created chat directory");
        Ok(id)
    }

    async fn enumerate(&self, chat: ClusterId) -> StoreResult<Vec<StoreItem>> {
        self.read_header(chat).await?;
        let mut items = Vec::new();
        let mut dir = fs::read_dir(self.chat_dir(chat)).await?;
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !file_name.ends_with(META_SUFFIX) {
                continue;
            }
            let bytes = fs::read(entry.path()).await?;
            items.push(serde_json::from_slice::<StoreItem>(&bytes)?);
        }
        items.sort_by_key(|item| item.id.as_str().parse::<u64>().unwrap_or(u64::MAX));
        Ok(items)
    }

    async fn upload(&self, chat: ClusterId, data: ByteStream, blob: NewBlob) -> StoreResult<MessageId> {
        let _guard = self.write_lock.lock().await;
        let mut header = self.read_header(chat).await?;
        header.next_message += 1;
        let id = MessageId::new(header.next_message.to_string());

        let blob_path = self.blob_path(chat, &id);
        let received = write_blob(&blob_path, data).await?;

        if received != blob.size {
            let _ = fs::remove_file(&blob_path).await;
            return Err(StoreError::SizeMismatch {
                declared: blob.size,
                received,
            });
        }

        let item = StoreItem {
            id: id.clone(),
            caption: blob.caption,
            size: blob.size,
            mime_type: blob.mime_type,
            date: now_millis(),
        };
        self.write_header(&header).await?;
        fs::write(self.meta_path(chat, &id), serde_json::to_vec_pretty(&item)?).await?;
        Ok(id)
    }

    async fn download(&self, chat: ClusterId, id: &MessageId) -> StoreResult<ByteStream> {
        self.read_meta(chat, id).await?;
        let file = fs::File::open(self.blob_path(chat, id)).await?;
        Ok(ReaderStream::new(file)
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed())
    }

    async fn edit_caption(&self, chat: ClusterId, id: &MessageId, caption: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut item = self.read_meta(chat, id).await?;
        item.caption = caption.to_string();
        fs::write(self.meta_path(chat, id), serde_json::to_vec_pretty(&item)?).await?;
        Ok(())
    }

    async fn delete(&self, chat: ClusterId, id: &MessageId) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.read_meta(chat, id).await?;
        // Metadata first: a half-deleted message is invisible, not corrupt.
        fs::remove_file(self.meta_path(chat, id)).await?;
        match fs::remove_file(self.blob_path(chat, id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{bytes_stream, collect_bytes};
    use tempfile::TempDir;

    fn blob(caption: &str, size: u64) -> NewBlob {
        NewBlob {
            caption: caption.into(),
            size,
            mime_type: "application/octet-stream".into(),
        }
    }

    #[tokio::test]
    async fn test_chats_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path()).await.unwrap();
        let shared = store.create_chat("shared").await.unwrap();
        let private = store.create_chat("private").await.unwrap();
        assert_ne!(shared, private);

        let id = store
            .upload(shared, bytes_stream(b"payload".to_vec()), blob("p.bin@/", 7))
            .await
            .unwrap();

        let reopened = LocalBlobStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.find_chat_by_name("shared").await.unwrap(), Some(shared));
        let items = reopened.enumerate(shared).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        let data = collect_bytes(reopened.download(shared, &id).await.unwrap())
            .await
            .unwrap();
        assert_eq!(data, b"payload");
    }

    #[tokio::test]
    async fn test_enumerate_orders_by_message_number() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path()).await.unwrap();
        let chat = store.create_chat("c").await.unwrap();
        for i in 0..12 {
            let caption = format!("f{i}@/");
            store
                .upload(chat, bytes_stream(vec![0u8; 1]), blob(&caption, 1))
                .await
                .unwrap();
        }
        let ids: Vec<String> = store
            .enumerate(chat)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id.into_string())
            .collect();
        let expected: Vec<String> = (1..=12).map(|i| i.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_edit_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path()).await.unwrap();
        let chat = store.create_chat("c").await.unwrap();
        let id = store
            .upload(chat, bytes_stream(b"x".to_vec()), blob("x@/", 1))
            .await
            .unwrap();

        store.edit_caption(chat, &id, "y@/docs").await.unwrap();
        assert_eq!(store.enumerate(chat).await.unwrap()[0].caption, "y@/docs");

        store.delete(chat, &id).await.unwrap();
        assert!(store.enumerate(chat).await.unwrap().is_empty());
        assert!(store.delete(chat, &id).await.unwrap_err().is_message_not_found());
    }

    #[tokio::test]
    async fn test_errors_for_unknown_targets() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.enumerate(ClusterId::new(-5)).await,
            Err(StoreError::ChatNotFound(_))
        ));

        let chat = store.create_chat("c").await.unwrap();
        assert!(matches!(
            store.download(chat, &MessageId::from("../chat")).await,
            Err(StoreError::MessageNotFound(_))
        ));
        let err = store
            .upload(chat, bytes_stream(b"abc".to_vec()), blob("a@/", 4))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { .. }));
        assert!(store.enumerate(chat).await.unwrap().is_empty());
    }

    fn blob_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.unwrap().file_name().into_string().ok())
            .filter(|name| name.ends_with(BLOB_SUFFIX))
            .collect()
    }

    #[tokio::test]
    async fn test_failed_upload_removes_partial_blob() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path()).await.unwrap();
        let chat = store.create_chat("c").await.unwrap();

        let data = futures::stream::iter(vec![
            Ok(b"first".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ])
        .boxed();
        let err = store.upload(chat, data, blob("a@/", 10)).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(blob_files(&store.chat_dir(chat)).is_empty());
        assert!(store.enumerate(chat).await.unwrap().is_empty());
    }

    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::other("no space left")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_errors_fail_the_copy() {
        let err = copy_stream(&mut FullDisk, bytes_stream(b"abc".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
