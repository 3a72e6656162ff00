//! Lifecycle orchestrator.
//!
//! `Drive` composes the store, the mirror, the cluster directory, and the
//! sync engine into the operations callers use. Queries and pure metadata
//! mutations only touch the mirror; the store is called for physical
//! upload, download, delete, and caption write-through.
//!
//! Two-phase operations (upload, permanent delete, caption write-through)
//! are recorded in the intent log first. If the second phase fails the
//! caller gets [`DriveError::PartialFailure`] and the reconciliation sweep
//! finishes the job later.

use std::sync::Arc;

use serde::Serialize;

use chatfs_types::path::{self as vpath};
use chatfs_types::{Caption, ClusterId, FileEntry, FolderEntry, MessageId, Visibility};

use crate::directory::ClusterDirectory;
use crate::error::{DriveError, DriveResult};
use crate::mirror::{ClusterSnapshot, FolderRename, IntentKind, MirrorDb};
use crate::store::{BlobStore, ByteStream, NewBlob};
use crate::sync::{
    desired_caption, ClusterDelta, ClusterOutcome, ReconcileReport, SyncEngine, SyncReport,
};

/// What `permanent_delete` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The file was active and has been moved to the trash.
    Trashed,
    /// The file was already trashed and is now gone from mirror and store.
    Deleted,
}

/// Parameters for an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file_name: String,
    /// Destination folder path.
    pub destination: String,
    /// Size in bytes.
    pub size: u64,
    pub mime_type: String,
    pub visibility: Option<Visibility>,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, destination: impl Into<String>, size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            destination: destination.into(),
            size,
            mime_type: "application/octet-stream".to_string(),
            visibility: None,
        }
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

/// A trashed file together with the cluster it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrashedFile {
    pub cluster: String,
    pub cluster_id: ClusterId,
    pub file: FileEntry,
}

/// The drive: every operation over clusters, files, and folders.
pub struct Drive {
    store: Arc<dyn BlobStore>,
    mirror: Arc<MirrorDb>,
    directory: Arc<ClusterDirectory>,
    sync: SyncEngine,
    startup: SyncReport,
}

impl Drive {
    /// Build the directory, then run a full sync, strictly in that order.
    ///
    /// Fails only if the directory cannot be built. Per-cluster sync
    /// failures are logged and kept in [`startup_report`](Self::startup_report).
    #[tracing::instrument(skip_all, name = "drive.start")]
    pub async fn start<I>(
        store: Arc<dyn BlobStore>,
        mirror: Arc<MirrorDb>,
        cluster_names: I,
    ) -> DriveResult<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let directory = Arc::new(ClusterDirectory::build(store.as_ref(), cluster_names).await?);
        let sync = SyncEngine::new(store.clone(), mirror.clone(), directory.clone());
        let startup = sync.sync_all().await;
        for (name, error) in startup.failures() {
            tracing::error!(cluster = name, %error, "startup sync failed; cluster left stale");
        }
        tracing::info!(
            clusters = directory.len(),
            inserted = startup.totals().inserted,
            "drive ready"
        );
        Ok(Self {
            store,
            mirror,
            directory,
            sync,
            startup,
        })
    }

    /// Sync outcome of the startup sequence.
    pub fn startup_report(&self) -> &SyncReport {
        &self.startup
    }

    pub fn directory(&self) -> &ClusterDirectory {
        &self.directory
    }

    pub fn mirror(&self) -> &MirrorDb {
        &self.mirror
    }

    /// Resolve a cluster name.
    pub fn cluster_id(&self, name: &str) -> DriveResult<ClusterId> {
        self.directory.cluster_id(name)
    }

    fn require_cluster(&self, cluster_id: ClusterId) -> DriveResult<()> {
        if self.directory.contains(cluster_id) {
            Ok(())
        } else {
            Err(DriveError::not_found(format!("cluster {cluster_id}")))
        }
    }

    // ========================================================================
    // Sync
    // ========================================================================

    pub async fn sync<I>(&self, names: I) -> SyncReport
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.sync.sync(names).await
    }

    pub async fn sync_all(&self) -> SyncReport {
        self.sync.sync_all().await
    }

    pub async fn sync_cluster(&self, name: &str) -> DriveResult<ClusterDelta> {
        self.sync.sync_cluster(name).await
    }

    pub async fn reconcile(&self, name: &str) -> DriveResult<ReconcileReport> {
        self.sync.reconcile(name).await
    }

    pub async fn reconcile_all(&self) -> Vec<ClusterOutcome<ReconcileReport>> {
        self.sync.reconcile_all().await
    }

    // ========================================================================
    // Trash lifecycle
    // ========================================================================

    /// Move a file to the trash. Mirror only.
    #[tracing::instrument(skip(self), name = "drive.trash")]
    pub fn trash(&self, cluster_id: ClusterId, id: &MessageId) -> DriveResult<FileEntry> {
        self.mirror.trash_file(cluster_id, id)
    }

    /// Bring a trashed file back to where it was. Mirror only.
    #[tracing::instrument(skip(self), name = "drive.restore")]
    pub fn restore(&self, cluster_id: ClusterId, id: &MessageId) -> DriveResult<FileEntry> {
        self.mirror.restore_file(cluster_id, id)
    }

    /// Delete a file, trash first.
    ///
    /// An active file is only trashed. A trashed file is removed from the
    /// mirror and then from the store; a store failure leaves the delete
    /// intent pending and returns `PartialFailure`.
    #[tracing::instrument(skip(self), name = "drive.permanent_delete")]
    pub async fn permanent_delete(
        &self,
        cluster_id: ClusterId,
        id: &MessageId,
    ) -> DriveResult<DeleteOutcome> {
        let file = self.mirror.get_file(cluster_id, id)?;
        if !file.location.is_trashed() {
            self.mirror.trash_file(cluster_id, id)?;
            tracing::info!(name = %file.name, "moved to trash");
            return Ok(DeleteOutcome::Trashed);
        }

        let intent = self
            .mirror
            .begin_intent(IntentKind::Delete, cluster_id, Some(id), None)?;
        self.mirror.delete_file(cluster_id, id)?;

        match self.store.delete(cluster_id, id).await {
            Ok(()) => {}
            Err(e) if e.is_message_not_found() => {
                tracing::debug!("store message already gone");
            }
            Err(e) => {
                tracing::warn!(error = %e, "store delete failed; intent left pending");
                self.mirror.fail_intent(intent, &e.to_string())?;
                return Err(DriveError::partial("permanent_delete", id.clone(), e));
            }
        }
        self.mirror.complete_intent(intent)?;
        tracing::info!(name = %file.name, "permanently deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Trashed files across every cluster in the directory.
    pub fn list_trashed_all(&self) -> DriveResult<Vec<TrashedFile>> {
        let mut out = Vec::new();
        for (name, cluster_id) in self.directory.iter() {
            let files = match self.mirror.list_trashed(cluster_id) {
                Ok(files) => files,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            out.extend(files.into_iter().map(|file| TrashedFile {
                cluster: name.to_string(),
                cluster_id,
                file,
            }));
        }
        Ok(out)
    }

    // ========================================================================
    // Folders
    // ========================================================================

    pub fn create_folder(&self, cluster_id: ClusterId, path: &str) -> DriveResult<FolderEntry> {
        self.mirror.create_folder(cluster_id, path)
    }

    /// Delete a folder only if nothing lives under it.
    #[tracing::instrument(skip(self), name = "drive.delete_folder")]
    pub fn delete_folder(&self, cluster_id: ClusterId, path: &str) -> DriveResult<()> {
        let path = vpath::normalize(path)?;
        let files = self.mirror.count_subtree(cluster_id, &path)?;
        if files > 0 {
            return Err(DriveError::conflict(format!(
                "folder {path} is not empty: {files} file(s) under it"
            )));
        }
        if self.mirror.has_subfolders(cluster_id, &path)? {
            return Err(DriveError::conflict(format!("folder {path} has subfolders")));
        }
        self.mirror.delete_folder(cluster_id, &path)
    }

    /// Rename a folder; everything under it follows, captions included.
    #[tracing::instrument(skip(self), name = "drive.rename_folder")]
    pub async fn rename_folder(
        &self,
        cluster_id: ClusterId,
        old_path: &str,
        new_name: &str,
    ) -> DriveResult<FolderRename> {
        let rename = self.mirror.rename_folder(cluster_id, old_path, new_name)?;

        let mut moved = self.mirror.list_subtree(cluster_id, &rename.new_path)?;
        moved.extend(
            self.mirror
                .list_trashed(cluster_id)?
                .into_iter()
                .filter(|f| f.location.origin().is_some_and(|o| vpath::is_within(o, &rename.new_path))),
        );

        let mut first_error = None;
        for file in &moved {
            if let Err(e) = self.write_caption(cluster_id, file, "rename_folder").await {
                tracing::warn!(id_message = %file.id_message, error = %e, "caption write-through failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(rename),
        }
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Rename a file and write the new caption through to the store.
    #[tracing::instrument(skip(self), name = "drive.rename_file")]
    pub async fn rename_file(
        &self,
        cluster_id: ClusterId,
        id: &MessageId,
        new_name: &str,
    ) -> DriveResult<FileEntry> {
        let file = self.mirror.update_file_name(cluster_id, id, new_name)?;
        self.write_caption(cluster_id, &file, "rename_file").await
    }

    /// Move a file and write the new caption through to the store.
    #[tracing::instrument(skip(self), name = "drive.move_file")]
    pub async fn move_file(
        &self,
        cluster_id: ClusterId,
        id: &MessageId,
        new_path: &str,
    ) -> DriveResult<FileEntry> {
        let file = self.mirror.update_file_location(cluster_id, id, new_path)?;
        self.write_caption(cluster_id, &file, "move_file").await
    }

    /// Bring the store caption in line with the mirror entry.
    ///
    /// Trashed files keep the caption of their origin, so a rebuilt mirror
    /// shows them active again. A failed edit leaves a caption intent
    /// pending for `reconcile` to replay.
    async fn write_caption(
        &self,
        cluster_id: ClusterId,
        file: &FileEntry,
        operation: &'static str,
    ) -> DriveResult<FileEntry> {
        let caption = desired_caption(file);
        if caption == file.caption_text {
            return Ok(file.clone());
        }

        let intent = self.mirror.begin_intent(
            IntentKind::Caption,
            cluster_id,
            Some(&file.id_message),
            Some(&caption),
        )?;
        if let Err(e) = self
            .store
            .edit_caption(cluster_id, &file.id_message, &caption)
            .await
        {
            self.mirror.fail_intent(intent, &e.to_string())?;
            return Err(DriveError::partial(operation, file.id_message.clone(), e));
        }
        self.mirror
            .set_caption_text(cluster_id, &file.id_message, &caption)?;
        self.mirror.complete_intent(intent)?;
        Ok(FileEntry {
            caption_text: caption,
            ..file.clone()
        })
    }

    /// Upload a file: store first, then sync the cluster.
    #[tracing::instrument(skip(self, data), name = "drive.upload")]
    pub async fn upload(
        &self,
        cluster_id: ClusterId,
        data: ByteStream,
        request: UploadRequest,
    ) -> DriveResult<FileEntry> {
        self.require_cluster(cluster_id)?;
        vpath::validate_name(&request.file_name)?;
        let destination = vpath::normalize(&request.destination)?;
        let mut caption = Caption::new(request.file_name.clone(), destination);
        caption.visibility = request.visibility;
        let caption = caption.to_string();

        let intent = self
            .mirror
            .begin_intent(IntentKind::Upload, cluster_id, None, Some(&caption))?;
        let blob = NewBlob {
            caption,
            size: request.size,
            mime_type: request.mime_type,
        };
        let id = match self.store.upload(cluster_id, data, blob).await {
            Ok(id) => id,
            Err(e) => {
                self.mirror.abandon_intent(intent, &e.to_string())?;
                return Err(e.into());
            }
        };
        self.mirror.attach_intent_message(intent, &id)?;

        if let Err(e) = self.sync.sync_cluster_id(cluster_id).await {
            tracing::warn!(id_message = %id, error = %e, "post-upload sync failed; intent left pending");
            self.mirror.fail_intent(intent, &e.to_string())?;
            return Err(DriveError::partial("upload", id, e));
        }
        let file = self.mirror.get_file(cluster_id, &id)?;
        self.mirror.complete_intent(intent)?;
        tracing::info!(id_message = %id, name = %file.name, "uploaded");
        Ok(file)
    }

    /// Stream a mirrored file's bytes from the store.
    pub async fn download(&self, cluster_id: ClusterId, id: &MessageId) -> DriveResult<ByteStream> {
        self.mirror.get_file(cluster_id, id)?;
        Ok(self.store.download(cluster_id, id).await?)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn file_info(&self, cluster_id: ClusterId, id: &MessageId) -> DriveResult<FileEntry> {
        self.mirror.get_file(cluster_id, id)
    }

    pub fn list_folder(&self, cluster_id: ClusterId, path: &str) -> DriveResult<Vec<FileEntry>> {
        self.mirror.list_folder(cluster_id, path)
    }

    pub fn list_subtree(&self, cluster_id: ClusterId, path: &str) -> DriveResult<Vec<FileEntry>> {
        self.mirror.list_subtree(cluster_id, path)
    }

    pub fn list_folders(&self, cluster_id: ClusterId) -> DriveResult<Vec<FolderEntry>> {
        self.mirror.list_folders(cluster_id)
    }

    pub fn has_subfolders(&self, cluster_id: ClusterId, path: &str) -> DriveResult<bool> {
        self.mirror.has_subfolders(cluster_id, path)
    }

    pub fn list_trashed(&self, cluster_id: ClusterId) -> DriveResult<Vec<FileEntry>> {
        self.mirror.list_trashed(cluster_id)
    }

    pub fn list_active(&self, cluster_id: ClusterId) -> DriveResult<Vec<FileEntry>> {
        self.mirror.list_active(cluster_id)
    }

    pub fn snapshot(&self, cluster_id: ClusterId) -> DriveResult<ClusterSnapshot> {
        self.mirror.snapshot(cluster_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{bytes_stream, collect_bytes, MemoryBlobStore};
    use chatfs_types::Location;

    async fn drive() -> (Arc<MemoryBlobStore>, Drive, ClusterId) {
        let store = Arc::new(MemoryBlobStore::new());
        let mirror = Arc::new(MirrorDb::in_memory().unwrap());
        let drive = Drive::start(store.clone(), mirror, ["shared"]).await.unwrap();
        let cluster = drive.cluster_id("shared").unwrap();
        (store, drive, cluster)
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (_store, drive, c) = drive().await;
        let file = drive
            .upload(
                c,
                bytes_stream(b"hello".to_vec()),
                UploadRequest::new("hello.txt", "/docs/", 5)
                    .mime_type("text/plain")
                    .visibility(Visibility::Visible),
            )
            .await
            .unwrap();
        assert_eq!(file.location, Location::active("/docs"));
        assert_eq!(file.caption_text, "hello.txt@/docs@visible");
        assert_eq!(file.size, 5);

        let bytes = collect_bytes(drive.download(c, &file.id_message).await.unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"hello");
        assert!(drive.mirror().pending_intents(c).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_validates_before_store() {
        let (store, drive, c) = drive().await;
        for (name, dest) in [("a@b", "/"), ("a/b", "/"), ("ok.txt", "docs"), ("ok.txt", "/a@b")] {
            let err = drive
                .upload(c, bytes_stream(b"x".to_vec()), UploadRequest::new(name, dest, 1))
                .await
                .unwrap_err();
            assert!(err.is_invalid_argument(), "{name}@{dest}: {err}");
        }
        assert_eq!(store.message_count(c), 0);
        assert!(drive
            .upload(ClusterId::new(77), bytes_stream(b"x".to_vec()), UploadRequest::new("a", "/", 1))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_rename_writes_caption_through() {
        let (store, drive, c) = drive().await;
        let file = drive
            .upload(c, bytes_stream(b"x".to_vec()), UploadRequest::new("a.txt", "/", 1))
            .await
            .unwrap();

        let renamed = drive.rename_file(c, &file.id_message, "b.txt").await.unwrap();
        assert_eq!(renamed.caption_text, "b.txt@/");
        let moved = drive.move_file(c, &file.id_message, "/archive").await.unwrap();
        assert_eq!(moved.caption_text, "b.txt@/archive");

        let items = store.enumerate(c).await.unwrap();
        assert_eq!(items[0].caption, "b.txt@/archive");
        assert_eq!(drive.file_info(c, &file.id_message).unwrap().caption_text, "b.txt@/archive");
    }

    #[tokio::test]
    async fn test_download_requires_mirrored_file() {
        let (_store, drive, c) = drive().await;
        assert!(drive
            .download(c, &MessageId::from("1"))
            .await
            .err()
            .is_some_and(|e| e.is_not_found()));
    }
}
