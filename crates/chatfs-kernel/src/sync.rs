//! Store → mirror synchronization and the repair sweep.
//!
//! Sync is one-directional and insert-only: a store message whose id is not
//! yet mirrored is parsed from its caption and appended; mirrored entries are
//! never refreshed. Failures are isolated per cluster.
//!
//! The reconciliation sweep additionally drains the intent log (finishing
//! interrupted deletes, caption edits and uploads) and prunes mirror entries
//! whose store message has disappeared.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use chatfs_types::path::{self as vpath, ROOT_PATH, TRASH_PATH};
use chatfs_types::{Caption, ClusterId, Entry, FileEntry, Location, MessageId};

use crate::directory::ClusterDirectory;
use crate::error::{DriveError, DriveResult};
use crate::mirror::{Intent, IntentKind, MirrorDb};
use crate::store::{BlobStore, StoreItem};

/// What one cluster sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterDelta {
    /// The mirror cluster row was created by this run.
    pub cluster_created: bool,
    /// Messages returned by the store.
    pub enumerated: usize,
    /// New file entries appended.
    pub inserted: usize,
    /// Messages already in the mirror.
    pub already_mirrored: usize,
    /// Messages skipped because their caption could not be parsed.
    pub malformed: usize,
    /// Messages skipped because a permanent delete is still pending for them.
    pub pending_delete: usize,
}

/// Outcome of one per-cluster step.
#[derive(Debug)]
pub struct ClusterOutcome<T> {
    pub name: String,
    pub cluster_id: Option<ClusterId>,
    pub outcome: DriveResult<T>,
}

/// Outcome of syncing one cluster.
pub type ClusterSync = ClusterOutcome<ClusterDelta>;

/// Result of a multi-cluster sync.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub clusters: Vec<ClusterSync>,
}

impl SyncReport {
    /// True if every cluster synced.
    pub fn is_complete(&self) -> bool {
        self.clusters.iter().all(|c| c.outcome.is_ok())
    }

    /// Clusters whose sync failed.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &DriveError)> {
        self.clusters
            .iter()
            .filter_map(|c| c.outcome.as_ref().err().map(|e| (c.name.as_str(), e)))
    }

    /// Sum of all successful deltas.
    pub fn totals(&self) -> ClusterDelta {
        let mut total = ClusterDelta::default();
        for delta in self.clusters.iter().filter_map(|c| c.outcome.as_ref().ok()) {
            total.cluster_created |= delta.cluster_created;
            total.enumerated += delta.enumerated;
            total.inserted += delta.inserted;
            total.already_mirrored += delta.already_mirrored;
            total.malformed += delta.malformed;
            total.pending_delete += delta.pending_delete;
        }
        total
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for cluster in &self.clusters {
            match &cluster.outcome {
                Ok(d) => writeln!(
                    f,
                    "{}: {} enumerated, {} inserted, {} already mirrored, {} malformed",
                    cluster.name, d.enumerated, d.inserted, d.already_mirrored, d.malformed
                )?,
                Err(e) => writeln!(f, "{}: FAILED: {e}", cluster.name)?,
            }
        }
        Ok(())
    }
}

/// What one reconciliation sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub deletes_completed: usize,
    pub deletes_pending: usize,
    pub uploads_completed: usize,
    pub uploads_pending: usize,
    pub captions_completed: usize,
    pub captions_pending: usize,
    /// Intents given up on because their first phase never took effect.
    pub abandoned: usize,
    /// Mirror files removed because the store no longer has them.
    pub stale_pruned: usize,
    pub sync: ClusterDelta,
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deletes {} done / {} pending, uploads {} done / {} pending, captions {} done / {} pending, {} abandoned, {} stale pruned, {} inserted",
            self.deletes_completed,
            self.deletes_pending,
            self.uploads_completed,
            self.uploads_pending,
            self.captions_completed,
            self.captions_pending,
            self.abandoned,
            self.stale_pruned,
            self.sync.inserted
        )
    }
}

/// Turn a store message into a file entry.
fn entry_from_item(item: &StoreItem) -> Result<FileEntry, String> {
    let caption = Caption::parse(&item.caption).map_err(|e| e.to_string())?;
    let location = if caption.path == TRASH_PATH {
        Location::trashed(ROOT_PATH)
    } else {
        Location::active(vpath::normalize(&caption.path).map_err(|e| e.to_string())?)
    };
    Ok(FileEntry {
        id_message: item.id.clone(),
        name: caption.name,
        location,
        size: item.size,
        mime_type: item.mime_type.clone(),
        caption_text: item.caption.clone(),
        timestamp: item.date,
    })
}

/// The store caption a mirrored file should carry.
///
/// Trashed files keep their origin path; visibility is carried over from
/// the current caption.
pub(crate) fn desired_caption(file: &FileEntry) -> String {
    let visibility = Caption::parse(&file.caption_text)
        .ok()
        .and_then(|c| c.visibility);
    let path = match &file.location {
        Location::Active { path } => path,
        Location::Trashed { from } => from,
    };
    Caption {
        name: file.name.clone(),
        path: path.clone(),
        visibility,
    }
    .to_string()
}

/// Reconciles the mirror with the blob store.
pub struct SyncEngine {
    store: Arc<dyn BlobStore>,
    mirror: Arc<MirrorDb>,
    directory: Arc<ClusterDirectory>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn BlobStore>,
        mirror: Arc<MirrorDb>,
        directory: Arc<ClusterDirectory>,
    ) -> Self {
        Self {
            store,
            mirror,
            directory,
        }
    }

    pub fn directory(&self) -> &ClusterDirectory {
        &self.directory
    }

    /// Sync the named clusters, one after another. Never fails as a whole.
    pub async fn sync<I>(&self, names: I) -> SyncReport
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut report = SyncReport::default();
        for name in names {
            let name = name.as_ref();
            let cluster_id = self.directory.cluster_id(name).ok();
            let outcome = self.sync_cluster(name).await;
            if let Err(e) = &outcome {
                tracing::warn!(cluster = name, error = %e, "cluster sync failed");
            }
            report.clusters.push(ClusterSync {
                name: name.to_string(),
                cluster_id,
                outcome,
            });
        }
        report
    }

    /// Sync every cluster in the directory.
    pub async fn sync_all(&self) -> SyncReport {
        let names: Vec<String> = self.directory.names().map(str::to_string).collect();
        self.sync(names).await
    }

    /// Sync one cluster by name.
    #[tracing::instrument(skip(self), name = "sync.cluster")]
    pub async fn sync_cluster(&self, name: &str) -> DriveResult<ClusterDelta> {
        let cluster_id = self.directory.cluster_id(name)?;
        let created = self.mirror.ensure_cluster(cluster_id, name)?;
        let items = self.store.enumerate(cluster_id).await?;
        let mut delta = self.apply_items(cluster_id, &items)?;
        delta.cluster_created = created;
        tracing::info!(
            enumerated = delta.enumerated,
            inserted = delta.inserted,
            malformed = delta.malformed,
            "cluster synced"
        );
        Ok(delta)
    }

    /// Sync one cluster by id.
    pub async fn sync_cluster_id(&self, cluster_id: ClusterId) -> DriveResult<ClusterDelta> {
        let name = self
            .directory
            .name_of(cluster_id)
            .ok_or_else(|| DriveError::not_found(format!("cluster {cluster_id}")))?
            .to_string();
        self.sync_cluster(&name).await
    }

    fn pending_delete_ids(&self, cluster_id: ClusterId) -> DriveResult<HashSet<MessageId>> {
        Ok(self
            .mirror
            .pending_intents(cluster_id)?
            .into_iter()
            .filter(|intent| intent.kind == IntentKind::Delete)
            .filter_map(|intent| intent.id_message)
            .collect())
    }

    fn apply_items(&self, cluster_id: ClusterId, items: &[StoreItem]) -> DriveResult<ClusterDelta> {
        let pending_deletes = self.pending_delete_ids(cluster_id)?;
        let mut delta = ClusterDelta {
            enumerated: items.len(),
            ..ClusterDelta::default()
        };

        for item in items {
            if pending_deletes.contains(&item.id) {
                delta.pending_delete += 1;
                continue;
            }
            if self.mirror.contains_file(cluster_id, &item.id)? {
                delta.already_mirrored += 1;
                continue;
            }
            let file = match entry_from_item(item) {
                Ok(file) => file,
                Err(reason) => {
                    tracing::warn!(
                        cluster = %cluster_id,
                        id_message = %item.id,
                        caption = %item.caption,
                        %reason,
                        "skipping message with malformed caption"
                    );
                    delta.malformed += 1;
                    continue;
                }
            };
            if self.mirror.append_file(cluster_id, &file)? {
                delta.inserted += 1;
            } else {
                delta.already_mirrored += 1;
            }
        }
        Ok(delta)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Reconcile every cluster in the directory.
    pub async fn reconcile_all(&self) -> Vec<ClusterOutcome<ReconcileReport>> {
        let clusters: Vec<(String, ClusterId)> = self
            .directory
            .iter()
            .map(|(name, id)| (name.to_string(), id))
            .collect();
        let mut out = Vec::with_capacity(clusters.len());
        for (name, cluster_id) in clusters {
            let outcome = self.reconcile(&name).await;
            if let Err(e) = &outcome {
                tracing::warn!(cluster = %name, error = %e, "reconcile failed");
            }
            out.push(ClusterOutcome {
                name,
                cluster_id: Some(cluster_id),
                outcome,
            });
        }
        out
    }

    /// Finish interrupted operations and prune stale entries for one cluster.
    ///
    /// Pending deletes run before the enumeration so a blob that is being
    /// deleted is never re-inserted.
    #[tracing::instrument(skip(self), name = "sync.reconcile")]
    pub async fn reconcile(&self, name: &str) -> DriveResult<ReconcileReport> {
        let cluster_id = self.directory.cluster_id(name)?;
        self.mirror.ensure_cluster(cluster_id, name)?;
        let mut report = ReconcileReport::default();

        let intents = self.mirror.pending_intents(cluster_id)?;
        for intent in intents.iter().filter(|i| i.kind == IntentKind::Delete) {
            let Some(id) = &intent.id_message else {
                self.mirror.abandon_intent(intent.id, "delete intent without message id")?;
                report.abandoned += 1;
                continue;
            };
            if self.mirror.contains_file(cluster_id, id)? {
                self.mirror.delete_file(cluster_id, id)?;
            }
            match self.store.delete(cluster_id, id).await {
                Ok(()) => {
                    self.mirror.complete_intent(intent.id)?;
                    report.deletes_completed += 1;
                }
                Err(e) if e.is_message_not_found() => {
                    self.mirror.complete_intent(intent.id)?;
                    report.deletes_completed += 1;
                }
                Err(e) => {
                    tracing::warn!(id_message = %id, error = %e, "pending delete still failing");
                    self.mirror.fail_intent(intent.id, &e.to_string())?;
                    report.deletes_pending += 1;
                }
            }
        }

        self.replay_captions(cluster_id, &intents, &mut report).await?;

        let items = self.store.enumerate(cluster_id).await?;
        report.sync = self.apply_items(cluster_id, &items)?;
        let in_store: HashSet<&MessageId> = items.iter().map(|item| &item.id).collect();

        for intent in intents.iter().filter(|i| i.kind == IntentKind::Upload) {
            let Some(id) = &intent.id_message else {
                self.mirror.abandon_intent(intent.id, "upload never returned a message id")?;
                report.abandoned += 1;
                continue;
            };
            if self.mirror.contains_file(cluster_id, id)? || !in_store.contains(id) {
                self.mirror.complete_intent(intent.id)?;
                report.uploads_completed += 1;
            } else {
                report.uploads_pending += 1;
            }
        }

        for entry in self.mirror.entries(cluster_id)? {
            if let Entry::File(file) = entry {
                if !in_store.contains(&file.id_message) {
                    tracing::info!(id_message = %file.id_message, name = %file.name, "pruning stale entry");
                    self.mirror.delete_file(cluster_id, &file.id_message)?;
                    report.stale_pruned += 1;
                }
            }
        }

        tracing::info!(%report, "reconciled");
        Ok(report)
    }

    /// Push the mirror's name and location back into store captions that a
    /// failed write-through left behind.
    ///
    /// The caption is recomputed from the current mirror entry rather than
    /// taken from the intent, so a later rename always wins over an older
    /// pending one.
    async fn replay_captions(
        &self,
        cluster_id: ClusterId,
        intents: &[Intent],
        report: &mut ReconcileReport,
    ) -> DriveResult<()> {
        let mut by_message: IndexMap<&MessageId, Vec<i64>> = IndexMap::new();
        for intent in intents.iter().filter(|i| i.kind == IntentKind::Caption) {
            match &intent.id_message {
                Some(id) => by_message.entry(id).or_default().push(intent.id),
                None => {
                    self.mirror.abandon_intent(intent.id, "caption intent without message id")?;
                    report.abandoned += 1;
                }
            }
        }

        for (id, intent_ids) in by_message {
            let file = match self.mirror.get_file(cluster_id, id) {
                Ok(file) => file,
                Err(e) if e.is_not_found() => {
                    for intent in &intent_ids {
                        self.mirror.abandon_intent(*intent, "file no longer mirrored")?;
                    }
                    report.abandoned += intent_ids.len();
                    continue;
                }
                Err(e) => return Err(e),
            };

            let caption = desired_caption(&file);
            let outcome = if caption == file.caption_text {
                Ok(())
            } else {
                self.store.edit_caption(cluster_id, id, &caption).await
            };
            match outcome {
                Ok(()) => {
                    self.mirror.set_caption_text(cluster_id, id, &caption)?;
                    for intent in &intent_ids {
                        self.mirror.complete_intent(*intent)?;
                    }
                    report.captions_completed += 1;
                }
                Err(e) if e.is_message_not_found() => {
                    for intent in &intent_ids {
                        self.mirror.abandon_intent(*intent, "store message is gone")?;
                    }
                    report.abandoned += intent_ids.len();
                }
                Err(e) => {
                    tracing::warn!(id_message = %id, error = %e, "caption replay still failing");
                    for intent in &intent_ids {
                        self.mirror.fail_intent(*intent, &e.to_string())?;
                    }
                    report.captions_pending += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{bytes_stream, Fault, MemoryBlobStore, NewBlob};

    async fn setup(names: &[&str]) -> (Arc<MemoryBlobStore>, Arc<MirrorDb>, SyncEngine) {
        let store = Arc::new(MemoryBlobStore::new());
        let mirror = Arc::new(MirrorDb::in_memory().unwrap());
        let directory = Arc::new(ClusterDirectory::build(store.as_ref(), names.iter().copied()).await.unwrap());
        let engine = SyncEngine::new(store.clone(), mirror.clone(), directory);
        (store, mirror, engine)
    }

    async fn put(store: &MemoryBlobStore, chat: ClusterId, caption: &str) -> MessageId {
        store
            .upload(
                chat,
                bytes_stream(b"data".to_vec()),
                NewBlob {
                    caption: caption.into(),
                    size: 4,
                    mime_type: "text/plain".into(),
                },
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_entry_from_item_maps_trash_caption() {
        let item = StoreItem {
            id: MessageId::from("1"),
            caption: "a.txt@./trash".into(),
            size: 1,
            mime_type: "text/plain".into(),
            date: 5,
        };
        let file = entry_from_item(&item).unwrap();
        assert_eq!(file.location, Location::trashed("/"));

        let item = StoreItem {
            caption: "a.txt@/docs//2024".into(),
            ..item
        };
        assert!(entry_from_item(&item).is_err());
    }

    #[tokio::test]
    async fn test_sync_inserts_and_counts_malformed() {
        let (store, mirror, engine) = setup(&["shared"]).await;
        let chat = engine.directory().cluster_id("shared").unwrap();
        put(&store, chat, "a.txt@/docs").await;
        put(&store, chat, "holiday photo").await;
        put(&store, chat, "b.txt@/docs@hidden").await;
        put(&store, chat, "c.txt@/docs/../etc").await;

        let delta = engine.sync_cluster("shared").await.unwrap();
        assert!(delta.cluster_created);
        assert_eq!(delta.enumerated, 4);
        assert_eq!(delta.inserted, 2);
        assert_eq!(delta.malformed, 2);
        assert_eq!(mirror.list_folder(chat, "/docs").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_accepts_legacy_relative_captions() {
        let (store, mirror, engine) = setup(&["shared"]).await;
        let chat = engine.directory().cluster_id("shared").unwrap();
        let report = put(&store, chat, "report.pdf@./docs@visible").await;
        let root = put(&store, chat, "root.txt@./@not_visible").await;
        put(&store, chat, "a.txt@/docs@Visible ").await;
        put(&store, chat, "me@home.jpg@./@visible").await;
        put(&store, chat, "x.txt@/docs@public").await;

        let delta = engine.sync_cluster("shared").await.unwrap();
        assert_eq!(delta.enumerated, 5);
        assert_eq!(delta.inserted, 5);
        assert_eq!(delta.malformed, 0);

        let report = mirror.get_file(chat, &report).unwrap();
        assert_eq!(report.location, Location::active("/docs"));
        assert_eq!(report.caption_text, "report.pdf@./docs@visible");
        assert_eq!(mirror.get_file(chat, &root).unwrap().location, Location::active("/"));

        let mut docs: Vec<String> = mirror
            .list_folder(chat, "/docs")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        docs.sort();
        assert_eq!(docs, vec!["a.txt", "report.pdf", "x.txt"]);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_and_one_directional() {
        let (store, mirror, engine) = setup(&["shared"]).await;
        let chat = engine.directory().cluster_id("shared").unwrap();
        let id = put(&store, chat, "a.txt@/").await;

        engine.sync_cluster("shared").await.unwrap();
        let first = mirror.snapshot(chat).unwrap();

        let delta = engine.sync_cluster("shared").await.unwrap();
        assert!(!delta.cluster_created);
        assert_eq!(delta.inserted, 0);
        assert_eq!(delta.already_mirrored, 1);
        assert_eq!(mirror.snapshot(chat).unwrap(), first);

        // Caption edits in the store do not flow back into mirrored entries.
        store.edit_caption(chat, &id, "z.txt@/").await.unwrap();
        engine.sync_cluster("shared").await.unwrap();
        assert_eq!(mirror.get_file(chat, &id).unwrap().name, "a.txt");
    }

    #[tokio::test]
    async fn test_sync_isolates_cluster_failures() {
        let (store, mirror, engine) = setup(&["one", "two"]).await;
        let one = engine.directory().cluster_id("one").unwrap();
        let two = engine.directory().cluster_id("two").unwrap();
        put(&store, one, "a@/").await;
        put(&store, two, "b@/").await;
        store.inject(Fault::Enumerate(one));

        let report = engine.sync_all().await;
        assert!(!report.is_complete());
        let failed: Vec<&str> = report.failures().map(|(name, _)| name).collect();
        assert_eq!(failed, vec!["one"]);
        assert_eq!(report.totals().inserted, 1);
        assert_eq!(mirror.list_active(two).unwrap().len(), 1);
        assert!(mirror.list_active(one).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_prunes_stale_entries() {
        let (store, mirror, engine) = setup(&["shared"]).await;
        let chat = engine.directory().cluster_id("shared").unwrap();
        let keep = put(&store, chat, "keep@/").await;
        let gone = put(&store, chat, "gone@/").await;
        engine.sync_cluster("shared").await.unwrap();

        store.delete(chat, &gone).await.unwrap();
        let report = engine.reconcile("shared").await.unwrap();
        assert_eq!(report.stale_pruned, 1);
        assert!(mirror.contains_file(chat, &keep).unwrap());
        assert!(!mirror.contains_file(chat, &gone).unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_abandons_upload_without_message() {
        let (_store, mirror, engine) = setup(&["shared"]).await;
        let chat = engine.directory().cluster_id("shared").unwrap();
        mirror
            .begin_intent(IntentKind::Upload, chat, None, Some("a@/"))
            .unwrap();
        let report = engine.reconcile("shared").await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert!(mirror.pending_intents(chat).unwrap().is_empty());
    }
}
