//! SQLite metadata mirror.
//!
//! Holds each cluster's ordered entry list. Every mutation is a single
//! statement or a single transaction under the connection lock, and the lock
//! is never held across an `.await`.
//!
//! Rows keep the legacy sentinels so exported snapshots read like the wire
//! format: folders carry `id_message = "-1"`, trashed files carry
//! `path = "./trash"` with the pre-trash location in `trashed_from`.

pub mod intents;
pub mod query;

pub use intents::{Intent, IntentKind, IntentState};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

use chatfs_types::path::{self as vpath, ROOT_PATH, TRASH_PATH};
use chatfs_types::{
    now_millis, ClusterId, Entry, FileEntry, FolderEntry, Location, MessageId, FOLDER_MESSAGE_ID,
};

use crate::error::{DriveError, DriveResult};

/// Name, mime type, and caption stored on folder rows.
pub const FOLDER_FIELD_SENTINEL: &str = "None";

const SCHEMA: &str = r#"
-- Clusters (one per store chat)
CREATE TABLE IF NOT EXISTS clusters (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    cluster_id INTEGER NOT NULL,
    cluster_name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_clusters_id ON clusters(cluster_id);

-- Entries (ordered by seq within a cluster)
CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    cluster_id INTEGER NOT NULL REFERENCES clusters(cluster_id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK (kind IN ('file', 'folder')),
    id_message TEXT NOT NULL,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    trashed_from TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    mime_type TEXT NOT NULL,
    caption_text TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_file
    ON entries(cluster_id, id_message) WHERE kind = 'file';
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_folder
    ON entries(cluster_id, path) WHERE kind = 'folder';
CREATE INDEX IF NOT EXISTS idx_entries_path ON entries(cluster_id, path);

-- Intent log for two-phase operations
CREATE TABLE IF NOT EXISTS intents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    cluster_id INTEGER NOT NULL,
    id_message TEXT,
    caption TEXT,
    state TEXT NOT NULL DEFAULT 'pending',
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_intents_pending ON intents(cluster_id, state);
"#;

pub(crate) const ENTRY_COLUMNS: &str =
    "kind, id_message, name, path, trashed_from, size, mime_type, caption_text, timestamp";

/// Row discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Folder => "folder",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntryKind::File),
            "folder" => Some(EntryKind::Folder),
            _ => None,
        }
    }
}

/// One entry as persisted, sentinels included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id_message: String,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trashed_from: Option<String>,
    pub size: u64,
    pub mime_type: String,
    pub caption_text: String,
    pub timestamp: i64,
}

/// Export of one cluster, in entry order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub cluster_id: ClusterId,
    pub cluster_name: String,
    pub entries: Vec<SnapshotEntry>,
}

/// Result of a folder rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRename {
    pub old_path: String,
    pub new_path: String,
    /// Rows rewritten, the folder itself included.
    pub rows_moved: usize,
}

/// Database handle for the metadata mirror.
pub struct MirrorDb {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for MirrorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorDb").finish_non_exhaustive()
    }
}

pub(crate) fn size_to_sql(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

pub(crate) fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let kind: String = row.get(0)?;
    let path: String = row.get(3)?;
    let timestamp: i64 = row.get(8)?;
    match EntryKind::from_str(&kind) {
        Some(EntryKind::Folder) => Ok(Entry::Folder(FolderEntry {
            path,
            created_at: timestamp,
        })),
        Some(EntryKind::File) => {
            let trashed_from: Option<String> = row.get(4)?;
            let location = if path == TRASH_PATH {
                Location::trashed(trashed_from.unwrap_or_else(|| ROOT_PATH.to_string()))
            } else {
                Location::active(path)
            };
            let size: i64 = row.get(5)?;
            Ok(Entry::File(FileEntry {
                id_message: MessageId::new(row.get::<_, String>(1)?),
                name: row.get(2)?,
                location,
                size: u64::try_from(size).unwrap_or(0),
                mime_type: row.get(6)?,
                caption_text: row.get(7)?,
                timestamp,
            }))
        }
        None => Err(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown entry kind: {kind}").into(),
        )),
    }
}

pub(crate) fn row_to_file(row: &Row<'_>) -> rusqlite::Result<FileEntry> {
    match row_to_entry(row)? {
        Entry::File(file) => Ok(file),
        Entry::Folder(_) => Err(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            "expected a file row".into(),
        )),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub(crate) fn cluster_exists(conn: &Connection, cluster_id: ClusterId) -> DriveResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM clusters WHERE cluster_id = ?1",
            params![cluster_id.get()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn require_cluster(conn: &Connection, cluster_id: ClusterId) -> DriveResult<()> {
    if cluster_exists(conn, cluster_id)? {
        Ok(())
    } else {
        Err(DriveError::not_found(format!("cluster {cluster_id}")))
    }
}

fn get_file_in(conn: &Connection, cluster_id: ClusterId, id: &MessageId) -> DriveResult<FileEntry> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries
         WHERE cluster_id = ?1 AND kind = 'file' AND id_message = ?2"
    );
    conn.query_row(&sql, params![cluster_id.get(), id.as_str()], row_to_file)
        .optional()?
        .ok_or_else(|| DriveError::not_found(format!("file {id} in cluster {cluster_id}")))
}

fn folder_exists_in(conn: &Connection, cluster_id: ClusterId, path: &str) -> DriveResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM entries WHERE cluster_id = ?1 AND kind = 'folder' AND path = ?2",
            params![cluster_id.get(), path],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

impl MirrorDb {
    /// Open or create a mirror at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> DriveResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory mirror (for testing).
    pub fn in_memory() -> DriveResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> DriveResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    // ========================================================================
    // Clusters
    // ========================================================================

    /// Insert the cluster if absent. Returns true if it was created.
    pub fn ensure_cluster(&self, cluster_id: ClusterId, name: &str) -> DriveResult<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO clusters (cluster_id, cluster_name, created_at)
             VALUES (?1, ?2, ?3)",
            params![cluster_id.get(), name, now_millis()],
        )?;
        Ok(inserted == 1)
    }

    /// All mirrored clusters in creation order.
    pub fn clusters(&self) -> DriveResult<Vec<(ClusterId, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT cluster_id, cluster_name FROM clusters ORDER BY seq")?;
        let rows = stmt.query_map([], |row| {
            Ok((ClusterId::new(row.get(0)?), row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ========================================================================
    // Folders
    // ========================================================================

    /// Append a folder entry.
    pub fn create_folder(&self, cluster_id: ClusterId, path: &str) -> DriveResult<FolderEntry> {
        let path = vpath::normalize(path)?;
        if path == ROOT_PATH {
            return Err(DriveError::conflict("the root folder always exists"));
        }
        let created_at = now_millis();

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO entries
                (cluster_id, kind, id_message, name, path, size, mime_type, caption_text, timestamp)
             SELECT ?1, 'folder', ?2, ?3, ?4, 0, ?3, ?3, ?5
             WHERE EXISTS (SELECT 1 FROM clusters WHERE cluster_id = ?1)",
            params![
                cluster_id.get(),
                FOLDER_MESSAGE_ID,
                FOLDER_FIELD_SENTINEL,
                path,
                created_at
            ],
        );
        match result {
            Ok(0) => Err(DriveError::not_found(format!("cluster {cluster_id}"))),
            Ok(_) => Ok(FolderEntry { path, created_at }),
            Err(e) if is_unique_violation(&e) => {
                Err(DriveError::conflict(format!("folder {path} already exists")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the folder at exactly `path`. Does not check emptiness.
    pub fn delete_folder(&self, cluster_id: ClusterId, path: &str) -> DriveResult<()> {
        let path = vpath::normalize(path)?;
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM entries WHERE cluster_id = ?1 AND kind = 'folder' AND path = ?2",
            params![cluster_id.get(), path],
        )?;
        if removed == 0 {
            return Err(DriveError::not_found(format!("folder {path} in cluster {cluster_id}")));
        }
        Ok(())
    }

    /// Rename the folder at `old_path` to `new_name` within the same parent.
    ///
    /// Descendant folders, active files below it, and the trashed-from
    /// location of files trashed from below it move along, in one
    /// transaction.
    pub fn rename_folder(
        &self,
        cluster_id: ClusterId,
        old_path: &str,
        new_name: &str,
    ) -> DriveResult<FolderRename> {
        vpath::validate_name(new_name)?;
        let old_path = vpath::normalize(old_path)?;
        if old_path == ROOT_PATH {
            return Err(DriveError::invalid_argument("cannot rename the root folder"));
        }
        let new_path = vpath::join(vpath::parent(&old_path), new_name);

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if !folder_exists_in(&tx, cluster_id, &old_path)? {
            return Err(DriveError::not_found(format!(
                "folder {old_path} in cluster {cluster_id}"
            )));
        }
        if new_path == old_path {
            return Ok(FolderRename {
                old_path,
                new_path,
                rows_moved: 0,
            });
        }
        if folder_exists_in(&tx, cluster_id, &new_path)? {
            return Err(DriveError::conflict(format!("folder {new_path} already exists")));
        }

        let (lower, upper) = vpath::subtree_bounds(&old_path);
        let prefix_chars = old_path.chars().count() as i64;
        let moved = tx.execute(
            "UPDATE entries SET path = ?2 || substr(path, ?3 + 1)
             WHERE cluster_id = ?1
               AND (path = ?4 OR (path >= ?5 AND path < ?6))",
            params![cluster_id.get(), new_path, prefix_chars, old_path, lower, upper],
        );
        let moved = match moved {
            Ok(n) => n,
            Err(e) if is_unique_violation(&e) => {
                return Err(DriveError::conflict(format!(
                    "renaming {old_path} to {new_path} collides with an existing folder"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        tx.execute(
            "UPDATE entries SET trashed_from = ?2 || substr(trashed_from, ?3 + 1)
             WHERE cluster_id = ?1 AND kind = 'file' AND trashed_from IS NOT NULL
               AND (trashed_from = ?4 OR (trashed_from >= ?5 AND trashed_from < ?6))",
            params![cluster_id.get(), new_path, prefix_chars, old_path, lower, upper],
        )?;
        tx.commit()?;

        Ok(FolderRename {
            old_path,
            new_path,
            rows_moved: moved,
        })
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Append a file entry unless one with the same message id exists.
    /// Returns true if inserted.
    pub fn append_file(&self, cluster_id: ClusterId, file: &FileEntry) -> DriveResult<bool> {
        let conn = self.conn.lock();
        require_cluster(&conn, cluster_id)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO entries
                (cluster_id, kind, id_message, name, path, trashed_from, size, mime_type, caption_text, timestamp)
             VALUES (?1, 'file', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                cluster_id.get(),
                file.id_message.as_str(),
                file.name,
                file.location.path(),
                file.location.origin(),
                size_to_sql(file.size),
                file.mime_type,
                file.caption_text,
                file.timestamp
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Fetch one file.
    pub fn get_file(&self, cluster_id: ClusterId, id: &MessageId) -> DriveResult<FileEntry> {
        get_file_in(&self.conn.lock(), cluster_id, id)
    }

    /// True if the file is mirrored.
    pub fn contains_file(&self, cluster_id: ClusterId, id: &MessageId) -> DriveResult<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM entries WHERE cluster_id = ?1 AND kind = 'file' AND id_message = ?2",
                params![cluster_id.get(), id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Rename a file. Validates before mutating and refreshes the timestamp.
    pub fn update_file_name(
        &self,
        cluster_id: ClusterId,
        id: &MessageId,
        new_name: &str,
    ) -> DriveResult<FileEntry> {
        vpath::validate_name(new_name)?;
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE entries SET name = ?3, timestamp = ?4
             WHERE cluster_id = ?1 AND kind = 'file' AND id_message = ?2",
            params![cluster_id.get(), id.as_str(), new_name, now_millis()],
        )?;
        if updated == 0 {
            return Err(DriveError::not_found(format!("file {id} in cluster {cluster_id}")));
        }
        get_file_in(&conn, cluster_id, id)
    }

    /// Move a file to `new_path`. A trashed file becomes active again.
    pub fn update_file_location(
        &self,
        cluster_id: ClusterId,
        id: &MessageId,
        new_path: &str,
    ) -> DriveResult<FileEntry> {
        let new_path = vpath::normalize(new_path)?;
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE entries SET path = ?3, trashed_from = NULL
             WHERE cluster_id = ?1 AND kind = 'file' AND id_message = ?2",
            params![cluster_id.get(), id.as_str(), new_path],
        )?;
        if updated == 0 {
            return Err(DriveError::not_found(format!("file {id} in cluster {cluster_id}")));
        }
        get_file_in(&conn, cluster_id, id)
    }

    /// Move a file to the trash, remembering where it was. Idempotent.
    pub fn trash_file(&self, cluster_id: ClusterId, id: &MessageId) -> DriveResult<FileEntry> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE entries SET trashed_from = path, path = ?3
             WHERE cluster_id = ?1 AND kind = 'file' AND id_message = ?2 AND path != ?3",
            params![cluster_id.get(), id.as_str(), TRASH_PATH],
        )?;
        get_file_in(&conn, cluster_id, id)
    }

    /// Move a trashed file back to where it was trashed from.
    pub fn restore_file(&self, cluster_id: ClusterId, id: &MessageId) -> DriveResult<FileEntry> {
        let conn = self.conn.lock();
        let file = get_file_in(&conn, cluster_id, id)?;
        if !file.location.is_trashed() {
            return Err(DriveError::invalid_argument(format!("file {id} is not in the trash")));
        }
        conn.execute(
            "UPDATE entries SET path = COALESCE(trashed_from, ?3), trashed_from = NULL
             WHERE cluster_id = ?1 AND kind = 'file' AND id_message = ?2",
            params![cluster_id.get(), id.as_str(), ROOT_PATH],
        )?;
        get_file_in(&conn, cluster_id, id)
    }

    /// Remove a file entry unconditionally.
    pub fn delete_file(&self, cluster_id: ClusterId, id: &MessageId) -> DriveResult<()> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM entries WHERE cluster_id = ?1 AND kind = 'file' AND id_message = ?2",
            params![cluster_id.get(), id.as_str()],
        )?;
        if removed == 0 {
            return Err(DriveError::not_found(format!("file {id} in cluster {cluster_id}")));
        }
        Ok(())
    }

    /// Record the caption last written to the store.
    pub fn set_caption_text(
        &self,
        cluster_id: ClusterId,
        id: &MessageId,
        caption: &str,
    ) -> DriveResult<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE entries SET caption_text = ?3
             WHERE cluster_id = ?1 AND kind = 'file' AND id_message = ?2",
            params![cluster_id.get(), id.as_str(), caption],
        )?;
        if updated == 0 {
            return Err(DriveError::not_found(format!("file {id} in cluster {cluster_id}")));
        }
        Ok(())
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Every entry of a cluster in insertion order.
    pub fn entries(&self, cluster_id: ClusterId) -> DriveResult<Vec<Entry>> {
        let conn = self.conn.lock();
        require_cluster(&conn, cluster_id)?;
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE cluster_id = ?1 ORDER BY seq");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cluster_id.get()], row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Export a cluster as persisted, sentinels included.
    pub fn snapshot(&self, cluster_id: ClusterId) -> DriveResult<ClusterSnapshot> {
        let conn = self.conn.lock();
        let cluster_name: String = conn
            .query_row(
                "SELECT cluster_name FROM clusters WHERE cluster_id = ?1",
                params![cluster_id.get()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DriveError::not_found(format!("cluster {cluster_id}")))?;

        let mut stmt = conn.prepare(
            "SELECT id_message, name, path, trashed_from, size, mime_type, caption_text, timestamp
             FROM entries WHERE cluster_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![cluster_id.get()], |row| {
            let size: i64 = row.get(4)?;
            Ok(SnapshotEntry {
                id_message: row.get(0)?,
                name: row.get(1)?,
                path: row.get(2)?,
                trashed_from: row.get(3)?,
                size: u64::try_from(size).unwrap_or(0),
                mime_type: row.get(5)?,
                caption_text: row.get(6)?,
                timestamp: row.get(7)?,
            })
        })?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(ClusterSnapshot {
            cluster_id,
            cluster_name,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: ClusterId = ClusterId::new(-1001);

    fn mirror() -> MirrorDb {
        let db = MirrorDb::in_memory().unwrap();
        db.ensure_cluster(C, "shared").unwrap();
        db
    }

    fn file(id: &str, name: &str, path: &str) -> FileEntry {
        FileEntry {
            id_message: MessageId::from(id),
            name: name.into(),
            location: Location::active(path),
            size: 3,
            mime_type: "text/plain".into(),
            caption_text: format!("{name}@{path}"),
            timestamp: 1,
        }
    }

    #[test]
    fn test_ensure_cluster_is_idempotent() {
        let db = MirrorDb::in_memory().unwrap();
        assert!(db.ensure_cluster(C, "shared").unwrap());
        assert!(!db.ensure_cluster(C, "shared").unwrap());
        assert_eq!(db.clusters().unwrap(), vec![(C, "shared".to_string())]);
    }

    #[test]
    fn test_create_folder_guards() {
        let db = mirror();
        db.create_folder(C, "/docs/").unwrap();
        assert!(db.create_folder(C, "/docs").unwrap_err().is_conflict());
        assert!(db.create_folder(C, "docs").unwrap_err().is_invalid_argument());
        assert!(db.create_folder(C, "/").unwrap_err().is_conflict());
        assert!(db
            .create_folder(ClusterId::new(1), "/docs")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_folder_rows_carry_sentinels() {
        let db = mirror();
        db.create_folder(C, "/docs").unwrap();
        let snap = db.snapshot(C).unwrap();
        assert_eq!(snap.entries[0].id_message, FOLDER_MESSAGE_ID);
        assert_eq!(snap.entries[0].name, FOLDER_FIELD_SENTINEL);
        assert_eq!(snap.entries[0].size, 0);
    }

    #[test]
    fn test_delete_folder_not_found() {
        let db = mirror();
        assert!(db.delete_folder(C, "/nope").unwrap_err().is_not_found());
        db.create_folder(C, "/a").unwrap();
        db.delete_folder(C, "/a").unwrap();
        assert!(db.entries(C).unwrap().is_empty());
    }

    #[test]
    fn test_append_file_is_keyed_on_message_id() {
        let db = mirror();
        assert!(db.append_file(C, &file("1", "a.txt", "/")).unwrap());
        assert!(!db.append_file(C, &file("1", "other.txt", "/x")).unwrap());
        assert_eq!(db.get_file(C, &MessageId::from("1")).unwrap().name, "a.txt");
        assert!(db
            .append_file(ClusterId::new(5), &file("1", "a", "/"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_update_file_name_validates_first() {
        let db = mirror();
        db.append_file(C, &file("1", "a.txt", "/")).unwrap();
        let id = MessageId::from("1");

        assert!(db.update_file_name(C, &id, "a/b").unwrap_err().is_invalid_argument());
        assert_eq!(db.get_file(C, &id).unwrap().name, "a.txt");

        let renamed = db.update_file_name(C, &id, "b.txt").unwrap();
        assert_eq!(renamed.name, "b.txt");
        assert!(renamed.timestamp > 1);
        assert!(db
            .update_file_name(C, &MessageId::from("9"), "b.txt")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_trash_restore_cycle() {
        let db = mirror();
        db.append_file(C, &file("1", "a.txt", "/docs")).unwrap();
        let id = MessageId::from("1");

        let trashed = db.trash_file(C, &id).unwrap();
        assert_eq!(trashed.location, Location::trashed("/docs"));
        // Second trash keeps the original origin.
        let again = db.trash_file(C, &id).unwrap();
        assert_eq!(again.location, Location::trashed("/docs"));
        assert_eq!(db.snapshot(C).unwrap().entries[0].path, TRASH_PATH);

        let restored = db.restore_file(C, &id).unwrap();
        assert_eq!(restored.location, Location::active("/docs"));
        assert!(db.restore_file(C, &id).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_update_location_untrashes_and_keeps_timestamp() {
        let db = mirror();
        db.append_file(C, &file("1", "a.txt", "/docs")).unwrap();
        let id = MessageId::from("1");
        db.trash_file(C, &id).unwrap();

        let moved = db.update_file_location(C, &id, "/archive").unwrap();
        assert_eq!(moved.location, Location::active("/archive"));
        assert_eq!(moved.timestamp, 1);
        assert!(db.update_file_location(C, &id, "./trash").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_delete_file_requires_match() {
        let db = mirror();
        db.append_file(C, &file("1", "a.txt", "/")).unwrap();
        db.delete_file(C, &MessageId::from("1")).unwrap();
        assert!(db.delete_file(C, &MessageId::from("1")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rename_folder_cascades() {
        let db = mirror();
        db.create_folder(C, "/a").unwrap();
        db.create_folder(C, "/a/b").unwrap();
        db.create_folder(C, "/ab").unwrap();
        db.append_file(C, &file("1", "x.txt", "/a/b")).unwrap();
        db.append_file(C, &file("2", "y.txt", "/ab")).unwrap();
        db.append_file(C, &file("3", "z.txt", "/a")).unwrap();
        db.trash_file(C, &MessageId::from("3")).unwrap();

        let rename = db.rename_folder(C, "/a", "c").unwrap();
        assert_eq!(rename.new_path, "/c");
        assert_eq!(rename.rows_moved, 3);

        let folders: Vec<String> = db
            .entries(C)
            .unwrap()
            .iter()
            .filter_map(|e| e.as_folder().map(|f| f.path.clone()))
            .collect();
        assert_eq!(folders, vec!["/c", "/c/b", "/ab"]);
        assert_eq!(
            db.get_file(C, &MessageId::from("1")).unwrap().location,
            Location::active("/c/b")
        );
        assert_eq!(
            db.get_file(C, &MessageId::from("2")).unwrap().location,
            Location::active("/ab")
        );
        assert_eq!(
            db.get_file(C, &MessageId::from("3")).unwrap().location,
            Location::trashed("/c")
        );
    }

    #[test]
    fn test_rename_folder_collision_leaves_tree_unchanged() {
        let db = mirror();
        db.create_folder(C, "/a").unwrap();
        db.create_folder(C, "/b").unwrap();
        let before = db.snapshot(C).unwrap();

        assert!(db.rename_folder(C, "/a", "b").unwrap_err().is_conflict());
        assert!(db.rename_folder(C, "/a", "..").unwrap_err().is_invalid_argument());
        assert!(db.rename_folder(C, "/missing", "z").unwrap_err().is_not_found());
        assert!(db.rename_folder(C, "/", "z").unwrap_err().is_invalid_argument());
        assert_eq!(db.snapshot(C).unwrap(), before);
        assert!(db.list_folders(C).unwrap().iter().all(|f| f.path != "/z"));
    }

    #[test]
    fn test_rename_folder_descendant_collision_rolls_back() {
        let db = mirror();
        db.create_folder(C, "/a").unwrap();
        db.create_folder(C, "/a/x").unwrap();
        // Orphan folder whose parent does not exist.
        db.create_folder(C, "/b/x").unwrap();
        let before = db.snapshot(C).unwrap();

        assert!(db.rename_folder(C, "/a", "b").unwrap_err().is_conflict());
        assert_eq!(db.snapshot(C).unwrap(), before);
    }
}
