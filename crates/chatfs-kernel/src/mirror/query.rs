//! Path queries over the mirror.
//!
//! Subtree queries are separator-bounded range scans on the
//! `(cluster_id, path)` index: `path = p OR (path >= p + "/" AND path < p + "0")`.
//! Trashed files never match an active path because `./trash` is relative.

use rusqlite::params;

use chatfs_types::path::{self as vpath, TRASH_PATH};
use chatfs_types::{ClusterId, FileEntry, FolderEntry};

use super::{require_cluster, row_to_file, MirrorDb, ENTRY_COLUMNS};
use crate::error::DriveResult;

impl MirrorDb {
    /// Files directly in `path`. Folders and trashed files are excluded.
    pub fn list_folder(&self, cluster_id: ClusterId, path: &str) -> DriveResult<Vec<FileEntry>> {
        let path = vpath::normalize(path)?;
        let conn = self.conn();
        require_cluster(&conn, cluster_id)?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE cluster_id = ?1 AND kind = 'file' AND path = ?2
             ORDER BY seq"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cluster_id.get(), path], row_to_file)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Files in `path` or anywhere below it.
    pub fn list_subtree(&self, cluster_id: ClusterId, path: &str) -> DriveResult<Vec<FileEntry>> {
        let path = vpath::normalize(path)?;
        let (lower, upper) = vpath::subtree_bounds(&path);
        let conn = self.conn();
        require_cluster(&conn, cluster_id)?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE cluster_id = ?1 AND kind = 'file'
               AND (path = ?2 OR (path >= ?3 AND path < ?4))
             ORDER BY seq"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cluster_id.get(), path, lower, upper], row_to_file)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of active files in `path` or below it.
    pub fn count_subtree(&self, cluster_id: ClusterId, path: &str) -> DriveResult<usize> {
        let path = vpath::normalize(path)?;
        let (lower, upper) = vpath::subtree_bounds(&path);
        let conn = self.conn();
        require_cluster(&conn, cluster_id)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries
             WHERE cluster_id = ?1 AND kind = 'file'
               AND (path = ?2 OR (path >= ?3 AND path < ?4))",
            params![cluster_id.get(), path, lower, upper],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Every folder in the cluster, in creation order.
    pub fn list_folders(&self, cluster_id: ClusterId) -> DriveResult<Vec<FolderEntry>> {
        let conn = self.conn();
        require_cluster(&conn, cluster_id)?;
        let mut stmt = conn.prepare(
            "SELECT path, timestamp FROM entries
             WHERE cluster_id = ?1 AND kind = 'folder'
             ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![cluster_id.get()], |row| {
            Ok(FolderEntry {
                path: row.get(0)?,
                created_at: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// True if any folder lies strictly below `path`.
    pub fn has_subfolders(&self, cluster_id: ClusterId, path: &str) -> DriveResult<bool> {
        let path = vpath::normalize(path)?;
        let (lower, upper) = vpath::subtree_bounds(&path);
        let conn = self.conn();
        require_cluster(&conn, cluster_id)?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM entries
                WHERE cluster_id = ?1 AND kind = 'folder'
                  AND path != ?2 AND path >= ?3 AND path < ?4
             )",
            params![cluster_id.get(), path, lower, upper],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Files currently in the trash.
    pub fn list_trashed(&self, cluster_id: ClusterId) -> DriveResult<Vec<FileEntry>> {
        self.files_where(cluster_id, "path = ?2")
    }

    /// Files not in the trash.
    pub fn list_active(&self, cluster_id: ClusterId) -> DriveResult<Vec<FileEntry>> {
        self.files_where(cluster_id, "path != ?2")
    }

    fn files_where(&self, cluster_id: ClusterId, predicate: &str) -> DriveResult<Vec<FileEntry>> {
        let conn = self.conn();
        require_cluster(&conn, cluster_id)?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE cluster_id = ?1 AND kind = 'file' AND {predicate}
             ORDER BY seq"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cluster_id.get(), TRASH_PATH], row_to_file)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use chatfs_types::{Location, MessageId};

    use super::*;

    const C: ClusterId = ClusterId::new(-1001);

    fn seeded() -> MirrorDb {
        let db = MirrorDb::in_memory().unwrap();
        db.ensure_cluster(C, "shared").unwrap();
        for (id, path) in [("1", "/"), ("2", "/a"), ("3", "/a/b"), ("4", "/ab"), ("5", "/a")] {
            db.append_file(
                C,
                &FileEntry {
                    id_message: MessageId::from(id),
                    name: format!("f{id}"),
                    location: Location::active(path),
                    size: 1,
                    mime_type: "text/plain".into(),
                    caption_text: format!("f{id}@{path}"),
                    timestamp: 0,
                },
            )
            .unwrap();
        }
        db.trash_file(C, &MessageId::from("5")).unwrap();
        db
    }

    fn ids(files: &[FileEntry]) -> Vec<&str> {
        files.iter().map(|f| f.id_message.as_str()).collect()
    }

    #[test]
    fn test_list_folder_is_exact() {
        let db = seeded();
        db.create_folder(C, "/a").unwrap();
        assert_eq!(ids(&db.list_folder(C, "/a").unwrap()), vec!["2"]);
        assert_eq!(ids(&db.list_folder(C, "/").unwrap()), vec!["1"]);
        assert!(db.list_folder(C, "/missing").unwrap().is_empty());
    }

    #[test]
    fn test_list_subtree_is_separator_bounded() {
        let db = seeded();
        assert_eq!(ids(&db.list_subtree(C, "/a").unwrap()), vec!["2", "3"]);
        assert_eq!(ids(&db.list_subtree(C, "/").unwrap()), vec!["1", "2", "3", "4"]);
        assert_eq!(db.count_subtree(C, "/a").unwrap(), 2);
    }

    #[test]
    fn test_has_subfolders() {
        let db = seeded();
        assert!(!db.has_subfolders(C, "/").unwrap());
        db.create_folder(C, "/a").unwrap();
        assert!(db.has_subfolders(C, "/").unwrap());
        assert!(!db.has_subfolders(C, "/a").unwrap());
        db.create_folder(C, "/a/b").unwrap();
        assert!(db.has_subfolders(C, "/a").unwrap());
        db.create_folder(C, "/abc").unwrap();
        assert!(!db.has_subfolders(C, "/ab").unwrap());
    }

    #[test]
    fn test_trash_partition() {
        let db = seeded();
        assert_eq!(ids(&db.list_trashed(C).unwrap()), vec!["5"]);
        assert_eq!(ids(&db.list_active(C).unwrap()), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_unknown_cluster_is_not_found() {
        let db = seeded();
        let other = ClusterId::new(42);
        assert!(db.list_folder(other, "/").unwrap_err().is_not_found());
        assert!(db.list_subtree(other, "/").unwrap_err().is_not_found());
        assert!(db.list_folders(other).unwrap_err().is_not_found());
        assert!(db.has_subfolders(other, "/").unwrap_err().is_not_found());
        assert!(db.list_trashed(other).unwrap_err().is_not_found());
    }
}
