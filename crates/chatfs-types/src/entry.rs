//! Cluster entries: files backed by store messages, and mirror-only folders.

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::path::TRASH_PATH;

/// Where a file currently lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Location {
    /// Visible at an absolute path.
    Active { path: String },
    /// Soft-deleted; `from` is where it lived before.
    Trashed { from: String },
}

impl Location {
    pub fn active(path: impl Into<String>) -> Self {
        Self::Active { path: path.into() }
    }

    pub fn trashed(from: impl Into<String>) -> Self {
        Self::Trashed { from: from.into() }
    }

    /// Path as persisted: the active path, or [`TRASH_PATH`].
    pub fn path(&self) -> &str {
        match self {
            Location::Active { path } => path,
            Location::Trashed { .. } => TRASH_PATH,
        }
    }

    /// Path the file had before trashing, if trashed.
    pub fn origin(&self) -> Option<&str> {
        match self {
            Location::Active { .. } => None,
            Location::Trashed { from } => Some(from),
        }
    }

    pub fn is_trashed(&self) -> bool {
        matches!(self, Location::Trashed { .. })
    }
}

/// A file entry: one immutable store message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id_message: MessageId,
    pub name: String,
    pub location: Location,
    /// Size in bytes, as reported by the store.
    pub size: u64,
    pub mime_type: String,
    /// Caption string as last written to (or read from) the store.
    pub caption_text: String,
    /// Unix milliseconds; upload time, refreshed on rename.
    pub timestamp: i64,
}

/// A folder entry. Folders exist only in the mirror.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub path: String,
    pub created_at: i64,
}

/// One record in a cluster's ordered entry list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    File(FileEntry),
    Folder(FolderEntry),
}

impl Entry {
    /// Persisted path (folders: their path; files: see [`Location::path`]).
    pub fn path(&self) -> &str {
        match self {
            Entry::File(file) => file.location.path(),
            Entry::Folder(folder) => &folder.path,
        }
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Entry::File(file) => Some(file),
            Entry::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&FolderEntry> {
        match self {
            Entry::Folder(folder) => Some(folder),
            Entry::File(_) => None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Entry::Folder(_))
    }
}

impl From<FileEntry> for Entry {
    fn from(file: FileEntry) -> Self {
        Entry::File(file)
    }
}

impl From<FolderEntry> for Entry {
    fn from(folder: FolderEntry) -> Self {
        Entry::Folder(folder)
    }
}
