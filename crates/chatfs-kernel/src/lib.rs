//! chatfs kernel.
//!
//! A path-addressed virtual filesystem whose durable storage is an
//! append-only blob store: each file is one message with an attachment and
//! a `name@path` caption, each folder is a record that lives only in the
//! metadata mirror.
//!
//! Layering, bottom-up:
//!
//! - [`store`]: the [`BlobStore`] contract plus memory and local backends.
//! - [`mirror`]: SQLite-backed per-cluster entry list, path queries, and
//!   the intent log used to recover interrupted two-phase operations.
//! - [`directory`]: cluster name → store chat id, built once at startup.
//! - [`sync`]: one-directional store → mirror reconciliation and the
//!   repair sweep.
//! - [`drive`]: the lifecycle orchestrator that callers use.

pub mod directory;
pub mod drive;
pub mod error;
pub mod mirror;
pub mod store;
pub mod sync;

pub use directory::ClusterDirectory;
pub use drive::{DeleteOutcome, Drive, TrashedFile, UploadRequest};
pub use error::{DriveError, DriveResult};
pub use mirror::{ClusterSnapshot, FolderRename, MirrorDb, SnapshotEntry};
pub use store::{
    BlobStore, ByteStream, LocalBlobStore, MemoryBlobStore, NewBlob, StoreError, StoreItem,
    StoreResult,
};
pub use sync::{
    ClusterDelta, ClusterOutcome, ClusterSync, ReconcileReport, SyncEngine, SyncReport,
};

pub use chatfs_types::{
    Caption, ClusterId, Entry, FileEntry, FolderEntry, Location, MessageId, Visibility,
};
