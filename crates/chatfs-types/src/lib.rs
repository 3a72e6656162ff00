//! Shared types for chatfs.
//!
//! This crate is the leaf of the workspace: typed ids, the `Entry` tagged
//! union that the mirror stores, the caption codec that is the only metadata
//! channel into the blob store, and the path rules every layer agrees on.
//! It has **no internal chatfs dependencies**.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`ClusterId`]     | Store-native chat id backing one cluster     |
//! | [`MessageId`]     | Store-native message id (opaque)             |
//! | [`Entry`]         | `File` or `Folder` record in a cluster       |
//! | [`Location`]      | Active path or trashed-from path of a file   |
//! | [`Caption`]       | `name@path@visibility` codec                 |
//! |-------------------|----------------------------------------------|

pub mod caption;
pub mod entry;
pub mod ids;
pub mod path;

pub use caption::{Caption, CaptionError, Visibility, CAPTION_DELIMITER};
pub use entry::{Entry, FileEntry, FolderEntry, Location};
pub use ids::{ClusterId, MessageId, FOLDER_MESSAGE_ID};
pub use path::{PathError, ROOT_PATH, TRASH_PATH};

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
