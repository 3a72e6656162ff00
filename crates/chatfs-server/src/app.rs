//! Drive startup from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};

use chatfs_kernel::{BlobStore, Drive, LocalBlobStore, MemoryBlobStore, MirrorDb};

use crate::config::{DriveConfig, StoreBackend};

/// Build the configured blob store.
pub async fn open_store(config: &DriveConfig) -> Result<Arc<dyn BlobStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory blob store; nothing will persist");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
        StoreBackend::Local => {
            let root = config.store_root();
            let store = LocalBlobStore::open(&root)
                .await
                .with_context(|| format!("failed to open blob store at {}", root.display()))?;
            Ok(Arc::new(store))
        }
    }
}

/// Open the mirror database, creating its parent directory.
pub fn open_mirror(config: &DriveConfig) -> Result<MirrorDb> {
    match config.mirror_path() {
        None => Ok(MirrorDb::in_memory()?),
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            MirrorDb::open(&path)
                .with_context(|| format!("failed to open mirror at {}", path.display()))
        }
    }
}

/// Store, mirror, directory, full sync: the startup sequence.
pub async fn open_drive(config: &DriveConfig) -> Result<Drive> {
    let store = open_store(config).await?;
    let mirror = Arc::new(open_mirror(config)?);
    let drive = Drive::start(store, mirror, config.cluster_names())
        .await
        .context("failed to build the cluster directory")?;
    Ok(drive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_drive_local_backend_persists() {
        let dir = tempfile::tempdir().unwrap();
        let text = format!(
            "[mirror]\npath = \"{}\"\n[store]\nroot = \"{}\"\n[clusters]\nmembers = [\"ana\"]\n",
            dir.path().join("db/mirror.db").display(),
            dir.path().join("store").display()
        );
        let config = DriveConfig::parse(&text).unwrap();

        let drive = open_drive(&config).await.unwrap();
        assert_eq!(drive.directory().len(), 2);
        let shared = drive.cluster_id("Drive_Layer_Shared").unwrap();
        drive.create_folder(shared, "/docs").unwrap();
        drop(drive);

        let reopened = open_drive(&config).await.unwrap();
        assert_eq!(reopened.cluster_id("Drive_Layer_Shared").unwrap(), shared);
        assert_eq!(reopened.list_folders(shared).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_drive_memory_backend() {
        let config = DriveConfig::parse(
            "[mirror]\npath = \":memory:\"\n[store]\nbackend = \"memory\"\n",
        )
        .unwrap();
        let drive = open_drive(&config).await.unwrap();
        assert!(drive.startup_report().is_complete());
    }
}
