//! Cluster directory: logical cluster name → store chat id.
//!
//! Built once at startup, strictly in configuration order, then read-only.

use indexmap::IndexMap;

use chatfs_types::ClusterId;

use crate::error::{DriveError, DriveResult};
use crate::store::BlobStore;

/// Resolved cluster names.
#[derive(Debug, Clone, Default)]
pub struct ClusterDirectory {
    clusters: IndexMap<String, ClusterId>,
}

impl ClusterDirectory {
    /// Resolve every name, creating missing chats. Any failure aborts the
    /// build; there is no partial directory.
    #[tracing::instrument(skip(store, names), name = "directory.build")]
    pub async fn build<S, I>(store: &S, names: I) -> DriveResult<Self>
    where
        S: BlobStore + ?Sized,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut clusters = IndexMap::new();
        for name in names {
            let name = name.as_ref();
            if clusters.contains_key(name) {
                continue;
            }
            let id = Self::ensure_cluster(store, name).await?;
            clusters.insert(name.to_string(), id);
        }
        tracing::info!(clusters = clusters.len(), "cluster directory ready");
        Ok(Self { clusters })
    }

    /// Find the chat named `name`, creating it if absent.
    pub async fn ensure_cluster<S>(store: &S, name: &str) -> DriveResult<ClusterId>
    where
        S: BlobStore + ?Sized,
    {
        if let Some(id) = store.find_chat_by_name(name).await? {
            tracing::debug!(cluster = name, %id, "found existing chat");
            return Ok(id);
        }
        let id = store.create_chat(name).await?;
        tracing::info!(cluster = name, %id, "created chat for cluster");
        Ok(id)
    }

    /// Cached id for `name`.
    pub fn cluster_id(&self, name: &str) -> DriveResult<ClusterId> {
        self.clusters
            .get(name)
            .copied()
            .ok_or_else(|| DriveError::not_found(format!("cluster {name}")))
    }

    /// Name for a cached id.
    pub fn name_of(&self, cluster_id: ClusterId) -> Option<&str> {
        self.clusters
            .iter()
            .find(|(_, id)| **id == cluster_id)
            .map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, cluster_id: ClusterId) -> bool {
        self.name_of(cluster_id).is_some()
    }

    /// Names in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ClusterId)> {
        self.clusters.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fault, MemoryBlobStore};

    #[tokio::test]
    async fn test_build_reuses_and_creates() {
        let store = MemoryBlobStore::new();
        let existing = store.create_chat("Drive_Layer_Shared").await.unwrap();

        let dir = ClusterDirectory::build(
            &store,
            ["Drive_Layer_Shared", "Drive_Layer_Private_ana", "Drive_Layer_Shared"],
        )
        .await
        .unwrap();

        assert_eq!(dir.len(), 2);
        assert_eq!(dir.cluster_id("Drive_Layer_Shared").unwrap(), existing);
        let private = dir.cluster_id("Drive_Layer_Private_ana").unwrap();
        assert_eq!(dir.name_of(private), Some("Drive_Layer_Private_ana"));
        assert_eq!(
            dir.names().collect::<Vec<_>>(),
            vec!["Drive_Layer_Shared", "Drive_Layer_Private_ana"]
        );
        assert!(dir.cluster_id("nope").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_build_fails_when_creation_rejected() {
        let store = MemoryBlobStore::new();
        store.inject(Fault::CreateChat);
        let err = ClusterDirectory::build(&store, ["a"]).await.unwrap_err();
        assert!(matches!(err, DriveError::Store(_)));
    }
}
