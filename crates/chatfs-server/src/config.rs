//! Drive configuration.
//!
//! Loaded from a TOML file. The path comes from `--config`, then the
//! `CHATFS_CONFIG` environment variable, then `<config dir>/chatfs/config.toml`
//! if it exists; otherwise built-in defaults are used.
//!
//! ```toml
//! [mirror]
//! path = "~/.local/share/chatfs/mirror.db"   # or ":memory:"
//!
//! [store]
//! backend = "local"                          # or "memory"
//! root = "~/.local/share/chatfs/store"
//!
//! [clusters]
//! shared = "Drive_Layer_Shared"
//! private_prefix = "Drive_Layer_Private_"
//! members = ["ana", "bo"]
//! extra = []
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CHATFS_CONFIG";

/// Mirror path meaning "in-memory database".
pub const IN_MEMORY: &str = ":memory:";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which blob store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One directory per chat under `store.root`.
    #[default]
    Local,
    /// Ephemeral; for demos.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub path: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("mirror.db").display().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub root: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            root: data_dir().join("store").display().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClustersConfig {
    /// The cluster every member shares.
    pub shared: String,
    /// Prefix of each member's private cluster.
    pub private_prefix: String,
    pub members: Vec<String>,
    /// Additional clusters, synced like the others.
    pub extra: Vec<String>,
}

impl Default for ClustersConfig {
    fn default() -> Self {
        Self {
            shared: "Drive_Layer_Shared".to_string(),
            private_prefix: "Drive_Layer_Private_".to_string(),
            members: Vec::new(),
            extra: Vec::new(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub mirror: MirrorConfig,
    pub store: StoreConfig,
    pub clusters: ClustersConfig,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatfs")
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl DriveConfig {
    /// Parse and validate a TOML document.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = expand(&path.to_string_lossy());
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Pick the config file: explicit path, then `CHATFS_CONFIG`, then the
    /// default location if present.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::config_dir()
            .map(|dir| dir.join("chatfs").join("config.toml"))
            .filter(|path| path.exists())
    }

    /// Load from the located file, or fall back to defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match Self::locate(explicit) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::load(&path)
            }
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Every cluster name, in sync order: shared, private, extra.
    pub fn cluster_names(&self) -> Vec<String> {
        let clusters = &self.clusters;
        std::iter::once(clusters.shared.clone())
            .chain(
                clusters
                    .members
                    .iter()
                    .map(|member| format!("{}{}", clusters.private_prefix, member)),
            )
            .chain(clusters.extra.iter().cloned())
            .collect()
    }

    /// Reject empty or duplicate cluster names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let names = self.cluster_names();
        let mut seen = HashSet::new();
        for name in &names {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("empty cluster name".into()));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate cluster name: {name}")));
            }
        }
        if self.clusters.members.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid("empty member name".into()));
        }
        if self.mirror.path.trim().is_empty() {
            return Err(ConfigError::Invalid("mirror.path is empty".into()));
        }
        if self.store.backend == StoreBackend::Local && self.store.root.trim().is_empty() {
            return Err(ConfigError::Invalid("store.root is empty".into()));
        }
        Ok(())
    }

    /// Mirror database path with `~` expanded; `None` for in-memory.
    pub fn mirror_path(&self) -> Option<PathBuf> {
        if self.mirror.path == IN_MEMORY {
            None
        } else {
            Some(expand(&self.mirror.path))
        }
    }

    /// Store root with `~` expanded.
    pub fn store_root(&self) -> PathBuf {
        expand(&self.store.root)
    }
}
