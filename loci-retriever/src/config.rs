//! Persistent configuration: the container registry, indexing options, and
//! the global provider selection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use loci_embed::{EmbedConfig, ProviderIdentity};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The reserved container that always exists and cannot be deleted.
pub const DEFAULT_CONTAINER: &str = "Default";

fn default_true() -> bool {
    true
}

/// Knobs applied during extraction and chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingOptions {
    #[serde(default)]
    pub extra_extensions: Vec<String>,
    #[serde(default)]
    pub excluded_extensions: Vec<String>,
    /// Global override for the per-kind chunk size.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
    #[serde(default = "default_true")]
    pub use_git_history: bool,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            extra_extensions: Vec::new(),
            excluded_extensions: Vec::new(),
            chunk_size: None,
            chunk_overlap: None,
            use_git_history: true,
        }
    }
}

/// One named, isolated index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    /// Explicit provider for this container; `None` follows the global
    /// provider selection.
    #[serde(default)]
    pub provider: Option<EmbedConfig>,
    /// Snapshot of the provider identity the container was created under.
    /// A dimension of 0 means "not yet pinned" — it is fixed the first time
    /// fragments are written.
    pub identity: ProviderIdentity,
    #[serde(default)]
    pub created_at: i64,
}

impl ContainerInfo {
    pub fn new(description: String, provider: Option<EmbedConfig>, identity: ProviderIdentity) -> Self {
        Self {
            description,
            roots: Vec::new(),
            provider,
            identity,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Global provider; containers without an explicit provider follow it.
    #[serde(default)]
    pub embedding: EmbedConfig,
    #[serde(default = "default_true")]
    pub use_reranker: bool,
    #[serde(default)]
    pub indexing: IndexingOptions,
    pub containers: BTreeMap<String, ContainerInfo>,
    pub active_container: String,
}

impl Default for Config {
    fn default() -> Self {
        let embedding = EmbedConfig::default();
        let identity = unpinned_identity(&embedding);
        let mut containers = BTreeMap::new();
        containers.insert(
            DEFAULT_CONTAINER.to_string(),
            ContainerInfo::new(String::new(), None, identity),
        );
        Self {
            embedding,
            use_reranker: true,
            indexing: IndexingOptions::default(),
            containers,
            active_container: DEFAULT_CONTAINER.to_string(),
        }
    }
}

/// Identity snapshot for a provider whose dimension is not yet known.
pub fn unpinned_identity(config: &EmbedConfig) -> ProviderIdentity {
    match config {
        EmbedConfig::Local { model } => ProviderIdentity::local(model.clone(), 0),
        EmbedConfig::Remote(rc) => ProviderIdentity::remote(rc.model.clone(), rc.dimension),
    }
}

impl Config {
    /// Provider configuration a container resolves to.
    pub fn provider_for(&self, container: &ContainerInfo) -> EmbedConfig {
        container
            .provider
            .clone()
            .unwrap_or_else(|| self.embedding.clone())
    }

    /// Make sure the reserved container exists and the active name is valid.
    fn normalize(mut self) -> Self {
        self.containers
            .entry(DEFAULT_CONTAINER.to_string())
            .or_insert_with(|| {
                ContainerInfo::new(String::new(), None, unpinned_identity(&self.embedding))
            });
        if !self.containers.contains_key(&self.active_container) {
            self.active_container = DEFAULT_CONTAINER.to_string();
        }
        self
    }
}

/// Load configuration, falling back to defaults on a missing or malformed
/// file. A fresh default file is written in both cases.
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        info!("no config at {}, writing defaults", path.display());
        let config = Config::default();
        let _ = save_config(path, &config);
        return config;
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    match serde_json::from_str::<Config>(&content) {
        Ok(config) => config.normalize(),
        Err(e) => {
            warn!("config parse failed ({e}), falling back to defaults");
            let config = Config::default();
            let _ = save_config(path, &config);
            config
        }
    }
}

pub fn save_config(path: &Path, config: &Config) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, content)
}
