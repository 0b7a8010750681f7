use serde::{Deserialize, Serialize};

/// Where embeddings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    Remote,
}

/// The (kind, model, dimension) triple a container is bound to at creation.
///
/// Immutable for the lifetime of the container; changing providers means
/// creating a new container or explicitly rebuilding this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub kind: ProviderKind,
    pub model: String,
    pub dimension: usize,
}

impl ProviderIdentity {
    pub fn local(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            kind: ProviderKind::Local,
            model: model.into(),
            dimension,
        }
    }

    pub fn remote(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            kind: ProviderKind::Remote,
            model: model.into(),
            dimension,
        }
    }

    /// Human-readable label shown in container listings.
    pub fn label(&self) -> String {
        match self.kind {
            ProviderKind::Local => format!("{} (local)", self.model),
            ProviderKind::Remote => {
                if self.model.is_empty() {
                    "remote".to_string()
                } else {
                    self.model.clone()
                }
            }
        }
    }
}

/// Connection settings for a remote embedding endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    /// Declared output dimension; responses of any other width fail with
    /// `ProviderMismatch`.
    pub dimension: usize,
}

/// Provider selection as stored in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmbedConfig {
    Local { model: String },
    Remote(RemoteConfig),
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self::Local {
            model: "multilingual-e5-base".to_string(),
        }
    }
}

impl EmbedConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Local { .. } => ProviderKind::Local,
            Self::Remote(_) => ProviderKind::Remote,
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            Self::Local { model } => model,
            Self::Remote(rc) => &rc.model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_labels() {
        let local = ProviderIdentity::local("multilingual-e5-base", 768);
        assert_eq!(local.label(), "multilingual-e5-base (local)");

        let remote = ProviderIdentity::remote("text-embedding-3-small", 1536);
        assert_eq!(remote.label(), "text-embedding-3-small");

        let anonymous = ProviderIdentity::remote("", 1024);
        assert_eq!(anonymous.label(), "remote");
    }

    #[test]
    fn embed_config_serde_round_trip() {
        let config = EmbedConfig::Remote(RemoteConfig {
            endpoint: "https://embed.example/v1/embeddings".into(),
            api_key: Some("sk-test".into()),
            model: "m".into(),
            dimension: 1024,
        });
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"type\":\"remote\""));
        let restored: EmbedConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.kind(), ProviderKind::Remote);
        assert_eq!(restored.model_name(), "m");
    }

    #[test]
    fn default_is_local() {
        assert_eq!(EmbedConfig::default().kind(), ProviderKind::Local);
    }
}
