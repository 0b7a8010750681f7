use std::time::Duration;

pub type Result<T> = std::result::Result<T, EmbedError>;

/// Provider-level failures.
///
/// `ModelLoad`, `Transport`, and `Timeout` are retryable at the indexer level
/// with a bounded attempt count; `ProviderMismatch` is not — it means the
/// container and the provider disagree on vector dimensions and the index
/// needs a rebuild.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider mismatch: expected dimension {expected}, got {actual}")]
    ProviderMismatch { expected: usize, actual: usize },

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("blocking task failed: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl EmbedError {
    /// Whether the indexer may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ModelLoad(_) | Self::Transport(_) | Self::Timeout(_) | Self::Join { .. }
        )
    }
}
