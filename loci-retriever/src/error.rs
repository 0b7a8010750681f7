use loci_embed::EmbedError;
use loci_extract::ExtractError;

/// Error taxonomy surfaced at the command boundary.
#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("container '{0}' is already indexing")]
    Busy(String),

    #[error("provider mismatch: index expects dimension {expected}, provider produces {actual}; rebuild the container")]
    ProviderMismatch { expected: usize, actual: usize },

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("store failure: {0}")]
    StoreFailure(String),

    #[error("bad input: {0}")]
    BadInput(String),
}

impl From<EmbedError> for RetrieverError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::ModelLoad(msg) => Self::ModelLoad(msg),
            EmbedError::Transport(msg) => Self::Transport(msg),
            EmbedError::ProviderMismatch { expected, actual } => {
                Self::ProviderMismatch { expected, actual }
            }
            EmbedError::Timeout(d) => Self::Timeout(format!("provider call after {d:?}")),
            EmbedError::Join { source } => Self::Transport(source.to_string()),
        }
    }
}

impl From<ExtractError> for RetrieverError {
    fn from(e: ExtractError) -> Self {
        Self::Extraction(e.to_string())
    }
}

impl From<sqlx::Error> for RetrieverError {
    fn from(e: sqlx::Error) -> Self {
        Self::StoreFailure(e.to_string())
    }
}

impl From<std::io::Error> for RetrieverError {
    fn from(e: std::io::Error) -> Self {
        Self::StoreFailure(e.to_string())
    }
}
