use std::path::{Path, PathBuf};

/// Extraction failures.
///
/// Every variant is per-file and non-fatal: the indexer logs it, counts the
/// file as skipped, and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("skipped {path}: {reason}")]
    Skipped { path: PathBuf, reason: String },
}

impl ExtractError {
    pub fn skipped(path: &Path, reason: impl Into<String>) -> Self {
        Self::Skipped {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Skipped { path, .. } => path,
        }
    }
}
