//! Persistence layer: one SQLite table per container with an FTS5 shadow
//! table and an in-memory approximate nearest-neighbour index, kept in
//! lockstep by the store operations.

pub mod ann;
pub mod sqlite_store;

pub use sqlite_store::{ContainerStore, Store};

use loci_context::ChunkKind;
use serde::Serialize;

/// A single embedded unit as persisted.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Stable identifier derived from the owning path and ordinal.
    pub id: String,
    /// Absolute path of the owning file, or an `annotation:` pseudo-path.
    pub path: String,
    /// Position within the file, starting at 0.
    pub ordinal: i64,
    /// Byte offsets into the extracted body.
    pub offset_start: i64,
    pub offset_end: i64,
    pub text: String,
    pub vector: Vec<f32>,
    pub kind: ChunkKind,
    pub language: Option<String>,
    pub mtime: i64,
}

/// Deterministic fragment identifier: re-upserting the same (path, ordinal)
/// replaces rather than duplicates.
pub fn fragment_id(path: &str, ordinal: i64) -> String {
    let digest = blake3::hash(path.as_bytes());
    format!("{}-{}", &digest.to_hex().as_str()[..16], ordinal)
}

/// Freshness snapshot used by incremental rescans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub mtime: i64,
}

/// A note attached to a path, indexed like a fragment but owned directly by
/// the container.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationRecord {
    pub id: String,
    pub path: String,
    pub note: String,
    pub source: String,
    pub created_at: i64,
}

/// Path-prefix and extension constraints applied inside store queries.
///
/// Filters narrow the candidate pool *before* any top-k window is cut: the
/// FTS query carries them as SQL predicates ahead of its `LIMIT`, and the
/// vector search widens its fetch until k matching candidates (or the whole
/// index) have been seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentFilter<'a> {
    pub path_prefix: Option<&'a str>,
    pub extensions: Option<&'a [String]>,
}

impl<'a> FragmentFilter<'a> {
    pub fn new(path_prefix: Option<&'a str>, extensions: Option<&'a [String]>) -> Self {
        Self {
            path_prefix,
            extensions,
        }
    }

    /// True when the filter constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.path_prefix.is_none() && self.extensions.map_or(true, |e| e.is_empty())
    }

    pub fn matches(&self, path: &str) -> bool {
        if let Some(prefix) = self.path_prefix {
            if !path.starts_with(prefix) {
                return false;
            }
        }
        if let Some(extensions) = self.extensions {
            if !extensions.is_empty() {
                let ext = std::path::Path::new(path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase();
                if !extensions
                    .iter()
                    .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
                {
                    return false;
                }
            }
        }
        true
    }
}

/// One candidate from the vector index.
#[derive(Debug, Clone)]
pub struct DenseHit {
    pub fragment_id: String,
    pub path: String,
    pub ordinal: i64,
    pub text: String,
    /// Cosine similarity in [0, 1].
    pub similarity: f32,
}

/// One candidate from the full-text index.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub fragment_id: String,
    pub path: String,
    pub ordinal: i64,
    pub text: String,
    /// Negated bm25 rank; higher is better.
    pub score: f32,
}
