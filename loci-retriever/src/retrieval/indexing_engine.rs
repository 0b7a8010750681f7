//! The indexing engine: walk, extract, chunk, embed, commit.
//!
//! Enumeration and extraction fan out across a rayon pool inside a blocking
//! task; embedding and store writes happen on the async side, one file at a
//! time, so every file's fragments land atomically. At most one job runs per
//! container; a second request gets [`RetrieverError::Busy`]. Cancellation is
//! observed between file commits — the file being embedded always completes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use loci_context::{ChunkKind, TextChunker};
use loci_embed::EmbeddingProvider;
use loci_extract::{extract, BlockKind, ExtractOptions};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::IndexingOptions;
use crate::error::RetrieverError;
use crate::events::EventBus;
use crate::storage::{fragment_id, ContainerStore, Fragment};

/// Name of the per-root ignore file honored next to `.gitignore`.
pub const LOCAL_IGNORE_FILE: &str = ".lociignore";

/// Backoff schedule for retryable provider failures, per batch.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(2),
    Duration::from_secs(8),
];

/// Outcome counts for one indexing job.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct JobSummary {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub fragments_written: usize,
}

/// Added / modified / deleted sets from an incremental rescan.
#[derive(Debug, Default)]
pub struct DeltaSets {
    pub added: Vec<(PathBuf, i64)>,
    pub modified: Vec<(PathBuf, i64)>,
    pub deleted: Vec<String>,
}

impl DeltaSets {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// A file extracted and chunked, awaiting embedding.
struct PendingFile {
    path: String,
    mtime: i64,
    fragments: Vec<PendingFragment>,
}

struct PendingFragment {
    ordinal: i64,
    offset_start: i64,
    offset_end: i64,
    text: String,
    kind: ChunkKind,
    language: Option<String>,
}

/// Serializes indexing per container and drives the pipeline.
pub struct Indexer {
    events: EventBus,
    active: Arc<Mutex<HashSet<String>>>,
}

/// Releases the per-container job slot on drop.
struct JobGuard {
    container: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.active.lock().unwrap().remove(&self.container);
    }
}

/// Seconds-since-epoch modification time, 0 when unavailable.
pub fn file_mtime(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Indexer {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn acquire(&self, container: &str) -> Result<JobGuard, RetrieverError> {
        let mut active = self.active.lock().unwrap();
        if !active.insert(container.to_string()) {
            return Err(RetrieverError::Busy(container.to_string()));
        }
        Ok(JobGuard {
            container: container.to_string(),
            active: Arc::clone(&self.active),
        })
    }

    /// Walk one root and index the files whose mtime advanced (or that are
    /// new). Deletions are left to [`reindex_delta`](Self::reindex_delta).
    pub async fn index_root(
        &self,
        container: &str,
        store: &ContainerStore,
        provider: &dyn EmbeddingProvider,
        options: &IndexingOptions,
        root: &Path,
        cancel: Option<&AtomicBool>,
    ) -> Result<JobSummary, RetrieverError> {
        let _guard = self.acquire(container)?;
        info!("indexing {} into '{container}'", root.display());

        let known: HashMap<String, i64> = store
            .scan_file_records()
            .await?
            .into_iter()
            .map(|r| (r.path, r.mtime))
            .collect();

        let candidates: Vec<(PathBuf, i64)> = walk_root(root)
            .into_iter()
            .filter(|(path, mtime)| {
                known.get(&path.to_string_lossy().to_string()) != Some(mtime)
            })
            .collect();

        self.process_files(store, provider, options, candidates, cancel)
            .await
    }

    /// Rescan all roots and compute the added / modified / deleted sets
    /// against the stored file records.
    pub async fn scan_delta(
        &self,
        store: &ContainerStore,
        roots: &[PathBuf],
    ) -> Result<DeltaSets, RetrieverError> {
        let known: HashMap<String, i64> = store
            .scan_file_records()
            .await?
            .into_iter()
            .map(|r| (r.path, r.mtime))
            .collect();

        let mut seen: HashMap<String, (PathBuf, i64)> = HashMap::new();
        for root in roots {
            for (path, mtime) in walk_root(root) {
                seen.insert(path.to_string_lossy().to_string(), (path, mtime));
            }
        }

        let mut delta = DeltaSets::default();
        for (key, (path, mtime)) in &seen {
            match known.get(key) {
                None => delta.added.push((path.clone(), *mtime)),
                Some(&stored) if stored != *mtime => delta.modified.push((path.clone(), *mtime)),
                Some(_) => {}
            }
        }
        for key in known.keys() {
            if !seen.contains_key(key) {
                delta.deleted.push(key.clone());
            }
        }
        delta.added.sort();
        delta.modified.sort();
        delta.deleted.sort();
        Ok(delta)
    }

    /// Apply an incremental rescan: remove deleted files, then re-extract and
    /// re-embed added and modified ones.
    pub async fn reindex_delta(
        &self,
        container: &str,
        store: &ContainerStore,
        provider: &dyn EmbeddingProvider,
        options: &IndexingOptions,
        roots: &[PathBuf],
        cancel: Option<&AtomicBool>,
    ) -> Result<JobSummary, RetrieverError> {
        let _guard = self.acquire(container)?;

        let delta = self.scan_delta(store, roots).await?;
        debug!(
            "delta for '{container}': +{} ~{} -{}",
            delta.added.len(),
            delta.modified.len(),
            delta.deleted.len()
        );

        let mut summary = JobSummary::default();
        for path in &delta.deleted {
            store.delete_by_path(path).await?;
            summary.files_deleted += 1;
        }

        let mut work = delta.added;
        work.extend(delta.modified);
        let processed = self
            .process_files(store, provider, options, work, cancel)
            .await?;

        summary.files_indexed = processed.files_indexed;
        summary.files_skipped = processed.files_skipped;
        summary.fragments_written = processed.fragments_written;
        Ok(summary)
    }

    /// Index one file if its mtime advanced. Returns whether anything was
    /// written. Used by the watcher.
    pub async fn index_single(
        &self,
        container: &str,
        store: &ContainerStore,
        provider: &dyn EmbeddingProvider,
        options: &IndexingOptions,
        path: &Path,
    ) -> Result<bool, RetrieverError> {
        let _guard = self.acquire(container)?;

        if !path.is_file() {
            return Ok(false);
        }
        let path_str = path.to_string_lossy().to_string();
        let mtime = file_mtime(path);
        if store.file_mtime(&path_str).await? == Some(mtime) {
            return Ok(false);
        }

        let summary = self
            .process_files(store, provider, options, vec![(path.to_path_buf(), mtime)], None)
            .await?;
        Ok(summary.files_indexed > 0)
    }

    /// Extract and chunk on the blocking pool, then embed and commit one file
    /// at a time.
    async fn process_files(
        &self,
        store: &ContainerStore,
        provider: &dyn EmbeddingProvider,
        options: &IndexingOptions,
        files: Vec<(PathBuf, i64)>,
        cancel: Option<&AtomicBool>,
    ) -> Result<JobSummary, RetrieverError> {
        let mut summary = JobSummary::default();
        let total = files.len();
        if total == 0 {
            return Ok(summary);
        }
        self.events.progress(0, total, "scanning files");

        let extract_options = ExtractOptions {
            extra_extensions: options.extra_extensions.clone(),
            excluded_extensions: options.excluded_extensions.clone(),
            git_history: options.use_git_history,
        };
        let chunk_size = options.chunk_size;
        let chunk_overlap = options.chunk_overlap;

        let (pending, skipped) = tokio::task::spawn_blocking(move || {
            let results: Vec<Result<PendingFile, ()>> = files
                .par_iter()
                .map(|(path, mtime)| {
                    extract_and_chunk(path, *mtime, &extract_options, chunk_size, chunk_overlap)
                        .ok_or(())
                })
                .collect();
            let mut pending = Vec::new();
            let mut skipped = 0usize;
            for result in results {
                match result {
                    Ok(file) => pending.push(file),
                    Err(()) => skipped += 1,
                }
            }
            // Deterministic commit order regardless of rayon scheduling.
            pending.sort_by(|a, b| a.path.cmp(&b.path));
            (pending, skipped)
        })
        .await
        .map_err(|e| RetrieverError::StoreFailure(e.to_string()))?;

        summary.files_skipped = skipped;

        for (done, file) in pending.into_iter().enumerate() {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                info!("indexing cancelled after {done} files");
                break;
            }

            let texts: Vec<String> = file.fragments.iter().map(|f| f.text.clone()).collect();
            let vectors = embed_with_retry(provider, texts).await?;

            let fragments: Vec<Fragment> = file
                .fragments
                .into_iter()
                .zip(vectors)
                .map(|(pending, vector)| Fragment {
                    id: fragment_id(&file.path, pending.ordinal),
                    path: file.path.clone(),
                    ordinal: pending.ordinal,
                    offset_start: pending.offset_start,
                    offset_end: pending.offset_end,
                    text: pending.text,
                    vector,
                    kind: pending.kind,
                    language: pending.language,
                    mtime: file.mtime,
                })
                .collect();

            store.replace_file_fragments(&file.path, &fragments).await?;
            summary.files_indexed += 1;
            summary.fragments_written += fragments.len();
            self.events.progress(done + 1, total, file.path.clone());
        }

        Ok(summary)
    }
}

/// Embed one batch, retrying transient provider failures with backoff.
async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>, RetrieverError> {
    let mut attempt = 0usize;
    loop {
        match provider.embed_passages(texts.clone()).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_retryable() && attempt < RETRY_DELAYS.len() => {
                warn!("embedding attempt {} failed, retrying: {e}", attempt + 1);
                tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Candidate files under `root`, honoring `.gitignore` and the local ignore
/// file.
pub fn walk_root(root: &Path) -> Vec<(PathBuf, i64)> {
    ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .add_custom_ignore_filename(LOCAL_IGNORE_FILE)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| {
            let path = entry.into_path();
            let mtime = file_mtime(&path);
            (path, mtime)
        })
        .collect()
}

/// Extract and chunk one file. `None` means skipped (logged).
fn extract_and_chunk(
    path: &Path,
    mtime: i64,
    options: &ExtractOptions,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> Option<PendingFile> {
    let body = match extract(path, options) {
        Ok(body) => body,
        Err(e) => {
            debug!("{e}");
            return None;
        }
    };

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let header = format!("File: {file_name}\n");
    let language = body.language.clone();
    let ext = language.clone().unwrap_or_default();

    let mut chunker = TextChunker::new();
    if let Some(size) = chunk_size {
        chunker = chunker.with_max_bytes(size);
    }
    if let Some(overlap) = chunk_overlap {
        chunker = chunker.with_overlap_bytes(overlap);
    }

    let mut fragments = Vec::new();
    let mut ordinal = 0i64;
    for chunk in chunker.chunk(&body.text, &ext) {
        fragments.push(PendingFragment {
            ordinal,
            offset_start: chunk.start as i64,
            offset_end: chunk.end as i64,
            text: format!("{header}{}", chunk.text),
            kind: chunk.kind,
            language: language.clone(),
        });
        ordinal += 1;
    }
    for block in &body.blocks {
        let kind = match block.kind {
            BlockKind::Ocr => ChunkKind::Ocr,
            BlockKind::Gitlog => ChunkKind::Gitlog,
        };
        fragments.push(PendingFragment {
            ordinal,
            offset_start: 0,
            offset_end: block.text.len() as i64,
            text: format!("{header}{}", block.text),
            kind,
            language: language.clone(),
        });
        ordinal += 1;
    }

    if fragments.is_empty() {
        return None;
    }
    Some(PendingFile {
        path: path.to_string_lossy().to_string(),
        mtime,
        fragments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_honors_ignore_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("skip.log"), "noise").unwrap();
        std::fs::write(dir.path().join(LOCAL_IGNORE_FILE), "*.log\n").unwrap();

        let files = walk_root(dir.path());
        let names: Vec<String> = files
            .iter()
            .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        assert!(names.contains(&"keep.rs".to_string()));
        assert!(!names.contains(&"skip.log".to_string()));
    }

    #[test]
    fn extract_and_chunk_appends_blocks_after_body() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.md");
        std::fs::write(&file, "# Title\n\nbody text here\n").unwrap();

        let pending = extract_and_chunk(
            &file,
            42,
            &ExtractOptions::default(),
            None,
            None,
        )
        .unwrap();
        assert!(!pending.fragments.is_empty());
        assert_eq!(pending.fragments[0].ordinal, 0);
        assert!(pending.fragments[0].text.starts_with("File: doc.md\n"));
        for (i, fragment) in pending.fragments.iter().enumerate() {
            assert_eq!(fragment.ordinal, i as i64);
        }
    }

    #[test]
    fn unindexable_files_come_back_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("binary.exe");
        std::fs::write(&file, [1u8, 2, 3]).unwrap();
        assert!(extract_and_chunk(&file, 0, &ExtractOptions::default(), None, None).is_none());
    }
}
