//! The command surface consumed by external shells (desktop UI, MCP
//! transport, CLI). Every operation is a method on [`Engine`]; errors follow
//! the [`RetrieverError`] taxonomy and progress flows through the
//! [`EventBus`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fastembed::TextRerank;
use loci_embed::{
    load_reranker, safe_rerank, EmbedConfig, EmbeddingProvider, LocalProvider, ProviderIdentity,
    RemoteProvider,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};

use crate::config::{
    load_config, save_config, unpinned_identity, Config, ContainerInfo, DEFAULT_CONTAINER,
};
use crate::error::RetrieverError;
use crate::events::{Event, EventBus};
use crate::retrieval::indexing_engine::{Indexer, JobSummary};
use crate::retrieval::pipeline::{
    dedup_per_path, expand_query, overlay_annotations, retrieval_limit, rrf_fuse,
    score_candidates, truncate_snippet, RERANK_POOL,
};
use crate::retrieval::watcher::{run_dispatch, spawn_watcher, IndexCommand, WatcherHandle};
use crate::storage::{AnnotationRecord, ContainerStore, FragmentFilter, Store};

/// The reranker is the only pipeline step allowed to miss the query deadline;
/// past this budget the search continues with the fused order.
const RERANK_DEADLINE: std::time::Duration = std::time::Duration::from_secs(15);

const DEFAULT_TOP_K: usize = 10;
const MAX_TOP_K: usize = 50;
const DEFAULT_CONTEXT_BYTES: usize = 1500;
const MAX_CONTEXT_BYTES: usize = 10_000;
const MAX_RELATED_TOP_K: usize = 30;

/// A search request from a shell.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    /// Container name; `None` means the active container.
    pub container: Option<String>,
    pub top_k: Option<usize>,
    pub file_extensions: Option<Vec<String>>,
    pub path_prefix: Option<String>,
    pub context_bytes: Option<usize>,
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub snippet: String,
    /// Relevance in [0, 100].
    pub score: f32,
    pub ordinal: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerListItem {
    pub name: String,
    pub description: String,
    pub roots: Vec<PathBuf>,
    pub provider_label: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub container: String,
    pub description: String,
    pub indexed_paths: Vec<PathBuf>,
    pub total_files: usize,
    pub total_chunks: usize,
    pub provider_label: String,
    pub has_index: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangedFile {
    pub path: String,
    pub modified_unix: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedFile {
    pub path: String,
    pub snippet: String,
    /// Cosine similarity mapped to [0, 100].
    pub similarity: f32,
}

struct RerankerSlot {
    model: Option<TextRerank>,
    attempted: bool,
}

/// The core engine: configuration, store, providers, indexer, events.
pub struct Engine {
    data_dir: PathBuf,
    config_path: PathBuf,
    config: Mutex<Config>,
    store: Store,
    indexer: Indexer,
    events: EventBus,
    providers: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
    container_stores: Mutex<HashMap<String, Arc<ContainerStore>>>,
    reranker: Mutex<RerankerSlot>,
}

impl Engine {
    /// Open (or initialize) the engine rooted at `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, RetrieverError> {
        std::fs::create_dir_all(data_dir)?;
        let config_path = data_dir.join("config.json");
        let config = load_config(&config_path);
        let store = Store::open(data_dir).await?;
        let events = EventBus::default();
        let indexer = Indexer::new(events.clone());

        info!(
            "engine ready at {}, active container '{}'",
            data_dir.display(),
            config.active_container
        );
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config_path,
            config: Mutex::new(config),
            store,
            indexer,
            events,
            providers: Mutex::new(HashMap::new()),
            container_stores: Mutex::new(HashMap::new()),
            reranker: Mutex::new(RerankerSlot {
                model: None,
                attempted: false,
            }),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    async fn save_config_locked(&self, config: &Config) -> Result<(), RetrieverError> {
        save_config(&self.config_path, config)?;
        Ok(())
    }

    async fn resolve_container_name(&self, name: Option<&str>) -> String {
        match name {
            Some(name) => name.to_string(),
            None => self.config.lock().await.active_container.clone(),
        }
    }

    /// Install a prebuilt provider under a cache key. Shells and tests use
    /// this to supply deterministic or preloaded providers.
    pub async fn install_provider(&self, key: &str, provider: Arc<dyn EmbeddingProvider>) {
        self.providers
            .lock()
            .await
            .insert(key.to_string(), provider);
    }

    /// Toggle cross-encoder reranking; off means searches keep fused order.
    pub async fn set_reranker_enabled(&self, enabled: bool) -> Result<(), RetrieverError> {
        let mut config = self.config.lock().await;
        config.use_reranker = enabled;
        let snapshot = config.clone();
        drop(config);
        self.save_config_locked(&snapshot).await
    }

    fn provider_key(config: &EmbedConfig) -> String {
        match config {
            EmbedConfig::Local { model } => format!("local:{model}"),
            EmbedConfig::Remote(rc) => format!("remote:{}:{}", rc.endpoint, rc.model),
        }
    }

    async fn provider_for(
        &self,
        embed_config: &EmbedConfig,
    ) -> Result<Arc<dyn EmbeddingProvider>, RetrieverError> {
        let key = Self::provider_key(embed_config);
        if let Some(provider) = self.providers.lock().await.get(&key) {
            return Ok(Arc::clone(provider));
        }

        let provider: Arc<dyn EmbeddingProvider> = match embed_config {
            EmbedConfig::Local { model } => {
                let models_dir = self.data_dir.join("models");
                match LocalProvider::load(model, models_dir).await {
                    Ok(provider) => {
                        self.events.emit(Event::ModelLoaded);
                        Arc::new(provider)
                    }
                    Err(e) => {
                        self.events.emit(Event::ModelLoadError {
                            reason: e.to_string(),
                        });
                        return Err(e.into());
                    }
                }
            }
            EmbedConfig::Remote(rc) => Arc::new(RemoteProvider::new(rc.clone())),
        };

        self.providers
            .lock()
            .await
            .insert(key, Arc::clone(&provider));
        Ok(provider)
    }

    /// Resolve a container to its open store and provider, pinning the
    /// identity dimension on first contact and rejecting mismatches after.
    async fn resolve(
        &self,
        name: &str,
    ) -> Result<(Arc<ContainerStore>, Arc<dyn EmbeddingProvider>), RetrieverError> {
        let (embed_config, mut identity, roots) = {
            let config = self.config.lock().await;
            let info = config
                .containers
                .get(name)
                .ok_or_else(|| RetrieverError::NotFound(format!("container '{name}'")))?;
            (
                config.provider_for(info),
                info.identity.clone(),
                info.roots.clone(),
            )
        };

        let provider = self.provider_for(&embed_config).await?;

        if identity.dimension == 0 {
            identity.dimension = provider.dimension();
            let mut config = self.config.lock().await;
            if let Some(info) = config.containers.get_mut(name) {
                info.identity.dimension = identity.dimension;
            }
            let snapshot = config.clone();
            drop(config);
            self.save_config_locked(&snapshot).await?;
        } else if identity.dimension != provider.dimension() {
            return Err(RetrieverError::ProviderMismatch {
                expected: identity.dimension,
                actual: provider.dimension(),
            });
        }

        {
            let stores = self.container_stores.lock().await;
            if let Some(store) = stores.get(name) {
                if store.dimension() == identity.dimension {
                    return Ok((Arc::clone(store), provider));
                }
            }
        }

        let container_store = self
            .store
            .open_container(name, &identity, &roots)
            .await?;
        let container_store = Arc::new(container_store);
        self.container_stores
            .lock()
            .await
            .insert(name.to_string(), Arc::clone(&container_store));
        Ok((container_store, provider))
    }

    async fn forget_container_store(&self, name: &str) {
        self.container_stores.lock().await.remove(name);
    }

    // ----- search -------------------------------------------------------

    pub async fn search(
        &self,
        request: SearchRequest,
    ) -> Result<Vec<SearchResult>, RetrieverError> {
        if request.query.trim().is_empty() {
            return Err(RetrieverError::BadInput("query is empty".into()));
        }
        let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 || top_k > MAX_TOP_K {
            return Err(RetrieverError::BadInput(format!(
                "top_k must be in 1..={MAX_TOP_K}"
            )));
        }
        let context_bytes = request.context_bytes.unwrap_or(DEFAULT_CONTEXT_BYTES);
        if context_bytes > MAX_CONTEXT_BYTES {
            return Err(RetrieverError::BadInput(format!(
                "context_bytes must be at most {MAX_CONTEXT_BYTES}"
            )));
        }
        if let Some(min_score) = request.min_score {
            if !(0.0..=100.0).contains(&min_score) {
                return Err(RetrieverError::BadInput(
                    "min_score must be in [0, 100]".into(),
                ));
            }
        }

        let name = self.resolve_container_name(request.container.as_deref()).await;
        let (store, provider) = self.resolve(&name).await?;

        let forms = expand_query(&request.query);
        let query_vector = provider.embed_query(&forms.dense).await?;

        let filter = FragmentFilter::new(
            request.path_prefix.as_deref(),
            request.file_extensions.as_deref(),
        );
        let limit = retrieval_limit(top_k);

        let dense = store.ann_search(&query_vector, limit, &filter).await?;

        let lexical = match &forms.keyword {
            Some(expr) => store.fts_search(expr, limit, &filter).await?,
            None => Vec::new(),
        };

        let fused = rrf_fuse(&dense, &lexical);

        let annotations: Vec<_> = store
            .search_annotations(&query_vector, top_k)
            .await?
            .into_iter()
            .filter(|(note, _)| filter.matches(&note.path))
            .collect();
        let candidates = overlay_annotations(fused, &annotations);

        let pool: Vec<_> = candidates.into_iter().take(RERANK_POOL).collect();

        let use_reranker = self.config.lock().await.use_reranker;
        let rerank_scores = if use_reranker && !pool.is_empty() {
            self.rerank(&request.query, pool.iter().map(|c| c.text.clone()).collect())
                .await
        } else {
            None
        };

        let scored = score_candidates(pool, rerank_scores.as_deref());
        let deduped = dedup_per_path(scored);

        let min_score = request.min_score.unwrap_or(0.0);
        Ok(deduped
            .into_iter()
            .filter(|c| c.score >= min_score)
            .take(top_k)
            .map(|c| SearchResult {
                path: c.path,
                snippet: truncate_snippet(&c.text, context_bytes),
                score: c.score,
                ordinal: c.ordinal,
            })
            .collect())
    }

    /// Lazily load the cross-encoder and score the pool. Any failure keeps
    /// the fused order — degraded mode is not an error.
    async fn rerank(&self, query: &str, passages: Vec<String>) -> Option<Vec<f32>> {
        let mut slot = self.reranker.lock().await;
        if slot.model.is_none() && !slot.attempted {
            slot.attempted = true;
            let models_dir = self.data_dir.join("models");
            match tokio::task::spawn_blocking(move || load_reranker(models_dir)).await {
                Ok(Ok(model)) => slot.model = Some(model),
                Ok(Err(e)) => warn!("reranker unavailable: {e}"),
                Err(e) => warn!("reranker load task failed: {e}"),
            }
        }
        let model = slot.model.take()?;
        match tokio::time::timeout(
            RERANK_DEADLINE,
            safe_rerank(model, query.to_string(), passages),
        )
        .await
        {
            Ok((model_back, scores)) => {
                slot.model = model_back;
                scores
            }
            Err(_) => {
                // The abandoned blocking task drops the model when it finishes;
                // later searches run degraded until a reload is requested.
                warn!("reranker missed the {RERANK_DEADLINE:?} deadline, keeping fused order");
                slot.attempted = false;
                None
            }
        }
    }

    // ----- indexing -----------------------------------------------------

    /// Add a directory to the active container's roots and index it.
    pub async fn index_folder(&self, dir: &Path) -> Result<JobSummary, RetrieverError> {
        if !dir.is_dir() {
            return Err(RetrieverError::NotFound(format!(
                "directory {}",
                dir.display()
            )));
        }

        let name = self.resolve_container_name(None).await;
        let options = {
            let mut config = self.config.lock().await;
            let info = config
                .containers
                .get_mut(&name)
                .ok_or_else(|| RetrieverError::NotFound(format!("container '{name}'")))?;
            if !info.roots.iter().any(|r| r == dir) {
                info.roots.push(dir.to_path_buf());
            }
            let snapshot = config.clone();
            let options = config.indexing.clone();
            drop(config);
            self.save_config_locked(&snapshot).await?;
            options
        };

        let (store, provider) = self.resolve(&name).await?;
        let summary = self
            .indexer
            .index_root(&name, &store, provider.as_ref(), &options, dir, None)
            .await?;

        self.events.emit(Event::IndexingComplete {
            message: format!("{} files indexed", summary.files_indexed),
        });
        Ok(summary)
    }

    /// Incremental rescan of every root of the container.
    pub async fn reindex_delta(
        &self,
        container: Option<&str>,
    ) -> Result<JobSummary, RetrieverError> {
        let name = self.resolve_container_name(container).await;
        let (roots, options) = {
            let config = self.config.lock().await;
            let info = config
                .containers
                .get(&name)
                .ok_or_else(|| RetrieverError::NotFound(format!("container '{name}'")))?;
            (info.roots.clone(), config.indexing.clone())
        };

        let (store, provider) = self.resolve(&name).await?;
        let summary = self
            .indexer
            .reindex_delta(&name, &store, provider.as_ref(), &options, &roots, None)
            .await?;

        self.events.emit(Event::IndexingComplete {
            message: format!(
                "{} files reindexed, {} removed",
                summary.files_indexed, summary.files_deleted
            ),
        });
        Ok(summary)
    }

    /// Clear the container's table and rebuild it from every root.
    pub async fn reindex_all(&self, container: Option<&str>) -> Result<JobSummary, RetrieverError> {
        let name = self.resolve_container_name(container).await;
        let (roots, options) = {
            let config = self.config.lock().await;
            let info = config
                .containers
                .get(&name)
                .ok_or_else(|| RetrieverError::NotFound(format!("container '{name}'")))?;
            (info.roots.clone(), config.indexing.clone())
        };
        if roots.is_empty() {
            return Err(RetrieverError::BadInput(format!(
                "container '{name}' has no indexed roots"
            )));
        }

        self.forget_container_store(&name).await;
        self.store.drop_container(&name).await?;

        let (store, provider) = self.resolve(&name).await?;
        let mut total = JobSummary::default();
        for root in &roots {
            let summary = self
                .indexer
                .index_root(&name, &store, provider.as_ref(), &options, root, None)
                .await?;
            total.files_indexed += summary.files_indexed;
            total.files_skipped += summary.files_skipped;
            total.fragments_written += summary.fragments_written;
        }

        self.events.emit(Event::IndexingComplete {
            message: format!(
                "{} files reindexed from {} roots",
                total.files_indexed,
                roots.len()
            ),
        });
        Ok(total)
    }

    /// Drop everything indexed for the container, keeping its registration.
    pub async fn reset_index(&self, container: Option<&str>) -> Result<(), RetrieverError> {
        let name = self.resolve_container_name(container).await;
        if !self.config.lock().await.containers.contains_key(&name) {
            return Err(RetrieverError::NotFound(format!("container '{name}'")));
        }
        self.forget_container_store(&name).await;
        self.store.drop_container(&name).await?;
        Ok(())
    }

    // ----- file access --------------------------------------------------

    /// Read a file that lies under an indexed root of some container,
    /// optionally sliced to 1-indexed inclusive line bounds.
    pub async fn read_file(
        &self,
        path: &Path,
        start_line: Option<usize>,
        end_line: Option<usize>,
    ) -> Result<String, RetrieverError> {
        if !self.path_is_indexed(path).await {
            return Err(RetrieverError::BadInput(
                "path is not within any indexed root".into(),
            ));
        }
        if !path.is_file() {
            return Err(RetrieverError::NotFound(format!("file {}", path.display())));
        }
        if let (Some(start), Some(end)) = (start_line, end_line) {
            if start > end {
                return Err(RetrieverError::BadInput(
                    "start_line is after end_line".into(),
                ));
            }
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| RetrieverError::StoreFailure(format!("read failed: {e}")))?;
        let start = start_line.unwrap_or(1).max(1);
        let end = end_line.unwrap_or(usize::MAX);

        Ok(content
            .lines()
            .enumerate()
            .filter(|(i, _)| {
                let line = i + 1;
                line >= start && line <= end
            })
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Containment check with symlink-safe canonicalization.
    async fn path_is_indexed(&self, path: &Path) -> bool {
        let Ok(canonical) = std::fs::canonicalize(path) else {
            return false;
        };
        let config = self.config.lock().await;
        config.containers.values().any(|info| {
            info.roots.iter().any(|root| {
                std::fs::canonicalize(root)
                    .map(|root| canonical.starts_with(&root))
                    .unwrap_or(false)
            })
        })
    }

    pub async fn list_files(
        &self,
        container: Option<&str>,
        path_prefix: Option<&str>,
        extensions: Option<&[String]>,
    ) -> Result<Vec<FileEntry>, RetrieverError> {
        let name = self.resolve_container_name(container).await;
        let (store, _) = self.resolve(&name).await?;
        let paths = store
            .list_paths(&FragmentFilter::new(path_prefix, extensions))
            .await?;
        Ok(paths
            .into_iter()
            .map(|path| {
                let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                FileEntry { path, size_bytes }
            })
            .collect())
    }

    pub async fn index_status(
        &self,
        container: Option<&str>,
    ) -> Result<IndexStatus, RetrieverError> {
        let name = self.resolve_container_name(container).await;
        let (description, roots, provider_label) = {
            let config = self.config.lock().await;
            let info = config
                .containers
                .get(&name)
                .ok_or_else(|| RetrieverError::NotFound(format!("container '{name}'")))?;
            (
                info.description.clone(),
                info.roots.clone(),
                info.identity.label(),
            )
        };

        if !self.store.container_exists(&name).await? {
            return Ok(IndexStatus {
                container: name,
                description,
                indexed_paths: roots,
                total_files: 0,
                total_chunks: 0,
                provider_label,
                has_index: false,
            });
        }

        let (store, _) = self.resolve(&name).await?;
        Ok(IndexStatus {
            container: name,
            description,
            indexed_paths: roots,
            total_files: store.count_files().await?,
            total_chunks: store.count_fragments().await?,
            provider_label,
            has_index: true,
        })
    }

    /// Files changed within a duration window like `30m`, `2h`, `1d`, `7d`.
    pub async fn diff(
        &self,
        since: &str,
        container: Option<&str>,
        with_preview: bool,
    ) -> Result<Vec<ChangedFile>, RetrieverError> {
        let seconds = parse_duration(since).ok_or_else(|| {
            RetrieverError::BadInput(format!(
                "invalid duration '{since}', use a format like 30m, 2h, 1d"
            ))
        })?;
        let cutoff = chrono::Utc::now().timestamp() - seconds as i64;

        let name = self.resolve_container_name(container).await;
        let (store, _) = self.resolve(&name).await?;
        let changed = store.changed_since(cutoff).await?;

        Ok(changed
            .into_iter()
            .map(|record| {
                let path = PathBuf::from(&record.path);
                let mut entry = ChangedFile {
                    path: record.path,
                    modified_unix: record.mtime,
                    preview: None,
                    total_lines: None,
                    deleted: !path.is_file(),
                };
                if with_preview && !entry.deleted {
                    if let Ok(content) = std::fs::read_to_string(&path) {
                        entry.preview =
                            Some(content.lines().take(50).collect::<Vec<_>>().join("\n"));
                        entry.total_lines = Some(content.lines().count());
                    }
                }
                entry
            })
            .collect())
    }

    /// Paths nearest to `path` in embedding space, by mean fragment vector.
    pub async fn related(
        &self,
        path: &Path,
        container: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<Vec<RelatedFile>, RetrieverError> {
        let top_k = top_k.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 || top_k > MAX_RELATED_TOP_K {
            return Err(RetrieverError::BadInput(format!(
                "top_k must be in 1..={MAX_RELATED_TOP_K}"
            )));
        }

        let name = self.resolve_container_name(container).await;
        let (store, _) = self.resolve(&name).await?;

        let path_str = path.to_string_lossy().to_string();
        let fragments = store.fragments_for_path(&path_str).await?;
        if fragments.is_empty() {
            return Err(RetrieverError::NotFound(format!(
                "{path_str} is not in the index"
            )));
        }

        let dimension = store.dimension();
        let mut mean = vec![0.0f32; dimension];
        for fragment in &fragments {
            for (slot, value) in mean.iter_mut().zip(&fragment.vector) {
                *slot += value;
            }
        }
        for value in &mut mean {
            *value /= fragments.len() as f32;
        }

        let hits = store
            .ann_search(&mean, (top_k + 1) * 3, &FragmentFilter::default())
            .await?;
        let mut best: HashMap<String, RelatedFile> = HashMap::new();
        for hit in hits {
            if hit.path == path_str {
                continue;
            }
            let similarity = hit.similarity.clamp(0.0, 1.0) * 100.0;
            match best.get(&hit.path) {
                Some(existing) if existing.similarity >= similarity => {}
                _ => {
                    best.insert(
                        hit.path.clone(),
                        RelatedFile {
                            path: hit.path,
                            snippet: hit.text,
                            similarity,
                        },
                    );
                }
            }
        }

        let mut related: Vec<RelatedFile> = best.into_values().collect();
        related.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.path.cmp(&b.path))
        });
        related.truncate(top_k);
        Ok(related)
    }

    // ----- annotations --------------------------------------------------

    pub async fn add_annotation(
        &self,
        path: &Path,
        note: &str,
        source: &str,
    ) -> Result<AnnotationRecord, RetrieverError> {
        if note.trim().is_empty() {
            return Err(RetrieverError::BadInput("note is empty".into()));
        }
        if !matches!(source, "user" | "agent") {
            return Err(RetrieverError::BadInput(format!(
                "annotation source must be 'user' or 'agent', got '{source}'"
            )));
        }

        let name = self.resolve_container_name(None).await;
        let (store, provider) = self.resolve(&name).await?;

        let vector = provider
            .embed_passages(vec![note.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrieverError::Transport("empty embedding result".into()))?;

        let now = chrono::Utc::now();
        let record = AnnotationRecord {
            id: format!("ann_{}", now.timestamp_nanos_opt().unwrap_or_default()),
            path: path.to_string_lossy().to_string(),
            note: note.to_string(),
            source: source.to_string(),
            created_at: now.timestamp(),
        };
        store.add_annotation(&record, &vector).await?;
        Ok(record)
    }

    pub async fn delete_annotation(&self, id: &str) -> Result<(), RetrieverError> {
        let name = self.resolve_container_name(None).await;
        let (store, _) = self.resolve(&name).await?;
        store.delete_annotation(id).await
    }

    pub async fn get_annotations(
        &self,
        path: Option<&Path>,
    ) -> Result<Vec<AnnotationRecord>, RetrieverError> {
        let name = self.resolve_container_name(None).await;
        let (store, _) = self.resolve(&name).await?;
        let path = path.map(|p| p.to_string_lossy().to_string());
        store.list_annotations(path.as_deref()).await
    }

    // ----- containers ---------------------------------------------------

    pub async fn list_containers(&self) -> Vec<ContainerListItem> {
        let config = self.config.lock().await;
        config
            .containers
            .iter()
            .map(|(name, info)| ContainerListItem {
                name: name.clone(),
                description: info.description.clone(),
                roots: info.roots.clone(),
                provider_label: info.identity.label(),
                active: *name == config.active_container,
            })
            .collect()
    }

    /// Create a container, snapshotting the current global provider unless
    /// one is given. The snapshot is immutable thereafter.
    pub async fn create_container(
        &self,
        name: &str,
        description: &str,
        provider: Option<EmbedConfig>,
    ) -> Result<(), RetrieverError> {
        if name.trim().is_empty() {
            return Err(RetrieverError::BadInput("container name is empty".into()));
        }
        let mut config = self.config.lock().await;
        if config.containers.contains_key(name) {
            return Err(RetrieverError::BadInput(format!(
                "container '{name}' already exists"
            )));
        }

        let identity: ProviderIdentity = match &provider {
            Some(explicit) => unpinned_identity(explicit),
            None => unpinned_identity(&config.embedding),
        };
        config.containers.insert(
            name.to_string(),
            ContainerInfo::new(description.to_string(), provider, identity),
        );
        let snapshot = config.clone();
        drop(config);
        self.save_config_locked(&snapshot).await
    }

    /// Delete a container and drop its backing table atomically with its
    /// registration. The reserved container cannot be deleted.
    pub async fn delete_container(&self, name: &str) -> Result<(), RetrieverError> {
        if name == DEFAULT_CONTAINER {
            return Err(RetrieverError::BadInput(
                "the Default container cannot be deleted".into(),
            ));
        }
        {
            let mut config = self.config.lock().await;
            if config.containers.remove(name).is_none() {
                return Err(RetrieverError::NotFound(format!("container '{name}'")));
            }
            if config.active_container == name {
                config.active_container = DEFAULT_CONTAINER.to_string();
            }
            let snapshot = config.clone();
            drop(config);
            self.save_config_locked(&snapshot).await?;
        }

        self.forget_container_store(name).await;
        self.store.drop_container(name).await?;
        Ok(())
    }

    pub async fn set_active_container(&self, name: &str) -> Result<(), RetrieverError> {
        let mut config = self.config.lock().await;
        if !config.containers.contains_key(name) {
            return Err(RetrieverError::NotFound(format!("container '{name}'")));
        }
        config.active_container = name.to_string();
        let snapshot = config.clone();
        drop(config);
        self.save_config_locked(&snapshot).await
    }

    // ----- watching -----------------------------------------------------

    /// Watch every root of every container, dispatching debounced changes to
    /// the indexer. The returned handle must be kept alive.
    pub async fn start_watching(
        self: &Arc<Self>,
    ) -> Result<Option<WatcherHandle>, RetrieverError> {
        let roots: Vec<PathBuf> = {
            let config = self.config.lock().await;
            config
                .containers
                .values()
                .flat_map(|info| info.roots.iter().cloned())
                .collect()
        };

        let (tx, rx) = mpsc::channel::<IndexCommand>(256);
        let Some(handle) = spawn_watcher(&roots, tx) else {
            return Ok(None);
        };

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            run_dispatch(rx, move |command| {
                let engine = Arc::clone(&engine);
                async move { engine.apply_watch_command(command).await }
            })
            .await;
        });

        Ok(Some(handle))
    }

    /// Apply one watcher command to every container whose roots own the path.
    async fn apply_watch_command(&self, command: IndexCommand) -> Result<(), RetrieverError> {
        let path = match &command {
            IndexCommand::Upsert(path) | IndexCommand::Remove(path) => path.clone(),
        };

        let owners: Vec<(String, crate::config::IndexingOptions)> = {
            let config = self.config.lock().await;
            config
                .containers
                .iter()
                .filter(|(_, info)| info.roots.iter().any(|root| path.starts_with(root)))
                .map(|(name, _)| (name.clone(), config.indexing.clone()))
                .collect()
        };

        for (name, options) in owners {
            let (store, provider) = self.resolve(&name).await?;
            match &command {
                IndexCommand::Upsert(path) => {
                    self.indexer
                        .index_single(&name, &store, provider.as_ref(), &options, path)
                        .await?;
                }
                IndexCommand::Remove(path) => {
                    store
                        .delete_by_path(&path.to_string_lossy())
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Parse windows like `30m`, `2h`, `1d`, `7d` into seconds.
pub fn parse_duration(s: &str) -> Option<u64> {
    let s = s.trim().to_lowercase();
    let (number, multiplier) = if let Some(n) = s.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86_400)
    } else if let Some(n) = s.strip_suffix('w') {
        (n, 604_800)
    } else {
        return None;
    };
    number.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("30m"), Some(1800));
        assert_eq!(parse_duration("2h"), Some(7200));
        assert_eq!(parse_duration("1d"), Some(86_400));
        assert_eq!(parse_duration("7d"), Some(604_800));
        assert_eq!(parse_duration(" 45s "), Some(45));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5"), None);
    }
}
