//! The provider contract and the local fastembed implementation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::{debug, info};

use crate::config::ProviderIdentity;
use crate::error::{EmbedError, Result};

/// E5-family models are asymmetric; passages and queries carry different
/// prefixes.
pub const PASSAGE_PREFIX: &str = "passage: ";
pub const QUERY_PREFIX: &str = "query: ";

/// Texts handed to the model per inference call.
pub const EMBED_BATCH_SIZE: usize = 32;

/// Maps a batch of texts to unit-norm vectors of a fixed dimension,
/// preserving input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_passages(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;

    fn identity(&self) -> ProviderIdentity;
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

type CachedModel = (Arc<Mutex<TextEmbedding>>, usize);

/// Loaded models, keyed by model name, kept for the process lifetime.
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, CachedModel>>> = OnceLock::new();

fn model_cache() -> &'static Mutex<HashMap<String, CachedModel>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn builtin_model(name: &str) -> EmbeddingModel {
    match name {
        "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
        "multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
        "multilingual-e5-base" => EmbeddingModel::MultilingualE5Base,
        _ => EmbeddingModel::MultilingualE5Base,
    }
}

/// Local ONNX embedding via fastembed.
///
/// The underlying model handle is shared process-wide and its `embed` is
/// single-writer: concurrent callers serialize on the lock, and inference runs
/// on the blocking pool.
pub struct LocalProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
}

impl LocalProvider {
    /// Load (or fetch from the process cache) the named model.
    ///
    /// First load downloads weights into `cache_dir` and probes the output
    /// dimension with a throwaway embedding.
    pub async fn load(model_name: &str, cache_dir: PathBuf) -> Result<Self> {
        let cached = {
            let cache = model_cache().lock().unwrap();
            cache
                .get(model_name)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };
        if let Some((model, dimension)) = cached {
            debug!("reusing cached embedding model {model_name}");
            return Ok(Self {
                model,
                model_name: model_name.to_string(),
                dimension,
            });
        }

        info!("loading embedding model {model_name}");
        let selected = builtin_model(model_name);
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let options = InitOptions::new(selected)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(false);
                let mut model = TextEmbedding::try_new(options)
                    .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;
                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;
                let dimension = probe
                    .first()
                    .map(|v| v.len())
                    .ok_or_else(|| EmbedError::ModelLoad("empty probe embedding".into()))?;
                Ok((model, dimension))
            })
            .await??;

        info!("embedding model {model_name} ready, dimension {dimension}");
        let model = Arc::new(Mutex::new(model));
        {
            let mut cache = model_cache().lock().unwrap();
            cache.insert(model_name.to_string(), (Arc::clone(&model), dimension));
        }

        Ok(Self {
            model,
            model_name: model_name.to_string(),
            dimension,
        })
    }

    async fn embed_raw(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut output = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let batch = batch.to_vec();
            let model = Arc::clone(&self.model);
            let mut vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = model.lock().unwrap();
                guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::Transport(e.to_string()))
            })
            .await??;
            for vector in &mut vectors {
                l2_normalize(vector);
            }
            output.extend(vectors);
        }
        Ok(output)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed_passages(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prefixed = texts
            .into_iter()
            .map(|t| format!("{PASSAGE_PREFIX}{t}"))
            .collect();
        self.embed_raw(prefixed).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_raw(vec![format!("{QUERY_PREFIX}{query}")]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Transport("empty embedding result".into()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity::local(self.model_name.clone(), self.dimension)
    }
}
