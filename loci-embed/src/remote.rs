//! Remote HTTP embedding provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ProviderIdentity, RemoteConfig};
use crate::error::{EmbedError, Result};
use crate::provider::{l2_normalize, EmbeddingProvider};

/// Texts per request; remote endpoints commonly cap request size.
const REMOTE_BATCH_SIZE: usize = 64;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embeddings from a configured HTTP endpoint with bearer auth.
///
/// The declared dimension is authoritative: any response vector of a
/// different width fails the whole call with `ProviderMismatch`.
pub struct RemoteProvider {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl RemoteProvider {
    pub fn new(config: RemoteConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn post_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: batch,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbedError::Timeout(REQUEST_TIMEOUT)
            } else {
                EmbedError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Transport(format!(
                "endpoint returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Transport(format!("malformed response: {e}")))?;

        let mut vectors = Vec::with_capacity(parsed.data.len());
        for item in parsed.data {
            if item.embedding.len() != self.config.dimension {
                return Err(EmbedError::ProviderMismatch {
                    expected: self.config.dimension,
                    actual: item.embedding.len(),
                });
            }
            let mut vector = item.embedding;
            l2_normalize(&mut vector);
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    async fn embed_passages(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "remote embedding {} texts via {}",
            texts.len(),
            self.config.endpoint
        );
        let mut output = Vec::with_capacity(texts.len());
        for batch in texts.chunks(REMOTE_BATCH_SIZE) {
            output.extend(self.post_batch(batch).await?);
        }
        Ok(output)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_passages(vec![query.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Transport("empty embedding result".into()))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity::remote(self.config.model.clone(), self.config.dimension)
    }
}
