//! Deterministic provider for tests and offline smoke runs.

use async_trait::async_trait;

use crate::config::ProviderIdentity;
use crate::error::Result;
use crate::provider::{l2_normalize, EmbeddingProvider};

/// Token-hash projection onto the unit sphere.
///
/// Texts sharing tokens land near each other, so relevance ordering is
/// meaningful enough for pipeline tests, and results are stable across runs
/// and platforms. No model files are touched.
pub struct HashEmbedProvider {
    dimension: usize,
}

impl HashEmbedProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let slot = (fnv1a(token.as_bytes()) as usize) % self.dimension;
            vector[slot] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

// FNV-1a; the std hasher is randomly seeded and would break determinism.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashEmbedProvider {
    async fn embed_passages(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(query))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity::local("hash-test", self.dimension)
    }
}
