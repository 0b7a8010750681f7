//! Cross-encoder reranking.
//!
//! The reranker is optional and expected to dominate query latency when it
//! runs, so it executes on the blocking pool, isolated from panics: any
//! failure hands the caller back the un-reranked order instead of an error.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use tracing::warn;

use crate::error::{EmbedError, Result};

/// Passages are truncated to this many bytes before cross-encoding.
pub const RERANK_SNIPPET_BYTES: usize = 300;

/// Load the cross-encoder. Weights download into `cache_dir` on first use.
pub fn load_reranker(cache_dir: PathBuf) -> Result<TextRerank> {
    let options = RerankInitOptions::new(RerankerModel::JINARerankerV2BaseMultiligual)
        .with_cache_dir(cache_dir)
        .with_show_download_progress(false);
    TextRerank::try_new(options).map_err(|e| EmbedError::ModelLoad(e.to_string()))
}

fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Score (query, passage) pairs; the result is aligned to `passages`.
fn rerank_scores(reranker: &mut TextRerank, query: &str, passages: &[String]) -> Result<Vec<f32>> {
    let truncated: Vec<String> = passages
        .iter()
        .map(|p| truncate_to_boundary(p, RERANK_SNIPPET_BYTES).to_string())
        .collect();
    let refs: Vec<&str> = truncated.iter().map(|s| s.as_str()).collect();

    let results = reranker
        .rerank(query, &refs, false, None)
        .map_err(|e| EmbedError::Transport(e.to_string()))?;

    let mut scores = vec![0.0f32; passages.len()];
    for result in results {
        if let Some(slot) = scores.get_mut(result.index) {
            *slot = result.score;
        }
    }
    Ok(scores)
}

/// Run the reranker on the blocking pool, swallowing errors and panics.
///
/// Takes ownership of the model handle and returns it so the caller can park
/// it again; a panic poisons the handle and `None` comes back in its place.
/// The second element is the aligned score vector, or `None` when the caller
/// should keep the fused order.
pub async fn safe_rerank(
    reranker: TextRerank,
    query: String,
    passages: Vec<String>,
) -> (Option<TextRerank>, Option<Vec<f32>>) {
    if passages.is_empty() {
        return (Some(reranker), None);
    }

    let joined = tokio::task::spawn_blocking(move || {
        let mut reranker = reranker;
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            rerank_scores(&mut reranker, &query, &passages)
        }));
        match outcome {
            Ok(Ok(scores)) => (Some(reranker), Some(scores)),
            Ok(Err(e)) => {
                warn!("reranker failed, keeping fused order: {e}");
                (Some(reranker), None)
            }
            Err(_) => {
                warn!("reranker panicked, dropping model handle");
                (None, None)
            }
        }
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) => {
            warn!("rerank task failed to join: {e}");
            (None, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "aé".repeat(200);
        let cut = truncate_to_boundary(&s, RERANK_SNIPPET_BYTES);
        assert!(cut.len() <= RERANK_SNIPPET_BYTES);
        assert!(s.is_char_boundary(cut.len()));
    }

    #[test]
    fn short_strings_pass_through() {
        assert_eq!(truncate_to_boundary("hello", 300), "hello");
    }
}
