//! The pure parts of the retrieval pipeline: query expansion, reciprocal rank
//! fusion, annotation overlay, score normalization, and per-file
//! deduplication. Everything here is deterministic for fixed inputs; ties
//! break by fragment ordinal, then path.

use crate::storage::{AnnotationRecord, DenseHit, LexicalHit};

/// Rank smoothing constant in reciprocal rank fusion.
pub const RRF_K: f32 = 60.0;

/// Candidates handed to the cross-encoder, at most.
pub const RERANK_POOL: usize = 50;

/// Results scored below this (of 100) are dropped after a reranker pass.
pub const RERANK_SCORE_FLOOR: f32 = 1.0;

/// Candidate pool size for the dense and lexical legs.
pub fn retrieval_limit(top_k: usize) -> usize {
    (top_k * 4).max(50)
}

/// Small multilingual stop-word set applied during keyword expansion.
const STOP_WORDS: &[&str] = &[
    // English
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "can", "to", "of",
    "in", "for", "on", "with", "at", "by", "from", "as", "into", "about", "and", "but", "or",
    "not", "it", "its", "this", "that", "these", "those", "what", "which", "who", "how", "when",
    "where", "why",
    // German
    "der", "die", "das", "ein", "eine", "und", "oder", "nicht", "mit", "von", "zu", "im", "ist",
    // French
    "le", "la", "les", "un", "une", "des", "et", "ou", "ne", "pas", "dans", "pour", "sur", "est",
    // Spanish
    "el", "los", "las", "uno", "una", "y", "o", "no", "en", "por", "para", "es", "del",
];

/// The two query forms the pipeline works with.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryForms {
    /// The raw query, embedded as-is.
    pub dense: String,
    /// OR-combined quoted keywords for FTS, or `None` when stripping left
    /// nothing (FTS is skipped then).
    pub keyword: Option<String>,
}

/// Lowercase, strip stop words, and build the FTS keyword form.
pub fn expand_query(raw: &str) -> QueryForms {
    let lowered = raw.to_lowercase();
    let keywords: Vec<String> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| !STOP_WORDS.contains(t))
        .map(|t| t.to_string())
        .collect();

    let keyword = if keywords.is_empty() {
        None
    } else {
        Some(
            keywords
                .iter()
                .map(|k| format!("\"{k}\""))
                .collect::<Vec<_>>()
                .join(" OR "),
        )
    };

    QueryForms {
        dense: raw.to_string(),
        keyword,
    }
}

/// One fused candidate flowing toward the final result list.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub fragment_id: String,
    /// Deduplication key: the owning path, or `annotation:<id>` so notes
    /// never displace file results.
    pub dedup_key: String,
    pub path: String,
    pub ordinal: i64,
    pub text: String,
    pub score: f32,
}

fn candidate_order(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.ordinal.cmp(&b.ordinal))
        .then(a.path.cmp(&b.path))
}

/// Reciprocal rank fusion of the dense and lexical candidate lists.
///
/// Each list contributes `1 / (RRF_K + rank)` with 1-based ranks; fragments
/// absent from a list get no contribution from it.
pub fn rrf_fuse(dense: &[DenseHit], lexical: &[LexicalHit]) -> Vec<Candidate> {
    let mut by_id: std::collections::HashMap<String, Candidate> = std::collections::HashMap::new();

    for (rank, hit) in dense.iter().enumerate() {
        let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
        by_id
            .entry(hit.fragment_id.clone())
            .and_modify(|c| c.score += contribution)
            .or_insert_with(|| Candidate {
                fragment_id: hit.fragment_id.clone(),
                dedup_key: hit.path.clone(),
                path: hit.path.clone(),
                ordinal: hit.ordinal,
                text: hit.text.clone(),
                score: contribution,
            });
    }

    for (rank, hit) in lexical.iter().enumerate() {
        let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
        by_id
            .entry(hit.fragment_id.clone())
            .and_modify(|c| c.score += contribution)
            .or_insert_with(|| Candidate {
                fragment_id: hit.fragment_id.clone(),
                dedup_key: hit.path.clone(),
                path: hit.path.clone(),
                ordinal: hit.ordinal,
                text: hit.text.clone(),
                score: contribution,
            });
    }

    let mut fused: Vec<Candidate> = by_id.into_values().collect();
    fused.sort_by(candidate_order);
    fused
}

/// Merge annotation hits into the fused list.
///
/// Annotations contribute like a third ranked list and dedup under their own
/// pseudo-path; when an identifier somehow appears twice the maximum score
/// wins.
pub fn overlay_annotations(
    mut candidates: Vec<Candidate>,
    annotations: &[(AnnotationRecord, f32)],
) -> Vec<Candidate> {
    for (rank, (note, _similarity)) in annotations.iter().enumerate() {
        let score = 1.0 / (RRF_K + (rank + 1) as f32);
        if let Some(existing) = candidates.iter_mut().find(|c| c.fragment_id == note.id) {
            existing.score = existing.score.max(score);
            continue;
        }
        candidates.push(Candidate {
            fragment_id: note.id.clone(),
            dedup_key: format!("annotation:{}", note.id),
            path: note.path.clone(),
            ordinal: 0,
            text: format!("[annotation] {}", note.note),
            score,
        });
    }
    candidates.sort_by(candidate_order);
    candidates
}

/// Map scores into [0, 100].
///
/// With reranker logits: sigmoid × 100, then the floor cut. Without: min-max
/// over the candidate set. Returns candidates sorted best-first.
pub fn score_candidates(
    mut candidates: Vec<Candidate>,
    rerank_scores: Option<&[f32]>,
) -> Vec<Candidate> {
    match rerank_scores {
        Some(scores) => {
            for (candidate, &logit) in candidates.iter_mut().zip(scores) {
                let sigmoid = 1.0 / (1.0 + (-logit).exp());
                candidate.score = sigmoid * 100.0;
            }
            candidates.sort_by(candidate_order);
            candidates.retain(|c| c.score >= RERANK_SCORE_FLOOR);
        }
        None => {
            let min = candidates.iter().map(|c| c.score).fold(f32::INFINITY, f32::min);
            let max = candidates
                .iter()
                .map(|c| c.score)
                .fold(f32::NEG_INFINITY, f32::max);
            for candidate in candidates.iter_mut() {
                candidate.score = if (max - min).abs() < f32::EPSILON {
                    100.0
                } else {
                    (candidate.score - min) / (max - min) * 100.0
                };
            }
            candidates.sort_by(candidate_order);
        }
    }
    candidates
}

/// Keep only the best-scoring candidate per dedup key.
///
/// Input must already be sorted best-first; relative order is preserved.
pub fn dedup_per_path(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.dedup_key.clone()))
        .collect()
}

/// Cut a snippet to at most `max_bytes` on a char boundary.
pub fn truncate_snippet(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(id: &str, path: &str, ordinal: i64) -> DenseHit {
        DenseHit {
            fragment_id: id.into(),
            path: path.into(),
            ordinal,
            text: format!("text of {id}"),
            similarity: 0.9,
        }
    }

    fn lexical(id: &str, path: &str, ordinal: i64) -> LexicalHit {
        LexicalHit {
            fragment_id: id.into(),
            path: path.into(),
            ordinal,
            text: format!("text of {id}"),
            score: 4.2,
        }
    }

    #[test]
    fn expansion_strips_stop_words() {
        let forms = expand_query("How to implement search");
        assert_eq!(forms.dense, "How to implement search");
        assert_eq!(forms.keyword.as_deref(), Some("\"implement\" OR \"search\""));
    }

    #[test]
    fn expansion_of_pure_stop_words_skips_fts() {
        let forms = expand_query("the of and");
        assert!(forms.keyword.is_none());
    }

    #[test]
    fn expansion_splits_on_punctuation() {
        let forms = expand_query("server-cost overruns!");
        assert_eq!(
            forms.keyword.as_deref(),
            Some("\"server\" OR \"cost\" OR \"overruns\"")
        );
    }

    #[test]
    fn fusion_prefers_fragments_in_both_lists() {
        let dense_hits = vec![dense("a", "a.txt", 0), dense("b", "b.txt", 0)];
        let lexical_hits = vec![lexical("b", "b.txt", 0), lexical("c", "c.txt", 0)];

        let fused = rrf_fuse(&dense_hits, &lexical_hits);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].fragment_id, "b");
        let b_score = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].score - b_score).abs() < 1e-6);
    }

    #[test]
    fn fusion_missing_list_contributes_zero() {
        let fused = rrf_fuse(&[dense("a", "a.txt", 0)], &[]);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn fusion_ties_break_by_ordinal_then_path() {
        let dense_hits = vec![dense("a2", "z.txt", 2)];
        let lexical_hits = vec![lexical("b0", "a.txt", 2)];
        // identical scores: same rank in each single list
        let fused = rrf_fuse(&dense_hits, &lexical_hits);
        assert_eq!(fused[0].path, "a.txt");
        assert_eq!(fused[1].path, "z.txt");
    }

    #[test]
    fn annotations_never_displace_files() {
        let fused = rrf_fuse(&[dense("a", "a.txt", 0)], &[]);
        let note = AnnotationRecord {
            id: "ann_1".into(),
            path: "a.txt".into(),
            note: "check this file".into(),
            source: "user".into(),
            created_at: 0,
        };
        let merged = overlay_annotations(fused, &[(note, 0.99)]);
        assert_eq!(merged.len(), 2);

        let deduped = dedup_per_path(merged);
        // both survive: the note dedups under its own pseudo-path
        assert_eq!(deduped.len(), 2);
        assert!(deduped.iter().any(|c| c.dedup_key == "annotation:ann_1"));
        assert!(deduped.iter().any(|c| c.dedup_key == "a.txt"));
    }

    #[test]
    fn rrf_normalization_is_min_max() {
        let candidates = vec![
            Candidate {
                fragment_id: "a".into(),
                dedup_key: "a.txt".into(),
                path: "a.txt".into(),
                ordinal: 0,
                text: String::new(),
                score: 0.032,
            },
            Candidate {
                fragment_id: "b".into(),
                dedup_key: "b.txt".into(),
                path: "b.txt".into(),
                ordinal: 0,
                text: String::new(),
                score: 0.016,
            },
        ];
        let scored = score_candidates(candidates, None);
        assert!((scored[0].score - 100.0).abs() < 1e-3);
        assert!((scored[1].score - 0.0).abs() < 1e-3);
    }

    #[test]
    fn single_candidate_normalizes_to_100() {
        let candidates = vec![Candidate {
            fragment_id: "a".into(),
            dedup_key: "a.txt".into(),
            path: "a.txt".into(),
            ordinal: 0,
            text: String::new(),
            score: 0.0123,
        }];
        let scored = score_candidates(candidates, None);
        assert_eq!(scored[0].score, 100.0);
    }

    #[test]
    fn rerank_scores_pass_through_sigmoid_and_floor() {
        let candidates = vec![
            Candidate {
                fragment_id: "good".into(),
                dedup_key: "good.rs".into(),
                path: "good.rs".into(),
                ordinal: 0,
                text: String::new(),
                score: 0.03,
            },
            Candidate {
                fragment_id: "bad".into(),
                dedup_key: "bad.rs".into(),
                path: "bad.rs".into(),
                ordinal: 0,
                text: String::new(),
                score: 0.02,
            },
        ];
        let scored = score_candidates(candidates, Some(&[5.0, -8.0]));
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].fragment_id, "good");
        assert!(scored[0].score > 90.0 && scored[0].score <= 100.0);
    }

    #[test]
    fn dedup_keeps_best_per_path() {
        let candidates = vec![
            Candidate {
                fragment_id: "a-3".into(),
                dedup_key: "a.rs".into(),
                path: "a.rs".into(),
                ordinal: 3,
                text: String::new(),
                score: 90.0,
            },
            Candidate {
                fragment_id: "b-0".into(),
                dedup_key: "b.rs".into(),
                path: "b.rs".into(),
                ordinal: 0,
                text: String::new(),
                score: 80.0,
            },
            Candidate {
                fragment_id: "a-7".into(),
                dedup_key: "a.rs".into(),
                path: "a.rs".into(),
                ordinal: 7,
                text: String::new(),
                score: 70.0,
            },
        ];
        let deduped = dedup_per_path(candidates);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].fragment_id, "a-3");
        assert_eq!(deduped[1].fragment_id, "b-0");
    }

    #[test]
    fn snippet_truncation_is_char_safe() {
        let text = "é".repeat(100);
        let cut = truncate_snippet(&text, 11);
        assert!(cut.len() <= 11);
        assert!(text.starts_with(&cut));
    }

    #[test]
    fn retrieval_limit_floors_at_50() {
        assert_eq!(retrieval_limit(5), 50);
        assert_eq!(retrieval_limit(20), 80);
    }
}
