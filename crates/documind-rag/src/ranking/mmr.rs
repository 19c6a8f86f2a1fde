//! Maximal marginal relevance selection

use std::collections::HashSet;

use crate::retrieval::{analyze, cosine_similarity};
use crate::types::Chunk;

/// Jaccard overlap of two term sets
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// Pairwise redundancy between chunks in `[0, 1]`.
///
/// Uses the stored embeddings when both chunks carry one of the same
/// dimension, otherwise term overlap of the chunk text.
pub struct Redundancy<'a> {
    chunks: &'a [&'a Chunk],
    terms: Vec<HashSet<String>>,
}

impl<'a> Redundancy<'a> {
    pub fn new(chunks: &'a [&'a Chunk]) -> Self {
        let terms = chunks
            .iter()
            .map(|c| analyze(&c.text).into_iter().collect())
            .collect();
        Self { chunks, terms }
    }

    pub fn between(&self, i: usize, j: usize) -> f32 {
        match (&self.chunks[i].embedding, &self.chunks[j].embedding) {
            (Some(a), Some(b)) if a.len() == b.len() => cosine_similarity(a, b).clamp(0.0, 1.0),
            _ => jaccard_similarity(&self.terms[i], &self.terms[j]),
        }
    }
}

/// Pick `k` indices from candidates ordered by descending relevance.
///
/// The first candidate is always kept. Each later pick maximizes
/// `relevance - lambda * max_similarity_to_picked`; ties go to the earlier
/// candidate. `relevance` is expected in `[0, 1]`.
pub fn mmr_select<F>(relevance: &[f32], k: usize, lambda: f32, similarity: F) -> Vec<usize>
where
    F: Fn(usize, usize) -> f32,
{
    let k = k.min(relevance.len());
    if k == 0 {
        return Vec::new();
    }
    if lambda <= 0.0 {
        return (0..k).collect();
    }

    let mut selected = vec![0];
    let mut remaining: Vec<usize> = (1..relevance.len()).collect();
    // Highest similarity of each candidate to anything selected so far
    let mut max_sim: Vec<f32> = (0..relevance.len()).map(|i| similarity(i, 0)).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &i) in remaining.iter().enumerate() {
            let score = relevance[i] - lambda * max_sim[i];
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        let picked = remaining.remove(best_pos);
        selected.push(picked);
        for &i in &remaining {
            max_sim[i] = max_sim[i].max(similarity(i, picked));
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CharSpan, SourceContext};
    use uuid::Uuid;

    fn chunk(text: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            sequence_index: 0,
            text: text.to_string(),
            token_count: 0,
            char_span: CharSpan { start: 0, end: text.len() },
            embedding,
            source_context: SourceContext::default(),
        }
    }

    #[test]
    fn test_zero_lambda_keeps_relevance_order() {
        let picked = mmr_select(&[1.0, 0.9, 0.1], 2, 0.0, |_, _| 1.0);
        assert_eq!(picked, vec![0, 1]);
    }

    #[test]
    fn test_near_duplicate_is_demoted() {
        // 0 and 1 are duplicates, 2 is unrelated
        let sim = |a: usize, b: usize| {
            if a == b || (a.min(b) == 0 && a.max(b) == 1) {
                1.0
            } else {
                0.0
            }
        };
        let picked = mmr_select(&[1.0, 0.9, 0.0], 3, 1.0, sim);
        assert_eq!(picked, vec![0, 2, 1]);
    }

    #[test]
    fn test_k_larger_than_input() {
        assert_eq!(mmr_select(&[1.0, 0.5], 5, 0.3, |_, _| 0.0), vec![0, 1]);
        assert!(mmr_select(&[], 5, 0.3, |_, _| 0.0).is_empty());
    }

    #[test]
    fn test_redundancy_prefers_embeddings() {
        let a = chunk("alpha beta", Some(vec![1.0, 0.0]));
        let b = chunk("alpha beta", Some(vec![0.0, 1.0]));
        let c = chunk("alpha gamma", None);
        let chunks = [&a, &b, &c];
        let r = Redundancy::new(&chunks);
        // identical text, orthogonal vectors
        assert!(r.between(0, 1).abs() < 1e-6);
        // falls back to term overlap: {alpha} / {alpha, beta, gamma}
        assert!((r.between(0, 2) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_jaccard() {
        let a: HashSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["y", "z"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard_similarity(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(jaccard_similarity(&HashSet::new(), &HashSet::new()), 0.0);
    }
}
