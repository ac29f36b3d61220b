//! Lexical reranker
use async_trait::async_trait;
use std::collections::HashSet;

use rag_core::{Reranker, ServiceError};

use crate::text::tokenize;

/// Scores each text by the share of distinct query terms it contains.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

impl LexicalReranker {
    pub fn new() -> Self {
        Self
    }

    fn coverage(query_terms: &HashSet<String>, text: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let text_terms: HashSet<String> = tokenize(text).into_iter().collect();
        let covered = query_terms.intersection(&text_terms).count();
        covered as f32 / query_terms.len() as f32
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, ServiceError> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        Ok(texts
            .iter()
            .map(|text| Self::coverage(&query_terms, text))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scores_query_term_coverage_in_input_order() {
        let scores = LexicalReranker::new()
            .score(
                "refund shipping cost",
                &["shipping cost is refunded", "refund shipping cost", "gift cards"],
            )
            .await
            .unwrap();

        assert_eq!(scores.len(), 3);
        assert!((scores[0] - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(scores[1], 1.0);
        assert_eq!(scores[2], 0.0);
    }

    #[tokio::test]
    async fn test_stopword_only_query_scores_zero() {
        let scores = LexicalReranker.score("what is it", &["anything"]).await.unwrap();
        assert_eq!(scores, vec![0.0]);
    }
}
