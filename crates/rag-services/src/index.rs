//! In-memory lexical index
//!
//! Built once from a [`KnowledgeBase`]. Scores are cosine similarity over
//! lower-cased term frequencies, so they already lie in [0, 1]. Records
//! sharing no term with the query are not returned.
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use rag_core::{KnowledgeBase, KnowledgeRecord, Metadata, Search, SearchHit, ServiceError};

use crate::text::{cosine, term_frequencies};

struct Entry {
    record: KnowledgeRecord,
    terms: HashMap<String, f32>,
}

pub struct InMemoryIndex {
    entries: Vec<Entry>,
}

impl InMemoryIndex {
    pub async fn build(kb: &dyn KnowledgeBase) -> Result<Self, ServiceError> {
        Ok(Self::from_records(kb.load_all().await?))
    }

    /// Index records in order. A repeated id keeps its first record.
    pub fn from_records(records: Vec<KnowledgeRecord>) -> Self {
        let entries = unique_records(records)
            .into_iter()
            .map(|record| Entry {
                terms: term_frequencies(&record.content),
                record,
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Drop records whose id was already seen, keeping order
pub(crate) fn unique_records(records: Vec<KnowledgeRecord>) -> Vec<KnowledgeRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| {
            let fresh = seen.insert(record.id.clone());
            if !fresh {
                warn!(id = %record.id, "duplicate knowledge record ignored");
            }
            fresh
        })
        .collect()
}

pub(crate) fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    filter.map_or(true, |f| {
        f.iter().all(|(key, wanted)| metadata.get(key) == Some(wanted))
    })
}

#[async_trait]
impl Search for InMemoryIndex {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        let query_terms = term_frequencies(text);
        if query_terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| matches_filter(&e.record.metadata, filter))
            .map(|(i, e)| (i, cosine(&query_terms, &e.terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        // stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        debug!(query = text, hits = scored.len(), "index query");
        Ok(scored
            .into_iter()
            .map(|(i, similarity)| {
                let record = &self.entries[i].record;
                SearchHit {
                    id: record.id.clone(),
                    content: record.content.clone(),
                    metadata: record.metadata.clone(),
                    similarity,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticKnowledgeBase;
    use serde_json::json;

    fn record(id: &str, content: &str, category: &str) -> KnowledgeRecord {
        let mut metadata = Metadata::new();
        metadata.insert("category".into(), json!(category));
        KnowledgeRecord {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }

    fn index() -> InMemoryIndex {
        InMemoryIndex::from_records(vec![
            record("ret-1", "Items can be returned within 30 days of delivery.", "returns"),
            record("ref-1", "Refunds are issued to the original payment method.", "refunds"),
            record("ref-2", "Refunds take 5 business days after the return arrives.", "refunds"),
            record("ship-1", "Standard shipping takes 5 business days.", "shipping"),
        ])
    }

    #[tokio::test]
    async fn test_ranks_by_term_overlap() {
        let hits = index().query("how long do refunds take", 10, None).await.unwrap();

        assert_eq!(hits[0].id, "ref-2");
        assert!(hits.iter().all(|h| h.similarity > 0.0 && h.similarity <= 1.0));
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[tokio::test]
    async fn test_metadata_filter_and_top_k() {
        let mut filter = Metadata::new();
        filter.insert("category".into(), json!("refunds"));

        let hits = index().query("refunds", 1, Some(&filter)).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["category"], "refunds");
    }

    #[tokio::test]
    async fn test_unrelated_or_empty_query_finds_nothing() {
        let idx = index();
        assert!(idx.query("warranty", 5, None).await.unwrap().is_empty());
        assert!(idx.query("how do I", 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let idx = InMemoryIndex::from_records(vec![
            record("b", "gift cards", "misc"),
            record("a", "gift cards", "misc"),
        ]);
        let ids: Vec<String> = idx
            .query("gift cards", 5, None)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_build_skips_duplicate_ids() {
        let kb = StaticKnowledgeBase::new(vec![
            record("x", "first", "misc"),
            record("x", "second", "misc"),
        ]);
        let idx = InMemoryIndex::build(&kb).await.unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.query("first", 1, None).await.unwrap()[0].id, "x");
    }
}
