//! Sample knowledge base → index → reranker
use std::path::PathBuf;

use rag_core::{KnowledgeBase, Metadata, Reranker, Search};
use rag_services::{InMemoryIndex, JsonDirKnowledgeBase, LexicalReranker};
use serde_json::json;

fn sample_kb() -> JsonDirKnowledgeBase {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data/knowledge_base");
    JsonDirKnowledgeBase::new(dir)
}

#[tokio::test]
async fn test_sample_kb_loads_in_file_order() {
    let records = sample_kb().load_all().await.unwrap();

    assert_eq!(records.len(), 9);
    assert_eq!(records[0].id, "pol-001");
    assert_eq!(records[3].id, "prod-001");
    assert_eq!(records[8].id, "sup-003");
}

#[tokio::test]
async fn test_refund_question_finds_refund_policy_first() {
    let index = InMemoryIndex::build(&sample_kb()).await.unwrap();
    assert_eq!(index.len(), 9);

    let hits = index.query("How long do refunds take?", 5, None).await.unwrap();

    assert_eq!(hits[0].id, "pol-002");
    assert_eq!(hits[0].metadata["topic"], "refunds");
}

#[tokio::test]
async fn test_category_filter_restricts_hits() {
    let index = InMemoryIndex::build(&sample_kb()).await.unwrap();
    let mut filter = Metadata::new();
    filter.insert("category".into(), json!("policy"));

    let hits = index.query("return shipping", 10, Some(&filter)).await.unwrap();

    assert_eq!(hits[0].id, "pol-003");
    assert!(hits.iter().all(|h| h.metadata["category"] == "policy"));
}

#[tokio::test]
async fn test_reranker_scores_index_hits() {
    let index = InMemoryIndex::build(&sample_kb()).await.unwrap();
    let hits = index.query("laptop battery", 10, None).await.unwrap();
    let texts: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();

    let scores = LexicalReranker::new().score("laptop battery", &texts).await.unwrap();

    assert_eq!(scores.len(), hits.len());
    let full: Vec<&str> = hits
        .iter()
        .zip(&scores)
        .filter(|(_, s)| **s == 1.0)
        .map(|(h, _)| h.id.as_str())
        .collect();
    assert!(full.contains(&"sup-003"));
}
