//! Embedding-backed vector search
//!
//! [`OpenAiEmbeddings`] calls an OpenAI-compatible `/embeddings` endpoint.
//! [`VectorIndex`] embeds every record once when built, then ranks records
//! by cosine similarity to the embedded query. Negative similarities are
//! clamped to 0 and such records are not returned.
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use rag_core::config::ReasonerConfig;
use rag_core::{KnowledgeBase, KnowledgeRecord, Metadata, Search, SearchHit, ServiceError};

use crate::index::{matches_filter, unique_records};

/// Texts sent per `/embeddings` request while indexing
const EMBED_BATCH: usize = 64;

/// Turns text into dense vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::SearchUnavailable("empty embedding response".into()))
    }

    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI embeddings client. Shares endpoint, key and timeout with the
/// reasoner configuration.
pub struct OpenAiEmbeddings {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiEmbeddings {
    pub fn new(config: &ReasonerConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::SearchUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.endpoint);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .map_err(|e| ServiceError::SearchUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(model = %self.model, %status, "embedding request rejected");
            return Err(ServiceError::SearchUnavailable(format!(
                "embeddings status {status}: {detail}"
            )));
        }

        let reply: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::SearchUnavailable(format!("embeddings reply: {e}")))?;
        let mut data = reply.data;
        data.sort_by_key(|d| d.index);
        if data.len() != texts.len() {
            return Err(ServiceError::SearchUnavailable(format!(
                "embeddings reply: {} vectors for {} inputs",
                data.len(),
                texts.len()
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Cosine similarity of two dense vectors, clamped into [0, 1].
/// Mismatched lengths and zero vectors score 0.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

struct VectorEntry {
    record: KnowledgeRecord,
    vector: Vec<f32>,
}

pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    entries: Vec<VectorEntry>,
}

impl VectorIndex {
    pub async fn build(
        kb: &dyn KnowledgeBase,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ServiceError> {
        Self::from_records(kb.load_all().await?, embedder).await
    }

    /// Embed records in order. A repeated id keeps its first record.
    pub async fn from_records(
        records: Vec<KnowledgeRecord>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ServiceError> {
        let records = unique_records(records);
        let mut entries = Vec::with_capacity(records.len());
        for chunk in records.chunks(EMBED_BATCH) {
            let texts: Vec<String> = chunk.iter().map(|r| r.content.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            if vectors.len() != chunk.len() {
                return Err(ServiceError::SearchUnavailable(format!(
                    "{} vectors for {} records",
                    vectors.len(),
                    chunk.len()
                )));
            }
            entries.extend(
                chunk
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(record, vector)| VectorEntry { record, vector }),
            );
        }
        info!(model = embedder.model_name(), documents = entries.len(), "vector index ready");
        Ok(Self { embedder, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Search for VectorIndex {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        if text.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let candidates: Vec<&VectorEntry> = self
            .entries
            .iter()
            .filter(|e| matches_filter(&e.record.metadata, filter))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(text).await?;
        let mut scored: Vec<(&VectorEntry, f32)> = candidates
            .into_iter()
            .map(|e| (e, similarity(&query, &e.vector)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        // stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        debug!(query = text, hits = scored.len(), "vector query");
        Ok(scored
            .into_iter()
            .map(|(entry, similarity)| SearchHit {
                id: entry.record.id.clone(),
                content: entry.record.content.clone(),
                metadata: entry.record.metadata.clone(),
                similarity,
            })
            .collect())
    }
}
