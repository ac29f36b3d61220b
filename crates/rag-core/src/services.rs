//! Collaborator contracts: reasoner, search, reranker, knowledge base
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::data_model::{Document, Metadata};
use crate::error::ServiceError;

/// Model tier requested by a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheap, low-latency model (classification, query formulation, grading)
    Fast,
    /// Stronger model (planning, generation, validation)
    Reasoning,
}

/// Which stage issued a completion; lets doubles and logs tell calls apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Classify,
    Plan,
    FormulateQueries,
    Grade,
    Generate,
    Validate,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Classify => "classify",
            Self::Plan => "plan",
            Self::FormulateQueries => "formulate_queries",
            Self::Grade => "grade",
            Self::Generate => "generate",
            Self::Validate => "validate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub purpose: Purpose,
    pub tier: ModelTier,
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    /// Caller expects a single JSON object back
    pub structured: bool,
}

impl CompletionRequest {
    pub fn new(purpose: Purpose, tier: ModelTier, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            tier,
            system_prompt: None,
            prompt: prompt.into(),
            temperature: 0.1,
            structured: false,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }
}

/// Language-model completion. Failures are not retried by callers.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// In [0, 1]
    pub similarity: f32,
}

impl From<SearchHit> for Document {
    fn from(hit: SearchHit) -> Self {
        Document {
            id: hit.id,
            content: hit.content,
            metadata: hit.metadata,
            similarity: Some(hit.similarity),
            relevance_score: None,
            rerank_score: None,
            grading: None,
        }
    }
}

/// Similarity search over the knowledge base
#[async_trait]
pub trait Search: Send + Sync {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<SearchHit>, ServiceError>;
}

/// Joint query/document relevance scoring. Returns one score per text, in
/// input order.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Source of knowledge-base records, read once at index-build time
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn load_all(&self) -> Result<Vec<KnowledgeRecord>, ServiceError>;
}

/// Shared collaborators handed to every answering design
#[derive(Clone)]
pub struct Services {
    pub reasoner: Arc<dyn Reasoner>,
    pub search: Arc<dyn Search>,
    pub reranker: Arc<dyn Reranker>,
}

impl Services {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        search: Arc<dyn Search>,
        reranker: Arc<dyn Reranker>,
    ) -> Self {
        Self {
            reasoner,
            search,
            reranker,
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Issue a structured completion and parse the reply as `T`.
pub async fn complete_structured<T: DeserializeOwned>(
    reasoner: &dyn Reasoner,
    request: CompletionRequest,
) -> Result<T, ServiceError> {
    let purpose = request.purpose;
    let raw = reasoner.complete(request.structured()).await?;
    parse_structured(&raw).map_err(|e| {
        tracing::debug!(%purpose, raw = %raw, "structured reply did not parse");
        e
    })
}

/// Parse a model reply as JSON, tolerating a surrounding markdown fence or
/// prose around the outermost object.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ServiceError> {
    let body = strip_fence(raw.trim());
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first) => {
            let start = body.find('{');
            let end = body.rfind('}');
            match (start, end) {
                (Some(s), Some(e)) if s < e => serde_json::from_str(&body[s..=e])
                    .map_err(|err| ServiceError::ReasonerMalformed(err.to_string())),
                _ => Err(ServiceError::ReasonerMalformed(first.to_string())),
            }
        }
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
