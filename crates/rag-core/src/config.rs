//! Engine configuration
//!
//! Built once at startup and passed to constructors. Every section has
//! defaults, so an empty YAML document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RagError;
use crate::services::ModelTier;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub reasoner: ReasonerConfig,
    pub retrieval: RetrievalConfig,
    pub grading: GradingConfig,
    pub validation: ValidationConfig,
    pub orchestrator: OrchestratorConfig,
    pub linear: LinearConfig,
    pub self_check: SelfCheckConfig,
    pub server: ServerConfig,
}

/// OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub fast_model: String,
    pub reasoning_model: String,
    /// Embedding model for vector search; used only when an api key is set
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            fast_model: "gpt-3.5-turbo".to_string(),
            reasoning_model: "gpt-4-turbo-preview".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates per search string when the step does not say
    pub default_top_k: usize,
    /// `top_k` of the fixed plan for simple queries
    pub simple_plan_top_k: usize,
    /// Rerank only when more documents than this were merged
    pub rerank_threshold: usize,
    /// Documents kept after reranking
    pub rerank_limit: usize,
    pub max_search_queries: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            simple_plan_top_k: 5,
            rerank_threshold: 3,
            rerank_limit: 10,
            max_search_queries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Kept documents must score strictly above this
    pub relevance_threshold: f32,
    pub excerpt_chars: usize,
    /// Grading calls in flight at once
    pub concurrency: usize,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.5,
            excerpt_chars: 600,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub source_excerpt_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            source_excerpt_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on execute+validate cycles
    pub max_iterations: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_iterations: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
    pub top_k: usize,
    pub rerank_k: usize,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            rerank_k: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfCheckConfig {
    pub max_iterations: u32,
    pub top_k: usize,
    pub rerank_k: usize,
    /// Search size for a `retrieve_more` round
    pub extra_top_k: usize,
    /// New documents appended per `retrieve_more` round
    pub extra_docs: usize,
}

impl Default for SelfCheckConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            top_k: 10,
            rerank_k: 3,
            extra_top_k: 5,
            extra_docs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub knowledge_base_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8787".to_string(),
            knowledge_base_dir: "data/knowledge_base".to_string(),
        }
    }
}

impl RagConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, RagError> {
        let config: RagConfig =
            serde_yaml::from_str(yaml).map_err(|e| RagError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RagError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| RagError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), RagError> {
        let positive = [
            ("orchestrator.max_iterations", self.orchestrator.max_iterations as usize),
            ("self_check.max_iterations", self.self_check.max_iterations as usize),
            ("retrieval.default_top_k", self.retrieval.default_top_k),
            ("retrieval.simple_plan_top_k", self.retrieval.simple_plan_top_k),
            ("retrieval.rerank_limit", self.retrieval.rerank_limit),
            ("retrieval.max_search_queries", self.retrieval.max_search_queries),
            ("grading.concurrency", self.grading.concurrency),
            ("linear.top_k", self.linear.top_k),
            ("linear.rerank_k", self.linear.rerank_k),
            ("self_check.top_k", self.self_check.top_k),
            ("self_check.rerank_k", self.self_check.rerank_k),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(RagError::Config(format!("{} must be greater than zero", name)));
        }

        if !(0.0..=1.0).contains(&self.grading.relevance_threshold) {
            return Err(RagError::Config(
                "grading.relevance_threshold must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }

    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.reasoner.fast_model,
            ModelTier::Reasoning => &self.reasoner.reasoning_model,
        }
    }

    /// Apply `RAG_ADDR`, `RAG_KB_DIR` and `OPENAI_API_KEY` from the process
    /// environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("RAG_ADDR") {
            self.server.addr = addr;
        }
        if let Some(dir) = lookup("RAG_KB_DIR") {
            self.server.knowledge_base_dir = dir;
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.reasoner.api_key = Some(key);
        }
    }
}
