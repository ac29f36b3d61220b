//! Unified Error Model
use thiserror::Error;

/// Failures raised by external collaborators (reasoner, search, reranker,
/// knowledge base). Stages translate these into [`RagError`] variants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("REASONER/UNAVAILABLE: {0}")]
    ReasonerUnavailable(String),

    #[error("REASONER/MALFORMED: {0}")]
    ReasonerMalformed(String),

    #[error("SEARCH/UNAVAILABLE: {0}")]
    SearchUnavailable(String),

    #[error("RERANK/UNAVAILABLE: {0}")]
    RerankUnavailable(String),

    #[error("KB/{0}")]
    KnowledgeBase(String),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReasonerUnavailable(_) => "reasoner_unavailable",
            Self::ReasonerMalformed(_) => "reasoner_malformed",
            Self::SearchUnavailable(_) => "search_unavailable",
            Self::RerankUnavailable(_) => "rerank_unavailable",
            Self::KnowledgeBase(_) => "knowledge_base",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    #[error("QUERY/EMPTY: query must not be empty")]
    EmptyQuery,

    #[error("CLASSIFY/{0}")]
    ClassificationFailure(String),

    #[error("PLAN/{0}")]
    PlanningFailure(String),

    #[error("RETRIEVE/{0}")]
    RetrievalFailure(String),

    #[error("RERANK/{0}")]
    RerankUnavailable(String),

    #[error("GRADE/{0}")]
    GradingFailure(String),

    #[error("GENERATE/{0}")]
    GenerationFailure(String),

    #[error("VALIDATE/{0}")]
    ValidationFailure(String),

    #[error("STATE/{0} read before the stage that defines it ran")]
    MissingState(&'static str),

    #[error("CANCELLED: query cancelled between stages")]
    Cancelled,

    #[error("CONFIG/{0}")]
    Config(String),

    #[error("PROMPT/{0}")]
    Prompt(String),
}

impl RagError {
    /// Stable identifier used in trace summaries and API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyQuery => "empty_query",
            Self::ClassificationFailure(_) => "classification_failure",
            Self::PlanningFailure(_) => "planning_failure",
            Self::RetrievalFailure(_) => "retrieval_failure",
            Self::RerankUnavailable(_) => "rerank_unavailable",
            Self::GradingFailure(_) => "grading_failure",
            Self::GenerationFailure(_) => "generation_failure",
            Self::ValidationFailure(_) => "validation_failure",
            Self::MissingState(_) => "missing_state",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
            Self::Prompt(_) => "prompt",
        }
    }

    /// Failures the orchestrator absorbs, continuing with the state it holds.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::RetrievalFailure(_)
                | Self::RerankUnavailable(_)
                | Self::GradingFailure(_)
                | Self::ValidationFailure(_)
        )
    }
}
