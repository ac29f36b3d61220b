//! RAG Core: Execution Context, Data Model e contratos de colaboradores
//!
//! Shared vocabulary for every answering design in the workspace. Stages in
//! `rag-agents` read and write an [`ExecutionContext`]; external services are
//! reached only through the traits in [`services`].
//!
//! ```text
//! Classifier → Planner → Retriever → Grader → Generator → Validator
//!      ↓          ↓          ↓          ↓          ↓           ↓
//!    route       plan     retrieved   graded     answer    validation
//!      └──────────┴──────────┴──── trace ─────────┴───────────┘
//! ```

pub mod config;
pub mod context;
pub mod data_model;
pub mod error;
pub mod services;
pub mod trace;

pub use config::RagConfig;
pub use context::ExecutionContext;
pub use data_model::{
    Action, Category, Complexity, DimensionScore, Document, DocumentSet, Grading, Metadata,
    Outcome, OverallQuality, QueryResult, RawStep, Recommendation, RetrieveParams, Role, Route,
    Step, StepInfo, StopReason, Strategy, Turn, UnknownAction, ValidationResult,
};
pub use error::{RagError, ServiceError};
pub use services::{
    complete_structured, CompletionRequest, KnowledgeBase, KnowledgeRecord, ModelTier, Purpose,
    Reasoner, Reranker, Search, SearchHit, Services,
};
pub use trace::{EntryOutcome, StageName, Trace, TraceEntry};

/// Engine version reported by the API health endpoint
pub const ENGINE_VERSION: &str = "1.0.0";
