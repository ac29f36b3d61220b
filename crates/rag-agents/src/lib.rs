//! RAG Agents: estágios e designs de resposta
//!
//! Six stateless stages share one [`ExecutionContext`] per query:
//!
//! ```text
//! Classifier → Planner → [Retriever → Grader → Generator]* → Validator
//!                              ↑                                 │
//!                              └──── regenerate / retrieve_more ─┘
//! ```
//!
//! Three answering designs are built from them: the adaptive
//! [`Orchestrator`], the fixed [`LinearPipeline`] and the
//! [`SelfCheckingLoop`]. All three implement [`AnswerEngine`].
//!
//! [`ExecutionContext`]: rag_core::ExecutionContext

pub mod citations;
pub mod classifier;
pub mod generator;
pub mod grader;
pub mod linear;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod retriever;
pub mod self_check;
pub mod validator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

use rag_core::{QueryResult, RagError, Turn};

pub use classifier::Classifier;
pub use generator::{GenerationMode, Generator};
pub use grader::Grader;
pub use linear::LinearPipeline;
pub use orchestrator::{Orchestrator, CONVERSATIONAL_ANSWER};
pub use planner::Planner;
pub use prompts::PromptBook;
pub use retriever::Retriever;
pub use self_check::SelfCheckingLoop;
pub use validator::Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Design {
    Adaptive,
    Linear,
    SelfCheck,
}

impl Design {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adaptive => "adaptive",
            Self::Linear => "linear",
            Self::SelfCheck => "self_check",
        }
    }
}

impl fmt::Display for Design {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common surface of the answering designs
#[async_trait]
pub trait AnswerEngine: Send + Sync {
    fn design(&self) -> Design;

    async fn answer(
        &self,
        query: &str,
        history: Vec<Turn>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, RagError>;
}

/// Err(Cancelled) once the token fires; checked between stages only.
pub(crate) fn checkpoint(cancel: &CancellationToken) -> Result<(), RagError> {
    if cancel.is_cancelled() {
        Err(RagError::Cancelled)
    } else {
        Ok(())
    }
}
