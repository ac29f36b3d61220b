//! Generator: grounded, comparative or synthesized answers
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use rag_core::{
    Action, CompletionRequest, Document, EntryOutcome, ExecutionContext, ModelTier, Purpose,
    RagConfig, RagError, Reasoner, StageName, Step,
};

use crate::prompts::{self, PromptBook};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Grounded,
    Compare,
    Synthesize,
}

impl GenerationMode {
    pub fn for_action(action: Action) -> Self {
        match action {
            Action::Compare => Self::Compare,
            Action::Synthesize => Self::Synthesize,
            _ => Self::Grounded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grounded => "grounded",
            Self::Compare => "compare",
            Self::Synthesize => "synthesize",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Self::Grounded => prompts::SYSTEM_ANSWER,
            Self::Compare => prompts::SYSTEM_COMPARE,
            Self::Synthesize => prompts::SYSTEM_SYNTHESIZE,
        }
    }
}

/// `[Source i]` blocks, 1-based in the given order, each followed by the
/// grader's key points when present.
pub fn build_context(docs: &[Document]) -> String {
    let mut parts = Vec::with_capacity(docs.len() * 3);
    for (i, doc) in docs.iter().enumerate() {
        parts.push(format!("[Source {}]", i + 1));
        parts.push(doc.content.clone());
        let key_points = doc.key_points();
        if !key_points.is_empty() {
            parts.push(format!("Key points: {}", key_points.join(", ")));
        }
        parts.push(String::new());
    }
    parts.join("\n")
}

pub struct Generator {
    reasoner: Arc<dyn Reasoner>,
    prompts: Arc<PromptBook>,
    temperature: f32,
}

impl Generator {
    pub fn new(reasoner: Arc<dyn Reasoner>, prompts: Arc<PromptBook>, config: &RagConfig) -> Self {
        Self {
            reasoner,
            prompts,
            temperature: config.reasoner.temperature,
        }
    }

    /// Answer from `ctx.graded` in the mode the step's action selects
    pub async fn generate(&self, ctx: &mut ExecutionContext, step: &Step) -> Result<String, RagError> {
        let docs = ctx.graded.as_slice().to_vec();
        self.generate_with(ctx, &docs, GenerationMode::for_action(step.action()))
            .await
    }

    /// Answer from an explicit document list and store it in `ctx.answer`.
    /// Without documents the bare query is sent (open-domain answer).
    pub async fn generate_with(
        &self,
        ctx: &mut ExecutionContext,
        docs: &[Document],
        mode: GenerationMode,
    ) -> Result<String, RagError> {
        let action = format!("generate_{}", mode.as_str());

        match self.request_answer(ctx.query(), docs, mode).await {
            Ok(answer) => {
                debug!(
                    trace_id = %ctx.trace_id,
                    mode = mode.as_str(),
                    sources = docs.len(),
                    "answer generated"
                );
                ctx.record(
                    StageName::Generator,
                    action,
                    EntryOutcome::Ok,
                    json!({
                        "mode": mode.as_str(),
                        "sources": docs.len(),
                        "answer_chars": answer.chars().count(),
                    }),
                );
                ctx.answer = Some(answer.clone());
                Ok(answer)
            }
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "generation failed");
                ctx.record_failure(StageName::Generator, action, EntryOutcome::Failed, &err);
                Err(err)
            }
        }
    }

    async fn request_answer(
        &self,
        query: &str,
        docs: &[Document],
        mode: GenerationMode,
    ) -> Result<String, RagError> {
        let prompt = if docs.is_empty() {
            query.to_string()
        } else {
            self.prompts
                .render(
                    prompts::GENERATE_GROUNDED,
                    &json!({ "context": build_context(docs), "query": query }),
                )
                .map_err(|e| RagError::GenerationFailure(e.to_string()))?
        };
        let request = CompletionRequest::new(Purpose::Generate, ModelTier::Reasoning, prompt)
            .with_system(mode.system_prompt())
            .with_temperature(self.temperature);

        let answer = self
            .reasoner
            .complete(request)
            .await
            .map_err(|e| RagError::GenerationFailure(e.to_string()))?;
        if answer.trim().is_empty() {
            return Err(RagError::GenerationFailure("empty answer".to_string()));
        }
        Ok(answer)
    }
}
