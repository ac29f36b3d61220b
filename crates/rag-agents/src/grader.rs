//! Grader: relevance filtering of retrieved documents
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use rag_core::config::GradingConfig;
use rag_core::{
    complete_structured, CompletionRequest, Document, DocumentSet, EntryOutcome,
    ExecutionContext, Grading, ModelTier, Purpose, RagConfig, RagError, Reasoner, StageName,
};

use crate::prompts::{self, excerpt, PromptBook};

const ACTION: &str = "grade_documents";

pub struct Grader {
    reasoner: Arc<dyn Reasoner>,
    prompts: Arc<PromptBook>,
    config: GradingConfig,
    temperature: f32,
}

impl Grader {
    pub fn new(reasoner: Arc<dyn Reasoner>, prompts: Arc<PromptBook>, config: &RagConfig) -> Self {
        Self {
            reasoner,
            prompts,
            config: config.grading.clone(),
            temperature: config.reasoner.temperature,
        }
    }

    /// Replace `ctx.graded` with the relevant subset of `ctx.retrieved`.
    /// A failed grading call empties `graded` and is reported as degraded.
    pub async fn grade(&self, ctx: &mut ExecutionContext) -> Result<usize, RagError> {
        let total = ctx.retrieved.len();
        if total == 0 {
            ctx.graded = DocumentSet::new();
            ctx.record(
                StageName::Grader,
                ACTION,
                EntryOutcome::Ok,
                json!({ "total": 0, "relevant": 0 }),
            );
            return Ok(0);
        }

        match self.grade_documents(ctx.query(), ctx.retrieved.as_slice()).await {
            Ok(kept) => {
                let relevant = kept.len();
                debug!(trace_id = %ctx.trace_id, total, relevant, "graded");
                ctx.graded = kept.into_iter().collect();
                ctx.record(
                    StageName::Grader,
                    ACTION,
                    EntryOutcome::Ok,
                    json!({ "total": total, "relevant": relevant }),
                );
                Ok(relevant)
            }
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "grading degraded to no relevant documents");
                ctx.graded = DocumentSet::new();
                ctx.record_failure(StageName::Grader, ACTION, EntryOutcome::Degraded, &err);
                Err(err)
            }
        }
    }

    /// Grade every document concurrently and keep the relevant ones, in
    /// input order. Any failed call fails the whole batch.
    pub async fn grade_documents(
        &self,
        query: &str,
        docs: &[Document],
    ) -> Result<Vec<Document>, RagError> {
        let calls: Vec<_> = docs.iter().map(|doc| self.grade_one(query, doc)).collect();
        let gradings: Vec<Grading> = stream::iter(calls)
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await?;

        Ok(docs
            .iter()
            .zip(gradings)
            .filter(|(_, g)| g.is_relevant && g.relevance_score > self.config.relevance_threshold)
            .map(|(doc, grading)| {
                let mut doc = doc.clone();
                doc.relevance_score = Some(grading.relevance_score.clamp(0.0, 1.0));
                doc.grading = Some(grading);
                doc
            })
            .collect())
    }

    async fn grade_one(&self, query: &str, doc: &Document) -> Result<Grading, RagError> {
        let prompt = self
            .prompts
            .render(
                prompts::GRADE,
                &json!({
                    "query": query,
                    "content": excerpt(&doc.content, self.config.excerpt_chars),
                }),
            )
            .map_err(|e| RagError::GradingFailure(e.to_string()))?;
        let request = CompletionRequest::new(Purpose::Grade, ModelTier::Fast, prompt)
            .with_temperature(self.temperature);

        complete_structured(self.reasoner.as_ref(), request)
            .await
            .map_err(|e| RagError::GradingFailure(format!("{}: {}", doc.id, e)))
    }
}
