//! Linear pipeline: search → rerank → grounded answer, no loop
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rag_core::config::LinearConfig;
use rag_core::{
    Document, EntryOutcome, ExecutionContext, Outcome, QueryResult, RagConfig, RagError, Services,
    StageName, StopReason, Turn,
};

use crate::orchestrator::finish;
use crate::{checkpoint, AnswerEngine, Design, GenerationMode, Generator, PromptBook, Retriever};

pub struct LinearPipeline {
    retriever: Retriever,
    generator: Generator,
    config: LinearConfig,
}

impl LinearPipeline {
    pub fn new(services: &Services, config: &RagConfig) -> Result<Self, RagError> {
        config.validate()?;
        let prompts = Arc::new(PromptBook::new()?);
        Ok(Self {
            retriever: Retriever::new(services, prompts.clone(), config),
            generator: Generator::new(services.reasoner.clone(), prompts, config),
            config: config.linear.clone(),
        })
    }

    pub async fn answer_query(
        &self,
        query: &str,
        history: Vec<Turn>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, RagError> {
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }
        let mut ctx = ExecutionContext::new(query, history);

        checkpoint(cancel)?;
        let docs = self.search(&mut ctx).await;

        checkpoint(cancel)?;
        let docs = self.rerank(&mut ctx, docs).await;
        ctx.retrieved.merge(docs.iter().cloned());

        checkpoint(cancel)?;
        let outcome = match self
            .generator
            .generate_with(&mut ctx, &docs, GenerationMode::Grounded)
            .await
        {
            Ok(_) => Outcome::Linear,
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "linear generation failed");
                Outcome::BestEffort {
                    reason: StopReason::GenerationFailed,
                }
            }
        };

        info!(trace_id = %ctx.trace_id, sources = docs.len(), "linear answer");
        Ok(finish(ctx, None, outcome, 1, docs, None))
    }

    async fn search(&self, ctx: &mut ExecutionContext) -> Vec<Document> {
        match self
            .retriever
            .search_once(ctx.query(), self.config.top_k, None)
            .await
        {
            Ok(docs) => {
                ctx.record(
                    StageName::Retriever,
                    "retrieve",
                    EntryOutcome::Ok,
                    json!({ "found": docs.len(), "top_k": self.config.top_k }),
                );
                docs
            }
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "search degraded");
                ctx.record_failure(StageName::Retriever, "retrieve", EntryOutcome::Degraded, &err);
                Vec::new()
            }
        }
    }

    /// Rerank to `rerank_k`; on failure keep search order, truncated.
    async fn rerank(&self, ctx: &mut ExecutionContext, mut docs: Vec<Document>) -> Vec<Document> {
        if docs.is_empty() {
            ctx.record(
                StageName::Retriever,
                "rerank",
                EntryOutcome::Skipped,
                json!({ "reason": "no_documents" }),
            );
            return docs;
        }

        match self
            .retriever
            .rerank_documents(ctx.query(), docs.clone(), self.config.rerank_k)
            .await
        {
            Ok(ranked) => {
                ctx.record(
                    StageName::Retriever,
                    "rerank",
                    EntryOutcome::Ok,
                    json!({ "kept": ranked.len() }),
                );
                ranked
            }
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "rerank degraded, keeping search order");
                ctx.record_failure(StageName::Retriever, "rerank", EntryOutcome::Degraded, &err);
                docs.truncate(self.config.rerank_k);
                docs
            }
        }
    }
}

#[async_trait]
impl AnswerEngine for LinearPipeline {
    fn design(&self) -> Design {
        Design::Linear
    }

    async fn answer(
        &self,
        query: &str,
        history: Vec<Turn>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, RagError> {
        self.answer_query(query, history, cancel).await
    }
}
