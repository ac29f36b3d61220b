//! Self-checking loop: retrieve once, then generate and judge until the
//! judgment accepts or the budget runs out.
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rag_core::config::SelfCheckConfig;
use rag_core::{
    Document, DocumentSet, EntryOutcome, ExecutionContext, Outcome, QueryResult, RagConfig,
    RagError, Recommendation, Services, StageName, StopReason, Turn, ValidationResult,
};

use crate::orchestrator::finish;
use crate::{
    checkpoint, AnswerEngine, Classifier, Design, GenerationMode, Generator, Grader, PromptBook,
    Retriever, Validator,
};

pub struct SelfCheckingLoop {
    classifier: Classifier,
    retriever: Retriever,
    grader: Grader,
    generator: Generator,
    validator: Validator,
    config: SelfCheckConfig,
}

impl SelfCheckingLoop {
    pub fn new(services: &Services, config: &RagConfig) -> Result<Self, RagError> {
        config.validate()?;
        let prompts = Arc::new(PromptBook::new()?);
        Ok(Self {
            classifier: Classifier::new(services.reasoner.clone(), prompts.clone(), config),
            retriever: Retriever::new(services, prompts.clone(), config),
            grader: Grader::new(services.reasoner.clone(), prompts.clone(), config),
            generator: Generator::new(services.reasoner.clone(), prompts.clone(), config),
            validator: Validator::new(services.reasoner.clone(), prompts, config),
            config: config.self_check.clone(),
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
        let route = self.classifier.classify(&mut ctx).await?;
        if route.requires_retrieval {
            checkpoint(cancel)?;
            self.gather_context(&mut ctx).await;
        }

        let mut best: Option<(String, ValidationResult, Vec<Document>)> = None;
        let mut iterations = 0u32;
        let outcome = loop {
            if iterations >= self.config.max_iterations {
                break Outcome::BestEffort {
                    reason: StopReason::BudgetExhausted,
                };
            }
            iterations += 1;

            checkpoint(cancel)?;
            let docs = ctx.graded.as_slice().to_vec();
            let answer = match self
                .generator
                .generate_with(&mut ctx, &docs, GenerationMode::Grounded)
                .await
            {
                Ok(answer) => answer,
                Err(_) => {
                    break Outcome::BestEffort {
                        reason: StopReason::GenerationFailed,
                    }
                }
            };

            checkpoint(cancel)?;
            let validation = self.validator.validate(&mut ctx).await;
            let recommendation = validation.recommendation;
            if best.is_none() || validation.overall_quality.is_good_or_better() {
                best = Some((answer, validation, docs));
            }

            match recommendation {
                Recommendation::Accept => {
                    break Outcome::Accepted {
                        iteration: iterations,
                    }
                }
                Recommendation::Regenerate => {
                    debug!(trace_id = %ctx.trace_id, iteration = iterations, "regenerating");
                }
                Recommendation::RetrieveMore => {
                    checkpoint(cancel)?;
                    self.retrieve_more(&mut ctx).await;
                }
                _ => {
                    break Outcome::BestEffort {
                        reason: StopReason::NotActionable,
                    }
                }
            }
        };

        info!(trace_id = %ctx.trace_id, iterations, ?outcome, "self-check finished");
        let (answer, validation, sources) = match best {
            Some((answer, validation, sources)) => (Some(answer), Some(validation), sources),
            None => (None, None, Vec::new()),
        };
        ctx.answer = answer;
        Ok(finish(ctx, None, outcome, iterations, sources, validation))
    }

    /// Search, keep the relevant documents and rerank them down to
    /// `rerank_k`. Leaves the working set in `ctx.graded`.
    async fn gather_context(&self, ctx: &mut ExecutionContext) {
        match self
            .retriever
            .search_once(ctx.query(), self.config.top_k, None)
            .await
        {
            Ok(docs) => {
                let found = docs.len();
                ctx.retrieved.merge(docs);
                ctx.record(
                    StageName::Retriever,
                    "retrieve",
                    EntryOutcome::Ok,
                    json!({ "found": found, "top_k": self.config.top_k }),
                );
            }
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "search degraded");
                ctx.record_failure(StageName::Retriever, "retrieve", EntryOutcome::Degraded, &err);
                return;
            }
        }

        if self.grader.grade(ctx).await.is_err() || ctx.graded.is_empty() {
            return;
        }

        let relevant = ctx.graded.as_slice().to_vec();
        let ranked = match self
            .retriever
            .rerank_documents(ctx.query(), relevant.clone(), self.config.rerank_k)
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
                ctx.record_failure(StageName::Retriever, "rerank", EntryOutcome::Degraded, &err);
                relevant.into_iter().take(self.config.rerank_k).collect()
            }
        };
        ctx.graded = ranked.into_iter().collect::<DocumentSet>();
    }

    /// Append up to `extra_docs` documents not already in the working set
    async fn retrieve_more(&self, ctx: &mut ExecutionContext) {
        match self
            .retriever
            .search_once(ctx.query(), self.config.extra_top_k, None)
            .await
        {
            Ok(docs) => {
                let fresh: Vec<Document> = docs
                    .into_iter()
                    .filter(|d| !ctx.graded.contains(&d.id))
                    .take(self.config.extra_docs)
                    .collect();
                ctx.retrieved.merge(fresh.iter().cloned());
                let added = ctx.graded.merge(fresh);
                ctx.record(
                    StageName::Retriever,
                    "retrieve_more",
                    EntryOutcome::Ok,
                    json!({ "added": added, "total": ctx.graded.len() }),
                );
            }
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "extra retrieval degraded");
                ctx.record_failure(
                    StageName::Retriever,
                    "retrieve_more",
                    EntryOutcome::Degraded,
                    &err,
                );
            }
        }
    }
}

#[async_trait]
impl AnswerEngine for SelfCheckingLoop {
    fn design(&self) -> Design {
        Design::SelfCheck
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
