//! Orchestrator: the adaptive classify → plan → execute → validate loop
//!
//! ```text
//! CLASSIFY ─┬─ no retrieval ──────────────────────────→ CONVERSATIONAL_END
//!           └─ PLAN → EXECUTE → VALIDATE ─┬─ accept / valid → ACCEPT
//!                        ↑                ├─ regenerate ──────┐
//!                        ├────────────────┘                   │
//!                        └── retrieve_more (+1 retrieve) ─────┘
//!                                          └─ other / budget → ACCEPT_BEST
//! ```

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rag_core::{
    Action, Document, EntryOutcome, ExecutionContext, Outcome, QueryResult, RagConfig, RagError,
    Recommendation, Services, StageName, Step, StopReason, Turn, ValidationResult,
};

use crate::{
    checkpoint, AnswerEngine, Classifier, Design, Generator, Grader, Planner, PromptBook,
    Retriever, Validator,
};

/// Reply for queries the classifier marks as not needing retrieval
pub const CONVERSATIONAL_ANSWER: &str = "Hello! I'm the customer support assistant. \
I can help with product information, return and refund policies, order tracking, \
shipping and technical support. What can I help you with today?";

/// Best answer seen so far, with the sources it was generated from
struct Best {
    answer: String,
    sources: Vec<Document>,
    validation: ValidationResult,
}

pub struct Orchestrator {
    classifier: Classifier,
    planner: Planner,
    retriever: Retriever,
    grader: Grader,
    generator: Generator,
    validator: Validator,
    max_iterations: u32,
}

impl Orchestrator {
    pub fn new(services: &Services, config: &RagConfig) -> Result<Self, RagError> {
        config.validate()?;
        let prompts = Arc::new(PromptBook::new()?);
        Ok(Self {
            classifier: Classifier::new(services.reasoner.clone(), prompts.clone(), config),
            planner: Planner::new(services.reasoner.clone(), prompts.clone(), config),
            retriever: Retriever::new(services, prompts.clone(), config),
            grader: Grader::new(services.reasoner.clone(), prompts.clone(), config),
            generator: Generator::new(services.reasoner.clone(), prompts.clone(), config),
            validator: Validator::new(services.reasoner.clone(), prompts, config),
            max_iterations: config.orchestrator.max_iterations,
        })
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub async fn answer_query(
        &self,
        query: &str,
        history: Vec<Turn>,
    ) -> Result<QueryResult, RagError> {
        self.answer_query_with_cancel(query, history, &CancellationToken::new())
            .await
    }

    /// Run one query to a terminal state. Only classification, planning and
    /// cancellation are errors; every other failure ends in a best-effort
    /// result.
    pub async fn answer_query_with_cancel(
        &self,
        query: &str,
        history: Vec<Turn>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, RagError> {
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }
        let mut ctx = ExecutionContext::new(query, history);
        debug!(trace_id = %ctx.trace_id, "answering query");

        checkpoint(cancel)?;
        let route = self.classifier.classify(&mut ctx).await?;
        if !route.requires_retrieval {
            ctx.answer = Some(CONVERSATIONAL_ANSWER.to_string());
            info!(trace_id = %ctx.trace_id, "conversational reply");
            return Ok(finish(ctx, None, Outcome::Conversational, 0, Vec::new(), None));
        }

        checkpoint(cancel)?;
        let plan = self.planner.plan(&mut ctx).await?;

        let mut best: Option<Best> = None;
        let mut iterations = 0u32;
        let outcome = loop {
            if iterations >= self.max_iterations {
                break Outcome::BestEffort {
                    reason: StopReason::BudgetExhausted,
                };
            }
            iterations += 1;

            match self.execute_plan(&mut ctx, &plan, cancel).await {
                Ok(()) => {}
                Err(RagError::GenerationFailure(_)) => {
                    break Outcome::BestEffort {
                        reason: StopReason::GenerationFailed,
                    }
                }
                Err(err) => return Err(err),
            }

            let Some(answer) = ctx.answer_text().map(str::to_string) else {
                break Outcome::BestEffort {
                    reason: StopReason::NoAnswer,
                };
            };

            checkpoint(cancel)?;
            let validation = self.validator.validate(&mut ctx).await;
            let accepted = validation.is_valid || validation.recommendation == Recommendation::Accept;
            let recommendation = validation.recommendation;

            if best.is_none() || accepted {
                best = Some(Best {
                    answer,
                    sources: ctx.graded.as_slice().to_vec(),
                    validation,
                });
            }

            if accepted {
                break Outcome::Accepted {
                    iteration: iterations,
                };
            }

            match recommendation {
                Recommendation::Regenerate => {
                    debug!(trace_id = %ctx.trace_id, iteration = iterations, "regenerating");
                }
                Recommendation::RetrieveMore => {
                    if iterations < self.max_iterations {
                        checkpoint(cancel)?;
                        let step = Step::retrieve(ctx.query().to_string(), None);
                        if let Err(err) = self.retriever.retrieve(&mut ctx, &step).await {
                            debug!(trace_id = %ctx.trace_id, error = %err, "extra retrieval degraded");
                        }
                    }
                }
                other => {
                    info!(
                        trace_id = %ctx.trace_id,
                        recommendation = other.as_str(),
                        "recommendation not actionable, keeping best answer"
                    );
                    break Outcome::BestEffort {
                        reason: StopReason::NotActionable,
                    };
                }
            }
        };

        if let Outcome::BestEffort { reason } = outcome {
            warn!(trace_id = %ctx.trace_id, ?reason, iterations, "returning best-effort answer");
        } else {
            info!(trace_id = %ctx.trace_id, iterations, "answer accepted");
        }

        let (answer, sources, validation) = match best {
            Some(best) => (Some(best.answer), best.sources, Some(best.validation)),
            None => (None, Vec::new(), ctx.validation.clone()),
        };
        ctx.answer = answer;
        Ok(finish(ctx, Some(plan), outcome, iterations, sources, validation))
    }

    /// Run every plan step once, in order. Retrieval and grading failures
    /// are absorbed; a generation failure ends the execution.
    async fn execute_plan(
        &self,
        ctx: &mut ExecutionContext,
        plan: &[Step],
        cancel: &CancellationToken,
    ) -> Result<(), RagError> {
        ctx.answer = None;

        for step in plan {
            checkpoint(cancel)?;
            match step.action() {
                Action::Retrieve => {
                    absorb_degraded(self.retriever.retrieve(ctx, step).await.map(drop))?
                }
                Action::Grade => absorb_degraded(self.grader.grade(ctx).await.map(drop))?,
                Action::Generate | Action::Compare | Action::Synthesize => {
                    self.generator.generate(ctx, step).await?;
                }
                Action::Validate => ctx.record(
                    StageName::Orchestrator,
                    "skip_step",
                    EntryOutcome::Skipped,
                    json!({ "action": "validate", "reason": "validation follows execution" }),
                ),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AnswerEngine for Orchestrator {
    fn design(&self) -> Design {
        Design::Adaptive
    }

    async fn answer(
        &self,
        query: &str,
        history: Vec<Turn>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, RagError> {
        self.answer_query_with_cancel(query, history, cancel).await
    }
}

fn absorb_degraded(result: Result<(), RagError>) -> Result<(), RagError> {
    match result {
        Err(err) if err.is_degraded() => Ok(()),
        other => other,
    }
}

pub(crate) fn finish(
    ctx: ExecutionContext,
    plan: Option<Vec<Step>>,
    outcome: Outcome,
    iterations: u32,
    sources: Vec<Document>,
    validation: Option<ValidationResult>,
) -> QueryResult {
    QueryResult {
        trace_id: ctx.trace_id.clone(),
        query: ctx.query().to_string(),
        answer: ctx.answer.clone(),
        route: ctx.route.clone(),
        plan,
        sources,
        validation,
        iterations,
        outcome,
        trace: ctx.into_trace().into_entries(),
    }
}
