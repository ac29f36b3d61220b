//! Validator: multi-dimension judgment of the current answer
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use rag_core::{
    complete_structured, CompletionRequest, EntryOutcome, ExecutionContext, ModelTier, Purpose,
    RagConfig, RagError, Reasoner, StageName, ValidationResult,
};

use crate::citations;
use crate::prompts::{self, excerpt, PromptBook};

const ACTION: &str = "validate_answer";

#[derive(Serialize)]
struct SourceExcerpt {
    index: usize,
    excerpt: String,
}

pub struct Validator {
    reasoner: Arc<dyn Reasoner>,
    prompts: Arc<PromptBook>,
    excerpt_chars: usize,
    temperature: f32,
}

impl Validator {
    pub fn new(reasoner: Arc<dyn Reasoner>, prompts: Arc<PromptBook>, config: &RagConfig) -> Self {
        Self {
            reasoner,
            prompts,
            excerpt_chars: config.validation.source_excerpt_chars,
            temperature: config.reasoner.temperature,
        }
    }

    /// Judge `ctx.answer` against `ctx.graded` and store the result in
    /// `ctx.validation`. Never fails: a missing answer or an unreachable
    /// reasoner both yield an invalid result recommending regeneration.
    pub async fn validate(&self, ctx: &mut ExecutionContext) -> ValidationResult {
        let Some(answer) = ctx.answer_text().map(str::to_string) else {
            let result = ValidationResult::rejected("No answer generated");
            debug!(trace_id = %ctx.trace_id, "nothing to validate");
            ctx.record(
                StageName::Validator,
                ACTION,
                EntryOutcome::Skipped,
                json!({ "reason": "no_answer", "recommendation": result.recommendation }),
            );
            ctx.validation = Some(result.clone());
            return result;
        };

        let result = match self.request_judgment(ctx, &answer).await {
            Ok(mut result) => {
                result.diagnostics = citations::check(&answer, ctx.graded.len());
                info!(
                    trace_id = %ctx.trace_id,
                    is_valid = result.is_valid,
                    recommendation = result.recommendation.as_str(),
                    "answer validated"
                );
                ctx.record(
                    StageName::Validator,
                    ACTION,
                    EntryOutcome::Ok,
                    json!({
                        "overall_quality": result.overall_quality,
                        "is_valid": result.is_valid,
                        "recommendation": result.recommendation,
                        "diagnostics": result.diagnostics.len(),
                    }),
                );
                result
            }
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "validation unavailable");
                ctx.record_failure(StageName::Validator, ACTION, EntryOutcome::Failed, &err);
                ValidationResult::rejected(err.to_string())
            }
        };

        ctx.validation = Some(result.clone());
        result
    }

    async fn request_judgment(
        &self,
        ctx: &ExecutionContext,
        answer: &str,
    ) -> Result<ValidationResult, RagError> {
        let sources: Vec<SourceExcerpt> = ctx
            .graded
            .iter()
            .enumerate()
            .map(|(i, doc)| SourceExcerpt {
                index: i + 1,
                excerpt: excerpt(&doc.content, self.excerpt_chars),
            })
            .collect();
        let prompt = self
            .prompts
            .render(
                prompts::VALIDATE,
                &json!({ "query": ctx.query(), "sources": sources, "answer": answer }),
            )
            .map_err(|e| RagError::ValidationFailure(e.to_string()))?;
        let request = CompletionRequest::new(Purpose::Validate, ModelTier::Reasoning, prompt)
            .with_temperature(self.temperature);

        let result: ValidationResult = complete_structured(self.reasoner.as_ref(), request)
            .await
            .map_err(|e| RagError::ValidationFailure(e.to_string()))?;
        Ok(result.normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_core::{OverallQuality, Recommendation, ServiceError};
    use rag_testkit::{doc, validation_json, ScriptedReasoner};

    fn validator(reasoner: Arc<ScriptedReasoner>) -> Validator {
        let prompts = Arc::new(PromptBook::new().unwrap());
        Validator::new(reasoner, prompts, &RagConfig::default())
    }

    #[tokio::test]
    async fn test_missing_answer_skips_model() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let mut ctx = ExecutionContext::new("q", vec![]);

        let result = validator(reasoner.clone()).validate(&mut ctx).await;

        assert!(!result.is_valid);
        assert_eq!(result.recommendation, Recommendation::Regenerate);
        assert_eq!(result.issues, vec!["No answer generated"]);
        assert!(reasoner.calls().is_empty());
        assert_eq!(ctx.trace().entries()[0].outcome, EntryOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_model_judgment_with_diagnostics() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_json(Purpose::Validate, validation_json(true, "accept", "excellent"));
        let mut ctx = ExecutionContext::new("Return window?", vec![]);
        ctx.graded.merge(vec![doc("P1", &"Returns accepted within 30 days. ".repeat(20))]);
        ctx.answer = Some("30 days [Source 1], see also [Source 3].".to_string());

        let result = validator(reasoner.clone()).validate(&mut ctx).await;

        // the dangling citation is reported but does not override the model
        assert!(result.is_valid);
        assert_eq!(result.overall_quality, OverallQuality::Excellent);
        assert_eq!(result.diagnostics, vec!["cites missing source(s) 3 of 1"]);
        let prompt = &reasoner.prompts_for(Purpose::Validate)[0];
        assert!(prompt.contains("Source 1: Returns accepted"));
        assert!(prompt.contains("..."));
        assert_eq!(ctx.validation.as_ref(), Some(&result));
    }

    #[tokio::test]
    async fn test_reasoner_outage_degrades_to_regenerate() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_error(Purpose::Validate, ServiceError::ReasonerUnavailable("503".into()));
        let mut ctx = ExecutionContext::new("q", vec![]);
        ctx.answer = Some("an answer".to_string());

        let result = validator(reasoner).validate(&mut ctx).await;

        assert!(!result.is_valid);
        assert_eq!(result.recommendation, Recommendation::Regenerate);
        let entry = &ctx.trace().entries()[0];
        assert_eq!(entry.outcome, EntryOutcome::Failed);
        assert_eq!(entry.summary["error"], "validation_failure");
    }

    #[tokio::test]
    async fn test_conversational_answer_without_sources() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_json(Purpose::Validate, validation_json(false, "regenerate", "poor"));
        let mut ctx = ExecutionContext::new("hi", vec![]);
        ctx.answer = Some("Hello!".to_string());

        let result = validator(reasoner.clone()).validate(&mut ctx).await;

        assert!(result.diagnostics.is_empty());
        assert!(reasoner.prompts_for(Purpose::Validate)[0].contains("No sources"));
    }
}
