//! Classifier: decide whether a query needs the knowledge base
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use rag_core::{
    complete_structured, CompletionRequest, EntryOutcome, ExecutionContext, ModelTier, Purpose,
    RagConfig, RagError, Reasoner, Route, StageName,
};

use crate::prompts::{self, PromptBook};

const ACTION: &str = "route_query";

pub struct Classifier {
    reasoner: Arc<dyn Reasoner>,
    prompts: Arc<PromptBook>,
    temperature: f32,
}

impl Classifier {
    pub fn new(reasoner: Arc<dyn Reasoner>, prompts: Arc<PromptBook>, config: &RagConfig) -> Self {
        Self {
            reasoner,
            prompts,
            temperature: config.reasoner.temperature,
        }
    }

    /// Sets `ctx.route`. Unparseable output fails the query; there is no
    /// retry and no default route.
    pub async fn classify(&self, ctx: &mut ExecutionContext) -> Result<Route, RagError> {
        debug!(trace_id = %ctx.trace_id, "classifying query");

        match self.request_route(ctx).await {
            Ok(route) => {
                info!(
                    trace_id = %ctx.trace_id,
                    requires_retrieval = route.requires_retrieval,
                    complexity = route.complexity.as_str(),
                    "query routed"
                );
                ctx.record(
                    StageName::Classifier,
                    ACTION,
                    EntryOutcome::Ok,
                    json!({
                        "category": route.category,
                        "complexity": route.complexity,
                        "requires_retrieval": route.requires_retrieval,
                        "strategy": route.strategy,
                        "confidence": route.confidence,
                    }),
                );
                ctx.route = Some(route.clone());
                Ok(route)
            }
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "classification failed");
                ctx.record_failure(StageName::Classifier, ACTION, EntryOutcome::Failed, &err);
                Err(err)
            }
        }
    }

    async fn request_route(&self, ctx: &ExecutionContext) -> Result<Route, RagError> {
        let prompt = self.prompts.render(
            prompts::CLASSIFY,
            &json!({ "query": ctx.query(), "history": ctx.history() }),
        )?;
        let request = CompletionRequest::new(Purpose::Classify, ModelTier::Fast, prompt)
            .with_temperature(self.temperature);

        let route: Route = complete_structured(self.reasoner.as_ref(), request)
            .await
            .map_err(|e| RagError::ClassificationFailure(e.to_string()))?;
        Ok(route.normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_core::{Complexity, Turn};
    use rag_testkit::{route_json, ScriptedReasoner};

    fn classifier(reasoner: Arc<ScriptedReasoner>) -> Classifier {
        let prompts = Arc::new(PromptBook::new().unwrap());
        Classifier::new(reasoner, prompts, &RagConfig::default())
    }

    #[tokio::test]
    async fn test_classify_sets_route() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_json(Purpose::Classify, route_json(true, "simple"));
        let mut ctx = ExecutionContext::new("What is the return policy?", vec![Turn::user("hi")]);

        let route = classifier(reasoner.clone()).classify(&mut ctx).await.unwrap();

        assert!(route.requires_retrieval);
        assert_eq!(ctx.route.as_ref().unwrap().complexity, Complexity::Simple);
        assert_eq!(ctx.trace().len(), 1);
        assert_eq!(ctx.trace().entries()[0].action, "route_query");
        assert_eq!(reasoner.calls()[0].tier, ModelTier::Fast);
        assert!(reasoner.calls()[0].prompt.contains("user: hi"));
    }

    #[tokio::test]
    async fn test_unparseable_route_is_fatal() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push(Purpose::Classify, "I think it is a policy question");
        let mut ctx = ExecutionContext::new("What is the return policy?", vec![]);

        let err = classifier(reasoner.clone()).classify(&mut ctx).await.unwrap_err();

        assert!(matches!(err, RagError::ClassificationFailure(_)));
        assert!(ctx.route.is_none());
        assert_eq!(ctx.trace().entries()[0].outcome, EntryOutcome::Failed);
        assert_eq!(reasoner.count(Purpose::Classify), 1);
    }

    #[tokio::test]
    async fn test_missing_retrieval_flag_is_fatal() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_json(
            Purpose::Classify,
            json!({ "category": "policy", "complexity": "simple" }),
        );
        let mut ctx = ExecutionContext::new("refunds?", vec![]);

        let err = classifier(reasoner).classify(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "classification_failure");
    }
}
