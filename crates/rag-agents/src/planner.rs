//! Planner: fixed plan for simple queries, model-proposed plan otherwise
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use rag_core::{
    complete_structured, Action, CompletionRequest, Complexity, EntryOutcome, ExecutionContext,
    ModelTier, Purpose, RagConfig, RagError, RawStep, Reasoner, Route, StageName, Step, StepInfo,
};

use crate::prompts::{self, PromptBook};

#[derive(Debug, Deserialize)]
struct PlanReply {
    plan: Vec<RawStep>,
    #[serde(default)]
    plan_type: Option<String>,
    #[serde(default)]
    expected_iterations: Option<Value>,
}

pub struct Planner {
    reasoner: Arc<dyn Reasoner>,
    prompts: Arc<PromptBook>,
    simple_top_k: usize,
    temperature: f32,
}

impl Planner {
    pub fn new(reasoner: Arc<dyn Reasoner>, prompts: Arc<PromptBook>, config: &RagConfig) -> Self {
        Self {
            reasoner,
            prompts,
            simple_top_k: config.retrieval.simple_plan_top_k,
            temperature: config.reasoner.temperature,
        }
    }

    /// `[retrieve(query), grade, generate]`
    pub fn simple_plan(&self, query: &str) -> Vec<Step> {
        vec![
            Step::retrieve(query, Some(self.simple_top_k)),
            Step::Grade(StepInfo::targeting("retrieved_docs")),
            Step::Generate(StepInfo::targeting("graded_docs")),
        ]
    }

    /// Sets `ctx.plan`. A plan left empty after dropping unknown actions is
    /// a `PlanningFailure`; the simple plan is never substituted.
    pub async fn plan(&self, ctx: &mut ExecutionContext) -> Result<Vec<Step>, RagError> {
        let route = match ctx.require_route() {
            Ok(route) => route.clone(),
            Err(err) => {
                ctx.record_failure(StageName::Planner, "create_plan", EntryOutcome::Failed, &err);
                return Err(err);
            }
        };

        if route.complexity == Complexity::Simple {
            let plan = self.simple_plan(ctx.query());
            debug!(trace_id = %ctx.trace_id, "simple plan");
            ctx.metadata.insert("plan_type".to_string(), json!("simple"));
            ctx.record(
                StageName::Planner,
                "create_simple_plan",
                EntryOutcome::Ok,
                json!({ "steps": plan.len(), "actions": actions(&plan) }),
            );
            ctx.plan = Some(plan.clone());
            return Ok(plan);
        }

        match self.request_plan(ctx.query(), &route).await {
            Ok(reply) => self.accept_plan(ctx, reply),
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "planning failed");
                ctx.record_failure(
                    StageName::Planner,
                    "create_complex_plan",
                    EntryOutcome::Failed,
                    &err,
                );
                Err(err)
            }
        }
    }

    async fn request_plan(&self, query: &str, route: &Route) -> Result<PlanReply, RagError> {
        let vocabulary: Vec<&str> = Action::ALL.iter().map(Action::as_str).collect();
        let prompt = self.prompts.render(
            prompts::PLAN,
            &json!({
                "query": query,
                "category": route.category,
                "complexity": route.complexity,
                "strategy": route.strategy,
                "actions": vocabulary,
            }),
        )?;
        let request = CompletionRequest::new(Purpose::Plan, ModelTier::Reasoning, prompt)
            .with_temperature(self.temperature);

        complete_structured(self.reasoner.as_ref(), request)
            .await
            .map_err(|e| RagError::PlanningFailure(e.to_string()))
    }

    fn accept_plan(
        &self,
        ctx: &mut ExecutionContext,
        reply: PlanReply,
    ) -> Result<Vec<Step>, RagError> {
        let mut plan = Vec::with_capacity(reply.plan.len());
        let mut dropped = Vec::new();
        for raw in reply.plan {
            match Step::try_from(raw) {
                Ok(step) => plan.push(step),
                Err(unknown) => dropped.push(unknown.0),
            }
        }

        if !dropped.is_empty() {
            warn!(
                trace_id = %ctx.trace_id,
                dropped = ?dropped,
                "plan contained actions outside the vocabulary"
            );
        }

        if plan.is_empty() {
            let err = RagError::PlanningFailure(format!(
                "no executable steps ({} dropped)",
                dropped.len()
            ));
            ctx.record(
                StageName::Planner,
                "create_complex_plan",
                EntryOutcome::Failed,
                json!({
                    "error": err.kind(),
                    "message": err.to_string(),
                    "dropped": dropped.len(),
                    "dropped_actions": dropped,
                }),
            );
            return Err(err);
        }

        if let Some(plan_type) = &reply.plan_type {
            ctx.metadata.insert("plan_type".to_string(), json!(plan_type));
        }
        if let Some(expected) = &reply.expected_iterations {
            ctx.metadata.insert("expected_iterations".to_string(), expected.clone());
        }

        info!(trace_id = %ctx.trace_id, steps = plan.len(), "plan created");
        ctx.record(
            StageName::Planner,
            "create_complex_plan",
            EntryOutcome::Ok,
            json!({
                "steps": plan.len(),
                "actions": actions(&plan),
                "plan_type": reply.plan_type,
                "dropped": dropped.len(),
                "dropped_actions": dropped,
            }),
        );
        ctx.plan = Some(plan.clone());
        Ok(plan)
    }
}

fn actions(plan: &[Step]) -> Vec<&'static str> {
    plan.iter().map(|s| s.action().as_str()).collect()
}
