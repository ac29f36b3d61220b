//! End-to-end behaviour of the adaptive orchestrator over scripted collaborators

use std::sync::Arc;

use async_trait::async_trait;
use rag_agents::{Orchestrator, CONVERSATIONAL_ANSWER};
use rag_core::{
    CompletionRequest, EntryOutcome, Outcome, Purpose, RagConfig, RagError, Reasoner,
    ServiceError, Services, StageName, StopReason, Turn,
};
use rag_testkit::{
    grade_json, hit, hits, plan_json, route_json, validation_json, Doubles, FixedReranker,
    ScriptedReasoner, StaticSearch,
};
use tokio_util::sync::CancellationToken;

fn engine(doubles: &Doubles) -> Orchestrator {
    Orchestrator::new(&doubles.services(), &RagConfig::default()).unwrap()
}

fn actions(result: &rag_core::QueryResult) -> Vec<String> {
    result.trace.iter().map(|e| e.action.clone()).collect()
}

/// Reasoner scripted for a simple, retrieval-backed query
fn simple_reasoner() -> ScriptedReasoner {
    let reasoner = ScriptedReasoner::new();
    reasoner
        .push_json(Purpose::Classify, route_json(true, "simple"))
        .repeat_json(Purpose::Grade, grade_json(true, 0.9));
    reasoner
}

#[tokio::test]
async fn test_conversational_query_short_circuits() {
    let reasoner = ScriptedReasoner::new();
    reasoner.push_json(Purpose::Classify, route_json(false, "simple"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 3)), FixedReranker::uniform(0.5));

    let result = engine(&doubles)
        .answer_query("Hello!", vec![Turn::assistant("Hi, how can I help?")])
        .await
        .unwrap();

    assert_eq!(result.answer.as_deref(), Some(CONVERSATIONAL_ANSWER));
    assert_eq!(result.outcome, Outcome::Conversational);
    assert!(result.plan.is_none());
    assert!(result.sources.is_empty());
    assert!(result.validation.is_none());
    assert_eq!(result.trace.len(), 1);
    assert_eq!(result.trace[0].stage, StageName::Classifier);
    assert_eq!(doubles.reasoner.purposes(), vec![Purpose::Classify]);
    assert_eq!(doubles.search.call_count(), 0);
}

#[tokio::test]
async fn test_simple_query_accepted_first_pass() {
    let reasoner = simple_reasoner();
    reasoner
        .push(Purpose::Generate, "Items can be returned within 30 days [Source 1].")
        .push_json(Purpose::Validate, validation_json(true, "accept", "excellent"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("policy", 3)), FixedReranker::uniform(0.5));

    let result = engine(&doubles)
        .answer_query("What is your return policy?", vec![])
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Accepted { iteration: 1 });
    assert_eq!(result.iterations, 1);
    assert_eq!(result.plan.as_ref().unwrap().len(), 3);
    assert_eq!(doubles.reasoner.count(Purpose::Plan), 0);
    assert_eq!(
        actions(&result),
        vec![
            "route_query",
            "create_simple_plan",
            "retrieve",
            "grade_documents",
            "generate_grounded",
            "validate_answer",
        ]
    );
    assert_eq!(result.sources.len(), 3);
    assert_eq!(doubles.search.calls()[0].top_k, 5);
    assert!(!result.is_degraded());
}

#[tokio::test]
async fn test_complex_plan_runs_steps_in_order() {
    let reasoner = ScriptedReasoner::new();
    reasoner
        .push_json(Purpose::Classify, route_json(true, "complex"))
        .push_json(
            Purpose::Plan,
            plan_json(&["retrieve", "retrieve", "grade", "juggle", "compare", "validate"]),
        )
        .repeat_json(Purpose::Grade, grade_json(true, 0.8))
        .push(Purpose::Generate, "Electronics 15 days [Source 1], clothing 30 days [Source 2].")
        .push_json(Purpose::Validate, validation_json(true, "accept", "good"));
    let search = StaticSearch::with_sequence(vec![
        vec![hit("E1", "electronics returns 15 days", 0.9)],
        vec![hit("C1", "clothing returns 30 days", 0.9)],
    ]);
    let doubles = Doubles::new(reasoner, search, FixedReranker::uniform(0.5));

    let result = engine(&doubles)
        .answer_query("Compare electronics and clothing returns", vec![])
        .await
        .unwrap();

    assert_eq!(
        actions(&result),
        vec![
            "route_query",
            "create_complex_plan",
            "retrieve",
            "retrieve",
            "grade_documents",
            "generate_compare",
            "skip_step",
            "validate_answer",
        ]
    );
    assert_eq!(result.trace[1].summary["dropped_actions"][0], "juggle");
    assert_eq!(result.trace[6].outcome, EntryOutcome::Skipped);
    let searched: Vec<String> = doubles.search.calls().into_iter().map(|c| c.text).collect();
    assert_eq!(searched, vec!["target 1", "target 2"]);
    let ids: Vec<&str> = result.sources.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["E1", "C1"]);
}

#[tokio::test]
async fn test_retrieve_more_then_accept_grows_retrieved_set() {
    let reasoner = simple_reasoner();
    reasoner
        .push(Purpose::Generate, "Partial answer.")
        .push(Purpose::Generate, "Complete answer [Source 3].")
        .push_json(Purpose::Validate, validation_json(false, "retrieve_more", "needs_improvement"))
        .push_json(Purpose::Validate, validation_json(true, "accept", "good"));
    let search = StaticSearch::with_sequence(vec![
        vec![hit("A", "alpha", 0.9), hit("B", "beta", 0.8)],
        vec![hit("A", "alpha", 0.9), hit("C", "gamma", 0.7)],
    ]);
    let doubles = Doubles::new(reasoner, search, FixedReranker::uniform(0.5));

    let result = engine(&doubles)
        .answer_query("What is the warranty?", vec![])
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Accepted { iteration: 2 });
    assert_eq!(result.iterations, 2);
    assert_eq!(doubles.reasoner.count(Purpose::Validate), 2);

    let totals: Vec<u64> = result
        .trace
        .iter()
        .filter(|e| e.stage == StageName::Retriever)
        .map(|e| e.summary["total"].as_u64().unwrap())
        .collect();
    // plan retrieve, extra retrieve, plan retrieve again
    assert_eq!(totals, vec![2, 3, 3]);

    // iteration 1 graded {A, B}; iteration 2 graded {A, B, C}
    let graded = doubles.reasoner.prompts_for(Purpose::Grade);
    assert_eq!(graded.len(), 5);
    for needle in ["alpha", "beta", "gamma"] {
        assert!(graded[2..].iter().any(|p| p.contains(needle)));
    }

    let ids: Vec<&str> = result.sources.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    assert_eq!(doubles.search.calls()[1].text, "What is the warranty?");
}

#[tokio::test]
async fn test_budget_exhausted_returns_first_answer() {
    let reasoner = simple_reasoner();
    reasoner
        .push(Purpose::Generate, "first")
        .push(Purpose::Generate, "second")
        .push(Purpose::Generate, "third")
        .repeat_json(Purpose::Validate, validation_json(false, "regenerate", "poor"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let result = engine(&doubles)
        .answer_query("How do refunds work?", vec![])
        .await
        .unwrap();

    assert_eq!(result.iterations, 3);
    assert_eq!(result.answer.as_deref(), Some("first"));
    assert_eq!(
        result.outcome,
        Outcome::BestEffort {
            reason: StopReason::BudgetExhausted
        }
    );
    assert!(result.is_degraded());
    assert_eq!(doubles.reasoner.count(Purpose::Generate), 3);
    assert_eq!(doubles.reasoner.count(Purpose::Validate), 3);
}

#[tokio::test]
async fn test_custom_budget_bounds_cycles() {
    let reasoner = simple_reasoner();
    reasoner
        .repeat(Purpose::Generate, "again")
        .repeat_json(Purpose::Validate, validation_json(false, "regenerate", "poor"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 1)), FixedReranker::uniform(0.5));

    let result = engine(&doubles)
        .with_max_iterations(5)
        .answer_query("q", vec![])
        .await
        .unwrap();

    assert_eq!(result.iterations, 5);
    assert_eq!(doubles.reasoner.count(Purpose::Validate), 5);
}

#[tokio::test]
async fn test_unactionable_recommendation_keeps_best() {
    let reasoner = simple_reasoner();
    reasoner
        .push(Purpose::Generate, "baseline")
        .push(Purpose::Generate, "worse")
        .push_json(Purpose::Validate, validation_json(false, "regenerate", "acceptable"))
        .push_json(Purpose::Validate, validation_json(false, "clarify_query", "poor"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let result = engine(&doubles).answer_query("q", vec![]).await.unwrap();

    assert_eq!(result.answer.as_deref(), Some("baseline"));
    assert_eq!(
        result.outcome,
        Outcome::BestEffort {
            reason: StopReason::NotActionable
        }
    );
    assert_eq!(result.iterations, 2);
}

#[tokio::test]
async fn test_valid_later_answer_replaces_baseline() {
    let reasoner = simple_reasoner();
    reasoner
        .push(Purpose::Generate, "baseline")
        .push(Purpose::Generate, "improved")
        .push_json(Purpose::Validate, validation_json(false, "regenerate", "poor"))
        .push_json(Purpose::Validate, validation_json(true, "regenerate", "good"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let result = engine(&doubles).answer_query("q", vec![]).await.unwrap();

    // a valid judgment stops the loop even when the recommendation disagrees
    assert_eq!(result.answer.as_deref(), Some("improved"));
    assert_eq!(result.outcome, Outcome::Accepted { iteration: 2 });
    assert!(result.validation.unwrap().is_valid);
}

#[tokio::test]
async fn test_generation_failure_falls_back_to_best() {
    let reasoner = simple_reasoner();
    reasoner
        .push(Purpose::Generate, "baseline")
        .push_error(Purpose::Generate, ServiceError::ReasonerUnavailable("overloaded".into()))
        .push_json(Purpose::Validate, validation_json(false, "regenerate", "poor"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let result = engine(&doubles).answer_query("q", vec![]).await.unwrap();

    assert_eq!(result.answer.as_deref(), Some("baseline"));
    assert_eq!(
        result.outcome,
        Outcome::BestEffort {
            reason: StopReason::GenerationFailed
        }
    );
    let last = result.trace.last().unwrap();
    assert_eq!(last.stage, StageName::Generator);
    assert_eq!(last.outcome, EntryOutcome::Failed);
}

#[tokio::test]
async fn test_first_generation_failure_has_no_answer() {
    let reasoner = simple_reasoner();
    reasoner.push(Purpose::Generate, "   ");
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let result = engine(&doubles).answer_query("q", vec![]).await.unwrap();

    assert!(result.answer.is_none());
    assert!(result.sources.is_empty());
    assert_eq!(doubles.reasoner.count(Purpose::Validate), 0);
}

#[tokio::test]
async fn test_search_outage_is_degraded_not_fatal() {
    let reasoner = simple_reasoner();
    reasoner
        .push(Purpose::Generate, "I could not find details, but generally...")
        .push_json(Purpose::Validate, validation_json(true, "accept", "acceptable"));
    let doubles = Doubles::new(reasoner, StaticSearch::failing(), FixedReranker::uniform(0.5));

    let result = engine(&doubles).answer_query("q", vec![]).await.unwrap();

    assert!(result.answer.is_some());
    assert_eq!(result.trace[2].stage, StageName::Retriever);
    assert_eq!(result.trace[2].outcome, EntryOutcome::Degraded);
    assert_eq!(result.trace[2].summary["error"], "retrieval_failure");
    // nothing to grade, so the answer is open-domain
    assert_eq!(doubles.reasoner.count(Purpose::Grade), 0);
    assert_eq!(doubles.reasoner.prompts_for(Purpose::Generate)[0], "q");
}

#[tokio::test]
async fn test_grading_failure_means_no_relevant_documents() {
    let reasoner = ScriptedReasoner::new();
    reasoner
        .push_json(Purpose::Classify, route_json(true, "simple"))
        .repeat_error(Purpose::Grade, ServiceError::ReasonerMalformed("bad json".into()))
        .push(Purpose::Generate, "General answer.")
        .push_json(Purpose::Validate, validation_json(true, "accept", "acceptable"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let result = engine(&doubles).answer_query("q", vec![]).await.unwrap();

    assert!(result.sources.is_empty());
    assert_eq!(result.trace[3].outcome, EntryOutcome::Degraded);
    assert_eq!(result.outcome, Outcome::Accepted { iteration: 1 });
}

#[tokio::test]
async fn test_retrieve_more_on_last_iteration_skips_search() {
    let reasoner = simple_reasoner();
    reasoner
        .repeat(Purpose::Generate, "answer")
        .repeat_json(Purpose::Validate, validation_json(false, "retrieve_more", "poor"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let result = engine(&doubles)
        .with_max_iterations(1)
        .answer_query("q", vec![])
        .await
        .unwrap();

    assert_eq!(doubles.search.call_count(), 1);
    assert_eq!(
        result.outcome,
        Outcome::BestEffort {
            reason: StopReason::BudgetExhausted
        }
    );
}

#[tokio::test]
async fn test_classification_failure_is_fatal() {
    let reasoner = ScriptedReasoner::new();
    reasoner.push(Purpose::Classify, "not json");
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let err = engine(&doubles).answer_query("q", vec![]).await.unwrap_err();

    assert!(matches!(err, RagError::ClassificationFailure(_)));
    assert_eq!(doubles.search.call_count(), 0);
}

#[tokio::test]
async fn test_planning_failure_is_fatal() {
    let reasoner = ScriptedReasoner::new();
    reasoner
        .push_json(Purpose::Classify, route_json(true, "complex"))
        .push_json(Purpose::Plan, plan_json(&["dance"]));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let err = engine(&doubles).answer_query("q", vec![]).await.unwrap_err();

    assert!(matches!(err, RagError::PlanningFailure(_)));
    assert_eq!(doubles.search.call_count(), 0);
    assert_eq!(doubles.reasoner.count(Purpose::Generate), 0);
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let doubles = Doubles::new(ScriptedReasoner::new(), StaticSearch::new(vec![]), FixedReranker::uniform(0.5));

    let err = engine(&doubles).answer_query("   ", vec![]).await.unwrap_err();

    assert_eq!(err, RagError::EmptyQuery);
    assert!(doubles.reasoner.calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let doubles = Doubles::new(simple_reasoner(), StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine(&doubles)
        .answer_query_with_cancel("q", vec![], &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, RagError::Cancelled);
    assert!(doubles.reasoner.calls().is_empty());
}

/// Cancels the token once a call for `purpose` has been answered
struct CancelAfter {
    inner: Arc<ScriptedReasoner>,
    purpose: Purpose,
    cancel: CancellationToken,
}

#[async_trait]
impl Reasoner for CancelAfter {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError> {
        let purpose = request.purpose;
        let reply = self.inner.complete(request).await;
        if purpose == self.purpose {
            self.cancel.cancel();
        }
        reply
    }
}

#[tokio::test]
async fn test_cancelled_between_generation_and_validation() {
    let reasoner = simple_reasoner();
    reasoner
        .push(Purpose::Generate, "Items can be returned within 30 days [Source 1].")
        .push_json(Purpose::Validate, validation_json(true, "accept", "excellent"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("policy", 2)), FixedReranker::uniform(0.5));
    let cancel = CancellationToken::new();
    let services = Services {
        reasoner: Arc::new(CancelAfter {
            inner: doubles.reasoner.clone(),
            purpose: Purpose::Generate,
            cancel: cancel.clone(),
        }),
        ..doubles.services()
    };

    let err = Orchestrator::new(&services, &RagConfig::default())
        .unwrap()
        .answer_query_with_cancel("What is your return policy?", vec![], &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, RagError::Cancelled);
    assert_eq!(doubles.search.call_count(), 1);
    assert_eq!(doubles.reasoner.count(Purpose::Generate), 1);
    assert_eq!(doubles.reasoner.count(Purpose::Validate), 0);
}

#[tokio::test]
async fn test_cancelled_after_classification_skips_retrieval() {
    let doubles = Doubles::new(simple_reasoner(), StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));
    let cancel = CancellationToken::new();
    let services = Services {
        reasoner: Arc::new(CancelAfter {
            inner: doubles.reasoner.clone(),
            purpose: Purpose::Classify,
            cancel: cancel.clone(),
        }),
        ..doubles.services()
    };

    let err = Orchestrator::new(&services, &RagConfig::default())
        .unwrap()
        .answer_query_with_cancel("q", vec![], &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, RagError::Cancelled);
    assert_eq!(doubles.reasoner.calls().len(), 1);
    assert_eq!(doubles.search.call_count(), 0);
}

#[tokio::test]
async fn test_route_without_complexity_or_category_is_conversational() {
    let reasoner = ScriptedReasoner::new();
    reasoner.push(Purpose::Classify, r#"{"category":"general_conversation","requires_retrieval":false}"#);
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 3)), FixedReranker::uniform(0.5));

    let result = engine(&doubles).answer_query("Hello!", vec![]).await.unwrap();

    assert_eq!(result.answer.as_deref(), Some(CONVERSATIONAL_ANSWER));
    assert_eq!(result.outcome, Outcome::Conversational);
    assert_eq!(doubles.search.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_complexity_gets_model_plan() {
    let reasoner = ScriptedReasoner::new();
    reasoner
        .push(Purpose::Classify, r#"{"complexity":"moderate","requires_retrieval":true}"#)
        .push_json(Purpose::Plan, plan_json(&["retrieve", "grade", "generate"]))
        .repeat_json(Purpose::Grade, grade_json(true, 0.9))
        .push(Purpose::Generate, "Refunds take 5 days [Source 1].")
        .push_json(Purpose::Validate, validation_json(true, "accept", "good"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(hits("kb", 2)), FixedReranker::uniform(0.5));

    let result = engine(&doubles).answer_query("How long do refunds take?", vec![]).await.unwrap();

    assert_eq!(doubles.reasoner.count(Purpose::Plan), 1);
    assert_eq!(actions(&result)[1], "create_complex_plan");
    assert_eq!(result.outcome, Outcome::Accepted { iteration: 1 });
}

#[tokio::test]
async fn test_trace_ids_differ_between_queries() {
    let reasoner = ScriptedReasoner::new();
    reasoner.repeat_json(Purpose::Classify, route_json(false, "simple"));
    let doubles = Doubles::new(reasoner, StaticSearch::new(vec![]), FixedReranker::uniform(0.5));
    let engine = engine(&doubles);

    let (a, b) = tokio::join!(engine.answer_query("hi", vec![]), engine.answer_query("hello", vec![]));

    assert_ne!(a.unwrap().trace_id, b.unwrap().trace_id);
}
