//! Scripted collaborators for engine tests
//!
//! Every double records the calls it received so tests can assert on which
//! stages ran, and in what order.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use rag_core::{
    CompletionRequest, Document, Metadata, Purpose, Reasoner, Reranker, Search, SearchHit,
    ServiceError, Services,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Reply = Result<String, ServiceError>;

#[derive(Default)]
struct Script {
    queued: HashMap<Purpose, VecDeque<Reply>>,
    defaults: HashMap<Purpose, Reply>,
    rules: Vec<(Purpose, String, Reply)>,
    calls: Vec<CompletionRequest>,
}

/// Reasoner double. For each request it answers, in order of precedence:
/// a `respond_when` rule whose needle occurs in the prompt, the next queued
/// reply for the purpose, the purpose's repeat default.
#[derive(Default)]
pub struct ScriptedReasoner {
    script: Mutex<Script>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, purpose: Purpose, reply: impl Into<String>) -> &Self {
        lock(&self.script)
            .queued
            .entry(purpose)
            .or_default()
            .push_back(Ok(reply.into()));
        self
    }

    pub fn push_json(&self, purpose: Purpose, reply: Value) -> &Self {
        self.push(purpose, reply.to_string())
    }

    pub fn push_error(&self, purpose: Purpose, err: ServiceError) -> &Self {
        lock(&self.script)
            .queued
            .entry(purpose)
            .or_default()
            .push_back(Err(err));
        self
    }

    /// Reply used for `purpose` whenever its queue is empty
    pub fn repeat(&self, purpose: Purpose, reply: impl Into<String>) -> &Self {
        lock(&self.script).defaults.insert(purpose, Ok(reply.into()));
        self
    }

    pub fn repeat_json(&self, purpose: Purpose, reply: Value) -> &Self {
        self.repeat(purpose, reply.to_string())
    }

    pub fn repeat_error(&self, purpose: Purpose, err: ServiceError) -> &Self {
        lock(&self.script).defaults.insert(purpose, Err(err));
        self
    }

    /// Reply used for `purpose` whenever the prompt contains `needle`
    pub fn respond_when(&self, purpose: Purpose, needle: &str, reply: Value) -> &Self {
        lock(&self.script)
            .rules
            .push((purpose, needle.to_string(), Ok(reply.to_string())));
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        lock(&self.script).calls.clone()
    }

    pub fn purposes(&self) -> Vec<Purpose> {
        lock(&self.script).calls.iter().map(|c| c.purpose).collect()
    }

    pub fn count(&self, purpose: Purpose) -> usize {
        lock(&self.script)
            .calls
            .iter()
            .filter(|c| c.purpose == purpose)
            .count()
    }

    pub fn prompts_for(&self, purpose: Purpose) -> Vec<String> {
        lock(&self.script)
            .calls
            .iter()
            .filter(|c| c.purpose == purpose)
            .map(|c| c.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError> {
        let mut script = lock(&self.script);
        let purpose = request.purpose;

        let ruled = script
            .rules
            .iter()
            .find(|(p, needle, _)| *p == purpose && request.prompt.contains(needle.as_str()))
            .map(|(_, _, reply)| reply.clone());
        script.calls.push(request);

        if let Some(reply) = ruled {
            return reply;
        }
        if let Some(reply) = script.queued.get_mut(&purpose).and_then(VecDeque::pop_front) {
            return reply;
        }
        script.defaults.get(&purpose).cloned().unwrap_or_else(|| {
            Err(ServiceError::ReasonerUnavailable(format!(
                "no scripted reply for {}",
                purpose
            )))
        })
    }
}

/// Search call as recorded by [`StaticSearch`]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCall {
    pub text: String,
    pub top_k: usize,
    pub filter: Option<Metadata>,
}

#[derive(Default)]
struct SearchScript {
    responses: VecDeque<Vec<SearchHit>>,
    last: Vec<SearchHit>,
    failing: bool,
    calls: Vec<SearchCall>,
}

/// Search double. Returns queued result lists one per call; once the queue
/// is drained the last list repeats. Results are truncated to `top_k`.
#[derive(Default)]
pub struct StaticSearch {
    script: Mutex<SearchScript>,
}

impl StaticSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self::with_sequence(vec![hits])
    }

    pub fn with_sequence(responses: Vec<Vec<SearchHit>>) -> Self {
        Self {
            script: Mutex::new(SearchScript {
                responses: responses.into(),
                ..SearchScript::default()
            }),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: Mutex::new(SearchScript {
                failing: true,
                ..SearchScript::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<SearchCall> {
        lock(&self.script).calls.clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.script).calls.len()
    }
}

#[async_trait]
impl Search for StaticSearch {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        let mut script = lock(&self.script);
        script.calls.push(SearchCall {
            text: text.to_string(),
            top_k,
            filter: filter.cloned(),
        });

        if script.failing {
            return Err(ServiceError::SearchUnavailable("scripted outage".to_string()));
        }
        if let Some(next) = script.responses.pop_front() {
            script.last = next;
        }
        Ok(script.last.iter().take(top_k).cloned().collect())
    }
}

enum RerankMode {
    Uniform(f32),
    ByContent(Vec<(String, f32)>),
    Failing,
    WrongLength,
}

/// Reranker double with deterministic scores
pub struct FixedReranker {
    mode: RerankMode,
    calls: Mutex<usize>,
}

impl FixedReranker {
    fn with_mode(mode: RerankMode) -> Self {
        Self {
            mode,
            calls: Mutex::new(0),
        }
    }

    pub fn uniform(score: f32) -> Self {
        Self::with_mode(RerankMode::Uniform(score))
    }

    /// First needle contained in a text decides its score; others get 0
    pub fn by_content(scores: &[(&str, f32)]) -> Self {
        Self::with_mode(RerankMode::ByContent(
            scores.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
        ))
    }

    pub fn failing() -> Self {
        Self::with_mode(RerankMode::Failing)
    }

    /// Returns one score fewer than requested
    pub fn wrong_length() -> Self {
        Self::with_mode(RerankMode::WrongLength)
    }

    pub fn call_count(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl Reranker for FixedReranker {
    async fn score(&self, _query: &str, texts: &[&str]) -> Result<Vec<f32>, ServiceError> {
        *lock(&self.calls) += 1;
        match &self.mode {
            RerankMode::Uniform(score) => Ok(vec![*score; texts.len()]),
            RerankMode::ByContent(table) => Ok(texts
                .iter()
                .map(|text| {
                    table
                        .iter()
                        .find(|(needle, _)| text.contains(needle.as_str()))
                        .map(|(_, s)| *s)
                        .unwrap_or(0.0)
                })
                .collect()),
            RerankMode::Failing => Err(ServiceError::RerankUnavailable(
                "scripted outage".to_string(),
            )),
            RerankMode::WrongLength => Ok(vec![0.5; texts.len().saturating_sub(1)]),
        }
    }
}

/// Doubles bundled with the [`Services`] view the engine consumes
pub struct Doubles {
    pub reasoner: Arc<ScriptedReasoner>,
    pub search: Arc<StaticSearch>,
    pub reranker: Arc<FixedReranker>,
}

impl Doubles {
    pub fn new(reasoner: ScriptedReasoner, search: StaticSearch, reranker: FixedReranker) -> Self {
        Self {
            reasoner: Arc::new(reasoner),
            search: Arc::new(search),
            reranker: Arc::new(reranker),
        }
    }

    pub fn services(&self) -> Services {
        Services::new(
            self.reasoner.clone(),
            self.search.clone(),
            self.reranker.clone(),
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub fn hit(id: &str, content: &str, similarity: f32) -> SearchHit {
    SearchHit {
        id: id.to_string(),
        content: content.to_string(),
        metadata: Metadata::new(),
        similarity,
    }
}

/// `n` hits `{prefix}-1..n` with descending similarity
pub fn hits(prefix: &str, n: usize) -> Vec<SearchHit> {
    (1..=n)
        .map(|i| {
            hit(
                &format!("{}-{}", prefix, i),
                &format!("{} passage {}", prefix, i),
                1.0 - i as f32 * 0.05,
            )
        })
        .collect()
}

pub fn doc(id: &str, content: &str) -> Document {
    Document::new(id, content)
}

pub fn route_json(requires_retrieval: bool, complexity: &str) -> Value {
    json!({
        "category": if requires_retrieval { "policy" } else { "general_conversation" },
        "complexity": complexity,
        "requires_retrieval": requires_retrieval,
        "suggested_strategy": if requires_retrieval { "direct" } else { "conversational" },
        "confidence": 0.9,
        "reasoning": "scripted"
    })
}

pub fn plan_json(actions: &[&str]) -> Value {
    let steps: Vec<Value> = actions
        .iter()
        .enumerate()
        .map(|(i, action)| {
            json!({
                "step": i + 1,
                "action": action,
                "target": format!("target {}", i + 1),
                "description": format!("{} step", action)
            })
        })
        .collect();
    json!({ "plan_type": "multi_step", "plan": steps, "expected_iterations": 1 })
}

/// `score` is f64 so the JSON carries the literal as written
pub fn grade_json(is_relevant: bool, score: f64) -> Value {
    json!({
        "is_relevant": is_relevant,
        "relevance_score": score,
        "reasoning": "scripted",
        "key_points": if is_relevant { vec!["covers the question"] } else { vec![] }
    })
}

pub fn validation_json(is_valid: bool, recommendation: &str, quality: &str) -> Value {
    let score = if is_valid { 0.9 } else { 0.4 };
    json!({
        "grounded": { "score": score, "is_acceptable": is_valid, "issues": [] },
        "complete": { "score": score, "is_acceptable": is_valid, "missing": [] },
        "useful": { "score": score, "is_acceptable": is_valid },
        "accurate": { "score": score, "is_acceptable": is_valid, "errors": [] },
        "clarity": { "score": score, "is_acceptable": is_valid },
        "overall_quality": quality,
        "is_valid": is_valid,
        "recommendation": recommendation,
        "reasoning": "scripted"
    })
}

pub fn queries_json(queries: &[&str]) -> Value {
    json!({ "queries": queries })
}
