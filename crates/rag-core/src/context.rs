//! Execution Context: estado compartilhado de uma consulta
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::data_model::{DocumentSet, Route, Step, Turn, ValidationResult};
use crate::error::RagError;
use crate::trace::{EntryOutcome, StageName, Trace};

/// Per-query state. Owned by exactly one run; stages receive it by
/// `&mut` and fill in their slot. The query and history are fixed at
/// construction and the trace only grows.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub trace_id: String,
    query: String,
    history: Vec<Turn>,
    pub route: Option<Route>,
    pub plan: Option<Vec<Step>>,
    pub retrieved: DocumentSet,
    pub graded: DocumentSet,
    pub answer: Option<String>,
    pub validation: Option<ValidationResult>,
    trace: Trace,
    pub metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(query: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            history,
            route: None,
            plan: None,
            retrieved: DocumentSet::new(),
            graded: DocumentSet::new(),
            answer: None,
            validation: None,
            trace: Trace::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn record(
        &mut self,
        stage: StageName,
        action: impl Into<String>,
        outcome: EntryOutcome,
        summary: Value,
    ) {
        self.trace.record(stage, action, outcome, summary);
    }

    /// Trace entry for a failed invocation; the error kind and message go
    /// into the summary.
    pub fn record_failure(
        &mut self,
        stage: StageName,
        action: impl Into<String>,
        outcome: EntryOutcome,
        err: &RagError,
    ) {
        self.trace.record(
            stage,
            action,
            outcome,
            json!({ "error": err.kind(), "message": err.to_string() }),
        );
    }

    pub fn require_route(&self) -> Result<&Route, RagError> {
        self.route.as_ref().ok_or(RagError::MissingState("route"))
    }

    /// Current answer, ignoring empty or whitespace-only text
    pub fn answer_text(&self) -> Option<&str> {
        self.answer
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }
}
