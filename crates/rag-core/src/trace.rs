//! Trace: registro append-only de cada invocação de estágio
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Classifier,
    Planner,
    Retriever,
    Grader,
    Generator,
    Validator,
    Orchestrator,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classifier => "classifier",
            Self::Planner => "planner",
            Self::Retriever => "retriever",
            Self::Grader => "grader",
            Self::Generator => "generator",
            Self::Validator => "validator",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Ok,
    Skipped,
    /// Stage failed but the run continued on the state it already had
    Degraded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub stage: StageName,
    pub action: String,
    pub outcome: EntryOutcome,
    pub summary: Value,
}

/// Ordered record of stage invocations. Entries can only be appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        stage: StageName,
        action: impl Into<String>,
        outcome: EntryOutcome,
        summary: Value,
    ) {
        self.entries.push(TraceEntry {
            timestamp: Utc::now(),
            stage,
            action: action.into(),
            outcome,
            summary,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    /// Number of entries recorded by `stage`
    pub fn count(&self, stage: StageName) -> usize {
        self.entries.iter().filter(|e| e.stage == stage).count()
    }

    /// One line per entry, e.g. `3. retriever/retrieve [ok] {"added":4}`
    pub fn render_summary(&self) -> String {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let outcome = match e.outcome {
                    EntryOutcome::Ok => "ok",
                    EntryOutcome::Skipped => "skipped",
                    EntryOutcome::Degraded => "degraded",
                    EntryOutcome::Failed => "failed",
                };
                format!("{}. {}/{} [{}] {}", i + 1, e.stage, e.action, outcome, e.summary)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_entries(self) -> Vec<TraceEntry> {
        self.entries
    }
}
