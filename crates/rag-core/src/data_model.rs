//! Data Model: Route, Step, Document, ValidationResult, QueryResult
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::trace::TraceEntry;

/// Free-form document / step metadata
pub type Metadata = Map<String, Value>;

// ============================================================================
// CONVERSATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One prior conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

// ============================================================================
// ROUTE
// ============================================================================

/// Unknown or missing values read as `Complex`, which sends the query to
/// the model-planned path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Complexity {
    Simple,
    Medium,
    #[default]
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

impl From<String> for Complexity {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "simple" => Self::Simple,
            "medium" => Self::Medium,
            _ => Self::Complex,
        }
    }
}

impl From<Complexity> for String {
    fn from(value: Complexity) -> Self {
        value.as_str().to_string()
    }
}

/// Query category as reported by the classifier. Values outside the known
/// set are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    ProductInfo,
    Policy,
    OrderTracking,
    TechnicalSupport,
    Shipping,
    GeneralConversation,
    OutOfScope,
    Other(String),
}

impl Default for Category {
    fn default() -> Self {
        Self::Other("unspecified".to_string())
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "product_info" => Self::ProductInfo,
            "policy" => Self::Policy,
            "order_tracking" => Self::OrderTracking,
            "technical_support" => Self::TechnicalSupport,
            "shipping" => Self::Shipping,
            "general_conversation" => Self::GeneralConversation,
            "out_of_scope" => Self::OutOfScope,
            _ => Self::Other(value),
        }
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        match value {
            Category::ProductInfo => "product_info".to_string(),
            Category::Policy => "policy".to_string(),
            Category::OrderTracking => "order_tracking".to_string(),
            Category::TechnicalSupport => "technical_support".to_string(),
            Category::Shipping => "shipping".to_string(),
            Category::GeneralConversation => "general_conversation".to_string(),
            Category::OutOfScope => "out_of_scope".to_string(),
            Category::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Strategy {
    Direct,
    MultiHop,
    Comparison,
    Conversational,
    Other(String),
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Direct
    }
}

impl From<String> for Strategy {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Self::Direct,
            "multi_hop" => Self::MultiHop,
            "comparison" => Self::Comparison,
            "conversational" => Self::Conversational,
            _ => Self::Other(value),
        }
    }
}

impl From<Strategy> for String {
    fn from(value: Strategy) -> Self {
        match value {
            Strategy::Direct => "direct".to_string(),
            Strategy::MultiHop => "multi_hop".to_string(),
            Strategy::Comparison => "comparison".to_string(),
            Strategy::Conversational => "conversational".to_string(),
            Strategy::Other(other) => other,
        }
    }
}

/// Classifier output. Only `requires_retrieval` is mandatory; a response
/// without it does not parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub complexity: Complexity,
    pub requires_retrieval: bool,
    #[serde(default, alias = "suggested_strategy")]
    pub strategy: Strategy,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Route {
    /// Clamp model-reported confidence into [0, 1]
    pub fn normalized(mut self) -> Self {
        self.confidence = clamp_unit(self.confidence);
        self
    }
}

// ============================================================================
// PLAN
// ============================================================================

/// Closed vocabulary of plan actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Retrieve,
    Grade,
    Generate,
    Compare,
    Synthesize,
    Validate,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Retrieve,
        Action::Grade,
        Action::Generate,
        Action::Compare,
        Action::Synthesize,
        Action::Validate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieve => "retrieve",
            Self::Grade => "grade",
            Self::Generate => "generate",
            Self::Compare => "compare",
            Self::Synthesize => "synthesize",
            Self::Validate => "validate",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown plan action `{0}`")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Target and description shared by every step kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StepInfo {
    pub fn targeting(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieveParams {
    /// Candidates per search string; the retriever default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    /// Ask the reasoner to decompose the step into several search strings
    #[serde(default)]
    pub multi_query: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Metadata>,
}

/// One plan step. Parameters are typed per action; the wire form is the
/// flat `{action, target, description, params}` object ([`RawStep`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub enum Step {
    Retrieve {
        info: StepInfo,
        params: RetrieveParams,
    },
    Grade(StepInfo),
    Generate(StepInfo),
    Compare(StepInfo),
    Synthesize(StepInfo),
    Validate(StepInfo),
}

impl Step {
    pub fn retrieve(target: impl Into<String>, top_k: Option<usize>) -> Self {
        Step::Retrieve {
            info: StepInfo::targeting(target),
            params: RetrieveParams {
                top_k,
                ..RetrieveParams::default()
            },
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Step::Retrieve { .. } => Action::Retrieve,
            Step::Grade(_) => Action::Grade,
            Step::Generate(_) => Action::Generate,
            Step::Compare(_) => Action::Compare,
            Step::Synthesize(_) => Action::Synthesize,
            Step::Validate(_) => Action::Validate,
        }
    }

    pub fn info(&self) -> &StepInfo {
        match self {
            Step::Retrieve { info, .. } => info,
            Step::Grade(info)
            | Step::Generate(info)
            | Step::Compare(info)
            | Step::Synthesize(info)
            | Step::Validate(info) => info,
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.info().target.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.info().description.as_deref()
    }
}

/// Untyped plan step as proposed by the reasoner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStep {
    pub action: String,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Metadata,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub multi_query: bool,
}

impl TryFrom<RawStep> for Step {
    type Error = UnknownAction;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let action: Action = raw.action.parse()?;
        let info = StepInfo {
            target: raw.target.filter(|t| !t.trim().is_empty()),
            description: raw.description,
        };

        Ok(match action {
            Action::Retrieve => {
                let top_k = raw
                    .params
                    .get("top_k")
                    .and_then(Value::as_u64)
                    .map(|k| k as usize)
                    .filter(|k| *k > 0);
                let multi_query = raw.multi_query
                    || raw
                        .params
                        .get("multi_query")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                let filter = raw
                    .params
                    .get("filter")
                    .and_then(Value::as_object)
                    .cloned();
                Step::Retrieve {
                    info,
                    params: RetrieveParams {
                        top_k,
                        multi_query,
                        filter,
                    },
                }
            }
            Action::Grade => Step::Grade(info),
            Action::Generate => Step::Generate(info),
            Action::Compare => Step::Compare(info),
            Action::Synthesize => Step::Synthesize(info),
            Action::Validate => Step::Validate(info),
        })
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        let action = step.action().as_str().to_string();
        match step {
            Step::Retrieve { info, params } => {
                let mut map = Metadata::new();
                if let Some(top_k) = params.top_k {
                    map.insert("top_k".to_string(), Value::from(top_k));
                }
                if params.multi_query {
                    map.insert("multi_query".to_string(), Value::Bool(true));
                }
                if let Some(filter) = params.filter {
                    map.insert("filter".to_string(), Value::Object(filter));
                }
                RawStep {
                    action,
                    target: info.target,
                    description: info.description,
                    params: map,
                    multi_query: false,
                }
            }
            Step::Grade(info)
            | Step::Generate(info)
            | Step::Compare(info)
            | Step::Synthesize(info)
            | Step::Validate(info) => RawStep {
                action,
                target: info.target,
                description: info.description,
                params: Metadata::new(),
                multi_query: false,
            },
        }
    }
}

/// Accept a string, or stringify any other JSON scalar/array the model emits.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ============================================================================
// DOCUMENTS
// ============================================================================

/// Grader annotation attached to a kept document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grading {
    #[serde(default)]
    pub is_relevant: bool,
    #[serde(default)]
    pub relevance_score: f32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Similarity reported by the search service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grading: Option<Grading>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
            similarity: None,
            relevance_score: None,
            rerank_score: None,
            grading: None,
        }
    }

    pub fn key_points(&self) -> &[String] {
        self.grading
            .as_ref()
            .map(|g| g.key_points.as_slice())
            .unwrap_or_default()
    }
}

/// Ordered document set keyed by id. The first occurrence of an id wins and
/// insertion order is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSet {
    docs: Vec<Document>,
    index: HashMap<String, usize>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the id is already present. Returns whether it was added.
    pub fn insert(&mut self, doc: Document) -> bool {
        if self.index.contains_key(&doc.id) {
            return false;
        }
        self.index.insert(doc.id.clone(), self.docs.len());
        self.docs.push(doc);
        true
    }

    /// Stable merge; returns how many new documents were added
    pub fn merge<I>(&mut self, docs: I) -> usize
    where
        I: IntoIterator<Item = Document>,
    {
        let mut added = 0;
        for doc in docs {
            if self.insert(doc) {
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.index.get(id).and_then(|&i| self.docs.get(i))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.docs.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.docs.iter()
    }

    pub fn as_slice(&self) -> &[Document] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn into_vec(self) -> Vec<Document> {
        self.docs
    }
}

impl FromIterator<Document> for DocumentSet {
    fn from_iter<T: IntoIterator<Item = Document>>(iter: T) -> Self {
        let mut set = DocumentSet::new();
        set.merge(iter);
        set
    }
}

impl<'a> IntoIterator for &'a DocumentSet {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.iter()
    }
}

impl Serialize for DocumentSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.docs.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DocumentSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let docs = Vec::<Document>::deserialize(deserializer)?;
        Ok(docs.into_iter().collect())
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub is_acceptable: bool,
    #[serde(default, alias = "missing", alias = "errors")]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallQuality {
    Excellent,
    Good,
    Acceptable,
    NeedsImprovement,
    Poor,
    #[default]
    #[serde(other)]
    Unknown,
}

impl OverallQuality {
    /// Ordinal used to compare judgments (higher is better)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Excellent => 4,
            Self::Good => 3,
            Self::Acceptable | Self::NeedsImprovement => 2,
            Self::Poor => 1,
            Self::Unknown => 0,
        }
    }

    pub fn is_good_or_better(&self) -> bool {
        matches!(self, Self::Excellent | Self::Good)
    }
}

/// What the validator wants the orchestrator to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Regenerate,
    RetrieveMore,
    ClarifyQuery,
    #[default]
    #[serde(other)]
    Unrecognized,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Regenerate => "regenerate",
            Self::RetrieveMore => "retrieve_more",
            Self::ClarifyQuery => "clarify_query",
            Self::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounded: Option<DimensionScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<DimensionScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub useful: Option<DimensionScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accurate: Option<DimensionScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarity: Option<DimensionScore>,
    #[serde(default)]
    pub overall_quality: OverallQuality,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub recommendation: Recommendation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    /// Locally computed notes; never affect `is_valid`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl ValidationResult {
    /// Synthetic "invalid, regenerate" judgment used when there is nothing
    /// to validate or the validator could not be reached.
    pub fn rejected(issue: impl Into<String>) -> Self {
        Self {
            overall_quality: OverallQuality::Poor,
            is_valid: false,
            recommendation: Recommendation::Regenerate,
            issues: vec![issue.into()],
            ..Self::default()
        }
    }

    pub fn dimensions(&self) -> [(&'static str, Option<&DimensionScore>); 5] {
        [
            ("grounded", self.grounded.as_ref()),
            ("complete", self.complete.as_ref()),
            ("useful", self.useful.as_ref()),
            ("accurate", self.accurate.as_ref()),
            ("clarity", self.clarity.as_ref()),
        ]
    }

    /// Clamp every dimension score into [0, 1]
    pub fn normalized(mut self) -> Self {
        for dim in [
            &mut self.grounded,
            &mut self.complete,
            &mut self.useful,
            &mut self.accurate,
            &mut self.clarity,
        ]
        .into_iter()
        .flatten()
        {
            dim.score = clamp_unit(dim.score);
        }
        self
    }
}

// ============================================================================
// QUERY RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `max_iterations` execute+validate cycles ran without acceptance
    BudgetExhausted,
    /// Recommendation outside {accept, regenerate, retrieve_more}
    NotActionable,
    /// An execution produced no answer
    NoAnswer,
    GenerationFailed,
}

/// How a query terminated; degraded answers are labeled `BestEffort`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Conversational,
    Accepted { iteration: u32 },
    BestEffort { reason: StopReason },
    Linear,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversational => "conversational",
            Self::Accepted { .. } => "accepted",
            Self::BestEffort { .. } => "best_effort",
            Self::Linear => "linear",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub trace_id: String,
    pub query: String,
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<Step>>,
    pub sources: Vec<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    pub iterations: u32,
    pub outcome: Outcome,
    pub trace: Vec<TraceEntry>,
}

impl QueryResult {
    pub fn is_degraded(&self) -> bool {
        matches!(self.outcome, Outcome::BestEffort { .. })
    }
}

pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
