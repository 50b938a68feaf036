//! Provider-agnostic core for `briefpipe`.
//!
//! This crate intentionally contains no IO: it defines the research data
//! model, the error taxonomy, schema validation, JSON candidate extraction,
//! SSE frame parsing, and the sequential stage runner. Provider clients and
//! the concrete pipeline live in `briefpipe-local`.

pub mod candidates;
pub mod pipeline;
pub mod schema;
pub mod sse;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("deep research failed: {0}")]
    DeepResearch(String),
    #[error("agent failed: {0}")]
    Agent(String),
    #[error("stream failed: {0}")]
    Stream(String),
    #[error("schema mismatch: {0}")]
    Schema(String),
    #[error("pipeline failed: {0}")]
    Pipeline(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error taxonomy surfaced to callers: client input problems,
/// missing configuration, and upstream/runtime failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Configuration,
    Runtime,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Input(_) => ErrorKind::Input,
            Error::NotConfigured(_) => ErrorKind::Configuration,
            Error::Search(_)
            | Error::DeepResearch(_)
            | Error::Agent(_)
            | Error::Stream(_)
            | Error::Schema(_)
            | Error::Pipeline(_) => ErrorKind::Runtime,
        }
    }
}

/// Raw inbound request. Every field is optional; normalization derives the
/// effective query, focus tags, and result count.
///
/// `focus` and `max_results` stay untyped because callers send them in
/// several shapes (string vs. array, integer vs. float); normalization does
/// the coercion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hq_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<Value>,
}

/// Normalized request context echoed back in the pipeline output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<Vec<String>>,
    pub top_k: usize,
}

/// One discovered source. Created once per raw provider hit and immutable
/// afterwards. `title` is never empty: normalization falls back to the
/// hostname or a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

/// The search provider's response after normalization. Result order is the
/// provider's return order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub answer: String,
    pub results: Vec<SearchResult>,
    pub usage: Option<Value>,
}

/// Validated deep-research output. `raw` holds the cleaned payload
/// re-serialized for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepResearchFinding {
    pub summary: String,
    pub insights: Vec<String>,
    pub sources: Vec<SearchResult>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReActStep {
    pub thought: String,
    pub action: String,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub label: String,
    pub value: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSection {
    pub title: String,
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiligenceQuestion {
    pub question: String,
    pub why_it_matters: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchItem {
    pub title: String,
    pub detail: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    pub industry: String,
    pub headquarters_location: String,
    pub latest_filing: String,
    pub fiscal_period: String,
    pub summary_hook: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickStat {
    pub label: String,
    pub value: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Takeaway {
    pub title: String,
    pub detail: String,
    pub source: String,
}

/// Validated output of the first (research) agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResearchPayload {
    pub reasoning_trace: Vec<ReActStep>,
    pub profile: CompanyProfile,
    pub metric_sections: Vec<MetricSection>,
    pub diligence_questions: Vec<DiligenceQuestion>,
    pub watch_items: Vec<WatchItem>,
}

/// The summarization call's briefing view, without its reasoning trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub hero_headline: String,
    pub hero_subheadline: String,
    pub quick_stats: Vec<QuickStat>,
    pub key_takeaways: Vec<Takeaway>,
    pub scoreboard: Vec<MetricSection>,
    pub diligence_questions: Vec<DiligenceQuestion>,
    pub next_actions: Vec<String>,
}

/// Validated output of the second (summarization) agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummaryPayload {
    pub reasoning_trace: Vec<ReActStep>,
    #[serde(flatten)]
    pub summary: AgentSummary,
}

/// Canonical serializations of the two validated agent payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRawOutput {
    pub research: String,
    pub summary: String,
}

/// Combined result of the two-call agent workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub research_trace: Vec<ReActStep>,
    pub summary_trace: Vec<ReActStep>,
    pub profile: CompanyProfile,
    pub metric_sections: Vec<MetricSection>,
    pub watch_items: Vec<WatchItem>,
    pub diligence_questions: Vec<DiligenceQuestion>,
    pub summary: AgentSummary,
    pub raw: AgentRawOutput,
}

/// Final pipeline snapshot. For each best-effort stage that ran, exactly one
/// of the result/error pair is non-null; a skipped stage leaves both null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub context: RequestContext,
    pub search: SearchResponse,
    pub deep_research: Option<DeepResearchFinding>,
    pub deep_research_error: Option<String>,
    pub agent: Option<AgentResult>,
    pub agent_error: Option<String>,
}

/// Capability seam for the mandatory search stage.
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, ctx: &RequestContext) -> Result<SearchResponse>;
}
