//! The research pipeline: Normalize → Search → Deep-Research → Agent →
//! Aggregate, driven by the core stage runner.
//!
//! Search is fatal on failure. Deep-Research and Agent are best-effort:
//! their failures land in the output as sibling error strings and the run
//! continues. Aggregate is a pure merge.

use std::collections::HashSet;

use briefpipe_core::pipeline::{Stage, StageSequence, StageState};
use briefpipe_core::{
    AgentResult, DeepResearchFinding, Error, PipelineOutput, RequestContext, ResearchRequest,
    Result, SearchProvider, SearchResponse,
};
use serde_json::Value;

use crate::agent::{build_agent_prompt, run_agent_workflow, AgentVendorConfig};
use crate::deep_research::DeepResearchClient;
use crate::models::ModelCatalog;
use crate::resolver::{AgentProviderResolver, ProviderResolution};
use crate::search::SearchClient;

const MAX_RESULTS_DEFAULT: usize = 6;
const MAX_RESULTS_CAP: usize = 12;
const MIN_RESULTS: usize = 1;

/// Shared handle passed into every run: one HTTP client plus the two
/// process-wide caches. Cheap to clone; constructed once at startup so the
/// caches are injected dependencies rather than hidden globals.
#[derive(Clone, Default)]
pub struct ResearchRuntime {
    client: reqwest::Client,
    resolver: AgentProviderResolver,
    models: ModelCatalog,
}

impl ResearchRuntime {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            resolver: AgentProviderResolver::new(),
            models: ModelCatalog::new(),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn resolver(&self) -> &AgentProviderResolver {
        &self.resolver
    }

    pub fn model_catalog(&self) -> &ModelCatalog {
        &self.models
    }
}

/// Accumulated state of one run. Stages only ever add fields; each field is
/// written by exactly one stage.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub body: ResearchRequest,
    pub context: Option<RequestContext>,
    pub search: Option<SearchResponse>,
    pub deep_research: Option<DeepResearchFinding>,
    pub deep_research_error: Option<String>,
    pub agent: Option<AgentResult>,
    pub agent_error: Option<String>,
    pub output: Option<PipelineOutput>,
}

impl StageState for PipelineState {
    fn record_stage_error(&mut self, stage: &'static str, message: String) {
        match stage {
            "deep-research" => self.deep_research_error = Some(message),
            "agent" => self.agent_error = Some(message),
            other => {
                // Only best-effort stages reach here; anything else is a
                // wiring bug and must stay visible.
                tracing::error!(stage = other, %message, "error from unregistered stage");
            }
        }
    }
}

/// Run the full pipeline for one request.
pub async fn run_research_pipeline(
    runtime: &ResearchRuntime,
    body: ResearchRequest,
) -> Result<PipelineOutput> {
    let resolution = runtime.resolver.resolve(&runtime.client).await;
    if let Some(reason) = resolution.reason.as_deref() {
        tracing::info!(reason, "agent stage will be skipped");
    }

    let mut state = PipelineState {
        body,
        ..Default::default()
    };
    let sequence = StageSequence::from(build_stages(runtime.clone(), resolution));
    sequence.run(&mut state).await?;

    state
        .output
        .ok_or_else(|| Error::Pipeline("run finished without an aggregated output".to_string()))
}

fn build_stages(
    runtime: ResearchRuntime,
    resolution: ProviderResolution,
) -> Vec<Stage<PipelineState>> {
    let search_rt = runtime.clone();
    let deep_rt = runtime.clone();
    let agent_rt = runtime;

    vec![
        Stage::fatal(
            "normalize",
            Box::new(|state: &mut PipelineState| Box::pin(normalize_stage(state))),
        ),
        Stage::fatal(
            "search",
            Box::new(move |state: &mut PipelineState| {
                let rt = search_rt.clone();
                Box::pin(async move { search_stage(rt, state).await })
            }),
        ),
        Stage::best_effort(
            "deep-research",
            Box::new(move |state: &mut PipelineState| {
                let rt = deep_rt.clone();
                Box::pin(async move { deep_research_stage(rt, state).await })
            }),
        ),
        Stage::best_effort(
            "agent",
            Box::new(move |state: &mut PipelineState| {
                let rt = agent_rt.clone();
                let resolution = resolution.clone();
                Box::pin(async move { agent_stage(rt, resolution, state).await })
            }),
        ),
        Stage::fatal(
            "aggregate",
            Box::new(|state: &mut PipelineState| Box::pin(aggregate_stage(state))),
        ),
    ]
}

async fn normalize_stage(state: &mut PipelineState) -> Result<()> {
    state.body = normalize_body(&state.body);
    let query = build_query(&state.body);
    if query.is_empty() {
        return Err(Error::Input(
            "a query, company name, or topic must be provided".to_string(),
        ));
    }
    state.context = Some(RequestContext {
        query,
        focus: normalize_focus(state.body.focus.as_ref()),
        top_k: clamp_results(state.body.max_results.as_ref()),
    });
    Ok(())
}

async fn search_stage(runtime: ResearchRuntime, state: &mut PipelineState) -> Result<()> {
    let provider = SearchClient::from_env(runtime.client.clone())?;
    let ctx = require_context(state)?;
    let response = provider.search(ctx).await?;
    tracing::debug!(
        provider = provider.name(),
        results = response.results.len(),
        "search stage complete"
    );
    state.search = Some(response);
    Ok(())
}

async fn deep_research_stage(runtime: ResearchRuntime, state: &mut PipelineState) -> Result<()> {
    let client = match DeepResearchClient::from_env(runtime.client.clone()) {
        Ok(client) => client,
        Err(Error::NotConfigured(reason)) => {
            // Unconfigured means skipped, not failed: both slots stay null.
            tracing::debug!(%reason, "deep research not configured; skipping");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let ctx = require_context(state)?;
    let search = state
        .search
        .as_ref()
        .ok_or_else(|| Error::Pipeline("deep research ran before search".to_string()))?;
    let finding = client.research(ctx, search, &runtime.models).await?;
    state.deep_research = Some(finding);
    Ok(())
}

async fn agent_stage(
    runtime: ResearchRuntime,
    resolution: ProviderResolution,
    state: &mut PipelineState,
) -> Result<()> {
    let Some(vendor) = resolution.vendor else {
        // No resolved vendor: the stage is skipped silently and the
        // resolver's reason stays out of the output (see doctor).
        return Ok(());
    };
    let cfg = AgentVendorConfig::from_env(vendor)?;
    let search = state
        .search
        .as_ref()
        .ok_or_else(|| Error::Pipeline("agent ran before search".to_string()))?;
    let prompt = build_agent_prompt(&state.body, search, state.deep_research.as_ref());
    let result = run_agent_workflow(&runtime.client, &cfg, &prompt).await?;
    state.agent = Some(result);
    Ok(())
}

async fn aggregate_stage(state: &mut PipelineState) -> Result<()> {
    let context = state
        .context
        .clone()
        .ok_or_else(|| Error::Pipeline("aggregate ran before normalize".to_string()))?;
    let search = state
        .search
        .clone()
        .ok_or_else(|| Error::Pipeline("aggregate ran before search".to_string()))?;
    state.output = Some(PipelineOutput {
        context,
        search,
        deep_research: state.deep_research.clone(),
        deep_research_error: state.deep_research_error.clone(),
        agent: state.agent.clone(),
        agent_error: state.agent_error.clone(),
    });
    Ok(())
}

fn require_context(state: &PipelineState) -> Result<&RequestContext> {
    state
        .context
        .as_ref()
        .ok_or_else(|| Error::Pipeline("stage ran before normalize".to_string()))
}

fn normalize_body(body: &ResearchRequest) -> ResearchRequest {
    ResearchRequest {
        company: normalize_string(body.company.as_deref()),
        topic: normalize_string(body.topic.as_deref()),
        industry: normalize_string(body.industry.as_deref()),
        hq_location: normalize_string(body.hq_location.as_deref()),
        focus: body.focus.clone(),
        query: normalize_string(body.query.as_deref()),
        max_results: body.max_results.clone(),
    }
}

fn normalize_string(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Derive the effective query: an explicit `query` wins; otherwise the
/// descriptive fields are joined into one labeled string.
fn build_query(body: &ResearchRequest) -> String {
    if let Some(query) = body.query.as_deref() {
        return query.to_string();
    }
    let mut segments: Vec<String> = Vec::new();
    if let Some(company) = body.company.as_deref() {
        segments.push(format!("Company: {company}"));
    }
    if let Some(topic) = body.topic.as_deref() {
        segments.push(format!("Topic: {topic}"));
    }
    if let Some(industry) = body.industry.as_deref() {
        segments.push(format!("Industry: {industry}"));
    }
    if let Some(hq) = body.hq_location.as_deref() {
        segments.push(format!("HQ: {hq}"));
    }
    segments.join(". ").trim().to_string()
}

/// Focus tags: trimmed, non-empty, deduplicated preserving first
/// occurrence. A bare string becomes a single tag.
fn normalize_focus(value: Option<&Value>) -> Option<Vec<String>> {
    match value {
        Some(Value::Array(items)) => {
            let mut seen: HashSet<String> = HashSet::new();
            let cleaned: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .filter(|s| seen.insert(s.clone()))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(cleaned)
            }
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(vec![trimmed.to_string()])
            }
        }
        _ => None,
    }
}

/// Clamp the requested result count into `[1, 12]`, flooring fractional
/// values; absent or unusable values get the default.
fn clamp_results(value: Option<&Value>) -> usize {
    match value.and_then(Value::as_f64) {
        Some(n) if n.is_finite() && n >= MIN_RESULTS as f64 => {
            (n.floor() as usize).clamp(MIN_RESULTS, MAX_RESULTS_CAP)
        }
        _ => MAX_RESULTS_DEFAULT,
    }
}
