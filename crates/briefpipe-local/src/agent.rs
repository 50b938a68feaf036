//! Structured agent workflow.
//!
//! Two sequential chat-completions calls through the resolved vendor: a
//! research call that mines the gathered evidence into a typed diligence
//! payload, then a summarization call that is handed the research
//! transcript and produces the briefing view. Both calls pin temperature to
//! zero and validate the model text against a declared shape before
//! trusting it.

use briefpipe_core::candidates::json_candidates;
use briefpipe_core::schema::{describe, validate, Shape};
use briefpipe_core::{
    AgentRawOutput, AgentResearchPayload, AgentResult, AgentSummaryPayload, DeepResearchFinding,
    Error, ResearchRequest, Result, SearchResponse,
};
use serde::Serialize;
use serde_json::Value;

use crate::resolver::{groq_api_key_from_env, openai_api_key_from_env, AgentVendor};
use crate::{env, preview, timeout_ms_from_env};

#[derive(Debug, Clone)]
pub struct AgentVendorConfig {
    pub vendor: AgentVendor,
    base_url: String,
    api_key: String,
    pub research_model: String,
    pub summary_model: String,
    pub chat_model: String,
}

impl AgentVendorConfig {
    pub fn from_env(vendor: AgentVendor) -> Result<Self> {
        match vendor {
            AgentVendor::OpenAi => {
                let api_key = openai_api_key_from_env().ok_or_else(|| {
                    Error::NotConfigured(
                        "missing BRIEFPIPE_OPENAI_API_KEY (or OPENAI_API_KEY)".to_string(),
                    )
                })?;
                Ok(Self {
                    vendor,
                    base_url: env("BRIEFPIPE_OPENAI_BASE_URL")
                        .unwrap_or_else(|| "https://api.openai.com".to_string()),
                    api_key,
                    research_model: env("BRIEFPIPE_OPENAI_RESEARCH_MODEL")
                        .unwrap_or_else(|| "gpt-5-mini".to_string()),
                    summary_model: env("BRIEFPIPE_OPENAI_SUMMARY_MODEL")
                        .unwrap_or_else(|| "gpt-5".to_string()),
                    chat_model: env("BRIEFPIPE_OPENAI_CHAT_MODEL")
                        .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                })
            }
            AgentVendor::Groq => {
                let api_key = groq_api_key_from_env().ok_or_else(|| {
                    Error::NotConfigured(
                        "missing BRIEFPIPE_GROQ_API_KEY (or GROQ_API_KEY)".to_string(),
                    )
                })?;
                let default_model = "llama-3.3-70b-versatile".to_string();
                Ok(Self {
                    vendor,
                    base_url: env("BRIEFPIPE_GROQ_BASE_URL")
                        .unwrap_or_else(|| "https://api.groq.com/openai".to_string()),
                    api_key,
                    research_model: env("BRIEFPIPE_GROQ_RESEARCH_MODEL")
                        .unwrap_or_else(|| default_model.clone()),
                    summary_model: env("BRIEFPIPE_GROQ_SUMMARY_MODEL")
                        .unwrap_or_else(|| default_model.clone()),
                    chat_model: env("BRIEFPIPE_GROQ_CHAT_MODEL").unwrap_or(default_model),
                })
            }
        }
    }

    pub(crate) fn endpoint_chat_completions(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
}

/// One non-streaming chat-completions call; returns the first choice's
/// content.
async fn chat(
    client: &reqwest::Client,
    cfg: &AgentVendorConfig,
    model: &str,
    messages: &[ChatMessage],
) -> Result<String> {
    let timeout_ms = timeout_ms_from_env("BRIEFPIPE_AGENT_TIMEOUT_MS", 60_000);
    let req = ChatCompletionsRequest {
        model,
        messages,
        temperature: 0.0,
    };

    let resp = client
        .post(cfg.endpoint_chat_completions())
        .header(reqwest::header::AUTHORIZATION, cfg.bearer())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .json(&req)
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(|e| Error::Agent(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Agent(format!(
            "{} chat.completions HTTP {status}: {}",
            cfg.vendor.as_str(),
            preview(&body, 400)
        )));
    }

    let data: Value = resp.json().await.map_err(|e| Error::Agent(e.to_string()))?;
    let content = data
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if content.is_empty() {
        return Err(Error::Agent(format!(
            "{} response did not contain any content",
            cfg.vendor.as_str()
        )));
    }
    Ok(content.to_string())
}

struct AgentSpec {
    name: &'static str,
    instructions: String,
    shape: Shape,
}

/// Issue one structured call: inject the shape hint into the system
/// message, then parse candidates from the response until one validates.
async fn run_structured(
    client: &reqwest::Client,
    cfg: &AgentVendorConfig,
    model: &str,
    spec: &AgentSpec,
    conversation: &[ChatMessage],
) -> Result<Value> {
    let system = format!(
        "{}\n\nReturn ONLY valid JSON that strictly matches the schema below. Do not include extra prose.\n{}",
        spec.instructions,
        describe(&spec.shape)
    );
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage::system(system));
    messages.extend_from_slice(conversation);

    let raw = chat(client, cfg, model, &messages).await?;

    let mut last_error: Option<String> = None;
    for candidate in json_candidates(&raw) {
        let parsed: Value = match serde_json::from_str(&candidate) {
            Ok(v) => v,
            Err(e) => {
                last_error = Some(e.to_string());
                continue;
            }
        };
        match validate(&spec.shape, &parsed) {
            Ok(clean) => return Ok(clean),
            Err(e) => last_error = Some(e.to_string()),
        }
    }
    Err(Error::Agent(format!(
        "failed to parse {} output: {}",
        spec.name,
        last_error.unwrap_or_else(|| "response contained no JSON candidates".to_string())
    )))
}

/// Run the two-call workflow against the resolved vendor.
pub async fn run_agent_workflow(
    client: &reqwest::Client,
    cfg: &AgentVendorConfig,
    prompt: &str,
) -> Result<AgentResult> {
    let research_spec = AgentSpec {
        name: "research agent",
        instructions: research_instructions(),
        shape: research_shape(),
    };
    let mut conversation = vec![ChatMessage::user(prompt)];

    let research_value = run_structured(
        client,
        cfg,
        &cfg.research_model,
        &research_spec,
        &conversation,
    )
    .await?;
    let research: AgentResearchPayload = serde_json::from_value(research_value.clone())
        .map_err(|e| Error::Agent(format!("research payload mismatch: {e}")))?;
    if research.reasoning_trace.is_empty() {
        return Err(Error::Agent(
            "research agent did not provide a reasoning trace".to_string(),
        ));
    }
    let research_text =
        serde_json::to_string(&research_value).map_err(|e| Error::Agent(e.to_string()))?;
    conversation.push(ChatMessage::assistant(research_text.clone()));

    let summary_spec = AgentSpec {
        name: "summarization agent",
        instructions: summary_instructions(),
        shape: summary_shape(),
    };
    let summary_value = run_structured(
        client,
        cfg,
        &cfg.summary_model,
        &summary_spec,
        &conversation,
    )
    .await?;
    let summary: AgentSummaryPayload = serde_json::from_value(summary_value.clone())
        .map_err(|e| Error::Agent(format!("summary payload mismatch: {e}")))?;
    if summary.reasoning_trace.is_empty() {
        return Err(Error::Agent(
            "summarization agent did not provide a reasoning trace".to_string(),
        ));
    }
    let summary_text =
        serde_json::to_string(&summary_value).map_err(|e| Error::Agent(e.to_string()))?;

    Ok(AgentResult {
        research_trace: research.reasoning_trace,
        summary_trace: summary.reasoning_trace,
        profile: research.profile,
        metric_sections: research.metric_sections,
        watch_items: research.watch_items,
        diligence_questions: research.diligence_questions,
        summary: summary.summary,
        raw: AgentRawOutput {
            research: research_text,
            summary: summary_text,
        },
    })
}

/// Assemble the evidence prompt for the research call from the request and
/// the upstream stage results.
pub fn build_agent_prompt(
    body: &ResearchRequest,
    search: &SearchResponse,
    deep_research: Option<&DeepResearchFinding>,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(company) = body.company.as_deref() {
        lines.push(format!("Company: {company}"));
    }
    if let Some(industry) = body.industry.as_deref() {
        lines.push(format!("Industry: {industry}"));
    }
    if let Some(hq) = body.hq_location.as_deref() {
        lines.push(format!("Headquarters: {hq}"));
    }
    if let Some(topic) = body.topic.as_deref() {
        lines.push(format!("Focus topic: {topic}"));
    }

    if !search.answer.is_empty() {
        lines.push(format!("Search synthesis:\n{}", search.answer));
    }
    if !search.results.is_empty() {
        let formatted: Vec<String> = search
            .results
            .iter()
            .take(6)
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "{}. {} — {}",
                    i + 1,
                    r.title,
                    r.url.as_deref().unwrap_or("no url provided")
                )
            })
            .collect();
        lines.push(format!("Key search sources:\n{}", formatted.join("\n")));
    }

    if let Some(finding) = deep_research {
        if !finding.summary.is_empty() {
            lines.push(format!("Deep research synthesis:\n{}", finding.summary));
        }
        if !finding.insights.is_empty() {
            let block: Vec<String> = finding
                .insights
                .iter()
                .take(6)
                .enumerate()
                .map(|(i, insight)| format!("{}. {insight}", i + 1))
                .collect();
            lines.push(format!("Deep research insights:\n{}", block.join("\n")));
        }
        if !finding.sources.is_empty() {
            let block: Vec<String> = finding
                .sources
                .iter()
                .take(6)
                .enumerate()
                .map(|(i, r)| {
                    format!(
                        "{}. {} — {}",
                        i + 1,
                        r.title,
                        r.url.as_deref().unwrap_or("no url provided")
                    )
                })
                .collect();
            lines.push(format!("Deep research sources:\n{}", block.join("\n")));
        }
    }

    lines.push(
        [
            "Produce a finance diligence brief for an investment research group.",
            "Anchor on the latest annual or quarterly filing and specify the fiscal period.",
            "Capture revenue, YoY growth, margin quality, free cash flow, liquidity (cash vs. debt), share count/dilution, and guidance if available.",
            "Surface 2-3 watch items (risks/opportunities) and 3+ diligence questions members can use to pressure-test an investment pitch.",
            "Keep bullets tight. No paragraphs, no marketing fluff.",
        ]
        .join(" "),
    );

    lines.join("\n\n")
}

fn react_instruction_suffix() -> &'static str {
    "Follow the ReAct pattern rigorously. \
     Respond with JSON only using the schema described. Do not wrap the JSON in markdown or code fences. \
     For each entry in \"reasoning_trace\" you must include: \
     \"thought\": your internal reasoning step; \
     \"action\": one of {\"ReviewSearchEvidence\",\"DeriveAttributes\",\"ValidateDetails\",\"ComposeNarrative\"}; \
     \"observation\": the result of that action, referencing evidence with source indices when available (e.g., #1, #2). \
     Begin by reviewing the search synthesis, plan your approach, then derive structured company attributes. \
     Every metric, quick stat, takeaway, watch item, and diligence question must include a \"source\" value that lists the supporting source indices (e.g., \"#1, #3\"). \
     If a value cannot be verified from the provided evidence, return \"Unknown\" and state why in the relevant note. \
     Ensure the final structured fields are fully populated and consistent with observations."
}

fn research_instructions() -> String {
    [
        "You are a finance diligence analyst. Mine the search synthesis and sources for the most recent annual/quarterly filing figures and capital structure facts. Prioritise revenue, year-over-year growth, operating leverage, net income quality, cash versus debt, share issuance, and any footnote landmines.",
        "Populate metric_sections for Growth, Profitability, and Balance Sheet & Liquidity (optionally Valuation) with decisive numbers expressed in billions/millions/percent. Keep each section to four metrics or fewer and note the fiscal period when available.",
        "Keep summary_hook under 20 words and write watch_items + diligence_questions so that analysts can benchmark a live pitch immediately. When data is not confirmed, use 'Unknown (explain why)' rather than guessing.",
        react_instruction_suffix(),
    ]
    .join(" ")
}

fn summary_instructions() -> String {
    [
        "You are the pitch captain for an investment research group. Convert the structured research into a crisp diligence briefing that fits on one slide.",
        "Lead with a headline that makes the presenting analyst the hero. Summaries must spotlight growth, profitability, and balance sheet posture with no fluff.",
        "Limit quick_stats to six items, keep each note under 18 words, and ensure all key_takeaways are finance-grade insights (e.g., guidance shifts, margin swing factors, liquidity runway).",
        "Reuse the research metrics so scoreboard sections stay factual and keep the section titles aligned with Growth, Profitability, Balance Sheet & Liquidity. Diligence questions should make it easy to challenge an investment pitch. Do not invent values; if the research did not confirm something, say 'Unknown'.",
        react_instruction_suffix(),
    ]
    .join(" ")
}

fn react_step_shape() -> Shape {
    Shape::Object(vec![
        ("thought", Shape::String),
        ("action", Shape::String),
        ("observation", Shape::String),
    ])
}

fn metric_shape() -> Shape {
    Shape::Object(vec![
        ("label", Shape::String),
        ("value", Shape::String),
        ("source", Shape::String),
        ("period", Shape::optional(Shape::String)),
        ("trend", Shape::optional(Shape::String)),
        ("note", Shape::optional(Shape::String)),
    ])
}

fn metric_section_shape() -> Shape {
    Shape::Object(vec![
        ("title", Shape::String),
        ("metrics", Shape::array_min(metric_shape(), 1)),
    ])
}

fn diligence_question_shape() -> Shape {
    Shape::Object(vec![
        ("question", Shape::String),
        ("why_it_matters", Shape::String),
        ("source", Shape::String),
    ])
}

fn watch_item_shape() -> Shape {
    Shape::Object(vec![
        ("title", Shape::String),
        ("detail", Shape::String),
        ("source", Shape::String),
    ])
}

pub fn research_shape() -> Shape {
    Shape::Object(vec![
        ("reasoning_trace", Shape::array(react_step_shape())),
        (
            "profile",
            Shape::Object(vec![
                ("company_name", Shape::String),
                ("ticker", Shape::optional(Shape::String)),
                ("industry", Shape::String),
                ("headquarters_location", Shape::String),
                ("latest_filing", Shape::String),
                ("fiscal_period", Shape::String),
                ("summary_hook", Shape::String),
            ]),
        ),
        ("metric_sections", Shape::array_min(metric_section_shape(), 3)),
        (
            "diligence_questions",
            Shape::array_min(diligence_question_shape(), 3),
        ),
        ("watch_items", Shape::array_min(watch_item_shape(), 2)),
    ])
}

pub fn summary_shape() -> Shape {
    Shape::Object(vec![
        ("reasoning_trace", Shape::array(react_step_shape())),
        ("hero_headline", Shape::String),
        ("hero_subheadline", Shape::String),
        (
            "quick_stats",
            Shape::array_min(
                Shape::Object(vec![
                    ("label", Shape::String),
                    ("value", Shape::String),
                    ("source", Shape::String),
                    ("note", Shape::optional(Shape::String)),
                ]),
                3,
            ),
        ),
        (
            "key_takeaways",
            Shape::array_min(
                Shape::Object(vec![
                    ("title", Shape::String),
                    ("detail", Shape::String),
                    ("source", Shape::String),
                ]),
                3,
            ),
        ),
        ("scoreboard", Shape::array_min(metric_section_shape(), 3)),
        (
            "diligence_questions",
            Shape::array_min(diligence_question_shape(), 3),
        ),
        ("next_actions", Shape::array_bounded(Shape::String, 1, 3)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_step() -> Value {
        json!({"thought": "t", "action": "ReviewSearchEvidence", "observation": "o #1"})
    }

    fn sample_metric_section() -> Value {
        json!({"title": "Growth", "metrics": [
            {"label": "Revenue", "value": "$1.2B", "source": "#1", "period": "FY25"}
        ]})
    }

    fn sample_research_value() -> Value {
        json!({
            "reasoning_trace": [sample_step()],
            "profile": {
                "company_name": "Acme Corp",
                "industry": "Widgets",
                "headquarters_location": "Springfield",
                "latest_filing": "10-K",
                "fiscal_period": "FY25",
                "summary_hook": "Steady grower"
            },
            "metric_sections": [sample_metric_section(), sample_metric_section(), sample_metric_section()],
            "diligence_questions": [
                {"question": "q1", "why_it_matters": "w", "source": "#1"},
                {"question": "q2", "why_it_matters": "w", "source": "#1"},
                {"question": "q3", "why_it_matters": "w", "source": "#2"}
            ],
            "watch_items": [
                {"title": "a", "detail": "d", "source": "#1"},
                {"title": "b", "detail": "d", "source": "#2"}
            ]
        })
    }

    #[test]
    fn research_shape_accepts_a_conforming_payload() {
        let clean = validate(&research_shape(), &sample_research_value()).unwrap();
        let payload: AgentResearchPayload = serde_json::from_value(clean).unwrap();
        assert_eq!(payload.profile.company_name, "Acme Corp");
        assert!(payload.profile.ticker.is_none());
        assert_eq!(payload.metric_sections.len(), 3);
    }

    #[test]
    fn research_shape_enforces_section_minimums() {
        let mut v = sample_research_value();
        v["metric_sections"] = json!([sample_metric_section()]);
        let err = validate(&research_shape(), &v).unwrap_err();
        assert!(err.to_string().contains("metric_sections"));
    }

    #[test]
    fn summary_shape_accepts_a_conforming_payload_and_flattens() {
        let v = json!({
            "reasoning_trace": [sample_step()],
            "hero_headline": "H",
            "hero_subheadline": "S",
            "quick_stats": [
                {"label": "Rev", "value": "$1B", "source": "#1"},
                {"label": "FCF", "value": "$0.2B", "source": "#1"},
                {"label": "Cash", "value": "$2B", "source": "#2", "note": "n"}
            ],
            "key_takeaways": [
                {"title": "a", "detail": "d", "source": "#1"},
                {"title": "b", "detail": "d", "source": "#1"},
                {"title": "c", "detail": "d", "source": "#2"}
            ],
            "scoreboard": [sample_metric_section(), sample_metric_section(), sample_metric_section()],
            "diligence_questions": [
                {"question": "q1", "why_it_matters": "w", "source": "#1"},
                {"question": "q2", "why_it_matters": "w", "source": "#1"},
                {"question": "q3", "why_it_matters": "w", "source": "#2"}
            ],
            "next_actions": ["do one thing"]
        });
        let clean = validate(&summary_shape(), &v).unwrap();
        let payload: AgentSummaryPayload = serde_json::from_value(clean).unwrap();
        assert_eq!(payload.summary.hero_headline, "H");
        assert_eq!(payload.summary.next_actions.len(), 1);
        assert_eq!(payload.reasoning_trace.len(), 1);
    }

    #[test]
    fn summary_shape_caps_next_actions() {
        let v = json!(["a", "b", "c", "d"]);
        let err = validate(&Shape::array_bounded(Shape::String, 1, 3), &v).unwrap_err();
        assert!(err.to_string().contains("at most 3"));
    }

    #[test]
    fn vendor_configs_read_their_env() {
        use crate::testutil::EnvGuard;
        let _lock = crate::testutil::ENV_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("BRIEFPIPE_GROQ_API_KEY", "gsk-test");
        let _g2 = EnvGuard::set("BRIEFPIPE_GROQ_BASE_URL", "http://127.0.0.1:1/openai/");
        let cfg = AgentVendorConfig::from_env(AgentVendor::Groq).unwrap();
        assert_eq!(
            cfg.endpoint_chat_completions(),
            "http://127.0.0.1:1/openai/v1/chat/completions"
        );
        assert_eq!(cfg.research_model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn prompt_carries_evidence_blocks_in_order() {
        let body = ResearchRequest {
            company: Some("Acme Corp".to_string()),
            industry: Some("Widgets".to_string()),
            ..Default::default()
        };
        let search = SearchResponse {
            query: "q".to_string(),
            answer: "The answer.".to_string(),
            results: vec![briefpipe_core::SearchResult {
                title: "Filing".to_string(),
                url: None,
                snippet: String::new(),
                score: None,
                published_at: None,
            }],
            usage: None,
        };
        let finding = DeepResearchFinding {
            summary: "Deep summary".to_string(),
            insights: vec!["i1".to_string()],
            sources: vec![],
            raw: String::new(),
        };
        let prompt = build_agent_prompt(&body, &search, Some(&finding));
        assert!(prompt.starts_with("Company: Acme Corp"));
        assert!(prompt.contains("Search synthesis:\nThe answer."));
        assert!(prompt.contains("1. Filing — no url provided"));
        assert!(prompt.contains("Deep research synthesis:\nDeep summary"));
        let idx_search = prompt.find("Search synthesis").unwrap();
        let idx_deep = prompt.find("Deep research synthesis").unwrap();
        assert!(idx_search < idx_deep);
    }

    #[test]
    fn prompt_omits_deep_research_when_absent() {
        let body = ResearchRequest::default();
        let search = SearchResponse {
            query: "q".to_string(),
            answer: String::new(),
            results: vec![],
            usage: None,
        };
        let prompt = build_agent_prompt(&body, &search, None);
        assert!(!prompt.contains("Deep research"));
        assert!(prompt.contains("finance diligence brief"));
    }
}
