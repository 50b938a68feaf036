//! Deep-research provider client.
//!
//! Builds an evidence-grounded prompt from the search stage, tries a list
//! of candidate models with availability filtering, and validates the
//! free-form response into a `DeepResearchFinding`.

use std::collections::HashSet;

use briefpipe_core::candidates::json_candidates;
use briefpipe_core::schema::{describe, validate, Shape};
use briefpipe_core::{DeepResearchFinding, Error, RequestContext, Result, SearchResponse, SearchResult};
use serde_json::Value;

use crate::models::ModelCatalog;
use crate::{env, env_any, preview, timeout_ms_from_env};

const FALLBACK_MODELS: [&str; 4] = [
    "gemini-2.0-flash",
    "gemini-2.0-pro",
    "gemini-2.5-flash",
    "gemini-2.5-pro",
];

const SOURCE_PLACEHOLDER_TITLE: &str = "Deep research source";

fn deep_research_api_key_from_env() -> Option<String> {
    env_any(&[
        "BRIEFPIPE_GEMINI_API_KEY",
        "GEMINI_API_KEY",
        "GOOGLE_API_KEY",
    ])
}

pub fn is_configured() -> bool {
    deep_research_api_key_from_env().is_some()
}

pub fn base_url() -> String {
    env("BRIEFPIPE_GEMINI_BASE_URL")
        .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string())
        .trim_end_matches('/')
        .to_string()
}

pub fn configured_model() -> String {
    env("BRIEFPIPE_GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string())
}

/// Status codes taken to mean "wrong model name", so the candidate loop may
/// advance. Vendor-specific, hence overridable.
fn model_retry_statuses_from_env() -> Vec<u16> {
    let parsed: Vec<u16> = env("BRIEFPIPE_GEMINI_MODEL_RETRY_STATUSES")
        .map(|raw| {
            raw.split(',')
                .filter_map(|s| s.trim().parse::<u16>().ok())
                .collect()
        })
        .unwrap_or_default();
    if parsed.is_empty() {
        vec![400, 404]
    } else {
        parsed
    }
}

#[derive(Debug, Clone)]
pub struct DeepResearchClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    retry_statuses: Vec<u16>,
}

/// One failed generation attempt. `status` is the HTTP status when the
/// provider answered (204 stands in for an empty body); `None` means the
/// call never completed or the output failed to parse.
struct AttemptError {
    message: String,
    status: Option<u16>,
}

impl DeepResearchClient {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = deep_research_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing BRIEFPIPE_GEMINI_API_KEY (or GEMINI_API_KEY / GOOGLE_API_KEY)"
                    .to_string(),
            )
        })?;
        Ok(Self {
            client,
            api_key,
            model: configured_model(),
            base_url: base_url(),
            retry_statuses: model_retry_statuses_from_env(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one deep-research pass over the search stage's evidence.
    pub async fn research(
        &self,
        ctx: &RequestContext,
        search: &SearchResponse,
        catalog: &ModelCatalog,
    ) -> Result<DeepResearchFinding> {
        let prompt = build_prompt(ctx, search);
        let payload = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": 0},
        });

        let mut candidates = candidate_models(&self.model);
        let mut availability_hint: Option<String> = None;
        match catalog
            .available_models(&self.client, &self.base_url, &self.api_key)
            .await
        {
            Ok(available) => {
                let filtered: Vec<String> = candidates
                    .iter()
                    .filter(|m| {
                        available.contains(m.as_str())
                            || available.contains(&format!("models/{m}"))
                    })
                    .cloned()
                    .collect();
                if filtered.is_empty() {
                    let mut known: Vec<&str> = available.iter().map(String::as_str).collect();
                    known.sort_unstable();
                    availability_hint = Some(format!(
                        "none of the preferred models are enabled; available: {}",
                        known.join(", ")
                    ));
                } else {
                    candidates = filtered;
                }
            }
            // Probe failures are advisory only: keep the unfiltered list.
            Err(e) => availability_hint = Some(e.to_string()),
        }

        let mut last_error: Option<String> = None;
        for model in &candidates {
            match self.generate(model, &payload).await {
                Ok(text) => match parse_finding(&text) {
                    Ok(finding) => return Ok(finding),
                    Err(e) => {
                        last_error = Some(e.to_string());
                        continue;
                    }
                },
                Err(attempt) => {
                    tracing::debug!(%model, error = %attempt.message, "deep research candidate failed");
                    last_error = Some(attempt.message);
                    match attempt.status {
                        // Only "wrong model" statuses justify trying the
                        // next candidate; anything else is presumed to
                        // affect every model equally.
                        Some(status) if !self.retry_statuses.contains(&status) => break,
                        _ => continue,
                    }
                }
            }
        }

        let attempted = candidates.join(", ");
        let message = last_error.unwrap_or_else(|| "no model candidates were available".to_string());
        let hint = availability_hint
            .map(|h| format!(" availability hint: {h}"))
            .unwrap_or_default();
        Err(Error::DeepResearch(format!(
            "request failed after trying models ({attempted}). last error: {message}.{hint}"
        )))
    }

    async fn generate(
        &self,
        model: &str,
        payload: &Value,
    ) -> std::result::Result<String, AttemptError> {
        let timeout_ms = timeout_ms_from_env("BRIEFPIPE_GEMINI_TIMEOUT_MS", 20_000);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let resp = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(payload)
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| AttemptError {
                message: format!("model {model} request failed: {e}"),
                status: None,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AttemptError {
                message: format!("model {model} HTTP {status}: {}", preview(&body, 400)),
                status: Some(status.as_u16()),
            });
        }

        let data: Value = resp.json().await.map_err(|e| AttemptError {
            message: format!("model {model} returned invalid JSON: {e}"),
            status: None,
        })?;

        let text = generation_text(&data);
        if text.is_empty() {
            return Err(AttemptError {
                message: format!("model {model} returned no text"),
                status: Some(204),
            });
        }
        Ok(text)
    }
}

fn candidate_models(configured: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(configured)
        .chain(FALLBACK_MODELS)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .filter(|m| seen.insert(m.to_string()))
        .map(str::to_string)
        .collect()
}

/// Concatenated `candidates[].content.parts[].text` of a generateContent
/// response.
fn generation_text(data: &Value) -> String {
    let mut out = String::new();
    for candidate in data
        .get("candidates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        for part in candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
    }
    out.trim().to_string()
}

fn finding_shape() -> Shape {
    Shape::Object(vec![
        ("summary", Shape::optional(Shape::String)),
        ("insights", Shape::optional(Shape::array(Shape::String))),
        (
            "sources",
            Shape::optional(Shape::array(Shape::Object(vec![
                ("title", Shape::String),
                ("url", Shape::optional(Shape::String)),
                ("snippet", Shape::String),
            ]))),
        ),
    ])
}

fn build_prompt(ctx: &RequestContext, search: &SearchResponse) -> String {
    let mut sections: Vec<String> = Vec::new();
    sections.push(
        "You are a deep-research analyst supporting a company diligence review. \
         Respond with verified facts only."
            .to_string(),
    );
    sections.push(format!("Primary query: {}", ctx.query));
    if let Some(focus) = ctx.focus.as_ref().filter(|f| !f.is_empty()) {
        sections.push(format!("Focus topics: {}", focus.join(", ")));
    }
    if !search.answer.is_empty() {
        sections.push(format!(
            "Baseline synthesis from the search provider:\n{}",
            search.answer
        ));
    }
    let candidate_sources = numbered_sources(&search.results, ctx.top_k);
    if !candidate_sources.is_empty() {
        sections.push(format!("Candidate sources:\n{candidate_sources}"));
    }
    sections.push(format!(
        "Return strict JSON matching this schema (no markdown, no commentary):\n{}",
        describe(&finding_shape())
    ));
    sections.push(
        [
            "Rules:",
            "- Summary: maximum three sentences; reference fiscal periods from filings when available.",
            "- Insights: 3-6 one-sentence bullets focused on KPIs (revenue growth, margins, free cash flow, liquidity, valuation, guidance).",
            "- Sources: prefer primary filings, investor relations pages, and reputable financial outlets; every URL must be https and point directly to the cited material.",
            "- If data is unavailable, omit rather than speculate.",
        ]
        .join("\n"),
    );
    sections.join("\n\n")
}

fn numbered_sources(results: &[SearchResult], limit: usize) -> String {
    results
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, r)| match &r.url {
            Some(url) => format!("{}. {} — {}", i + 1, r.title, url),
            None => format!("{}. {}", i + 1, r.title),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse raw model text into a finding: try each JSON candidate, normalize
/// the field aliases, validate the cleaned value, and reject entirely empty
/// payloads.
pub fn parse_finding(raw: &str) -> Result<DeepResearchFinding> {
    let mut last_error: Option<String> = None;
    for candidate in json_candidates(raw) {
        let parsed: Value = match serde_json::from_str(&candidate) {
            Ok(v) => v,
            Err(e) => {
                last_error = Some(e.to_string());
                continue;
            }
        };
        match finding_from_value(&parsed) {
            Ok(finding) => return Ok(finding),
            Err(e) => last_error = Some(e.to_string()),
        }
    }
    Err(Error::DeepResearch(format!(
        "failed to parse deep research output: {}",
        last_error.unwrap_or_else(|| "response contained no JSON candidates".to_string())
    )))
}

fn finding_from_value(parsed: &Value) -> Result<DeepResearchFinding> {
    let summary = ["summary", "synthesis"]
        .iter()
        .find_map(|k| parsed.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let insights = ["insights", "takeaways", "highlights", "points", "notes"]
        .iter()
        .find_map(|k| parsed.get(*k))
        .map(coerce_insights)
        .unwrap_or_default();

    let sources = ["sources", "citations", "references", "links"]
        .iter()
        .find_map(|k| parsed.get(*k))
        .map(normalize_sources)
        .unwrap_or_default();

    let clean = serde_json::json!({
        "summary": summary.as_str(),
        "insights": &insights,
        "sources": &sources,
    });
    let clean = validate(&finding_shape(), &clean)?;

    if summary.is_empty() && insights.is_empty() && sources.is_empty() {
        return Err(Error::DeepResearch("parsed payload was empty".to_string()));
    }

    let raw = serde_json::to_string_pretty(&clean)
        .map_err(|e| Error::DeepResearch(e.to_string()))?;
    Ok(DeepResearchFinding {
        summary,
        insights,
        sources,
        raw,
    })
}

/// Insights arrive as arrays of strings, arrays of `{text}` objects, or one
/// newline-separated string.
fn coerce_insights(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(map) => map
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Normalize cited sources. The dedup key is the canonical absolute http(s)
/// URL; entries without a valid URL are kept but never compared for dedup.
fn normalize_sources(value: &Value) -> Vec<SearchResult> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<SearchResult> = Vec::new();

    for entry in entries {
        let Some(record) = entry.as_object() else {
            continue;
        };

        let mut source_url: Option<url::Url> = None;
        for key in ["url", "href", "link"] {
            let Some(candidate) = record.get(key).and_then(Value::as_str) else {
                continue;
            };
            let trimmed = candidate.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(parsed) = url::Url::parse(trimmed) {
                if matches!(parsed.scheme(), "http" | "https") {
                    source_url = Some(parsed);
                    break;
                }
            }
        }

        let canonical = source_url.as_ref().map(url::Url::to_string);
        if let Some(c) = &canonical {
            if seen.contains(c) {
                continue;
            }
        }

        let title = ["title", "name"]
            .iter()
            .find_map(|k| record.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| {
                source_url.as_ref().and_then(|u| {
                    u.host_str()
                        .map(|h| h.trim_start_matches("www.").to_string())
                })
            })
            .unwrap_or_else(|| SOURCE_PLACEHOLDER_TITLE.to_string());

        let snippet = ["snippet", "summary", "note"]
            .iter()
            .find_map(|k| record.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        if let Some(c) = canonical.clone() {
            seen.insert(c);
        }
        out.push(SearchResult {
            title,
            url: canonical,
            snippet,
            score: None,
            published_at: None,
        });
    }

    out
}
