use briefpipe_core::{Error, RequestContext, Result, SearchProvider, SearchResponse, SearchResult};
use serde::Deserialize;
use serde_json::Value;

use crate::{env, env_any, preview, timeout_ms_from_env};

fn search_api_key_from_env() -> Option<String> {
    env_any(&["BRIEFPIPE_SEARCH_API_KEY", "PERPLEXITY_API_KEY"])
}

pub fn is_configured() -> bool {
    search_api_key_from_env().is_some()
}

pub fn endpoint() -> String {
    // Allow override for testing/debugging (do not include secrets here).
    env("BRIEFPIPE_SEARCH_ENDPOINT")
        .unwrap_or_else(|| "https://api.perplexity.ai/search".to_string())
}

/// Client for the mandatory search stage. The endpoint takes
/// `POST {query, focus?, top_k}` with bearer auth and returns a synthesized
/// answer plus ranked results.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    api_key: String,
}

impl SearchClient {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = search_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing BRIEFPIPE_SEARCH_API_KEY (or PERPLEXITY_API_KEY)".to_string(),
            )
        })?;
        Ok(Self { client, api_key })
    }
}

#[async_trait::async_trait]
impl SearchProvider for SearchClient {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn search(&self, ctx: &RequestContext) -> Result<SearchResponse> {
        let timeout_ms = timeout_ms_from_env("BRIEFPIPE_SEARCH_TIMEOUT_MS", 20_000);

        let mut payload = serde_json::json!({
            "query": ctx.query,
            "top_k": ctx.top_k,
        });
        if let Some(focus) = ctx.focus.as_ref().filter(|f| !f.is_empty()) {
            payload["focus"] = serde_json::json!(focus);
        }

        let resp = self
            .client
            .post(endpoint())
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Search(format!(
                "search provider HTTP {status}: {}",
                preview(&body, 300)
            )));
        }

        let raw: RawSearchResponse = resp.json().await.map_err(|e| Error::Search(e.to_string()))?;
        Ok(normalize_response(&ctx.query, raw))
    }
}

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    #[serde(default)]
    answer: Option<Value>,
    #[serde(default)]
    summary: Option<Value>,
    #[serde(default)]
    results: Option<Vec<Value>>,
    #[serde(default)]
    usage: Option<Value>,
}

fn normalize_response(query: &str, raw: RawSearchResponse) -> SearchResponse {
    let answer = match raw.answer.as_ref().and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => raw
            .summary
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default(),
    };
    SearchResponse {
        query: query.to_string(),
        answer,
        results: normalize_results(raw.results.as_deref().unwrap_or_default()),
        usage: raw.usage,
    }
}

fn normalize_results(raw: &[Value]) -> Vec<SearchResult> {
    raw.iter().map(normalize_result).collect()
}

fn normalize_result(raw: &Value) -> SearchResult {
    let title = trimmed_string(raw, "title")
        .or_else(|| trimmed_string(raw, "name"))
        .unwrap_or_else(|| "Untitled result".to_string());
    let url = string_field(raw, "url").or_else(|| string_field(raw, "source"));
    let snippet = string_field(raw, "snippet")
        .or_else(|| string_field(raw, "text"))
        .or_else(|| string_field(raw, "description"))
        .unwrap_or_default();
    SearchResult {
        title,
        url,
        snippet,
        score: raw.get("score").and_then(Value::as_f64),
        published_at: string_field(raw, "published_at"),
    }
}

fn string_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

fn trimmed_string(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::EnvGuard;
    use serde_json::json;

    #[test]
    fn empty_key_is_treated_as_missing() {
        let _g1 = EnvGuard::set("BRIEFPIPE_SEARCH_API_KEY", "   ");
        let _g2 = EnvGuard::unset("PERPLEXITY_API_KEY");
        assert!(search_api_key_from_env().is_none());
        assert!(SearchClient::from_env(reqwest::Client::new()).is_err());
    }

    #[test]
    fn result_titles_fall_back_to_name_then_placeholder() {
        let r = normalize_result(&json!({"name": "  Acme 10-K  ", "snippet": "s"}));
        assert_eq!(r.title, "Acme 10-K");
        let r = normalize_result(&json!({"title": "   ", "text": "body"}));
        assert_eq!(r.title, "Untitled result");
        assert_eq!(r.snippet, "body");
    }

    #[test]
    fn result_urls_fall_back_to_source() {
        let r = normalize_result(&json!({"title": "t", "source": "https://a.example"}));
        assert_eq!(r.url.as_deref(), Some("https://a.example"));
    }

    #[test]
    fn snippet_falls_back_through_text_and_description() {
        let r = normalize_result(&json!({"title": "t", "description": "d"}));
        assert_eq!(r.snippet, "d");
        let r = normalize_result(&json!({"title": "t"}));
        assert_eq!(r.snippet, "");
    }

    #[test]
    fn score_and_published_at_pass_through_when_typed_correctly() {
        let r = normalize_result(&json!({
            "title": "t",
            "score": 0.87,
            "published_at": "2025-02-01"
        }));
        assert_eq!(r.score, Some(0.87));
        assert_eq!(r.published_at.as_deref(), Some("2025-02-01"));
        let r = normalize_result(&json!({"title": "t", "score": "high"}));
        assert!(r.score.is_none());
    }

    #[test]
    fn answer_falls_back_to_summary() {
        let raw: RawSearchResponse = serde_json::from_value(json!({
            "summary": "synthesis",
            "results": []
        }))
        .unwrap();
        let resp = normalize_response("q", raw);
        assert_eq!(resp.answer, "synthesis");
        assert_eq!(resp.query, "q");

        let raw: RawSearchResponse = serde_json::from_value(json!({"answer": ""})).unwrap();
        let resp = normalize_response("q", raw);
        assert_eq!(resp.answer, "");
    }

    #[test]
    fn result_order_is_preserved() {
        let raw: RawSearchResponse = serde_json::from_value(json!({
            "answer": "a",
            "results": [{"title": "one"}, {"title": "two"}, {"title": "three"}]
        }))
        .unwrap();
        let resp = normalize_response("q", raw);
        let titles: Vec<&str> = resp.results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["one", "two", "three"]);
    }
}
