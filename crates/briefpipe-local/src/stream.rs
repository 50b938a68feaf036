//! Streaming chat relay.
//!
//! Drives one `stream: true` chat-completions call through the core SSE
//! parser, hands text deltas to the caller as they arrive, and returns the
//! accumulated completion. Error frames and malformed payloads abort the
//! relay; nothing is silently dropped. Cancelling the owning future cancels
//! the upstream request.

use briefpipe_core::sse::{event_error, event_text, is_error_event, SseParser, DONE_SENTINEL};
use briefpipe_core::{Error, Result};
use futures_util::StreamExt;
use serde_json::Value;

use crate::agent::{AgentVendorConfig, ChatMessage};
use crate::{preview, timeout_ms_from_env};

pub async fn relay_chat_stream<F>(
    client: &reqwest::Client,
    cfg: &AgentVendorConfig,
    model: &str,
    messages: &[ChatMessage],
    mut on_delta: F,
) -> Result<String>
where
    F: FnMut(&str),
{
    let timeout_ms = timeout_ms_from_env("BRIEFPIPE_AGENT_TIMEOUT_MS", 60_000);
    let body = serde_json::json!({
        "model": model,
        "messages": messages,
        "temperature": 0,
        "stream": true,
    });

    let resp = client
        .post(cfg.endpoint_chat_completions())
        .header(reqwest::header::AUTHORIZATION, cfg.bearer())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .json(&body)
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(|e| Error::Stream(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Stream(format!(
            "chat stream HTTP {status}: {}",
            preview(&body, 300)
        )));
    }

    let mut parser = SseParser::new();
    let mut accumulated = String::new();
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| Error::Stream(e.to_string()))?;
        for payload in parser.push(&bytes) {
            consume_payload(&payload, &mut accumulated, &mut on_delta)?;
        }
    }
    // A final frame without its trailing delimiter must still be seen.
    if let Some(payload) = parser.finish() {
        consume_payload(&payload, &mut accumulated, &mut on_delta)?;
    }

    Ok(accumulated)
}

fn consume_payload<F>(payload: &str, accumulated: &mut String, on_delta: &mut F) -> Result<()>
where
    F: FnMut(&str),
{
    if payload == DONE_SENTINEL {
        return Ok(());
    }
    let event: Value = serde_json::from_str(payload)
        .map_err(|e| Error::Stream(format!("invalid stream frame: {e}")))?;
    if is_error_event(&event) {
        return Err(Error::Stream(
            event_error(&event).unwrap_or_else(|| "the model returned an error".to_string()),
        ));
    }
    let fragment = event_text(&event);
    if !fragment.is_empty() {
        accumulated.push_str(&fragment);
        on_delta(&fragment);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_sentinel_is_not_an_error_and_adds_nothing() {
        let mut acc = String::new();
        consume_payload(DONE_SENTINEL, &mut acc, &mut |_d: &str| {}).unwrap();
        assert!(acc.is_empty());
    }

    #[test]
    fn deltas_accumulate_and_reach_the_callback() {
        let mut acc = String::new();
        let mut seen: Vec<String> = Vec::new();
        consume_payload(r#"{"delta": "Hel"}"#, &mut acc, &mut |d: &str| {
            seen.push(d.to_string())
        })
        .unwrap();
        consume_payload(r#"{"delta": "lo"}"#, &mut acc, &mut |d: &str| {
            seen.push(d.to_string())
        })
        .unwrap();
        assert_eq!(acc, "Hello");
        assert_eq!(seen, vec!["Hel", "lo"]);
    }

    #[test]
    fn error_frames_abort_with_their_message() {
        let mut acc = String::new();
        let err = consume_payload(
            r#"{"type": "error", "error": {"message": "quota exceeded"}}"#,
            &mut acc,
            &mut |_d: &str| {},
        )
        .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn malformed_payloads_abort_the_relay() {
        let mut acc = String::new();
        let err = consume_payload("{not json", &mut acc, &mut |_d: &str| {}).unwrap_err();
        assert!(err.to_string().contains("invalid stream frame"));
    }
}
