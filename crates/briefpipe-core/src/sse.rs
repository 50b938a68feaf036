//! Incremental Server-Sent-Events parsing for streamed provider responses.
//!
//! Frames are delimited by a blank line and carry `data:`-prefixed
//! payloads. Providers disagree about payload shapes, so the delta readers
//! below accept string content, array-of-parts content, and the common
//! nested wrappers.

use serde_json::Value;

/// The explicit end-of-stream sentinel payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Accumulates raw bytes and yields complete `data:` payloads as frames
/// become available. Bytes are buffered as-is so multi-byte characters
/// split across network chunks survive.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the `data:` payloads of every frame completed
    /// by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = find_delimiter(&self.buffer) {
            let frame = String::from_utf8_lossy(&self.buffer[..pos]).into_owned();
            self.buffer.drain(..pos + 2);
            if let Some(payload) = data_payload(&frame) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush a partially buffered final frame once the upstream stream has
    /// closed. A frame lacking its trailing delimiter must still be seen.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.is_empty() {
            return None;
        }
        let frame = String::from_utf8_lossy(&rest).into_owned();
        if frame.trim().is_empty() {
            return None;
        }
        data_payload(&frame)
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn data_payload(frame: &str) -> Option<String> {
    frame
        .lines()
        .find(|line| line.starts_with("data:"))
        .map(|line| line["data:".len()..].trim().to_string())
        .filter(|payload| !payload.is_empty())
}

/// Pull readable text out of a heterogeneous payload value: plain strings,
/// arrays of parts, and `{text}`/`{value}`/`{content}`/`{delta}`/`{data}`
/// wrappers.
pub fn extract_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(extract_text).collect(),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("text") {
                return s.clone();
            }
            if let Some(Value::String(s)) = map.get("value") {
                return s.clone();
            }
            if let Some(content) = map.get("content") {
                return extract_text(content);
            }
            if let Some(delta) = map.get("delta") {
                return extract_text(delta);
            }
            if let Some(data) = map.get("data") {
                return extract_text(data);
            }
            String::new()
        }
        _ => String::new(),
    }
}

/// Resolve the incremental text fragment carried by one parsed event.
pub fn event_text(event: &Value) -> String {
    if let Some(delta) = event.get("delta") {
        let text = extract_text(delta);
        if !text.is_empty() {
            return text;
        }
    }
    if let Some(message) = event.get("message") {
        let text = extract_text(message);
        if !text.is_empty() {
            return text;
        }
    }
    if let Some(response) = event.get("response") {
        let text = extract_text(response);
        if !text.is_empty() {
            return text;
        }
    }
    if let Some(content) = event.get("content") {
        let text = extract_text(content);
        if !text.is_empty() {
            return text;
        }
    }
    if let Some(data) = event.get("data") {
        let text = extract_text(data);
        if !text.is_empty() {
            return text;
        }
    }
    String::new()
}

/// True when the event declares itself an error frame.
pub fn is_error_event(event: &Value) -> bool {
    matches!(
        event.get("type").and_then(Value::as_str),
        Some("error") | Some("response.error")
    )
}

/// Best-effort human-readable message for an error frame.
pub fn event_error(event: &Value) -> Option<String> {
    match event.get("error") {
        Some(Value::String(s)) => return Some(s.clone()),
        Some(Value::Object(map)) => {
            if let Some(Value::String(s)) = map.get("message") {
                return Some(s.clone());
            }
        }
        _ => {}
    }
    if let Some(Value::String(s)) = event.get("message") {
        return Some(s.clone());
    }
    None
}
