//! JSON candidate extraction for model output that is not guaranteed to be
//! bare JSON (markdown fences, prose preambles, stray tokens).

/// Produce likely JSON substrings of `raw` in priority order:
/// the trimmed text itself, the text with a single outer code fence
/// stripped, and the widest brace-delimited substring. Consumers try each
/// candidate until one parses and validates.
pub fn json_candidates(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return out;
    }
    out.push(trimmed.to_string());
    if let Some(inner) = strip_code_fence(trimmed) {
        push_unique(&mut out, inner);
    }
    if let Some(block) = brace_substring(trimmed) {
        push_unique(&mut out, block);
    }
    out
}

/// Strip one outer markdown code fence (``` or ```lang) when the whole text
/// is fenced. Returns the trimmed inner text.
fn strip_code_fence(text: &str) -> Option<String> {
    let rest = text.strip_prefix("```")?;
    // Drop the info string (e.g. "json") on the opening fence line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => return None,
    };
    let inner = body.trim_end().strip_suffix("```")?;
    let inner = inner.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

/// The substring from the first `{` through the last `}`, when both exist
/// in that order.
fn brace_substring(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

fn push_unique(out: &mut Vec<String>, candidate: String) {
    if !out.iter().any(|c| c == &candidate) {
        out.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_yields_itself_first() {
        let cands = json_candidates(r#"  {"a": 1}  "#);
        assert_eq!(cands[0], r#"{"a": 1}"#);
    }

    #[test]
    fn fenced_json_yields_a_parseable_second_candidate() {
        let raw = "```json\n{\"summary\": \"ok\"}\n```";
        let cands = json_candidates(raw);
        assert!(serde_json::from_str::<serde_json::Value>(&cands[0]).is_err());
        let parsed: serde_json::Value = serde_json::from_str(&cands[1]).unwrap();
        assert_eq!(parsed["summary"], "ok");
    }

    #[test]
    fn fence_without_language_tag_is_stripped() {
        let raw = "```\n{\"a\":1}\n```";
        let cands = json_candidates(raw);
        assert!(cands.contains(&r#"{"a":1}"#.to_string()));
    }

    #[test]
    fn prose_around_braces_yields_the_brace_substring() {
        let raw = "Here you go: {\"a\": {\"b\": 2}} hope that helps";
        let cands = json_candidates(raw);
        let last = cands.last().unwrap();
        assert_eq!(last, r#"{"a": {"b": 2}}"#);
        assert!(serde_json::from_str::<serde_json::Value>(last).is_ok());
    }

    #[test]
    fn empty_input_yields_no_candidates() {
        assert!(json_candidates("   \n ").is_empty());
    }

    #[test]
    fn duplicate_candidates_are_collapsed() {
        // Bare JSON object: trimmed text and brace substring coincide.
        let cands = json_candidates(r#"{"a":1}"#);
        assert_eq!(cands.len(), 1);
    }

    #[test]
    fn brace_order_must_be_sane() {
        assert!(brace_substring("} nothing {").is_none());
        assert!(brace_substring("no braces at all").is_none());
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn first_candidate_is_always_the_trimmed_input(raw in "\\PC{1,80}") {
                let cands = json_candidates(&raw);
                if let Some(first) = cands.first() {
                    prop_assert_eq!(first.as_str(), raw.trim());
                }
            }

            #[test]
            fn fenced_object_always_produces_a_parseable_candidate(key in "[a-z]{1,8}") {
                let raw = format!("```json\n{{\"{key}\": 1}}\n```");
                let cands = json_candidates(&raw);
                prop_assert!(cands.iter().any(|c| serde_json::from_str::<serde_json::Value>(c).is_ok()));
            }
        }
    }
}
