//! Local (reqwest) provider implementations and the research pipeline.
//!
//! All provider clients take a shared `reqwest::Client` by value and read
//! their configuration from `BRIEFPIPE_*` environment variables (with
//! unprefixed fallbacks for the common vendor names). Endpoints are
//! overridable for tests and enterprise proxies.

pub mod agent;
pub mod deep_research;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod search;
pub mod stream;

pub use pipeline::{run_research_pipeline, PipelineState, ResearchRuntime};

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First non-empty value among `keys`.
pub(crate) fn env_any(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env(k))
}

/// Provider requests can hang indefinitely without an explicit timeout.
/// Keep a conservative cap even if callers configure something huge.
pub(crate) fn timeout_ms_from_env(key: &str, default_ms: u64) -> u64 {
    env(key)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default_ms)
        .clamp(1_000, 120_000)
}

/// Truncate an upstream body for error messages without splitting a char.
pub(crate) fn preview(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use testutil::EnvGuard;

    #[test]
    fn empty_env_values_are_treated_as_missing() {
        let _g = EnvGuard::set("BRIEFPIPE_TEST_EMPTY", "   ");
        assert!(env("BRIEFPIPE_TEST_EMPTY").is_none());
    }

    #[test]
    fn env_any_prefers_earlier_keys() {
        let _g1 = EnvGuard::set("BRIEFPIPE_TEST_A", "first");
        let _g2 = EnvGuard::set("BRIEFPIPE_TEST_B", "second");
        assert_eq!(
            env_any(&["BRIEFPIPE_TEST_A", "BRIEFPIPE_TEST_B"]).as_deref(),
            Some("first")
        );
        let _g3 = EnvGuard::set("BRIEFPIPE_TEST_A", "");
        assert_eq!(
            env_any(&["BRIEFPIPE_TEST_A", "BRIEFPIPE_TEST_B"]).as_deref(),
            Some("second")
        );
    }

    #[test]
    fn timeouts_are_clamped() {
        let _g = EnvGuard::set("BRIEFPIPE_TEST_TIMEOUT", "999999999");
        assert_eq!(timeout_ms_from_env("BRIEFPIPE_TEST_TIMEOUT", 20_000), 120_000);
        let _g2 = EnvGuard::set("BRIEFPIPE_TEST_TIMEOUT", "1");
        assert_eq!(timeout_ms_from_env("BRIEFPIPE_TEST_TIMEOUT", 20_000), 1_000);
        let _g3 = EnvGuard::set("BRIEFPIPE_TEST_TIMEOUT", "not-a-number");
        assert_eq!(timeout_ms_from_env("BRIEFPIPE_TEST_TIMEOUT", 20_000), 20_000);
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll");
        assert_eq!(preview("ab", 10), "ab");
    }
}
