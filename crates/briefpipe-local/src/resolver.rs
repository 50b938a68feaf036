//! Agent vendor resolution.
//!
//! Decides once per process which vendor serves structured agent calls:
//! OpenAI (primary, with a readiness check for project-scoped keys) or Groq
//! (secondary, credential presence only). The decision and any inferred
//! project id are cached until `reset()`.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{env, env_any, preview, timeout_ms_from_env};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentVendor {
    OpenAi,
    Groq,
}

impl AgentVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentVendor::OpenAi => "openai",
            AgentVendor::Groq => "groq",
        }
    }
}

/// A cached decision: the vendor serving agent requests, or none plus a
/// human-readable reason. Replaced wholesale on `reset()`, never mutated.
#[derive(Debug, Clone)]
pub struct ProviderResolution {
    pub vendor: Option<AgentVendor>,
    pub reason: Option<String>,
}

impl ProviderResolution {
    fn vendor(vendor: AgentVendor) -> Self {
        Self {
            vendor: Some(vendor),
            reason: None,
        }
    }

    fn none(reason: impl Into<String>) -> Self {
        Self {
            vendor: None,
            reason: Some(reason.into()),
        }
    }
}

pub(crate) fn openai_api_key_from_env() -> Option<String> {
    env_any(&["BRIEFPIPE_OPENAI_API_KEY", "OPENAI_API_KEY"])
}

pub(crate) fn groq_api_key_from_env() -> Option<String> {
    env_any(&["BRIEFPIPE_GROQ_API_KEY", "GROQ_API_KEY"])
}

fn project_id_from_env() -> Option<String> {
    env_any(&["BRIEFPIPE_OPENAI_PROJECT_ID", "OPENAI_PROJECT_ID"])
}

fn admin_base_url() -> String {
    env("BRIEFPIPE_OPENAI_ADMIN_BASE_URL").unwrap_or_else(|| "https://api.openai.com".to_string())
}

/// Strict `proj_[A-Za-z0-9]+` check; anything else fails resolution
/// immediately rather than being sent upstream.
pub(crate) fn project_id_is_valid(id: &str) -> bool {
    id.strip_prefix("proj_")
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric()))
        .unwrap_or(false)
}

#[derive(Clone, Default)]
pub struct AgentProviderResolver {
    resolution: Arc<Mutex<Option<ProviderResolution>>>,
    inferred_project: Arc<Mutex<Option<String>>>,
}

impl AgentProviderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve (memoized). The first caller computes; later callers get the
    /// cached decision until `reset()`.
    pub async fn resolve(&self, client: &reqwest::Client) -> ProviderResolution {
        let mut cached = self.resolution.lock().await;
        if let Some(resolution) = cached.as_ref() {
            return resolution.clone();
        }
        let resolution = self.compute(client).await;
        *cached = Some(resolution.clone());
        resolution
    }

    /// Drop the cached decision and any inferred project id (credential
    /// changes, tests).
    pub async fn reset(&self) {
        *self.resolution.lock().await = None;
        *self.inferred_project.lock().await = None;
    }

    async fn compute(&self, client: &reqwest::Client) -> ProviderResolution {
        let openai_key = openai_api_key_from_env();
        let groq_key = groq_api_key_from_env();

        match env("BRIEFPIPE_AGENT_PROVIDER").map(|s| s.to_ascii_lowercase()) {
            Some(forced) if forced == "openai" => match openai_key {
                None => ProviderResolution::none(
                    "agent provider forced to openai but BRIEFPIPE_OPENAI_API_KEY (or OPENAI_API_KEY) is not set",
                ),
                Some(key) => match self.check_openai_readiness(client, &key).await {
                    Ok(()) => ProviderResolution::vendor(AgentVendor::OpenAi),
                    Err(reason) => ProviderResolution::none(reason),
                },
            },
            Some(forced) if forced == "groq" => match groq_key {
                None => ProviderResolution::none(
                    "agent provider forced to groq but BRIEFPIPE_GROQ_API_KEY (or GROQ_API_KEY) is not set",
                ),
                Some(_) => ProviderResolution::vendor(AgentVendor::Groq),
            },
            Some(other) => ProviderResolution::none(format!(
                "unknown agent provider override '{other}' (allowed: openai, groq)"
            )),
            None => match (openai_key, groq_key) {
                (Some(key), groq) => match self.check_openai_readiness(client, &key).await {
                    Ok(()) => ProviderResolution::vendor(AgentVendor::OpenAi),
                    Err(reason) if groq.is_some() => {
                        tracing::warn!(%reason, "primary agent vendor not ready, using secondary");
                        ProviderResolution::vendor(AgentVendor::Groq)
                    }
                    Err(reason) => ProviderResolution::none(reason),
                },
                (None, Some(_)) => ProviderResolution::vendor(AgentVendor::Groq),
                (None, None) => ProviderResolution::none(
                    "no agent provider configured; set BRIEFPIPE_OPENAI_API_KEY or BRIEFPIPE_GROQ_API_KEY (or OPENAI_API_KEY / GROQ_API_KEY)",
                ),
            },
        }
    }

    /// Project-scoped keys need a resolvable project id before we commit to
    /// the vendor; other key formats are ready as-is.
    async fn check_openai_readiness(
        &self,
        client: &reqwest::Client,
        api_key: &str,
    ) -> std::result::Result<(), String> {
        if !api_key.starts_with("sk-proj-") {
            return Ok(());
        }
        if let Some(project) = project_id_from_env() {
            if project_id_is_valid(&project) {
                return Ok(());
            }
            return Err(format!(
                "configured project id '{project}' does not match the required format proj_[A-Za-z0-9]+"
            ));
        }
        self.infer_project_id(client, api_key).await.map(|_| ())
    }

    async fn infer_project_id(
        &self,
        client: &reqwest::Client,
        api_key: &str,
    ) -> std::result::Result<String, String> {
        {
            let cached = self.inferred_project.lock().await;
            if let Some(project) = cached.as_ref() {
                return Ok(project.clone());
            }
        }

        let timeout_ms = timeout_ms_from_env("BRIEFPIPE_AGENT_TIMEOUT_MS", 20_000);
        let url = format!(
            "{}/v1/organization/projects",
            admin_base_url().trim_end_matches('/')
        );
        let resp = client
            .get(url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {api_key}"),
            )
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| {
                format!(
                    "project-scoped key in use but no project id is configured and the project listing call failed: {e}"
                )
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!(
                "project-scoped key in use but the project listing call failed: HTTP {status}: {}",
                preview(&body, 200)
            ));
        }

        let parsed: ProjectListResponse = resp
            .json()
            .await
            .map_err(|e| format!("project listing returned invalid JSON: {e}"))?;

        let project = parsed
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.id)
            .find(|id| project_id_is_valid(id))
            .ok_or_else(|| {
                "project listing returned no proj_ identifiers; set OPENAI_PROJECT_ID explicitly"
                    .to_string()
            })?;

        tracing::debug!(%project, "inferred project id from vendor listing");
        *self.inferred_project.lock().await = Some(project.clone());
        Ok(project)
    }
}

#[derive(Debug, Deserialize)]
struct ProjectListResponse {
    #[serde(default)]
    data: Option<Vec<ProjectEntry>>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    #[serde(default)]
    id: Option<String>,
}
