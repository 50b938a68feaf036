//! Model availability probing for the deep-research vendor.
//!
//! The listing call is cached per `(endpoint, credential)` so concurrent
//! pipeline runs share one in-flight fetch. A failed fetch caches nothing,
//! so transient failures cannot poison later runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use briefpipe_core::{Error, Result};
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell};

use crate::{preview, timeout_ms_from_env};

#[derive(Clone, Default)]
pub struct ModelCatalog {
    entries: Arc<Mutex<HashMap<String, Arc<OnceCell<HashSet<String>>>>>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model identifiers currently enabled at `endpoint`, in both their
    /// namespaced (`models/x`) and bare (`x`) forms. Only models that either
    /// declare no generation-method restriction or explicitly support
    /// `generateContent` are included.
    pub async fn available_models(
        &self,
        client: &reqwest::Client,
        endpoint: &str,
        api_key: &str,
    ) -> Result<HashSet<String>> {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(cache_key(endpoint, api_key))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        // Waiters on an in-flight fetch share its outcome; a failure leaves
        // the cell uninitialized for the next caller.
        let set = cell
            .get_or_try_init(|| fetch_models(client, endpoint, api_key))
            .await?;
        Ok(set.clone())
    }

    pub async fn invalidate(&self) {
        self.entries.lock().await.clear();
    }
}

/// Credential material never lands in the cache key: only the endpoint and
/// the key's last 12 characters.
fn cache_key(endpoint: &str, api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    let suffix: String = if chars.len() > 12 {
        chars[chars.len() - 12..].iter().collect()
    } else {
        api_key.to_string()
    };
    format!("{endpoint}|{suffix}")
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    models: Option<Vec<ModelEntry>>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "supportedGenerationMethods")]
    supported_generation_methods: Option<Vec<String>>,
}

async fn fetch_models(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
) -> Result<HashSet<String>> {
    let timeout_ms = timeout_ms_from_env("BRIEFPIPE_GEMINI_TIMEOUT_MS", 20_000);
    let url = format!("{}/models?key={}", endpoint.trim_end_matches('/'), api_key);

    let resp = client
        .get(url)
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(|e| Error::DeepResearch(format!("failed to list models: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::DeepResearch(format!(
            "failed to list models: HTTP {status}: {}",
            preview(&body, 200)
        )));
    }

    let parsed: ModelListResponse = resp
        .json()
        .await
        .map_err(|e| Error::DeepResearch(format!("failed to list models: {e}")))?;

    let names = usable_model_names(&parsed);
    if names.is_empty() {
        return Err(Error::DeepResearch(
            "model listing returned no models supporting content generation".to_string(),
        ));
    }
    tracing::debug!(count = names.len(), "model availability cache filled");
    Ok(names)
}

fn usable_model_names(parsed: &ModelListResponse) -> HashSet<String> {
    let mut names = HashSet::new();
    for model in parsed.models.as_deref().unwrap_or_default() {
        let Some(name) = model.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        if let Some(methods) = model.supported_generation_methods.as_deref() {
            if !methods.is_empty()
                && !methods
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case("generatecontent"))
            {
                continue;
            }
        }
        names.insert(name.to_string());
        if let Some(bare) = name.strip_prefix("models/") {
            names.insert(bare.to_string());
        }
    }
    names
}
