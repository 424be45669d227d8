use crate::config::RemoteConfig;
use crate::integrations::HTTP_CLIENT;
use anyhow::{Context, Result};
use serde_json::Value;

/// Fetch the sprint configuration document from the setup bucket.
pub async fn fetch_sprint_config(remote: &RemoteConfig) -> Result<Value> {
    let url = remote.sprint_config_url();
    tracing::debug!("Fetching sprint config from {}", url);

    let response = HTTP_CLIENT
        .get(&url)
        .header("Authorization", format!("Bearer {}", remote.api_key))
        .header("apikey", &remote.api_key)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Failed to fetch sprint config ({}): {}", status, body);
    }

    response
        .json()
        .await
        .context("Sprint config is not valid JSON")
}

/// Destination folder named by a sprint configuration.
pub fn sprint_folder(config: &Value) -> Option<String> {
    config["submission"]["sprint_folder"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Resolve the destination folder: the configured override, else the remote document.
pub async fn resolve_sprint_folder(remote: &RemoteConfig) -> Result<String> {
    if let Some(folder) = remote.sprint_folder.as_deref().filter(|f| !f.is_empty()) {
        return Ok(folder.to_string());
    }
    let config = fetch_sprint_config(remote).await?;
    sprint_folder(&config).context("Invalid sprint configuration: missing submission.sprint_folder")
}
