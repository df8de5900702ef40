use std::{env, path::Path};

use anyhow::{bail, Context};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};

async fn download_file(url: &str, path: &Path) -> anyhow::Result<()> {
    tracing::info!(url, path = %path.display(), "downloading model");

    let mut header_map = HeaderMap::new();
    if let Ok(token) = env::var("GITHUB_TOKEN") {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .context("Invalid GITHUB_TOKEN format")?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let response = reqwest::Client::new()
        .get(url)
        .headers(header_map)
        .send()
        .await
        .with_context(|| format!("Failed to request {}", url))?;

    if !response.status().is_success() {
        bail!("Failed to download {}: {}", url, response.status());
    }

    let bytes = response.bytes().await.context("Failed to read model bytes")?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::info!(bytes = bytes.len(), "model downloaded");
    Ok(())
}

/// Makes sure the model is on disk, fetching it from `model_url` when it is
/// not. Without a URL a missing model is a startup error.
pub async fn ensure_model_exists(
    model_path: &Path,
    model_url: Option<&str>,
) -> anyhow::Result<()> {
    if model_path.exists() {
        return Ok(());
    }

    match model_url {
        Some(url) => download_file(url, model_path).await,
        None => bail!(
            "model not found at {} and MODEL_URL is not set",
            model_path.display()
        ),
    }
}
