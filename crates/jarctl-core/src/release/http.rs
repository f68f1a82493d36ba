use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::retry::{RetryPolicy, get_with_retries};
use super::{Release, ReleaseSource, parse_github_release, sha256_matches};
use crate::config::{ManagerConfig, ensure_parent};
use crate::errors::{IoContext, ManagerError};

const USER_AGENT: &str = concat!("jarctl/", env!("CARGO_PKG_VERSION"));

/// Reads a GitHub-style "latest release" document and downloads the first
/// asset whose name matches the configured suffix.
pub struct HttpReleaseSource {
    client: Client,
    url: Option<String>,
    asset_suffix: String,
    retry: RetryPolicy,
}

impl HttpReleaseSource {
    pub fn new(
        url: Option<String>,
        asset_suffix: impl Into<String>,
        config: &ManagerConfig,
    ) -> Result<Self, ManagerError> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ManagerError::Network(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            url,
            asset_suffix: asset_suffix.into(),
            retry: RetryPolicy::from_config(&config.http),
        })
    }

    /// Source for the managed server's artifact. A missing `release_url`
    /// only fails once metadata is actually requested.
    pub fn for_server(config: &ManagerConfig) -> Result<Self, ManagerError> {
        let url = config.release_url().ok().map(str::to_string);
        Self::new(url, config.asset_suffix.clone(), config)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ManagerError> {
        let response = get_with_retries(&self.client, url, &self.retry).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ManagerError::Network(format!("reading body of {url}: {err}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn latest(&self) -> Result<Release, ManagerError> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| ManagerError::Config("release_url is not configured".into()))?;
        debug!("fetching release metadata from {url}");
        let body = self.get_bytes(url).await?;
        let suffix = self.asset_suffix.as_str();
        parse_github_release(&body)?.select(|name| name.ends_with(suffix))
    }

    async fn download(&self, release: &Release, dest: &Path) -> Result<(), ManagerError> {
        info!("downloading {} {}", release.asset_name, release.version);
        let bytes = self.get_bytes(&release.download_url).await?;

        if let Some(expected) = release.sha256.as_deref() {
            if !sha256_matches(&bytes, expected) {
                return Err(ManagerError::Release(format!(
                    "checksum mismatch for {}",
                    release.asset_name
                )));
            }
        }

        ensure_parent(dest)?;
        tokio::fs::write(dest, &bytes)
            .await
            .io_context(|| format!("writing {}", dest.display()))?;
        Ok(())
    }
}
