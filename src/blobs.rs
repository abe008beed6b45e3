//! Binary attachment transfer: remote URL in, local file handle out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

/// Source-side blob capability. Publishing back out belongs to the
/// destination boundary.
#[async_trait]
pub trait BlobTransfer: Send + Sync {
    /// Download a remote blob into `dest_dir`, returning its local handle.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// HTTP implementation of [`BlobTransfer`].
pub struct HttpBlobFetcher {
    client: reqwest::Client,
}

impl HttpBlobFetcher {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build blob HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BlobTransfer for HttpBlobFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request blob {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("Blob fetch {url} failed with status {}", response.status());
        }
        let bytes = response.bytes().await.context("Failed to read blob body")?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("Failed to create media dir: {}", dest_dir.display()))?;
        let path = dest_dir.join(munged_file_name(url));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write blob to {}", path.display()))?;
        Ok(path)
    }
}

/// Derive a collision-avoiding local name from a remote URL's basename:
/// the stem is capped at 100 characters and tagged with a random hex
/// disambiguator, the extension chain is kept.
#[must_use]
pub fn munged_file_name(remote_url: &str) -> String {
    let basename = Url::parse(remote_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(ToString::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| "attachment".to_string());

    let mut parts: Vec<String> = basename.split('.').map(ToString::to_string).collect();
    let stem: String = parts[0].chars().take(100).collect();
    let tag: u32 = rand::random();
    parts[0] = format!("{stem}_{tag:08x}");
    parts.join(".")
}
