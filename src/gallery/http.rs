// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;
use crate::extension::{DownloadedPackage, GalleryEntry};
use crate::gallery::client::HttpClient;
use crate::inventory::Gallery;
use crate::utils::sanitize_identifier;

#[derive(thiserror::Error, Debug)]
pub enum GalleryError {
    #[error("invalid gallery URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("gallery request to {url} failed with HTTP {status}")]
    Status { url: String, status: u16 },
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<GalleryEntry>,
}

/// Remote extension gallery reached over HTTP/JSON
pub struct HttpGallery {
    client: HttpClient,
    search_url: Url,
    download_dir: PathBuf,
}

impl HttpGallery {
    pub fn new(base_url: &str, download_dir: PathBuf) -> anyhow::Result<Self> {
        Self::with_client(base_url, download_dir, HttpClient::new()?)
    }

    pub fn with_client(base_url: &str, download_dir: PathBuf, client: HttpClient) -> anyhow::Result<Self> {
        let invalid = |reason: String| GalleryError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };

        let mut search_url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        search_url
            .path_segments_mut()
            .map_err(|_| invalid("URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "extensions", "search"]);

        Ok(Self {
            client,
            search_url,
            download_dir,
        })
    }
}

#[async_trait]
impl Gallery for HttpGallery {
    async fn search(&self, text: &str) -> anyhow::Result<Vec<GalleryEntry>> {
        let mut url = self.search_url.clone();
        url.query_pairs_mut().append_pair("q", text);
        debug!(url = %url, "Searching gallery");

        let response = self.client.client().get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(GalleryError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }

        let body: SearchResponse = response.json().await?;
        debug!(query = %text, count = body.results.len(), "Gallery search completed");
        Ok(body.results)
    }

    async fn download(&self, entry: &GalleryEntry) -> anyhow::Result<DownloadedPackage> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let file_name = format!("{}-{}.zip", Uuid::new_v4(), sanitize_identifier(&entry.identifier)?);
        let path = self.download_dir.join(file_name);

        info!(identifier = %entry.identifier, url = %entry.download_url, "Downloading extension package");
        if let Err(e) = self.client.download_with_retry(&entry.download_url, &path).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        Ok(DownloadedPackage {
            entry: entry.clone(),
            path,
        })
    }
}
