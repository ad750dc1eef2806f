// SPDX-License-Identifier: GPL-3.0-only
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use crate::gallery::GalleryError;

const USER_AGENT: &str = concat!("ExtensionSync/", env!("CARGO_PKG_VERSION"));

pub struct HttpClient {
    client: Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300)) // 5 minute timeout for large packages
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            max_retries: 3,
            backoff: Duration::from_secs(2),
        })
    }

    /// Attempt count and initial delay; the delay doubles after each failure
    #[cfg(test)]
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.backoff = backoff;
        self
    }

    pub async fn download_with_retry(&self, url: &str, output_path: &Path) -> anyhow::Result<()> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.download_once(url, output_path).await {
                Ok(bytes) => {
                    if attempt > 1 {
                        info!(url = %url, attempt, "Download succeeded after retry");
                    }
                    info!(url = %url, path = %output_path.display(), bytes, "Download completed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Download attempt failed");
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.backoff * 2_u32.pow(attempt - 1)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Download failed after {} attempts", self.max_retries)))
    }

    /// Stream one response body to `output_path`, returning the byte count
    async fn download_once(&self, url: &str, output_path: &Path) -> anyhow::Result<u64> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(GalleryError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }

        let mut file = tokio::fs::File::create(output_path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}
