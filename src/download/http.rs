use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::app::DownloadError;
use crate::download::Downloader;

/// Plain GET of the resource URL, streamed to disk.
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let io_err = |source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await.map_err(io_err)?;
        }

        file.flush().await.map_err(io_err)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> &str {
        "http"
    }

    async fn attempt(&self, url: &str, dest: &Path) -> bool {
        match self.fetch_to(url, dest).await {
            Ok(()) => true,
            Err(e) => {
                debug!("HTTP download of {} failed: {}", url, e);
                false
            }
        }
    }
}
