//! House service client: page retrieval and photo download
//!
//! [`RecordSource`] and [`AssetStore`] are the seams the pipeline talks to;
//! [`HouseServiceClient`] implements both over a shared `reqwest::Client`.

use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::{House, HousePage, PageRequest};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Retrieves pages of house records
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one page and send its houses on `batches`
    ///
    /// Sends exactly once on success and never on error.
    async fn fetch_page(
        &self,
        request: &PageRequest,
        batches: &mpsc::Sender<Vec<House>>,
    ) -> Result<()>;
}

/// Retrieves photos and writes them to a sink
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    /// Download `photo_url` into `sink`, returning the number of bytes written
    async fn save_photo(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        photo_url: &str,
    ) -> Result<u64>;
}

/// HTTP client for the house service
#[derive(Clone)]
pub struct HouseServiceClient {
    http: reqwest::Client,
    page_retry: RetryConfig,
    photo_retry: RetryConfig,
}

impl HouseServiceClient {
    /// Create a client with the given per-request timeout and retry policies
    pub fn new(timeout: Duration, page_retry: RetryConfig, photo_retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            page_retry,
            photo_retry,
        })
    }

    /// Create a client from the application configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.service.request_timeout,
            config.retry.page.clone(),
            config.retry.photo.clone(),
        )
    }

    /// One GET; anything but 200 is reported as [`Error::RemoteStatus`]
    async fn get_ok(&self, url: &str, query: &[(&str, u32)]) -> Result<reqwest::Response> {
        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::RemoteStatus {
                code: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl RecordSource for HouseServiceClient {
    async fn fetch_page(
        &self,
        request: &PageRequest,
        batches: &mpsc::Sender<Vec<House>>,
    ) -> Result<()> {
        tracing::info!(
            page = request.page,
            per_page = request.per_page,
            url = %request.base_url,
            "Fetching house data page"
        );

        let query = request.query();
        let response = with_retry(&self.page_retry, || {
            self.get_ok(&request.base_url, &query)
        })
        .await?;

        let body = response.bytes().await?;
        let page: HousePage = serde_json::from_slice(&body)?;

        tracing::debug!(page = request.page, houses = page.houses.len(), "Fetched house data page");

        batches
            .send(page.houses)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

#[async_trait::async_trait]
impl AssetStore for HouseServiceClient {
    async fn save_photo(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        photo_url: &str,
    ) -> Result<u64> {
        tracing::info!(url = %photo_url, "Saving photo");

        let mut response = with_retry(&self.photo_retry, || self.get_ok(photo_url, &[])).await?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
        {
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;

        Ok(written)
    }
}
