//! HTTP client for the external queue service.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::models::{HistoryRecord, QueueItem, WantedItem};

/// Contract for the download queue collaborator.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Current queue contents.
    async fn get_queue(&self) -> Result<Vec<QueueItem>>;

    /// Recently finished items, newest first.
    async fn get_history(&self) -> Result<Vec<HistoryRecord>>;

    /// The wanted/missing list of one acquisition service.
    async fn get_wanted_items(&self, service: &str) -> Result<Vec<WantedItem>>;
}

/// HTTP client for communicating with the queue service.
pub struct HttpQueueService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpQueueService {
    /// Create a new queue service client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the queue service (e.g., "http://localhost:8080")
    /// * `api_key` - Optional API key sent as the X-Api-Key header
    /// * `timeout_secs` - Request timeout in seconds
    pub fn new(base_url: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        // Ensure base_url doesn't have trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        Self {
            client,
            base_url,
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.api_key {
            Some(key) => request.header("X-Api-Key", key),
            None => request,
        }
    }
}

#[async_trait]
impl QueueService for HttpQueueService {
    async fn get_queue(&self) -> Result<Vec<QueueItem>> {
        let url = format!("{}/api/queue", self.base_url);
        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to connect to queue service")?;

        if !response.status().is_success() {
            anyhow::bail!("Queue fetch failed with status: {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse queue response")
    }

    async fn get_history(&self) -> Result<Vec<HistoryRecord>> {
        let url = format!("{}/api/history", self.base_url);
        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to connect to queue service")?;

        if !response.status().is_success() {
            anyhow::bail!("History fetch failed with status: {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse history response")
    }

    async fn get_wanted_items(&self, service: &str) -> Result<Vec<WantedItem>> {
        let url = format!("{}/api/wanted/{}", self.base_url, service);
        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to connect to queue service")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Wanted list fetch for {} failed with status: {}",
                service,
                response.status()
            );
        }

        let mut items: Vec<WantedItem> = response
            .json()
            .await
            .context("Failed to parse wanted list response")?;
        for item in &mut items {
            if item.service.is_empty() {
                item.service = service.to_string();
            }
        }
        Ok(items)
    }
}
