//! HTTP client for a content search collaborator.
//!
//! One search service exists per acquisition domain (series, movies); each
//! answers whether it accepted a re-search of some content at a given
//! quality tier.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::release::{MediaKind, QualityTier, ReleaseInfo};

/// Contract for a content search collaborator.
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Ask the service to search for the content identified by the release
    /// descriptor, optionally constrained to a quality tier. Returns
    /// whether the service accepted the search.
    async fn search_at_quality(&self, descriptor: &str, tier: Option<QualityTier>)
        -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    accepted: bool,
}

/// HTTP client for communicating with a search service.
pub struct HttpSearchService {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSearchService {
    /// Create a new search service client.
    ///
    /// # Arguments
    /// * `name` - Acquisition service name, used in error messages
    /// * `base_url` - Base URL of the search service
    /// * `api_key` - Optional API key sent as the X-Api-Key header
    /// * `timeout_secs` - Request timeout in seconds
    pub fn new(name: String, base_url: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        let base_url = base_url.trim_end_matches('/').to_string();

        Self {
            name,
            client,
            base_url,
            api_key,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SearchService for HttpSearchService {
    async fn search_at_quality(
        &self,
        descriptor: &str,
        tier: Option<QualityTier>,
    ) -> Result<bool> {
        let info = ReleaseInfo::parse(descriptor);
        let mut body = serde_json::json!({
            "title": info.title,
        });
        if let Some(tier) = tier {
            body["quality"] = serde_json::json!(tier.as_str());
        }
        match info.kind {
            MediaKind::Series { season, episode } => {
                body["season"] = serde_json::json!(season);
                body["episode"] = serde_json::json!(episode);
            }
            MediaKind::Movie { year } => {
                body["year"] = serde_json::json!(year);
            }
            MediaKind::Unknown => {}
        }

        let url = format!("{}/api/search", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to connect to search service {}", self.name))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Search on {} failed with status: {}",
                self.name,
                response.status()
            );
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Failed to parse search response")?;
        Ok(parsed.accepted)
    }
}
