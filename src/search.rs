//! Web search collaborator backed by the Serper Google-search API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::CollaboratorError;
use crate::http::{HttpJsonFetcher, JsonFetcher};

pub const DEFAULT_ENDPOINT: &str = "https://google.serper.dev/search";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    pub link: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// At most `limit` results, best first
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, CollaboratorError>;
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SearchResult>,
}

pub struct SerperClient {
    fetcher: Box<dyn JsonFetcher>,
    endpoint: String,
}

impl SerperClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        if api_key.trim().is_empty() {
            return Err(CollaboratorError::MissingCredential("search.api_key"));
        }
        let fetcher = HttpJsonFetcher::new(timeout)?.with_header("X-API-KEY", api_key);
        Ok(Self::with_fetcher(Box::new(fetcher), endpoint))
    }

    pub fn with_fetcher(fetcher: Box<dyn JsonFetcher>, endpoint: &str) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl WebSearch for SerperClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, CollaboratorError> {
        let body: Value = serde_json::json!({"q": query, "num": limit});
        let value = self.fetcher.fetch_json(&self.endpoint, Some(body)).await?;
        let response: SerperResponse = serde_json::from_value(value)?;

        let results: Vec<SearchResult> = response.organic.into_iter().take(limit).collect();
        info!(query_len = query.len(), results = results.len(), "search completed");
        Ok(results)
    }
}
