use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::CollaboratorError;

/// Longest error body kept in `CollaboratorError::Status`
const MAX_ERROR_BODY: usize = 512;

/// Plain JSON-over-HTTP capability: POST when a body is given, GET otherwise.
/// No retries are performed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn fetch_json(&self, url: &str, body: Option<Value>) -> Result<Value, CollaboratorError>;
}

pub struct HttpJsonFetcher {
    client: Client,
    headers: Vec<(String, String)>,
}

impl HttpJsonFetcher {
    pub fn new(timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            headers: Vec::new(),
        })
    }

    /// Send `name: value` with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl JsonFetcher for HttpJsonFetcher {
    async fn fetch_json(&self, url: &str, body: Option<Value>) -> Result<Value, CollaboratorError> {
        let mut request = match &body {
            Some(body) => self.client.post(url).json(body),
            None => self.client.get(url),
        };
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let method = if body.is_some() { "POST" } else { "GET" };
        debug!(url = %url, method, "fetching json");
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let mut body = text;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}
