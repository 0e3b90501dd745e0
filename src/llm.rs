use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::context::{ConversationMessage, Role};
use crate::error::CollaboratorError;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// AI completion collaborator: one request, one full reply, no streaming
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ConversationMessage],
    ) -> Result<String, CollaboratorError>;
}

/// LLM client for calling language models via Anthropic-compatible API
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    content: Vec<ContentBlock>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
    msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl LlmClient {
    /// Create a new LLM client. `timeout` is the whole-request deadline.
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        if api_key.trim().is_empty() {
            return Err(CollaboratorError::MissingCredential("llm.api_key"));
        }
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Convert history into API turns. The API wants the first turn from the user
/// and rejects empty content, so leading assistant turns and blank messages
/// are dropped.
fn to_chat_messages(messages: &[ConversationMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| !m.content().trim().is_empty())
        .skip_while(|m| m.role() == Role::Assistant)
        .map(|m| ChatMessage {
            role: m.role().as_str().to_string(),
            content: m.content().to_string(),
        })
        .collect()
}

#[async_trait]
impl Completion for LlmClient {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ConversationMessage],
    ) -> Result<String, CollaboratorError> {
        let url = format!("{}/v1/messages", self.base_url);

        let messages = to_chat_messages(messages);
        if messages.is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "no user message to complete".to_string(),
            ));
        }

        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: (!system_prompt.is_empty()).then(|| system_prompt.to_string()),
            messages,
        };

        info!(
            model = %self.model,
            turns = request.messages.len(),
            "sending LLM request"
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let msg = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|err| err.msg.or_else(|| err.error.and_then(|e| e.message)))
                .unwrap_or(body);
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body: msg,
            });
        }

        let chat_response: ChatResponse = serde_json::from_str(&body)?;

        // Extract text content
        let content = chat_response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let usage = chat_response.usage.unwrap_or(Usage {
            input_tokens: 0,
            output_tokens: 0,
        });

        info!(
            model = %chat_response.model.as_deref().unwrap_or(self.model.as_str()),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "LLM response received"
        );

        Ok(content)
    }
}
