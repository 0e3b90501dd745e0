//! Telegram Bot API: inbound update types and the outbound `sendMessage` call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CollaboratorError;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram rejects messages longer than this, counted in UTF-16 code units
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub date: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
}

/// Text message extracted from an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub chat_id: i64,
    pub user_id: i64,
    pub text: String,
}

impl Update {
    /// The text message carried by this update, if any. Bot senders are ignored.
    pub fn inbound(&self) -> Option<Inbound> {
        let message = self.message.as_ref()?;
        let text = message.text.clone()?;
        if message.from.as_ref().is_some_and(|u| u.is_bot) {
            return None;
        }
        Some(Inbound {
            chat_id: message.chat.id,
            user_id: message.from.as_ref().map(|u| u.id).unwrap_or(message.chat.id),
            text,
        })
    }
}

/// Outbound delivery of a reply to a chat
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_reply(&self, chat_id: i64, text: &str) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramClient {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        if token.trim().is_empty() {
            return Err(CollaboratorError::MissingCredential("bot.telegram_token"));
        }
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn send_chunk(&self, chat_id: i64, text: &str) -> Result<(), CollaboratorError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({"chat_id": chat_id, "text": text}))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();
        match parsed {
            Some(api) if api.ok => Ok(()),
            Some(api) => Err(CollaboratorError::Status {
                status: status.as_u16(),
                body: api.description.unwrap_or_default(),
            }),
            None => Err(CollaboratorError::Status {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl ReplySender for TelegramClient {
    async fn send_reply(&self, chat_id: i64, text: &str) -> Result<(), CollaboratorError> {
        let chunks = split_message(text, MAX_MESSAGE_CHARS);
        debug!(chat_id, chunks = chunks.len(), "sending reply");
        for chunk in chunks {
            if let Err(e) = self.send_chunk(chat_id, chunk).await {
                warn!(chat_id, error = %e, "sendMessage failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Split `text` into pieces of at most `max_units` UTF-16 code units,
/// preferring to break after a newline. A character wider than `max_units`
/// still gets a chunk of its own.
pub fn split_message(text: &str, max_units: usize) -> Vec<&str> {
    let max_units = max_units.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.encode_utf16().count() > max_units {
        let mut units = 0;
        let mut hard_end = rest.len();
        for (i, c) in rest.char_indices() {
            units += c.len_utf16();
            if units > max_units {
                hard_end = if i == 0 { c.len_utf8() } else { i };
                break;
            }
        }
        let end = match rest[..hard_end].rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ => hard_end,
        };
        chunks.push(&rest[..end]);
        rest = &rest[end..];
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}
