use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;
use crate::{llm, market, search, telegram};

/// Bot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Messaging channel and HTTP listener
    pub bot: BotConfig,

    /// AI completion collaborator
    pub llm: LlmConfig,

    /// Hyperliquid market data
    pub market: MarketConfig,

    /// Web search (optional; the Search module is skipped without a key)
    pub search: SearchConfig,

    /// Dispatch and conversation-store limits
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub telegram_token: String,
    pub environment: String,
    pub port: u16,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` header, if set
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub api_url: String,
    pub default_wallet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub max_history: usize,
    pub module_timeout_secs: u64,
    pub context_capacity: usize,
    pub context_ttl_secs: Option<u64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            environment: "development".to_string(),
            port: 3000,
            webhook_secret: None,
            api_base: telegram::DEFAULT_API_BASE.to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: llm::DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: llm::DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            system_prompt: None,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            api_url: market::DEFAULT_API_URL.to_string(),
            default_wallet: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: search::DEFAULT_ENDPOINT.to_string(),
            max_results: 5,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_history: crate::context::DEFAULT_MAX_HISTORY,
            module_timeout_secs: 30,
            context_capacity: crate::store::DEFAULT_CAPACITY,
            context_ttl_secs: None,
        }
    }
}

impl RouterConfig {
    pub fn module_timeout(&self) -> Option<Duration> {
        (self.module_timeout_secs > 0).then(|| Duration::from_secs(self.module_timeout_secs))
    }

    pub fn context_ttl(&self) -> Option<Duration> {
        self.context_ttl_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

/// Treat empty values as unset
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(environment = %config.bot.environment, port = config.bot.port, "configuration loaded");
        Ok(config)
    }

    /// Load from `path` if given (defaults otherwise), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable source
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.bot.telegram_token = v;
        }
        if let Some(v) = get("TELEGRAM_WEBHOOK_SECRET") {
            self.bot.webhook_secret = Some(v);
        }
        if let Some(v) = get("APP_ENV") {
            self.bot.environment = v;
        }
        if let Some(v) = get("PORT") {
            self.bot.port = v.trim().parse().map_err(|e| ConfigError::Invalid {
                key: "PORT",
                reason: format!("{e}"),
            })?;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("SYSTEM_PROMPT") {
            self.llm.system_prompt = Some(v);
        }
        if let Some(v) = get("SEARCH_API_KEY") {
            self.search.api_key = Some(v);
        }
        if let Some(v) = get("DEFAULT_WALLET") {
            self.market.default_wallet = Some(v);
        }
        Ok(())
    }

    /// Check required credentials and limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.telegram_token.trim().is_empty() {
            return Err(ConfigError::Missing("bot.telegram_token"));
        }
        if self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("llm.api_key"));
        }
        // production webhooks must be authenticated
        if self.is_production()
            && self
                .bot
                .webhook_secret
                .as_deref()
                .is_none_or(|s| s.trim().is_empty())
        {
            return Err(ConfigError::Missing("bot.webhook_secret"));
        }
        if self.router.max_history == 0 {
            return Err(ConfigError::Invalid {
                key: "router.max_history",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.router.context_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "router.context_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.search.max_results == 0 {
            return Err(ConfigError::Invalid {
                key: "search.max_results",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.bot.environment.eq_ignore_ascii_case("production")
    }
}
