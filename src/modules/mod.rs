//! Capability modules: self-contained units that decide whether they can
//! answer a message and, if so, produce the reply.

pub mod ai;
pub mod help;
pub mod registry;
pub mod search;
pub mod trading;

use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::context::ConversationContext;
use crate::error::ModuleError;
use crate::http::HttpJsonFetcher;
use crate::llm::LlmClient;
use crate::market::HyperliquidInfo;
use crate::router::DEFAULT_MODULE_TIMEOUT;
use crate::search::SerperClient;

pub use ai::AiModule;
pub use help::HelpModule;
pub use registry::ModuleRegistry;
pub use search::SearchModule;
pub use trading::TradingModule;

/// Static identity of a module, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub description: String,
    /// Lower values are examined first
    pub priority: i32,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            priority,
        }
    }
}

/// The contract every module implements
#[async_trait]
pub trait CapabilityModule: Send + Sync {
    fn descriptor(&self) -> &ModuleDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn priority(&self) -> i32 {
        self.descriptor().priority
    }

    /// Side-effect free and cheap; runs once per candidate per message
    fn can_handle(&self, text: &str, ctx: &ConversationContext) -> Result<bool, ModuleError>;

    /// Produce the reply. Errors make the router move on to the next candidate.
    async fn handle(&self, text: &str, ctx: &ConversationContext) -> Result<String, ModuleError>;

    /// Called once before the module receives traffic
    async fn initialize(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Called once at shutdown
    async fn cleanup(&mut self) {}
}

/// Construct the production module set from configuration.
///
/// Modules whose required collaborator credential is missing fail here rather
/// than on first use. Search is optional and is skipped without a key.
pub fn build_modules(config: &Config) -> Result<Vec<Box<dyn CapabilityModule>>, ModuleError> {
    let timeout = config
        .router
        .module_timeout()
        .unwrap_or(DEFAULT_MODULE_TIMEOUT);
    let mut modules: Vec<Box<dyn CapabilityModule>> = Vec::new();

    let fetcher = Arc::new(HttpJsonFetcher::new(timeout)?);
    let market = Arc::new(HyperliquidInfo::new(fetcher, &config.market.api_url));
    modules.push(Box::new(TradingModule::new(
        market,
        config.market.default_wallet.clone(),
    )));

    modules.push(Box::new(HelpModule::new()));

    if let Some(key) = config.search.api_key.as_deref() {
        let client = SerperClient::new(&config.search.endpoint, key, timeout)?;
        modules.push(Box::new(SearchModule::new(
            Arc::new(client),
            config.search.max_results,
        )));
    }

    let llm = LlmClient::new(
        &config.llm.base_url,
        &config.llm.api_key,
        &config.llm.model,
        config.llm.max_tokens,
        timeout,
    )?;
    modules.push(Box::new(AiModule::new(
        Arc::new(llm),
        config.llm.system_prompt.clone(),
    )));

    Ok(modules)
}
