use async_trait::async_trait;

use super::{CapabilityModule, ModuleDescriptor};
use crate::context::ConversationContext;
use crate::error::ModuleError;

const INTRO: &str = "Hi! I'm EvoClaw. Here is what I can do:";
const NO_ROUTER: &str = "Hi! I'm EvoClaw. Ask me anything, or try /position or /price BTC.";

/// Answers `/help` and `/start` with the list of registered modules
pub struct HelpModule {
    descriptor: ModuleDescriptor,
}

impl HelpModule {
    pub fn new() -> Self {
        Self {
            descriptor: ModuleDescriptor::new("Help", "/help: list what this bot can do", 20),
        }
    }
}

impl Default for HelpModule {
    fn default() -> Self {
        Self::new()
    }
}

fn command_name(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    let command = first.strip_prefix('/')?;
    // Group chats append the bot username: /help@evoclaw_bot
    Some(command.split('@').next().unwrap_or(command))
}

#[async_trait]
impl CapabilityModule for HelpModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn can_handle(&self, text: &str, _ctx: &ConversationContext) -> Result<bool, ModuleError> {
        Ok(matches!(
            command_name(text).map(str::to_ascii_lowercase).as_deref(),
            Some("help") | Some("start")
        ))
    }

    async fn handle(&self, _text: &str, ctx: &ConversationContext) -> Result<String, ModuleError> {
        let Some(router) = ctx.router() else {
            return Ok(NO_ROUTER.to_string());
        };

        let mut lines = vec![INTRO.to_string()];
        lines.extend(
            router
                .descriptors()
                .into_iter()
                .filter(|d| d.name != self.descriptor.name)
                .map(|d| format!("• {}: {}", d.name, d.description)),
        );
        Ok(lines.join("\n"))
    }
}
