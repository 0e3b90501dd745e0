use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CapabilityModule, ModuleDescriptor};
use crate::context::{ConversationContext, ConversationMessage, Role};
use crate::error::{CollaboratorError, ModuleError};
use crate::llm::Completion;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are EvoClaw, a concise assistant in a chat app. \
Answer in plain text suitable for a messenger. If the user asks about their trading account, \
suggest /position, /balance or /price <COIN>.";

/// Reply to a message with no text; answered locally without a model call
const EMPTY_MESSAGE_REPLY: &str = "I didn't catch that. Send me a question, or /help for commands.";

/// Catch-all conversational module backed by the completion service
pub struct AiModule {
    descriptor: ModuleDescriptor,
    llm: Arc<dyn Completion>,
    system_prompt: String,
}

impl AiModule {
    pub fn new(llm: Arc<dyn Completion>, system_prompt: Option<String>) -> Self {
        Self {
            descriptor: ModuleDescriptor::new("AI", "Anything else: ask me a question", 50),
            llm,
            system_prompt: system_prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

#[async_trait]
impl CapabilityModule for AiModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn can_handle(&self, _text: &str, _ctx: &ConversationContext) -> Result<bool, ModuleError> {
        Ok(true)
    }

    async fn handle(&self, text: &str, ctx: &ConversationContext) -> Result<String, ModuleError> {
        if text.trim().is_empty() {
            return Ok(EMPTY_MESSAGE_REPLY.to_string());
        }

        let mut messages: Vec<ConversationMessage> = ctx.history().iter().cloned().collect();
        // Called outside the router, the current message is not in history yet
        let has_current = messages
            .last()
            .is_some_and(|m| m.role() == Role::User && m.content() == text);
        if !has_current {
            messages.push(ConversationMessage::new(Role::User, text));
        }

        debug!(turns = messages.len(), "requesting completion");
        let reply = self.llm.complete(&self.system_prompt, &messages).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(CollaboratorError::InvalidResponse("empty completion".to_string()).into());
        }
        Ok(reply.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletion;

    #[test]
    fn test_matches_everything() {
        let ai = AiModule::new(Arc::new(MockCompletion::new()), None);
        let ctx = ConversationContext::new("c", "u");
        for text in ["", "hello", "/unknown", "   "] {
            assert!(ai.can_handle(text, &ctx).unwrap());
        }
        assert_eq!(ai.priority(), 50);
    }

    #[test]
    fn test_blank_system_prompt_uses_default() {
        let ai = AiModule::new(Arc::new(MockCompletion::new()), Some("  ".to_string()));
        assert_eq!(ai.system_prompt(), DEFAULT_SYSTEM_PROMPT);
        let ai = AiModule::new(Arc::new(MockCompletion::new()), Some("be terse".to_string()));
        assert_eq!(ai.system_prompt(), "be terse");
    }

    #[tokio::test]
    async fn test_empty_text_answered_without_model_call() {
        // No expectation set: any call to complete would panic
        let ai = AiModule::new(Arc::new(MockCompletion::new()), None);
        let ctx = ConversationContext::new("c", "u");
        let reply = ai.handle("", &ctx).await.unwrap();
        assert_eq!(reply, EMPTY_MESSAGE_REPLY);
    }

    #[tokio::test]
    async fn test_sends_history_with_current_message() {
        let mut llm = MockCompletion::new();
        llm.expect_complete()
            .withf(|prompt: &str, messages: &[ConversationMessage]| {
                prompt == "be terse"
                    && messages.len() == 3
                    && messages[0].content() == "hi"
                    && messages[2].role() == Role::User
                    && messages[2].content() == "what is rust?"
            })
            .times(1)
            .returning(|_, _| Ok("  A systems language.\n".to_string()));

        let ai = AiModule::new(Arc::new(llm), Some("be terse".to_string()));
        let mut ctx = ConversationContext::new("c", "u");
        ctx.push(Role::User, "hi", 20);
        ctx.push(Role::Assistant, "hello", 20);

        let reply = ai.handle("what is rust?", &ctx).await.unwrap();
        assert_eq!(reply, "A systems language.");
    }

    #[tokio::test]
    async fn test_current_message_not_duplicated() {
        let mut llm = MockCompletion::new();
        llm.expect_complete()
            .withf(|_: &str, messages: &[ConversationMessage]| messages.len() == 1)
            .returning(|_, _| Ok("pong".to_string()));

        let ai = AiModule::new(Arc::new(llm), None);
        let mut ctx = ConversationContext::new("c", "u");
        ctx.push(Role::User, "ping", 20);
        assert_eq!(ai.handle("ping", &ctx).await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_blank_completion_is_an_error() {
        let mut llm = MockCompletion::new();
        llm.expect_complete().returning(|_, _| Ok("   ".to_string()));

        let ai = AiModule::new(Arc::new(llm), None);
        let ctx = ConversationContext::new("c", "u");
        let err = ai.handle("hello", &ctx).await.unwrap_err();
        assert!(matches!(err, ModuleError::Collaborator(_)));
    }
}
