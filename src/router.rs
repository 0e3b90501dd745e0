//! Priority-ordered dispatch of one inbound message to the first module that
//! both matches and answers it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn, Instrument};

use crate::context::{ConversationContext, Role, DEFAULT_MAX_HISTORY};
use crate::error::{ModuleError, RegistryError};
use crate::modules::{CapabilityModule, ModuleDescriptor, ModuleRegistry};

/// Reply returned when no module produced an answer
pub const FALLBACK_RESPONSE: &str =
    "Sorry, I couldn't process that message right now. Send /help to see what I can do.";

/// Default per-module deadline for `handle`
pub const DEFAULT_MODULE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Predicate,
    Handler,
    Timeout,
}

/// A module that matched (or tried to) but did not produce the answer
#[derive(Debug, Clone, Serialize)]
pub struct ModuleFailure {
    pub module: String,
    pub stage: FailureStage,
    pub error: String,
}

/// Result of one routing call
#[derive(Debug, Clone, Serialize)]
pub struct Dispatch {
    pub response: String,
    /// `None` when the fallback was returned
    pub handled_by: Option<String>,
    pub failures: Vec<ModuleFailure>,
}

impl Dispatch {
    pub fn is_fallback(&self) -> bool {
        self.handled_by.is_none()
    }
}

/// The message router. Holds no per-call state; everything persistent lives in
/// the `ConversationContext`.
pub struct Router {
    registry: ModuleRegistry,
    max_history: usize,
    module_timeout: Option<Duration>,
    fallback: String,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(ModuleRegistry::new())
    }
}

impl Router {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            registry,
            max_history: DEFAULT_MAX_HISTORY,
            module_timeout: Some(DEFAULT_MODULE_TIMEOUT),
            fallback: FALLBACK_RESPONSE.to_string(),
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// `None` lets a module's `handle` run without a deadline
    pub fn with_module_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.module_timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn register(&mut self, module: Box<dyn CapabilityModule>) -> Result<(), RegistryError> {
        self.registry.register(module)
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.registry.descriptors()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Route one message and return the reply text. Never fails: when nothing
    /// answers, the fallback is returned.
    pub async fn handle_message(&self, text: &str, ctx: &mut ConversationContext) -> String {
        self.dispatch(text, ctx).await.response
    }

    /// Like `handle_message`, but also reports which module answered and which failed.
    pub async fn dispatch(&self, text: &str, ctx: &mut ConversationContext) -> Dispatch {
        let span = ctx.span().clone();
        self.dispatch_in_span(text, ctx).instrument(span).await
    }

    async fn dispatch_in_span(&self, text: &str, ctx: &mut ConversationContext) -> Dispatch {
        ctx.push(Role::User, text, self.max_history);
        let mut failures = Vec::new();

        for module in self.registry.iter() {
            let name = module.name();

            match check_predicate(module, text, ctx) {
                Ok(true) => debug!(module = %name, "module matched"),
                Ok(false) => continue,
                Err(e) => {
                    warn!(module = %name, error = %e, "predicate failed, skipping module");
                    failures.push(ModuleFailure {
                        module: name.to_string(),
                        stage: FailureStage::Predicate,
                        error: e.to_string(),
                    });
                    continue;
                }
            }

            match self.run_handler(module, text, ctx).await {
                Ok(response) => {
                    info!(module = %name, response_len = response.len(), "message handled");
                    ctx.push(Role::Assistant, response.clone(), self.max_history);
                    return Dispatch {
                        response,
                        handled_by: Some(name.to_string()),
                        failures,
                    };
                }
                Err(e) => {
                    error!(module = %name, error = %e, "module failed, trying next candidate");
                    let stage = match e {
                        ModuleError::Timeout(_) => FailureStage::Timeout,
                        _ => FailureStage::Handler,
                    };
                    failures.push(ModuleFailure {
                        module: name.to_string(),
                        stage,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(failed = failures.len(), "no module answered, using fallback");
        ctx.push(Role::Assistant, self.fallback.clone(), self.max_history);
        Dispatch {
            response: self.fallback.clone(),
            handled_by: None,
            failures,
        }
    }

    async fn run_handler(
        &self,
        module: &dyn CapabilityModule,
        text: &str,
        ctx: &ConversationContext,
    ) -> Result<String, ModuleError> {
        let guarded = AssertUnwindSafe(module.handle(text, ctx)).catch_unwind();
        let outcome = match self.module_timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .map_err(|_| ModuleError::Timeout(limit))?,
            None => guarded.await,
        };
        outcome.unwrap_or_else(|_| Err(ModuleError::Other("handler panicked".to_string())))
    }
}

/// Run a predicate, turning a panic into an error so one broken module cannot
/// stop dispatch.
fn check_predicate(
    module: &dyn CapabilityModule,
    text: &str,
    ctx: &ConversationContext,
) -> Result<bool, ModuleError> {
    match catch_unwind(AssertUnwindSafe(|| module.can_handle(text, ctx))) {
        Ok(result) => result,
        Err(_) => Err(ModuleError::Other("predicate panicked".to_string())),
    }
}
