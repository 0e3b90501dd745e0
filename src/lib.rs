pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod llm;
pub mod market;
pub mod metrics;
/// Capability modules and the registry that orders them.
pub mod modules;
pub mod router;
pub mod search;
pub mod server;
pub mod store;
pub mod telegram;

pub use context::{ConversationContext, ConversationMessage, Role};
pub use error::{CollaboratorError, ConfigError, ModuleError, RegistryError};
pub use modules::{CapabilityModule, ModuleDescriptor, ModuleRegistry};
pub use router::{Dispatch, Router, FALLBACK_RESPONSE};
pub use store::ContextStore;
