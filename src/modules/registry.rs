use tracing::{error, info};

use super::{CapabilityModule, ModuleDescriptor};
use crate::error::RegistryError;

/// Registry that holds all modules in dispatch order
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn CapabilityModule>>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Register a module, keeping the registry sorted by priority.
    ///
    /// The sort is stable, so equal priorities keep registration order.
    pub fn register(&mut self, module: Box<dyn CapabilityModule>) -> Result<(), RegistryError> {
        let name = module.name().trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.get(&name).is_some() {
            return Err(RegistryError::DuplicateName(name));
        }

        info!(module = %name, priority = module.priority(), "registering module");
        self.modules.push(module);
        self.modules.sort_by_key(|m| m.priority());
        Ok(())
    }

    /// Register every module in order, stopping at the first misconfiguration
    pub fn register_all(
        &mut self,
        modules: impl IntoIterator<Item = Box<dyn CapabilityModule>>,
    ) -> Result<(), RegistryError> {
        for module in modules {
            self.register(module)?;
        }
        Ok(())
    }

    /// Modules in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &dyn CapabilityModule> {
        self.modules.iter().map(|m| m.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn CapabilityModule> {
        self.iter().find(|m| m.name() == name)
    }

    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.iter().map(|m| m.descriptor().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Initialize every module. Failures are logged; the module stays registered.
    pub async fn initialize_all(&mut self) {
        for module in self.modules.iter_mut() {
            let name = module.name().to_string();
            match module.initialize().await {
                Ok(()) => info!(module = %name, "module initialized"),
                Err(e) => error!(module = %name, error = %e, "failed to initialize module"),
            }
        }
    }

    /// Shutdown all modules gracefully
    pub async fn cleanup_all(&mut self) {
        for module in self.modules.iter_mut() {
            info!(module = %module.name(), "cleaning up module");
            module.cleanup().await;
        }
    }
}
