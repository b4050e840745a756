//! Define adapter
//!
//! [`Define`] validates descriptors and records them in the registry. A
//! handle scoped to a fetch request additionally keeps the anonymous
//! descriptors it receives, so they are paired with the identifier that
//! request was made for rather than with whatever is at the front of the
//! shared queue.

use std::sync::Arc;

use mloader_promise::{Outcome, Value};
use parking_lot::Mutex;

use crate::descriptor::ModuleDescriptor;
use crate::error::LoaderError;
use crate::registry::Registry;

/// Handle for declaring modules
#[derive(Clone)]
pub struct Define {
    registry: Arc<Registry>,
    captured: Option<Arc<Mutex<Vec<ModuleDescriptor>>>>,
}

impl Define {
    /// Create a handle declaring into `registry`
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            captured: None,
        }
    }

    /// Handle that keeps anonymous descriptors to itself
    pub(crate) fn capturing(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            captured: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Anonymous descriptors received by a capturing handle
    pub(crate) fn take_captured(&self) -> Vec<ModuleDescriptor> {
        self.captured
            .as_ref()
            .map(|c| std::mem::take(&mut *c.lock()))
            .unwrap_or_default()
    }

    /// Declare a module
    ///
    /// Fails synchronously with `DuplicateModuleDefinition` when the name is
    /// already taken, and with `InvalidDefinition` for an empty name or an
    /// empty dependency identifier.
    pub fn define(&self, descriptor: ModuleDescriptor) -> Result<(), LoaderError> {
        validate(&descriptor)?;

        if descriptor.is_anonymous() {
            if let Some(captured) = &self.captured {
                tracing::debug!(deps = ?descriptor.deps(), "anonymous module captured");
                captured.lock().push(descriptor);
                return Ok(());
            }
        }

        let name = descriptor.name().map(str::to_string);
        self.registry.insert_pending(descriptor)?;
        match name {
            Some(name) => tracing::debug!(module = %name, "module defined"),
            None => tracing::debug!("anonymous module queued"),
        }
        Ok(())
    }

    /// `define(name, deps, factory)`
    pub fn named<F>(&self, name: &str, deps: &[&str], factory: F) -> Result<(), LoaderError>
    where
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        self.define(ModuleDescriptor::named(name, deps.iter().copied(), factory))
    }

    /// `define(name, value)`
    pub fn value(&self, name: &str, value: impl Into<Value>) -> Result<(), LoaderError> {
        self.define(ModuleDescriptor::named_value(name, value))
    }

    /// `define(deps, factory)`
    pub fn anonymous<F>(&self, deps: &[&str], factory: F) -> Result<(), LoaderError>
    where
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        self.define(ModuleDescriptor::anonymous(deps.iter().copied(), factory))
    }

    /// Registry this handle declares into
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

fn validate(descriptor: &ModuleDescriptor) -> Result<(), LoaderError> {
    if descriptor.name().is_some_and(str::is_empty) {
        return Err(LoaderError::InvalidDefinition(
            "module name must not be empty".to_string(),
        ));
    }
    if descriptor.all_deps().iter().any(String::is_empty) {
        let who = descriptor.name().unwrap_or("<anonymous>");
        return Err(LoaderError::InvalidDefinition(format!(
            "{} lists an empty dependency identifier",
            who
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_named_and_duplicate() {
        let define = Define::new(Arc::new(Registry::new()));

        define.value("z", 1).unwrap();
        assert_eq!(
            define.value("z", 2),
            Err(LoaderError::DuplicateModuleDefinition("z".into()))
        );
        assert!(define.registry().contains("z"));
    }

    #[test]
    fn test_define_rejects_empty_identifiers() {
        let define = Define::new(Arc::new(Registry::new()));

        assert!(matches!(
            define.value("", 1),
            Err(LoaderError::InvalidDefinition(_))
        ));
        assert!(matches!(
            define.named("m", &["a", ""], |_| Ok(Value::Null)),
            Err(LoaderError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_anonymous_goes_to_registry_queue() {
        let registry = Arc::new(Registry::new());
        let define = Define::new(registry.clone());

        define.anonymous(&["a"], |_| Ok(Value::Null)).unwrap();
        assert_eq!(registry.stats().anonymous, 1);
    }

    #[test]
    fn test_capturing_keeps_anonymous() {
        let registry = Arc::new(Registry::new());
        let define = Define::capturing(registry.clone());

        define.define(ModuleDescriptor::anonymous_value(5)).unwrap();
        define.value("named", 6).unwrap();

        assert_eq!(registry.stats().anonymous, 0);
        assert!(registry.contains("named"));
        assert_eq!(define.take_captured().len(), 1);
        assert!(define.take_captured().is_empty());
    }
}
