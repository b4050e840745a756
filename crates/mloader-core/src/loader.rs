//! Loader facade
//!
//! A [`Loader`] bundles one registry, the define handle declaring into it,
//! and the importer resolving from it. Loaders are independent of each
//! other; clones share everything.

use std::sync::Arc;

use mloader_promise::{platform_scheduler, Args, Promise, SchedulerRef};

use crate::define::Define;
use crate::descriptor::ModuleDescriptor;
use crate::error::LoaderError;
use crate::importer::{Importer, IntoIdentifiers, Overrides, Required};
use crate::registry::Registry;
use crate::settings::LoaderSettings;
use crate::transport::{Transform, Transport};

/// Builder for [`Loader`]
#[derive(Default)]
pub struct LoaderBuilder {
    scheduler: Option<SchedulerRef>,
    transport: Option<Arc<dyn Transport>>,
    transforms: Vec<Arc<dyn Transform>>,
    settings: LoaderSettings,
}

impl LoaderBuilder {
    /// Create a builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler for every callback (defaults to [`platform_scheduler`])
    pub fn scheduler(mut self, scheduler: SchedulerRef) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Transport consulted for identifiers nobody defined
    pub fn transport<T: Transport + 'static>(mut self, transport: Arc<T>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Append a transform; transforms run in insertion order
    pub fn transform<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Initial settings
    pub fn settings(mut self, settings: LoaderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the loader
    pub fn build(self) -> Loader {
        let registry = Arc::new(Registry::new());
        let scheduler = self.scheduler.unwrap_or_else(platform_scheduler);
        tracing::debug!(registry = registry.id().as_u64(), "loader created");

        Loader {
            define: Define::new(registry.clone()),
            importer: Importer::new(
                registry,
                scheduler,
                self.transport,
                self.transforms,
                self.settings,
            ),
        }
    }
}

/// Module loader instance
#[derive(Clone)]
pub struct Loader {
    define: Define,
    importer: Importer,
}

impl Loader {
    /// Loader on the platform scheduler, without a transport
    pub fn new() -> Self {
        LoaderBuilder::new().build()
    }

    /// Start building a loader
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::new()
    }

    /// Declare a module
    pub fn define(&self, descriptor: ModuleDescriptor) -> Result<(), LoaderError> {
        self.define.define(descriptor)
    }

    /// Handle declaring into this loader
    pub fn definer(&self) -> &Define {
        &self.define
    }

    /// Import one or more modules
    pub fn import<I: IntoIdentifiers>(&self, ids: I) -> Promise {
        self.importer.import(ids)
    }

    /// Import with override values
    pub fn import_with<I: IntoIdentifiers>(&self, ids: I, overrides: &Overrides) -> Promise {
        self.importer.import_with(ids, overrides)
    }

    /// Cached promise for a single module
    pub fn resolve(&self, id: &str) -> Promise {
        self.importer.resolve(id)
    }

    /// Cached value if resolved, otherwise an import in flight
    pub fn require(&self, id: &str) -> Required {
        self.importer.require(id)
    }

    /// [`require`](Self::require) with overrides and a completion callback
    pub fn require_with<F>(&self, id: &str, overrides: &Overrides, ready: F) -> Required
    where
        F: FnOnce(Args) + Send + 'static,
    {
        self.importer.require_with(id, overrides, ready)
    }

    /// Merge settings used by later fetches
    pub fn configure(&self, settings: LoaderSettings) {
        self.importer.configure(settings);
    }

    /// Current settings
    pub fn settings(&self) -> Arc<LoaderSettings> {
        self.importer.settings()
    }

    /// Forget every module, descriptor and edge
    pub fn clear(&self) {
        self.importer.registry().clear();
    }

    /// Backing registry
    pub fn registry(&self) -> &Arc<Registry> {
        self.importer.registry()
    }

    /// Scheduler callbacks run on
    pub fn scheduler(&self) -> &SchedulerRef {
        self.importer.scheduler()
    }

    /// Underlying importer
    pub fn importer(&self) -> &Importer {
        &self.importer
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mloader_promise::{TurnQueue, Value};

    #[test]
    fn test_loaders_are_isolated() {
        let a = Loader::builder().scheduler(TurnQueue::shared()).build();
        let b = Loader::builder().scheduler(TurnQueue::shared()).build();

        a.define(ModuleDescriptor::named_value("m", 1)).unwrap();
        assert!(a.registry().contains("m"));
        assert!(!b.registry().contains("m"));
        assert_ne!(a.registry().id(), b.registry().id());
    }

    #[test]
    fn test_configure_merges() {
        let loader = Loader::builder()
            .scheduler(TurnQueue::shared())
            .settings(LoaderSettings {
                base_url: "js".into(),
                ..Default::default()
            })
            .build();

        let before = loader.settings();
        loader.configure(LoaderSettings {
            url_args: Some("v=1".into()),
            ..Default::default()
        });

        let after = loader.settings();
        assert_eq!(after.base_url, "js");
        assert_eq!(after.url_args.as_deref(), Some("v=1"));
        assert!(before.url_args.is_none());
    }

    #[test]
    fn test_clear_forgets_definitions() {
        let loader = Loader::builder().scheduler(TurnQueue::shared()).build();
        loader.define(ModuleDescriptor::named_value("m", Value::Null)).unwrap();
        loader.clear();
        assert!(loader.define(ModuleDescriptor::named_value("m", 2)).is_ok());
    }
}
