//! Transport collaborators
//!
//! The loader never performs I/O. When an identifier has no pending
//! descriptor it asks a [`Transport`] for one; the transport settles a
//! promise with a [`Fetched`] result (or any plain value, taken as the
//! module's literal) and may call `define` through the request's handle.
//! [`Transform`] hooks may rewrite the compiled descriptor before it loads.

use std::sync::Arc;

use mloader_promise::{Promise, SchedulerRef, Value};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::define::Define;
use crate::descriptor::ModuleDescriptor;
use crate::error::LoaderError;
use crate::settings::LoaderSettings;

/// Everything a transport gets to know about one fetch
#[derive(Clone)]
pub struct FetchRequest {
    id: String,
    settings: Arc<LoaderSettings>,
    scheduler: SchedulerRef,
    define: Define,
}

impl FetchRequest {
    pub(crate) fn new(
        id: &str,
        settings: Arc<LoaderSettings>,
        scheduler: SchedulerRef,
        define: Define,
    ) -> Self {
        Self {
            id: id.to_string(),
            settings,
            scheduler,
            define,
        }
    }

    /// Requested identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Locator for the identifier under the current settings
    pub fn locator(&self) -> String {
        self.settings.locate(&self.id)
    }

    /// Locator with url args appended
    pub fn url(&self) -> String {
        self.settings.url(&self.id)
    }

    /// Settings snapshot taken when the fetch started
    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    /// Scheduler the loader dispatches through
    pub fn scheduler(&self) -> &SchedulerRef {
        &self.scheduler
    }

    /// Handle for declaring modules while serving this request
    ///
    /// Anonymous descriptors declared through it are paired with this
    /// request's identifier.
    pub fn define(&self) -> &Define {
        &self.define
    }
}

/// Result of a fetch
#[derive(Clone)]
pub enum Fetched {
    /// The module's value
    Value(Value),
    /// A bundle of descriptors
    Descriptors(Vec<ModuleDescriptor>),
    /// The transport already called `define`
    Registered,
}

impl Fetched {
    /// Wrap for settling a promise
    pub fn into_value(self) -> Value {
        Value::native(self)
    }

    /// Unwrap a settled value produced by [`into_value`](Self::into_value)
    pub fn from_value(value: &Value) -> Option<Arc<Fetched>> {
        value.downcast_arc::<Fetched>()
    }
}

/// Source of module content
pub trait Transport: Send + Sync {
    /// Start fetching `request.id()`
    ///
    /// The promise resolves with a [`Fetched`] (wrapped with
    /// [`Fetched::into_value`]) or any plain value. A rejection reaches the
    /// importer untouched.
    fn fetch(&self, request: FetchRequest) -> Promise;
}

/// Descriptor rewrite step run between fetch and load
pub trait Transform: Send + Sync {
    /// Rewrite the descriptor compiled for `id`
    fn transform(&self, id: &str, descriptor: ModuleDescriptor) -> Result<ModuleDescriptor, LoaderError>;
}

impl<F> Transform for F
where
    F: Fn(&str, ModuleDescriptor) -> Result<ModuleDescriptor, LoaderError> + Send + Sync,
{
    fn transform(&self, id: &str, descriptor: ModuleDescriptor) -> Result<ModuleDescriptor, LoaderError> {
        self(id, descriptor)
    }
}

/// Script run by [`MemoryTransport`] in place of evaluating fetched code
pub type Script = Arc<dyn Fn(&Define) -> Result<(), LoaderError> + Send + Sync>;

/// Content served for one locator
#[derive(Clone)]
pub enum Source {
    /// Serve a module value
    Value(Value),
    /// Serve a descriptor bundle
    Descriptors(Vec<ModuleDescriptor>),
    /// Run a script that calls `define`
    Script(Script),
    /// Fail with `LoaderError::Transport`
    Failure(String),
}

/// In-memory transport keyed by locator
///
/// Results are delivered in a later turn through the request's scheduler.
#[derive(Default)]
pub struct MemoryTransport {
    sources: RwLock<FxHashMap<String, Source>>,
    fetches: Mutex<FxHashMap<String, usize>>,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `source` for `locator`
    pub fn insert(&self, locator: impl Into<String>, source: Source) {
        self.sources.write().insert(locator.into(), source);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(self, locator: impl Into<String>, source: Source) -> Self {
        self.insert(locator, source);
        self
    }

    /// Serve a value
    pub fn with_value(self, locator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(locator, Source::Value(value.into()))
    }

    /// Serve a script
    pub fn with_script<F>(self, locator: impl Into<String>, script: F) -> Self
    where
        F: Fn(&Define) -> Result<(), LoaderError> + Send + Sync + 'static,
    {
        self.with(locator, Source::Script(Arc::new(script)))
    }

    /// Number of fetches made for `locator`
    pub fn fetch_count(&self, locator: &str) -> usize {
        self.fetches.lock().get(locator).copied().unwrap_or(0)
    }

    /// Number of fetches made overall
    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }

    fn serve(request: &FetchRequest, source: Option<Source>) -> Result<Fetched, Value> {
        match source {
            None => Err(LoaderError::UnresolvedIdentifier(request.id().to_string()).into()),
            Some(Source::Value(value)) => Ok(Fetched::Value(value)),
            Some(Source::Descriptors(list)) => Ok(Fetched::Descriptors(list)),
            Some(Source::Script(script)) => {
                script(request.define())?;
                Ok(Fetched::Registered)
            }
            Some(Source::Failure(reason)) => Err(LoaderError::Transport {
                id: request.id().to_string(),
                reason,
            }
            .into()),
        }
    }
}

impl Transport for MemoryTransport {
    fn fetch(&self, request: FetchRequest) -> Promise {
        let locator = request.locator();
        *self.fetches.lock().entry(locator.clone()).or_insert(0) += 1;
        let source = self.sources.read().get(&locator).cloned();
        tracing::debug!(module = %request.id(), %locator, "fetch");

        let promise = Promise::new(request.scheduler().clone());
        let settle = promise.clone();
        request.scheduler().clone().run_async(Box::new(move || {
            match Self::serve(&request, source) {
                Ok(fetched) => settle.resolve(vec![fetched.into_value()]),
                Err(reason) => settle.reject(vec![reason]),
            };
        }));
        promise
    }
}
