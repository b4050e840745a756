//! Module registry
//!
//! One [`Registry`] per loader instance holds:
//! - `modules`: identifier to promise, the single-flight cache
//! - `pending`: named descriptors declared but not yet consumed
//! - `anonymous`: unnamed descriptors waiting to be paired with an identifier
//! - the dependency graph of everything linked so far

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use mloader_promise::{Promise, State, Value};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::descriptor::ModuleDescriptor;
use crate::error::LoaderError;
use crate::graph::DependencyGraph;

/// Unique identifier for a Registry
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegistryId(u64);

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

impl RegistryId {
    fn next() -> Self {
        RegistryId(NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Default)]
struct Namespace {
    modules: FxHashMap<String, Promise>,
    pending: FxHashMap<String, ModuleDescriptor>,
    anonymous: VecDeque<ModuleDescriptor>,
    /// Identifiers whose descriptor is being fetched
    fetching: FxHashSet<String>,
    graph: DependencyGraph,
    hits: usize,
    misses: usize,
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Cached module promises
    pub modules: usize,
    /// Named descriptors not yet consumed
    pub pending: usize,
    /// Queued anonymous descriptors
    pub anonymous: usize,
    /// Imports served from the cache
    pub hits: usize,
    /// Imports that started a pipeline
    pub misses: usize,
}

/// Shared state of one loader instance
pub struct Registry {
    id: RegistryId,
    inner: Mutex<Namespace>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            id: RegistryId::next(),
            inner: Mutex::new(Namespace::default()),
        }
    }

    /// Registry identifier
    pub fn id(&self) -> RegistryId {
        self.id
    }

    /// Record a descriptor
    ///
    /// Named descriptors fail with `DuplicateModuleDefinition` if the name is
    /// already pending, or already cached and not currently being fetched.
    /// Anonymous descriptors are queued.
    pub fn insert_pending(&self, descriptor: ModuleDescriptor) -> Result<(), LoaderError> {
        let mut ns = self.inner.lock();
        if descriptor.is_anonymous() {
            ns.anonymous.push_back(descriptor);
            return Ok(());
        }

        let name = descriptor.name().unwrap_or_default().to_string();
        let taken = ns.pending.contains_key(&name)
            || (ns.modules.contains_key(&name) && !ns.fetching.contains(&name));
        if taken {
            return Err(LoaderError::DuplicateModuleDefinition(name));
        }

        ns.pending.insert(name, descriptor);
        Ok(())
    }

    /// Get the cached promise for `id`, creating it with `create` on a miss
    ///
    /// Returns the promise and whether it was just created.
    pub fn module_or_insert_with<F>(&self, id: &str, create: F) -> (Promise, bool)
    where
        F: FnOnce() -> Promise,
    {
        let mut ns = self.inner.lock();
        if let Some(existing) = ns.modules.get(id) {
            let existing = existing.clone();
            ns.hits += 1;
            tracing::debug!(module = %id, "Module cache HIT");
            return (existing, false);
        }

        let promise = create();
        ns.modules.insert(id.to_string(), promise.clone());
        ns.misses += 1;
        tracing::debug!(module = %id, "Module cache MISS");
        (promise, true)
    }

    /// Cached promise for `id`
    pub fn module(&self, id: &str) -> Option<Promise> {
        self.inner.lock().modules.get(id).cloned()
    }

    /// Whether `id` is cached or pending
    pub fn contains(&self, id: &str) -> bool {
        let ns = self.inner.lock();
        ns.modules.contains_key(id) || ns.pending.contains_key(id)
    }

    /// Resolved value of `id`, if its promise has resolved
    pub fn resolved_value(&self, id: &str) -> Option<Value> {
        let promise = self.module(id)?;
        match promise.state() {
            State::Resolved => promise
                .value()
                .map(|values| values.into_iter().next().unwrap_or_default()),
            _ => None,
        }
    }

    /// Remove and return the pending descriptor for `id`
    pub fn take_pending(&self, id: &str) -> Option<ModuleDescriptor> {
        self.inner.lock().pending.remove(id)
    }

    /// Remove and return the oldest anonymous descriptor
    pub fn take_anonymous(&self) -> Option<ModuleDescriptor> {
        self.inner.lock().anonymous.pop_front()
    }

    /// Discard all queued anonymous descriptors, returning how many there were
    pub fn clear_anonymous(&self) -> usize {
        let mut ns = self.inner.lock();
        let count = ns.anonymous.len();
        ns.anonymous.clear();
        count
    }

    /// Mark `id` as being fetched; its name may be defined meanwhile
    pub fn begin_fetch(&self, id: &str) {
        self.inner.lock().fetching.insert(id.to_string());
    }

    /// Clear the fetch mark for `id`
    pub fn end_fetch(&self, id: &str) {
        self.inner.lock().fetching.remove(id);
    }

    /// Record the dependency edges of `id`
    ///
    /// Fails with `CircularDependency` if any dependency can already reach
    /// `id`; nothing is recorded in that case.
    pub fn link(&self, id: &str, deps: &[String]) -> Result<(), LoaderError> {
        self.inner.lock().graph.link(id, deps).map_err(LoaderError::from)
    }

    /// Identifiers `id` depends on, transitively
    pub fn transitive_dependencies(&self, id: &str) -> Result<Vec<String>, LoaderError> {
        self.inner
            .lock()
            .graph
            .transitive_dependencies(id)
            .map_err(LoaderError::from)
    }

    /// Linked identifiers, dependencies first
    pub fn load_order(&self) -> Result<Vec<String>, LoaderError> {
        self.inner.lock().graph.topological_order().map_err(LoaderError::from)
    }

    /// Current statistics
    pub fn stats(&self) -> RegistryStats {
        let ns = self.inner.lock();
        RegistryStats {
            modules: ns.modules.len(),
            pending: ns.pending.len(),
            anonymous: ns.anonymous.len(),
            hits: ns.hits,
            misses: ns.misses,
        }
    }

    /// Drop every module, descriptor and edge
    ///
    /// Promises already handed out keep working; they are simply no longer
    /// reachable through this registry.
    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.inner.lock());
        tracing::debug!(registry = self.id.0, modules = old.modules.len(), "registry cleared");
        drop(old);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
