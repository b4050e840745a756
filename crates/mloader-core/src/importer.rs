//! Resolver and importer
//!
//! `import` maps identifiers to promises. The first request for an identifier
//! creates its promise, caches it in the registry, and starts the pipeline:
//!
//! 1. descriptor: taken from `pending`, or fetched, compiled and transformed
//! 2. link: dependency edges recorded, cycles rejected
//! 3. dependencies: resolved through the same cache
//! 4. instantiate: factory called with the dependency values in order
//!
//! Every later request, settled or not, gets the cached promise.

use std::sync::Arc;

use mloader_promise::{all, guarded, when, Args, Promise, SchedulerRef, State, Value};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::define::Define;
use crate::descriptor::ModuleDescriptor;
use crate::error::LoaderError;
use crate::registry::Registry;
use crate::settings::LoaderSettings;
use crate::transport::{FetchRequest, Fetched, Transform, Transport};

/// Values injected in place of registry lookups
#[derive(Clone, Default)]
pub struct Overrides {
    values: FxHashMap<String, Value>,
}

impl Overrides {
    /// Create an empty set of overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, id: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(id, value);
        self
    }

    /// Use `value` for `id`
    pub fn insert(&mut self, id: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(id.into(), value.into());
    }

    /// Override for `id`
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.values.get(id)
    }

    /// Whether no override is set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Overrides {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut overrides = Self::new();
        for (id, value) in iter {
            overrides.insert(id, value);
        }
        overrides
    }
}

/// One or several module identifiers
pub trait IntoIdentifiers {
    /// Identifiers in request order
    fn into_identifiers(self) -> Vec<String>;
}

impl IntoIdentifiers for &str {
    fn into_identifiers(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoIdentifiers for String {
    fn into_identifiers(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoIdentifiers for &String {
    fn into_identifiers(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl IntoIdentifiers for Vec<String> {
    fn into_identifiers(self) -> Vec<String> {
        self
    }
}

impl IntoIdentifiers for Vec<&str> {
    fn into_identifiers(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl IntoIdentifiers for &[&str] {
    fn into_identifiers(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IntoIdentifiers for &[String] {
    fn into_identifiers(self) -> Vec<String> {
        self.to_vec()
    }
}

impl<const N: usize> IntoIdentifiers for [&str; N] {
    fn into_identifiers(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

/// Result of `require`
#[derive(Debug, Clone)]
pub enum Required {
    /// The module had already resolved
    Ready(Value),
    /// The module is loading; the promise settles like `import`'s
    Pending(Promise),
}

impl Required {
    /// Whether the value was available synchronously
    pub fn is_ready(&self) -> bool {
        matches!(self, Required::Ready(_))
    }

    /// Value, if ready
    pub fn value(&self) -> Option<&Value> {
        match self {
            Required::Ready(value) => Some(value),
            Required::Pending(_) => None,
        }
    }

    /// Promise, if still loading
    pub fn promise(&self) -> Option<&Promise> {
        match self {
            Required::Ready(_) => None,
            Required::Pending(promise) => Some(promise),
        }
    }
}

struct Shared {
    registry: Arc<Registry>,
    scheduler: SchedulerRef,
    transport: Option<Arc<dyn Transport>>,
    transforms: Vec<Arc<dyn Transform>>,
    settings: RwLock<Arc<LoaderSettings>>,
}

/// Import pipeline bound to one registry
#[derive(Clone)]
pub struct Importer {
    shared: Arc<Shared>,
}

impl Importer {
    pub(crate) fn new(
        registry: Arc<Registry>,
        scheduler: SchedulerRef,
        transport: Option<Arc<dyn Transport>>,
        transforms: Vec<Arc<dyn Transform>>,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                scheduler,
                transport,
                transforms,
                settings: RwLock::new(Arc::new(settings)),
            }),
        }
    }

    /// Registry backing this importer
    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    /// Scheduler every promise dispatches through
    pub fn scheduler(&self) -> &SchedulerRef {
        &self.shared.scheduler
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> Arc<LoaderSettings> {
        self.shared.settings.read().clone()
    }

    /// Merge `settings` into the current ones
    ///
    /// Fetches already started keep the snapshot they were given.
    pub fn configure(&self, settings: LoaderSettings) {
        let mut current = self.shared.settings.write();
        Arc::make_mut(&mut *current).merge(settings);
    }

    /// Import one or more modules
    ///
    /// Settles with the module values spread out in request order, or
    /// rejects with the first failure.
    pub fn import<I: IntoIdentifiers>(&self, ids: I) -> Promise {
        self.import_with(ids, &Overrides::default())
    }

    /// Import, taking values from `overrides` where present
    ///
    /// Overridden identifiers never touch the registry. A single identifier
    /// without an override yields the cached module promise itself, so
    /// repeated imports of it are the same promise.
    pub fn import_with<I: IntoIdentifiers>(&self, ids: I, overrides: &Overrides) -> Promise {
        let ids = ids.into_identifiers();
        let scheduler = &self.shared.scheduler;

        if let [id] = ids.as_slice() {
            if overrides.get(id).is_none() {
                let module = self.resolve(id);
                let id = id.clone();
                module.fail(move |reason| {
                    tracing::warn!(module = %id, reason = ?reason, "import failed");
                });
                return module;
            }
        }

        let items = ids
            .iter()
            .map(|id| match overrides.get(id) {
                Some(value) => {
                    tracing::debug!(module = %id, "using override");
                    override_item(scheduler, value)
                }
                None => Value::Promise(self.resolve(id)),
            })
            .collect();

        let joined = when(scheduler, items);
        joined.fail(move |reason| {
            tracing::warn!(modules = ?ids, reason = ?reason, "import failed");
        });
        joined
    }

    /// Promise for a single module, starting its pipeline on first request
    pub fn resolve(&self, id: &str) -> Promise {
        let scheduler = self.shared.scheduler.clone();
        let (promise, created) = self
            .shared
            .registry
            .module_or_insert_with(id, || Promise::new(scheduler));

        if created {
            let this = self.clone();
            let id = id.to_string();
            let target = promise.clone();
            self.shared
                .scheduler
                .run_async(Box::new(move || this.run(id, target)));
        }
        promise
    }

    /// Return the cached value if resolved, otherwise import
    pub fn require(&self, id: &str) -> Required {
        self.require_with(id, &Overrides::default(), |_| {})
    }

    /// [`require`](Self::require) with overrides and a completion callback
    ///
    /// `ready` runs with the module value once an import started here
    /// resolves; it is not called when the value is returned synchronously.
    pub fn require_with<F>(&self, id: &str, overrides: &Overrides, ready: F) -> Required
    where
        F: FnOnce(Args) + Send + 'static,
    {
        if let Some(value) = self.shared.registry.resolved_value(id) {
            return Required::Ready(value);
        }
        let promise = self.import_with(id, overrides);
        promise.done(ready);
        Required::Pending(promise)
    }

    fn run(&self, id: String, target: Promise) {
        let this = self.clone();
        self.descriptor_for(&id).notify(move |settlement| {
            if settlement.state != State::Resolved {
                target.reject(settlement.values);
                return;
            }
            let descriptor = settlement
                .values
                .first()
                .and_then(|v| v.downcast_arc::<ModuleDescriptor>());
            match descriptor {
                Some(descriptor) => this.load(id, (*descriptor).clone(), target),
                None => {
                    target.reject(vec![LoaderError::UnresolvedIdentifier(id).into()]);
                }
            }
        });
    }

    /// Promise of the descriptor for `id`, wrapped as a native value
    fn descriptor_for(&self, id: &str) -> Promise {
        let scheduler = self.shared.scheduler.clone();
        let registry = &self.shared.registry;

        if let Some(descriptor) = registry.take_pending(id) {
            tracing::debug!(module = %id, "using pending descriptor");
            return Promise::resolved(scheduler, vec![Value::native(descriptor)]);
        }

        let Some(transport) = self.shared.transport.clone() else {
            return Promise::rejected(
                scheduler,
                vec![LoaderError::UnresolvedIdentifier(id.to_string()).into()],
            );
        };

        registry.begin_fetch(id);
        let define = Define::capturing(registry.clone());
        let request = FetchRequest::new(id, self.settings(), scheduler.clone(), define.clone());
        let fetched = match guarded(|| Ok(transport.fetch(request).into())) {
            Ok(value) => Promise::cast(scheduler.clone(), value),
            Err(reason) => Promise::rejected(scheduler.clone(), vec![reason]),
        };

        let compiled = Promise::new(scheduler);
        let settle = compiled.clone();
        let this = self.clone();
        let id = id.to_string();
        fetched.notify(move |settlement| {
            let result = match settlement.state {
                State::Resolved => {
                    let fetched = settlement.values.into_iter().next().unwrap_or_default();
                    guarded(|| {
                        this.compile(&id, fetched, &define)
                            .map(Value::native)
                            .map_err(Value::from)
                    })
                }
                _ => {
                    this.shared.registry.end_fetch(&id);
                    settle.reject(settlement.values);
                    return;
                }
            };

            this.shared.registry.end_fetch(&id);
            match result {
                Ok(descriptor) => settle.resolve(vec![descriptor]),
                Err(reason) => settle.reject(vec![reason]),
            };
        });
        compiled
    }

    /// Turn a transport result into the descriptor for `id`
    fn compile(&self, id: &str, fetched: Value, define: &Define) -> Result<ModuleDescriptor, LoaderError> {
        let captured = define.take_captured();

        let mut descriptor = match Fetched::from_value(&fetched) {
            None => ModuleDescriptor::named_value(id, fetched),
            Some(result) => match &*result {
                Fetched::Value(value) => ModuleDescriptor::named_value(id, value.clone()),
                Fetched::Descriptors(bundle) => {
                    self.pick(id, bundle.iter().cloned().chain(captured), false)?
                }
                Fetched::Registered => self.pick(id, captured, true)?,
            },
        };

        for transform in &self.shared.transforms {
            descriptor = transform.transform(id, descriptor)?;
        }

        tracing::debug!(module = %id, deps = ?descriptor.all_deps(), "compiled");
        Ok(descriptor)
    }

    /// Choose the descriptor for `id` among fetched candidates
    ///
    /// A candidate named `id` wins, then a pending definition of `id`, then
    /// the first anonymous candidate. Other named candidates are registered
    /// as pending unless the name is already known. With `use_queue`, the
    /// shared anonymous queue is the last resort and is emptied afterwards.
    fn pick<I>(&self, id: &str, candidates: I, use_queue: bool) -> Result<ModuleDescriptor, LoaderError>
    where
        I: IntoIterator<Item = ModuleDescriptor>,
    {
        let registry = &self.shared.registry;
        let mut chosen = None;
        let mut anonymous = Vec::new();

        for candidate in candidates {
            let name = candidate.name().map(str::to_string);
            match name {
                None => anonymous.push(candidate),
                Some(name) if name == id && chosen.is_none() => chosen = Some(candidate),
                Some(name) => {
                    if let Err(err) = registry.insert_pending(candidate) {
                        tracing::debug!(module = %name, error = %err, "bundled module ignored");
                    }
                }
            }
        }

        let pending = registry.take_pending(id);
        let chosen = match (chosen, pending) {
            (Some(bundled), Some(_)) => {
                tracing::debug!(module = %id, "pending definition replaced by bundled module");
                Some(bundled)
            }
            (chosen, pending) => chosen.or(pending),
        };

        let mut anonymous = anonymous.into_iter();
        let mut descriptor = chosen.or_else(|| anonymous.next().map(|d| d.assign_name(id)));

        if descriptor.is_none() && use_queue {
            descriptor = registry.take_anonymous().map(|d| d.assign_name(id));
            let dropped = registry.clear_anonymous();
            if dropped > 0 {
                tracing::warn!(module = %id, dropped, "discarded queued anonymous modules");
            }
        }

        let leftover = anonymous.count();
        if leftover > 0 {
            tracing::warn!(module = %id, leftover, "discarded extra anonymous modules");
        }

        descriptor.ok_or_else(|| LoaderError::UnresolvedIdentifier(id.to_string()))
    }

    fn load(&self, id: String, descriptor: ModuleDescriptor, target: Promise) {
        if let Some(value) = descriptor.resolved() {
            target.resolve(vec![value.clone()]);
            return;
        }

        let deps = descriptor.all_deps();
        if let Err(err) = self.shared.registry.link(&id, &deps) {
            tracing::debug!(module = %id, error = %err, "link failed");
            target.reject(vec![err.into()]);
            return;
        }

        if deps.is_empty() {
            instantiate(&id, &descriptor, &[], &target);
            return;
        }

        let items = deps.iter().map(|dep| Value::Promise(self.resolve(dep))).collect();
        all(&self.shared.scheduler, items).notify(move |settlement| {
            if settlement.state != State::Resolved {
                target.reject(settlement.values);
                return;
            }
            let values = settlement
                .values
                .first()
                .and_then(Value::as_list)
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            instantiate(&id, &descriptor, &values, &target);
        });
    }
}

/// Joinable item for an override
///
/// Promises and thenables are awaited; anything else, functions included,
/// is taken as the module value without being called.
fn override_item(scheduler: &SchedulerRef, value: &Value) -> Value {
    match value {
        Value::Promise(_) | Value::Thenable(_) => value.clone(),
        other => Value::Promise(Promise::resolved(scheduler.clone(), vec![other.clone()])),
    }
}

fn instantiate(id: &str, descriptor: &ModuleDescriptor, values: &[Value], target: &Promise) {
    tracing::debug!(module = %id, "instantiating");
    match descriptor.instantiate(id, values) {
        Ok(value) => target.resolve(vec![value]),
        Err(reason) => target.reject(vec![reason]),
    };
}
