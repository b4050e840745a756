//! Module descriptors
//!
//! A [`ModuleDescriptor`] is what `define` records: an optional name, the
//! ordered dependency identifiers, and a body that is either a factory or a
//! literal value. The constructors replace argument-shape sniffing:
//!
//! | constructor | name | deps | body |
//! |---|---|---|---|
//! | [`ModuleDescriptor::named`] | yes | explicit | factory |
//! | [`ModuleDescriptor::named_factory`] | yes | none | factory |
//! | [`ModuleDescriptor::named_value`] | yes | none | literal |
//! | [`ModuleDescriptor::anonymous`] | no | explicit | factory |
//! | [`ModuleDescriptor::anonymous_factory`] | no | none | factory |
//! | [`ModuleDescriptor::anonymous_value`] | no | none | literal |

use std::fmt;
use std::sync::Arc;

use mloader_promise::{guarded, Outcome, Value};
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;

use crate::error::LoaderError;

type FactoryFn = dyn Fn(&Scope, &[Value]) -> Outcome + Send + Sync;

/// Module factory
///
/// Called once with the resolved dependency values in declared order.
#[derive(Clone)]
pub struct Factory(Arc<FactoryFn>);

impl Factory {
    /// Factory that only needs its positional dependencies
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        Self(Arc::new(move |_: &Scope, deps: &[Value]| f(deps)))
    }

    /// Factory that also reads its [`Scope`]
    pub fn scoped<F>(f: F) -> Self
    where
        F: Fn(&Scope, &[Value]) -> Outcome + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn call(&self, scope: &Scope, deps: &[Value]) -> Outcome {
        (self.0)(scope, deps)
    }
}

/// What a module evaluates to
#[derive(Clone)]
pub enum Body {
    /// Invoke with the dependency values
    Factory(Factory),
    /// Use as is
    Literal(Value),
}

/// View handed to scoped factories
pub struct Scope {
    id: String,
    deps: Vec<String>,
    inline: FxHashMap<String, Value>,
}

impl Scope {
    /// Identifier being instantiated
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Explicit dependency identifiers, in declared order
    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    /// Value of an inline dependency
    ///
    /// Only identifiers declared with
    /// [`with_inline_deps`](ModuleDescriptor::with_inline_deps) are available.
    pub fn require(&self, id: &str) -> Result<&Value, LoaderError> {
        self.inline
            .get(id)
            .ok_or_else(|| LoaderError::UnresolvedIdentifier(id.to_string()))
    }
}

/// Declared module, as recorded by `define`
#[derive(Clone)]
pub struct ModuleDescriptor {
    name: Option<String>,
    deps: Vec<String>,
    inline_deps: Vec<String>,
    body: Body,
    resolved: Arc<OnceCell<Value>>,
}

impl ModuleDescriptor {
    /// Canonical construction path
    pub fn new(name: Option<String>, deps: Vec<String>, body: Body) -> Self {
        Self {
            name,
            deps,
            inline_deps: Vec::new(),
            body,
            resolved: Arc::new(OnceCell::new()),
        }
    }

    /// Named module with explicit dependencies
    pub fn named<N, D, F>(name: N, deps: D, factory: F) -> Self
    where
        N: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        Self::new(
            Some(name.into()),
            deps.into_iter().map(Into::into).collect(),
            Body::Factory(Factory::new(factory)),
        )
    }

    /// Named module without dependencies
    pub fn named_factory<N, F>(name: N, factory: F) -> Self
    where
        N: Into<String>,
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        Self::new(Some(name.into()), Vec::new(), Body::Factory(Factory::new(factory)))
    }

    /// Named literal
    pub fn named_value<N: Into<String>>(name: N, value: impl Into<Value>) -> Self {
        Self::new(Some(name.into()), Vec::new(), Body::Literal(value.into()))
    }

    /// Anonymous module with explicit dependencies
    pub fn anonymous<D, F>(deps: D, factory: F) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        Self::new(
            None,
            deps.into_iter().map(Into::into).collect(),
            Body::Factory(Factory::new(factory)),
        )
    }

    /// Anonymous module without dependencies
    pub fn anonymous_factory<F>(factory: F) -> Self
    where
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        Self::new(None, Vec::new(), Body::Factory(Factory::new(factory)))
    }

    /// Anonymous literal
    pub fn anonymous_value(value: impl Into<Value>) -> Self {
        Self::new(None, Vec::new(), Body::Literal(value.into()))
    }

    /// Declare dependencies the factory reads through [`Scope::require`]
    ///
    /// They are resolved along with the explicit ones but not passed
    /// positionally. Identifiers already listed are skipped.
    pub fn with_inline_deps<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for id in ids.into_iter().map(Into::into) {
            if !self.deps.contains(&id) && !self.inline_deps.contains(&id) {
                self.inline_deps.push(id);
            }
        }
        self
    }

    /// Replace the body with a scoped factory
    pub fn with_scoped_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Scope, &[Value]) -> Outcome + Send + Sync + 'static,
    {
        self.body = Body::Factory(Factory::scoped(factory));
        self
    }

    /// Pair an anonymous descriptor with an identifier
    pub(crate) fn assign_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Module name, `None` if anonymous
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether no name was given
    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }

    /// Explicit dependencies
    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    /// Inline dependencies
    pub fn inline_deps(&self) -> &[String] {
        &self.inline_deps
    }

    /// Explicit then inline dependencies, the order they are resolved in
    pub fn all_deps(&self) -> Vec<String> {
        self.deps.iter().chain(&self.inline_deps).cloned().collect()
    }

    /// Module body
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Value produced by a previous instantiation
    pub fn resolved(&self) -> Option<&Value> {
        self.resolved.get()
    }

    /// Evaluate the body against resolved dependency values
    ///
    /// `values` holds explicit then inline dependencies, as ordered by
    /// [`all_deps`](Self::all_deps). The result is stored on the
    /// descriptor; later calls return it without invoking the factory again.
    /// A panicking factory becomes an `Err`.
    pub fn instantiate(&self, id: &str, values: &[Value]) -> Outcome {
        if let Some(value) = self.resolved.get() {
            return Ok(value.clone());
        }

        let value = match &self.body {
            Body::Literal(value) => value.clone(),
            Body::Factory(factory) => {
                let split = self.deps.len().min(values.len());
                let (explicit, inline) = values.split_at(split);
                let scope = Scope {
                    id: id.to_string(),
                    deps: self.deps.clone(),
                    inline: self
                        .inline_deps
                        .iter()
                        .cloned()
                        .zip(inline.iter().cloned())
                        .collect(),
                };
                guarded(|| factory.call(&scope, explicit))?
            }
        };

        Ok(self.resolved.get_or_init(|| value).clone())
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            Body::Factory(_) => "factory",
            Body::Literal(_) => "literal",
        };
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("inline_deps", &self.inline_deps)
            .field("body", &body)
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}
