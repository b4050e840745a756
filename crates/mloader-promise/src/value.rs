//! Dynamically typed values carried by promises and modules
//!
//! A promise settles with an ordered tuple of values ([`Args`]). Module
//! factories receive their dependencies as values and produce one. Values that
//! are promises or foreign thenables are assimilated by the resolution
//! procedure instead of being stored as-is.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::promise::Promise;

/// Ordered tuple of settled values (arity may be zero)
pub type Args = Vec<Value>;

/// Result of a handler or factory: `Err` carries the rejection reason
pub type Outcome = Result<Value, Value>;

/// Settlement callback handed to a foreign thenable
///
/// Only the first invocation of either callback handed to one thenable has an
/// effect; later calls are ignored.
pub type SettleFn = Arc<dyn Fn(Args) + Send + Sync>;

/// Foreign promise-like value
///
/// Anything exposing a `then` that accepts a resolve and a reject callback.
/// Returning `Err` is treated as a thrown exception: it rejects the
/// assimilating promise unless one of the callbacks already fired.
pub trait Thenable: Send + Sync {
    /// Register the settlement callbacks
    fn then(&self, on_resolved: SettleFn, on_rejected: SettleFn) -> Result<(), Value>;
}

impl<F> Thenable for F
where
    F: Fn(SettleFn, SettleFn) -> Result<(), Value> + Send + Sync,
{
    fn then(&self, on_resolved: SettleFn, on_rejected: SettleFn) -> Result<(), Value> {
        self(on_resolved, on_rejected)
    }
}

/// Native callable value
#[derive(Clone)]
pub struct NativeFn(Arc<dyn Fn(&[Value]) -> Outcome + Send + Sync>);

impl NativeFn {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke with positional arguments
    pub fn call(&self, args: &[Value]) -> Outcome {
        (self.0)(args)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &NativeFn) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A dynamically typed value
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Undefined,
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Ordered list
    List(Arc<Vec<Value>>),
    /// String-keyed map
    Object(Arc<FxHashMap<String, Value>>),
    /// Native callable
    Function(NativeFn),
    /// Native promise
    Promise(Promise),
    /// Foreign promise-like value
    Thenable(Arc<dyn Thenable>),
    /// Error raised by a handler, factory or collaborator
    Error(Arc<dyn StdError + Send + Sync>),
    /// Opaque payload
    Native(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Build a list value
    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    /// Build an object value
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Wrap an error
    pub fn error<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Value::Error(Arc::new(error))
    }

    /// Wrap a native callable
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        Value::Function(NativeFn::new(f))
    }

    /// Wrap a foreign thenable
    pub fn thenable<T: Thenable + 'static>(thenable: T) -> Self {
        Value::Thenable(Arc::new(thenable))
    }

    /// Wrap an opaque payload
    pub fn native<T: Any + Send + Sync>(payload: T) -> Self {
        Value::Native(Arc::new(payload))
    }

    /// Wrap an already shared opaque payload
    pub fn native_arc<T: Any + Send + Sync>(payload: Arc<T>) -> Self {
        Value::Native(payload)
    }

    /// Whether this is `Undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Whether the resolution procedure would try to assimilate this value
    pub fn is_thenable(&self) -> bool {
        matches!(self, Value::Promise(_) | Value::Thenable(_))
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as float (integers widen)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get as list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Look up an object field
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Get as native promise
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Get as error
    pub fn as_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Value::Error(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Downcast a wrapped error to a concrete type
    pub fn downcast_error<E: StdError + 'static>(&self) -> Option<&E> {
        self.as_error()?.downcast_ref::<E>()
    }

    /// Downcast an opaque payload by reference
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Native(payload) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Downcast an opaque payload to a shared handle
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Native(payload) => Arc::clone(payload).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Promise(_) => "promise",
            Value::Thenable(_) => "thenable",
            Value::Error(_) => "error",
            Value::Native(_) => "native",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Thenable(a), Value::Thenable(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Value::Error(a), Value::Error(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Value::Native(a), Value::Native(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Object(map) => f.debug_map().entries(map.iter()).finish(),
            Value::Function(_) => write!(f, "[function]"),
            Value::Promise(p) => write!(f, "{:?}", p),
            Value::Thenable(_) => write!(f, "[thenable]"),
            Value::Error(e) => write!(f, "[error: {}]", e),
            Value::Native(_) => write!(f, "[native]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => Value::list(items.into_iter().map(Value::from)),
            serde_json::Value::Object(map) => {
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_structural_equality() {
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_eq!(
            Value::list(vec![Value::from("a"), Value::Null]),
            Value::list(vec![Value::from("a"), Value::Null])
        );
        assert_ne!(Value::Undefined, Value::Null);
    }

    #[test]
    fn test_identity_equality_for_handles() {
        let f = Value::function(|_| Ok(Value::Undefined));
        let g = Value::function(|_| Ok(Value::Undefined));
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn test_error_downcast() {
        let v = Value::error(Boom);
        assert!(v.downcast_error::<Boom>().is_some());
        assert!(v.downcast_error::<std::fmt::Error>().is_none());
        assert_eq!(format!("{:?}", v), "[error: boom]");
    }

    #[test]
    fn test_native_downcast() {
        let v = Value::native(7u32);
        assert_eq!(v.downcast_ref::<u32>(), Some(&7));
        assert_eq!(v.downcast_arc::<u32>().as_deref(), Some(&7));
        assert!(v.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({"item": "hello", "n": [1, 2.5, null]});
        let v = Value::from(json);
        assert_eq!(v.get("item").and_then(Value::as_str), Some("hello"));
        let n = v.get("n").and_then(Value::as_list).unwrap();
        assert_eq!(n, &[Value::Int(1), Value::Float(2.5), Value::Null]);
    }
}
