//! mloader Core
//!
//! Lazy asynchronous module loading on top of `mloader-promise`:
//! - **Define**: declare named or anonymous modules (`define` module)
//! - **Registry**: per-loader cache of module promises and pending descriptors
//! - **Importer**: single-flight resolution of identifiers and dependencies
//! - **Transport**: pluggable fetch and transform collaborators
//!
//! # Example
//!
//! ```rust,ignore
//! use mloader_core::{Loader, ModuleDescriptor};
//! use mloader_promise::Value;
//!
//! let loader = Loader::new();
//! loader.define(ModuleDescriptor::named_value("x", 42))?;
//! loader.define(ModuleDescriptor::named("y", ["x"], |deps| {
//!     Ok(Value::from(deps[0].as_i64().unwrap_or(0) + 1))
//! }))?;
//!
//! let values = loader.import(["x", "y"]).wait();
//! assert_eq!(values, Ok(vec![Value::from(42), Value::from(43)]));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod define;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod importer;
pub mod loader;
pub mod registry;
pub mod settings;
pub mod transport;

pub use define::Define;
pub use descriptor::{Body, Factory, ModuleDescriptor, Scope};
pub use error::LoaderError;
pub use graph::{DependencyGraph, GraphError, ModuleNode};
pub use importer::{Importer, IntoIdentifiers, Overrides, Required};
pub use loader::{Loader, LoaderBuilder};
pub use registry::{Registry, RegistryId, RegistryStats};
pub use settings::{LoaderSettings, Package, SettingsError, Shim};
pub use transport::{FetchRequest, Fetched, MemoryTransport, Script, Source, Transform, Transport};
