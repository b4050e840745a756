//! Loader settings
//!
//! Location settings are opaque to the loader itself: they travel with every
//! fetch request so the transport can turn an identifier into a locator.
//! They can be read from TOML or JSON:
//!
//! ```toml
//! base_url = "/static/js"
//! url_args = "v=2"
//!
//! [paths]
//! jquery = "vendor/jquery"
//!
//! [shim.backbone]
//! deps = ["underscore", "jquery"]
//! exports = "Backbone"
//!
//! [[packages]]
//! name = "app"
//! location = "src/app"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse settings: {0}")]
    Toml(#[from] toml::de::Error),

    /// Failed to parse JSON
    #[error("Failed to parse settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Dependencies and export name for a module that does not call `define`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Shim {
    /// Identifiers to load first
    #[serde(default)]
    pub deps: Vec<String>,

    /// Name of the value the module exposes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<String>,
}

/// Package mapping: `name` and `name/...` resolve under `location`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    /// Package identifier
    pub name: String,

    /// Directory holding the package (defaults to the name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Module loaded for the bare package name (defaults to "main")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
}

/// Location settings handed to the transport
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoaderSettings {
    /// Prefix joined onto relative locators
    #[serde(alias = "baseUrl")]
    pub base_url: String,

    /// Identifier (or identifier prefix) aliases
    pub paths: HashMap<String, String>,

    /// Shim configuration per identifier
    pub shim: HashMap<String, Shim>,

    /// Package mappings
    pub packages: Vec<Package>,

    /// Query string appended to request URLs
    #[serde(alias = "urlArgs", skip_serializing_if = "Option::is_none")]
    pub url_args: Option<String>,
}

impl LoaderSettings {
    /// Parse settings from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(s)?)
    }

    /// Parse settings from a JSON string
    pub fn from_json_str(s: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load settings from a file; `.json` files are read as JSON, anything
    /// else as TOML
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    /// Merge `other` into these settings
    ///
    /// A non-empty base URL and any url args replace the current ones; paths
    /// and shims are added or replaced per key; packages are replaced by name.
    pub fn merge(&mut self, other: LoaderSettings) {
        if !other.base_url.is_empty() {
            self.base_url = other.base_url;
        }
        self.paths.extend(other.paths);
        self.shim.extend(other.shim);
        for package in other.packages {
            match self.packages.iter_mut().find(|p| p.name == package.name) {
                Some(existing) => *existing = package,
                None => self.packages.push(package),
            }
        }
        if other.url_args.is_some() {
            self.url_args = other.url_args;
        }
    }

    /// Turn an identifier into a locator
    ///
    /// Applies the longest matching `paths` alias (whole identifier or a
    /// `prefix/` segment), then package mappings, then joins the result onto
    /// `base_url` unless it is already absolute.
    pub fn locate(&self, id: &str) -> String {
        let mapped = self
            .alias(id)
            .or_else(|| self.package_path(id))
            .unwrap_or_else(|| id.to_string());

        if self.base_url.is_empty() || mapped.starts_with('/') || mapped.contains("://") {
            return mapped;
        }
        format!("{}/{}", self.base_url.trim_end_matches('/'), mapped)
    }

    /// `locate(id)` plus the url args query string
    pub fn url(&self, id: &str) -> String {
        let locator = self.locate(id);
        match &self.url_args {
            Some(args) if !args.is_empty() => {
                let sep = if locator.contains('?') { '&' } else { '?' };
                format!("{}{}{}", locator, sep, args)
            }
            _ => locator,
        }
    }

    fn alias(&self, id: &str) -> Option<String> {
        if let Some(target) = self.paths.get(id) {
            return Some(target.clone());
        }
        self.paths
            .iter()
            .filter(|(prefix, _)| {
                id.len() > prefix.len()
                    && id.starts_with(prefix.as_str())
                    && id.as_bytes()[prefix.len()] == b'/'
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, target)| format!("{}{}", target, &id[prefix.len()..]))
    }

    fn package_path(&self, id: &str) -> Option<String> {
        let (name, rest) = match id.split_once('/') {
            Some((name, rest)) => (name, Some(rest)),
            None => (id, None),
        };
        let package = self.packages.iter().find(|p| p.name == name)?;
        let location = package.location.as_deref().unwrap_or(&package.name);
        let module = rest.unwrap_or_else(|| package.main.as_deref().unwrap_or("main"));
        Some(format!("{}/{}", location.trim_end_matches('/'), module))
    }
}
