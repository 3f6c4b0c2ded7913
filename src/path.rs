//! AVM path syntax
//!
//! Paths are store-qualified: `"main:/a/b"`. The store name is followed
//! by `:` and an absolute, slash-separated component sequence. No `.`,
//! `..`, or empty components are allowed; `"main:/"` names the store
//! root.

use crate::error::{Error, Result};

/// A parsed AVM path: store name plus path components from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvmPath {
    pub store: String,
    pub components: Vec<String>,
}

impl AvmPath {
    /// Parse a `"store:/a/b"` string.
    pub fn parse(raw: &str) -> Result<Self> {
        let (store, rest) = raw
            .split_once(':')
            .ok_or_else(|| Error::MalformedPath(raw.to_string()))?;
        if store.is_empty() || store.contains('/') {
            return Err(Error::MalformedPath(raw.to_string()));
        }
        let rest = rest
            .strip_prefix('/')
            .ok_or_else(|| Error::MalformedPath(raw.to_string()))?;

        let mut components = Vec::new();
        if !rest.is_empty() {
            for part in rest.split('/') {
                if part.is_empty() || part == "." || part == ".." {
                    return Err(Error::MalformedPath(raw.to_string()));
                }
                components.push(part.to_string());
            }
        }
        Ok(AvmPath {
            store: store.to_string(),
            components,
        })
    }

    /// Append one component, returning a new path.
    pub fn child(&self, name: &str) -> AvmPath {
        let mut components = self.components.clone();
        components.push(name.to_string());
        AvmPath {
            store: self.store.clone(),
            components,
        }
    }

    /// The parent path, or `None` at the root.
    pub fn parent(&self) -> Option<AvmPath> {
        if self.components.is_empty() {
            return None;
        }
        let mut components = self.components.clone();
        components.pop();
        Some(AvmPath {
            store: self.store.clone(),
            components,
        })
    }

    /// The final component name, or `None` at the root.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }
}

/// Renders back to `"store:/a/b"` form.
impl std::fmt::Display for AvmPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:/{}", self.store, self.components.join("/"))
    }
}

/// Join an already-rendered path string with further component names.
///
/// Used when reconstructing indirection targets: the base is a stored
/// indirection path which may or may not end in a slash.
pub fn extend(base: &str, names: &[String]) -> String {
    let mut out = base.trim_end_matches('/').to_string();
    for name in names {
        out.push('/');
        out.push_str(name);
    }
    out
}
