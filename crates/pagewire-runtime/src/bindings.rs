//! Explicit path tables for exposing pre-existing page functions.
//!
//! A [`BindingTable`] maps dotted paths such as `legacyApi.account.getProfile`
//! to handlers. [`BindingSpec`]s name which of those paths to expose and under
//! what method name. Only paths present in the table are reachable.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::method::MethodHandler;

/// Enumerable set of invocable targets, keyed by dotted path.
#[derive(Clone, Default)]
pub struct BindingTable {
    targets: BTreeMap<String, Arc<dyn MethodHandler>>,
}

impl BindingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a target.
    pub fn insert(&mut self, path: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        let _ = self.targets.insert(path.into(), handler);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn bind(mut self, path: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Self {
        self.insert(path, handler);
        self
    }

    /// Target stored under `path`.
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn MethodHandler>> {
        self.targets.get(path).cloned()
    }

    /// Every reachable path, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Number of bound paths.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl std::fmt::Debug for BindingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.targets.keys()).finish()
    }
}

/// One binding to expose: method `name` backed by table entry `path`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSpec {
    /// Method name to expose.
    pub name: String,
    /// Path in the binding table.
    pub path: String,
    /// Description for the method descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BindingSpec {
    /// Bind `name` to `path`.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::handler_fn;
    use serde_json::{Value, json};

    #[test]
    fn paths_are_enumerable() {
        let table = BindingTable::new()
            .bind("legacyApi.account.getProfile", handler_fn(|_, _| async { Ok(Value::Null) }))
            .bind("legacyApi.cart.total", handler_fn(|_, _| async { Ok(json!(0)) }));
        let paths: Vec<&str> = table.paths().collect();
        assert_eq!(paths, vec!["legacyApi.account.getProfile", "legacyApi.cart.total"]);
        assert!(table.resolve("legacyApi.cart.total").is_some());
        assert!(table.resolve("window.fetch").is_none());
    }

    #[test]
    fn spec_reads_camel_case_json() {
        let spec: BindingSpec = serde_json::from_value(json!({
            "name": "getProfile",
            "path": "legacyApi.account.getProfile"
        }))
        .unwrap();
        assert_eq!(spec, BindingSpec::new("getProfile", "legacyApi.account.getProfile"));
    }
}
