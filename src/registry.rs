//! Named fixture factories
//!
//! Tests that need "the bridge NAD" or "a Fedora VM" look the manifest up by
//! name in an explicit registry built at composition time, instead of
//! resolving fixtures by string at runtime.
//!
//! # Example
//!
//! ```
//! use virtwait::registry::{FixtureArgs, FixtureRegistry};
//!
//! let mut registry = FixtureRegistry::new();
//! registry
//!     .register("bridge-nad", |args: &FixtureArgs| format!("{}/{}", args.namespace, args.name))
//!     .unwrap();
//!
//! let nad = registry.resolve("bridge-nad", &FixtureArgs::new("ns1", "br1")).unwrap();
//! assert_eq!(nad, "ns1/br1");
//! ```

use std::collections::BTreeMap;
use std::fmt;

/// Errors from registering or resolving fixtures
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("fixture '{0}' is already registered")]
    Duplicate(String),

    #[error("unknown fixture '{name}' (known: {})", .known.join(", "))]
    Unknown { name: String, known: Vec<String> },
}

/// Inputs handed to every factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureArgs {
    /// Namespace the fixture will live in
    pub namespace: String,
    /// Name for the created object
    pub name: String,
}

impl FixtureArgs {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

type Factory<T> = Box<dyn Fn(&FixtureArgs) -> T + Send + Sync>;

/// Maps fixture names to factories
pub struct FixtureRegistry<T> {
    factories: BTreeMap<String, Factory<T>>,
}

impl<T> Default for FixtureRegistry<T> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<T> fmt::Debug for FixtureRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl<T> FixtureRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; names are unique
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&FixtureArgs) -> T + Send + Sync + 'static,
    ) -> Result<&mut Self, RegistryError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.factories.insert(name, Box::new(factory));
        Ok(self)
    }

    /// Build the fixture registered under `name`
    pub fn resolve(&self, name: &str, args: &FixtureArgs) -> Result<T, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::Unknown {
                name: name.to_string(),
                known: self.names(),
            })?;
        Ok(factory(args))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn registry() -> FixtureRegistry<Value> {
        let mut registry = FixtureRegistry::new();
        registry
            .register("bridge-nad", |args: &FixtureArgs| {
                json!({
                    "apiVersion": "k8s.cni.cncf.io/v1",
                    "kind": "NetworkAttachmentDefinition",
                    "metadata": { "name": args.name, "namespace": args.namespace },
                })
            })
            .unwrap()
            .register("config", |args: &FixtureArgs| {
                json!({ "kind": "ConfigMap", "metadata": { "name": args.name } })
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_resolve() {
        let nad = registry()
            .resolve("bridge-nad", &FixtureArgs::new("net-ns", "br1"))
            .unwrap();
        assert_eq!(nad["metadata"]["namespace"], "net-ns");
        assert_eq!(nad["kind"], "NetworkAttachmentDefinition");
    }

    #[test]
    fn test_unknown_lists_known_names() {
        let err = registry()
            .resolve("localnet-nad", &FixtureArgs::new("ns", "x"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Unknown {
                name: "localnet-nad".to_string(),
                known: vec!["bridge-nad".to_string(), "config".to_string()],
            }
        );
        assert!(err.to_string().contains("bridge-nad, config"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = registry();
        let err = registry.register("config", |_| Value::Null).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("config".to_string()));
        assert!(registry.contains("config"));
        assert_eq!(registry.names().len(), 2);
    }
}
