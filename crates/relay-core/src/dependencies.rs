//! Named dependency container.
//!
//! The composition root registers shared values (repositories, gateways,
//! clocks) once, by name; handlers receive the container through
//! [`HandlerContext`](crate::HandlerContext) on every call and downcast to
//! the concrete type. This replaces the attribute-push injection of looser
//! runtimes with explicit per-call threading.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::BusError;

type AnyArc = Arc<dyn Any + Send + Sync>;

/// A name → value map of shared dependencies.
#[derive(Default)]
pub struct Dependencies {
    values: RwLock<HashMap<String, AnyArc>>,
}

impl Dependencies {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dependency value under a unique name.
    ///
    /// Fails with [`BusError::DuplicateDependency`] if the name is taken.
    pub fn insert<T>(&self, name: impl Into<String>, value: T) -> Result<(), BusError>
    where
        T: Send + Sync + 'static,
    {
        self.insert_arc(name, Arc::new(value))
    }

    /// Registers an already-shared dependency value.
    pub fn insert_arc<T>(&self, name: impl Into<String>, value: Arc<T>) -> Result<(), BusError>
    where
        T: Send + Sync + 'static,
    {
        let name = name.into();
        let mut values = self.values.write();
        if values.contains_key(&name) {
            return Err(BusError::DuplicateDependency { name });
        }
        values.insert(name, value);
        Ok(())
    }

    /// Looks up a dependency by name and type.
    ///
    /// Returns `None` if the name is absent or bound to a different type.
    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.values
            .read()
            .get(name)
            .and_then(|arc| Arc::clone(arc).downcast::<T>().ok())
    }

    /// Like [`get`](Self::get), but fails with
    /// [`BusError::MissingDependency`] when absent or mistyped.
    pub fn require<T>(&self, name: &str) -> Result<Arc<T>, BusError>
    where
        T: Send + Sync + 'static,
    {
        self.get(name).ok_or_else(|| BusError::MissingDependency {
            name: name.to_string(),
        })
    }

    /// Registered dependency names, for introspection.
    pub fn names(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Number of registered dependencies.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the container is empty.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_and_type_mismatch() {
        let deps = Dependencies::new();
        deps.insert("answer", 42u32).unwrap();

        assert_eq!(*deps.get::<u32>("answer").unwrap(), 42);
        assert!(deps.get::<String>("answer").is_none());
        assert!(deps.get::<u32>("missing").is_none());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let deps = Dependencies::new();
        deps.insert("db", "primary".to_string()).unwrap();
        let err = deps.insert("db", "replica".to_string()).unwrap_err();
        assert!(matches!(err, BusError::DuplicateDependency { name } if name == "db"));
    }

    #[test]
    fn require_reports_missing() {
        let deps = Dependencies::new();
        let err = deps.require::<u32>("clock").unwrap_err();
        assert!(matches!(err, BusError::MissingDependency { name } if name == "clock"));
    }
}
