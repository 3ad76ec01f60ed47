//! Message-type → handler registry.
//!
//! A registry binds each message type name to at most one handler. The
//! binding is one-shot: a second registration for the same name is a fatal
//! configuration error raised synchronously, never a silent replacement.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::BusError;
use crate::handler::HandlerOptions;

/// A handler together with its registration options.
pub struct Registration<H: ?Sized> {
    /// The registered handler instance.
    pub handler: Arc<H>,
    /// Options captured at registration time.
    pub options: HandlerOptions,
}

impl<H: ?Sized> Clone for Registration<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            options: self.options,
        }
    }
}

/// Maps message type names to handler instances.
pub struct HandlerRegistry<H: ?Sized> {
    /// Registry label used in error messages ("feature" / "application service").
    kind: &'static str,
    entries: RwLock<HashMap<String, Registration<H>>>,
}

impl<H: ?Sized> HandlerRegistry<H> {
    /// Creates an empty registry with the given label.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Binds a handler to a message type name with default options.
    pub fn register(&self, name: impl Into<String>, handler: Arc<H>) -> Result<(), BusError> {
        self.register_with(name, handler, HandlerOptions::default())
    }

    /// Binds a handler with explicit options.
    ///
    /// Fails with [`BusError::AlreadyRegistered`] if the name is bound.
    pub fn register_with(
        &self,
        name: impl Into<String>,
        handler: Arc<H>,
        options: HandlerOptions,
    ) -> Result<(), BusError> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(BusError::AlreadyRegistered {
                name,
                registry: self.kind,
            });
        }
        debug!(message = %name, registry = self.kind, "Handler registered");
        entries.insert(name, Registration { handler, options });
        Ok(())
    }

    /// Looks up the registration for a message type name.
    pub fn lookup(&self, name: &str) -> Option<Registration<H>> {
        self.entries.read().get(name).cloned()
    }

    /// Whether the name is bound in this registry.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Registered message type names, for introspection.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The registry label.
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl<H: ?Sized> std::fmt::Debug for HandlerRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Marker: Send + Sync {}
    struct Unit;
    impl Marker for Unit {}

    #[test]
    fn second_registration_fails() {
        let registry: HandlerRegistry<dyn Marker> = HandlerRegistry::new("feature");
        registry.register("Ping", Arc::new(Unit)).unwrap();

        let err = registry.register("Ping", Arc::new(Unit)).unwrap_err();
        assert!(matches!(
            err,
            BusError::AlreadyRegistered { name, registry } if name == "Ping" && registry == "feature"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_and_names() {
        let registry: HandlerRegistry<dyn Marker> = HandlerRegistry::new("feature");
        registry.register("B", Arc::new(Unit)).unwrap();
        registry
            .register_with("A", Arc::new(Unit), HandlerOptions::traced())
            .unwrap();

        assert!(registry.lookup("A").unwrap().options.traced);
        assert!(!registry.lookup("B").unwrap().options.traced);
        assert!(registry.lookup("C").is_none());
        assert_eq!(registry.names(), vec!["A".to_string(), "B".to_string()]);
    }
}
