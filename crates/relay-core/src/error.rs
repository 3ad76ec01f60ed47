//! Unified error types for the Relay core.
//!
//! The taxonomy distinguishes fatal configuration errors (raised at
//! registration or build time), per-dispatch routing errors, and arbitrary
//! handler/middleware failures. Policy-specific errors defined in
//! `relay-framework` travel through [`BusError::Failure`] and can be
//! recovered with [`BusError::failure_as`].

use thiserror::Error;

use crate::scope::ContextSnapshot;

/// The reply produced by a handler. Handlers may legitimately return nothing.
pub type Reply = Option<serde_json::Value>;

/// Result type for every dispatch-path operation.
pub type BusResult = Result<Reply, BusError>;

/// Errors raised by registries, buses, and the middleware pipeline.
#[derive(Debug, Error)]
pub enum BusError {
    /// A second handler was registered for a message type already bound
    /// in the same registry. Raised synchronously at registration time.
    #[error("message type '{name}' is already registered in the {registry} registry")]
    AlreadyRegistered {
        /// The duplicated message type name.
        name: String,
        /// Which registry rejected the binding ("feature" or "application service").
        registry: &'static str,
    },

    /// A message type is bound in both the feature registry and the
    /// application-service registry. Checked at build time and re-checked
    /// defensively on every dispatch.
    #[error("message type '{name}' is registered as both a feature and an application service")]
    CrossRegistered {
        /// The conflicting message type name.
        name: String,
    },

    /// No handler is bound for the dispatched message type.
    #[error("no handler registered for message type '{name}'")]
    UnknownMessage {
        /// The unresolved message type name.
        name: String,
    },

    /// A dependency value was added twice under the same name.
    #[error("dependency '{name}' is already registered")]
    DuplicateDependency {
        /// The duplicated dependency name.
        name: String,
    },

    /// A handler required a dependency that was never registered, or
    /// requested it with the wrong type.
    #[error("dependency '{name}' is not registered or has a different type")]
    MissingDependency {
        /// The missing dependency name.
        name: String,
    },

    /// An error that escaped an active context scope, wrapped together with
    /// a snapshot of the propagated attributes at the time of failure.
    ///
    /// Display delegates to the source so the original message still
    /// surfaces to the caller unchanged.
    #[error("{source}")]
    Enriched {
        /// The original error.
        source: Box<BusError>,
        /// Propagated-context attributes captured when the error escaped.
        snapshot: ContextSnapshot,
    },

    /// An arbitrary failure from a handler or middleware.
    #[error(transparent)]
    Failure(Box<dyn std::error::Error + Send + Sync>),
}

impl BusError {
    /// Wraps an arbitrary error as a dispatch failure.
    pub fn failure<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failure(Box::new(err))
    }

    /// Unwraps enrichment envelopes, returning the innermost error.
    pub fn original(&self) -> &BusError {
        match self {
            Self::Enriched { source, .. } => source.original(),
            other => other,
        }
    }

    /// Returns the attached context snapshot, if this error was enriched.
    pub fn snapshot(&self) -> Option<&ContextSnapshot> {
        match self {
            Self::Enriched { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }

    /// Attempts to view the underlying failure as a concrete error type,
    /// looking through enrichment envelopes.
    pub fn failure_as<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self.original() {
            Self::Failure(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Attaches a context snapshot to this error.
    ///
    /// Enrichment is applied at most once: an already-enriched error is
    /// returned unchanged so the snapshot closest to the failure wins.
    pub fn enrich(self, snapshot: ContextSnapshot) -> Self {
        match self {
            already @ Self::Enriched { .. } => already,
            other => Self::Enriched {
                source: Box::new(other),
                snapshot,
            },
        }
    }

    /// A short classifier used in context snapshots and log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered { .. } => "already_registered",
            Self::CrossRegistered { .. } => "cross_registered",
            Self::UnknownMessage { .. } => "unknown_message",
            Self::DuplicateDependency { .. } => "duplicate_dependency",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::Enriched { source, .. } => source.kind(),
            Self::Failure(_) => "failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom: {0}")]
    struct Boom(&'static str);

    #[test]
    fn failure_downcast_round_trip() {
        let err = BusError::failure(Boom("x"));
        assert!(matches!(err, BusError::Failure(_)));
        assert_eq!(err.failure_as::<Boom>().unwrap().0, "x");
    }

    #[test]
    fn enrichment_is_applied_once_and_keeps_display() {
        let snapshot = ContextSnapshot::capture(&Default::default(), "failure");
        let err = BusError::failure(Boom("y")).enrich(snapshot.clone());
        assert_eq!(err.to_string(), "boom: y");
        assert!(err.snapshot().is_some());

        // A second enrichment must not stack another envelope.
        let again = err.enrich(ContextSnapshot::capture(&Default::default(), "failure"));
        assert!(matches!(
            again,
            BusError::Enriched { ref source, .. } if matches!(**source, BusError::Failure(_))
        ));
    }

    #[test]
    fn original_looks_through_envelope() {
        let err = BusError::UnknownMessage {
            name: "Ping".into(),
        }
        .enrich(ContextSnapshot::capture(&Default::default(), "unknown_message"));
        assert!(matches!(
            err.original(),
            BusError::UnknownMessage { name } if name == "Ping"
        ));
    }
}
