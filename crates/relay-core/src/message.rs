//! Message abstractions for the Relay framework.
//!
//! A message is an immutable value object carrying the input (or output) of
//! exactly one handler. Messages are identified by a unique type name within
//! a bus and are type-erased behind [`BoxedMessage`] so the dispatch path
//! never needs to know concrete types. Middleware that want to transform a
//! message produce a *new* instance; the framework never mutates one.

use std::any::Any;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// The base trait for all dispatchable messages.
///
/// Most implementations are generated with [`impl_message!`](crate::impl_message),
/// which derives `fields()` from the type's `serde::Serialize` impl:
///
/// ```rust,ignore
/// #[derive(Serialize)]
/// struct Payment { amount: i64, user_id: String }
///
/// relay_core::impl_message!(Payment);
/// ```
pub trait Message: Any + Send + Sync {
    /// The unique type name of this message within a bus instance.
    fn message_name(&self) -> &'static str;

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// A serialized view of the message's fields.
    ///
    /// Consumed by validation rules, cache key derivation, and logging.
    /// Implementations should serialize every field deterministically.
    fn fields(&self) -> Value;

    /// The structural schema for self-describing messages.
    ///
    /// When `Some`, the validation middleware runs a field-presence and
    /// type check before any business rules, independent of strict mode.
    fn schema(&self) -> Option<&MessageSchema> {
        None
    }
}

/// Implements [`Message`] for a `Serialize` type.
///
/// The one-argument form uses the type's identifier as the message name;
/// the two-argument form takes an explicit name.
#[macro_export]
macro_rules! impl_message {
    ($ty:ident) => {
        $crate::impl_message!($ty, stringify!($ty));
    };
    ($ty:ident, $name:expr) => {
        impl $crate::Message for $ty {
            fn message_name(&self) -> &'static str {
                $name
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn fields(&self) -> $crate::serde_json::Value {
                $crate::message::serialize_fields(self)
            }
        }
    };
}

/// Serializes a message's fields to a JSON value.
///
/// Serialization of a plain data struct cannot realistically fail; if it
/// does (e.g. a map with non-string keys), the message degrades to an empty
/// object rather than poisoning the dispatch path.
pub fn serialize_fields<T: Serialize>(message: &T) -> Value {
    serde_json::to_value(message).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

// =============================================================================
// BoxedMessage
// =============================================================================

/// A type-erased, cheaply cloneable message handle.
///
/// `BoxedMessage` wraps any [`Message`] in an `Arc`, letting the bus and the
/// middleware pipeline pass messages around without knowing concrete types.
/// It derefs to `dyn Message`, so trait methods are callable directly.
#[derive(Clone)]
pub struct BoxedMessage {
    inner: Arc<dyn Message>,
}

impl BoxedMessage {
    /// Wraps a concrete message.
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            inner: Arc::new(message),
        }
    }

    /// Returns the inner `Arc<dyn Message>`.
    pub fn inner(&self) -> &Arc<dyn Message> {
        &self.inner
    }

    /// Attempts to downcast to a concrete message type.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.inner.as_any().downcast_ref()
    }

    /// The message's type name.
    pub fn name(&self) -> &'static str {
        self.inner.message_name()
    }
}

impl std::ops::Deref for BoxedMessage {
    type Target = dyn Message;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl std::fmt::Debug for BoxedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedMessage")
            .field("message_name", &self.name())
            .finish()
    }
}

// =============================================================================
// Structural schemas
// =============================================================================

/// Expected JSON type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A JSON string.
    String,
    /// A JSON integer.
    Integer,
    /// Any JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A single field declaration in a [`MessageSchema`].
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name as it appears in [`Message::fields`].
    pub name: &'static str,
    /// Expected JSON type.
    pub kind: FieldKind,
    /// Whether the field must be present and non-null.
    pub required: bool,
}

/// A structural violation reported by [`MessageSchema::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// The offending field.
    pub field: String,
    /// Human-readable description of the violation.
    pub reason: String,
}

/// Declarative field-presence and type schema for self-describing messages.
#[derive(Debug, Clone, Default)]
pub struct MessageSchema {
    fields: Vec<FieldSpec>,
}

impl MessageSchema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required field of the given kind.
    pub fn required(mut self, name: &'static str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name,
            kind,
            required: true,
        });
        self
    }

    /// Adds an optional field of the given kind.
    pub fn optional(mut self, name: &'static str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name,
            kind,
            required: false,
        });
        self
    }

    /// Checks a serialized field map against this schema.
    pub fn check(&self, fields: &Value) -> Result<(), Vec<SchemaViolation>> {
        let mut violations = Vec::new();

        for spec in &self.fields {
            match fields.get(spec.name) {
                None | Some(Value::Null) if spec.required => {
                    violations.push(SchemaViolation {
                        field: spec.name.to_string(),
                        reason: "required field is missing".to_string(),
                    });
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.matches(value) => {
                    violations.push(SchemaViolation {
                        field: spec.name.to_string(),
                        reason: format!("expected {}", spec.kind.describe()),
                    });
                }
                Some(_) => {}
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Ping {
        seq: u64,
    }

    crate::impl_message!(Ping);

    #[test]
    fn boxed_message_downcast_and_name() {
        let boxed = BoxedMessage::new(Ping { seq: 7 });
        assert_eq!(boxed.name(), "Ping");
        assert_eq!(boxed.downcast_ref::<Ping>().unwrap().seq, 7);
        assert_eq!(boxed.fields()["seq"], 7);
    }

    #[test]
    fn schema_reports_missing_and_mistyped_fields() {
        let schema = MessageSchema::new()
            .required("amount", FieldKind::Number)
            .required("user_id", FieldKind::String)
            .optional("note", FieldKind::String);

        let ok = serde_json::json!({ "amount": 5, "user_id": "U1" });
        assert!(schema.check(&ok).is_ok());

        let bad = serde_json::json!({ "amount": "five", "note": 3 });
        let violations = schema.check(&bad).unwrap_err();
        let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["amount", "user_id", "note"]);
    }
}
