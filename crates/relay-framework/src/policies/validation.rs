//! Validation middleware.
//!
//! Runs a structural schema pass followed by per-message-type business
//! rules in the pre phase. Schema violations always abort the dispatch.
//! Rule failures abort only in strict mode; otherwise they accumulate in
//! execution metadata under `validation.errors` and `validation.warnings`
//! and the dispatch proceeds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use relay_core::{BoxedMessage, BusError, SchemaViolation};

use crate::execution::ExecutionContext;
use crate::middleware::Middleware;

/// Default pipeline priority of the validation middleware.
pub const VALIDATION_PRIORITY: i32 = 10;

/// How a failing rule affects the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the dispatch in strict mode.
    Error,
    /// Never aborts; recorded in metadata only.
    Warning,
}

type Predicate = Arc<dyn Fn(&BoxedMessage) -> Result<bool, String> + Send + Sync>;

/// A named business rule evaluated against a message.
///
/// The predicate returns `Ok(true)` to pass, `Ok(false)` to fail with the
/// rule's configured message, or `Err(text)` when it could not be evaluated
/// at all. A predicate error counts as a failed error-severity rule
/// carrying the error text, regardless of the declared severity.
#[derive(Clone)]
pub struct Rule {
    name: String,
    severity: Severity,
    message: String,
    predicate: Predicate,
}

impl Rule {
    /// Creates an error-severity rule.
    pub fn error<F>(name: impl Into<String>, message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&BoxedMessage) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            severity: Severity::Error,
            message: message.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Creates a warning-severity rule.
    pub fn warning<F>(name: impl Into<String>, message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&BoxedMessage) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            severity: Severity::Warning,
            message: message.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// The rule's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .finish()
    }
}

/// One failed rule, as carried in [`ValidationError`] and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    /// The failed rule's name.
    pub rule: String,
    /// The failure message (the rule's, or the predicate's error text).
    pub message: String,
}

/// Raised in strict mode when at least one error-severity rule failed.
#[derive(Debug, Error)]
#[error("validation failed for '{message_type}': {} rule(s) failed", failures.len())]
pub struct ValidationError {
    /// The validated message's type name.
    pub message_type: String,
    /// Every failed error-severity rule, in rule order.
    pub failures: Vec<RuleFailure>,
}

/// Raised whenever a self-describing message fails its structural schema,
/// independent of strict mode.
#[derive(Debug, Error)]
#[error("message '{message_type}' violates its schema: {} field(s)", violations.len())]
pub struct SchemaViolationError {
    /// The offending message's type name.
    pub message_type: String,
    /// Every structural violation found.
    pub violations: Vec<SchemaViolation>,
}

/// Pre-phase middleware enforcing schemas and business rules.
pub struct ValidationMiddleware {
    priority: i32,
    strict: bool,
    rules: RwLock<HashMap<String, Vec<Rule>>>,
}

impl ValidationMiddleware {
    /// Creates a strict validator at the default priority.
    pub fn new() -> Self {
        Self::with_priority(VALIDATION_PRIORITY)
    }

    /// Creates a strict validator at an explicit priority.
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            strict: true,
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Sets strict mode. Non-strict validators record failures in metadata
    /// and let the dispatch proceed.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Appends a rule for a message type. Rules run in insertion order.
    pub fn rule(self, message_type: impl Into<String>, rule: Rule) -> Self {
        self.add_rule(message_type, rule);
        self
    }

    /// Appends a rule on an already-shared validator.
    pub fn add_rule(&self, message_type: impl Into<String>, rule: Rule) {
        self.rules
            .write()
            .entry(message_type.into())
            .or_default()
            .push(rule);
    }

    fn evaluate(&self, message: &BoxedMessage) -> (Vec<RuleFailure>, Vec<RuleFailure>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let rules = self.rules.read();
        let Some(rules) = rules.get(message.name()) else {
            return (errors, warnings);
        };

        for rule in rules {
            match (rule.predicate)(message) {
                Ok(true) => {}
                Ok(false) => {
                    let failure = RuleFailure {
                        rule: rule.name.clone(),
                        message: rule.message.clone(),
                    };
                    match rule.severity {
                        Severity::Error => errors.push(failure),
                        Severity::Warning => warnings.push(failure),
                    }
                }
                // An unevaluable predicate is an error failure carrying
                // its own text, whatever the declared severity.
                Err(text) => errors.push(RuleFailure {
                    rule: rule.name.clone(),
                    message: text,
                }),
            }
        }
        (errors, warnings)
    }
}

impl Default for ValidationMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn pre_execute(&self, ctx: &mut ExecutionContext) -> Result<(), BusError> {
        let message = ctx.message().clone();
        let name = message.name();

        if let Some(schema) = message.schema()
            && let Err(violations) = schema.check(&message.fields())
        {
            warn!(message = %name, violations = violations.len(), "Schema check failed");
            return Err(BusError::failure(SchemaViolationError {
                message_type: name.to_string(),
                violations,
            }));
        }

        let (errors, warnings) = self.evaluate(&message);
        if errors.is_empty() && warnings.is_empty() {
            return Ok(());
        }

        debug!(
            message = %name,
            errors = errors.len(),
            warnings = warnings.len(),
            strict = self.strict,
            "Validation rules failed"
        );

        if self.strict && !errors.is_empty() {
            return Err(BusError::failure(ValidationError {
                message_type: name.to_string(),
                failures: errors,
            }));
        }

        if !errors.is_empty() {
            ctx.set_metadata("validation.errors", json!(errors));
        }
        if !warnings.is_empty() {
            ctx.set_metadata("validation.warnings", json!(warnings));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ValidationMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationMiddleware")
            .field("priority", &self.priority)
            .field("strict", &self.strict)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{ContextMap, FieldKind, Message, MessageSchema, impl_message};
    use serde::Serialize;
    use std::sync::LazyLock;

    #[derive(Serialize)]
    struct Payment {
        amount: i64,
        user_id: String,
    }
    impl_message!(Payment);

    #[derive(Serialize)]
    struct Transfer {
        amount: i64,
    }

    static TRANSFER_SCHEMA: LazyLock<MessageSchema> = LazyLock::new(|| {
        MessageSchema::new()
            .required("amount", FieldKind::Integer)
            .required("target", FieldKind::String)
    });

    impl Message for Transfer {
        fn message_name(&self) -> &'static str {
            "Transfer"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn fields(&self) -> serde_json::Value {
            relay_core::message::serialize_fields(self)
        }

        fn schema(&self) -> Option<&MessageSchema> {
            Some(&TRANSFER_SCHEMA)
        }
    }

    fn payment_ctx(amount: i64) -> ExecutionContext {
        ExecutionContext::new(
            BoxedMessage::new(Payment {
                amount,
                user_id: "U1".into(),
            }),
            ContextMap::new(),
        )
    }

    fn amount_of(message: &BoxedMessage) -> i64 {
        message.downcast_ref::<Payment>().unwrap().amount
    }

    #[tokio::test]
    async fn strict_mode_raises_with_full_failure_list() {
        let validator = ValidationMiddleware::new()
            .rule(
                "Payment",
                Rule::error("positive_amount", "amount must be positive", |m| {
                    Ok(amount_of(m) > 0)
                }),
            )
            .rule(
                "Payment",
                Rule::error("even_amount", "amount must be even", |m| {
                    Ok(amount_of(m) % 2 == 0)
                }),
            );

        let mut ctx = payment_ctx(-51);
        let err = validator.pre_execute(&mut ctx).await.unwrap_err();
        let failed = err.failure_as::<ValidationError>().unwrap();
        assert_eq!(failed.message_type, "Payment");
        let names: Vec<_> = failed.failures.iter().map(|f| f.rule.as_str()).collect();
        assert_eq!(names, vec!["positive_amount", "even_amount"]);
    }

    #[tokio::test]
    async fn non_strict_mode_accumulates_in_metadata() {
        let validator = ValidationMiddleware::new()
            .strict(false)
            .rule(
                "Payment",
                Rule::error("positive_amount", "amount must be positive", |m| {
                    Ok(amount_of(m) > 0)
                }),
            )
            .rule(
                "Payment",
                Rule::error("even_amount", "amount must be even", |m| {
                    Ok(amount_of(m) % 2 == 0)
                }),
            )
            .rule(
                "Payment",
                Rule::warning("large_amount", "amount unusually large", |m| {
                    Ok(amount_of(m).abs() < 1_000_000)
                }),
            );

        let mut ctx = payment_ctx(-5_000_001);
        validator.pre_execute(&mut ctx).await.unwrap();

        let errors = ctx.metadata("validation.errors").unwrap();
        assert_eq!(errors.as_array().unwrap().len(), 2);
        let warnings = ctx.metadata("validation.warnings").unwrap();
        assert_eq!(warnings.as_array().unwrap().len(), 1);
        assert_eq!(warnings[0]["rule"], "large_amount");
    }

    #[tokio::test]
    async fn passing_rules_leave_no_metadata() {
        let validator = ValidationMiddleware::new().strict(false).rule(
            "Payment",
            Rule::error("positive_amount", "amount must be positive", |m| {
                Ok(amount_of(m) > 0)
            }),
        );

        let mut ctx = payment_ctx(10);
        validator.pre_execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.metadata("validation.errors"), None);
        assert_eq!(ctx.metadata("validation.warnings"), None);
    }

    #[tokio::test]
    async fn predicate_error_is_an_error_failure_with_its_text() {
        let validator = ValidationMiddleware::new().rule(
            "Payment",
            Rule::warning("flaky", "never shown", |_| {
                Err("rule dependency unavailable".to_string())
            }),
        );

        let mut ctx = payment_ctx(10);
        let err = validator.pre_execute(&mut ctx).await.unwrap_err();
        let failed = err.failure_as::<ValidationError>().unwrap();
        assert_eq!(failed.failures[0].rule, "flaky");
        assert_eq!(failed.failures[0].message, "rule dependency unavailable");
    }

    #[tokio::test]
    async fn schema_violation_raises_even_in_non_strict_mode() {
        let validator = ValidationMiddleware::new().strict(false);

        let mut ctx = ExecutionContext::new(
            BoxedMessage::new(Transfer { amount: 5 }),
            ContextMap::new(),
        );
        let err = validator.pre_execute(&mut ctx).await.unwrap_err();
        let schema_err = err.failure_as::<SchemaViolationError>().unwrap();
        assert_eq!(schema_err.message_type, "Transfer");
        assert_eq!(schema_err.violations[0].field, "target");
    }

    #[tokio::test]
    async fn unknown_message_types_pass_untouched() {
        let validator = ValidationMiddleware::new().rule(
            "Other",
            Rule::error("never_runs", "x", |_| Ok(false)),
        );

        let mut ctx = payment_ctx(1);
        validator.pre_execute(&mut ctx).await.unwrap();
    }
}
