//! Attribute-based authorization middleware.
//!
//! A caller-supplied loader resolves the acting user from each message;
//! declarative policies, registered per message type, then evaluate
//! conditions over the user, the message, and the execution metadata. All
//! conditions of a policy must hold (AND semantics), every policy
//! registered for the message's type must pass, and the first failing
//! policy denies the dispatch without evaluating anything after it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use relay_core::{BoxedMessage, BusError};

use crate::execution::ExecutionContext;
use crate::middleware::Middleware;

/// Default pipeline priority of the authorization middleware.
pub const AUTHORIZATION_PRIORITY: i32 = 20;

/// The acting principal resolved for a dispatch.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    /// Stable user identifier.
    pub id: String,
    /// Coarse-grained roles.
    pub roles: Vec<String>,
    /// Fine-grained permission strings.
    pub permissions: Vec<String>,
    /// Free-form attributes for condition predicates.
    pub attributes: HashMap<String, Value>,
    /// Owning organization, when the deployment is multi-tenant.
    pub organization: Option<String>,
}

impl UserContext {
    /// Creates a user with just an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Adds a role.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Adds a permission.
    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    /// Sets an attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Sets the organization.
    pub fn organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Whether the user holds a role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the user holds a permission.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Authorization failures.
#[derive(Debug, Error)]
pub enum AuthorizationError {
    /// The middleware is in the pipeline but no user loader was installed.
    #[error("authorization middleware has no user loader configured")]
    NotConfigured,

    /// The loader could not resolve a user for the message.
    #[error("failed to load user context: {reason}")]
    LoadFailed {
        /// Loader-supplied failure description.
        reason: String,
    },

    /// A policy denied the dispatch.
    #[error("policy '{policy}' denied user '{user_id}'")]
    Denied {
        /// The denying policy's name.
        policy: String,
        /// The denied user's identifier.
        user_id: String,
    },
}

/// Resolves the acting user from the dispatched message.
pub type UserLoader =
    Arc<dyn Fn(&BoxedMessage) -> Result<UserContext, AuthorizationError> + Send + Sync>;

/// Everything a policy condition may inspect.
pub struct EvaluationContext<'a> {
    /// The resolved acting user.
    pub user: &'a UserContext,
    /// The message being dispatched.
    pub message: &'a BoxedMessage,
    /// Execution metadata written by earlier middleware.
    pub metadata: &'a HashMap<String, Value>,
    /// The evaluating policy's resource.
    pub resource: &'a str,
    /// The evaluating policy's action.
    pub action: &'a str,
}

type Condition = Arc<dyn Fn(&EvaluationContext<'_>) -> bool + Send + Sync>;

/// A named access policy over a resource/action pair.
///
/// A policy passes when every condition returns `true`. A policy with no
/// conditions always passes.
#[derive(Clone)]
pub struct Policy {
    name: String,
    resource: String,
    action: String,
    conditions: Vec<Condition>,
}

impl Policy {
    /// Creates a policy with no conditions.
    pub fn new(
        name: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            action: action.into(),
            conditions: Vec::new(),
        }
    }

    /// Appends a condition. Conditions are evaluated in insertion order
    /// and short-circuit on the first failure.
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&EvaluationContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.conditions.push(Arc::new(condition));
        self
    }

    /// The policy's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, user: &UserContext, message: &BoxedMessage, metadata: &HashMap<String, Value>) -> bool {
        let ctx = EvaluationContext {
            user,
            message,
            metadata,
            resource: &self.resource,
            action: &self.action,
        };
        self.conditions.iter().all(|condition| condition(&ctx))
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("resource", &self.resource)
            .field("action", &self.action)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

/// Pre-phase middleware enforcing attribute-based access policies.
pub struct AuthorizationMiddleware {
    priority: i32,
    user_loader: Option<UserLoader>,
    policies: RwLock<HashMap<String, Vec<Policy>>>,
}

impl AuthorizationMiddleware {
    /// Creates a middleware with no loader and no policies.
    pub fn new() -> Self {
        Self::with_priority(AUTHORIZATION_PRIORITY)
    }

    /// Creates a middleware at an explicit priority.
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            user_loader: None,
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Installs the user loader. Without one, every guarded dispatch fails.
    pub fn user_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&BoxedMessage) -> Result<UserContext, AuthorizationError> + Send + Sync + 'static,
    {
        self.user_loader = Some(Arc::new(loader));
        self
    }

    /// Appends a policy guarding a message type. Policies registered for
    /// the same type are evaluated in insertion order; messages with no
    /// registered policies pass.
    pub fn policy(self, message_type: impl Into<String>, policy: Policy) -> Self {
        self.add_policy(message_type, policy);
        self
    }

    /// Appends a policy on an already-shared middleware.
    pub fn add_policy(&self, message_type: impl Into<String>, policy: Policy) {
        self.policies
            .write()
            .entry(message_type.into())
            .or_default()
            .push(policy);
    }

    fn policies_for(&self, message_type: &str) -> Vec<Policy> {
        self.policies
            .read()
            .get(message_type)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for AuthorizationMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &str {
        "authorization"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn pre_execute(&self, ctx: &mut ExecutionContext) -> Result<(), BusError> {
        let Some(loader) = &self.user_loader else {
            return Err(BusError::failure(AuthorizationError::NotConfigured));
        };

        let message = ctx.message().clone();
        let user = loader(&message).map_err(BusError::failure)?;
        debug!(user = %user.id, message = %message.name(), "User resolved");

        let policies = self.policies_for(message.name());
        for policy in &policies {
            if !policy.evaluate(&user, &message, &ctx.metadata) {
                warn!(
                    policy = policy.name(),
                    user = %user.id,
                    message = %message.name(),
                    "Dispatch denied"
                );
                return Err(BusError::failure(AuthorizationError::Denied {
                    policy: policy.name.clone(),
                    user_id: user.id,
                }));
            }
        }

        ctx.set_metadata("authorization.user", json!(user.id));
        Ok(())
    }
}

impl std::fmt::Debug for AuthorizationMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationMiddleware")
            .field("priority", &self.priority)
            .field("configured", &self.user_loader.is_some())
            .field("guarded_types", &self.policies.read().len())
            .finish()
    }
}
