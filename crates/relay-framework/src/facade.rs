//! The facade bus.
//!
//! [`MessageBus`] is the single entry point callers dispatch through. It
//! composes the two handler buses, the middleware pipeline, and the shared
//! dependency container, and owns the outermost error handler. Message type
//! names must resolve to exactly one bus; bindings present in both
//! registries are rejected at build time and re-checked on every dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use relay_core::{
    ApplicationService, ApplicationServiceBus, BoxedMessage, BusError, BusResult, ContextMap,
    ContextSnapshot, Dependencies, ErrorHandler, Feature, FeatureBus, HandlerContext,
    HandlerOptions,
};

use crate::middleware::Middleware;
use crate::pipeline::{Executor, Pipeline};

/// The single dispatch entry point composing buses, pipeline, and container.
pub struct MessageBus {
    features: Arc<FeatureBus>,
    services: Arc<ApplicationServiceBus>,
    pipeline: Arc<Pipeline>,
    dependencies: Arc<Dependencies>,
    middleware_enabled: AtomicBool,
    error_handler: RwLock<Option<ErrorHandler>>,
}

impl MessageBus {
    /// Starts building a bus.
    pub fn builder() -> MessageBusBuilder {
        MessageBusBuilder::new()
    }

    /// The feature sub-bus, for registration and introspection.
    pub fn features(&self) -> &Arc<FeatureBus> {
        &self.features
    }

    /// The application-service sub-bus, for registration and introspection.
    pub fn services(&self) -> &Arc<ApplicationServiceBus> {
        &self.services
    }

    /// The middleware pipeline.
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// The shared dependency container.
    pub fn dependencies(&self) -> &Arc<Dependencies> {
        &self.dependencies
    }

    /// Message type names bound to features.
    pub fn feature_names(&self) -> Vec<String> {
        self.features.names()
    }

    /// Message type names bound to application services.
    pub fn service_names(&self) -> Vec<String> {
        self.services.names()
    }

    /// Every dispatchable message type name, sorted.
    pub fn message_names(&self) -> Vec<String> {
        let mut names = self.features.names();
        names.extend(self.services.names());
        names.sort();
        names
    }

    /// Registered dependency names.
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies.names()
    }

    /// Appends a middleware to the pipeline.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.pipeline.add(middleware);
    }

    /// Turns the whole pipeline back on.
    pub fn enable_middleware(&self) {
        self.middleware_enabled.store(true, Ordering::SeqCst);
    }

    /// Kill switch: subsequent dispatches bypass the pipeline entirely.
    pub fn disable_middleware(&self) {
        self.middleware_enabled.store(false, Ordering::SeqCst);
    }

    /// Whether dispatches currently run through the pipeline.
    pub fn middleware_enabled(&self) -> bool {
        self.middleware_enabled.load(Ordering::SeqCst)
    }

    /// Installs the outermost error handler.
    ///
    /// It runs after the pipeline's error phase and after both bus-level
    /// handlers declined, and gets the final word before the error reaches
    /// the caller.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.write() = Some(handler);
    }

    /// Dispatches a message with an empty propagated context.
    pub async fn execute(&self, message: BoxedMessage) -> BusResult {
        self.execute_with(message, &ContextMap::new()).await
    }

    /// Dispatches a message under the given propagated-context attributes.
    ///
    /// The attributes are threaded to the handler via its context, handed to
    /// every middleware, and captured into a snapshot attached to any error
    /// that escapes while they are non-empty.
    pub async fn execute_with(&self, message: BoxedMessage, scope: &ContextMap) -> BusResult {
        let result = self.dispatch(message, scope).await;

        let result = match result {
            Err(err) => {
                let hook = self.error_handler.read().clone();
                match hook {
                    Some(hook) => hook(err),
                    None => Err(err),
                }
            }
            ok => ok,
        };

        match result {
            Err(err) if !scope.is_empty() => {
                let snapshot = ContextSnapshot::capture(scope, err.kind());
                Err(err.enrich(snapshot))
            }
            other => other,
        }
    }

    async fn dispatch(&self, message: BoxedMessage, scope: &ContextMap) -> BusResult {
        let name = message.name();
        // Re-checked here because registration stays open after build.
        if self.features.contains(name) && self.services.contains(name) {
            return Err(BusError::CrossRegistered {
                name: name.to_string(),
            });
        }

        debug!(message = %name, "Dispatching through facade");
        let executor = self.executor(scope.clone());
        if self.middleware_enabled() {
            self.pipeline.execute(message, scope.clone(), executor).await
        } else {
            executor(message).await
        }
    }

    /// Builds the innermost stage the pipeline wraps: route the (possibly
    /// middleware-replaced) message to whichever bus holds its binding.
    fn executor(&self, scope: ContextMap) -> Executor {
        let features = Arc::clone(&self.features);
        let services = Arc::clone(&self.services);
        let dependencies = Arc::clone(&self.dependencies);
        Arc::new(move |message| {
            let features = Arc::clone(&features);
            let services = Arc::clone(&services);
            let ctx = HandlerContext::new(Arc::clone(&dependencies), scope.clone());
            Box::pin(async move {
                if services.contains(message.name()) {
                    services.execute(&message, &ctx).await
                } else {
                    features.execute(&message, &ctx).await
                }
            })
        })
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("features", &self.features.names().len())
            .field("services", &self.services.names().len())
            .field("middleware", &self.pipeline.len())
            .field("middleware_enabled", &self.middleware_enabled())
            .finish()
    }
}

// =============================================================================
// MessageBusBuilder
// =============================================================================

/// Builder assembling a [`MessageBus`] from handlers, middleware, and
/// dependencies. [`build`](MessageBusBuilder::build) fails fast when any
/// message type name is bound on both buses.
pub struct MessageBusBuilder {
    features: Arc<FeatureBus>,
    services: Arc<ApplicationServiceBus>,
    pipeline: Arc<Pipeline>,
    dependencies: Arc<Dependencies>,
    middleware_enabled: bool,
    error_handler: Option<ErrorHandler>,
    first_error: Option<BusError>,
}

impl Default for MessageBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBusBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        let features = Arc::new(FeatureBus::new());
        let services = Arc::new(ApplicationServiceBus::new(Arc::clone(&features)));
        Self {
            features,
            services,
            pipeline: Arc::new(Pipeline::new()),
            dependencies: Arc::new(Dependencies::new()),
            middleware_enabled: true,
            error_handler: None,
            first_error: None,
        }
    }

    fn record(&mut self, result: Result<(), BusError>) {
        if self.first_error.is_none()
            && let Err(err) = result
        {
            self.first_error = Some(err);
        }
    }

    /// Binds a feature to a message type name.
    pub fn feature(mut self, name: impl Into<String>, handler: Arc<dyn Feature>) -> Self {
        let result = self.features.register(name, handler);
        self.record(result);
        self
    }

    /// Binds a feature with explicit options.
    pub fn feature_with(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn Feature>,
        options: HandlerOptions,
    ) -> Self {
        let result = self.features.register_with(name, handler, options);
        self.record(result);
        self
    }

    /// Binds an application service to a message type name.
    pub fn service(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn ApplicationService>,
    ) -> Self {
        let result = self.services.register(name, handler);
        self.record(result);
        self
    }

    /// Binds an application service with explicit options.
    pub fn service_with(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn ApplicationService>,
        options: HandlerOptions,
    ) -> Self {
        let result = self.services.register_with(name, handler, options);
        self.record(result);
        self
    }

    /// Appends a middleware.
    pub fn middleware(self, middleware: Arc<dyn Middleware>) -> Self {
        self.pipeline.add(middleware);
        self
    }

    /// Adds a named dependency to the shared container.
    pub fn dependency<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        let result = self.dependencies.insert(name, value);
        self.record(result);
        self
    }

    /// Sets the initial pipeline kill-switch state.
    pub fn middleware_enabled(mut self, enabled: bool) -> Self {
        self.middleware_enabled = enabled;
        self
    }

    /// Installs the outermost error handler.
    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Installs the feature-bus error handler, consulted before errors
    /// bubble to the service layer or the facade.
    pub fn feature_error_handler(self, handler: ErrorHandler) -> Self {
        self.features.set_error_handler(handler);
        self
    }

    /// Installs the application-service-bus error handler.
    pub fn service_error_handler(self, handler: ErrorHandler) -> Self {
        self.services.set_error_handler(handler);
        self
    }

    /// Finishes the bus.
    ///
    /// Surfaces the first registration error, then rejects any message type
    /// name bound on both buses.
    pub fn build(self) -> Result<MessageBus, BusError> {
        if let Some(err) = self.first_error {
            return Err(err);
        }
        for name in self.features.names() {
            if self.services.contains(&name) {
                return Err(BusError::CrossRegistered { name });
            }
        }

        let bus = MessageBus {
            features: self.features,
            services: self.services,
            pipeline: self.pipeline,
            dependencies: self.dependencies,
            middleware_enabled: AtomicBool::new(self.middleware_enabled),
            error_handler: RwLock::new(self.error_handler),
        };
        debug!(
            features = bus.features.names().len(),
            services = bus.services.names().len(),
            middleware = bus.pipeline.len(),
            "Message bus built"
        );
        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::FnMiddleware;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relay_core::{context_map, impl_message};
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize)]
    struct Ping {
        seq: u64,
    }
    impl_message!(Ping);

    #[derive(Serialize)]
    struct Checkout {
        order_id: String,
    }
    impl_message!(Checkout);

    struct Pong;

    #[async_trait]
    impl Feature for Pong {
        async fn execute(&self, message: &BoxedMessage, ctx: &HandlerContext) -> BusResult {
            let seq = message.downcast_ref::<Ping>().unwrap().seq;
            let tenant = ctx.scope().get("tenant").map(|v| v.to_json());
            Ok(Some(json!({ "pong": seq, "tenant": tenant })))
        }
    }

    struct Failing;

    #[async_trait]
    impl Feature for Failing {
        async fn execute(&self, _message: &BoxedMessage, _ctx: &HandlerContext) -> BusResult {
            Err(BusError::failure(std::io::Error::other("db down")))
        }
    }

    struct CheckoutService;

    #[async_trait]
    impl ApplicationService for CheckoutService {
        async fn execute(
            &self,
            message: &BoxedMessage,
            features: &FeatureBus,
            ctx: &HandlerContext,
        ) -> BusResult {
            let order_id = message.downcast_ref::<Checkout>().unwrap().order_id.clone();
            let probe = features
                .execute(&BoxedMessage::new(Ping { seq: 7 }), ctx)
                .await?;
            Ok(Some(json!({ "order_id": order_id, "probe": probe })))
        }
    }

    #[tokio::test]
    async fn routes_features_and_services_exclusively() {
        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Pong))
            .service("Checkout", Arc::new(CheckoutService))
            .build()
            .unwrap();

        let reply = bus.execute(BoxedMessage::new(Ping { seq: 2 })).await.unwrap();
        assert_eq!(reply.unwrap()["pong"], 2);

        let reply = bus
            .execute(BoxedMessage::new(Checkout {
                order_id: "o-1".into(),
            }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply["order_id"], "o-1");
        assert_eq!(reply["probe"]["pong"], 7);
    }

    #[tokio::test]
    async fn cross_registration_fails_at_build() {
        struct NoopService;

        #[async_trait]
        impl ApplicationService for NoopService {
            async fn execute(
                &self,
                _message: &BoxedMessage,
                _features: &FeatureBus,
                _ctx: &HandlerContext,
            ) -> BusResult {
                Ok(None)
            }
        }

        let err = MessageBus::builder()
            .feature("Ping", Arc::new(Pong))
            .service("Ping", Arc::new(NoopService))
            .build()
            .unwrap_err();
        assert!(matches!(err, BusError::CrossRegistered { name } if name == "Ping"));
    }

    #[tokio::test]
    async fn cross_registration_rechecked_at_dispatch() {
        struct NoopService;

        #[async_trait]
        impl ApplicationService for NoopService {
            async fn execute(
                &self,
                _message: &BoxedMessage,
                _features: &FeatureBus,
                _ctx: &HandlerContext,
            ) -> BusResult {
                Ok(None)
            }
        }

        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Pong))
            .build()
            .unwrap();
        // Registration stays open after build; the overlap must be caught
        // on the next dispatch.
        bus.services().register("Ping", Arc::new(NoopService)).unwrap();

        let err = bus.execute(BoxedMessage::new(Ping { seq: 0 })).await.unwrap_err();
        assert!(matches!(
            err.original(),
            BusError::CrossRegistered { name } if name == "Ping"
        ));
    }

    #[tokio::test]
    async fn duplicate_feature_fails_at_build() {
        let err = MessageBus::builder()
            .feature("Ping", Arc::new(Pong))
            .feature("Ping", Arc::new(Pong))
            .build()
            .unwrap_err();
        assert!(matches!(err, BusError::AlreadyRegistered { name, .. } if name == "Ping"));
    }

    #[tokio::test]
    async fn scope_attributes_reach_the_handler() {
        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Pong))
            .build()
            .unwrap();

        let reply = bus
            .execute_with(
                BoxedMessage::new(Ping { seq: 1 }),
                &context_map! { "tenant" => "acme" },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply["tenant"], "acme");
    }

    #[tokio::test]
    async fn escaping_error_is_enriched_with_scope_snapshot() {
        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Failing))
            .build()
            .unwrap();

        let err = bus
            .execute_with(
                BoxedMessage::new(Ping { seq: 1 }),
                &context_map! { "request_id" => "r-9" },
            )
            .await
            .unwrap_err();
        let snapshot = err.snapshot().unwrap();
        assert_eq!(snapshot.error_kind, "failure");
        assert!(snapshot.attributes.contains_key("request_id"));
        // Display still surfaces the original failure.
        assert_eq!(err.to_string(), "db down");
    }

    #[tokio::test]
    async fn empty_scope_errors_stay_unenriched() {
        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Failing))
            .build()
            .unwrap();

        let err = bus.execute(BoxedMessage::new(Ping { seq: 1 })).await.unwrap_err();
        assert!(err.snapshot().is_none());
    }

    #[tokio::test]
    async fn facade_error_handler_gets_the_final_word() {
        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Failing))
            .error_handler(Arc::new(|err| match err.original() {
                BusError::Failure(_) => Ok(Some(json!({ "fallback": true }))),
                _ => Err(err),
            }))
            .build()
            .unwrap();

        let reply = bus.execute(BoxedMessage::new(Ping { seq: 1 })).await.unwrap();
        assert_eq!(reply, Some(json!({ "fallback": true })));
    }

    #[tokio::test]
    async fn middleware_toggle_round_trip() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = Arc::clone(&log);
        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Pong))
            .middleware(Arc::new(FnMiddleware::new("observer", 0).pre(move |ctx| {
                seen.lock().push(ctx.message().name().to_string());
                Ok(())
            })))
            .build()
            .unwrap();

        bus.execute(BoxedMessage::new(Ping { seq: 1 })).await.unwrap();
        assert_eq!(log.lock().len(), 1);

        bus.disable_middleware();
        bus.execute(BoxedMessage::new(Ping { seq: 2 })).await.unwrap();
        assert_eq!(log.lock().len(), 1);

        bus.enable_middleware();
        bus.execute(BoxedMessage::new(Ping { seq: 3 })).await.unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn feature_level_handler_recovers_before_the_facade() {
        let facade_called = Arc::new(Mutex::new(false));
        let seen = Arc::clone(&facade_called);
        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Failing))
            .feature_error_handler(Arc::new(|err| match err.original() {
                BusError::Failure(_) => Ok(Some(json!({ "layer": "feature" }))),
                _ => Err(err),
            }))
            .error_handler(Arc::new(move |err| {
                *seen.lock() = true;
                Err(err)
            }))
            .build()
            .unwrap();

        let reply = bus.execute(BoxedMessage::new(Ping { seq: 1 })).await.unwrap();
        assert_eq!(reply, Some(json!({ "layer": "feature" })));
        // The inner layer recovered, so the facade handler never ran.
        assert!(!*facade_called.lock());
    }

    #[tokio::test]
    async fn introspection_lists_all_bindings() {
        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Pong))
            .service("Checkout", Arc::new(CheckoutService))
            .dependency("greeting", "hello".to_string())
            .build()
            .unwrap();

        assert_eq!(bus.feature_names(), vec!["Ping"]);
        assert_eq!(bus.service_names(), vec!["Checkout"]);
        assert_eq!(bus.message_names(), vec!["Checkout", "Ping"]);
        assert_eq!(bus.dependency_names(), vec!["greeting"]);
    }

    #[tokio::test]
    async fn dependencies_reach_handlers() {
        struct Greeter;

        #[async_trait]
        impl Feature for Greeter {
            async fn execute(&self, _message: &BoxedMessage, ctx: &HandlerContext) -> BusResult {
                let greeting = ctx.require::<String>("greeting")?;
                Ok(Some(json!({ "text": *greeting })))
            }
        }

        let bus = MessageBus::builder()
            .feature("Ping", Arc::new(Greeter))
            .dependency("greeting", "hello".to_string())
            .build()
            .unwrap();

        let reply = bus.execute(BoxedMessage::new(Ping { seq: 0 })).await.unwrap();
        assert_eq!(reply.unwrap()["text"], "hello");
    }
}
