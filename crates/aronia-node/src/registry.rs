//! Method registry: named async handlers invoked by inbound requests.

use aronia_core::payload::METHOD_NOT_FOUND;
use aronia_core::Pubkey;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

/// Context handed to a method handler about its caller.
#[derive(Debug, Clone, Copy)]
pub struct PeerContext {
    /// Public key of the requesting peer.
    pub pubkey: Pubkey,
}

/// Error a method handler returns; mapped into the RESPONSE payload's
/// `{code, message}` error object.
#[derive(Debug, Clone)]
pub struct MethodError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error description.
    pub message: String,
}

impl MethodError {
    /// Creates a method error with the given code and message.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

type Handler = dyn Fn(Value, PeerContext) -> BoxFuture<'static, Result<Value, MethodError>>
    + Send
    + Sync;

/// Mapping from method name to async handler.
///
/// Handlers execute on the receive side; their result or error becomes
/// the RESPONSE frame for the originating request.
pub struct MethodRegistry {
    methods: DashMap<String, Arc<Handler>>,
}

impl MethodRegistry {
    /// Creates a registry pre-populated with the built-in `ping` method.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            methods: DashMap::new(),
        };
        registry.register("ping", |_params, _ctx| async {
            let timestamp = aronia_core::crypto::unix_now_ms().unwrap_or_default();
            Ok(json!({ "pong": true, "timestamp": timestamp }))
        });
        registry
    }

    /// Registers a handler under a method name, replacing any previous
    /// handler for that name.
    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Value, PeerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        let boxed: Arc<Handler> = Arc::new(move |params, ctx| Box::pin(handler(params, ctx)));
        self.methods.insert(name.to_string(), boxed);
    }

    /// Removes a handler. Returns `true` if one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.methods.remove(name).is_some()
    }

    /// Invokes the handler registered under `method`.
    ///
    /// # Errors
    ///
    /// Returns a `method-not-found` [`MethodError`] for unknown names, or
    /// whatever error the handler itself produced.
    pub async fn dispatch(
        &self,
        method: &str,
        params: Value,
        ctx: PeerContext,
    ) -> Result<Value, MethodError> {
        let Some(handler) = self.methods.get(method).map(|entry| entry.value().clone()) else {
            return Err(MethodError::new(
                METHOD_NOT_FOUND,
                format!("no handler registered for '{method}'"),
            ));
        };
        handler(params, ctx).await
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
