//! Handler registry for dispatching requests by kind.
//!
//! Kinds are matched case-insensitively. Registering the same kind twice
//! replaces the earlier handler.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use super::RequestContext;
use crate::error::Result;
use crate::protocol::{RequestKind, Response};

/// Result type for handler functions.
pub type HandlerResult = Result<Response>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request, producing its response.
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(ctx))
    }
}

fn key(kind: &RequestKind) -> String {
    kind.as_str().to_ascii_lowercase()
}

/// Registry mapping request kinds to handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async closure for `kind`.
    pub fn register<F, Fut>(&mut self, kind: impl Into<RequestKind>, handler: F) -> &mut Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(kind, Arc::new(FnHandler::new(handler)))
    }

    /// Register a prebuilt handler for `kind`.
    pub fn register_handler(
        &mut self,
        kind: impl Into<RequestKind>,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        let kind = kind.into();
        if self.handlers.insert(key(&kind), handler).is_some() {
            tracing::debug!(%kind, "handler replaced");
        }
        self
    }

    /// Get the handler for a request kind.
    pub fn get(&self, kind: &RequestKind) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&key(kind)).cloned()
    }

    pub fn contains(&self, kind: &RequestKind) -> bool {
        self.handlers.contains_key(&key(kind))
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payloads::Pong;
    use crate::protocol::{response_type, Request};

    #[test]
    fn test_register_and_get() {
        let mut registry = HandlerRegistry::new();
        registry.register(RequestKind::Ping, |ctx: RequestContext| async move {
            ctx.respond(response_type::PONG, &Pong { time: 1 })
        });

        assert!(registry.get(&RequestKind::Ping).is_some());
        assert!(registry.get(&RequestKind::Status).is_none());
        assert_eq!(registry.kinds(), vec!["ping"]);
    }

    #[test]
    fn test_custom_kind_case_insensitive() {
        let mut registry = HandlerRegistry::new();
        registry.register("Reload", |ctx: RequestContext| async move {
            ctx.respond("reloaded", &serde_json::json!({}))
        });

        assert!(registry.contains(&RequestKind::from("reload")));
        assert!(registry.contains(&RequestKind::from("RELOAD")));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register(RequestKind::Ping, |ctx: RequestContext| async move {
            ctx.respond(response_type::PONG, &Pong { time: 1 })
        });
        registry.register(RequestKind::Ping, |ctx: RequestContext| async move {
            ctx.respond(response_type::PONG, &Pong { time: 2 })
        });
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_call_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(RequestKind::Ping, |ctx: RequestContext| async move {
            ctx.respond(response_type::PONG, &Pong { time: 42 })
        });

        let handler = registry.get(&RequestKind::Ping).unwrap();
        let response = handler
            .call(RequestContext::new(Request::new("r1", "ping")))
            .await
            .unwrap();

        assert_eq!(response.id, "r1");
        assert_eq!(response.kind, "pong");
        assert_eq!(response.payload_as::<Pong>().unwrap().time, 42);
    }
}
