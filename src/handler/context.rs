//! Request context for handlers.
//!
//! Carries the decoded request and builds the reply:
//! - `respond` - a typed success response with the request's id
//! - `error` - an error response with the request's id
//!
//! # Example
//!
//! ```ignore
//! async fn complete(ctx: RequestContext) -> HandlerResult {
//!     let buffer = ctx.require_str("buffer")?;
//!     ctx.respond(response_type::COMPLETIONS, &provider.complete(buffer).await?)
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{BridgeError, Result};
use crate::protocol::{ErrorCode, Request, RequestKind, Response};

/// Context passed to request handlers.
///
/// `RequestContext` is `Clone` and cheap to share across tasks.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request: Arc<Request>,
    received_at: Instant,
}

impl RequestContext {
    pub fn new(request: Request) -> Self {
        Self {
            request: Arc::new(request),
            received_at: Instant::now(),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.request.id
    }

    #[inline]
    pub fn kind(&self) -> &RequestKind {
        &self.request.kind
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn payload(&self) -> Option<&Value> {
        self.request.payload.as_ref()
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.request.str_field(key)
    }

    /// A string field that must be present.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidPayload`] if the field is missing or not a string.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.str_field(key)
            .ok_or_else(|| BridgeError::InvalidPayload(format!("missing string field `{key}`")))
    }

    /// Time since the request was taken off the queue.
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Build a success response for this request.
    pub fn respond<T: Serialize + ?Sized>(&self, kind: &str, payload: &T) -> Result<Response> {
        Response::new(self.id(), kind, &payload)
    }

    /// Build an error response for this request.
    pub fn error(&self, code: ErrorCode, message: impl Into<String>) -> Response {
        Response::error(self.id(), code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_accessors() {
        let ctx = RequestContext::new(
            Request::new("42", "complete").with_payload(json!({"buffer": "give "})),
        );
        assert_eq!(ctx.id(), "42");
        assert_eq!(ctx.kind(), &RequestKind::Complete);
        assert_eq!(ctx.require_str("buffer").unwrap(), "give ");
    }

    #[test]
    fn test_require_str_missing() {
        let ctx = RequestContext::new(Request::new("1", "complete"));
        assert!(matches!(ctx.require_str("buffer"), Err(BridgeError::InvalidPayload(_))));
    }

    #[test]
    fn test_error_keeps_id() {
        let ctx = RequestContext::new(Request::new("7", "status"));
        let response = ctx.error(ErrorCode::HandlerFailed, "boom");
        assert_eq!(response.id, "7");
        assert!(response.is_error());
        assert_eq!(response.error_payload().unwrap().message, "boom");
    }

    #[test]
    fn test_context_is_clone() {
        let ctx = RequestContext::new(Request::new("1", "ping"));
        let ctx2 = ctx.clone();
        assert_eq!(ctx.id(), ctx2.id());
    }
}
