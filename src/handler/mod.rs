//! Handler module - request handling and dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps request kinds to handlers
//! - [`RequestContext`] - the request plus helpers for building the reply
//!
//! # Example
//!
//! ```ignore
//! use consolewire::handler::{HandlerRegistry, RequestContext};
//! use consolewire::protocol::{response_type, RequestKind};
//! use consolewire::protocol::payloads::Pong;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.register(RequestKind::Ping, |ctx: RequestContext| async move {
//!     ctx.respond(response_type::PONG, &Pong { time: 0 })
//! });
//! ```

mod context;
mod registry;

pub use context::RequestContext;
pub use registry::{BoxFuture, FnHandler, Handler, HandlerRegistry, HandlerResult};
