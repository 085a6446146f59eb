//! Tab-completion providers.
//!
//! Two variants exist, chosen once per runtime:
//!
//! - [`SyncCompletionProvider`] answers from the command registry directly.
//! - [`EventCompletionProvider`] triggers an out-of-band introspection and
//!   waits for the matching event to deliver suggestions.
//!
//! Hint text (`tooltip`) is passed through only when the runtime supplies it.

mod event;
mod sync;

pub use event::{CancelHandle, CompletionTicket, EventCompletionProvider, IntrospectionTrigger};
pub use sync::SyncCompletionProvider;

use crate::error::Result;
use crate::handler::BoxFuture;
use crate::protocol::payloads::Completions;

/// Maximum suggestions returned when completing a command name.
pub const DEFAULT_MAX_COMPLETIONS: usize = 50;

/// Produces suggestions for a partial command buffer.
pub trait CompletionProvider: Send + Sync {
    fn complete<'a>(&'a self, buffer: &'a str) -> BoxFuture<'a, Result<Completions>>;

    /// Whether results arrive through an out-of-band event.
    fn is_async(&self) -> bool;
}

/// Split a buffer into tokens, ignoring one leading `/`.
///
/// Splits on single spaces and keeps empty tokens, so `"give "` yields
/// `["give", ""]`: the user has finished the label and started an argument.
pub fn tokenize(buffer: &str) -> Vec<&str> {
    let buffer = buffer.strip_prefix('/').unwrap_or(buffer);
    buffer.split(' ').collect()
}
