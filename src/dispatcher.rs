//! Request dispatcher.
//!
//! Every request moves through `Received → Routed → (Completed | TimedOut |
//! Failed)` and produces exactly one [`Response`] carrying its id. Handler
//! errors, panics and unknown kinds all become error responses. On timeout
//! the handler task is left to finish in the background; its result is
//! discarded.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::TtlCache;
use crate::config::{BridgeConfig, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{BridgeError, Result};
use crate::handler::{HandlerRegistry, RequestContext};
use crate::introspect::filter_prefix;
use crate::protocol::payloads::{CommandTree, Pong};
use crate::protocol::request_line::{decode_request_body, encode_plain_reply};
use crate::protocol::{response_type, ErrorCode, Request, RequestKind, Response};
use crate::runtime::RuntimeAdapter;

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Routed,
    Completed,
    TimedOut,
    Failed,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchState::Received => "received",
            DispatchState::Routed => "routed",
            DispatchState::Completed => "completed",
            DispatchState::TimedOut => "timed_out",
            DispatchState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Routes requests to handlers under one governing timeout.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Dispatcher with the built-in handlers for `adapter`.
    pub fn for_runtime(
        adapter: RuntimeAdapter,
        cache: Arc<TtlCache<CommandTree>>,
        config: &BridgeConfig,
    ) -> Self {
        Self::new(builtin_handlers(adapter, cache)).timeout(config.request_timeout)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Produce the response for `request`. Never fails.
    pub async fn dispatch(&self, request: Request) -> Response {
        let id = request.id.clone();
        let kind = request.kind.clone();
        tracing::debug!(%id, %kind, state = %DispatchState::Received, "request");

        let Some(handler) = self.registry.get(&kind) else {
            tracing::warn!(%id, %kind, state = %DispatchState::Failed, "no handler for request type");
            return Response::from_error(id, &BridgeError::UnresolvedRequest(kind.to_string()));
        };

        tracing::debug!(%id, %kind, state = %DispatchState::Routed, "request");
        let task = tokio::spawn(handler.call(RequestContext::new(request)));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(response))) => {
                tracing::debug!(%id, %kind, state = %DispatchState::Completed, "request");
                response
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(%id, %kind, state = %DispatchState::Failed, error = %e, "handler failed");
                Response::from_error(id, &e)
            }
            Ok(Err(join)) => {
                tracing::error!(%id, %kind, state = %DispatchState::Failed, error = %join, "handler panicked");
                Response::error(id, ErrorCode::HandlerFailed, format!("handler aborted: {join}"))
            }
            Err(_) => {
                tracing::warn!(%id, %kind, state = %DispatchState::TimedOut, after = ?self.timeout, "handler timed out");
                let err = BridgeError::HandlerTimeout {
                    id: id.clone(),
                    after: self.timeout,
                };
                Response::from_error(id, &err)
            }
        }
    }

    /// Answer a request passed as console command arguments.
    ///
    /// The arguments are joined before decoding since some channels split
    /// long tokens. The reply is a plain `MCPANEL:` line, suitable for
    /// channels such as RCON that return command output directly.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Frame`] if the arguments are not a request.
    pub async fn dispatch_command(&self, args: &[&str]) -> Result<String> {
        let request = decode_request_body(&args.concat())?;
        let response = self.dispatch(request).await;
        encode_plain_reply(&response)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Run a blocking host call off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BridgeError::HandlerFailed(format!("host call aborted: {e}")))?
}

/// Export the command tree through the cache.
pub async fn cached_tree(
    adapter: &RuntimeAdapter,
    cache: &TtlCache<CommandTree>,
) -> Result<Arc<CommandTree>> {
    let introspector = adapter.introspector.clone();
    cache
        .get(|| blocking(move || introspector.export()))
        .await
}

/// Handlers for every built-in request kind.
pub fn builtin_handlers(
    adapter: RuntimeAdapter,
    cache: Arc<TtlCache<CommandTree>>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    let completion = adapter.completion.clone();
    registry.register(RequestKind::Complete, move |ctx: RequestContext| {
        let completion = completion.clone();
        async move {
            let buffer = ctx.require_str("buffer")?;
            let completions = completion.complete(buffer).await?;
            ctx.respond(response_type::COMPLETIONS, &completions)
        }
    });

    let commands_adapter = adapter.clone();
    registry.register(RequestKind::Commands, move |ctx: RequestContext| {
        let adapter = commands_adapter.clone();
        let cache = cache.clone();
        async move {
            let tree = cached_tree(&adapter, &cache).await?;
            match ctx.str_field("prefix").filter(|p| !p.is_empty()) {
                Some(prefix) => ctx.respond(response_type::COMMAND_TREE, &filter_prefix(&tree, prefix)),
                None => ctx.respond(response_type::COMMAND_TREE, tree.as_ref()),
            }
        }
    });

    let status = adapter.status.clone();
    registry.register(RequestKind::Players, move |ctx: RequestContext| {
        let status = status.clone();
        async move {
            let players = blocking(move || status.players()).await?;
            ctx.respond(response_type::PLAYER_LIST, &players)
        }
    });

    let status = adapter.status.clone();
    registry.register(RequestKind::Status, move |ctx: RequestContext| {
        let status = status.clone();
        async move {
            let snapshot = blocking(move || status.status()).await?;
            ctx.respond(response_type::SERVER_STATUS, &snapshot)
        }
    });

    let status = adapter.status.clone();
    registry.register(RequestKind::Plugins, move |ctx: RequestContext| {
        let status = status.clone();
        async move {
            let plugins = blocking(move || status.plugins()).await?;
            ctx.respond(response_type::PLUGIN_LIST, &plugins)
        }
    });

    let status = adapter.status.clone();
    let tag = adapter.variant.partition_tag();
    registry.register(adapter.variant.partition_kind(), move |ctx: RequestContext| {
        let status = status.clone();
        async move {
            let partitions = blocking(move || status.partitions()).await?;
            ctx.respond(tag, &partitions)
        }
    });

    registry.register(RequestKind::Ping, |ctx: RequestContext| async move {
        ctx.respond(response_type::PONG, &Pong { time: now_millis() })
    });

    registry
}
