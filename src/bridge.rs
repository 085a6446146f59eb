//! Remote-side bridge service.
//!
//! The [`BridgeBuilder`] assembles the runtime adapter and dispatcher. The
//! running [`Bridge`] then:
//! 1. Reads process input line by line
//! 2. Queues request lines for a fixed pool of workers
//! 3. Writes each worker's response through the single writer task
//! 4. Forwards every other input line to the host
//!
//! Events go through the [`EventEmitter`], which shares the same writer.
//!
//! # Example
//!
//! ```ignore
//! use consolewire::{Bridge, RuntimeVariant};
//!
//! let bridge = Bridge::builder(RuntimeVariant::Paper)
//!     .commands(registry)
//!     .command_graph(graph)
//!     .status(collector)
//!     .start(tokio::io::stdin(), tokio::io::stdout())?;
//!
//! bridge.events().announce().await?;
//! let _status = bridge.events().spawn_status_broadcaster();
//! bridge.wait_for_shutdown().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::cache::TtlCache;
use crate::commands::CommandMap;
use crate::completion::{CompletionProvider, SyncCompletionProvider};
use crate::config::BridgeConfig;
use crate::dispatcher::{blocking, builtin_handlers, now_millis, Dispatcher};
use crate::error::{BridgeError, Result};
use crate::handler::{FnHandler, Handler, HandlerResult, RequestContext};
use crate::introspect::{CommandGraph, CommandIntrospector, FlatIntrospector, GraphIntrospector};
use crate::protocol::payloads::{CommandTree, CommandsUpdated, PlayerRef, RegistryUpdate};
use crate::protocol::frame::MAX_FRAME_LEN;
use crate::protocol::request_line::{decode_request, is_request_line};
use crate::protocol::{Event, EventName, Request, RequestKind, Response};
use crate::runtime::{RuntimeAdapter, RuntimeVariant, StatusCollector};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Builder for configuring and starting a bridge.
pub struct BridgeBuilder {
    variant: RuntimeVariant,
    config: BridgeConfig,
    commands: Option<Arc<dyn CommandMap>>,
    graph: Option<Arc<dyn CommandGraph>>,
    introspector: Option<Arc<dyn CommandIntrospector>>,
    completion: Option<Arc<dyn CompletionProvider>>,
    status: Option<Arc<dyn StatusCollector>>,
    handlers: Vec<(RequestKind, Arc<dyn Handler>)>,
    console: Option<mpsc::Sender<String>>,
}

impl BridgeBuilder {
    pub fn new(variant: RuntimeVariant) -> Self {
        Self {
            variant,
            config: BridgeConfig::default(),
            commands: None,
            graph: None,
            introspector: None,
            completion: None,
            status: None,
            handlers: Vec::new(),
            console: None,
        }
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// The host's flat command registry.
    pub fn commands(mut self, commands: Arc<dyn CommandMap>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// The host's typed command graph, when it has one.
    pub fn command_graph(mut self, graph: Arc<dyn CommandGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Replace the introspector derived from the registry and graph.
    pub fn introspector(mut self, introspector: Arc<dyn CommandIntrospector>) -> Self {
        self.introspector = Some(introspector);
        self
    }

    /// Replace the registry-backed completion provider.
    pub fn completion(mut self, completion: Arc<dyn CompletionProvider>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn status(mut self, status: Arc<dyn StatusCollector>) -> Self {
        self.status = Some(status);
        self
    }

    /// Register an extra handler. Overrides a built-in one of the same kind.
    pub fn handle<F, Fut>(mut self, kind: impl Into<RequestKind>, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers
            .push((kind.into(), Arc::new(FnHandler::new(handler))));
        self
    }

    /// Receive input lines that are not requests.
    pub fn forward_input(mut self, console: mpsc::Sender<String>) -> Self {
        self.console = Some(console);
        self
    }

    /// Resolve the runtime adapter from the configured capabilities.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] if no status collector was given, or if
    /// neither a command registry nor explicit introspection and completion
    /// were.
    pub fn adapter(&self) -> Result<RuntimeAdapter> {
        let reserved = self.config.reserved_namespaces.clone();

        let introspector: Arc<dyn CommandIntrospector> =
            match (&self.introspector, &self.graph, &self.commands) {
                (Some(introspector), _, _) => introspector.clone(),
                (None, Some(graph), Some(commands)) => Arc::new(
                    GraphIntrospector::new(graph.clone(), commands.clone())
                        .reserved_namespaces(reserved.clone()),
                ),
                (None, None, Some(commands)) => {
                    Arc::new(FlatIntrospector::new(commands.clone()).reserved_namespaces(reserved.clone()))
                }
                (None, _, None) => {
                    return Err(BridgeError::Config("no command registry or introspector".into()))
                }
            };

        let completion: Arc<dyn CompletionProvider> = match (&self.completion, &self.commands) {
            (Some(completion), _) => completion.clone(),
            (None, Some(commands)) => Arc::new(
                SyncCompletionProvider::new(commands.clone())
                    .max_completions(self.config.max_completions)
                    .reserved_namespaces(reserved),
            ),
            (None, None) => {
                return Err(BridgeError::Config("no command registry or completion provider".into()))
            }
        };

        let status = self
            .status
            .clone()
            .ok_or_else(|| BridgeError::Config("no status collector".into()))?;

        Ok(RuntimeAdapter::new(self.variant, introspector, completion, status))
    }

    /// Build the adapter and start serving.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<R, W>(self, reader: R, writer: W) -> Result<Bridge>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let adapter = self.adapter()?;
        let cache = Arc::new(TtlCache::new(self.config.cache_ttl));

        let mut registry = builtin_handlers(adapter.clone(), cache.clone());
        for (kind, handler) in self.handlers {
            registry.register_handler(kind, handler);
        }
        let dispatcher = Dispatcher::new(registry).timeout(self.config.request_timeout);

        let (writer, writer_task) = spawn_writer_task(writer, self.config.writer.clone());
        let emitter = EventEmitter {
            writer: writer.clone(),
            adapter,
            cache,
            status_interval: self.config.status_interval,
        };

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let workers = (0..self.config.worker_count.max(1))
            .map(|n| tokio::spawn(worker_loop(n, queue_rx.clone(), dispatcher.clone(), writer.clone())))
            .collect();

        let input_task = tokio::spawn(input_loop(
            reader,
            queue_tx,
            writer,
            self.console,
            self.config.queue_capacity,
        ));

        tracing::info!(
            platform = emitter.adapter.variant.platform(),
            workers = self.config.worker_count,
            "bridge started"
        );

        Ok(Bridge {
            dispatcher,
            emitter,
            input_task,
            workers,
            _writer_task: writer_task,
        })
    }
}

/// A running bridge.
pub struct Bridge {
    dispatcher: Dispatcher,
    emitter: EventEmitter,
    input_task: JoinHandle<Result<()>>,
    workers: Vec<JoinHandle<()>>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Bridge {
    pub fn builder(variant: RuntimeVariant) -> BridgeBuilder {
        BridgeBuilder::new(variant)
    }

    pub fn events(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Wait until input ends and every queued request has been answered.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let input = self
            .input_task
            .await
            .map_err(|e| BridgeError::HandlerFailed(format!("input loop aborted: {e}")))?;

        for worker in self.workers {
            let _ = worker.await;
        }
        tracing::info!("bridge stopped");
        input
    }
}

async fn input_loop<R>(
    reader: R,
    queue: mpsc::Sender<Request>,
    writer: WriterHandle,
    console: Option<mpsc::Sender<String>>,
    capacity: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            tracing::debug!("input closed");
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);

        if !is_request_line(line) {
            if let Some(console) = &console {
                if console.send(line.to_string()).await.is_err() {
                    tracing::debug!("console receiver dropped");
                }
            }
            continue;
        }

        let request = match decode_request(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring undecodable request line");
                continue;
            }
        };

        match queue.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                tracing::warn!(id = %request.id, capacity, "request queue full");
                let response = Response::from_error(request.id, &BridgeError::Overloaded { capacity });
                writer.send_message(&response).await?;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(BridgeError::ConnectionClosed),
        }
    }
}

async fn worker_loop(
    n: usize,
    queue: Arc<Mutex<mpsc::Receiver<Request>>>,
    dispatcher: Dispatcher,
    writer: WriterHandle,
) {
    loop {
        let request = { queue.lock().await.recv().await };
        let Some(request) = request else {
            tracing::debug!(worker = n, "request queue closed");
            return;
        };

        let response = dispatcher.dispatch(request).await;
        let sent = match response_frame(&response, MAX_FRAME_LEN) {
            Ok(frame) => writer.send(frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::warn!(worker = n, id = %response.id, error = %e, "response not written");
            if matches!(e, BridgeError::ConnectionClosed) {
                return;
            }
        }
    }
}

/// Encode a response, swapping in an error response if the frame would exceed
/// `limit` bytes and so never make it past a client's demultiplexer.
fn response_frame(response: &Response, limit: usize) -> Result<OutboundFrame> {
    let frame = OutboundFrame::message(response)?;
    if frame.size() <= limit {
        return Ok(frame);
    }

    tracing::warn!(id = %response.id, size = frame.size(), limit, "response exceeds frame limit");
    let err = BridgeError::HandlerFailed(format!(
        "response of {} bytes exceeds the {limit} byte frame limit",
        frame.size()
    ));
    OutboundFrame::message(&Response::from_error(response.id.clone(), &err))
}

/// Emits unsolicited events on the shared output stream.
#[derive(Clone)]
pub struct EventEmitter {
    writer: WriterHandle,
    adapter: RuntimeAdapter,
    cache: Arc<TtlCache<CommandTree>>,
    status_interval: Duration,
}

impl EventEmitter {
    pub async fn emit(&self, event: &Event) -> Result<()> {
        tracing::trace!(event = %event.name, "emit");
        self.writer.send_message(event).await
    }

    /// Advertise capabilities, then describe the host. Call once at startup.
    pub async fn announce(&self) -> Result<()> {
        self.emit(&Event::new(EventName::BridgeReady, &self.adapter.bridge_ready())?)
            .await?;

        let status = self.adapter.status.clone();
        let info = blocking(move || Ok(status.system_info())).await?;
        self.emit(&Event::new(EventName::SystemInfo, &info)?).await
    }

    /// Periodically emit status and player snapshots.
    ///
    /// The first pair goes out one interval after the call. The task ends
    /// when the output stream closes.
    pub fn spawn_status_broadcaster(&self) -> JoinHandle<()> {
        let emitter = self.clone();
        tokio::spawn(async move {
            let period = emitter.status_interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = emitter.broadcast_status().await {
                    if matches!(e, BridgeError::ConnectionClosed) {
                        tracing::debug!("status broadcaster stopped");
                        return;
                    }
                    tracing::warn!(error = %e, "status broadcast failed");
                }
            }
        })
    }

    /// Emit one status-update and one players-update.
    pub async fn broadcast_status(&self) -> Result<()> {
        let status = self.adapter.status.clone();
        let update = blocking(move || status.status_update()).await?;
        self.emit(&Event::new(EventName::StatusUpdate, &update)?).await?;

        let status = self.adapter.status.clone();
        let players = blocking(move || status.players_update()).await?;
        self.emit(&Event::new(EventName::PlayersUpdate, &players)?).await
    }

    /// Drop cached command metadata and tell the controller.
    pub async fn commands_changed(&self, reason: &str) -> Result<()> {
        self.cache.invalidate();
        let payload = CommandsUpdated {
            reason: reason.to_string(),
            timestamp: now_millis(),
        };
        self.emit(&Event::new(EventName::CommandsUpdated, &payload)?).await
    }

    pub async fn player_joined(&self, name: &str, uuid: &str) -> Result<()> {
        let player = PlayerRef {
            name: name.to_string(),
            uuid: uuid.to_string(),
        };
        self.emit(&Event::new(EventName::PlayerJoin, &player)?).await
    }

    pub async fn player_left(&self, name: &str, uuid: &str) -> Result<()> {
        let player = PlayerRef {
            name: name.to_string(),
            uuid: uuid.to_string(),
        };
        self.emit(&Event::new(EventName::PlayerLeave, &player)?).await
    }

    pub async fn server_ready(&self) -> Result<()> {
        self.emit(&Event::bare(EventName::ServerReady)).await
    }

    /// Publish identifiers a plugin contributes (custom items, say).
    pub async fn registry_update(&self, plugin: &str, kind: &str, values: Vec<String>) -> Result<()> {
        let payload = RegistryUpdate {
            plugin: plugin.to_string(),
            kind: kind.to_string(),
            values,
        };
        self.emit(&Event::new(EventName::RegistryUpdate, &payload)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandDescriptor, SimpleCommand, StaticCommandMap};
    use crate::demux::{DemuxItem, StreamDemux};
    use crate::protocol::payloads::{MemoryInfo, Partitions, PlayerList, PluginList, ServerStatus};
    use crate::protocol::{request_line, ErrorCode, Inbound};
    use crate::runtime::StaticStatus;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn status() -> Arc<StaticStatus> {
        Arc::new(StaticStatus {
            players: PlayerList {
                count: 0,
                max: 10,
                players: vec![],
            },
            status: ServerStatus {
                version: "1.21.1".into(),
                software: "Paper".into(),
                max_players: 10,
                tps: Some(vec![19.5]),
                memory: MemoryInfo::new(100, 1000),
                ..Default::default()
            },
            plugins: PluginList::default(),
            partitions: Partitions::Worlds { worlds: vec![] },
        })
    }

    fn builder() -> BridgeBuilder {
        let mut map = StaticCommandMap::new();
        map.register("essentials", SimpleCommand::new(CommandDescriptor::new("heal")));
        Bridge::builder(RuntimeVariant::Paper)
            .commands(Arc::new(map))
            .status(status())
    }

    /// Read output until `n` messages have been decoded.
    async fn read_messages(out: &mut DuplexStream, n: usize) -> Vec<Inbound> {
        let mut demux = StreamDemux::new();
        let mut messages = Vec::new();
        let mut buf = [0u8; 4096];
        while messages.len() < n {
            let read = out.read(&mut buf).await.unwrap();
            assert!(read > 0, "output closed early");
            for item in demux.push(&buf[..read]) {
                if let DemuxItem::Message(m) = item {
                    messages.push(m);
                }
            }
        }
        messages
    }

    #[test]
    fn test_adapter_requires_status() {
        let builder = Bridge::builder(RuntimeVariant::Spigot)
            .commands(Arc::new(StaticCommandMap::new()));
        assert!(matches!(builder.adapter(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_adapter_requires_commands() {
        let builder = Bridge::builder(RuntimeVariant::Spigot).status(status());
        assert!(matches!(builder.adapter(), Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_request_lines_answered_and_console_forwarded() {
        let (mut input, bridge_in) = duplex(4096);
        let (bridge_out, mut output) = duplex(64 * 1024);
        let (console_tx, mut console_rx) = mpsc::channel(8);

        let bridge = builder()
            .forward_input(console_tx)
            .start(bridge_in, bridge_out)
            .unwrap();

        let line = request_line::encode_request(&Request::new("a", "ping")).unwrap();
        input.write_all(b"say hello\n").await.unwrap();
        input.write_all(line.as_bytes()).await.unwrap();
        input.write_all(b"///mcpanel:%%%garbage\n").await.unwrap();

        assert_eq!(console_rx.recv().await.unwrap(), "say hello");

        let messages = read_messages(&mut output, 1).await;
        match &messages[0] {
            Inbound::Response(r) => {
                assert_eq!(r.id, "a");
                assert_eq!(r.kind, "pong");
            }
            other => panic!("unexpected {other:?}"),
        }

        drop(input);
        bridge.wait_for_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_handler_overrides_builtin() {
        let (mut input, bridge_in) = duplex(4096);
        let (bridge_out, mut output) = duplex(64 * 1024);

        let _bridge = builder()
            .handle("status", |ctx: RequestContext| async move {
                Ok(ctx.error(ErrorCode::HandlerFailed, "maintenance"))
            })
            .start(bridge_in, bridge_out)
            .unwrap();

        let line = request_line::encode_request(&Request::new("s", "status")).unwrap();
        input.write_all(line.as_bytes()).await.unwrap();

        let messages = read_messages(&mut output, 1).await;
        let Inbound::Response(response) = &messages[0] else {
            panic!("expected response");
        };
        assert_eq!(response.error_payload().unwrap().message, "maintenance");
    }

    #[tokio::test]
    async fn test_announce_sends_ready_then_system_info() {
        let (_input, bridge_in) = duplex(4096);
        let (bridge_out, mut output) = duplex(64 * 1024);
        let bridge = builder().start(bridge_in, bridge_out).unwrap();

        bridge.events().announce().await.unwrap();

        let messages = read_messages(&mut output, 2).await;
        let names: Vec<_> = messages
            .iter()
            .map(|m| match m {
                Inbound::Event(e) => e.name.clone(),
                Inbound::Response(_) => panic!("unexpected response"),
            })
            .collect();
        assert_eq!(names, vec![EventName::BridgeReady, EventName::SystemInfo]);

        let Inbound::Event(ready) = &messages[0] else { unreachable!() };
        assert_eq!(ready.payload["platform"], "paper");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_broadcaster_interval() {
        let (_input, bridge_in) = duplex(4096);
        let (bridge_out, mut output) = duplex(64 * 1024);
        let bridge = builder()
            .config(BridgeConfig::default().status_interval(Duration::from_secs(10)))
            .start(bridge_in, bridge_out)
            .unwrap();

        let broadcaster = bridge.events().spawn_status_broadcaster();
        let messages = read_messages(&mut output, 4).await;
        broadcaster.abort();

        let names: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                Inbound::Event(e) => Some(e.name.clone()),
                Inbound::Response(_) => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![
                EventName::StatusUpdate,
                EventName::PlayersUpdate,
                EventName::StatusUpdate,
                EventName::PlayersUpdate
            ]
        );
        let Inbound::Event(status) = &messages[0] else { unreachable!() };
        assert_eq!(status.payload["tps"], 19.5);
    }

    #[tokio::test]
    async fn test_commands_changed_invalidates_cache() {
        let (_input, bridge_in) = duplex(4096);
        let (bridge_out, mut output) = duplex(64 * 1024);
        let bridge = builder().start(bridge_in, bridge_out).unwrap();

        let first = bridge.dispatcher().dispatch(Request::new("1", "commands")).await;
        assert_eq!(first.kind, "command_tree");
        assert!(bridge.events().cache.is_fresh());

        bridge.events().commands_changed("plugin reload").await.unwrap();
        assert!(!bridge.events().cache.is_fresh());

        let messages = read_messages(&mut output, 1).await;
        let Inbound::Event(event) = &messages[0] else { panic!("expected event") };
        assert_eq!(event.name, EventName::CommandsUpdated);
        assert_eq!(event.payload["reason"], "plugin reload");
    }

    #[tokio::test]
    async fn test_full_queue_answers_overloaded_once_per_id() {
        let (mut input, bridge_in) = duplex(4096);
        let (bridge_out, mut output) = duplex(64 * 1024);
        let (open_tx, open_rx) = tokio::sync::watch::channel(false);

        let _bridge = builder()
            .config(BridgeConfig::default().queue_capacity(1).worker_count(1))
            .handle("block", move |ctx: RequestContext| {
                let mut gate = open_rx.clone();
                async move {
                    let _ = gate.wait_for(|open| *open).await;
                    ctx.respond("unblocked", &serde_json::json!({}))
                }
            })
            .start(bridge_in, bridge_out)
            .unwrap();

        let mut lines = String::new();
        for id in ["b1", "b2", "b3"] {
            lines.push_str(&request_line::encode_request(&Request::new(id, "block")).unwrap());
        }
        input.write_all(lines.as_bytes()).await.unwrap();

        let mut demux = StreamDemux::new();
        let mut responses = Vec::new();
        let mut buf = [0u8; 4096];
        while responses.len() < 3 {
            let read = output.read(&mut buf).await.unwrap();
            assert!(read > 0, "output closed early");
            for item in demux.push(&buf[..read]) {
                if let DemuxItem::Message(Inbound::Response(r)) = item {
                    responses.push(r);
                }
            }
            let overloaded = responses
                .iter()
                .any(|r| r.error_payload().is_some_and(|e| e.code == ErrorCode::Overloaded));
            if overloaded {
                let _ = open_tx.send(true);
            }
        }

        let mut ids: Vec<_> = responses.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["b1", "b2", "b3"]);
        assert!(responses.iter().any(|r| r.kind == "unblocked"));

        let late = request_line::encode_request(&Request::new("late", "ping")).unwrap();
        input.write_all(late.as_bytes()).await.unwrap();
        let messages = read_messages(&mut output, 1).await;
        let Inbound::Response(late) = &messages[0] else { panic!("expected response") };
        assert_eq!(late.id, "late");
    }

    #[test]
    fn test_oversized_response_replaced_with_error() {
        let payload = serde_json::json!({ "blob": "x".repeat(4096) });
        let response = Response::new("big", "command_tree", &payload).unwrap();

        let frame = response_frame(&response, 1024).unwrap();
        assert!(frame.size() <= 1024);

        let mut demux = StreamDemux::new();
        let items = demux.push(&frame.bytes);
        let [DemuxItem::Message(Inbound::Response(replaced))] = items.as_slice() else {
            panic!("expected a single response, got {items:?}");
        };
        assert_eq!(replaced.id, "big");
        let error = replaced.error_payload().unwrap();
        assert_eq!(error.code, ErrorCode::HandlerFailed);
        assert!(error.message.contains("frame limit"));

        let fits = response_frame(&response, MAX_FRAME_LEN).unwrap();
        assert_eq!(fits, OutboundFrame::message(&response).unwrap());
    }
}
