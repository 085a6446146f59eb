//! Controller-side client.
//!
//! The [`BridgeClient`] owns one attached console stream:
//! 1. A read loop feeds every chunk through a [`StreamDemux`]
//! 2. Responses complete the matching pending request
//! 3. Events go to the event channel, everything else to the console channel
//! 4. Each recovered item touches the [`ActivityProbe`]
//!
//! Requests are written as input lines on the stream's writer half.
//!
//! # Example
//!
//! ```ignore
//! use consolewire::{BridgeClient, ClientConfig};
//!
//! let client = BridgeClient::attach(pty_reader, pty_writer, ClientConfig::default());
//! let mut console = client.console().expect("taken once");
//! tokio::spawn(async move {
//!     while let Some(bytes) = console.recv().await {
//!         terminal.write_all(&bytes).await?;
//!     }
//! });
//!
//! let tree = client.commands(None).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::demux::{DemuxItem, DemuxReader, StreamDemux};
use crate::error::{BridgeError, Result};
use crate::protocol::payloads::{
    BridgeReady, CommandTree, Completions, Partitions, PlayerList, PluginList, Pong, ServerStatus,
};
use crate::protocol::{ErrorCode, Event, EventName, Inbound, Request, RequestKind, Response};
use crate::watchdog::ActivityProbe;
use crate::writer::{spawn_writer_task_default, OutboundFrame, WriterHandle};

/// State shared between the client and its read loop.
struct Shared {
    pending: Mutex<HashMap<String, oneshot::Sender<Response>>>,
    capabilities: Mutex<Option<BridgeReady>>,
    probe: ActivityProbe,
    events: mpsc::Sender<Event>,
    console: mpsc::Sender<Bytes>,
    /// Set once someone takes the console receiver.
    console_claimed: AtomicBool,
}

impl Shared {
    fn complete(&self, response: Response) {
        match self.pending.lock().remove(&response.id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::debug!(id = %response.id, "response for unknown or expired request"),
        }
    }
}

/// Removes a request's pending slot however `request` exits, including when
/// the caller drops its future.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(self.id);
    }
}

/// Stream attachment plus its tasks.
struct Attachment {
    writer: WriterHandle,
    read_task: JoinHandle<Result<()>>,
    writer_task: JoinHandle<Result<()>>,
}

impl Attachment {
    fn abort(&self) {
        self.read_task.abort();
        self.writer_task.abort();
    }
}

/// Client for a bridge reachable through a console stream.
///
/// The console and event channels are bounded. Events are delivered at most
/// once: when the event channel is full, whether or not anyone took its
/// receiver, new events are dropped. Once the console receiver is taken its
/// bytes are never dropped, so the read loop waits on a full console channel
/// and the taker must keep draining it. Until then, console bytes beyond
/// `console_capacity` are discarded.
pub struct BridgeClient {
    shared: Arc<Shared>,
    config: ClientConfig,
    attachment: Mutex<Attachment>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    console_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
}

impl BridgeClient {
    /// Attach to a console stream.
    ///
    /// Must be called inside a tokio runtime.
    pub fn attach<R, W>(reader: R, writer: W, config: ClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (console_tx, console_rx) = mpsc::channel(config.console_capacity.max(1));

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            capabilities: Mutex::new(None),
            probe: ActivityProbe::new(),
            events: events_tx,
            console: console_tx,
            console_claimed: AtomicBool::new(false),
        });

        let attachment = Self::spawn_attachment(&shared, &config, reader, writer);

        Self {
            shared,
            config,
            attachment: Mutex::new(attachment),
            events_rx: Mutex::new(Some(events_rx)),
            console_rx: Mutex::new(Some(console_rx)),
        }
    }

    fn spawn_attachment<R, W>(shared: &Arc<Shared>, config: &ClientConfig, reader: R, writer: W) -> Attachment
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, writer_task) = spawn_writer_task_default(writer);
        let demux = StreamDemux::with_max_pending(config.max_pending_frame);
        let shared = shared.clone();

        let read_task = tokio::spawn(async move {
            let result = read_loop(DemuxReader::new(reader, demux), &shared).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "read loop failed");
            }
            result
        });

        Attachment {
            writer,
            read_task,
            writer_task,
        }
    }

    /// Replace the stream with a fresh one.
    ///
    /// Any partial frame held from the old stream is discarded. Requests still
    /// pending keep waiting until answered on the new stream or timed out.
    pub fn reattach<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let fresh = Self::spawn_attachment(&self.shared, &self.config, reader, writer);
        let old = std::mem::replace(&mut *self.attachment.lock(), fresh);
        old.abort();
        tracing::info!("console stream reattached");
    }

    /// The event stream. Available once.
    pub fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.events_rx.lock().take()
    }

    /// Pass-through console bytes, in stream order. Available once.
    pub fn console(&self) -> Option<mpsc::Receiver<Bytes>> {
        let rx = self.console_rx.lock().take();
        if rx.is_some() {
            self.shared.console_claimed.store(true, Ordering::Release);
        }
        rx
    }

    /// Probe touched for every recovered item. Feed it to a [`crate::Watchdog`].
    pub fn probe(&self) -> ActivityProbe {
        self.shared.probe.clone()
    }

    /// Capabilities from the latest bridge-ready event.
    pub fn capabilities(&self) -> Option<BridgeReady> {
        self.shared.capabilities.lock().clone()
    }

    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Write raw console input, such as a command typed by the user.
    pub async fn send_input(&self, line: &str) -> Result<()> {
        let mut bytes = line.as_bytes().to_vec();
        if !line.ends_with('\n') {
            bytes.push(b'\n');
        }
        let writer = self.attachment.lock().writer.clone();
        writer.send(OutboundFrame::raw(bytes)).await
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::HandlerTimeout`] if nothing arrives within `request_timeout`
    /// - [`BridgeError::Remote`] if the bridge answered with an error response
    /// - [`BridgeError::ConnectionClosed`] if the stream ended first
    pub async fn request(&self, kind: impl Into<RequestKind>, payload: Option<Value>) -> Result<Response> {
        let mut request = Request::new(Uuid::new_v4().to_string(), kind);
        if let Some(payload) = payload {
            request = request.with_payload(payload);
        }
        let id = request.id.clone();
        let frame = OutboundFrame::request_line(&request)?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id.clone(), tx);
        let _pending = PendingGuard {
            shared: &self.shared,
            id: &id,
        };

        let writer = self.attachment.lock().writer.clone();
        writer.send(frame).await?;
        tracing::trace!(%id, kind = %request.kind, "request sent");

        let response = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(BridgeError::ConnectionClosed),
            Err(_) => {
                return Err(BridgeError::HandlerTimeout {
                    id: id.clone(),
                    after: self.config.request_timeout,
                });
            }
        };

        if !response.is_error() {
            return Ok(response);
        }
        Err(match response.error_payload() {
            Some(error) => error.into_error(),
            None => BridgeError::Remote {
                code: ErrorCode::HandlerFailed,
                message: response.payload.to_string(),
            },
        })
    }

    pub async fn complete(&self, buffer: &str) -> Result<Completions> {
        self.request(RequestKind::Complete, Some(json!({ "buffer": buffer })))
            .await?
            .payload_as()
    }

    /// The command tree, optionally restricted to names starting with `prefix`.
    pub async fn commands(&self, prefix: Option<&str>) -> Result<CommandTree> {
        let payload = prefix.map(|p| json!({ "prefix": p }));
        self.request(RequestKind::Commands, payload).await?.payload_as()
    }

    pub async fn players(&self) -> Result<PlayerList> {
        self.request(RequestKind::Players, None).await?.payload_as()
    }

    pub async fn status(&self) -> Result<ServerStatus> {
        self.request(RequestKind::Status, None).await?.payload_as()
    }

    pub async fn plugins(&self) -> Result<PluginList> {
        self.request(RequestKind::Plugins, None).await?.payload_as()
    }

    /// Worlds, or backend servers when the bridge runs on a proxy.
    pub async fn partitions(&self) -> Result<Partitions> {
        let kind = match self.capabilities() {
            Some(ready) if ready.platform == "velocity" => RequestKind::Servers,
            _ => RequestKind::Worlds,
        };
        self.request(kind, None).await?.payload_as()
    }

    pub async fn ping(&self) -> Result<Pong> {
        self.request(RequestKind::Ping, None).await?.payload_as()
    }

    /// Stop the read loop and the writer. Pending requests fail.
    pub fn detach(&self) {
        self.attachment.lock().abort();
        self.shared.pending.lock().clear();
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.attachment.get_mut().abort();
    }
}

async fn read_loop<R>(mut reader: DemuxReader<R>, shared: &Shared) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(items) = reader.next_batch().await? {
        for item in items {
            shared.probe.touch();
            match item {
                DemuxItem::Passthrough(bytes) => {
                    if shared.console_claimed.load(Ordering::Acquire) {
                        if shared.console.send(bytes).await.is_err() {
                            tracing::trace!("console receiver dropped");
                        }
                    } else if shared.console.try_send(bytes).is_err() {
                        tracing::trace!("console channel unclaimed and full, dropping bytes");
                    }
                }
                DemuxItem::Message(Inbound::Response(response)) => shared.complete(response),
                DemuxItem::Message(Inbound::Event(event)) => {
                    if event.name == EventName::BridgeReady {
                        match event.payload_as::<BridgeReady>() {
                            Ok(ready) => {
                                tracing::info!(platform = %ready.platform, version = %ready.version, "bridge ready");
                                *shared.capabilities.lock() = Some(ready);
                            }
                            Err(e) => tracing::warn!(error = %e, "malformed bridge-ready payload"),
                        }
                    }
                    // Responses must never wait on event consumers.
                    match shared.events.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(event)) => {
                            tracing::debug!(event = %event.name, "event channel full, dropping event");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            tracing::trace!("event receiver dropped");
                        }
                    }
                }
            }
        }
    }

    let stats = reader.demux().stats();
    tracing::debug!(
        frames = stats.frames,
        malformed = stats.malformed,
        passthrough_bytes = stats.passthrough_bytes,
        "console stream ended"
    );
    Ok(())
}
