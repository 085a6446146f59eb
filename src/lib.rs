//! # consolewire
//!
//! Structured request/response and event traffic embedded in an interactive
//! console byte stream.
//!
//! A remote process whose only reachable channel is a terminal session (a PTY
//! carrying a server console) runs a [`Bridge`]. The desktop controller runs a
//! [`BridgeClient`] over the same session.
//!
//! ## Architecture
//!
//! - **Remote to controller**: events and responses are framed as
//!   `ESC ] 1337 ; MCPanel: <base64 JSON> BEL`, an OSC sequence terminals
//!   ignore. Everything around the frames is ordinary console output.
//! - **Controller to remote**: requests are written as input lines
//!   `///mcpanel:<base64 JSON>`.
//! - The controller's [`StreamDemux`] recovers frames from arbitrarily
//!   chunked output and passes every other byte through unchanged.
//!
//! ## Example
//!
//! ```ignore
//! use consolewire::{Bridge, BridgeClient, ClientConfig, RuntimeVariant};
//!
//! // Remote side.
//! let bridge = Bridge::builder(RuntimeVariant::Paper)
//!     .commands(registry)
//!     .status(collector)
//!     .start(tokio::io::stdin(), tokio::io::stdout())?;
//! bridge.events().announce().await?;
//!
//! // Controller side.
//! let client = BridgeClient::attach(pty_reader, pty_writer, ClientConfig::default());
//! let completions = client.complete("gamemode cr").await?;
//! ```

pub mod cache;
pub mod commands;
pub mod completion;
pub mod config;
pub mod demux;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod introspect;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod watchdog;
pub mod writer;

mod bridge;
mod client;

pub use bridge::{Bridge, BridgeBuilder, EventEmitter};
pub use cache::TtlCache;
pub use client::BridgeClient;
pub use config::{BridgeConfig, ClientConfig, LogConfig, WatchdogConfig};
pub use demux::{DemuxItem, DemuxReader, StreamDemux};
pub use dispatcher::Dispatcher;
pub use error::{BridgeError, FrameError, Result};
pub use handler::RequestContext;
pub use runtime::{RuntimeAdapter, RuntimeVariant, StatusCollector};
pub use watchdog::{ActivityProbe, Watchdog};
