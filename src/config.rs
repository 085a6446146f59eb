//! Configuration records.
//!
//! Every struct has a `Default` matching the protocol's constants and
//! deserializes with `#[serde(default)]`, so a host can load a partial JSON
//! document. Durations are integer milliseconds on the wire.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_TTL;
use crate::commands::RESERVED_NAMESPACE;
use crate::completion::DEFAULT_MAX_COMPLETIONS;
use crate::demux::DEFAULT_MAX_PENDING;
use crate::error::Result;
use crate::writer::WriterConfig;

/// Default bound on a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between status broadcasts.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Default silence tolerated after a disruptive action.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10);

/// Environment variable overriding the log filter.
pub const LOG_ENV: &str = "CONSOLEWIRE_LOG";

/// Serde helpers for `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Parse any config record from JSON.
pub fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}

/// Remote-side bridge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    pub worker_count: usize,
    pub queue_capacity: usize,
    #[serde(with = "duration_ms")]
    pub cache_ttl: Duration,
    #[serde(with = "duration_ms")]
    pub status_interval: Duration,
    pub max_completions: usize,
    pub reserved_namespaces: Vec<String>,
    pub writer: WriterConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            worker_count: 4,
            queue_capacity: 64,
            cache_ttl: DEFAULT_CACHE_TTL,
            status_interval: DEFAULT_STATUS_INTERVAL,
            max_completions: DEFAULT_MAX_COMPLETIONS,
            reserved_namespaces: vec![RESERVED_NAMESPACE.to_string()],
            writer: WriterConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }
}

/// Controller-side client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Longest frame the demultiplexer will hold back.
    pub max_pending_frame: usize,
    /// Buffered console chunks. Once the receiver is taken, the read loop
    /// waits when full; before that, extra chunks are discarded.
    pub console_capacity: usize,
    /// Buffered events. Further events are dropped while the channel is full.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_pending_frame: DEFAULT_MAX_PENDING,
            console_capacity: 256,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_pending_frame(mut self, max: usize) -> Self {
        self.max_pending_frame = max;
        self
    }
}

/// Stream liveness guard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    #[serde(with = "duration_ms")]
    pub stale_after: Duration,
    /// Each re-arm multiplies the deadline by this factor.
    pub backoff_factor: u32,
    pub max_attempts: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            backoff_factor: 2,
            max_attempts: 3,
        }
    }
}

/// Diagnostics settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when the environment does not set one.
    pub level: String,
    /// Colour output. Only honoured when stderr is a terminal.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}
