//! Runtime variants and the adapter injected into the dispatcher.
//!
//! The bridge core is the same for every host. What differs is chosen once
//! at startup and bundled into a [`RuntimeAdapter`]: how commands are
//! introspected, how completions are produced, and where status snapshots
//! come from.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::completion::CompletionProvider;
use crate::error::Result;
use crate::introspect::CommandIntrospector;
use crate::protocol::payloads::{
    BridgeReady, Partitions, PlayerList, PlayerSummary, PlayersUpdate, PluginList, ServerStatus,
    StatusUpdate, SystemInfo,
};
use crate::protocol::{response_type, RequestKind};

/// Version advertised in the bridge-ready event.
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound reported for ticks per second.
pub const MAX_TPS: f64 = 20.0;

const BASE_FEATURES: &[&str] = &["commands", "players", "plugins", "status"];
const GRAPH_FEATURES: &[&str] = &["async_complete", "brigadier", "rich_tooltips", "tps", "mspt"];

/// Host environment the bridge runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeVariant {
    Spigot,
    Paper,
    Folia,
    /// Proxy in front of several backend servers.
    Velocity,
}

impl RuntimeVariant {
    pub fn platform(&self) -> &'static str {
        match self {
            RuntimeVariant::Spigot => "spigot",
            RuntimeVariant::Paper => "paper",
            RuntimeVariant::Folia => "folia",
            RuntimeVariant::Velocity => "velocity",
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, RuntimeVariant::Velocity)
    }

    /// Whether the host exposes a typed command graph.
    pub fn has_command_graph(&self) -> bool {
        matches!(self, RuntimeVariant::Paper | RuntimeVariant::Folia)
    }

    /// Feature list advertised in the bridge-ready event.
    pub fn features(&self) -> Vec<String> {
        let mut features: Vec<String> = BASE_FEATURES.iter().map(|f| f.to_string()).collect();
        features.push(self.partition_tag().to_string());
        if self.has_command_graph() {
            features.extend(GRAPH_FEATURES.iter().map(|f| f.to_string()));
        }
        features
    }

    /// Request kind answered with the partition list.
    pub fn partition_kind(&self) -> RequestKind {
        if self.is_proxy() {
            RequestKind::Servers
        } else {
            RequestKind::Worlds
        }
    }

    /// Response tag of the partition list.
    pub fn partition_tag(&self) -> &'static str {
        if self.is_proxy() {
            response_type::SERVERS
        } else {
            response_type::WORLDS
        }
    }
}

impl fmt::Display for RuntimeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.platform())
    }
}

/// Source of runtime snapshots.
///
/// Calls may block on the host; the dispatcher runs them off the async
/// workers.
pub trait StatusCollector: Send + Sync {
    fn players(&self) -> Result<PlayerList>;

    fn status(&self) -> Result<ServerStatus>;

    fn plugins(&self) -> Result<PluginList>;

    /// Worlds, or backend servers on a proxy.
    fn partitions(&self) -> Result<Partitions>;

    /// Time since the host started.
    fn uptime(&self) -> Duration {
        Duration::ZERO
    }

    /// Periodic status snapshot. Derived from [`StatusCollector::status`] by
    /// default.
    fn status_update(&self) -> Result<StatusUpdate> {
        let status = self.status()?;
        let tps = status
            .tps
            .as_ref()
            .and_then(|t| t.first().copied())
            .unwrap_or(MAX_TPS);

        Ok(StatusUpdate {
            tps: tps.min(MAX_TPS),
            mspt: status.mspt,
            player_count: status.online_players,
            max_players: status.max_players,
            used_memory_mb: status.memory.used,
            max_memory_mb: status.memory.max,
            uptime_seconds: self.uptime().as_secs(),
        })
    }

    /// Periodic player snapshot. Derived from [`StatusCollector::players`] by
    /// default.
    fn players_update(&self) -> Result<PlayersUpdate> {
        let list = self.players()?;
        Ok(PlayersUpdate {
            count: list.count,
            max: list.max,
            players: list
                .players
                .into_iter()
                .map(|p| PlayerSummary {
                    name: p.name,
                    uuid: p.uuid,
                    world: p.world.unwrap_or_default(),
                    ping: p.ping,
                })
                .collect(),
        })
    }

    fn system_info(&self) -> SystemInfo {
        SystemInfo::detect()
    }
}

/// Fixed snapshots, for hosts that push state in rather than being polled.
#[derive(Debug, Clone)]
pub struct StaticStatus {
    pub players: PlayerList,
    pub status: ServerStatus,
    pub plugins: PluginList,
    pub partitions: Partitions,
}

impl StatusCollector for StaticStatus {
    fn players(&self) -> Result<PlayerList> {
        Ok(self.players.clone())
    }

    fn status(&self) -> Result<ServerStatus> {
        Ok(self.status.clone())
    }

    fn plugins(&self) -> Result<PluginList> {
        Ok(self.plugins.clone())
    }

    fn partitions(&self) -> Result<Partitions> {
        Ok(self.partitions.clone())
    }
}

/// Per-runtime capabilities, chosen once at startup.
#[derive(Clone)]
pub struct RuntimeAdapter {
    pub variant: RuntimeVariant,
    pub introspector: Arc<dyn CommandIntrospector>,
    pub completion: Arc<dyn CompletionProvider>,
    pub status: Arc<dyn StatusCollector>,
}

impl RuntimeAdapter {
    pub fn new(
        variant: RuntimeVariant,
        introspector: Arc<dyn CommandIntrospector>,
        completion: Arc<dyn CompletionProvider>,
        status: Arc<dyn StatusCollector>,
    ) -> Self {
        Self {
            variant,
            introspector,
            completion,
            status,
        }
    }

    /// Payload of the bridge-ready event.
    pub fn bridge_ready(&self) -> BridgeReady {
        BridgeReady {
            version: BRIDGE_VERSION.to_string(),
            platform: self.variant.platform().to_string(),
            features: self.variant.features(),
        }
    }
}

impl fmt::Debug for RuntimeAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeAdapter")
            .field("variant", &self.variant)
            .field("async_completion", &self.completion.is_async())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payloads::{MemoryInfo, PlayerInfo, ServerInfo};

    fn snapshot() -> StaticStatus {
        let mut steve = PlayerInfo::proxied("Steve", "8667ba71-b85a-4004-af54-457a9734eed7", 31);
        steve.world = Some("world".into());

        StaticStatus {
            players: PlayerList {
                count: 1,
                max: 20,
                players: vec![steve],
            },
            status: ServerStatus {
                version: "1.21.1".into(),
                software: "Paper".into(),
                online_players: 1,
                max_players: 20,
                tps: Some(vec![20.4, 19.9, 19.8]),
                mspt: Some(12.5),
                memory: MemoryInfo::new(1024, 4096),
                ..Default::default()
            },
            plugins: PluginList::default(),
            partitions: Partitions::Servers {
                servers: vec![ServerInfo {
                    name: "lobby".into(),
                    address: "127.0.0.1:25566".into(),
                    players: 1,
                }],
            },
        }
    }

    #[test]
    fn test_feature_lists() {
        assert_eq!(
            RuntimeVariant::Spigot.features(),
            vec!["commands", "players", "plugins", "status", "worlds"]
        );
        assert_eq!(
            RuntimeVariant::Velocity.features(),
            vec!["commands", "players", "plugins", "status", "servers"]
        );

        let paper = RuntimeVariant::Paper.features();
        assert!(paper.contains(&"async_complete".to_string()));
        assert!(paper.contains(&"mspt".to_string()));
        assert_eq!(RuntimeVariant::Folia.features(), paper);
    }

    #[test]
    fn test_partition_kind() {
        assert_eq!(RuntimeVariant::Velocity.partition_kind(), RequestKind::Servers);
        assert_eq!(RuntimeVariant::Folia.partition_kind(), RequestKind::Worlds);
    }

    #[test]
    fn test_status_update_caps_tps() {
        let update = snapshot().status_update().unwrap();
        assert_eq!(update.tps, MAX_TPS);
        assert_eq!(update.mspt, Some(12.5));
        assert_eq!(update.used_memory_mb, 1024);
        assert_eq!(update.player_count, 1);
    }

    #[test]
    fn test_players_update_summaries() {
        let update = snapshot().players_update().unwrap();
        assert_eq!(update.count, 1);
        assert_eq!(update.players[0].world, "world");
        assert_eq!(update.players[0].ping, 31);
    }
}
