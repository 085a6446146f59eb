//! Payload records carried by responses and events.
//!
//! Field names follow the controller's camelCase JSON vocabulary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// One tab-completion suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    /// Only present when the runtime supplies hint text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

impl Suggestion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tooltip: None,
        }
    }

    pub fn with_tooltip(text: impl Into<String>, tooltip: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tooltip: Some(tooltip.into()),
        }
    }
}

/// Payload of a `completions` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completions {
    pub completions: Vec<Suggestion>,
    pub is_async: bool,
}

impl Completions {
    pub fn sync(completions: Vec<Suggestion>) -> Self {
        Self {
            completions,
            is_async: false,
        }
    }

    pub fn texts(&self) -> Vec<&str> {
        self.completions.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Node of an exported command tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, CommandNode>>,
    /// `"literal"` or an argument type tag such as `"integer"` or `"player"`.
    #[serde(rename = "type", default = "literal_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<String>>,
}

pub const LITERAL: &str = "literal";

fn literal_kind() -> String {
    LITERAL.to_string()
}

impl CommandNode {
    pub fn literal(description: Option<String>) -> Self {
        Self {
            description,
            aliases: None,
            permission: None,
            usage: None,
            children: None,
            kind: literal_kind(),
            required: None,
            examples: None,
        }
    }

    pub fn argument(kind: impl Into<String>, required: bool, examples: Option<Vec<String>>) -> Self {
        Self {
            kind: kind.into(),
            required: Some(required),
            examples,
            ..Self::literal(None)
        }
    }

    pub fn is_literal(&self) -> bool {
        self.kind == LITERAL
    }

    /// Nesting depth below this node (a leaf is 0).
    pub fn depth(&self) -> usize {
        self.children
            .as_ref()
            .and_then(|c| c.values().map(|n| n.depth() + 1).max())
            .unwrap_or(0)
    }
}

/// Payload of a `command_tree` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTree {
    pub commands: BTreeMap<String, CommandNode>,
}

impl CommandTree {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub name: String,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub health: f64,
    pub food_level: i32,
    pub ping: i32,
    pub op: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_mode: Option<String>,
}

impl PlayerInfo {
    /// Reduced record for proxies, which know little about a player.
    pub fn proxied(name: impl Into<String>, uuid: impl Into<String>, ping: i32) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
            world: None,
            display_name: None,
            health: 20.0,
            food_level: 20,
            ping,
            op: false,
            game_mode: None,
        }
    }
}

/// Payload of a `player_list` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerList {
    pub count: usize,
    pub max: usize,
    pub players: Vec<PlayerInfo>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// Megabytes.
    pub used: u64,
    pub max: u64,
    pub free: u64,
}

impl MemoryInfo {
    pub fn new(used: u64, max: u64) -> Self {
        Self {
            used,
            max,
            free: max.saturating_sub(used),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldInfo {
    pub name: String,
    pub players: usize,
    pub entities: usize,
    pub loaded_chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// Backend server behind a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub address: String,
    pub players: usize,
}

/// Payload of a `server_status` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub version: String,
    pub software: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
    pub online_players: usize,
    pub max_players: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tps: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mspt: Option<f64>,
    pub memory: MemoryInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worlds: Option<Vec<WorldInfo>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_dependencies: Option<Vec<String>>,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled,
            description: None,
            authors: None,
            website: None,
            commands: None,
            dependencies: None,
            soft_dependencies: None,
        }
    }
}

/// Payload of a `plugin_list` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginList {
    pub plugins: Vec<PluginInfo>,
}

/// Payload of a `worlds` or `servers` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Partitions {
    Worlds { worlds: Vec<WorldInfo> },
    Servers { servers: Vec<ServerInfo> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Milliseconds since the Unix epoch on the bridge host.
    pub time: u64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeReady {
    pub version: String,
    pub platform: String,
    pub features: Vec<String>,
}

impl BridgeReady {
    pub fn supports(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Payload of `player_join` and `player_leave`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub name: String,
    pub uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub tps: f64,
    #[serde(default)]
    pub mspt: Option<f64>,
    pub player_count: usize,
    pub max_players: usize,
    #[serde(rename = "usedMemoryMB")]
    pub used_memory_mb: u64,
    #[serde(rename = "maxMemoryMB")]
    pub max_memory_mb: u64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub name: String,
    pub uuid: String,
    pub world: String,
    pub ping: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayersUpdate {
    pub count: usize,
    pub max: usize,
    pub players: Vec<PlayerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryUpdate {
    pub plugin: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsUpdated {
    pub reason: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub available_processors: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
}

impl SystemInfo {
    /// Describe the host this process runs on.
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            available_processors: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            runtime_version: None,
        }
    }
}
