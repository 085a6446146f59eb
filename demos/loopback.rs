//! Loopback demo - a bridge and a controller in one process.
//!
//! This demo shows:
//! - Starting a bridge with a flat command registry and fixed status
//! - Attaching a client to the bridge's console stream
//! - Completions, the command tree, and events
//! - Console text passing through untouched
//!
//! ```text
//! CONSOLEWIRE_LOG=debug cargo run --example loopback
//! ```

use std::sync::Arc;

use consolewire::commands::{CommandDescriptor, SimpleCommand, StaticCommandMap};
use consolewire::logging;
use consolewire::protocol::payloads::{
    MemoryInfo, Partitions, PlayerInfo, PlayerList, PluginInfo, PluginList, ServerStatus, WorldInfo,
};
use consolewire::runtime::StaticStatus;
use consolewire::{Bridge, BridgeClient, ClientConfig, LogConfig, RuntimeVariant};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

fn commands() -> StaticCommandMap {
    let mut map = StaticCommandMap::new();
    map.register(
        "minecraft",
        SimpleCommand::new(CommandDescriptor::new("gamemode"))
            .with_words(&["adventure", "creative", "spectator", "survival"]),
    );
    map.register(
        "minecraft",
        SimpleCommand::new(CommandDescriptor::new("weather")).with_words(&["clear", "rain", "thunder"]),
    );
    map.register(
        "essentials",
        SimpleCommand::new(
            CommandDescriptor::new("home")
                .alias("h")
                .description("Teleport to your home")
                .permission("essentials.home"),
        ),
    );
    map
}

fn status() -> StaticStatus {
    let mut alex = PlayerInfo::proxied("Alex", "ec561538-f3fd-461d-aff5-086b22154bce", 12);
    alex.world = Some("world".into());

    StaticStatus {
        players: PlayerList {
            count: 1,
            max: 20,
            players: vec![alex],
        },
        status: ServerStatus {
            version: "1.21.1".into(),
            software: "Paper".into(),
            online_players: 1,
            max_players: 20,
            tps: Some(vec![20.0, 20.0, 19.96]),
            mspt: Some(11.4),
            memory: MemoryInfo::new(1024, 4096),
            ..Default::default()
        },
        plugins: PluginList {
            plugins: vec![PluginInfo::new("Essentials", "2.20.1", true)],
        },
        partitions: Partitions::Worlds {
            worlds: vec![WorldInfo {
                name: "world".into(),
                players: 1,
                entities: 214,
                loaded_chunks: 441,
                environment: Some("NORMAL".into()),
            }],
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init(&LogConfig::default())?;

    // Two pipes stand in for the PTY: controller input and console output.
    let (client_write, bridge_in) = duplex(64 * 1024);
    let (mut console_out, client_read) = duplex(64 * 1024);
    let (bridge_out, mut framed) = duplex(64 * 1024);

    let bridge = Bridge::builder(RuntimeVariant::Paper)
        .commands(Arc::new(commands()))
        .status(Arc::new(status()))
        .start(bridge_in, bridge_out)?;

    // The "server" prints log lines between the bridge's frames.
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        console_out
            .write_all(b"[12:00:00 INFO]: Done (3.212s)! For help, type \"help\"\n")
            .await?;
        loop {
            let n = framed.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, std::io::Error>(());
            }
            console_out.write_all(&buf[..n]).await?;
        }
    });

    let client = BridgeClient::attach(client_read, client_write, ClientConfig::default());
    let mut console = client.console().ok_or("console taken")?;
    let mut events = client.events().ok_or("events taken")?;

    bridge.events().announce().await?;
    let ready = events.recv().await.ok_or("no bridge-ready")?;
    println!("event: {} {}", ready.name, ready.payload);

    let completions = client.complete("gamemode s").await?;
    println!("complete 'gamemode s': {:?}", completions.texts());

    let tree = client.commands(None).await?;
    for (name, node) in &tree.commands {
        println!("command: {name} {}", node.description.as_deref().unwrap_or(""));
    }

    let status = client.status().await?;
    println!("status: {} {} tps={:?}", status.software, status.version, status.tps);

    bridge.events().player_joined("Steve", "8667ba71-b85a-4004-af54-457a9734eed7").await?;
    if let Some(event) = events.recv().await {
        println!("event: {} {}", event.name, event.payload);
    }

    if let Ok(text) = console.try_recv() {
        print!("console: {}", String::from_utf8_lossy(&text));
    }

    Ok(())
}
