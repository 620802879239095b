//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p tileworld_server -- [--config server.json] [--addr 127.0.0.1:40000]
//!                                    [--tick-hz 30] [--levels-dir levels]
//!
//! The server loads every level in the levels directory, accepts sessions,
//! and relays movement between the players that share a level.

use std::env;
use std::path::Path;

use anyhow::{bail, Context};
use tileworld_server::{levels::LevelStorage, transport::TcpTransport, GameServer};
use tileworld_shared::{config::EngineConfig, runtime::FixedStep};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();

    // The config file is the base; flags override it regardless of order.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            EngineConfig::load(Path::new(path))?
        }
        None => EngineConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            "--levels-dir" if i + 1 < args.len() => {
                cfg.levels_dir = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, levels_dir = %cfg.levels_dir, "Starting server");

    let levels = LevelStorage::load_dir(Path::new(&cfg.levels_dir)).context("load levels")?;
    info!(count = levels.len(), "Levels loaded");
    if levels.get(&cfg.spawn.level).is_none() {
        warn!(level = %cfg.spawn.level, "spawn level missing from levels dir");
    }

    let (transport, mut events) = TcpTransport::bind(&cfg.server_addr, cfg.max_sessions)
        .await
        .context("start transport")?;
    info!(local = %transport.local_addr(), "Server listening");

    let mut clock = FixedStep::from_hz(cfg.tick_hz);
    let mut server = GameServer::new(cfg, levels, transport);

    // Main server loop.
    let mut last = tokio::time::Instant::now();
    let mut next_tick = last;
    loop {
        next_tick += clock.step();
        tokio::time::sleep_until(next_tick).await;

        loop {
            match events.try_recv() {
                Ok(event) => server.handle_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => bail!("transport stopped"),
            }
        }

        let now = tokio::time::Instant::now();
        let plan = clock.advance(now - last);
        last = now;
        for _ in 0..plan.updates {
            server.synchronize();
        }
    }
}
