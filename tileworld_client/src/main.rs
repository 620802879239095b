//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p tileworld_client -- [--config client.json] [--addr 127.0.0.1:40000]
//!                                    [--tick-hz 30] [--levels-dir levels]
//!
//! Headless: keys are driven from stdin, one event per line.
//!
//! Console commands:
//!   +KeyD / -KeyD  - Press / release a key (KeyA, KeyD, KeyW, KeyS, Space, KeyX, KeyF)
//!   status         - Show client status
//!   quit           - Exit client

use std::env;
use std::io::BufRead;
use std::path::Path;

use anyhow::Context;
use tileworld_client::{
    client::ClientState,
    input::{KeyBindings, KeyboardState},
    GameClient,
};
use tileworld_shared::{config::EngineConfig, render::NullRenderer, runtime::FixedStep};
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();

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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, levels_dir = %cfg.levels_dir, "Starting client");

    let mut client = match GameClient::connect(&cfg).await {
        Ok(client) => client,
        Err(e) => {
            println!("Could not reach the server: {e:#}");
            return Err(e);
        }
    };

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Client connected. Type '+KeyD' / '-KeyD' to move, 'status' for info, 'quit' to exit.");
    println!();

    let bindings = KeyBindings::default();
    let mut keys = KeyboardState::new();
    let mut renderer = NullRenderer;
    let mut clock = FixedStep::from_hz(cfg.tick_hz);
    let mut last = tokio::time::Instant::now();
    let mut shown_notices = 0;

    loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            if keys.apply_line(&line) {
                continue;
            }
            match line.as_str() {
                "status" => {
                    println!("State: {:?}", client.state);
                    println!("Level: {}", client.level_name().unwrap_or("-"));
                    if let Some(body) = client.player_body() {
                        let p = body.position.current();
                        println!("Player: {} at ({:.1}, {:.1}) {:?}", client.player(), p.x, p.y, body.cstate);
                    }
                    println!("Entities: {}", client.registry().len());
                }
                "quit" | "exit" => return Ok(()),
                other => println!("Unknown command: {other}"),
            }
        }

        let now = tokio::time::Instant::now();
        let plan = clock.advance(now - last);
        last = now;
        for _ in 0..plan.updates {
            let input = bindings.sample(&keys);
            client.update(&input);
        }
        client.draw(&mut renderer, plan.weight);

        for notice in &client.notices[shown_notices..] {
            println!("{notice}");
        }
        shown_notices = client.notices.len();

        // If disconnected, exit.
        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        tokio::time::sleep(clock.step() / 2).await;
    }

    Ok(())
}
