//! Configuration system.
//!
//! Loads engine configuration from JSON strings or files. Every field has a
//! default, so a config file only needs to name what it changes.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where new players appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub level: String,
    pub x: f32,
    pub y: f32,
}

impl Default for SpawnPoint {
    fn default() -> Self {
        Self {
            level: "test".to_string(),
            x: 424.0,
            y: 90.0,
        }
    }
}

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Directory holding `<level>.json` assets.
    pub levels_dir: String,
    pub spawn: SpawnPoint,
    /// Connections beyond this are refused (server only).
    pub max_sessions: usize,
    /// Client only.
    pub connect_timeout_ms: u64,
    /// Sprite sheet used for players (client only).
    pub player_sprite: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 30,
            levels_dir: "levels".to_string(),
            spawn: SpawnPoint::default(),
            max_sessions: 20,
            connect_timeout_ms: 1000,
            player_sprite: "player".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn tick_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}
