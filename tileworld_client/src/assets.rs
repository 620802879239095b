//! Asynchronous level loading.
//!
//! A level is requested by name and read on a tokio task. Until it arrives
//! the handle reports `Loading` and every system that needs collision data
//! skips its work for the tick.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use tileworld_shared::level::Level;
use tokio::sync::oneshot;
use tracing::{info, warn};

pub enum LevelState {
    Loading(oneshot::Receiver<anyhow::Result<Level>>),
    Ready(Arc<Level>),
    Failed(String),
}

impl std::fmt::Debug for LevelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelState::Loading(_) => write!(f, "Loading"),
            LevelState::Ready(level) => write!(f, "Ready({})", level.name),
            LevelState::Failed(e) => write!(f, "Failed({e})"),
        }
    }
}

/// The level a client is currently in.
#[derive(Debug)]
pub struct LevelHandle {
    name: String,
    state: LevelState,
}

impl LevelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The level, once it has loaded.
    pub fn level(&self) -> Option<&Arc<Level>> {
        match &self.state {
            LevelState::Ready(level) => Some(level),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, LevelState::Ready(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, LevelState::Loading(_))
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            LevelState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Loads `<dir>/<name>.json` and keeps what it loaded.
#[derive(Debug, Default)]
pub struct LevelLoader {
    dir: PathBuf,
    cache: HashMap<String, Arc<Level>>,
}

impl LevelLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    /// Makes `level` available without touching the filesystem.
    pub fn insert(&mut self, level: Level) {
        self.cache.insert(level.name.clone(), Arc::new(level));
    }

    /// Starts loading `name`. Cached levels are ready immediately; anything
    /// else needs a tokio runtime.
    pub fn load(&mut self, name: &str) -> LevelHandle {
        if let Some(level) = self.cache.get(name) {
            return LevelHandle {
                name: name.to_string(),
                state: LevelState::Ready(level.clone()),
            };
        }

        let (tx, rx) = oneshot::channel();
        let path = self.dir.join(format!("{name}.json"));
        let owned = name.to_string();
        tokio::spawn(async move {
            let _ = tx.send(read_level(&owned, &path).await);
        });
        LevelHandle {
            name: name.to_string(),
            state: LevelState::Loading(rx),
        }
    }

    /// Moves a loading handle forward. Returns true once it is ready.
    pub fn poll(&mut self, handle: &mut LevelHandle) -> bool {
        let LevelState::Loading(rx) = &mut handle.state else {
            return handle.is_ready();
        };
        let next = match rx.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => return false,
            Err(oneshot::error::TryRecvError::Closed) => {
                LevelState::Failed("level loader task ended".to_string())
            }
            Ok(Ok(level)) => {
                info!(level = %level.name, "Level ready");
                let level = Arc::new(level);
                self.cache.insert(level.name.clone(), level.clone());
                LevelState::Ready(level)
            }
            Ok(Err(e)) => {
                warn!(level = %handle.name, error = %format!("{e:#}"), "Level failed to load");
                LevelState::Failed(format!("{e:#}"))
            }
        };
        handle.state = next;
        handle.is_ready()
    }
}

async fn read_level(name: &str, path: &Path) -> anyhow::Result<Level> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read level {}", path.display()))?;
    Level::from_json_str(name, &text)
}
