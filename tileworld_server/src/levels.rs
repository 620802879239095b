//! Server-side level storage.
//!
//! The server loads every level up front, so portal destinations resolve
//! synchronously inside a tick.

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::Context;
use tileworld_shared::{
    level::{Level, PortalObject, TILESIZE},
    math::Vec2,
};
use tracing::{info, warn};

/// Where a portal sends its traveler.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub level: String,
    pub position: Vec2,
}

#[derive(Debug, Default, Clone)]
pub struct LevelStorage {
    levels: HashMap<String, Arc<Level>>,
}

impl LevelStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in `dir`. A level that fails to parse is
    /// logged and skipped; an unreadable directory is an error.
    pub fn load_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut storage = Self::new();
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("read levels dir {}", dir.display()))?;
        for entry in entries {
            let path = entry.context("read dir entry")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Level::load(&path) {
                Ok(level) => {
                    info!(level = %level.name, portals = level.portals().len(), "level loaded");
                    storage.insert(level);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "level failed to load"),
            }
        }
        Ok(storage)
    }

    pub fn insert(&mut self, level: Level) {
        self.levels.insert(level.name.clone(), Arc::new(level));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Level>> {
        self.levels.get(name)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Resolves `portal`'s target to a spawn point two tiles in front of the
    /// destination portal, on the side it faces.
    pub fn destination(&self, portal: &PortalObject) -> anyhow::Result<Destination> {
        let (level_name, object) = portal.target()?;
        let level = self
            .get(level_name)
            .with_context(|| format!("portal target level '{level_name}' is not loaded"))?;
        let exit = level
            .portal(object)
            .with_context(|| format!("no portal '{object}' in level '{level_name}'"))?;
        let offset = 2.0 * TILESIZE * exit.props.direction.sign();
        Ok(Destination {
            level: level_name.to_string(),
            position: Vec2::new(exit.x + offset, exit.y),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileworld_shared::level::{Facing, LevelObject, PortalProps};

    fn portal(x: f32, y: f32, to: &str, direction: Facing) -> LevelObject {
        LevelObject::Portal(PortalObject {
            x,
            y,
            width: 16.0,
            height: 32.0,
            props: PortalProps {
                to: to.to_string(),
                direction,
            },
        })
    }

    fn storage() -> LevelStorage {
        let mut storage = LevelStorage::new();
        storage.insert(
            Level::from_ascii("a", &["....", "####"])
                .unwrap()
                .with_object("doorA", portal(16.0, 0.0, "b.doorB", Facing::Right)),
        );
        storage.insert(
            Level::from_ascii("b", &["........", "########"])
                .unwrap()
                .with_object("doorB", portal(96.0, 48.0, "a.doorA", Facing::Left))
                .with_object("broken", portal(0.0, 0.0, "c.nowhere", Facing::Left)),
        );
        storage
    }

    #[test]
    fn destination_offsets_two_tiles_toward_facing() {
        let storage = storage();
        let a = storage.get("a").unwrap();
        let dest = storage.destination(a.portal("doorA").unwrap()).unwrap();
        assert_eq!(dest.level, "b");
        assert_eq!(dest.position, Vec2::new(96.0 - 32.0, 48.0));

        let b = storage.get("b").unwrap();
        let back = storage.destination(b.portal("doorB").unwrap()).unwrap();
        assert_eq!(back.position, Vec2::new(16.0 + 32.0, 0.0));
    }

    #[test]
    fn missing_target_level_is_an_error() {
        let storage = storage();
        let b = storage.get("b").unwrap();
        assert!(storage.destination(b.portal("broken").unwrap()).is_err());
    }
}
