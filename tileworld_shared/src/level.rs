//! Tile levels.
//!
//! A level is a row-major grid of collision kinds plus a set of named map
//! objects (portals, spawn markers, ...). Levels are stored as JSON assets:
//!
//! ```json
//! {
//!   "width": 40, "height": 20,
//!   "collision": [0, 0, 1, ...],
//!   "objects": {
//!     "doorA": { "type": "portal", "x": 96, "y": 64, "width": 16, "height": 32,
//!                "props": { "to": "b.doorB", "direction": "left" } }
//!   }
//! }
//! ```

use std::{collections::HashMap, path::Path};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::math::{Aabb, Vec2};

pub const TILESIZE: f32 = 16.0;
pub const TILESIZE_HALF: f32 = TILESIZE / 2.0;
/// Half extents of a tile-sized box.
pub const TILE_HALF_EXTENTS: Vec2 = Vec2::new(TILESIZE_HALF, TILESIZE_HALF);

/// Collision behaviour of one tile.
///
/// Every slope variant sorts after `SlopeLeft`, which `is_slope` relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum CollisionKind {
    #[default]
    None = 0,
    Full = 1,
    Ladder = 2,
    Platform = 3,
    SlopeLeft = 4,
    SlopeRight = 5,
    SlopeLeftBottom = 6,
    SlopeRightBottom = 7,
    SlopeLeftTop = 8,
    SlopeRightTop = 9,
}

impl CollisionKind {
    pub fn is_slope(self) -> bool {
        self >= CollisionKind::SlopeLeft
    }

    fn from_ascii(c: char) -> Option<Self> {
        Some(match c {
            '.' => Self::None,
            '#' => Self::Full,
            'H' => Self::Ladder,
            '=' => Self::Platform,
            '\\' => Self::SlopeLeft,
            '/' => Self::SlopeRight,
            'l' => Self::SlopeLeftBottom,
            'r' => Self::SlopeRightBottom,
            'L' => Self::SlopeLeftTop,
            'R' => Self::SlopeRightTop,
            _ => return None,
        })
    }
}

impl TryFrom<u8> for CollisionKind {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => Self::None,
            1 => Self::Full,
            2 => Self::Ladder,
            3 => Self::Platform,
            4 => Self::SlopeLeft,
            5 => Self::SlopeRight,
            6 => Self::SlopeLeftBottom,
            7 => Self::SlopeRightBottom,
            8 => Self::SlopeLeftTop,
            9 => Self::SlopeRightTop,
            other => return Err(format!("invalid collision kind {other}")),
        })
    }
}

impl From<CollisionKind> for u8 {
    fn from(kind: CollisionKind) -> u8 {
        kind as u8
    }
}

/// Tile index containing world coordinate `px`.
pub fn tile_of(px: f32) -> i32 {
    (px / TILESIZE).floor() as i32
}

/// Center of tile `t` along one axis.
pub fn tile_center(t: i32) -> f32 {
    t as f32 * TILESIZE + TILESIZE_HALF
}

/// What the physics step needs to know about a level.
pub trait CollisionMap {
    fn collision_kind(&self, tx: i32, ty: i32) -> CollisionKind;
    /// Size in pixels.
    fn size(&self) -> Vec2;
}

/// Which way a portal exit faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Left,
    Right,
}

impl Facing {
    pub fn sign(self) -> f32 {
        match self {
            Facing::Left => -1.0,
            Facing::Right => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalProps {
    /// Target reference, `"<level>.<object>"`.
    pub to: String,
    pub direction: Facing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalObject {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub props: PortalProps,
}

impl PortalObject {
    pub fn bounds(&self) -> Aabb {
        Aabb::from_rect(self.x, self.y, self.width, self.height)
    }

    /// Splits `props.to` into `(level, object)`.
    pub fn target(&self) -> anyhow::Result<(&str, &str)> {
        self.props
            .to
            .split_once('.')
            .with_context(|| format!("malformed portal target '{}'", self.props.to))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectObject {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Named map object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LevelObject {
    Portal(PortalObject),
    Rect(RectObject),
    Point { x: f32, y: f32 },
    /// Object kinds the simulation does not care about.
    #[serde(other)]
    Other,
}

/// A loaded level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    #[serde(default)]
    pub name: String,
    /// Width in tiles.
    pub width: u32,
    /// Height in tiles.
    pub height: u32,
    pub collision: Vec<CollisionKind>,
    #[serde(default)]
    pub objects: HashMap<String, LevelObject>,
}

impl Level {
    /// Parses a level asset. `name` overrides whatever the asset says.
    pub fn from_json_str(name: &str, s: &str) -> anyhow::Result<Self> {
        let mut level: Level =
            serde_json::from_str(s).with_context(|| format!("parse level '{name}'"))?;
        level.name = name.to_string();
        level.validate()?;
        Ok(level)
    }

    /// Loads `<path>`; the level name is the file stem.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("level path has no name: {}", path.display()))?;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read level {}", path.display()))?;
        let level = Self::from_json_str(name, &text)?;
        tracing::debug!(level = %level.name, width = level.width, height = level.height, "level parsed");
        Ok(level)
    }

    /// Builds a level from ASCII rows (`.` empty, `#` full, `H` ladder,
    /// `=` platform, `\` `/` slopes, `l` `r` bottom half-slopes, `L` `R` top
    /// half-slopes). Handy for fixtures.
    pub fn from_ascii(name: &str, rows: &[&str]) -> anyhow::Result<Self> {
        let height = rows.len() as u32;
        let width = rows.first().map(|r| r.chars().count()).unwrap_or(0) as u32;
        let mut collision = Vec::with_capacity((width * height) as usize);
        for (y, row) in rows.iter().enumerate() {
            if row.chars().count() as u32 != width {
                bail!("row {y} of level '{name}' has a different width");
            }
            for c in row.chars() {
                let kind = CollisionKind::from_ascii(c)
                    .with_context(|| format!("unknown tile '{c}' in level '{name}'"))?;
                collision.push(kind);
            }
        }
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            collision,
            objects: HashMap::new(),
        })
    }

    pub fn with_object(mut self, name: &str, object: LevelObject) -> Self {
        self.objects.insert(name.to_string(), object);
        self
    }

    fn validate(&self) -> anyhow::Result<()> {
        let expected = self.width as usize * self.height as usize;
        if self.collision.len() != expected {
            bail!(
                "level '{}' has {} collision cells, expected {}x{}={}",
                self.name,
                self.collision.len(),
                self.width,
                self.height,
                expected
            );
        }
        Ok(())
    }

    pub fn object(&self, name: &str) -> Option<&LevelObject> {
        self.objects.get(name)
    }

    pub fn portal(&self, name: &str) -> Option<&PortalObject> {
        match self.objects.get(name) {
            Some(LevelObject::Portal(p)) => Some(p),
            _ => None,
        }
    }

    /// Portals sorted by name, for stable iteration.
    pub fn portals(&self) -> Vec<(&str, &PortalObject)> {
        let mut out: Vec<_> = self
            .objects
            .iter()
            .filter_map(|(name, obj)| match obj {
                LevelObject::Portal(p) => Some((name.as_str(), p)),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }
}

impl CollisionMap for Level {
    /// Out-of-range cells read as `Full`: the world border is solid.
    fn collision_kind(&self, tx: i32, ty: i32) -> CollisionKind {
        if tx < 0 || ty < 0 || tx as u32 >= self.width || ty as u32 >= self.height {
            return CollisionKind::Full;
        }
        self.collision[tx as usize + ty as usize * self.width as usize]
    }

    fn size(&self) -> Vec2 {
        Vec2::new(
            self.width as f32 * TILESIZE,
            self.height as f32 * TILESIZE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSET: &str = r#"{
        "width": 3, "height": 2,
        "collision": [0, 2, 4, 1, 1, 9],
        "objects": {
            "doorA": { "type": "portal", "x": 16, "y": 0, "width": 16, "height": 32,
                       "props": { "to": "b.doorB", "direction": "left" } },
            "sign": { "type": "text", "x": 0, "y": 0 },
            "spawn": { "type": "point", "x": 8, "y": 8 }
        }
    }"#;

    #[test]
    fn parses_json_asset() {
        let level = Level::from_json_str("a", ASSET).unwrap();
        assert_eq!(level.name, "a");
        assert_eq!(level.collision_kind(1, 0), CollisionKind::Ladder);
        assert_eq!(level.collision_kind(2, 1), CollisionKind::SlopeRightTop);
        assert_eq!(level.size(), Vec2::new(48.0, 32.0));

        let door = level.portal("doorA").unwrap();
        assert_eq!(door.target().unwrap(), ("b", "doorB"));
        assert_eq!(door.props.direction, Facing::Left);
        assert_eq!(level.object("sign"), Some(&LevelObject::Other));
        assert!(level.portal("spawn").is_none());
    }

    #[test]
    fn rejects_bad_grid() {
        let bad = r#"{ "width": 2, "height": 2, "collision": [0, 0, 0] }"#;
        assert!(Level::from_json_str("bad", bad).is_err());
        let bad_kind = r#"{ "width": 1, "height": 1, "collision": [42] }"#;
        assert!(Level::from_json_str("bad", bad_kind).is_err());
    }

    #[test]
    fn out_of_range_is_solid() {
        let level = Level::from_ascii("t", &["..", ".."]).unwrap();
        assert_eq!(level.collision_kind(0, 0), CollisionKind::None);
        assert_eq!(level.collision_kind(-1, 0), CollisionKind::Full);
        assert_eq!(level.collision_kind(0, 2), CollisionKind::Full);
    }

    #[test]
    fn slope_ordering() {
        assert!(CollisionKind::SlopeRightTop.is_slope());
        assert!(CollisionKind::SlopeLeft.is_slope());
        assert!(!CollisionKind::Platform.is_slope());
        assert!(!CollisionKind::None.is_slope());
    }

    #[test]
    fn ascii_rows_map_to_kinds() {
        let level = Level::from_ascii("t", &["\\/lrLR", "#H=..."]).unwrap();
        assert_eq!(level.collision_kind(0, 0), CollisionKind::SlopeLeft);
        assert_eq!(level.collision_kind(5, 0), CollisionKind::SlopeRightTop);
        assert_eq!(level.collision_kind(1, 1), CollisionKind::Ladder);
        assert_eq!(level.collision_kind(2, 1), CollisionKind::Platform);
        assert!(Level::from_ascii("t", &["..", "."]).is_err());
    }

    #[test]
    fn tile_helpers() {
        assert_eq!(tile_of(15.9), 0);
        assert_eq!(tile_of(16.0), 1);
        assert_eq!(tile_of(-0.1), -1);
        assert_eq!(tile_center(2), 40.0);
    }
}
