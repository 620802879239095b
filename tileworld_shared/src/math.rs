//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! Everything is `f32` in world pixels, +y pointing down.

use serde::{Deserialize, Serialize};

/// 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        Self::new(lerp(self.x, to.x, t), lerp(self.y, to.y, t))
    }
}

/// Linear blend between `a` and `b`. `t` is clamped to $[0,1]$.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    a + (b - a) * t
}

/// Sign of `v` as -1, 0 or 1. Unlike `f32::signum`, zero maps to zero.
pub fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Axis-aligned bounding box stored as center + half extents.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub center: Vec2,
    pub half: Vec2,
}

impl Aabb {
    pub const fn new(center: Vec2, half: Vec2) -> Self {
        Self { center, half }
    }

    /// Builds a box from its top-left corner and full size.
    pub fn from_rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        let half = Vec2::new(width / 2.0, height / 2.0);
        Self::new(Vec2::new(x + half.x, y + half.y), half)
    }

    /// Static overlap test against `other`.
    ///
    /// Returns the minimum translation vector that moves `self` out of
    /// `other`, or `None` when the boxes do not overlap. Touching edges
    /// do not count as overlap. The vector only ever has one non-zero axis.
    pub fn mtv(&self, other: &Aabb) -> Option<Vec2> {
        let dx = other.center.x - self.center.x;
        let px = other.half.x + self.half.x - dx.abs();
        let dy = other.center.y - self.center.y;
        let py = other.half.y + self.half.y - dy.abs();
        if px <= 0.0 || py <= 0.0 {
            return None;
        }

        if px < py {
            Some(Vec2::new(-px * sign(dx), 0.0))
        } else {
            Some(Vec2::new(0.0, -py * sign(dy)))
        }
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.mtv(other).is_some()
    }
}
