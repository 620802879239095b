//! Components shared by client and server.

use serde::{Deserialize, Serialize};

use crate::{
    ecs::Component,
    interp::{interpolated_vec2, Interpolated},
    math::{lerp, Vec2},
};

/// Which set of movement rules applies to a body this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CollisionState {
    #[default]
    Air = 0,
    Ground = 1,
    Ladder = 2,
}

impl CollisionState {
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Air),
            1 => Some(Self::Ground),
            2 => Some(Self::Ladder),
            _ => None,
        }
    }
}

/// Position, rotation (radians) and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
}

impl Default for Transform {
    fn default() -> Self {
        Self::at(Vec2::ZERO)
    }
}

impl Transform {
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            rotation: 0.0,
            scale: Vec2::new(1.0, 1.0),
        }
    }

    /// Component-wise linear blend.
    ///
    /// Rotation is blended linearly as well, not along the shortest arc, so
    /// 350° -> 10° sweeps backwards through 180°.
    pub fn lerp(a: &Transform, b: &Transform, weight: f32) -> Transform {
        Transform {
            position: a.position.lerp(b.position, weight),
            rotation: lerp(a.rotation, b.rotation, weight),
            scale: a.scale.lerp(b.scale, weight),
        }
    }
}

/// Network-visible transform of any entity.
///
/// This is the only state the server broadcasts. Remote entities on a client
/// are driven entirely by it; their collision state is copied, never derived.
#[derive(Debug, Clone)]
pub struct NetTransform {
    pub transform: Interpolated<Transform>,
    pub level: String,
    pub cstate: CollisionState,
}

impl Component for NetTransform {}

impl NetTransform {
    pub fn new(level: impl Into<String>, position: Vec2) -> Self {
        Self {
            transform: Interpolated::new(Transform::at(position), Transform::lerp),
            level: level.into(),
            cstate: CollisionState::Ground,
        }
    }

    pub fn position(&self) -> Vec2 {
        self.transform.current().position
    }

    pub fn previous_position(&self) -> Vec2 {
        self.transform.previous().position
    }

    pub fn update(&mut self, transform: Transform) {
        self.transform.update(transform);
    }

    /// Commits a new position, keeping rotation and scale.
    pub fn update_position(&mut self, position: Vec2) {
        let next = Transform {
            position,
            ..*self.transform.current()
        };
        self.transform.update(next);
    }

    pub fn reset_position(&mut self, position: Vec2) {
        let next = Transform {
            position,
            ..*self.transform.current()
        };
        self.transform.reset(next);
    }

    pub fn moved(&self) -> bool {
        self.position() != self.previous_position()
    }

    pub fn get(&self, weight: f32) -> Transform {
        self.transform.get(weight)
    }
}

/// Movement constants for a `RigidBody`. Units are pixels per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyTuning {
    pub acceleration: f32,
    pub friction: f32,
    pub drag: f32,
    pub max_speed: f32,
    pub jump_speed: f32,
    pub ladder_speed: f32,
}

impl Default for BodyTuning {
    fn default() -> Self {
        Self {
            acceleration: 0.9,
            friction: 1.9,
            drag: 0.3,
            max_speed: 3.5,
            jump_speed: 9.0,
            ladder_speed: 3.0,
        }
    }
}

/// Locally simulated body of the controlled character.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub position: Interpolated<Vec2>,
    pub velocity: Vec2,
    pub cstate: CollisionState,
    tuning: BodyTuning,
}

impl Component for RigidBody {}

impl RigidBody {
    pub fn new(position: Vec2) -> Self {
        Self::with_tuning(position, BodyTuning::default())
    }

    pub fn with_tuning(position: Vec2, tuning: BodyTuning) -> Self {
        Self {
            position: interpolated_vec2(position),
            velocity: Vec2::ZERO,
            cstate: CollisionState::Air,
            tuning,
        }
    }

    pub fn tuning(&self) -> &BodyTuning {
        &self.tuning
    }

    /// Teleports the body and drops it into the air at rest.
    pub fn reset(&mut self, position: Vec2) {
        self.position.reset(position);
        self.velocity = Vec2::ZERO;
        self.cstate = CollisionState::Air;
    }
}

/// Tag: humanoid player character (local or remote).
#[derive(Debug, Clone, Copy, Default)]
pub struct Player;

impl Component for Player {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_state_wire_values() {
        for s in [CollisionState::Air, CollisionState::Ground, CollisionState::Ladder] {
            assert_eq!(CollisionState::from_wire(s.to_wire()), Some(s));
        }
        assert_eq!(CollisionState::from_wire(3), None);
    }

    #[test]
    fn transform_lerp_is_linear_in_rotation() {
        let a = Transform {
            rotation: 350f32.to_radians(),
            ..Transform::default()
        };
        let b = Transform {
            rotation: 10f32.to_radians(),
            ..Transform::default()
        };
        let mid = Transform::lerp(&a, &b, 0.5);
        assert!((mid.rotation - 180f32.to_radians()).abs() < 1e-5);
    }

    #[test]
    fn net_transform_tracks_movement() {
        let mut t = NetTransform::new("test", Vec2::new(1.0, 2.0));
        assert!(!t.moved());
        t.update_position(Vec2::new(3.0, 2.0));
        assert!(t.moved());
        assert_eq!(t.previous_position(), Vec2::new(1.0, 2.0));
        assert_eq!(t.get(1.0).position, Vec2::new(3.0, 2.0));
        t.reset_position(Vec2::new(0.0, 0.0));
        assert!(!t.moved());
    }

    #[test]
    fn rigid_body_reset_drops_velocity() {
        let mut body = RigidBody::new(Vec2::new(5.0, 5.0));
        body.velocity = Vec2::new(2.0, -3.0);
        body.cstate = CollisionState::Ladder;
        body.reset(Vec2::new(40.0, 8.0));
        assert_eq!(body.velocity, Vec2::ZERO);
        assert_eq!(body.cstate, CollisionState::Air);
        assert_eq!(*body.position.previous(), Vec2::new(40.0, 8.0));
    }
}
