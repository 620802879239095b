//! Humanoid sprite animation.

use tileworld_shared::{component::CollisionState, ecs::Component, level::Facing, math::Vec2};
use tracing::trace;

/// Ticks each animation frame stays on screen.
pub const TICKS_PER_FRAME: u32 = 6;

/// Horizontal movement below this many pixels per tick counts as standing.
const MOVE_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Animation {
    #[default]
    Idle,
    Walk,
    Jump,
}

impl Animation {
    pub fn name(self) -> &'static str {
        match self {
            Animation::Idle => "Idle",
            Animation::Walk => "Walk",
            Animation::Jump => "Jump",
        }
    }
}

/// Drawable humanoid state.
#[derive(Debug, Clone)]
pub struct Sprite {
    pub sheet: String,
    pub animation: Animation,
    pub frame: u32,
    pub direction: Facing,
    pub moving: bool,
    pub jumping: bool,
    ticks: u32,
}

impl Component for Sprite {
    fn free(&mut self) {
        trace!(sheet = %self.sheet, "sprite released");
        self.sheet.clear();
    }
}

impl Sprite {
    pub fn new(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            animation: Animation::Idle,
            frame: 0,
            direction: Facing::Right,
            moving: false,
            jumping: false,
            ticks: 0,
        }
    }

    fn play(&mut self, animation: Animation) {
        if self.animation != animation {
            self.animation = animation;
            self.ticks = 0;
        } else {
            self.ticks = self.ticks.wrapping_add(1);
        }
        self.frame = self.ticks / TICKS_PER_FRAME;
    }
}

/// Derives direction, movement flags and the animation from one tick of
/// motion and the collision state. Anything off the ground, ladders
/// included, plays Jump.
pub fn animate_humanoid(sprite: &mut Sprite, delta: Vec2, cstate: CollisionState) {
    sprite.moving = delta.x.abs() > MOVE_EPSILON;
    if delta.x < -MOVE_EPSILON {
        sprite.direction = Facing::Left;
    } else if delta.x > MOVE_EPSILON {
        sprite.direction = Facing::Right;
    }
    sprite.jumping = delta.y != 0.0;

    let animation = if cstate != CollisionState::Ground {
        Animation::Jump
    } else if sprite.moving {
        Animation::Walk
    } else {
        Animation::Idle
    };
    sprite.play(animation);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_animation_from_motion_and_state() {
        let mut sprite = Sprite::new("player");
        animate_humanoid(&mut sprite, Vec2::new(2.0, 0.0), CollisionState::Ground);
        assert_eq!(sprite.animation, Animation::Walk);
        assert_eq!(sprite.direction, Facing::Right);
        assert!(!sprite.jumping);

        animate_humanoid(&mut sprite, Vec2::new(-1.0, -3.0), CollisionState::Air);
        assert_eq!(sprite.animation, Animation::Jump);
        assert_eq!(sprite.direction, Facing::Left);
        assert!(sprite.jumping);

        // Standing still keeps the last direction.
        animate_humanoid(&mut sprite, Vec2::ZERO, CollisionState::Ground);
        assert_eq!(sprite.animation, Animation::Idle);
        assert_eq!(sprite.direction, Facing::Left);
        assert!(!sprite.moving);
    }

    #[test]
    fn climbing_plays_jump_and_vertical_motion_sets_jumping() {
        let mut sprite = Sprite::new("player");
        animate_humanoid(&mut sprite, Vec2::new(0.0, -1.5), CollisionState::Ladder);
        assert_eq!(sprite.animation, Animation::Jump);
        assert!(sprite.jumping);
        assert!(!sprite.moving);

        // Hanging still on a ladder is still off the ground.
        animate_humanoid(&mut sprite, Vec2::ZERO, CollisionState::Ladder);
        assert_eq!(sprite.animation, Animation::Jump);
        assert!(!sprite.jumping);

        // The apex of a jump has no vertical motion but is still in the air.
        animate_humanoid(&mut sprite, Vec2::new(1.0, 0.0), CollisionState::Air);
        assert_eq!(sprite.animation, Animation::Jump);
        assert!(!sprite.jumping);
        assert!(sprite.moving);
    }

    #[test]
    fn frames_advance_and_restart_on_change() {
        let mut sprite = Sprite::new("player");
        for _ in 0..=TICKS_PER_FRAME {
            animate_humanoid(&mut sprite, Vec2::new(1.0, 0.0), CollisionState::Ground);
        }
        assert_eq!(sprite.animation, Animation::Walk);
        assert_eq!(sprite.frame, 1);

        animate_humanoid(&mut sprite, Vec2::ZERO, CollisionState::Ladder);
        assert_eq!(sprite.animation, Animation::Jump);
        assert_eq!(sprite.frame, 0);
    }
}
