//! Tile platformer physics.
//!
//! Platformer movement (ladders, one-way platforms, slopes) does not fall out
//! of a generic rigid-body solver, so the behaviour is written down as an
//! explicit state machine over `CollisionState`:
//!
//! 1. horizontal velocity from input, friction and drag
//! 2. vertical velocity by state (gravity, jump, climb)
//! 3. ladder grab / dismount
//! 4. collision resolution for the state, against a tile-sized box at the
//!    prospective position
//! 5. world bounds clamp, then commit
//!
//! The step is total: given a level it never fails. Callers skip it while
//! the level is still loading.

use crate::{
    component::{CollisionState, RigidBody},
    input::{Buttons, InputState},
    level::{tile_center, tile_of, CollisionKind, CollisionMap, TILESIZE, TILESIZE_HALF, TILE_HALF_EXTENTS},
    math::{sign, Aabb, Vec2},
};

pub const GRAVITY: f32 = 0.69;
pub const TERMINAL_VELOCITY: f32 = GRAVITY * 10.0;

/// Physics parameters.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsConfig {
    pub gravity: f32,
    pub terminal_velocity: f32,
    /// Downward speed given when dropping through a platform, so the body
    /// clears it before the next collision pass.
    pub platform_drop_speed: f32,
    /// Downward nudge when grabbing a ladder from above.
    pub ladder_grab_nudge: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: GRAVITY,
            terminal_velocity: TERMINAL_VELOCITY,
            platform_drop_speed: 5.0,
            ladder_grab_nudge: 1.0,
        }
    }
}

/// Surface height of a slope tile.
///
/// `weight` is how far across the tile the sample point is, measured from
/// the right edge (0 at the right edge, 1 at the left edge). `slope_base` is
/// the center row of the tile: `TILESIZE_HALF + ty * TILESIZE`.
pub fn slope_surface_y(kind: CollisionKind, slope_base: f32, weight: f32) -> f32 {
    match kind {
        CollisionKind::SlopeLeft => slope_base - TILESIZE * weight,
        CollisionKind::SlopeRight => slope_base - TILESIZE * (1.0 - weight),
        CollisionKind::SlopeLeftBottom => slope_base - TILESIZE_HALF * weight,
        CollisionKind::SlopeRightBottom => slope_base - TILESIZE_HALF * (1.0 - weight),
        CollisionKind::SlopeLeftTop => slope_base - TILESIZE_HALF * weight - TILESIZE_HALF,
        CollisionKind::SlopeRightTop => {
            slope_base - TILESIZE_HALF * (1.0 - weight) - TILESIZE_HALF
        }
        _ => slope_base,
    }
}

fn slope_weight(tx: i32, world_x: f32) -> f32 {
    let tile_right_edge = TILESIZE + tx as f32 * TILESIZE;
    (tile_right_edge - world_x) / TILESIZE
}

fn slope_base(ty: i32) -> f32 {
    TILESIZE_HALF + ty as f32 * TILESIZE
}

fn tile_box(tx: i32, ty: i32) -> Aabb {
    Aabb::new(Vec2::new(tile_center(tx), tile_center(ty)), TILE_HALF_EXTENTS)
}

/// Pushes `entity` onto the slope surface of tile (tx, ty). Returns true when
/// the push was upwards, i.e. the entity landed.
fn slope_collision(tx: i32, ty: i32, world_x: f32, entity: &mut Aabb, kind: CollisionKind) -> bool {
    let surface = slope_surface_y(kind, slope_base(ty), slope_weight(tx, world_x));
    let tile = Aabb::new(Vec2::new(tile_center(tx), TILESIZE + surface), TILE_HALF_EXTENTS);
    match entity.mtv(&tile) {
        Some(mtv) => {
            entity.center.y += mtv.y;
            mtv.y < 0.0
        }
        None => false,
    }
}

/// The platformer state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct TilePhysics {
    pub cfg: PhysicsConfig,
}

impl TilePhysics {
    pub fn new(cfg: PhysicsConfig) -> Self {
        Self { cfg }
    }

    /// Advances `body` by one tick.
    pub fn step(&self, body: &mut RigidBody, input: &InputState, level: &dyn CollisionMap) {
        self.apply_horizontal(body, input);
        self.apply_vertical(body, input);

        // One box, moved to the prospective position and resolved in place.
        let mut entity = Aabb::new(body.position.current().add(body.velocity), TILE_HALF_EXTENTS);

        let center_wx = entity.center.x;
        let center_tx = tile_of(entity.center.x);
        let center_ty = tile_of(entity.center.y);

        self.climb(body, input, level, &mut entity, center_tx, center_ty);

        match body.cstate {
            CollisionState::Air => self.resolve_air(body, input, level, &mut entity, center_wx),
            CollisionState::Ground => {
                self.resolve_ground(body, input, level, &mut entity, center_wx, center_tx, center_ty)
            }
            CollisionState::Ladder => {
                Self::resolve_ladder(body, level, &mut entity, center_tx, center_ty)
            }
        }

        clamp_to_world(&mut entity, level.size());
        body.position.update(entity.center);
    }

    fn apply_horizontal(&self, body: &mut RigidBody, input: &InputState) {
        let tuning = *body.tuning();
        let direction = if body.cstate != CollisionState::Ladder {
            input.horizontal()
        } else {
            0.0
        };

        if direction != 0.0 {
            body.velocity.x = (body.velocity.x + tuning.acceleration * direction)
                .clamp(-tuning.max_speed, tuning.max_speed);
        } else {
            let direction = sign(body.velocity.x);
            let deceleration = if body.cstate == CollisionState::Air {
                tuning.drag
            } else {
                tuning.friction
            };
            let mut next = body.velocity.x - deceleration * direction;
            // Never overshoot past zero.
            if next * direction < 0.0 {
                next = 0.0;
            }
            body.velocity.x = next.clamp(-tuning.max_speed, tuning.max_speed);
        }
    }

    fn apply_vertical(&self, body: &mut RigidBody, input: &InputState) {
        let tuning = *body.tuning();
        match body.cstate {
            CollisionState::Air => {
                body.velocity.y = (body.velocity.y + self.cfg.gravity).min(self.cfg.terminal_velocity);
            }
            CollisionState::Ground => {
                body.velocity.y = 0.0;
                if input.is_pressed(Buttons::JUMP) {
                    body.cstate = CollisionState::Air;
                    body.velocity.y = -tuning.jump_speed;
                }
            }
            CollisionState::Ladder => {
                body.velocity.y = 0.0;
                if input.is_pressed(Buttons::UP) {
                    body.velocity.y -= tuning.ladder_speed;
                }
                if input.is_pressed(Buttons::DOWN) {
                    body.velocity.y += tuning.ladder_speed;
                }
            }
        }
    }

    fn climb(
        &self,
        body: &mut RigidBody,
        input: &InputState,
        level: &dyn CollisionMap,
        entity: &mut Aabb,
        center_tx: i32,
        center_ty: i32,
    ) {
        if body.cstate == CollisionState::Ladder {
            if input.is_pressed(Buttons::DISMOUNT) {
                body.cstate = CollisionState::Air;
            }
            return;
        }

        if input.is_pressed(Buttons::UP) {
            if level.collision_kind(center_tx, center_ty) == CollisionKind::Ladder {
                body.cstate = CollisionState::Ladder;
                entity.center.x = tile_center(center_tx);
                body.velocity.x = 0.0;
            }
        } else if input.is_pressed(Buttons::DOWN)
            && level.collision_kind(center_tx, center_ty + 1) == CollisionKind::Ladder
        {
            body.cstate = CollisionState::Ladder;
            entity.center.x = tile_center(center_tx);
            entity.center.y += self.cfg.ladder_grab_nudge;
            body.velocity.x = 0.0;
        }
    }

    fn resolve_air(
        &self,
        body: &mut RigidBody,
        input: &InputState,
        level: &dyn CollisionMap,
        entity: &mut Aabb,
        center_wx: f32,
    ) {
        let falling = body.position.previous().y < body.position.current().y;
        let dropping = input.is_pressed(Buttons::DOWN);
        let mut hit_ground = false;

        // Y axis first.
        let min_tx = tile_of(entity.center.x - TILESIZE_HALF);
        let max_tx = tile_of(entity.center.x + TILESIZE_HALF - 1.0);
        let min_ty = tile_of(entity.center.y - TILESIZE_HALF);
        let max_ty = tile_of(entity.center.y + TILESIZE_HALF - 1.0);
        for ty in min_ty..=max_ty {
            for tx in min_tx..=max_tx {
                let kind = level.collision_kind(tx, ty);
                match kind {
                    CollisionKind::None => {}
                    CollisionKind::Full => {
                        if let Some(mtv) = entity.mtv(&tile_box(tx, ty)) {
                            if mtv.y < 0.0 {
                                hit_ground = true;
                            }
                            entity.center.y += mtv.y;
                        }
                    }
                    // Only the topmost rung of a ladder is solid, and only from above.
                    CollisionKind::Ladder => {
                        if falling && level.collision_kind(tx, ty - 1) == CollisionKind::None {
                            hit_ground |= land_on(entity, tx, ty);
                        }
                    }
                    CollisionKind::Platform => {
                        if falling && !dropping {
                            hit_ground |= land_on(entity, tx, ty);
                        }
                    }
                    _ => {
                        hit_ground |= slope_collision(tx, ty, center_wx, entity, kind);
                    }
                }
            }
        }

        // X axis against solid tiles, using the settled Y range.
        let min_tx = tile_of(entity.center.x - TILESIZE_HALF);
        let max_tx = tile_of(entity.center.x + TILESIZE_HALF);
        let min_ty = tile_of(entity.center.y - TILESIZE_HALF);
        let max_ty = tile_of(entity.center.y + TILESIZE_HALF);
        for ty in min_ty..=max_ty {
            for tx in min_tx..=max_tx {
                if level.collision_kind(tx, ty) != CollisionKind::Full {
                    continue;
                }
                if let Some(mtv) = entity.mtv(&tile_box(tx, ty)) {
                    if mtv.x != 0.0 {
                        entity.center.x += mtv.x;
                    }
                }
            }
        }

        // An upward push alone is not enough: edge overlaps can produce one
        // while nothing is actually under the box.
        if hit_ground
            && level.collision_kind(tile_of(entity.center.x), tile_of(entity.center.y) + 1)
                != CollisionKind::None
        {
            body.cstate = CollisionState::Ground;
            body.velocity.y = 0.0;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_ground(
        &self,
        body: &mut RigidBody,
        input: &InputState,
        level: &dyn CollisionMap,
        entity: &mut Aabb,
        center_wx: f32,
        center_tx: i32,
        center_ty: i32,
    ) {
        let bottom_ty = tile_of(entity.center.y + TILESIZE_HALF - 1.0);
        let bottom = level.collision_kind(center_tx, bottom_ty);
        let below_ty = tile_of(entity.center.y + TILESIZE);
        let below = level.collision_kind(center_tx, below_ty);

        // On a slope, or about to step onto one: follow the surface, no X collision.
        if bottom.is_slope() {
            entity.center.y =
                slope_surface_y(bottom, slope_base(bottom_ty), slope_weight(center_tx, center_wx));
            return;
        }
        if below.is_slope() {
            entity.center.y = slope_surface_y(
                below,
                slope_base(below_ty),
                slope_weight(center_tx, entity.center.x),
            );
            return;
        }

        entity.center.y = tile_center(center_ty);

        let side = if body.velocity.x < 0.0 {
            Some(center_tx - 1)
        } else if body.velocity.x > 0.0 {
            Some(center_tx + 1)
        } else {
            None
        };
        if let Some(tx) = side {
            if level.collision_kind(tx, center_ty) == CollisionKind::Full {
                if let Some(mtv) = entity.mtv(&tile_box(tx, center_ty)) {
                    entity.center.x += mtv.x;
                }
            }
        }

        // Foot corners.
        let left = tile_of(entity.center.x - TILESIZE_HALF);
        let right = tile_of(entity.center.x + TILESIZE_HALF);
        let ground_ty = tile_of(entity.center.y) + 1;
        let under_left = level.collision_kind(left, ground_ty);
        let under_right = level.collision_kind(right, ground_ty);

        if under_left == CollisionKind::None && under_right == CollisionKind::None {
            body.cstate = CollisionState::Air;
        }
        if input.is_pressed(Buttons::DOWN)
            && under_left == CollisionKind::Platform
            && under_right == CollisionKind::Platform
        {
            body.cstate = CollisionState::Air;
            body.velocity.y = self.cfg.platform_drop_speed;
        }
    }

    fn resolve_ladder(
        body: &mut RigidBody,
        level: &dyn CollisionMap,
        entity: &mut Aabb,
        center_tx: i32,
        center_ty: i32,
    ) {
        if body.velocity.y < 0.0 {
            let ty = center_ty - 1;
            if level.collision_kind(center_tx, ty) == CollisionKind::Full {
                if let Some(mtv) = entity.mtv(&tile_box(center_tx, ty)) {
                    entity.center.y += mtv.y;
                }
            }

            // Top of the ladder: both edges of the box are in empty tiles.
            let top_ty = tile_of(entity.center.y - TILESIZE_HALF);
            let bottom_ty = tile_of(entity.center.y + TILESIZE_HALF);
            if level.collision_kind(center_tx, top_ty) == CollisionKind::None
                && level.collision_kind(center_tx, bottom_ty) == CollisionKind::None
            {
                entity.center.y = tile_center(bottom_ty);
                body.cstate = CollisionState::Ground;
            }
        } else if body.velocity.y > 0.0 {
            let below = level.collision_kind(center_tx, center_ty + 1);
            if below == CollisionKind::Full {
                if let Some(mtv) = entity.mtv(&tile_box(center_tx, center_ty + 1)) {
                    entity.center.y += mtv.y;
                    body.cstate = CollisionState::Ground;
                }
            } else if below == CollisionKind::None
                && level.collision_kind(center_tx, center_ty) == CollisionKind::None
            {
                // Climbed off the bottom.
                body.cstate = CollisionState::Air;
            }
        }
    }
}

/// Lands `entity` on top of tile (tx, ty) if it overlaps from above.
fn land_on(entity: &mut Aabb, tx: i32, ty: i32) -> bool {
    match entity.mtv(&tile_box(tx, ty)) {
        Some(mtv) if mtv.y < 0.0 => {
            entity.center.y += mtv.y;
            true
        }
        _ => false,
    }
}

fn clamp_to_world(entity: &mut Aabb, size: Vec2) {
    if entity.center.x - TILESIZE_HALF < 0.0 {
        entity.center.x = TILESIZE_HALF;
    } else if entity.center.x + TILESIZE_HALF > size.x {
        entity.center.x = size.x - TILESIZE_HALF;
    }
    if entity.center.y - TILESIZE_HALF < 0.0 {
        entity.center.y = TILESIZE_HALF;
    } else if entity.center.y + TILESIZE_HALF > size.y {
        entity.center.y = size.y - TILESIZE_HALF;
    }
}
