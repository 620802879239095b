//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! Define traits that a renderer implementation would satisfy.

use crate::math::Vec2;

/// One sprite draw call. `frame` indexes into the named animation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteDraw<'a> {
    pub sheet: &'a str,
    pub animation: &'a str,
    pub frame: u32,
    pub position: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
    /// Mirror horizontally (facing left).
    pub flip_x: bool,
}

/// A minimal rendering API.
pub trait RenderBackend: Send + Sync {
    fn begin_frame(&mut self);
    /// World position at the center of the screen.
    fn set_camera(&mut self, center: Vec2);
    fn draw_sprite(&mut self, sprite: &SpriteDraw<'_>);
    fn end_frame(&mut self);
}

/// A no-op renderer useful for headless tests.
#[derive(Default)]
pub struct NullRenderer;

impl RenderBackend for NullRenderer {
    fn begin_frame(&mut self) {}
    fn set_camera(&mut self, _center: Vec2) {}
    fn draw_sprite(&mut self, _sprite: &SpriteDraw<'_>) {}
    fn end_frame(&mut self) {}
}
