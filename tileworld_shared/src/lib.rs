//! `tileworld_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic simulation: physics and sync run on one thread per tick.
//! - Clear separation of concerns (ecs, physics, wire protocol, levels).
//! - Traits at the seams (collision maps, rendering) for headless tests.
//! - No `unsafe`.

pub mod component;
pub mod config;
pub mod ecs;
pub mod input;
pub mod interp;
pub mod level;
pub mod math;
pub mod net;
pub mod physics;
pub mod protocol;
pub mod render;
pub mod runtime;
