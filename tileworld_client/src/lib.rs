//! `tileworld_client`
//!
//! Client-side systems:
//! - Connection management (TCP link polled once per tick)
//! - Input capture through key bindings
//! - Local platformer physics for the controlled character
//! - Interpolation of remote entities between server updates
//! - Level loading in the background
//! - Rendering abstraction wiring

pub mod animation;
pub mod assets;
pub mod client;
pub mod connection;
pub mod input;

pub use client::GameClient;
