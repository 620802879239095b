//! `tileworld_server`
//!
//! Server-side systems:
//! - Session transport (TCP tasks marshalled into the tick thread)
//! - Level storage and portal destination lookup
//! - Player spawn/despawn, position relay, level transfers
//! - Per-level Move batches every tick
//!
//! Networking model:
//! - One TCP stream per session carrying length-framed binary messages
//! - Clients only hear about entities in their own level

pub mod levels;
pub mod server;
pub mod transport;

pub use server::GameServer;
