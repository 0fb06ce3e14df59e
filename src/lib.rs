//! Slipstream Race Server Library
//!
//! Authoritative simulation for multiplayer arcade racing. Each room owns a
//! physics world, consumes buffered player inputs once per tick and produces
//! snapshots plus an ordered stream of race events.

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod physics;
pub mod metrics;
