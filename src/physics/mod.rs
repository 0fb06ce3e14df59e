//! Rigid-body physics capability consumed by the simulation.
//!
//! The room never talks to a concrete engine. Everything it needs is on
//! [`PhysicsWorld`]; [`simple::SimplePhysicsWorld`] is the deterministic
//! implementation used by tests, benches and the demo server.

pub mod simple;

use serde::{Deserialize, Serialize};

use crate::util::vec3::Vec3;

pub use simple::{GroundProfile, SimplePhysicsWorld};

/// Opaque handle to a body/collider pair owned by a [`PhysicsWorld`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Moved by velocities and impulses (cars)
    Dynamic,
    /// Solid static geometry, hit by rays
    Fixed,
    /// Static trigger volume: reports contacts, never blocks rays or bodies
    Sensor,
}

/// Body creation parameters. Colliders are axis-aligned boxes.
#[derive(Debug, Clone, Copy)]
pub struct BodyDesc {
    pub kind: BodyKind,
    /// Collider center
    pub translation: Vec3,
    pub half_extents: Vec3,
    pub mass: f32,
}

/// Ray query exclusions
#[derive(Debug, Clone, Copy, Default)]
pub struct RayFilter {
    pub exclude_sensors: bool,
    pub exclude_dynamic: bool,
    pub exclude_body: Option<BodyHandle>,
}

impl RayFilter {
    /// Static solid geometry only: what a ground probe should see
    pub fn ground_probe() -> Self {
        Self {
            exclude_sensors: true,
            exclude_dynamic: true,
            exclude_body: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// `None` when the ray hit terrain rather than a body
    pub body: Option<BodyHandle>,
    /// Distance along the (unit) ray direction
    pub toi: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionEvent {
    Started(BodyHandle, BodyHandle),
    Stopped(BodyHandle, BodyHandle),
}

/// Total contact force between two touching bodies during the last step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactForceEvent {
    pub a: BodyHandle,
    pub b: BodyHandle,
    pub total_force_magnitude: f32,
}

/// Physics errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PhysicsError {
    #[error("Invalid ground profile: {0}")]
    InvalidGroundProfile(String),
    #[error("Invalid body description: {0}")]
    InvalidBody(String),
}

/// Capability interface over a rigid-body engine.
///
/// Getters return `None` for handles that were never created or were removed.
/// Setters and impulses on unknown handles are ignored.
pub trait PhysicsWorld {
    fn create_body(&mut self, desc: BodyDesc) -> Result<BodyHandle, PhysicsError>;
    fn remove_body(&mut self, handle: BodyHandle);

    fn translation(&self, handle: BodyHandle) -> Option<Vec3>;
    fn set_translation(&mut self, handle: BodyHandle, translation: Vec3);
    fn linear_velocity(&self, handle: BodyHandle) -> Option<Vec3>;
    fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3);
    fn angular_velocity(&self, handle: BodyHandle) -> Option<Vec3>;
    fn set_angular_velocity(&mut self, handle: BodyHandle, velocity: Vec3);
    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3);

    /// Cast a ray with a unit `direction`, returning the closest hit within `max_toi`
    fn cast_ray(&self, origin: Vec3, direction: Vec3, max_toi: f32, filter: RayFilter) -> Option<RayHit>;

    fn step(&mut self, dt: f32);

    fn drain_collision_events(&mut self) -> Vec<CollisionEvent>;
    fn drain_contact_force_events(&mut self) -> Vec<ContactForceEvent>;
}
