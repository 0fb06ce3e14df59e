//! Deterministic reference physics world.
//!
//! Explicit Euler integration, axis-aligned box overlaps and rays against a
//! piecewise-linear ground profile. No gravity and no penetration response:
//! the simulation's ground model and bump resolver own both.

use std::collections::BTreeSet;

use crate::physics::{
    BodyDesc, BodyHandle, BodyKind, CollisionEvent, ContactForceEvent, PhysicsError, PhysicsWorld,
    RayFilter, RayHit,
};
use crate::util::vec3::Vec3;

/// Ground elevation as a function of Z, linear between points and flat past the ends.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundProfile {
    /// (z, elevation) pairs sorted by z
    points: Vec<(f32, f32)>,
}

impl GroundProfile {
    pub fn flat(elevation: f32) -> Self {
        Self {
            points: vec![(0.0, elevation)],
        }
    }

    pub fn new(points: Vec<(f32, f32)>) -> Result<Self, PhysicsError> {
        if points.is_empty() {
            return Err(PhysicsError::InvalidGroundProfile("no points".to_string()));
        }
        if points.iter().any(|(z, y)| !z.is_finite() || !y.is_finite()) {
            return Err(PhysicsError::InvalidGroundProfile("non-finite point".to_string()));
        }
        if points.windows(2).any(|w| w[1].0 < w[0].0) {
            return Err(PhysicsError::InvalidGroundProfile(
                "points must be sorted by z".to_string(),
            ));
        }
        Ok(Self { points })
    }

    pub fn height_at(&self, z: f32) -> f32 {
        let first = self.points[0];
        if z <= first.0 {
            return first.1;
        }
        for w in self.points.windows(2) {
            let (z0, y0) = w[0];
            let (z1, y1) = w[1];
            if z <= z1 {
                let span = z1 - z0;
                if span <= f32::EPSILON {
                    return y1;
                }
                return y0 + (y1 - y0) * ((z - z0) / span);
            }
        }
        self.points[self.points.len() - 1].1
    }
}

#[derive(Debug, Clone)]
struct Body {
    kind: BodyKind,
    translation: Vec3,
    half_extents: Vec3,
    mass: f32,
    linvel: Vec3,
    angvel: Vec3,
}

impl Body {
    fn overlaps(&self, other: &Body) -> bool {
        let d = self.translation - other.translation;
        d.x.abs() <= self.half_extents.x + other.half_extents.x
            && d.y.abs() <= self.half_extents.y + other.half_extents.y
            && d.z.abs() <= self.half_extents.z + other.half_extents.z
    }

    /// Slab test against this body's box. Returns entry distance.
    fn ray_toi(&self, origin: Vec3, dir: Vec3, max_toi: f32) -> Option<f32> {
        let min = self.translation - self.half_extents;
        let max = self.translation + self.half_extents;
        let mut t_near = 0.0_f32;
        let mut t_far = max_toi;
        for (o, d, lo, hi) in [
            (origin.x, dir.x, min.x, max.x),
            (origin.y, dir.y, min.y, max.y),
            (origin.z, dir.z, min.z, max.z),
        ] {
            if d.abs() < 1e-8 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let (mut t0, mut t1) = ((lo - o) / d, (hi - o) / d);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_near = t_near.max(t0);
            t_far = t_far.min(t1);
            if t_near > t_far {
                return None;
            }
        }
        Some(t_near)
    }
}

/// Reference [`PhysicsWorld`] with stable, handle-ordered iteration.
#[derive(Debug, Clone)]
pub struct SimplePhysicsWorld {
    bodies: Vec<Option<Body>>,
    ground: GroundProfile,
    touching: BTreeSet<(BodyHandle, BodyHandle)>,
    collision_events: Vec<CollisionEvent>,
    force_events: Vec<ContactForceEvent>,
}

impl SimplePhysicsWorld {
    pub fn new(ground: GroundProfile) -> Self {
        Self {
            bodies: Vec::new(),
            ground,
            touching: BTreeSet::new(),
            collision_events: Vec::new(),
            force_events: Vec::new(),
        }
    }

    pub fn flat(elevation: f32) -> Self {
        Self::new(GroundProfile::flat(elevation))
    }

    pub fn ground(&self) -> &GroundProfile {
        &self.ground
    }

    pub fn body_count(&self) -> usize {
        self.bodies.iter().filter(|b| b.is_some()).count()
    }

    fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(handle.0 as usize).and_then(|b| b.as_ref())
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut Body> {
        self.bodies.get_mut(handle.0 as usize).and_then(|b| b.as_mut())
    }

    fn detect_contacts(&mut self, dt: f32) {
        let mut now_touching = BTreeSet::new();

        for i in 0..self.bodies.len() {
            let Some(a) = &self.bodies[i] else { continue };
            for j in (i + 1)..self.bodies.len() {
                let Some(b) = &self.bodies[j] else { continue };
                if a.kind != BodyKind::Dynamic && b.kind != BodyKind::Dynamic {
                    continue;
                }
                if !a.overlaps(b) {
                    continue;
                }
                let pair = (BodyHandle(i as u32), BodyHandle(j as u32));
                now_touching.insert(pair);

                if a.kind == BodyKind::Dynamic && b.kind == BodyKind::Dynamic && dt > 0.0 {
                    let normal = (b.translation - a.translation).planar().normalize();
                    let closing = (a.linvel - b.linvel).planar().dot(normal).max(0.0);
                    let reduced_mass = (a.mass * b.mass) / (a.mass + b.mass);
                    let force = reduced_mass * closing / dt;
                    if force > 0.0 {
                        self.force_events.push(ContactForceEvent {
                            a: pair.0,
                            b: pair.1,
                            total_force_magnitude: force,
                        });
                    }
                }
            }
        }

        for pair in now_touching.difference(&self.touching) {
            self.collision_events.push(CollisionEvent::Started(pair.0, pair.1));
        }
        for pair in self.touching.difference(&now_touching) {
            self.collision_events.push(CollisionEvent::Stopped(pair.0, pair.1));
        }
        self.touching = now_touching;
    }
}

impl PhysicsWorld for SimplePhysicsWorld {
    fn create_body(&mut self, desc: BodyDesc) -> Result<BodyHandle, PhysicsError> {
        if !desc.translation.is_finite() || !desc.half_extents.is_finite() {
            return Err(PhysicsError::InvalidBody("non-finite geometry".to_string()));
        }
        if desc.half_extents.x <= 0.0 || desc.half_extents.y <= 0.0 || desc.half_extents.z <= 0.0 {
            return Err(PhysicsError::InvalidBody("half extents must be positive".to_string()));
        }
        if desc.kind == BodyKind::Dynamic && !(desc.mass > 0.0) {
            return Err(PhysicsError::InvalidBody("dynamic bodies need positive mass".to_string()));
        }

        let handle = BodyHandle(self.bodies.len() as u32);
        self.bodies.push(Some(Body {
            kind: desc.kind,
            translation: desc.translation,
            half_extents: desc.half_extents,
            mass: desc.mass,
            linvel: Vec3::ZERO,
            angvel: Vec3::ZERO,
        }));
        Ok(handle)
    }

    fn remove_body(&mut self, handle: BodyHandle) {
        if let Some(slot) = self.bodies.get_mut(handle.0 as usize) {
            *slot = None;
        }
        self.touching.retain(|(a, b)| *a != handle && *b != handle);
    }

    fn translation(&self, handle: BodyHandle) -> Option<Vec3> {
        self.body(handle).map(|b| b.translation)
    }

    fn set_translation(&mut self, handle: BodyHandle, translation: Vec3) {
        if let Some(body) = self.body_mut(handle) {
            body.translation = translation;
        }
    }

    fn linear_velocity(&self, handle: BodyHandle) -> Option<Vec3> {
        self.body(handle).map(|b| b.linvel)
    }

    fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3) {
        if let Some(body) = self.body_mut(handle) {
            body.linvel = velocity;
        }
    }

    fn angular_velocity(&self, handle: BodyHandle) -> Option<Vec3> {
        self.body(handle).map(|b| b.angvel)
    }

    fn set_angular_velocity(&mut self, handle: BodyHandle, velocity: Vec3) {
        if let Some(body) = self.body_mut(handle) {
            body.angvel = velocity;
        }
    }

    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3) {
        if let Some(body) = self.body_mut(handle) {
            if body.kind == BodyKind::Dynamic {
                body.linvel += impulse * (1.0 / body.mass);
            }
        }
    }

    fn cast_ray(&self, origin: Vec3, direction: Vec3, max_toi: f32, filter: RayFilter) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;

        // Terrain only answers straight-down probes
        if direction.y < 0.0 && direction.x.abs() < 1e-6 && direction.z.abs() < 1e-6 {
            let toi = (origin.y - self.ground.height_at(origin.z)) / -direction.y;
            if (0.0..=max_toi).contains(&toi) {
                best = Some(RayHit { body: None, toi });
            }
        }

        for (i, slot) in self.bodies.iter().enumerate() {
            let Some(body) = slot else { continue };
            let handle = BodyHandle(i as u32);
            if filter.exclude_body == Some(handle)
                || (filter.exclude_sensors && body.kind == BodyKind::Sensor)
                || (filter.exclude_dynamic && body.kind == BodyKind::Dynamic)
            {
                continue;
            }
            if let Some(toi) = body.ray_toi(origin, direction, max_toi) {
                if best.map_or(true, |b| toi < b.toi) {
                    best = Some(RayHit { body: Some(handle), toi });
                }
            }
        }

        best
    }

    fn step(&mut self, dt: f32) {
        for body in self.bodies.iter_mut().flatten() {
            if body.kind == BodyKind::Dynamic {
                body.translation += body.linvel * dt;
            }
        }
        self.detect_contacts(dt);
    }

    fn drain_collision_events(&mut self) -> Vec<CollisionEvent> {
        std::mem::take(&mut self.collision_events)
    }

    fn drain_contact_force_events(&mut self) -> Vec<ContactForceEvent> {
        std::mem::take(&mut self.force_events)
    }
}
