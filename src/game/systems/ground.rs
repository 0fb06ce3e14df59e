//! Position sync and ground contact
//!
//! One call per player per tick, after the physics step:
//!   1. read translation, velocity and yaw rate back from the body
//!   2. probe for ground under the collider and snap to it, or fall
//!
//! Step 2 overwrites the rendered height written by step 1, which is why
//! the two are never exposed separately.

use crate::config::GroundConfig;
use crate::game::state::PlayerState;
use crate::physics::{PhysicsWorld, RayFilter};
use crate::util::vec3::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundContact {
    pub grounded: bool,
    /// Airborne cars get no steering from the drive model
    pub steering_suppressed: bool,
    /// Surface elevation under the car when grounded
    pub ground_y: Option<f32>,
}

impl GroundContact {
    fn airborne() -> Self {
        Self {
            grounded: false,
            steering_suppressed: true,
            ground_y: None,
        }
    }
}

/// Distance from `origin_y` down to the ground, if within the probe.
/// `flat_elevation` skips the engine raycast on courses with no elevation change.
fn probe_ground<P: PhysicsWorld>(
    world: &P,
    origin: Vec3,
    flat_elevation: Option<f32>,
    config: &GroundConfig,
) -> Option<f32> {
    match flat_elevation {
        Some(elevation) => {
            let toi = origin.y - elevation;
            (0.0..=config.probe_distance).contains(&toi).then_some(toi)
        }
        None => world
            .cast_ray(origin, Vec3::DOWN, config.probe_distance, RayFilter::ground_probe())
            .map(|hit| hit.toi),
    }
}

/// Sync the player's motion from physics, then apply ground contact
pub fn sync_and_ground<P: PhysicsWorld>(
    world: &mut P,
    player: &mut PlayerState,
    flat_elevation: Option<f32>,
    config: &GroundConfig,
    dt: f32,
) -> GroundContact {
    let body = player.body;
    let half_height = player.vehicle.half_height;

    let (Some(center), Some(mut velocity)) = (world.translation(body), world.linear_velocity(body)) else {
        return GroundContact::airborne();
    };
    let yaw_rate = world.angular_velocity(body).map_or(0.0, |w| w.y);

    // Step 1: sync
    player.motion.position = Vec3::new(center.x, center.y - half_height, center.z);
    player.motion.rotation_y = wrap_angle(player.motion.rotation_y + yaw_rate * dt);

    // Step 2: ground
    let origin = Vec3::new(center.x, center.y + config.probe_lift, center.z);
    let contact = match probe_ground(world, origin, flat_elevation, config) {
        Some(toi) => {
            let ground_y = origin.y - toi;
            if velocity.y < 0.0 {
                velocity.y = 0.0;
            } else if velocity.y > 0.0 {
                velocity.y *= config.bounce_damping;
            }
            world.set_translation(body, Vec3::new(center.x, ground_y + half_height, center.z));
            player.motion.position.y = ground_y;
            GroundContact {
                grounded: true,
                steering_suppressed: false,
                ground_y: Some(ground_y),
            }
        }
        None => {
            velocity.y = (velocity.y - config.gravity * dt).max(-config.max_fall_speed);
            GroundContact::airborne()
        }
    };
    world.set_linear_velocity(body, velocity);
    player.grounded = contact.grounded;
    contact
}

fn wrap_angle(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    (angle + PI).rem_euclid(TAU) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::Catalog;
    use crate::physics::{BodyDesc, BodyKind, GroundProfile, SimplePhysicsWorld};
    use uuid::Uuid;

    const DT: f32 = 1.0 / 30.0;

    fn player_at(world: &mut SimplePhysicsWorld, center: Vec3) -> PlayerState {
        let vehicle = Catalog::builtin().unwrap().vehicle("balanced").cloned().unwrap();
        let body = world
            .create_body(BodyDesc {
                kind: BodyKind::Dynamic,
                translation: center,
                half_extents: Vec3::new(vehicle.half_width, vehicle.half_height, vehicle.half_length),
                mass: vehicle.mass,
            })
            .unwrap();
        PlayerState::new(Uuid::from_u128(1), "p".into(), vehicle, 0, body, 0)
    }

    #[test]
    fn test_grounded_car_snaps_and_stops_falling() {
        let mut world = SimplePhysicsWorld::flat(0.0);
        let mut player = player_at(&mut world, Vec3::new(0.0, 1.0, 10.0));
        world.set_linear_velocity(player.body, Vec3::new(0.0, -4.0, 20.0));

        let contact = sync_and_ground(&mut world, &mut player, None, &GroundConfig::default(), DT);
        assert!(contact.grounded);
        assert!(!contact.steering_suppressed);
        assert_eq!(player.motion.position.y, 0.0);
        assert_eq!(player.motion.position.z, 10.0);

        let center = world.translation(player.body).unwrap();
        assert!((center.y - player.vehicle.half_height).abs() < 1e-5);
        let v = world.linear_velocity(player.body).unwrap();
        assert_eq!(v.y, 0.0);
        assert_eq!(v.z, 20.0);
    }

    #[test]
    fn test_upward_velocity_damped() {
        let config = GroundConfig::default();
        let mut world = SimplePhysicsWorld::flat(0.0);
        let mut player = player_at(&mut world, Vec3::new(0.0, 0.7, 0.0));
        world.set_linear_velocity(player.body, Vec3::new(0.0, 2.0, 0.0));

        sync_and_ground(&mut world, &mut player, None, &config, DT);
        let v = world.linear_velocity(player.body).unwrap();
        assert!((v.y - 2.0 * config.bounce_damping).abs() < 1e-6);
    }

    #[test]
    fn test_airborne_integrates_gravity_and_clamps() {
        let config = GroundConfig::default();
        let mut world = SimplePhysicsWorld::flat(0.0);
        let mut player = player_at(&mut world, Vec3::new(0.0, 20.0, 0.0));

        let contact = sync_and_ground(&mut world, &mut player, None, &config, DT);
        assert!(!contact.grounded);
        assert!(contact.steering_suppressed);
        assert!(!player.grounded);
        let v = world.linear_velocity(player.body).unwrap();
        assert!((v.y + config.gravity * DT).abs() < 1e-5);

        world.set_linear_velocity(player.body, Vec3::new(0.0, -config.max_fall_speed, 0.0));
        sync_and_ground(&mut world, &mut player, None, &config, DT);
        assert_eq!(world.linear_velocity(player.body).unwrap().y, -config.max_fall_speed);
    }

    #[test]
    fn test_flat_fast_path_matches_raycast() {
        let config = GroundConfig::default();
        for (elevation, height) in [(0.0, 0.8), (3.5, 4.1), (0.0, 2.9), (-2.0, 5.0), (0.0, 0.2)] {
            let mut ray_world = SimplePhysicsWorld::flat(elevation);
            let mut fast_world = SimplePhysicsWorld::flat(elevation);
            let mut ray_player = player_at(&mut ray_world, Vec3::new(1.0, height, 7.0));
            let mut fast_player = player_at(&mut fast_world, Vec3::new(1.0, height, 7.0));

            let ray = sync_and_ground(&mut ray_world, &mut ray_player, None, &config, DT);
            let fast = sync_and_ground(&mut fast_world, &mut fast_player, Some(elevation), &config, DT);

            assert_eq!(ray, fast, "elevation {} height {}", elevation, height);
            assert_eq!(ray_player.motion.position, fast_player.motion.position);
            assert_eq!(
                ray_world.translation(ray_player.body),
                fast_world.translation(fast_player.body)
            );
        }
    }

    #[test]
    fn test_follows_slope() {
        let profile = GroundProfile::new(vec![(0.0, 0.0), (100.0, 10.0)]).unwrap();
        let mut world = SimplePhysicsWorld::new(profile);
        let mut player = player_at(&mut world, Vec3::new(0.0, 5.5, 50.0));

        let contact = sync_and_ground(&mut world, &mut player, None, &GroundConfig::default(), DT);
        assert_eq!(contact.ground_y, Some(5.0));
        assert!((player.motion.position.y - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_yaw_integrates_and_wraps() {
        let mut world = SimplePhysicsWorld::flat(0.0);
        let mut player = player_at(&mut world, Vec3::new(0.0, 0.7, 0.0));
        player.motion.rotation_y = 3.1;
        world.set_angular_velocity(player.body, Vec3::new(0.0, 3.0, 0.0));

        sync_and_ground(&mut world, &mut player, None, &GroundConfig::default(), DT);
        assert!(player.motion.rotation_y < 0.0);
        assert!((player.motion.rotation_y - (3.2 - std::f32::consts::TAU)).abs() < 1e-4);
    }
}
