//! Drive-force model
//!
//! Turns controls and effect multipliers into impulses on the player's body.
//! Writes only to the physics body; the caller stores the returned speed.
//! Motion is read back after the physics step by the ground model.

use crate::config::DriveConfig;
use crate::game::catalog::VehicleClass;
use crate::game::effects::{combined_multipliers, Multipliers};
use crate::game::state::PlayerState;
use crate::game::systems::drift::DriftOutput;
use crate::net::protocol::ControlState;
use crate::physics::PhysicsWorld;
use crate::util::vec2::Vec2;
use crate::util::vec3::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveOutcome {
    /// New scalar forward speed
    pub speed: f32,
    /// Yaw rate written to the body (rad/s)
    pub yaw_rate: f32,
}

/// Move `value` toward zero by `amount` without crossing it
fn approach_zero(value: f32, amount: f32) -> f32 {
    if value > 0.0 {
        (value - amount).max(0.0)
    } else {
        (value + amount).min(0.0)
    }
}

/// Integrate scalar speed for one tick
pub fn integrate_speed(
    speed: f32,
    controls: &ControlState,
    vehicle: &VehicleClass,
    multipliers: Multipliers,
    config: &DriveConfig,
    dt: f32,
) -> f32 {
    let on_throttle = controls.throttle.abs() > config.throttle_deadzone;
    let mut speed = if on_throttle {
        speed + vehicle.acceleration * controls.throttle * dt
    } else {
        approach_zero(speed, vehicle.friction * dt)
    };

    if controls.handbrake {
        let decel = if on_throttle {
            config.handbrake_drift_decel
        } else {
            config.handbrake_decel
        };
        speed = approach_zero(speed, decel * dt);
    } else if controls.brake {
        speed = approach_zero(speed, config.brake_decel * dt);
    }

    let max_forward = vehicle.max_forward_speed * multipliers.movement;
    let max_reverse = vehicle.max_reverse_speed * multipliers.movement;
    speed.clamp(-max_reverse, max_forward)
}

/// Yaw rate for the current speed and steering. Airborne cars cannot steer.
pub fn yaw_rate(
    speed: f32,
    controls: &ControlState,
    grounded: bool,
    vehicle: &VehicleClass,
    multipliers: Multipliers,
    config: &DriveConfig,
) -> f32 {
    if !grounded
        || speed.abs() < vehicle.min_turn_speed
        || controls.steering.abs() < config.steering_deadzone
    {
        return 0.0;
    }
    controls.steering * vehicle.turn_speed * speed.signum() * multipliers.steering
}

/// Apply one tick of drive forces to the player's body
pub fn apply<P: PhysicsWorld>(
    world: &mut P,
    player: &PlayerState,
    drift: DriftOutput,
    config: &DriveConfig,
    dt: f32,
) -> DriveOutcome {
    let vehicle = &player.vehicle;
    let multipliers = combined_multipliers(&player.effects);
    let speed = integrate_speed(player.motion.speed, &player.controls, vehicle, multipliers, config, dt);
    let yaw_rate = yaw_rate(speed, &player.controls, player.grounded, vehicle, multipliers, config);

    let Some(velocity) = world.linear_velocity(player.body) else {
        return DriveOutcome { speed, yaw_rate };
    };
    world.set_angular_velocity(player.body, Vec3::new(0.0, yaw_rate, 0.0));

    let forward = player.motion.forward();
    let right = forward.perpendicular();
    let planar = velocity.planar();
    let mass = vehicle.mass;

    // Velocity change toward the desired speed, capped per tick
    let max_delta = vehicle.acceleration * multipliers.movement * dt * config.impulse_limit_factor;
    let delta = (speed - planar.dot(forward)).clamp(-max_delta, max_delta);

    // Tire grip: cancel lateral slide scaled by the drift state's friction
    let lateral = planar.dot(right) * drift.lateral_friction;

    let impulse: Vec2 = forward * (mass * delta + drift.boost_impulse) - right * (mass * lateral);
    world.apply_impulse(player.body, Vec3::from_planar(impulse, 0.0));

    DriveOutcome { speed, yaw_rate }
}
