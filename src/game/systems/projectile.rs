//! Homing projectile flight
//!
//! Turn-rate-limited pursuit: each tick the velocity rotates toward the
//! line of sight by at most `turn_rate * dt` and is renormalized, so speed
//! is constant for the whole flight. Without a live target the projectile
//! flies straight and can never hit.

use crate::config::CombatConfig;
use crate::game::state::{ActiveProjectile, EntityId, PlayerId, PlayerState};
use crate::util::vec2::Vec2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlightStep {
    Flying,
    Hit(PlayerId),
    Expired,
}

/// Pick the projectile target: the requested player when eligible,
/// otherwise the nearest eligible opponent.
pub fn select_target<'a>(
    owner_id: PlayerId,
    origin: Vec2,
    requested: Option<PlayerId>,
    players: impl Iterator<Item = &'a PlayerState>,
    now_ms: u64,
    config: &CombatConfig,
) -> Option<PlayerId> {
    let eligible = |p: &PlayerState| {
        p.id != owner_id && !p.progress.is_finished() && !p.is_hit_immune(now_ms, config.hit_immunity_ms)
    };

    let mut nearest: Option<(f32, PlayerId)> = None;
    for player in players {
        if !eligible(player) {
            continue;
        }
        if requested == Some(player.id) {
            return Some(player.id);
        }
        let distance_sq = origin.distance_sq_to(player.motion.planar_position());
        let closer = match nearest {
            None => true,
            Some((best, best_id)) => distance_sq < best || (distance_sq == best && player.id < best_id),
        };
        if closer {
            nearest = Some((distance_sq, player.id));
        }
    }
    nearest.map(|(_, id)| id)
}

/// Create a projectile leaving the owner's nose
pub fn launch(
    id: EntityId,
    owner: &PlayerState,
    target_id: Option<PlayerId>,
    stun_ms: u64,
    config: &CombatConfig,
) -> ActiveProjectile {
    let forward = owner.motion.forward();
    ActiveProjectile {
        id,
        owner_id: owner.id,
        target_id,
        position: owner.motion.planar_position() + forward * config.projectile_spawn_offset,
        velocity: forward * config.projectile_speed,
        ttl_ticks: config.projectile_ttl_ticks,
        stun_ms,
    }
}

/// Advance one projectile by one tick. `target_position` is `None` when the
/// projectile has no target or its target left the room.
pub fn step(
    projectile: &mut ActiveProjectile,
    target_position: Option<Vec2>,
    config: &CombatConfig,
    dt: f32,
) -> FlightStep {
    projectile.ttl_ticks = projectile.ttl_ticks.saturating_sub(1);
    if projectile.ttl_ticks == 0 {
        return FlightStep::Expired;
    }

    if let (Some(target_id), Some(target)) = (projectile.target_id, target_position) {
        let to_target = target - projectile.position;
        if to_target.length() <= config.projectile_hit_radius {
            return FlightStep::Hit(target_id);
        }
        let max_turn = config.projectile_turn_rate * dt;
        let turn = projectile.velocity.angle_to(to_target).clamp(-max_turn, max_turn);
        projectile.velocity = projectile.velocity.rotate(turn).normalize() * config.projectile_speed;
    }

    projectile.position += projectile.velocity * dt;
    FlightStep::Flying
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::Catalog;
    use crate::physics::BodyHandle;
    use uuid::Uuid;

    const DT: f32 = 1.0 / 30.0;

    fn projectile(target_id: Option<PlayerId>, config: &CombatConfig) -> ActiveProjectile {
        ActiveProjectile {
            id: 1,
            owner_id: Uuid::from_u128(1),
            target_id,
            position: Vec2::ZERO,
            velocity: Vec2::new(0.0, config.projectile_speed),
            ttl_ticks: config.projectile_ttl_ticks,
            stun_ms: 1000,
        }
    }

    fn player(n: u128, x: f32, z: f32) -> PlayerState {
        let vehicle = Catalog::builtin().unwrap().vehicle("sport").cloned().unwrap();
        let mut p = PlayerState::new(Uuid::from_u128(n), format!("p{}", n), vehicle, 0, BodyHandle(n as u32), 0);
        p.motion.position.x = x;
        p.motion.position.z = z;
        p
    }

    #[test]
    fn test_speed_is_constant_while_homing() {
        let config = CombatConfig::default();
        let mut p = projectile(Some(Uuid::from_u128(2)), &config);
        let mut target = Vec2::new(60.0, 20.0);

        for tick in 0..120 {
            // Target keeps moving sideways so guidance is always turning
            target = target + Vec2::new(-0.5, 0.3);
            match step(&mut p, Some(target), &config, DT) {
                FlightStep::Flying => {
                    assert!(
                        (p.velocity.length() - config.projectile_speed).abs() < 1e-3,
                        "tick {}: speed {}",
                        tick,
                        p.velocity.length()
                    );
                }
                _ => break,
            }
        }
    }

    #[test]
    fn test_turn_is_rate_limited() {
        let config = CombatConfig::default();
        let mut p = projectile(Some(Uuid::from_u128(2)), &config);
        // Target directly behind
        step(&mut p, Some(Vec2::new(0.0, -100.0)), &config, DT);
        let turned = Vec2::new(0.0, 1.0).angle_to(p.velocity).abs();
        assert!((turned - config.projectile_turn_rate * DT).abs() < 1e-4);
    }

    #[test]
    fn test_no_target_flies_straight_and_never_hits() {
        let config = CombatConfig::default();
        let mut p = projectile(None, &config);
        let mut ticks = 0;
        loop {
            match step(&mut p, Some(Vec2::new(0.0, 5.0)), &config, DT) {
                FlightStep::Flying => {
                    ticks += 1;
                    assert_eq!(p.position.x, 0.0);
                    assert_eq!(p.velocity, Vec2::new(0.0, config.projectile_speed));
                }
                FlightStep::Hit(_) => panic!("untargeted projectile hit"),
                FlightStep::Expired => break,
            }
        }
        assert_eq!(ticks, config.projectile_ttl_ticks - 1);
    }

    #[test]
    fn test_missing_target_flies_straight() {
        let config = CombatConfig::default();
        let mut p = projectile(Some(Uuid::from_u128(2)), &config);
        assert_eq!(step(&mut p, None, &config, DT), FlightStep::Flying);
        assert_eq!(p.velocity, Vec2::new(0.0, config.projectile_speed));
    }

    #[test]
    fn test_hit_inside_radius() {
        let config = CombatConfig::default();
        let target_id = Uuid::from_u128(2);
        let mut p = projectile(Some(target_id), &config);
        let result = step(&mut p, Some(Vec2::new(0.5, 1.0)), &config, DT);
        assert_eq!(result, FlightStep::Hit(target_id));
    }

    #[test]
    fn test_homing_reaches_target() {
        let config = CombatConfig::default();
        let target_id = Uuid::from_u128(2);
        let mut p = projectile(Some(target_id), &config);
        let target = Vec2::new(30.0, 40.0);
        let mut result = FlightStep::Flying;
        for _ in 0..config.projectile_ttl_ticks {
            result = step(&mut p, Some(target), &config, DT);
            if result != FlightStep::Flying {
                break;
            }
        }
        assert_eq!(result, FlightStep::Hit(target_id));
    }

    #[test]
    fn test_select_nearest_eligible() {
        let config = CombatConfig::default();
        let owner = player(1, 0.0, 0.0);
        let near = player(2, 0.0, 10.0);
        let mut immune = player(3, 0.0, 5.0);
        immune.last_hit_at_ms = Some(1000);
        let far = player(4, 0.0, 50.0);
        let players = [owner.clone(), near.clone(), immune, far];

        let target = select_target(owner.id, Vec2::ZERO, None, players.iter(), 2000, &config);
        assert_eq!(target, Some(near.id));
    }

    #[test]
    fn test_explicit_target_respected_unless_ineligible() {
        let config = CombatConfig::default();
        let owner = player(1, 0.0, 0.0);
        let near = player(2, 0.0, 10.0);
        let far = player(3, 0.0, 50.0);
        let players = [owner.clone(), near.clone(), far.clone()];

        let target = select_target(owner.id, Vec2::ZERO, Some(far.id), players.iter(), 0, &config);
        assert_eq!(target, Some(far.id));
        // Asking for yourself falls back to the nearest opponent
        let target = select_target(owner.id, Vec2::ZERO, Some(owner.id), players.iter(), 0, &config);
        assert_eq!(target, Some(near.id));
    }

    #[test]
    fn test_launch_from_nose() {
        let config = CombatConfig::default();
        let owner = player(1, 10.0, 20.0);
        let p = launch(7, &owner, None, 1200, &config);
        assert_eq!(p.position, Vec2::new(10.0, 20.0 + config.projectile_spawn_offset));
        assert!((p.velocity.length() - config.projectile_speed).abs() < 1e-5);
    }
}
