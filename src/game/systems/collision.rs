//! Car-vs-car bump resolution and obstacle stuns
//!
//! Bumps are resolved with a reduced-mass impulse model. The lower-momentum
//! car is the victim and takes the full impulse; the rammer only gets the
//! arcade-bias share, so heavy cars barely recoil. Pre-impact planar
//! velocities are replaced by the response, which is damped and clamped so
//! no input can produce an explosive result.
//!
//! Each unordered pair resolves at most once per cooldown window. A pair
//! that touches again inside the window is parked as pending and resolved
//! when the window ends if the cars are still touching.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::CollisionConfig;
use crate::game::effects::{apply_effect, EffectSpec, StatusEffectKind};
use crate::game::state::{FxMap, PlayerId, PlayerState};
use crate::game::systems::drift;
use crate::physics::PhysicsWorld;
use crate::util::vec2::Vec2;
use crate::util::vec3::Vec3;

/// Unordered player pair, smaller id first
pub type PairKey = (PlayerId, PlayerId);

pub fn pair_key(a: PlayerId, b: PlayerId) -> PairKey {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// One side of a bump as seen at impact
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BumpBody {
    pub id: PlayerId,
    pub mass: f32,
    /// Scalar forward speed
    pub speed: f32,
    pub position: Vec2,
    pub forward: Vec2,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl BumpBody {
    fn momentum(&self) -> f32 {
        self.mass * self.speed.abs()
    }
}

/// Post-bump body state for both sides
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BumpResponse {
    pub rammer: PlayerId,
    pub victim: PlayerId,
    pub impact_speed: f32,
    pub rammer_impulse: Vec2,
    pub victim_impulse: Vec2,
    pub rammer_velocity: Vec3,
    pub victim_velocity: Vec3,
    pub rammer_angular_velocity: Vec3,
    pub victim_angular_velocity: Vec3,
}

/// Resolved bump, ready to become a `collision_bump` event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BumpOutcome {
    pub rammer: PlayerId,
    pub victim: PlayerId,
    pub flipped: bool,
    pub stunned: bool,
    pub drive_lock_ms: u64,
    pub impact_speed: f32,
}

/// (rammer, victim): higher momentum rams, ties go to the faster car,
/// then to the smaller id
pub fn select_roles<'a>(a: &'a BumpBody, b: &'a BumpBody) -> (&'a BumpBody, &'a BumpBody) {
    let a_rams = match a.momentum().total_cmp(&b.momentum()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => match a.speed.abs().total_cmp(&b.speed.abs()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => a.id < b.id,
        },
    };
    if a_rams {
        (a, b)
    } else {
        (b, a)
    }
}

fn settle_velocity(velocity: Vec3, impulse: Vec2, mass: f32, config: &CollisionConfig) -> Vec3 {
    let planar = (impulse * (1.0 / mass) * config.post_bump_damping).clamp_length(config.max_post_bump_speed);
    Vec3::from_planar(planar, velocity.y)
}

fn settle_angular(angular: Vec3, config: &CollisionConfig) -> Vec3 {
    let limit = config.max_post_bump_angular_speed;
    let damped = angular * config.angular_damping;
    Vec3::new(
        damped.x.clamp(-limit, limit),
        damped.y.clamp(-limit, limit),
        damped.z.clamp(-limit, limit),
    )
}

/// Compute the bump response, or `None` when neither car was fast enough
pub fn compute_bump(
    a: &BumpBody,
    b: &BumpBody,
    contact_force: Option<f32>,
    config: &CollisionConfig,
) -> Option<BumpResponse> {
    let impact_speed = a.speed.abs().max(b.speed.abs());
    if !(impact_speed >= config.min_impact_speed) {
        return None;
    }

    let (rammer, victim) = select_roles(a, b);
    let total_mass = rammer.mass + victim.mass;
    let reduced_mass = rammer.mass * victim.mass / total_mass;

    let speed_factor = (impact_speed / config.speed_scale_ceiling).clamp(config.min_speed_scale, 1.0);
    let force_scale = contact_force
        .filter(|f| !f.is_nan())
        .map_or(1.0, |f| (f / config.contact_force_base).clamp(1.0, config.max_force_scale));
    let base = reduced_mass * config.base_delta_v * speed_factor * force_scale;

    // Each side scaled by the other's share of the mass
    let victim_magnitude = base * (2.0 * rammer.mass / total_mass);
    let rammer_magnitude = base * (2.0 * victim.mass / total_mass) * config.arcade_bias;

    let offset = victim.position - rammer.position;
    let normal = if offset.length_sq() > 1e-8 {
        offset.normalize()
    } else {
        rammer.forward.normalize()
    };
    let side = if rammer.id < victim.id { 1.0 } else { -1.0 };
    let lateral = normal.perpendicular() * side;

    let victim_impulse = (normal * victim_magnitude + lateral * (victim_magnitude * config.lateral_fraction))
        .clamp_length(config.max_impulse);
    let rammer_impulse = (-normal * rammer_magnitude - lateral * (rammer_magnitude * config.lateral_fraction))
        .clamp_length(config.max_impulse);

    Some(BumpResponse {
        rammer: rammer.id,
        victim: victim.id,
        impact_speed,
        rammer_impulse,
        victim_impulse,
        rammer_velocity: settle_velocity(rammer.velocity, rammer_impulse, rammer.mass, config),
        victim_velocity: settle_velocity(victim.velocity, victim_impulse, victim.mass, config),
        rammer_angular_velocity: settle_angular(rammer.angular_velocity, config),
        victim_angular_velocity: settle_angular(victim.angular_velocity, config),
    })
}

/// (flip, stun) for the victim. Both need the rammer to carry enough mass.
/// Flip also waits out the victim's flip cooldown; stun needs a big impact.
pub fn gate_secondary_effects(
    rammer_mass: f32,
    victim_mass: f32,
    impact_speed: f32,
    flip_ready: bool,
    config: &CollisionConfig,
) -> (bool, bool) {
    let heavy_enough = rammer_mass >= config.flip_mass_ratio * victim_mass;
    let flipped = heavy_enough && flip_ready;
    let stunned = heavy_enough && impact_speed > config.big_impact_speed;
    (flipped, stunned)
}

/// Per-room collision bookkeeping
#[derive(Debug, Default)]
pub struct CollisionManager {
    /// Pair -> time of last resolved bump
    pair_last_bump: FxMap<PairKey, u64>,
    touching: BTreeSet<PairKey>,
    pending: BTreeSet<PairKey>,
    flip_cooldown_until: FxMap<PlayerId, u64>,
    drive_lock_until: FxMap<PlayerId, u64>,
    obstacle_cooldown_until: FxMap<PlayerId, u64>,
}

impl CollisionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_cooldown(&self, key: PairKey, now_ms: u64, config: &CollisionConfig) -> bool {
        self.pair_last_bump
            .get(&key)
            .is_some_and(|t| now_ms < t.saturating_add(config.pair_cooldown_ms))
    }

    /// Record a new contact. Returns true when the pair should resolve now;
    /// otherwise the pair is parked until its cooldown expires.
    pub fn contact_started(&mut self, key: PairKey, now_ms: u64, config: &CollisionConfig) -> bool {
        self.touching.insert(key);
        if self.in_cooldown(key, now_ms, config) {
            self.pending.insert(key);
            false
        } else {
            true
        }
    }

    /// Contact ended: any deferred resolution is cancelled
    pub fn contact_stopped(&mut self, key: PairKey) {
        self.touching.remove(&key);
        self.pending.remove(&key);
    }

    pub fn is_touching(&self, key: PairKey) -> bool {
        self.touching.contains(&key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending pairs whose cooldown has expired while still in contact
    pub fn take_due_pending(&mut self, now_ms: u64, config: &CollisionConfig) -> Vec<PairKey> {
        let due: Vec<PairKey> = self
            .pending
            .iter()
            .copied()
            .filter(|key| self.touching.contains(key) && !self.in_cooldown(*key, now_ms, config))
            .collect();
        for key in &due {
            self.pending.remove(key);
        }
        due
    }

    pub fn is_drive_locked(&self, player_id: PlayerId, now_ms: u64) -> bool {
        self.drive_lock_until.get(&player_id).is_some_and(|until| now_ms < *until)
    }

    pub fn flip_ready(&self, player_id: PlayerId, now_ms: u64) -> bool {
        self.flip_cooldown_until.get(&player_id).map_or(true, |until| now_ms >= *until)
    }

    /// Fresh obstacle contact: returns true and starts the cooldown when
    /// the player is not still cooling down from the previous hit
    pub fn try_obstacle_hit(&mut self, player_id: PlayerId, now_ms: u64, config: &CollisionConfig) -> bool {
        if self
            .obstacle_cooldown_until
            .get(&player_id)
            .is_some_and(|until| now_ms < *until)
        {
            return false;
        }
        let until = now_ms
            .saturating_add(config.obstacle_stun_ms)
            .saturating_add(config.obstacle_grace_ms);
        self.obstacle_cooldown_until.insert(player_id, until);
        true
    }

    pub fn remove_player(&mut self, player_id: PlayerId) {
        let involves = |key: &PairKey| key.0 == player_id || key.1 == player_id;
        self.pair_last_bump.retain(|key, _| !involves(key));
        self.touching.retain(|key| !involves(key));
        self.pending.retain(|key| !involves(key));
        self.flip_cooldown_until.remove(&player_id);
        self.drive_lock_until.remove(&player_id);
        self.obstacle_cooldown_until.remove(&player_id);
    }

    /// Forget all timers (race restart). Contacts are kept: physics still
    /// considers those pairs touching.
    pub fn reset(&mut self) {
        self.pair_last_bump.clear();
        self.pending.clear();
        self.flip_cooldown_until.clear();
        self.drive_lock_until.clear();
        self.obstacle_cooldown_until.clear();
    }

    /// Resolve one pair against the physics world and player state
    pub fn resolve_pair<P: PhysicsWorld>(
        &mut self,
        world: &mut P,
        players: &mut FxMap<PlayerId, PlayerState>,
        key: PairKey,
        contact_force: Option<f32>,
        now_ms: u64,
        config: &CollisionConfig,
    ) -> Option<BumpOutcome> {
        let a = bump_body(world, players.get(&key.0)?)?;
        let b = bump_body(world, players.get(&key.1)?)?;

        let Some(response) = compute_bump(&a, &b, contact_force, config) else {
            debug!("Bump {:?} below impact threshold", key);
            return None;
        };

        let (rammer, victim) = if response.rammer == a.id { (a, b) } else { (b, a) };
        let (flipped, stunned) = gate_secondary_effects(
            rammer.mass,
            victim.mass,
            response.impact_speed,
            self.flip_ready(victim.id, now_ms),
            config,
        );

        for (id, velocity, angular, lock_ms) in [
            (
                rammer.id,
                response.rammer_velocity,
                response.rammer_angular_velocity,
                config.rammer_drive_lock_ms,
            ),
            (
                victim.id,
                response.victim_velocity,
                response.victim_angular_velocity,
                config.bumped_drive_lock_ms,
            ),
        ] {
            let Some(player) = players.get_mut(&id) else { continue };
            world.set_linear_velocity(player.body, velocity);
            world.set_angular_velocity(player.body, angular);
            player.motion.speed = 0.0;
            drift::reset(&mut player.drift, now_ms);
            self.drive_lock_until.insert(id, now_ms.saturating_add(lock_ms));
        }

        if let Some(player) = players.get_mut(&victim.id) {
            if flipped {
                apply_effect(
                    &mut player.effects,
                    EffectSpec::new(StatusEffectKind::Flip, config.flip_duration_ms),
                    now_ms,
                );
                self.flip_cooldown_until
                    .insert(victim.id, now_ms.saturating_add(config.flip_cooldown_ms));
            }
            if stunned {
                apply_effect(
                    &mut player.effects,
                    EffectSpec::new(StatusEffectKind::Stun, config.stun_duration_ms),
                    now_ms,
                );
            }
        }

        self.pair_last_bump.insert(key, now_ms);
        self.pending.remove(&key);

        Some(BumpOutcome {
            rammer: rammer.id,
            victim: victim.id,
            flipped,
            stunned,
            drive_lock_ms: config.bumped_drive_lock_ms,
            impact_speed: response.impact_speed,
        })
    }
}

fn bump_body<P: PhysicsWorld>(world: &P, player: &PlayerState) -> Option<BumpBody> {
    let translation = world.translation(player.body)?;
    Some(BumpBody {
        id: player.id,
        mass: player.mass(),
        speed: player.motion.speed,
        position: translation.planar(),
        forward: player.motion.forward(),
        velocity: world.linear_velocity(player.body)?,
        angular_velocity: world.angular_velocity(player.body)?,
    })
}
