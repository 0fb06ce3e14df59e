use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::game::constants::{collision, combat, drift, drive, ground, tick};

/// Demo server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of independent rooms to run
    pub rooms: usize,
    /// Scripted bots joined to each room
    pub bots_per_room: usize,
    /// Track manifest id for every room (unknown ids fall back to the default track)
    pub track_id: String,
    /// Port for the Prometheus text endpoint
    pub metrics_port: u16,
    /// Seed for bot input generation
    pub seed: u64,
    /// Rooms are restarted after this many seconds if nobody finished
    pub max_race_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rooms: 4,
            bots_per_room: 6,
            track_id: "harbor_sprint".to_string(),
            metrics_port: 9090,
            seed: 7,
            max_race_secs: 240,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        env_override("ROOMS", &mut config.rooms, |v| (1..=1000).contains(v), "1-1000");
        env_override("BOTS_PER_ROOM", &mut config.bots_per_room, |v| (1..=32).contains(v), "1-32");
        env_override("METRICS_PORT", &mut config.metrics_port, |v| *v > 0, "> 0");
        env_override("SEED", &mut config.seed, |_| true, "any u64");
        env_override("MAX_RACE_SECS", &mut config.max_race_secs, |v| *v > 0, "> 0");

        if let Ok(track) = std::env::var("TRACK_ID") {
            config.track_id = track;
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.rooms == 0 {
            return Err("rooms must be at least 1".to_string());
        }
        if self.bots_per_room == 0 {
            return Err("bots_per_room must be at least 1".to_string());
        }
        if self.metrics_port == 0 {
            return Err("metrics_port cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Drive-force tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub throttle_deadzone: f32,
    pub steering_deadzone: f32,
    pub brake_decel: f32,
    pub handbrake_decel: f32,
    pub handbrake_drift_decel: f32,
    pub impulse_limit_factor: f32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            throttle_deadzone: drive::THROTTLE_DEADZONE,
            steering_deadzone: drive::STEERING_DEADZONE,
            brake_decel: drive::BRAKE_DECEL,
            handbrake_decel: drive::HANDBRAKE_DECEL,
            handbrake_drift_decel: drive::HANDBRAKE_DRIFT_DECEL,
            impulse_limit_factor: drive::IMPULSE_LIMIT_FACTOR,
        }
    }
}

/// Drift state machine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub initiation_speed: f32,
    pub initiation_steering: f32,
    pub hold_ms: u64,
    pub gripping_timeout_ms: u64,
    pub neutral_steering: f32,
    pub recovery_ms: u64,
    pub max_drift_angle: f32,
    pub tier_thresholds_ms: [u64; 3],
    pub tier_boost_impulses: [f32; 4],
    pub grip_lateral_friction: f32,
    pub initiating_lateral_friction: f32,
    pub drifting_lateral_friction: f32,
    pub recovering_lateral_friction: f32,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            initiation_speed: drift::INITIATION_SPEED,
            initiation_steering: drift::INITIATION_STEERING,
            hold_ms: drift::HOLD_MS,
            gripping_timeout_ms: drift::GRIPPING_TIMEOUT_MS,
            neutral_steering: drift::NEUTRAL_STEERING,
            recovery_ms: drift::RECOVERY_MS,
            max_drift_angle: drift::MAX_DRIFT_ANGLE,
            tier_thresholds_ms: drift::TIER_THRESHOLDS_MS,
            tier_boost_impulses: drift::TIER_BOOST_IMPULSES,
            grip_lateral_friction: drift::GRIP_LATERAL_FRICTION,
            initiating_lateral_friction: drift::INITIATING_LATERAL_FRICTION,
            drifting_lateral_friction: drift::DRIFTING_LATERAL_FRICTION,
            recovering_lateral_friction: drift::RECOVERING_LATERAL_FRICTION,
        }
    }
}

/// Bump and obstacle tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    pub pair_cooldown_ms: u64,
    pub min_impact_speed: f32,
    pub speed_scale_ceiling: f32,
    pub min_speed_scale: f32,
    pub base_delta_v: f32,
    pub contact_force_base: f32,
    pub max_force_scale: f32,
    pub arcade_bias: f32,
    pub max_impulse: f32,
    pub lateral_fraction: f32,
    pub post_bump_damping: f32,
    pub max_post_bump_speed: f32,
    pub angular_damping: f32,
    pub max_post_bump_angular_speed: f32,
    pub bumped_drive_lock_ms: u64,
    pub rammer_drive_lock_ms: u64,
    pub flip_mass_ratio: f32,
    pub flip_cooldown_ms: u64,
    pub flip_duration_ms: u64,
    pub big_impact_speed: f32,
    pub stun_duration_ms: u64,
    pub obstacle_stun_ms: u64,
    pub obstacle_grace_ms: u64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            pair_cooldown_ms: collision::PAIR_COOLDOWN_MS,
            min_impact_speed: collision::MIN_IMPACT_SPEED,
            speed_scale_ceiling: collision::SPEED_SCALE_CEILING,
            min_speed_scale: collision::MIN_SPEED_SCALE,
            base_delta_v: collision::BASE_DELTA_V,
            contact_force_base: collision::CONTACT_FORCE_BASE,
            max_force_scale: collision::MAX_FORCE_SCALE,
            arcade_bias: collision::ARCADE_BIAS,
            max_impulse: collision::MAX_IMPULSE,
            lateral_fraction: collision::LATERAL_FRACTION,
            post_bump_damping: collision::POST_BUMP_DAMPING,
            max_post_bump_speed: collision::MAX_POST_BUMP_SPEED,
            angular_damping: collision::ANGULAR_DAMPING,
            max_post_bump_angular_speed: collision::MAX_POST_BUMP_ANGULAR_SPEED,
            bumped_drive_lock_ms: collision::BUMPED_DRIVE_LOCK_MS,
            rammer_drive_lock_ms: collision::RAMMER_DRIVE_LOCK_MS,
            flip_mass_ratio: collision::FLIP_MASS_RATIO,
            flip_cooldown_ms: collision::FLIP_COOLDOWN_MS,
            flip_duration_ms: collision::FLIP_DURATION_MS,
            big_impact_speed: collision::BIG_IMPACT_SPEED,
            stun_duration_ms: collision::STUN_DURATION_MS,
            obstacle_stun_ms: collision::OBSTACLE_STUN_MS,
            obstacle_grace_ms: collision::OBSTACLE_GRACE_MS,
        }
    }
}

/// Ground contact tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundConfig {
    pub probe_lift: f32,
    pub probe_distance: f32,
    pub gravity: f32,
    pub max_fall_speed: f32,
    pub bounce_damping: f32,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            probe_lift: ground::PROBE_LIFT,
            probe_distance: ground::PROBE_DISTANCE,
            gravity: ground::GRAVITY,
            max_fall_speed: ground::MAX_FALL_SPEED,
            bounce_damping: ground::BOUNCE_DAMPING,
        }
    }
}

/// Combat limits and projectile flight
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    pub projectile_speed: f32,
    pub projectile_ttl_ticks: u32,
    pub projectile_turn_rate: f32,
    pub projectile_hit_radius: f32,
    pub projectile_spawn_offset: f32,
    pub max_projectiles_per_player: usize,
    pub max_projectiles_per_room: usize,
    pub hit_immunity_ms: u64,
    pub deployable_behind_offset: f32,
    pub max_deployables_per_player: usize,
    pub max_deployables_per_room: usize,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            projectile_speed: combat::PROJECTILE_SPEED,
            projectile_ttl_ticks: combat::PROJECTILE_TTL_TICKS,
            projectile_turn_rate: combat::PROJECTILE_TURN_RATE,
            projectile_hit_radius: combat::PROJECTILE_HIT_RADIUS,
            projectile_spawn_offset: combat::PROJECTILE_SPAWN_OFFSET,
            max_projectiles_per_player: combat::MAX_PROJECTILES_PER_PLAYER,
            max_projectiles_per_room: combat::MAX_PROJECTILES_PER_ROOM,
            hit_immunity_ms: combat::HIT_IMMUNITY_MS,
            deployable_behind_offset: combat::DEPLOYABLE_BEHIND_OFFSET,
            max_deployables_per_player: combat::MAX_DEPLOYABLES_PER_PLAYER,
            max_deployables_per_room: combat::MAX_DEPLOYABLES_PER_ROOM,
        }
    }
}

/// Complete simulation tuning for one room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub tick_rate: u32,
    pub drive: DriveConfig,
    pub drift: DriftConfig,
    pub collision: CollisionConfig,
    pub ground: GroundConfig,
    pub combat: CombatConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: tick::TICK_RATE,
            drive: DriveConfig::default(),
            drift: DriftConfig::default(),
            collision: CollisionConfig::default(),
            ground: GroundConfig::default(),
            combat: CombatConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Seconds per tick
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Load tuning from environment overrides or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        env_override("TICK_RATE", &mut config.tick_rate, |v| (10..=240).contains(v), "10-240");
        env_override(
            "BUMP_PAIR_COOLDOWN_MS",
            &mut config.collision.pair_cooldown_ms,
            |v| *v <= 60_000,
            "0-60000",
        );
        env_override(
            "FLIP_MASS_RATIO",
            &mut config.collision.flip_mass_ratio,
            |v| (0.0..=10.0).contains(v),
            "0.0-10.0",
        );
        env_override(
            "MAX_POST_BUMP_SPEED",
            &mut config.collision.max_post_bump_speed,
            |v| *v > 0.0,
            "> 0",
        );
        env_override(
            "DRIFT_INITIATION_SPEED",
            &mut config.drift.initiation_speed,
            |v| *v > 0.0,
            "> 0",
        );
        env_override(
            "MAX_PROJECTILES_PER_ROOM",
            &mut config.combat.max_projectiles_per_room,
            |v| *v > 0,
            "> 0",
        );
        env_override(
            "MAX_DEPLOYABLES_PER_ROOM",
            &mut config.combat.max_deployables_per_room,
            |v| *v > 0,
            "> 0",
        );

        config
    }

    /// Validate tuning after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        let c = &self.collision;
        if c.rammer_drive_lock_ms < c.bumped_drive_lock_ms {
            return Err("rammer_drive_lock_ms must be >= bumped_drive_lock_ms".to_string());
        }
        if !(0.0..=1.0).contains(&c.arcade_bias) {
            return Err("arcade_bias must be within 0.0-1.0".to_string());
        }
        if c.max_post_bump_speed <= 0.0 || c.max_impulse <= 0.0 {
            return Err("bump speed and impulse caps must be positive".to_string());
        }
        let d = &self.drift;
        if d.gripping_timeout_ms > d.hold_ms {
            return Err("drift gripping_timeout_ms cannot exceed hold_ms".to_string());
        }
        if d.tier_thresholds_ms.windows(2).any(|w| w[0] > w[1]) {
            return Err("drift tier thresholds must be ascending".to_string());
        }
        if self.combat.projectile_speed <= 0.0 {
            return Err("projectile_speed must be positive".to_string());
        }
        Ok(())
    }
}

/// Apply an environment override if it parses and passes `valid`, warn otherwise.
fn env_override<T, F>(name: &str, target: &mut T, valid: F, expected: &str)
where
    T: FromStr,
    F: Fn(&T) -> bool,
{
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(parsed) if valid(&parsed) => *target = parsed,
        Ok(_) => tracing::warn!("{} must be {}, using default", name, expected),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", name, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_simulation_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.dt() - tick::DT).abs() < 1e-6);
    }

    #[test]
    fn test_rammer_lock_must_cover_bumped_lock() {
        let mut config = SimulationConfig::default();
        config.collision.rammer_drive_lock_ms = 100;
        config.collision.bumped_drive_lock_ms = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_tuning_keeps_defaults() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{"collision": {"flip_mass_ratio": 0.9}}"#).unwrap();
        assert!((config.collision.flip_mass_ratio - 0.9).abs() < 1e-6);
        assert_eq!(config.collision.pair_cooldown_ms, collision::PAIR_COOLDOWN_MS);
        assert_eq!(config.tick_rate, tick::TICK_RATE);
    }

    #[test]
    fn test_load_or_default() {
        let config = SimulationConfig::load_or_default();
        assert!(config.tick_rate > 0);
    }
}
