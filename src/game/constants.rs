//! Default tuning values.
//!
//! These seed [`SimulationConfig`](crate::config::SimulationConfig); the
//! simulation itself always reads the config so rooms can be tuned per run.

/// Tick timing
pub mod tick {
    /// Server tick rate in Hz
    pub const TICK_RATE: u32 = 30;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / 30.0;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
}

/// Drive-force model
pub mod drive {
    /// |throttle| below this counts as coasting
    pub const THROTTLE_DEADZONE: f32 = 0.05;
    /// |steering| below this produces no yaw
    pub const STEERING_DEADZONE: f32 = 0.05;
    /// Foot brake deceleration (m/s^2)
    pub const BRAKE_DECEL: f32 = 28.0;
    /// Handbrake with no throttle (m/s^2)
    pub const HANDBRAKE_DECEL: f32 = 40.0;
    /// Handbrake while on throttle, gentle so drifts can be held (m/s^2)
    pub const HANDBRAKE_DRIFT_DECEL: f32 = 4.0;
    /// Per-tick velocity change cap = acceleration * multiplier * dt * this
    pub const IMPULSE_LIMIT_FACTOR: f32 = 3.0;
    /// Upper clamp of the combined movement multiplier
    pub const MAX_MOVEMENT_MULTIPLIER: f32 = 5.0;
    /// Upper clamp of the combined steering multiplier
    pub const MAX_STEERING_MULTIPLIER: f32 = 2.0;
}

/// Drift state machine
pub mod drift {
    pub const INITIATION_SPEED: f32 = 8.0;
    pub const INITIATION_STEERING: f32 = 0.3;
    /// Time INITIATING must be held before promotion to DRIFTING
    pub const HOLD_MS: u64 = 200;
    /// INITIATING falls back to GRIPPING if conditions lapse this long
    pub const GRIPPING_TIMEOUT_MS: u64 = 120;
    /// |steering| at or below this ends a drift
    pub const NEUTRAL_STEERING: f32 = 0.1;
    pub const RECOVERY_MS: u64 = 300;
    /// Drift angle at full steering lock (radians)
    pub const MAX_DRIFT_ANGLE: f32 = 0.6;
    /// Accumulated drift time for tiers 1, 2, 3
    pub const TIER_THRESHOLDS_MS: [u64; 3] = [1000, 2000, 3000];
    /// Exit boost impulse per tier (index 0 = no boost)
    pub const TIER_BOOST_IMPULSES: [f32; 4] = [0.0, 2500.0, 4500.0, 7000.0];

    pub const GRIP_LATERAL_FRICTION: f32 = 1.0;
    pub const INITIATING_LATERAL_FRICTION: f32 = 0.6;
    pub const DRIFTING_LATERAL_FRICTION: f32 = 0.2;
    pub const RECOVERING_LATERAL_FRICTION: f32 = 0.7;
}

/// Car-vs-car bump resolution
pub mod collision {
    /// One resolution per unordered pair inside this window
    pub const PAIR_COOLDOWN_MS: u64 = 3000;
    /// Bumps below this impact speed are ignored
    pub const MIN_IMPACT_SPEED: f32 = 2.0;
    /// Impact speed at which the speed factor reaches 1.0
    pub const SPEED_SCALE_CEILING: f32 = 25.0;
    pub const MIN_SPEED_SCALE: f32 = 0.12;
    /// Velocity change delivered to a reduced-mass body at full scale
    pub const BASE_DELTA_V: f32 = 12.0;
    /// Contact force that maps to a force scale of 1.0
    pub const CONTACT_FORCE_BASE: f32 = 60_000.0;
    pub const MAX_FORCE_SCALE: f32 = 2.0;
    /// Fraction of the reaction impulse the rammer receives
    pub const ARCADE_BIAS: f32 = 0.12;
    pub const MAX_IMPULSE: f32 = 30_000.0;
    /// Lateral impulse as a fraction of the longitudinal one
    pub const LATERAL_FRACTION: f32 = 0.15;
    pub const POST_BUMP_DAMPING: f32 = 0.85;
    pub const MAX_POST_BUMP_SPEED: f32 = 18.0;
    pub const ANGULAR_DAMPING: f32 = 0.5;
    pub const MAX_POST_BUMP_ANGULAR_SPEED: f32 = 3.0;
    pub const BUMPED_DRIVE_LOCK_MS: u64 = 600;
    pub const RAMMER_DRIVE_LOCK_MS: u64 = 750;
    /// Rammer mass must be at least this fraction of the victim's to flip or stun it
    pub const FLIP_MASS_RATIO: f32 = 0.65;
    pub const FLIP_COOLDOWN_MS: u64 = 5000;
    pub const FLIP_DURATION_MS: u64 = 1200;
    /// Impact speed above which a bump also stuns
    pub const BIG_IMPACT_SPEED: f32 = 15.0;
    pub const STUN_DURATION_MS: u64 = 1500;
    pub const OBSTACLE_STUN_MS: u64 = 1000;
    /// Extra cooldown after an obstacle stun before the next one can land
    pub const OBSTACLE_GRACE_MS: u64 = 500;
}

/// Ground contact
pub mod ground {
    /// Ray origin height above the collider center
    pub const PROBE_LIFT: f32 = 0.5;
    /// Maximum ray length
    pub const PROBE_DISTANCE: f32 = 3.0;
    pub const GRAVITY: f32 = 25.0;
    pub const MAX_FALL_SPEED: f32 = 40.0;
    /// Upward velocity is multiplied by this on contact
    pub const BOUNCE_DAMPING: f32 = 0.3;
}

/// Abilities, projectiles and deployables
pub mod combat {
    pub const PROJECTILE_SPEED: f32 = 45.0;
    pub const PROJECTILE_TTL_TICKS: u32 = 150;
    /// Maximum homing turn rate (rad/s)
    pub const PROJECTILE_TURN_RATE: f32 = 2.5;
    pub const PROJECTILE_HIT_RADIUS: f32 = 2.5;
    /// Projectiles spawn this far ahead of the owner
    pub const PROJECTILE_SPAWN_OFFSET: f32 = 3.0;
    pub const MAX_PROJECTILES_PER_PLAYER: usize = 2;
    pub const MAX_PROJECTILES_PER_ROOM: usize = 12;
    /// A player hit by a projectile cannot be targeted again for this long
    pub const HIT_IMMUNITY_MS: u64 = 2500;
    /// Deployables drop this far behind the owner
    pub const DEPLOYABLE_BEHIND_OFFSET: f32 = 5.0;
    pub const MAX_DEPLOYABLES_PER_PLAYER: usize = 3;
    pub const MAX_DEPLOYABLES_PER_ROOM: usize = 20;
}

/// Grid placement at race start
pub mod spawn {
    pub const LANES_PER_ROW: usize = 4;
    pub const LANE_SPACING: f32 = 4.0;
    pub const ROW_SPACING: f32 = 6.0;
}
