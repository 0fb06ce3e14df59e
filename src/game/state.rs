//! Room state definitions
//!
//! Everything a room mutates during its tick: players, projectiles,
//! deployables, per-lap hazards and powerups, and the race record.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::catalog::{DeployableKind, VehicleClass};
use crate::game::effects::{EffectSpec, StatusEffects};
use crate::net::protocol::ControlState;
use crate::physics::BodyHandle;
use crate::util::vec2::Vec2;
use crate::util::vec3::Vec3;

/// Unique player identifier
pub type PlayerId = Uuid;

/// Room identifier
pub type RoomId = Uuid;

/// Entity identifier for non-player entities
pub type EntityId = u64;

/// Hash map with a fixed, seed-free hasher
pub type FxMap<K, V> = HashMap<K, V, FxBuildHasher>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftState {
    #[default]
    Gripping,
    Initiating,
    Drifting,
    Recovering,
}

/// Per-player drift state machine context
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriftContext {
    pub state: DriftState,
    pub state_entered_at_ms: u64,
    /// Last tick processed while DRIFTING
    pub last_tick_ms: u64,
    /// Last tick the initiation conditions held
    pub last_qualified_at_ms: u64,
    pub accumulated_ms: u64,
    /// 0..=3
    pub boost_tier: u8,
    /// Signed visual slide angle (radians)
    pub drift_angle: f32,
}

impl DriftContext {
    pub fn new(now_ms: u64) -> Self {
        Self {
            state_entered_at_ms: now_ms,
            last_tick_ms: now_ms,
            last_qualified_at_ms: now_ms,
            ..Default::default()
        }
    }
}

/// Motion state read back from physics every tick
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Motion {
    /// Rendered position: y is the bottom of the car, not the collider center
    pub position: Vec3,
    /// Yaw (radians), 0 faces +Z
    pub rotation_y: f32,
    /// Scalar forward speed (m/s), negative when reversing
    pub speed: f32,
}

impl Motion {
    pub fn planar_position(&self) -> Vec2 {
        self.position.planar()
    }

    pub fn forward(&self) -> Vec2 {
        Vec2::from_yaw(self.rotation_y)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceProgress {
    /// Completed laps
    pub lap: u32,
    /// Next checkpoint to clear on the current lap
    pub checkpoint_index: usize,
    /// Cleared checkpoints as (lap, index)
    pub completed_checkpoints: BTreeSet<(u32, usize)>,
    /// Slope-corrected distance, never decreases
    pub distance: f32,
    pub finished_at_ms: Option<u64>,
}

impl RaceProgress {
    pub fn is_finished(&self) -> bool {
        self.finished_at_ms.is_some()
    }
}

/// Player state
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: PlayerId,
    pub name: String,
    pub vehicle: VehicleClass,
    pub color_index: u8,
    pub controls: ControlState,
    pub last_input_sequence: Option<u64>,
    pub motion: Motion,
    pub grounded: bool,
    pub effects: StatusEffects,
    pub drift: DriftContext,
    pub progress: RaceProgress,
    pub body: BodyHandle,
    pub spawn_slot: usize,
    /// Last projectile hit (drives hit immunity)
    pub last_hit_at_ms: Option<u64>,
    /// Ability id -> last activation time
    pub ability_last_used: FxMap<String, u64>,
    /// Button states from the previous applied frame, for rising edges
    pub prev_boost: bool,
    pub prev_deploy: bool,
}

impl PlayerState {
    pub fn new(
        id: PlayerId,
        name: String,
        vehicle: VehicleClass,
        color_index: u8,
        body: BodyHandle,
        spawn_slot: usize,
    ) -> Self {
        Self {
            id,
            name,
            vehicle,
            color_index,
            controls: ControlState::default(),
            last_input_sequence: None,
            motion: Motion::default(),
            grounded: true,
            effects: StatusEffects::new(),
            drift: DriftContext::default(),
            progress: RaceProgress::default(),
            body,
            spawn_slot,
            last_hit_at_ms: None,
            ability_last_used: FxMap::default(),
            prev_boost: false,
            prev_deploy: false,
        }
    }

    pub fn mass(&self) -> f32 {
        self.vehicle.mass
    }

    /// Within the post-hit window where projectiles will not target this player
    pub fn is_hit_immune(&self, now_ms: u64, immunity_ms: u64) -> bool {
        self.last_hit_at_ms
            .is_some_and(|hit| now_ms < hit.saturating_add(immunity_ms))
    }

    /// Back to spawn values; identity, vehicle, body and input sequence survive
    pub fn reset_for_race(&mut self, motion: Motion, now_ms: u64) {
        self.controls = ControlState::default();
        self.motion = motion;
        self.grounded = true;
        self.effects.clear();
        self.drift = DriftContext::new(now_ms);
        self.progress = RaceProgress::default();
        self.last_hit_at_ms = None;
        self.ability_last_used.clear();
        self.prev_boost = false;
        self.prev_deploy = false;
    }
}

/// Homing projectile in flight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveProjectile {
    pub id: EntityId,
    pub owner_id: PlayerId,
    pub target_id: Option<PlayerId>,
    pub position: Vec2,
    /// Constant magnitude
    pub velocity: Vec2,
    pub ttl_ticks: u32,
    /// Stun applied on hit
    pub stun_ms: u64,
}

/// One-shot trap dropped by an ability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDeployable {
    pub id: EntityId,
    pub owner_id: PlayerId,
    pub ability_id: String,
    pub kind: DeployableKind,
    pub position: Vec2,
    pub radius: f32,
    pub effect: EffectSpec,
    pub lifetime_ticks: u32,
    pub triggered: bool,
}

/// Track hazard instance for one lap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveHazard {
    pub id: EntityId,
    pub manifest_id: String,
    pub lap: u32,
    pub position: Vec2,
    pub radius: f32,
    pub effect: EffectSpec,
    pub rearm_ms: u64,
    pub last_triggered_at_ms: Option<u64>,
}

impl ActiveHazard {
    pub fn is_armed(&self, now_ms: u64) -> bool {
        self.last_triggered_at_ms
            .map_or(true, |t| now_ms >= t.saturating_add(self.rearm_ms))
    }
}

/// Track powerup instance for one lap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePowerup {
    pub id: EntityId,
    pub manifest_id: String,
    pub lap: u32,
    pub position: Vec2,
    pub radius: f32,
    pub effect: EffectSpec,
    pub respawn_ms: u64,
    pub collected_at_ms: Option<u64>,
}

impl ActivePowerup {
    pub fn is_available(&self, now_ms: u64) -> bool {
        self.collected_at_ms
            .map_or(true, |t| now_ms >= t.saturating_add(self.respawn_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    /// Room created, race not started yet
    #[default]
    Waiting,
    Running,
    /// Someone crossed the line; the rest may still finish
    Finished,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaceState {
    pub status: RaceStatus,
    pub total_laps: u32,
    pub winner: Option<PlayerId>,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
}

/// Complete mutable state of one room
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    pub players: FxMap<PlayerId, PlayerState>,
    pub projectiles: Vec<ActiveProjectile>,
    pub deployables: Vec<ActiveDeployable>,
    pub hazards: Vec<ActiveHazard>,
    pub powerups: Vec<ActivePowerup>,
    pub race: RaceState,
    pub tick: u64,
    next_entity_id: EntityId,
}

impl RoomState {
    pub fn new(total_laps: u32) -> Self {
        Self {
            race: RaceState {
                total_laps,
                ..Default::default()
            },
            next_entity_id: 1,
            ..Default::default()
        }
    }

    /// Allocate a room-unique entity id
    pub fn next_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    pub fn get_player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    pub fn get_player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerState> {
        self.players.get_mut(&id)
    }

    /// Player ids in stable order; all per-player passes iterate this
    pub fn sorted_player_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.players.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn finished_count(&self) -> usize {
        self.players.values().filter(|p| p.progress.is_finished()).count()
    }
}
