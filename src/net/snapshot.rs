//! Room snapshots for broadcast
//!
//! Snapshots are a read-only view of [`RoomState`]. The builder only owns
//! the monotonic sequence counter.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::game::catalog::DeployableKind;
use crate::game::effects::StatusEffectKind;
use crate::game::state::{DriftState, EntityId, PlayerId, PlayerState, RaceStatus, RoomId, RoomState};
use crate::util::vec2::Vec2;
use crate::util::vec3::Vec3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSnapshot {
    pub kind: StatusEffectKind,
    pub expires_at_ms: u64,
    pub intensity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub vehicle_id: String,
    pub color_index: u8,
    pub position: Vec3,
    pub rotation_y: f32,
    pub speed: f32,
    pub grounded: bool,
    pub lap: u32,
    pub checkpoint_index: usize,
    pub distance: f32,
    pub finished_at_ms: Option<u64>,
    pub effects: Vec<EffectSnapshot>,
    pub drift_state: DriftState,
    pub drift_tier: u8,
    pub drift_angle: f32,
    /// Last input sequence applied, for client reconciliation
    pub last_input_sequence: Option<u64>,
}

impl PlayerSnapshot {
    pub fn from_player(player: &PlayerState) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            vehicle_id: player.vehicle.id.clone(),
            color_index: player.color_index,
            position: player.motion.position,
            rotation_y: player.motion.rotation_y,
            speed: player.motion.speed,
            grounded: player.grounded,
            lap: player.progress.lap,
            checkpoint_index: player.progress.checkpoint_index,
            distance: player.progress.distance,
            finished_at_ms: player.progress.finished_at_ms,
            effects: player
                .effects
                .iter()
                .map(|e| EffectSnapshot {
                    kind: e.kind,
                    expires_at_ms: e.expires_at_ms,
                    intensity: e.intensity,
                })
                .collect(),
            drift_state: player.drift.state,
            drift_tier: player.drift.boost_tier,
            drift_angle: player.drift.drift_angle,
            last_input_sequence: player.last_input_sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub id: EntityId,
    pub owner_id: PlayerId,
    pub target_id: Option<PlayerId>,
    pub position: Vec2,
    pub velocity: Vec2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployableSnapshot {
    pub id: EntityId,
    pub owner_id: PlayerId,
    pub kind: DeployableKind,
    pub position: Vec2,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub sequence: u64,
    pub tick: u64,
    pub server_time_ms: u64,
    pub status: RaceStatus,
    pub total_laps: u32,
    pub winner: Option<PlayerId>,
    /// Sorted by id
    pub players: Vec<PlayerSnapshot>,
    /// Leader first
    pub race_order: Vec<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projectiles: Option<Vec<ProjectileSnapshot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployables: Option<Vec<DeployableSnapshot>>,
}

/// Leader first: more laps, then more distance, then earlier finish, then id
fn compare_standing(a: &PlayerState, b: &PlayerState) -> Ordering {
    b.progress
        .lap
        .cmp(&a.progress.lap)
        .then_with(|| b.progress.distance.total_cmp(&a.progress.distance))
        .then_with(|| match (a.progress.finished_at_ms, b.progress.finished_at_ms) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Current race ranking
pub fn race_order(state: &RoomState) -> Vec<PlayerId> {
    let mut players: Vec<&PlayerState> = state.players.values().collect();
    players.sort_by(|a, b| compare_standing(a, b));
    players.into_iter().map(|p| p.id).collect()
}

#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    sequence: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the last snapshot built
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn build(&mut self, room_id: RoomId, state: &RoomState, now_ms: u64) -> RoomSnapshot {
        self.sequence += 1;

        let players = state
            .sorted_player_ids()
            .into_iter()
            .filter_map(|id| state.get_player(id))
            .map(PlayerSnapshot::from_player)
            .collect();

        let projectiles = (!state.projectiles.is_empty()).then(|| {
            state
                .projectiles
                .iter()
                .map(|p| ProjectileSnapshot {
                    id: p.id,
                    owner_id: p.owner_id,
                    target_id: p.target_id,
                    position: p.position,
                    velocity: p.velocity,
                })
                .collect()
        });

        let deployables = (!state.deployables.is_empty()).then(|| {
            state
                .deployables
                .iter()
                .map(|d| DeployableSnapshot {
                    id: d.id,
                    owner_id: d.owner_id,
                    kind: d.kind,
                    position: d.position,
                    radius: d.radius,
                })
                .collect()
        });

        RoomSnapshot {
            room_id,
            sequence: self.sequence,
            tick: state.tick,
            server_time_ms: now_ms,
            status: state.race.status,
            total_laps: state.race.total_laps,
            winner: state.race.winner,
            players,
            race_order: race_order(state),
            projectiles,
            deployables,
        }
    }
}
