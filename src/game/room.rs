//! Room simulation: one race, one physics world, one tick loop
//!
//! Tick order:
//!   1. consume the newest input frame per player
//!   2. expire status effects
//!   3. drift + drive (skipped while drive-locked)
//!   4. physics step
//!   5. sync from physics, ground contact, race progress
//!   6. collision events -> bumps
//!   7. projectiles, obstacle stuns, deployables, hazards, powerups
//!   8. queued abilities
//!
//! Every per-player pass walks players in id order and every timer compares
//! against the `now_ms` handed to [`RoomSimulation::step`], so two rooms fed
//! the same inputs produce the same snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::config::SimulationConfig;
use crate::game::catalog::Catalog;
use crate::game::constants::spawn;
use crate::game::effects::expire_effects;
use crate::game::input_buffer::{InputBuffer, InputPayload, InputSender};
use crate::game::state::{
    DriftContext, FxMap, Motion, PlayerId, PlayerState, RaceState, RaceStatus, RoomId, RoomState,
};
use crate::game::systems::collision::{pair_key, CollisionManager, PairKey};
use crate::game::systems::combat::{self, AbilityRejection};
use crate::game::systems::{drift, drive, ground, progress};
use crate::game::track::Track;
use crate::net::protocol::{AbilityRequest, InputFrame, RaceEvent, RaceEventKind};
use crate::net::snapshot::{self, RoomSnapshot, SnapshotBuilder};
use crate::physics::{BodyDesc, BodyHandle, BodyKind, CollisionEvent, PhysicsError, PhysicsWorld, SimplePhysicsWorld};
use crate::util::vec3::Vec3;

const OBSTACLE_HALF_HEIGHT: f32 = 1.0;

/// Room-level errors
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("Player {0} is already in the room")]
    DuplicatePlayer(PlayerId),
    #[error("Unknown vehicle class '{0}'")]
    UnknownVehicle(String),
    #[error("Invalid simulation config: {0}")]
    InvalidConfig(String),
    #[error("Physics error: {0}")]
    Physics(#[from] PhysicsError),
    #[error("Cannot {action} while the race is {status:?}")]
    InvalidTransition {
        action: &'static str,
        status: RaceStatus,
    },
}

/// What a physics body belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyOwner {
    Player(PlayerId),
    Obstacle,
}

pub struct RoomSimulation<P: PhysicsWorld> {
    room_id: RoomId,
    config: SimulationConfig,
    catalog: Arc<Catalog>,
    track: Track,
    world: P,
    state: RoomState,
    collisions: CollisionManager,
    snapshots: SnapshotBuilder,
    bodies: FxMap<BodyHandle, BodyOwner>,
    inputs: InputBuffer,
    pending_frames: FxMap<PlayerId, SmallVec<[InputFrame; 4]>>,
    pending_abilities: Vec<(PlayerId, AbilityRequest)>,
}

impl RoomSimulation<SimplePhysicsWorld> {
    /// Room backed by the reference physics world, with terrain from the track
    pub fn with_simple_physics(
        room_id: RoomId,
        track_id: &str,
        catalog: Arc<Catalog>,
        config: SimulationConfig,
    ) -> Result<Self, SimError> {
        let track = catalog.track_or_default(track_id);
        let world = SimplePhysicsWorld::new(track.ground_profile()?);
        let track_id = track.id().to_string();
        Self::new(room_id, &track_id, catalog, config, world)
    }
}

impl<P: PhysicsWorld> RoomSimulation<P> {
    /// Create a room in the waiting state. Unknown track ids fall back to the
    /// default track.
    pub fn new(
        room_id: RoomId,
        track_id: &str,
        catalog: Arc<Catalog>,
        config: SimulationConfig,
        mut world: P,
    ) -> Result<Self, SimError> {
        config.validate().map_err(SimError::InvalidConfig)?;
        let track = catalog.track_or_default(track_id).clone();

        let mut state = RoomState::new(track.total_laps());
        combat::populate_track(&mut state, &track, &catalog);

        let mut bodies = FxMap::default();
        for lap in 0..track.total_laps() {
            for obstacle in &track.manifest().obstacles {
                let position = track.placement_position(lap, obstacle.x, obstacle.lap_fraction);
                let handle = world.create_body(BodyDesc {
                    kind: BodyKind::Sensor,
                    translation: Vec3::new(
                        position.x,
                        track.elevation_at(position.y) + OBSTACLE_HALF_HEIGHT,
                        position.y,
                    ),
                    half_extents: Vec3::new(obstacle.half_width, OBSTACLE_HALF_HEIGHT, obstacle.half_length),
                    mass: 0.0,
                })?;
                bodies.insert(handle, BodyOwner::Obstacle);
            }
        }

        info!(
            "Room {} created on {} ({} laps, {} hazards, {} powerups)",
            room_id,
            track.id(),
            track.total_laps(),
            state.hazards.len(),
            state.powerups.len()
        );

        Ok(Self {
            room_id,
            config,
            catalog,
            track,
            world,
            state,
            collisions: CollisionManager::new(),
            snapshots: SnapshotBuilder::new(),
            bodies,
            inputs: InputBuffer::default(),
            pending_frames: FxMap::default(),
            pending_abilities: Vec::new(),
        })
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn state(&self) -> &RoomState {
        &self.state
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn world(&self) -> &P {
        &self.world
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn status(&self) -> RaceStatus {
        self.state.race.status
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&PlayerState> {
        self.state.get_player(player_id)
    }

    pub fn player_count(&self) -> usize {
        self.state.players.len()
    }

    /// Grid position for a spawn slot: rows of lanes behind the start line
    fn spawn_motion(&self, slot: usize) -> Motion {
        let lane = slot % spawn::LANES_PER_ROW;
        let row = slot / spawn::LANES_PER_ROW;
        let x = lane as f32 * spawn::LANE_SPACING - (spawn::LANES_PER_ROW - 1) as f32 * spawn::LANE_SPACING / 2.0;
        let z = -(row as f32) * spawn::ROW_SPACING;
        Motion {
            position: Vec3::new(x, self.track.elevation_at(z), z),
            rotation_y: 0.0,
            speed: 0.0,
        }
    }

    /// Add a player on the lowest free grid slot
    pub fn add_player(
        &mut self,
        player_id: PlayerId,
        name: impl Into<String>,
        vehicle_id: &str,
        now_ms: u64,
    ) -> Result<(), SimError> {
        if self.state.players.contains_key(&player_id) {
            return Err(SimError::DuplicatePlayer(player_id));
        }
        let vehicle = self
            .catalog
            .vehicle(vehicle_id)
            .cloned()
            .ok_or_else(|| SimError::UnknownVehicle(vehicle_id.to_string()))?;

        let taken: BTreeSet<usize> = self.state.players.values().map(|p| p.spawn_slot).collect();
        let slot = (0..=taken.len()).find(|s| !taken.contains(s)).unwrap_or(taken.len());
        let motion = self.spawn_motion(slot);

        let body = self.world.create_body(BodyDesc {
            kind: BodyKind::Dynamic,
            translation: Vec3::new(
                motion.position.x,
                motion.position.y + vehicle.half_height,
                motion.position.z,
            ),
            half_extents: Vec3::new(vehicle.half_width, vehicle.half_height, vehicle.half_length),
            mass: vehicle.mass,
        })?;

        let name = name.into();
        info!(
            "Player {} ({}) joined room {} in slot {} driving {}",
            name, player_id, self.room_id, slot, vehicle.id
        );

        let mut player = PlayerState::new(player_id, name, vehicle, slot as u8, body, slot);
        player.motion = motion;
        player.drift = DriftContext::new(now_ms);
        self.bodies.insert(body, BodyOwner::Player(player_id));
        self.state.players.insert(player_id, player);
        Ok(())
    }

    pub fn remove_player(&mut self, player_id: PlayerId) -> Result<(), SimError> {
        let player = self
            .state
            .players
            .remove(&player_id)
            .ok_or(SimError::UnknownPlayer(player_id))?;
        self.world.remove_body(player.body);
        self.bodies.remove(&player.body);
        self.collisions.remove_player(player_id);
        self.pending_frames.remove(&player_id);
        self.pending_abilities.retain(|(id, _)| *id != player_id);
        info!("Player {} ({}) left room {}", player.name, player_id, self.room_id);
        Ok(())
    }

    /// Waiting -> running
    pub fn start(&mut self, now_ms: u64) -> Result<RaceEvent, SimError> {
        if self.state.race.status != RaceStatus::Waiting {
            return Err(SimError::InvalidTransition {
                action: "start",
                status: self.state.race.status,
            });
        }
        self.reset_race(now_ms);
        info!("Room {} race started with {} players", self.room_id, self.state.players.len());
        Ok(self.race_started(now_ms))
    }

    /// Put everyone back on the grid and run the race again
    pub fn restart(&mut self, now_ms: u64) -> Result<RaceEvent, SimError> {
        if self.state.race.status == RaceStatus::Waiting {
            return Err(SimError::InvalidTransition {
                action: "restart",
                status: self.state.race.status,
            });
        }
        self.reset_race(now_ms);
        info!("Room {} race restarted", self.room_id);
        Ok(self.race_started(now_ms))
    }

    fn race_started(&self, now_ms: u64) -> RaceEvent {
        RaceEvent::new(
            self.room_id,
            None,
            now_ms,
            RaceEventKind::RaceStarted {
                track_id: self.track.id().to_string(),
                total_laps: self.track.total_laps(),
                player_count: self.state.players.len(),
            },
        )
    }

    fn reset_race(&mut self, now_ms: u64) {
        self.state.projectiles.clear();
        self.state.deployables.clear();
        combat::populate_track(&mut self.state, &self.track, &self.catalog);
        self.collisions.reset();
        self.pending_abilities.clear();

        for id in self.state.sorted_player_ids() {
            let Some(slot) = self.state.get_player(id).map(|p| p.spawn_slot) else { continue };
            let motion = self.spawn_motion(slot);
            let Some(player) = self.state.players.get_mut(&id) else { continue };
            player.reset_for_race(motion, now_ms);
            let center = Vec3::new(
                motion.position.x,
                motion.position.y + player.vehicle.half_height,
                motion.position.z,
            );
            self.world.set_translation(player.body, center);
            self.world.set_linear_velocity(player.body, Vec3::ZERO);
            self.world.set_angular_velocity(player.body, Vec3::ZERO);
        }

        self.state.race = RaceState {
            status: RaceStatus::Running,
            total_laps: self.track.total_laps(),
            started_at_ms: Some(now_ms),
            ..Default::default()
        };
    }

    /// Stage an input frame for the next tick
    pub fn queue_input(&mut self, player_id: PlayerId, frame: InputFrame) {
        self.pending_frames.entry(player_id).or_default().push(frame);
    }

    /// Stage an ability request for the end of the next tick
    pub fn queue_ability(&mut self, player_id: PlayerId, request: AbilityRequest) {
        self.pending_abilities.push((player_id, request));
    }

    /// Handle for connection tasks to push inputs from other threads
    pub fn input_sender(&self) -> InputSender {
        self.inputs.sender()
    }

    /// Activate an ability immediately
    pub fn activate_ability(
        &mut self,
        player_id: PlayerId,
        request: &AbilityRequest,
        now_ms: u64,
    ) -> Result<RaceEvent, AbilityRejection> {
        combat::activate_ability(
            &mut self.state,
            &self.catalog,
            player_id,
            request,
            now_ms,
            &self.config.combat,
        )
        .map(|activation| activation.into_event(self.room_id, player_id, now_ms))
    }

    /// Advance the room by one tick. No-op before the race starts or with
    /// an empty room.
    pub fn step(&mut self, now_ms: u64) -> Vec<RaceEvent> {
        if self.state.race.status == RaceStatus::Waiting || self.state.players.is_empty() {
            return Vec::new();
        }

        self.state.tick += 1;
        let dt = self.config.dt();
        let ids = self.state.sorted_player_ids();
        let mut events = Vec::new();

        self.consume_inputs(&ids);

        for id in &ids {
            if let Some(player) = self.state.players.get_mut(id) {
                expire_effects(&mut player.effects, now_ms);
            }
        }

        for id in &ids {
            if self.collisions.is_drive_locked(*id, now_ms) {
                continue;
            }
            let Some(player) = self.state.players.get_mut(id) else { continue };
            let drift_output = drift::update(
                &mut player.drift,
                &player.controls,
                player.motion.speed,
                now_ms,
                &self.config.drift,
            );
            let outcome = drive::apply(&mut self.world, player, drift_output, &self.config.drive, dt);
            player.motion.speed = outcome.speed;
        }

        self.world.step(dt);
        self.sanitize_bodies(&ids);

        let flat_elevation = self.track.flat_elevation();
        for id in &ids {
            if let Some(player) = self.state.players.get_mut(id) {
                ground::sync_and_ground(&mut self.world, player, flat_elevation, &self.config.ground, dt);
            }
            events.extend(progress::advance(&self.track, &mut self.state, self.room_id, *id, now_ms));
        }

        let obstacle_hits = self.resolve_collisions(now_ms, &mut events);

        events.extend(combat::step_projectiles(
            &mut self.state,
            self.room_id,
            now_ms,
            &self.config.combat,
            dt,
        ));
        for player_id in obstacle_hits {
            if self.collisions.try_obstacle_hit(player_id, now_ms, &self.config.collision) {
                events.extend(combat::obstacle_stun(
                    &mut self.state,
                    self.room_id,
                    player_id,
                    self.config.collision.obstacle_stun_ms,
                    now_ms,
                ));
            }
        }
        events.extend(combat::step_deployables(&mut self.state, self.room_id, now_ms));
        events.extend(combat::step_hazards(&mut self.state, self.room_id, now_ms));
        events.extend(combat::collect_powerups(&mut self.state, self.room_id, now_ms));

        for (player_id, request) in mem::take(&mut self.pending_abilities) {
            match self.activate_ability(player_id, &request, now_ms) {
                Ok(event) => events.push(event),
                Err(reason) => debug!("{} from {} not applied: {}", request.ability_id, player_id, reason),
            }
        }

        events
    }

    /// Move buffered messages into the staging queues, then apply the newest
    /// unseen frame per player
    fn consume_inputs(&mut self, ids: &[PlayerId]) {
        for message in self.inputs.drain() {
            match message.payload {
                InputPayload::Frame(frame) => self.queue_input(message.player_id, frame),
                InputPayload::Ability(request) => self.queue_ability(message.player_id, request),
            }
        }

        let mut frames = mem::take(&mut self.pending_frames);
        for id in ids {
            let Some(queued) = frames.remove(id) else { continue };
            let Some(player) = self.state.players.get_mut(id) else { continue };

            let newest = queued
                .into_iter()
                .filter(|f| player.last_input_sequence.map_or(true, |last| f.sequence > last))
                .max_by_key(|f| f.sequence);
            let Some(frame) = newest else {
                debug!("Dropped stale input from {}", id);
                continue;
            };

            player.controls = frame.controls.sanitized();
            player.last_input_sequence = Some(frame.sequence);

            let boost_pressed = player.controls.boost && !player.prev_boost;
            let deploy_pressed = player.controls.deploy && !player.prev_deploy;
            player.prev_boost = player.controls.boost;
            player.prev_deploy = player.controls.deploy;

            if boost_pressed {
                if let Some(ability) = &player.vehicle.boost_ability {
                    self.pending_abilities.push((*id, AbilityRequest::new(ability.clone())));
                }
            }
            if deploy_pressed {
                if let Some(ability) = &player.vehicle.deploy_ability {
                    self.pending_abilities.push((*id, AbilityRequest::new(ability.clone())));
                }
            }
        }
    }

    /// Reset any body the integrator blew up
    fn sanitize_bodies(&mut self, ids: &[PlayerId]) {
        for id in ids {
            let Some(player) = self.state.players.get(id) else { continue };
            let body = player.body;
            let slot = player.spawn_slot;
            let half_height = player.vehicle.half_height;

            let velocity_ok = self.world.linear_velocity(body).map_or(true, |v| v.is_finite());
            let position_ok = self.world.translation(body).map_or(true, |t| t.is_finite());
            if !velocity_ok {
                warn!("Fixed non-finite velocity for player {}", id);
                self.world.set_linear_velocity(body, Vec3::ZERO);
            }
            if !position_ok {
                warn!("Fixed non-finite position for player {}", id);
                let spawn = self.spawn_motion(slot).position;
                self.world
                    .set_translation(body, Vec3::new(spawn.x, spawn.y + half_height, spawn.z));
            }
            if !velocity_ok || !position_ok {
                if let Some(player) = self.state.players.get_mut(id) {
                    player.motion.speed = 0.0;
                }
            }
        }
    }

    fn owner(&self, handle: BodyHandle) -> Option<BodyOwner> {
        self.bodies.get(&handle).copied()
    }

    /// Drain physics contacts, resolve bumps and collect fresh obstacle hits
    fn resolve_collisions(&mut self, now_ms: u64, events: &mut Vec<RaceEvent>) -> BTreeSet<PlayerId> {
        let contacts = self.world.drain_collision_events();
        let forces = self.world.drain_contact_force_events();
        let config = &self.config.collision;

        let mut force_by_pair: BTreeMap<PairKey, f32> = BTreeMap::new();
        for force in forces {
            if let (Some(BodyOwner::Player(a)), Some(BodyOwner::Player(b))) = (self.owner(force.a), self.owner(force.b)) {
                let entry = force_by_pair.entry(pair_key(a, b)).or_insert(0.0);
                *entry = entry.max(force.total_force_magnitude);
            }
        }

        let mut to_resolve = BTreeSet::new();
        let mut obstacle_hits = BTreeSet::new();
        for contact in contacts {
            let (started, a, b) = match contact {
                CollisionEvent::Started(a, b) => (true, a, b),
                CollisionEvent::Stopped(a, b) => (false, a, b),
            };
            match (self.owner(a), self.owner(b)) {
                (Some(BodyOwner::Player(x)), Some(BodyOwner::Player(y))) => {
                    let key = pair_key(x, y);
                    if !started {
                        self.collisions.contact_stopped(key);
                    } else if self.collisions.contact_started(key, now_ms, config) {
                        to_resolve.insert(key);
                    }
                }
                (Some(BodyOwner::Player(id)), Some(BodyOwner::Obstacle))
                | (Some(BodyOwner::Obstacle), Some(BodyOwner::Player(id))) => {
                    if started {
                        obstacle_hits.insert(id);
                    }
                }
                _ => {}
            }
        }
        to_resolve.extend(self.collisions.take_due_pending(now_ms, config));

        for key in to_resolve {
            let force = force_by_pair.get(&key).copied();
            let Some(outcome) = self.collisions.resolve_pair(
                &mut self.world,
                &mut self.state.players,
                key,
                force,
                now_ms,
                config,
            ) else {
                continue;
            };
            debug!(
                "Bump {} -> {} at {:.1} m/s (flipped: {}, stunned: {})",
                outcome.rammer, outcome.victim, outcome.impact_speed, outcome.flipped, outcome.stunned
            );
            events.push(RaceEvent::new(
                self.room_id,
                Some(outcome.rammer),
                now_ms,
                RaceEventKind::CollisionBump {
                    rammer_id: outcome.rammer,
                    victim_id: outcome.victim,
                    flipped: outcome.flipped,
                    stunned: outcome.stunned,
                    drive_lock_ms: outcome.drive_lock_ms,
                    impact_speed: outcome.impact_speed,
                },
            ));
        }

        obstacle_hits
    }

    /// Build the next broadcast snapshot
    pub fn snapshot(&mut self, now_ms: u64) -> RoomSnapshot {
        self.snapshots.build(self.room_id, &self.state, now_ms)
    }

    /// Current ranking, leader first
    pub fn race_order(&self) -> Vec<PlayerId> {
        snapshot::race_order(&self.state)
    }
}
