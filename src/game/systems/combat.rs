//! Abilities, deployables, track hazards and powerups
//!
//! Activation is synchronous and returns a typed result: a rejection changes
//! nothing and produces no event. The per-tick passes walk players in id
//! order so the first player to reach a one-shot entity is deterministic.

use tracing::{debug, warn};

use crate::config::CombatConfig;
use crate::game::catalog::{AbilityKind, Catalog};
use crate::game::effects::{apply_effect, EffectSpec, StatusEffectKind};
use crate::game::state::{
    ActiveDeployable, ActiveHazard, ActivePowerup, EntityId, PlayerId, RaceStatus, RoomId, RoomState,
};
use crate::game::systems::projectile::{self, FlightStep};
use crate::game::track::Track;
use crate::net::protocol::{AbilityRequest, RaceEvent, RaceEventKind, TriggerSource};

/// Why an ability was not applied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbilityRejection {
    #[error("Race is not running")]
    RaceNotRunning,
    #[error("Unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("Player has already finished")]
    PlayerFinished,
    #[error("Unknown ability '{0}'")]
    UnknownAbility(String),
    #[error("Ability '{ability_id}' on cooldown for another {remaining_ms}ms")]
    OnCooldown { ability_id: String, remaining_ms: u64 },
    #[error("Player projectile limit reached ({0})")]
    PlayerProjectileLimit(usize),
    #[error("Room projectile limit reached ({0})")]
    RoomProjectileLimit(usize),
    #[error("Player deployable limit reached ({0})")]
    PlayerDeployableLimit(usize),
    #[error("Room deployable limit reached ({0})")]
    RoomDeployableLimit(usize),
}

/// Accepted activation, becomes one `ability_activated` event
#[derive(Debug, Clone, PartialEq)]
pub struct AbilityActivation {
    pub ability_id: String,
    /// Projectile target, if any
    pub target_id: Option<PlayerId>,
    /// Spawned projectile or deployable
    pub entity_id: Option<EntityId>,
}

impl AbilityActivation {
    pub fn into_event(self, room_id: RoomId, player_id: PlayerId, now_ms: u64) -> RaceEvent {
        RaceEvent::new(
            room_id,
            Some(player_id),
            now_ms,
            RaceEventKind::AbilityActivated {
                ability_id: self.ability_id,
                target_id: self.target_id,
                entity_id: self.entity_id,
            },
        )
    }
}

/// Validate and apply an ability request
pub fn activate_ability(
    state: &mut RoomState,
    catalog: &Catalog,
    player_id: PlayerId,
    request: &AbilityRequest,
    now_ms: u64,
    config: &CombatConfig,
) -> Result<AbilityActivation, AbilityRejection> {
    if state.race.status == RaceStatus::Waiting {
        return Err(AbilityRejection::RaceNotRunning);
    }
    let player = state
        .players
        .get(&player_id)
        .ok_or(AbilityRejection::UnknownPlayer(player_id))?;
    if player.progress.is_finished() {
        return Err(AbilityRejection::PlayerFinished);
    }
    let ability = catalog
        .ability(&request.ability_id)
        .ok_or_else(|| AbilityRejection::UnknownAbility(request.ability_id.clone()))?;

    if let Some(last_used) = player.ability_last_used.get(&ability.id) {
        let ready_at = last_used.saturating_add(ability.cooldown_ms);
        if now_ms < ready_at {
            return Err(AbilityRejection::OnCooldown {
                ability_id: ability.id.clone(),
                remaining_ms: ready_at - now_ms,
            });
        }
    }

    let mut activation = AbilityActivation {
        ability_id: ability.id.clone(),
        target_id: None,
        entity_id: None,
    };

    match &ability.kind {
        AbilityKind::HomingProjectile { stun_ms } => {
            let owned = state.projectiles.iter().filter(|p| p.owner_id == player_id).count();
            if owned >= config.max_projectiles_per_player {
                return Err(AbilityRejection::PlayerProjectileLimit(config.max_projectiles_per_player));
            }
            if state.projectiles.len() >= config.max_projectiles_per_room {
                return Err(AbilityRejection::RoomProjectileLimit(config.max_projectiles_per_room));
            }

            let origin = player.motion.planar_position();
            let mut candidates: Vec<_> = state.players.values().collect();
            candidates.sort_unstable_by_key(|p| p.id);
            let target_id =
                projectile::select_target(player_id, origin, request.target, candidates.into_iter(), now_ms, config);

            let mut missile = projectile::launch(0, player, target_id, *stun_ms, config);
            missile.id = state.next_entity_id();
            activation.target_id = target_id;
            activation.entity_id = Some(missile.id);
            state.projectiles.push(missile);
        }
        AbilityKind::Deployable {
            deployable,
            radius,
            lifetime_ticks,
            effect,
        } => {
            let owned = state.deployables.iter().filter(|d| d.owner_id == player_id).count();
            if owned >= config.max_deployables_per_player {
                return Err(AbilityRejection::PlayerDeployableLimit(config.max_deployables_per_player));
            }
            if state.deployables.len() >= config.max_deployables_per_room {
                return Err(AbilityRejection::RoomDeployableLimit(config.max_deployables_per_room));
            }

            let position =
                player.motion.planar_position() - player.motion.forward() * config.deployable_behind_offset;
            let id = state.next_entity_id();
            state.deployables.push(ActiveDeployable {
                id,
                owner_id: player_id,
                ability_id: ability.id.clone(),
                kind: *deployable,
                position,
                radius: *radius,
                effect: *effect,
                lifetime_ticks: *lifetime_ticks,
                triggered: false,
            });
            activation.entity_id = Some(id);
        }
        AbilityKind::SelfEffect { effect } => {
            if let Some(player) = state.players.get_mut(&player_id) {
                apply_effect(&mut player.effects, *effect, now_ms);
            }
        }
    }

    if let Some(player) = state.players.get_mut(&player_id) {
        player.ability_last_used.insert(ability.id.clone(), now_ms);
    }
    debug!("Player {} activated {}", player_id, ability.id);
    Ok(activation)
}

/// Fly every projectile one tick; hits stun the target and are removed
pub fn step_projectiles(
    state: &mut RoomState,
    room_id: RoomId,
    now_ms: u64,
    config: &CombatConfig,
    dt: f32,
) -> Vec<RaceEvent> {
    let mut events = Vec::new();
    let players = &mut state.players;

    state.projectiles.retain_mut(|p| {
        let target_position = p
            .target_id
            .and_then(|id| players.get(&id))
            .filter(|target| !target.progress.is_finished())
            .map(|target| target.motion.planar_position());

        match projectile::step(p, target_position, config, dt) {
            FlightStep::Flying => true,
            FlightStep::Expired => false,
            FlightStep::Hit(target_id) => {
                if let Some(target) = players.get_mut(&target_id) {
                    apply_effect(
                        &mut target.effects,
                        EffectSpec::new(StatusEffectKind::Stun, p.stun_ms),
                        now_ms,
                    );
                    target.last_hit_at_ms = Some(now_ms);
                }
                events.push(RaceEvent::new(
                    room_id,
                    Some(target_id),
                    now_ms,
                    RaceEventKind::ProjectileHit {
                        projectile_id: p.id,
                        owner_id: p.owner_id,
                        target_id,
                    },
                ));
                false
            }
        }
    });

    events
}

/// Trigger deployables on the first opponent in range, then age them
pub fn step_deployables(state: &mut RoomState, room_id: RoomId, now_ms: u64) -> Vec<RaceEvent> {
    let ids = state.sorted_player_ids();
    let mut events = Vec::new();
    let players = &mut state.players;

    state.deployables.retain_mut(|d| {
        let victim = ids.iter().copied().find(|id| {
            players.get(id).is_some_and(|p| {
                p.id != d.owner_id
                    && !p.progress.is_finished()
                    && p.motion.planar_position().distance_to(d.position) <= d.radius
            })
        });

        if let Some(victim_id) = victim {
            if let Some(player) = players.get_mut(&victim_id) {
                apply_effect(&mut player.effects, d.effect, now_ms);
            }
            d.triggered = true;
            events.push(RaceEvent::new(
                room_id,
                Some(victim_id),
                now_ms,
                RaceEventKind::HazardTriggered {
                    source: TriggerSource::Deployable,
                    hazard_id: d.ability_id.clone(),
                    entity_id: Some(d.id),
                    effect: d.effect.kind,
                },
            ));
            return false;
        }

        d.lifetime_ticks = d.lifetime_ticks.saturating_sub(1);
        d.lifetime_ticks > 0
    });

    events
}

/// Armed hazards hit every unfinished player in range, then rearm
pub fn step_hazards(state: &mut RoomState, room_id: RoomId, now_ms: u64) -> Vec<RaceEvent> {
    let ids = state.sorted_player_ids();
    let mut events = Vec::new();

    for hazard in state.hazards.iter_mut().filter(|h| h.is_armed(now_ms)) {
        let mut triggered = false;
        for id in &ids {
            let Some(player) = state.players.get_mut(id) else { continue };
            if player.progress.is_finished()
                || player.motion.planar_position().distance_to(hazard.position) > hazard.radius
            {
                continue;
            }
            apply_effect(&mut player.effects, hazard.effect, now_ms);
            triggered = true;
            events.push(RaceEvent::new(
                room_id,
                Some(*id),
                now_ms,
                RaceEventKind::HazardTriggered {
                    source: TriggerSource::Hazard,
                    hazard_id: hazard.manifest_id.clone(),
                    entity_id: Some(hazard.id),
                    effect: hazard.effect.kind,
                },
            ));
        }
        if triggered {
            hazard.last_triggered_at_ms = Some(now_ms);
        }
    }

    events
}

/// Available powerups go to the first unfinished player in range
pub fn collect_powerups(state: &mut RoomState, room_id: RoomId, now_ms: u64) -> Vec<RaceEvent> {
    let ids = state.sorted_player_ids();
    let mut events = Vec::new();

    for powerup in state.powerups.iter_mut().filter(|p| p.is_available(now_ms)) {
        let collector = ids.iter().copied().find(|id| {
            state.players.get(id).is_some_and(|p| {
                !p.progress.is_finished() && p.motion.planar_position().distance_to(powerup.position) <= powerup.radius
            })
        });
        let Some(player_id) = collector else { continue };
        if let Some(player) = state.players.get_mut(&player_id) {
            apply_effect(&mut player.effects, powerup.effect, now_ms);
        }
        powerup.collected_at_ms = Some(now_ms);
        events.push(RaceEvent::new(
            room_id,
            Some(player_id),
            now_ms,
            RaceEventKind::PowerupCollected {
                powerup_id: powerup.manifest_id.clone(),
                entity_id: powerup.id,
                effect: powerup.effect.kind,
            },
        ));
    }

    events
}

/// Stun from running into a track obstacle
pub fn obstacle_stun(
    state: &mut RoomState,
    room_id: RoomId,
    player_id: PlayerId,
    stun_ms: u64,
    now_ms: u64,
) -> Option<RaceEvent> {
    let player = state.players.get_mut(&player_id)?;
    apply_effect(
        &mut player.effects,
        EffectSpec::new(StatusEffectKind::Stun, stun_ms),
        now_ms,
    );
    Some(RaceEvent::new(
        room_id,
        Some(player_id),
        now_ms,
        RaceEventKind::HazardTriggered {
            source: TriggerSource::Obstacle,
            hazard_id: "obstacle".to_string(),
            entity_id: None,
            effect: StatusEffectKind::Stun,
        },
    ))
}

/// Lay out hazards and powerups for every lap of the track
pub fn populate_track(state: &mut RoomState, track: &Track, catalog: &Catalog) {
    state.hazards.clear();
    state.powerups.clear();

    for lap in 0..track.total_laps() {
        for placement in &track.manifest().hazards {
            let Some(manifest) = catalog.hazard(&placement.manifest_id) else {
                warn!("Track {} places unknown hazard {}", track.id(), placement.manifest_id);
                continue;
            };
            let id = state.next_entity_id();
            state.hazards.push(ActiveHazard {
                id,
                manifest_id: manifest.id.clone(),
                lap,
                position: track.placement_position(lap, placement.x, placement.lap_fraction),
                radius: manifest.radius,
                effect: manifest.effect,
                rearm_ms: manifest.rearm_ms,
                last_triggered_at_ms: None,
            });
        }
        for placement in &track.manifest().powerups {
            let Some(manifest) = catalog.powerup(&placement.manifest_id) else {
                warn!("Track {} places unknown powerup {}", track.id(), placement.manifest_id);
                continue;
            };
            let id = state.next_entity_id();
            state.powerups.push(ActivePowerup {
                id,
                manifest_id: manifest.id.clone(),
                lap,
                position: track.placement_position(lap, placement.x, placement.lap_fraction),
                radius: manifest.radius,
                effect: manifest.effect,
                respawn_ms: manifest.respawn_ms,
                collected_at_ms: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::effects::has_effect;
    use crate::game::state::PlayerState;
    use crate::physics::BodyHandle;
    use crate::util::vec2::Vec2;
    use uuid::Uuid;

    fn room(players: &[(u128, f32, f32)]) -> (Catalog, RoomState) {
        let catalog = Catalog::builtin().unwrap();
        let mut state = RoomState::new(3);
        state.race.status = RaceStatus::Running;
        for &(n, x, z) in players {
            let vehicle = catalog.vehicle("interceptor").cloned().unwrap();
            let id = Uuid::from_u128(n);
            let mut player = PlayerState::new(id, format!("p{}", n), vehicle, 0, BodyHandle(n as u32), 0);
            player.motion.position.x = x;
            player.motion.position.z = z;
            state.players.insert(id, player);
        }
        (catalog, state)
    }

    fn id(n: u128) -> PlayerId {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_oil_slick_lands_behind_owner() {
        let (catalog, mut state) = room(&[(1, 10.0, 20.0)]);
        let config = CombatConfig::default();
        let activation =
            activate_ability(&mut state, &catalog, id(1), &AbilityRequest::new("oil_slick"), 0, &config).unwrap();

        assert_eq!(state.deployables.len(), 1);
        let slick = &state.deployables[0];
        assert_eq!(Some(slick.id), activation.entity_id);
        assert!(slick.position.approx_eq(Vec2::new(10.0, 15.0), 1e-5));
        assert_eq!(slick.effect.kind, StatusEffectKind::Slick);
    }

    #[test]
    fn test_cooldown_rejection_changes_nothing() {
        let (catalog, mut state) = room(&[(1, 0.0, 0.0)]);
        let config = CombatConfig::default();
        let request = AbilityRequest::new("oil_slick");
        activate_ability(&mut state, &catalog, id(1), &request, 1000, &config).unwrap();

        let result = activate_ability(&mut state, &catalog, id(1), &request, 2000, &config);
        assert_eq!(
            result,
            Err(AbilityRejection::OnCooldown {
                ability_id: "oil_slick".into(),
                remaining_ms: 4000
            })
        );
        assert_eq!(state.deployables.len(), 1);
        assert!(activate_ability(&mut state, &catalog, id(1), &request, 6000, &config).is_ok());
    }

    #[test]
    fn test_invalid_references_rejected() {
        let (catalog, mut state) = room(&[(1, 0.0, 0.0)]);
        let config = CombatConfig::default();
        assert_eq!(
            activate_ability(&mut state, &catalog, id(1), &AbilityRequest::new("laser"), 0, &config),
            Err(AbilityRejection::UnknownAbility("laser".into()))
        );
        assert_eq!(
            activate_ability(&mut state, &catalog, id(9), &AbilityRequest::new("nitro"), 0, &config),
            Err(AbilityRejection::UnknownPlayer(id(9)))
        );

        state.race.status = RaceStatus::Waiting;
        assert_eq!(
            activate_ability(&mut state, &catalog, id(1), &AbilityRequest::new("nitro"), 0, &config),
            Err(AbilityRejection::RaceNotRunning)
        );
    }

    #[test]
    fn test_finished_player_cannot_fire() {
        let (catalog, mut state) = room(&[(1, 0.0, 0.0)]);
        state.players.get_mut(&id(1)).unwrap().progress.finished_at_ms = Some(10);
        assert_eq!(
            activate_ability(&mut state, &catalog, id(1), &AbilityRequest::new("nitro"), 0, &CombatConfig::default()),
            Err(AbilityRejection::PlayerFinished)
        );
    }

    #[test]
    fn test_self_effect_applies_boost() {
        let (catalog, mut state) = room(&[(1, 0.0, 0.0)]);
        let activation =
            activate_ability(&mut state, &catalog, id(1), &AbilityRequest::new("nitro"), 0, &CombatConfig::default())
                .unwrap();
        assert_eq!(activation.entity_id, None);
        assert!(has_effect(&state.players[&id(1)].effects, StatusEffectKind::Boost, 100));
    }

    #[test]
    fn test_projectile_caps() {
        let (catalog, mut state) = room(&[(1, 0.0, 0.0), (2, 0.0, 40.0)]);
        let config = CombatConfig {
            max_projectiles_per_player: 1,
            ..Default::default()
        };
        let request = AbilityRequest::new("homing_missile");
        let first = activate_ability(&mut state, &catalog, id(1), &request, 0, &config).unwrap();
        assert_eq!(first.target_id, Some(id(2)));

        // Off cooldown but the first missile is still flying
        let result = activate_ability(&mut state, &catalog, id(1), &request, 10_000, &config);
        assert_eq!(result, Err(AbilityRejection::PlayerProjectileLimit(1)));

        let room_full = CombatConfig {
            max_projectiles_per_room: 1,
            ..Default::default()
        };
        let result = activate_ability(&mut state, &catalog, id(2), &request, 0, &room_full);
        assert_eq!(result, Err(AbilityRejection::RoomProjectileLimit(1)));
    }

    #[test]
    fn test_projectile_hit_stuns_and_grants_immunity() {
        let (catalog, mut state) = room(&[(1, 0.0, 0.0), (2, 0.0, 20.0)]);
        let config = CombatConfig::default();
        activate_ability(&mut state, &catalog, id(1), &AbilityRequest::new("homing_missile"), 0, &config).unwrap();

        let mut events = Vec::new();
        for tick in 1..60u64 {
            events.extend(step_projectiles(&mut state, Uuid::nil(), tick * 33, &config, 1.0 / 30.0));
            if !events.is_empty() {
                break;
            }
        }
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].kind,
            RaceEventKind::ProjectileHit { target_id, .. } if target_id == id(2)
        ));
        assert!(state.projectiles.is_empty());
        let target = &state.players[&id(2)];
        let hit_at = events[0].server_time_ms;
        assert_eq!(target.last_hit_at_ms, Some(hit_at));
        assert!(has_effect(&target.effects, StatusEffectKind::Stun, hit_at));
    }

    #[test]
    fn test_deployable_ignores_owner_and_fires_once() {
        let (catalog, mut state) = room(&[(1, 0.0, 20.0), (2, 0.0, 40.0)]);
        activate_ability(&mut state, &catalog, id(1), &AbilityRequest::new("oil_slick"), 0, &CombatConfig::default())
            .unwrap();
        // Owner parks on top of its own slick
        state.players.get_mut(&id(1)).unwrap().motion.position.z = 15.0;
        assert!(step_deployables(&mut state, Uuid::nil(), 100).is_empty());

        state.players.get_mut(&id(2)).unwrap().motion.position.z = 16.0;
        let events = step_deployables(&mut state, Uuid::nil(), 200);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].player_id, Some(id(2)));
        assert!(state.deployables.is_empty());
        assert!(has_effect(&state.players[&id(2)].effects, StatusEffectKind::Slick, 200));
        assert!(step_deployables(&mut state, Uuid::nil(), 300).is_empty());
    }

    #[test]
    fn test_deployable_expires() {
        let (catalog, mut state) = room(&[(1, 0.0, 20.0)]);
        activate_ability(&mut state, &catalog, id(1), &AbilityRequest::new("mine"), 0, &CombatConfig::default())
            .unwrap();
        let lifetime = state.deployables[0].lifetime_ticks;
        for tick in 1..lifetime {
            step_deployables(&mut state, Uuid::nil(), tick as u64);
            assert_eq!(state.deployables.len(), 1);
        }
        step_deployables(&mut state, Uuid::nil(), lifetime as u64);
        assert!(state.deployables.is_empty());
    }

    #[test]
    fn test_hazard_hits_everyone_in_range_then_rearms() {
        let (catalog, mut state) = room(&[(1, 0.0, 100.0), (2, 1.0, 101.0), (3, 30.0, 100.0)]);
        let track = catalog.track("harbor_sprint").cloned().unwrap();
        populate_track(&mut state, &track, &catalog);
        assert_eq!(
            state.hazards.len(),
            track.manifest().hazards.len() * track.total_laps() as usize
        );

        let hazard = state.hazards[0].clone();
        for n in [1, 2] {
            let player = state.players.get_mut(&id(n)).unwrap();
            player.motion.position.x = hazard.position.x;
            player.motion.position.z = hazard.position.y;
        }

        let events = step_hazards(&mut state, Uuid::nil(), 1000);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].player_id, Some(id(1)));
        assert_eq!(events[1].player_id, Some(id(2)));
        assert!(step_hazards(&mut state, Uuid::nil(), 1000 + hazard.rearm_ms - 1).is_empty());
        assert_eq!(step_hazards(&mut state, Uuid::nil(), 1000 + hazard.rearm_ms).len(), 2);
    }

    #[test]
    fn test_powerup_goes_to_one_player_and_respawns() {
        let (catalog, mut state) = room(&[(1, 0.0, 0.0), (2, 0.0, 0.0)]);
        let track = catalog.track("harbor_sprint").cloned().unwrap();
        populate_track(&mut state, &track, &catalog);

        let powerup = state.powerups[0].clone();
        for n in [1, 2] {
            let player = state.players.get_mut(&id(n)).unwrap();
            player.motion.position.x = powerup.position.x;
            player.motion.position.z = powerup.position.y;
        }

        let events = collect_powerups(&mut state, Uuid::nil(), 500);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].player_id, Some(id(1)));
        assert!(has_effect(&state.players[&id(1)].effects, StatusEffectKind::Boost, 500));
        assert!(state.players[&id(2)].effects.is_empty());

        assert!(collect_powerups(&mut state, Uuid::nil(), 500 + powerup.respawn_ms - 1).is_empty());
        assert_eq!(collect_powerups(&mut state, Uuid::nil(), 500 + powerup.respawn_ms).len(), 1);
    }

    #[test]
    fn test_obstacle_stun_event() {
        let (_, mut state) = room(&[(1, 0.0, 0.0)]);
        let event = obstacle_stun(&mut state, Uuid::nil(), id(1), 1000, 50).unwrap();
        assert_eq!(event.kind.name(), "hazard_triggered");
        assert!(has_effect(&state.players[&id(1)].effects, StatusEffectKind::Stun, 1049));
        assert!(obstacle_stun(&mut state, Uuid::nil(), id(7), 1000, 50).is_none());
    }
}
