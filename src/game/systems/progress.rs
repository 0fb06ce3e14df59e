//! Race progress tracking
//!
//! Distance comes from the car's Z position, clamped to the course and
//! slope corrected, and never decreases. Laps and checkpoints advance
//! through [`Track::cross_checkpoints`]. On the final lap the car finishes
//! as soon as its nose reaches the line with every checkpoint cleared.

use tracing::info;

use crate::game::state::{PlayerId, RaceStatus, RoomId, RoomState};
use crate::game::track::Track;
use crate::net::protocol::{RaceEvent, RaceEventKind};

/// Advance one player's progress, returning the events it produced
pub fn advance(
    track: &Track,
    state: &mut RoomState,
    room_id: RoomId,
    player_id: PlayerId,
    now_ms: u64,
) -> Vec<RaceEvent> {
    let already_finished = state.finished_count();
    let Some(player) = state.players.get_mut(&player_id) else {
        return Vec::new();
    };
    if player.progress.is_finished() {
        return Vec::new();
    }

    let z = player.motion.position.z;
    let half_length = player.vehicle.half_length;
    let progress = &mut player.progress;

    let previous = progress.distance;
    let distance = track.distance_for_z(z).max(previous);
    let crossing = track.cross_checkpoints(progress.lap, progress.checkpoint_index, previous, distance);

    let laps_before = progress.lap;
    progress.distance = distance;
    progress.lap = crossing.lap;
    progress.checkpoint_index = crossing.checkpoint_index;
    progress.completed_checkpoints.extend(crossing.cleared.iter().copied());

    let total_laps = track.total_laps();
    let on_final_lap = progress.lap + 1 == total_laps;
    if on_final_lap
        && progress.checkpoint_index >= track.checkpoint_count()
        && z + half_length >= track.track_length()
    {
        progress.distance = track.total_distance();
        progress.lap = total_laps;
        progress.checkpoint_index = 0;
    }

    let mut events: Vec<RaceEvent> = (laps_before + 1..=progress.lap)
        .map(|lap| {
            RaceEvent::new(
                room_id,
                Some(player_id),
                now_ms,
                RaceEventKind::LapCompleted { lap, total_laps },
            )
        })
        .collect();

    if progress.lap < total_laps {
        return events;
    }

    progress.finished_at_ms = Some(now_ms);
    let race_time_ms = now_ms.saturating_sub(state.race.started_at_ms.unwrap_or(now_ms));
    let position = already_finished + 1;
    info!(
        "Player {} ({}) finished in position {} after {}ms",
        player.name, player_id, position, race_time_ms
    );
    events.push(RaceEvent::new(
        room_id,
        Some(player_id),
        now_ms,
        RaceEventKind::PlayerFinished { position, race_time_ms },
    ));

    if state.race.winner.is_none() {
        state.race.winner = Some(player_id);
        state.race.status = RaceStatus::Finished;
        state.race.finished_at_ms = Some(now_ms);
        events.push(RaceEvent::new(
            room_id,
            Some(player_id),
            now_ms,
            RaceEventKind::RaceFinished {
                winner_id: player_id,
                duration_ms: race_time_ms,
            },
        ));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::Catalog;
    use crate::game::state::PlayerState;
    use crate::physics::BodyHandle;
    use uuid::Uuid;

    // proving_ground: 2 laps over 400 m of flat road, one checkpoint mid-lap
    fn setup(players: u128) -> (Track, RoomState) {
        let catalog = Catalog::builtin().unwrap();
        let track = catalog.track("proving_ground").cloned().unwrap();
        let mut state = RoomState::new(track.total_laps());
        let vehicle = catalog.vehicle("sport").cloned().unwrap();
        for n in 1..=players {
            let id = Uuid::from_u128(n);
            state.players.insert(
                id,
                PlayerState::new(id, format!("p{}", n), vehicle.clone(), 0, BodyHandle(n as u32), 0),
            );
        }
        state.race.status = RaceStatus::Running;
        state.race.started_at_ms = Some(1000);
        (track, state)
    }

    fn drive_to(track: &Track, state: &mut RoomState, n: u128, z: f32, now: u64) -> Vec<RaceEvent> {
        let id = Uuid::from_u128(n);
        state.players.get_mut(&id).unwrap().motion.position.z = z;
        advance(track, state, Uuid::nil(), id, now)
    }

    fn kinds(events: &[RaceEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind.name()).collect()
    }

    #[test]
    fn test_distance_never_decreases() {
        let (track, mut state) = setup(1);
        let id = Uuid::from_u128(1);
        let mut last = 0.0;
        for z in [10.0, 50.0, 30.0, -20.0, 49.0, 120.0, 80.0] {
            drive_to(&track, &mut state, 1, z, 2000);
            let distance = state.players[&id].progress.distance;
            assert!(distance >= last, "z {} went back to {}", z, distance);
            last = distance;
        }
        assert_eq!(last, track.distance_for_z(120.0));
    }

    #[test]
    fn test_lap_requires_checkpoints_in_order() {
        let (track, mut state) = setup(1);
        let id = Uuid::from_u128(1);

        assert!(drive_to(&track, &mut state, 1, 90.0, 2000).is_empty());
        assert_eq!(state.players[&id].progress.checkpoint_index, 0);

        assert!(drive_to(&track, &mut state, 1, 150.0, 2100).is_empty());
        assert!(state.players[&id].progress.completed_checkpoints.contains(&(0, 0)));

        let events = drive_to(&track, &mut state, 1, 205.0, 2200);
        assert_eq!(kinds(&events), vec!["lap_completed"]);
        assert_eq!(
            events[0].kind,
            RaceEventKind::LapCompleted { lap: 1, total_laps: 2 }
        );
        assert_eq!(state.players[&id].progress.lap, 1);
    }

    #[test]
    fn test_finish_line_override_on_final_lap() {
        let (track, mut state) = setup(1);
        let id = Uuid::from_u128(1);
        drive_to(&track, &mut state, 1, 320.0, 2000);
        assert_eq!(state.players[&id].progress.lap, 1);

        // Nose over the line while the center is still short of it
        let half_length = state.players[&id].vehicle.half_length;
        let events = drive_to(&track, &mut state, 1, track.track_length() - half_length * 0.5, 61_000);
        assert_eq!(kinds(&events), vec!["lap_completed", "player_finished", "race_finished"]);

        let progress = &state.players[&id].progress;
        assert_eq!(progress.lap, 2);
        assert_eq!(progress.distance, track.total_distance());
        assert_eq!(progress.finished_at_ms, Some(61_000));
        assert_eq!(state.race.status, RaceStatus::Finished);
        assert_eq!(state.race.winner, Some(id));
        assert_eq!(
            events[2].kind,
            RaceEventKind::RaceFinished {
                winner_id: id,
                duration_ms: 60_000
            }
        );
    }

    #[test]
    fn test_only_first_finisher_wins() {
        let (track, mut state) = setup(2);
        drive_to(&track, &mut state, 1, 320.0, 2000);
        drive_to(&track, &mut state, 2, 320.0, 2000);

        let first = drive_to(&track, &mut state, 1, 400.0, 3000);
        assert!(kinds(&first).contains(&"race_finished"));

        let second = drive_to(&track, &mut state, 2, 400.0, 4000);
        assert_eq!(kinds(&second), vec!["lap_completed", "player_finished"]);
        assert_eq!(
            second[1].kind,
            RaceEventKind::PlayerFinished {
                position: 2,
                race_time_ms: 3000
            }
        );
        assert_eq!(state.race.winner, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn test_finished_player_is_frozen() {
        let (track, mut state) = setup(1);
        drive_to(&track, &mut state, 1, 320.0, 2000);
        drive_to(&track, &mut state, 1, 400.0, 3000);
        assert!(drive_to(&track, &mut state, 1, 400.0, 4000).is_empty());
        assert_eq!(state.players[&Uuid::from_u128(1)].progress.finished_at_ms, Some(3000));
    }
}
