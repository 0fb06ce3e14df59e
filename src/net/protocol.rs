use serde::{Deserialize, Serialize};

use crate::game::effects::StatusEffectKind;
use crate::game::state::{EntityId, PlayerId, RoomId};
use crate::net::snapshot::RoomSnapshot;

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Sequenced control frame
    Input(InputFrame),
    /// Explicit ability activation
    Ability(AbilityRequest),
    /// Ping for latency measurement
    Ping { timestamp: u64 },
    /// Request to leave the room
    Leave,
}

/// Messages from server to client (JSON encoded)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot(RoomSnapshot),
    Events(Vec<RaceEvent>),
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

/// Control snapshot for one input frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    /// -1 (full reverse) to 1 (full throttle)
    pub throttle: f32,
    /// -1 to 1
    pub steering: f32,
    pub brake: bool,
    pub handbrake: bool,
    /// Vehicle boost ability button
    pub boost: bool,
    /// Vehicle deploy ability button
    pub deploy: bool,
}

impl ControlState {
    /// Clamp analog axes to [-1, 1]; non-finite values become 0
    pub fn sanitized(self) -> Self {
        let axis = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            throttle: axis(self.throttle),
            steering: axis(self.steering),
            ..self
        }
    }
}

/// Player input frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Monotonically increasing per player
    pub sequence: u64,
    pub controls: ControlState,
}

impl InputFrame {
    pub fn new(sequence: u64, controls: ControlState) -> Self {
        Self { sequence, controls }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityRequest {
    pub ability_id: String,
    /// Explicit projectile target; nearest opponent when absent
    #[serde(default)]
    pub target: Option<PlayerId>,
}

impl AbilityRequest {
    pub fn new(ability_id: impl Into<String>) -> Self {
        Self {
            ability_id: ability_id.into(),
            target: None,
        }
    }
}

/// What set off a `hazard_triggered` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Hazard,
    Deployable,
    Obstacle,
}

/// Discrete race event with kind-specific metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceEvent {
    pub room_id: RoomId,
    /// Acting player, if any
    pub player_id: Option<PlayerId>,
    pub server_time_ms: u64,
    #[serde(flatten)]
    pub kind: RaceEventKind,
}

impl RaceEvent {
    pub fn new(room_id: RoomId, player_id: Option<PlayerId>, server_time_ms: u64, kind: RaceEventKind) -> Self {
        Self {
            room_id,
            player_id,
            server_time_ms,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "metadata", rename_all = "snake_case")]
pub enum RaceEventKind {
    RaceStarted {
        track_id: String,
        total_laps: u32,
        player_count: usize,
    },
    RaceFinished {
        winner_id: PlayerId,
        duration_ms: u64,
    },
    LapCompleted {
        /// Completed laps including this one
        lap: u32,
        total_laps: u32,
    },
    PlayerFinished {
        /// 1-based finishing position
        position: usize,
        race_time_ms: u64,
    },
    CollisionBump {
        rammer_id: PlayerId,
        victim_id: PlayerId,
        flipped: bool,
        stunned: bool,
        drive_lock_ms: u64,
        impact_speed: f32,
    },
    HazardTriggered {
        source: TriggerSource,
        hazard_id: String,
        entity_id: Option<EntityId>,
        effect: StatusEffectKind,
    },
    PowerupCollected {
        powerup_id: String,
        entity_id: EntityId,
        effect: StatusEffectKind,
    },
    AbilityActivated {
        ability_id: String,
        target_id: Option<PlayerId>,
        entity_id: Option<EntityId>,
    },
    ProjectileHit {
        projectile_id: EntityId,
        owner_id: PlayerId,
        target_id: PlayerId,
    },
}

impl RaceEventKind {
    /// Wire name of the kind
    pub fn name(&self) -> &'static str {
        match self {
            RaceEventKind::RaceStarted { .. } => "race_started",
            RaceEventKind::RaceFinished { .. } => "race_finished",
            RaceEventKind::LapCompleted { .. } => "lap_completed",
            RaceEventKind::PlayerFinished { .. } => "player_finished",
            RaceEventKind::CollisionBump { .. } => "collision_bump",
            RaceEventKind::HazardTriggered { .. } => "hazard_triggered",
            RaceEventKind::PowerupCollected { .. } => "powerup_collected",
            RaceEventKind::AbilityActivated { .. } => "ability_activated",
            RaceEventKind::ProjectileHit { .. } => "projectile_hit",
        }
    }
}

/// Encode a client message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a client message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

/// Encode a server message as JSON for the broadcaster
pub fn encode_json<T: Serialize>(message: &T) -> Result<String, EncodeError> {
    serde_json::to_string(message).map_err(|e| EncodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_client_message_input() {
        let frame = InputFrame::new(
            42,
            ControlState {
                throttle: 0.5,
                steering: -0.3,
                handbrake: true,
                ..Default::default()
            },
        );
        let encoded = encode(&ClientMessage::Input(frame)).unwrap();
        let decoded: ClientMessage = decode(&encoded).unwrap();
        match decoded {
            ClientMessage::Input(f) => {
                assert_eq!(f.sequence, 42);
                assert!(f.controls.handbrake);
                assert_eq!(f.controls.steering, -0.3);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_client_message_ability_with_target() {
        let target = Uuid::from_u128(7);
        let msg = ClientMessage::Ability(AbilityRequest {
            ability_id: "homing_missile".to_string(),
            target: Some(target),
        });
        let decoded: ClientMessage = decode(&encode(&msg).unwrap()).unwrap();
        match decoded {
            ClientMessage::Ability(req) => {
                assert_eq!(req.ability_id, "homing_missile");
                assert_eq!(req.target, Some(target));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode::<ClientMessage>(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }

    #[test]
    fn test_sanitized_controls() {
        let controls = ControlState {
            throttle: 3.0,
            steering: f32::NAN,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(controls.throttle, 1.0);
        assert_eq!(controls.steering, 0.0);
    }

    #[test]
    fn test_race_event_json_shape() {
        let event = RaceEvent::new(
            Uuid::from_u128(1),
            Some(Uuid::from_u128(2)),
            1234,
            RaceEventKind::LapCompleted { lap: 1, total_laps: 3 },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "lap_completed");
        assert_eq!(value["metadata"]["lap"], 1);
        assert_eq!(value["server_time_ms"], 1234);
        assert_eq!(event.kind.name(), "lap_completed");
    }

    #[test]
    fn test_player_less_event_serializes_null_player() {
        let event = RaceEvent::new(
            Uuid::from_u128(1),
            None,
            0,
            RaceEventKind::RaceStarted {
                track_id: "harbor_sprint".to_string(),
                total_laps: 3,
                player_count: 4,
            },
        );
        let json = encode_json(&event).unwrap();
        assert!(json.contains("\"player_id\":null"));
        assert!(json.contains("\"kind\":\"race_started\""));
    }

    #[test]
    fn test_server_message_envelopes() {
        let pong = ServerMessage::Pong {
            client_timestamp: 10,
            server_timestamp: 25,
        };
        let value = serde_json::to_value(&pong).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["payload"]["client_timestamp"], 10);

        let events = ServerMessage::Events(vec![RaceEvent::new(
            Uuid::from_u128(1),
            Some(Uuid::from_u128(2)),
            500,
            RaceEventKind::LapCompleted { lap: 1, total_laps: 2 },
        )]);
        let value: serde_json::Value = serde_json::from_str(&encode_json(&events).unwrap()).unwrap();
        assert_eq!(value["type"], "events");
        assert_eq!(value["payload"][0]["kind"], "lap_completed");
    }

    #[test]
    fn test_ping_and_leave_decode() {
        let ping: ClientMessage = decode(&encode(&ClientMessage::Ping { timestamp: 99 }).unwrap()).unwrap();
        assert!(matches!(ping, ClientMessage::Ping { timestamp: 99 }));
        let leave: ClientMessage = decode(&encode(&ClientMessage::Leave).unwrap()).unwrap();
        assert!(matches!(leave, ClientMessage::Leave));
    }
}
