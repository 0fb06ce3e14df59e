//! Read-only static game data: vehicle classes, abilities, hazards,
//! powerups and tracks.
//!
//! A room holds an `Arc<Catalog>` and only ever performs lookups on it.

use serde::{Deserialize, Serialize};

use crate::game::effects::{EffectSpec, StatusEffectKind};
use crate::game::track::{LapPlacement, ObstaclePlacement, Track, TrackManifest, TrackSegment};

/// Track used when a room asks for an id the catalog does not know
pub const DEFAULT_TRACK_ID: &str = "harbor_sprint";

/// Vehicle class physics parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleClass {
    pub id: String,
    pub mass: f32,
    pub max_forward_speed: f32,
    pub max_reverse_speed: f32,
    /// Forward acceleration (m/s^2)
    pub acceleration: f32,
    /// Coasting deceleration (m/s^2)
    pub friction: f32,
    /// Yaw rate at full steering (rad/s)
    pub turn_speed: f32,
    /// No steering below this |speed|
    pub min_turn_speed: f32,
    pub half_width: f32,
    pub half_height: f32,
    pub half_length: f32,
    /// Ability fired by the boost button
    #[serde(default)]
    pub boost_ability: Option<String>,
    /// Ability fired by the deploy button
    #[serde(default)]
    pub deploy_ability: Option<String>,
}

impl VehicleClass {
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("mass", self.mass),
            ("max_forward_speed", self.max_forward_speed),
            ("acceleration", self.acceleration),
            ("half_width", self.half_width),
            ("half_height", self.half_height),
            ("half_length", self.half_length),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{} must be positive, got {}", name, value));
            }
        }
        let non_negative = [
            ("max_reverse_speed", self.max_reverse_speed),
            ("friction", self.friction),
            ("turn_speed", self.turn_speed),
            ("min_turn_speed", self.min_turn_speed),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(format!("{} must not be negative, got {}", name, value));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployableKind {
    OilSlick,
    Mine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AbilityKind {
    /// Homing projectile that stuns on hit
    HomingProjectile { stun_ms: u64 },
    /// One-shot trap dropped behind the owner
    Deployable {
        deployable: DeployableKind,
        radius: f32,
        lifetime_ticks: u32,
        effect: EffectSpec,
    },
    /// Effect applied to the activating player
    SelfEffect { effect: EffectSpec },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityManifest {
    pub id: String,
    pub cooldown_ms: u64,
    pub kind: AbilityKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardManifest {
    pub id: String,
    pub radius: f32,
    pub effect: EffectSpec,
    /// Time before a triggered hazard can trigger again
    pub rearm_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerupManifest {
    pub id: String,
    pub radius: f32,
    pub effect: EffectSpec,
    /// Time before a collected powerup reappears
    pub respawn_ms: u64,
}

/// Catalog errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to parse catalog: {0}")]
    Parse(String),
    #[error("Duplicate {kind} id '{id}'")]
    Duplicate { kind: &'static str, id: String },
    #[error("Invalid vehicle '{id}': {reason}")]
    InvalidVehicle { id: String, reason: String },
    #[error("Invalid track '{id}': {reason}")]
    InvalidTrack { id: String, reason: String },
    #[error("Track '{track}' references unknown {kind} '{id}'")]
    UnknownReference {
        track: String,
        kind: &'static str,
        id: String,
    },
    #[error("Catalog has no default track '{0}'")]
    MissingDefaultTrack(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogManifest {
    #[serde(default)]
    vehicles: Vec<VehicleClass>,
    #[serde(default)]
    abilities: Vec<AbilityManifest>,
    #[serde(default)]
    hazards: Vec<HazardManifest>,
    #[serde(default)]
    powerups: Vec<PowerupManifest>,
    #[serde(default)]
    tracks: Vec<TrackManifest>,
}

/// Validated static data tables
#[derive(Debug, Clone)]
pub struct Catalog {
    vehicles: Vec<VehicleClass>,
    abilities: Vec<AbilityManifest>,
    hazards: Vec<HazardManifest>,
    powerups: Vec<PowerupManifest>,
    tracks: Vec<Track>,
    default_track: usize,
}

impl Catalog {
    /// Built-in vehicles, abilities and tracks
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_manifest(builtin_manifest())
    }

    /// Parse a JSON manifest bundle. The bundle must contain the default track.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let manifest: CatalogManifest =
            serde_json::from_str(json).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::from_manifest(manifest)
    }

    fn from_manifest(manifest: CatalogManifest) -> Result<Self, CatalogError> {
        check_unique("vehicle", manifest.vehicles.iter().map(|v| v.id.as_str()))?;
        check_unique("ability", manifest.abilities.iter().map(|a| a.id.as_str()))?;
        check_unique("hazard", manifest.hazards.iter().map(|h| h.id.as_str()))?;
        check_unique("powerup", manifest.powerups.iter().map(|p| p.id.as_str()))?;
        check_unique("track", manifest.tracks.iter().map(|t| t.id.as_str()))?;

        for vehicle in &manifest.vehicles {
            vehicle.validate().map_err(|reason| CatalogError::InvalidVehicle {
                id: vehicle.id.clone(),
                reason,
            })?;
        }

        let mut tracks = Vec::with_capacity(manifest.tracks.len());
        for track in manifest.tracks {
            for placement in &track.hazards {
                if !manifest.hazards.iter().any(|h| h.id == placement.manifest_id) {
                    return Err(CatalogError::UnknownReference {
                        track: track.id.clone(),
                        kind: "hazard",
                        id: placement.manifest_id.clone(),
                    });
                }
            }
            for placement in &track.powerups {
                if !manifest.powerups.iter().any(|p| p.id == placement.manifest_id) {
                    return Err(CatalogError::UnknownReference {
                        track: track.id.clone(),
                        kind: "powerup",
                        id: placement.manifest_id.clone(),
                    });
                }
            }
            tracks.push(Track::from_manifest(track)?);
        }

        let default_track = tracks
            .iter()
            .position(|t| t.id() == DEFAULT_TRACK_ID)
            .ok_or_else(|| CatalogError::MissingDefaultTrack(DEFAULT_TRACK_ID.to_string()))?;

        Ok(Self {
            vehicles: manifest.vehicles,
            abilities: manifest.abilities,
            hazards: manifest.hazards,
            powerups: manifest.powerups,
            tracks,
            default_track,
        })
    }

    pub fn vehicle(&self, id: &str) -> Option<&VehicleClass> {
        self.vehicles.iter().find(|v| v.id == id)
    }

    pub fn ability(&self, id: &str) -> Option<&AbilityManifest> {
        self.abilities.iter().find(|a| a.id == id)
    }

    pub fn hazard(&self, id: &str) -> Option<&HazardManifest> {
        self.hazards.iter().find(|h| h.id == id)
    }

    pub fn powerup(&self, id: &str) -> Option<&PowerupManifest> {
        self.powerups.iter().find(|p| p.id == id)
    }

    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    /// Look up a track, falling back to the default track for unknown ids
    pub fn track_or_default(&self, id: &str) -> &Track {
        if let Some(track) = self.track(id) {
            return track;
        }
        tracing::warn!("Unknown track '{}', falling back to '{}'", id, DEFAULT_TRACK_ID);
        &self.tracks[self.default_track]
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = &str> {
        self.vehicles.iter().map(|v| v.id.as_str())
    }
}

fn check_unique<'a>(kind: &'static str, ids: impl Iterator<Item = &'a str>) -> Result<(), CatalogError> {
    let mut seen = std::collections::BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(CatalogError::Duplicate {
                kind,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

fn vehicle(
    id: &str,
    mass: f32,
    max_forward_speed: f32,
    acceleration: f32,
    turn_speed: f32,
    half_extents: (f32, f32, f32),
) -> VehicleClass {
    VehicleClass {
        id: id.to_string(),
        mass,
        max_forward_speed,
        max_reverse_speed: max_forward_speed * 0.35,
        acceleration,
        friction: 6.0,
        turn_speed,
        min_turn_speed: 1.5,
        half_width: half_extents.0,
        half_height: half_extents.1,
        half_length: half_extents.2,
        boost_ability: Some("nitro".to_string()),
        deploy_ability: Some("oil_slick".to_string()),
    }
}

fn builtin_manifest() -> CatalogManifest {
    let flat = |length: f32, elevation: f32| TrackSegment {
        length,
        elevation_start: elevation,
        elevation_end: elevation,
    };
    let ramp = |length: f32, from: f32, to: f32| TrackSegment {
        length,
        elevation_start: from,
        elevation_end: to,
    };
    let place = |id: &str, x: f32, lap_fraction: f32| LapPlacement {
        manifest_id: id.to_string(),
        x,
        lap_fraction,
    };

    let mut missile_car = vehicle("interceptor", 1250.0, 36.0, 15.0, 2.1, (1.0, 0.7, 2.1));
    missile_car.deploy_ability = Some("homing_missile".to_string());

    CatalogManifest {
        vehicles: vec![
            vehicle("sport", 1050.0, 40.0, 18.0, 2.4, (0.95, 0.65, 2.0)),
            vehicle("balanced", 1300.0, 36.0, 14.0, 2.1, (1.0, 0.7, 2.2)),
            vehicle("truck", 1800.0, 30.0, 10.0, 1.6, (1.2, 0.9, 2.6)),
            missile_car,
        ],
        abilities: vec![
            AbilityManifest {
                id: "homing_missile".to_string(),
                cooldown_ms: 6000,
                kind: AbilityKind::HomingProjectile { stun_ms: 1200 },
            },
            AbilityManifest {
                id: "oil_slick".to_string(),
                cooldown_ms: 5000,
                kind: AbilityKind::Deployable {
                    deployable: DeployableKind::OilSlick,
                    radius: 2.5,
                    lifetime_ticks: 600,
                    effect: EffectSpec::new(StatusEffectKind::Slick, 1500),
                },
            },
            AbilityManifest {
                id: "mine".to_string(),
                cooldown_ms: 8000,
                kind: AbilityKind::Deployable {
                    deployable: DeployableKind::Mine,
                    radius: 2.0,
                    lifetime_ticks: 900,
                    effect: EffectSpec::new(StatusEffectKind::Stun, 1000),
                },
            },
            AbilityManifest {
                id: "nitro".to_string(),
                cooldown_ms: 7000,
                kind: AbilityKind::SelfEffect {
                    effect: EffectSpec::new(StatusEffectKind::Boost, 1500),
                },
            },
        ],
        hazards: vec![
            HazardManifest {
                id: "puddle".to_string(),
                radius: 3.0,
                effect: EffectSpec::new(StatusEffectKind::Slowed, 1200),
                rearm_ms: 1000,
            },
            HazardManifest {
                id: "spike_strip".to_string(),
                radius: 2.0,
                effect: EffectSpec::new(StatusEffectKind::Stun, 800),
                rearm_ms: 3000,
            },
        ],
        powerups: vec![PowerupManifest {
            id: "boost_pad".to_string(),
            radius: 2.5,
            effect: EffectSpec::new(StatusEffectKind::Boost, 1000),
            respawn_ms: 4000,
        }],
        tracks: vec![
            TrackManifest {
                id: DEFAULT_TRACK_ID.to_string(),
                total_laps: 3,
                segments: vec![
                    flat(300.0, 0.0),
                    ramp(200.0, 0.0, 12.0),
                    flat(200.0, 12.0),
                    ramp(200.0, 12.0, 0.0),
                    flat(300.0, 0.0),
                ],
                checkpoints: vec![0.25, 0.5, 0.75],
                hazards: vec![place("puddle", -3.0, 0.4), place("spike_strip", 4.0, 0.7)],
                powerups: vec![place("boost_pad", 0.0, 0.15), place("boost_pad", 5.0, 0.55)],
                obstacles: vec![ObstaclePlacement {
                    x: 7.0,
                    lap_fraction: 0.85,
                    half_width: 1.0,
                    half_length: 1.0,
                }],
            },
            TrackManifest {
                id: "proving_ground".to_string(),
                total_laps: 2,
                segments: vec![flat(400.0, 0.0)],
                checkpoints: vec![0.5],
                hazards: Vec::new(),
                powerups: Vec::new(),
                obstacles: Vec::new(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.vehicle("truck").is_some());
        assert!(catalog.ability("homing_missile").is_some());
        assert!(catalog.track(DEFAULT_TRACK_ID).is_some());
    }

    #[test]
    fn test_vehicle_abilities_exist() {
        let catalog = Catalog::builtin().unwrap();
        for id in catalog.vehicle_ids() {
            let vehicle = catalog.vehicle(id).unwrap();
            for ability in [&vehicle.boost_ability, &vehicle.deploy_ability].into_iter().flatten() {
                assert!(catalog.ability(ability).is_some(), "{} -> {}", id, ability);
            }
        }
    }

    #[test]
    fn test_unknown_track_falls_back_to_default() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(catalog.track_or_default("moon_base").id(), DEFAULT_TRACK_ID);
        assert_eq!(catalog.track_or_default("proving_ground").id(), "proving_ground");
    }

    #[test]
    fn test_unknown_lookups_are_none() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.vehicle("hovercraft").is_none());
        assert!(catalog.ability("laser").is_none());
    }

    #[test]
    fn test_from_json_requires_default_track() {
        let result = Catalog::from_json(r#"{"vehicles": []}"#);
        assert!(matches!(result, Err(CatalogError::MissingDefaultTrack(_))));
    }

    #[test]
    fn test_from_json_rejects_duplicates() {
        let json = r#"{
            "abilities": [
                {"id": "nitro", "cooldown_ms": 1, "kind": {"type": "self_effect", "effect": {"kind": "boost", "duration_ms": 10}}},
                {"id": "nitro", "cooldown_ms": 1, "kind": {"type": "self_effect", "effect": {"kind": "boost", "duration_ms": 10}}}
            ]
        }"#;
        assert!(matches!(
            Catalog::from_json(json),
            Err(CatalogError::Duplicate { kind: "ability", .. })
        ));
    }

    #[test]
    fn test_from_json_minimal_bundle() {
        let json = r#"{
            "vehicles": [{
                "id": "kart", "mass": 300.0, "max_forward_speed": 20.0, "max_reverse_speed": 5.0,
                "acceleration": 10.0, "friction": 4.0, "turn_speed": 2.0, "min_turn_speed": 1.0,
                "half_width": 0.6, "half_height": 0.4, "half_length": 1.0
            }],
            "tracks": [{
                "id": "harbor_sprint", "total_laps": 1,
                "segments": [{"length": 100.0, "elevation_start": 0.0, "elevation_end": 0.0}],
                "checkpoints": [0.5]
            }]
        }"#;
        let catalog = Catalog::from_json(json).unwrap();
        assert!(catalog.vehicle("kart").unwrap().boost_ability.is_none());
        assert_eq!(catalog.track_or_default("x").total_laps(), 1);
    }

    #[test]
    fn test_vehicle_with_bad_mass_or_extents_rejected() {
        let mut manifest = builtin_manifest();
        manifest.vehicles[0].mass = 0.0;
        assert!(matches!(
            Catalog::from_manifest(manifest),
            Err(CatalogError::InvalidVehicle { .. })
        ));

        let mut manifest = builtin_manifest();
        manifest.vehicles[1].half_length = -1.0;
        match Catalog::from_manifest(manifest) {
            Err(CatalogError::InvalidVehicle { reason, .. }) => assert!(reason.contains("half_length")),
            other => panic!("expected InvalidVehicle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_track_with_unknown_hazard_rejected() {
        let mut manifest = builtin_manifest();
        manifest.hazards.clear();
        assert!(matches!(
            Catalog::from_manifest(manifest),
            Err(CatalogError::UnknownReference { kind: "hazard", .. })
        ));
    }
}
