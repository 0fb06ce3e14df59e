//! Track layout and checkpoint progression.
//!
//! Courses run along +Z from 0 to `track_length`. Laps are laid end to end,
//! so lap `n` covers `[n * lap_length, (n + 1) * lap_length)`. Race distance
//! is measured along the surface: flat Z scaled by the slope correction
//! factor so climbs and descents count their true length.

use serde::{Deserialize, Serialize};

use crate::game::catalog::CatalogError;
use crate::physics::{GroundProfile, PhysicsError};
use crate::util::vec2::Vec2;

/// Straight piece of the course with linear elevation change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSegment {
    /// Length along Z
    pub length: f32,
    pub elevation_start: f32,
    pub elevation_end: f32,
}

/// Something placed once per lap at a fraction of the lap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LapPlacement {
    /// Hazard or powerup manifest id
    pub manifest_id: String,
    /// Lateral world X
    pub x: f32,
    /// Position within the lap, 0.0..1.0
    pub lap_fraction: f32,
}

/// Static sensor obstacle placed once per lap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstaclePlacement {
    pub x: f32,
    pub lap_fraction: f32,
    pub half_width: f32,
    pub half_length: f32,
}

/// Track manifest (static data)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackManifest {
    pub id: String,
    pub total_laps: u32,
    pub segments: Vec<TrackSegment>,
    /// Checkpoints as ascending fractions of a lap, each in (0, 1)
    pub checkpoints: Vec<f32>,
    #[serde(default)]
    pub hazards: Vec<LapPlacement>,
    #[serde(default)]
    pub powerups: Vec<LapPlacement>,
    #[serde(default)]
    pub obstacles: Vec<ObstaclePlacement>,
}

/// Result of feeding a new distance through the checkpoint sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointCrossing {
    pub lap: u32,
    pub checkpoint_index: usize,
    /// Checkpoints cleared during this call, in order, as (lap, index)
    pub cleared: Vec<(u32, usize)>,
    /// Laps completed during this call
    pub laps_completed: u32,
}

/// Validated track with derived measurements
#[derive(Debug, Clone)]
pub struct Track {
    manifest: TrackManifest,
    track_length: f32,
    lap_length: f32,
    slope_factor: f32,
}

impl Track {
    pub fn from_manifest(manifest: TrackManifest) -> Result<Self, CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidTrack {
            id: manifest.id.clone(),
            reason: reason.to_string(),
        };

        if manifest.total_laps == 0 {
            return Err(invalid("total_laps must be at least 1"));
        }
        if manifest.segments.is_empty() {
            return Err(invalid("track has no segments"));
        }
        if manifest
            .segments
            .iter()
            .any(|s| !(s.length > 0.0) || !s.elevation_start.is_finite() || !s.elevation_end.is_finite())
        {
            return Err(invalid("segments need positive length and finite elevation"));
        }
        if manifest.checkpoints.iter().any(|c| !(*c > 0.0 && *c < 1.0))
            || manifest.checkpoints.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(invalid("checkpoints must be ascending fractions in (0, 1)"));
        }

        let track_length: f32 = manifest.segments.iter().map(|s| s.length).sum();
        let surface_length: f32 = manifest
            .segments
            .iter()
            .map(|s| {
                let rise = s.elevation_end - s.elevation_start;
                (s.length * s.length + rise * rise).sqrt()
            })
            .sum();

        Ok(Self {
            lap_length: track_length / manifest.total_laps as f32,
            slope_factor: surface_length / track_length,
            track_length,
            manifest,
        })
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn manifest(&self) -> &TrackManifest {
        &self.manifest
    }

    pub fn total_laps(&self) -> u32 {
        self.manifest.total_laps
    }

    /// Flat length along Z
    pub fn track_length(&self) -> f32 {
        self.track_length
    }

    pub fn lap_length(&self) -> f32 {
        self.lap_length
    }

    /// Surface length / flat length over the whole course
    pub fn slope_factor(&self) -> f32 {
        self.slope_factor
    }

    /// Race distance at the finish line
    pub fn total_distance(&self) -> f32 {
        self.track_length * self.slope_factor
    }

    pub fn checkpoint_count(&self) -> usize {
        self.manifest.checkpoints.len()
    }

    /// Elevation of the whole course if it is flat
    pub fn flat_elevation(&self) -> Option<f32> {
        let first = self.manifest.segments[0].elevation_start;
        self.manifest
            .segments
            .iter()
            .all(|s| s.elevation_start == first && s.elevation_end == first)
            .then_some(first)
    }

    /// Surface elevation at `z`, flat past either end of the course
    pub fn elevation_at(&self, z: f32) -> f32 {
        let mut start = 0.0;
        for segment in &self.manifest.segments {
            let end = start + segment.length;
            if z < end {
                let t = ((z - start) / segment.length).max(0.0);
                return segment.elevation_start + (segment.elevation_end - segment.elevation_start) * t;
            }
            start = end;
        }
        self.manifest.segments[self.manifest.segments.len() - 1].elevation_end
    }

    pub fn ground_profile(&self) -> Result<GroundProfile, PhysicsError> {
        let mut points = Vec::with_capacity(self.manifest.segments.len() + 1);
        let mut z = 0.0;
        for segment in &self.manifest.segments {
            points.push((z, segment.elevation_start));
            z += segment.length;
            points.push((z, segment.elevation_end));
        }
        GroundProfile::new(points)
    }

    /// Race distance for a raw Z position: clamped to the course, slope corrected
    pub fn distance_for_z(&self, z: f32) -> f32 {
        z.clamp(0.0, self.track_length) * self.slope_factor
    }

    /// Race distance of checkpoint `index` on lap `lap`
    pub fn checkpoint_distance(&self, lap: u32, index: usize) -> f32 {
        let fraction = self.manifest.checkpoints[index];
        (lap as f32 + fraction) * self.lap_length * self.slope_factor
    }

    /// Race distance at the end of lap `lap`
    pub fn lap_end_distance(&self, lap: u32) -> f32 {
        if lap + 1 >= self.total_laps() {
            self.total_distance()
        } else {
            (lap + 1) as f32 * self.lap_length * self.slope_factor
        }
    }

    /// Advance lap/checkpoint state from `previous_distance` to `new_distance`.
    ///
    /// Checkpoints must be cleared in order and a lap only completes once
    /// every checkpoint of that lap is cleared. Pure: callers own the state.
    pub fn cross_checkpoints(
        &self,
        lap: u32,
        checkpoint_index: usize,
        previous_distance: f32,
        new_distance: f32,
    ) -> CheckpointCrossing {
        let mut crossing = CheckpointCrossing {
            lap,
            checkpoint_index,
            ..Default::default()
        };
        if new_distance < previous_distance {
            return crossing;
        }

        while crossing.lap < self.total_laps() {
            if crossing.checkpoint_index < self.checkpoint_count() {
                let target = self.checkpoint_distance(crossing.lap, crossing.checkpoint_index);
                if new_distance < target {
                    break;
                }
                crossing.cleared.push((crossing.lap, crossing.checkpoint_index));
                crossing.checkpoint_index += 1;
            } else {
                if new_distance < self.lap_end_distance(crossing.lap) {
                    break;
                }
                crossing.lap += 1;
                crossing.checkpoint_index = 0;
                crossing.laps_completed += 1;
            }
        }

        crossing
    }

    /// World position of a per-lap placement on lap `lap`
    pub fn placement_position(&self, lap: u32, x: f32, lap_fraction: f32) -> Vec2 {
        Vec2::new(x, (lap as f32 + lap_fraction) * self.lap_length)
    }
}
