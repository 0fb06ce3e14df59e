//! Status effects and their multiplier stacking.
//!
//! Effects are a closed set of kinds. Each kind has a base movement and
//! steering multiplier; active effects combine by multiplication and the
//! product is clamped before the drive model sees it.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::constants::drive::{MAX_MOVEMENT_MULTIPLIER, MAX_STEERING_MULTIPLIER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEffectKind {
    /// Forward speed bonus (nitro, drift exit pads, powerups)
    Boost,
    /// Reduced top speed and steering (puddles, mines)
    Slowed,
    /// Loss of grip from an oil slick
    Slick,
    /// No drive and no steering
    Stun,
    /// Car flipped by a heavy bump, no drive and no steering
    Flip,
}

impl StatusEffectKind {
    /// (movement, steering) at intensity 1.0
    fn base_multipliers(self) -> (f32, f32) {
        match self {
            StatusEffectKind::Boost => (1.4, 1.0),
            StatusEffectKind::Slowed => (0.6, 0.8),
            StatusEffectKind::Slick => (0.75, 0.3),
            StatusEffectKind::Stun => (0.0, 0.0),
            StatusEffectKind::Flip => (0.0, 0.0),
        }
    }

    /// Multipliers scaled by intensity: 0.0 is neutral, 1.0 is the full effect
    pub fn multipliers(self, intensity: f32) -> (f32, f32) {
        let (movement, steering) = self.base_multipliers();
        let t = intensity.max(0.0);
        (1.0 + (movement - 1.0) * t, 1.0 + (steering - 1.0) * t)
    }
}

/// Static description of an effect to apply (from ability/hazard/powerup manifests)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    pub kind: StatusEffectKind,
    pub duration_ms: u64,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
}

fn default_intensity() -> f32 {
    1.0
}

impl EffectSpec {
    pub fn new(kind: StatusEffectKind, duration_ms: u64) -> Self {
        Self {
            kind,
            duration_ms,
            intensity: 1.0,
        }
    }
}

/// A timestamped effect instance on a player
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub kind: StatusEffectKind,
    pub applied_at_ms: u64,
    pub expires_at_ms: u64,
    pub intensity: f32,
}

impl StatusEffect {
    pub fn is_active(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// Per-player effect list, ordered by application time
pub type StatusEffects = SmallVec<[StatusEffect; 4]>;

/// Combined effect multipliers for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Multipliers {
    pub movement: f32,
    pub steering: f32,
}

impl Default for Multipliers {
    fn default() -> Self {
        Self {
            movement: 1.0,
            steering: 1.0,
        }
    }
}

pub fn combined_multipliers(effects: &[StatusEffect]) -> Multipliers {
    let (movement, steering) = effects.iter().fold((1.0_f32, 1.0_f32), |(m, s), effect| {
        let (em, es) = effect.kind.multipliers(effect.intensity);
        (m * em, s * es)
    });
    Multipliers {
        movement: movement.clamp(0.0, MAX_MOVEMENT_MULTIPLIER),
        steering: steering.clamp(0.0, MAX_STEERING_MULTIPLIER),
    }
}

/// Apply `spec` at `now_ms`. An existing effect of the same kind is replaced,
/// so re-applying refreshes the timer instead of stacking.
pub fn apply_effect(effects: &mut StatusEffects, spec: EffectSpec, now_ms: u64) {
    effects.retain(|e| e.kind != spec.kind);
    effects.push(StatusEffect {
        kind: spec.kind,
        applied_at_ms: now_ms,
        expires_at_ms: now_ms.saturating_add(spec.duration_ms),
        intensity: spec.intensity,
    });
}

/// Drop expired effects, returning how many were removed
pub fn expire_effects(effects: &mut StatusEffects, now_ms: u64) -> usize {
    let before = effects.len();
    effects.retain(|e| e.is_active(now_ms));
    before - effects.len()
}

pub fn has_effect(effects: &[StatusEffect], kind: StatusEffectKind, now_ms: u64) -> bool {
    effects.iter().any(|e| e.kind == kind && e.is_active(now_ms))
}
