//! Drift state machine
//!
//! GRIPPING -> INITIATING -> DRIFTING -> RECOVERING -> GRIPPING, evaluated
//! once per tick from the current controls and scalar speed. Each tick
//! yields the lateral friction multiplier for the drive step and a one-shot
//! exit boost impulse (zero on all but the first RECOVERING tick).

use crate::config::DriftConfig;
use crate::game::state::{DriftContext, DriftState};
use crate::net::protocol::ControlState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftOutput {
    pub lateral_friction: f32,
    /// Forward impulse (N*s) to apply this tick
    pub boost_impulse: f32,
}

fn enter(ctx: &mut DriftContext, state: DriftState, now_ms: u64) {
    ctx.state = state;
    ctx.state_entered_at_ms = now_ms;
    match state {
        DriftState::Gripping => {
            ctx.accumulated_ms = 0;
            ctx.boost_tier = 0;
            ctx.drift_angle = 0.0;
        }
        DriftState::Drifting => {
            ctx.last_tick_ms = now_ms;
        }
        DriftState::Initiating => {
            ctx.last_qualified_at_ms = now_ms;
        }
        DriftState::Recovering => {
            ctx.drift_angle = 0.0;
        }
    }
}

/// Force the context back to GRIPPING (bumps, restarts)
pub fn reset(ctx: &mut DriftContext, now_ms: u64) {
    enter(ctx, DriftState::Gripping, now_ms);
}

/// Tier earned for a continuous drift duration
pub fn tier_for(accumulated_ms: u64, config: &DriftConfig) -> u8 {
    config
        .tier_thresholds_ms
        .iter()
        .filter(|threshold| accumulated_ms >= **threshold)
        .count() as u8
}

fn lateral_friction(state: DriftState, config: &DriftConfig) -> f32 {
    match state {
        DriftState::Gripping => config.grip_lateral_friction,
        DriftState::Initiating => config.initiating_lateral_friction,
        DriftState::Drifting => config.drifting_lateral_friction,
        DriftState::Recovering => config.recovering_lateral_friction,
    }
}

/// Advance the state machine by one tick
pub fn update(ctx: &mut DriftContext, controls: &ControlState, speed: f32, now_ms: u64, config: &DriftConfig) -> DriftOutput {
    let abs_speed = speed.abs();
    let abs_steering = controls.steering.abs();
    let qualifies = controls.handbrake
        && abs_speed > config.initiation_speed
        && abs_steering > config.initiation_steering;
    let mut boost_impulse = 0.0;

    match ctx.state {
        DriftState::Gripping => {
            if qualifies {
                enter(ctx, DriftState::Initiating, now_ms);
            }
        }
        DriftState::Initiating => {
            if !controls.handbrake || abs_speed < config.initiation_speed * 0.8 {
                enter(ctx, DriftState::Gripping, now_ms);
            } else {
                if qualifies {
                    ctx.last_qualified_at_ms = now_ms;
                }
                if now_ms.saturating_sub(ctx.last_qualified_at_ms) >= config.gripping_timeout_ms {
                    enter(ctx, DriftState::Gripping, now_ms);
                } else if now_ms.saturating_sub(ctx.state_entered_at_ms) >= config.hold_ms {
                    enter(ctx, DriftState::Drifting, now_ms);
                    ctx.drift_angle = controls.steering * config.max_drift_angle;
                }
            }
        }
        DriftState::Drifting => {
            ctx.accumulated_ms += now_ms.saturating_sub(ctx.last_tick_ms);
            ctx.last_tick_ms = now_ms;
            ctx.drift_angle = controls.steering * config.max_drift_angle;
            ctx.boost_tier = ctx.boost_tier.max(tier_for(ctx.accumulated_ms, config));

            if abs_speed < config.initiation_speed * 0.5 {
                // Scrubbed off too much speed: no reward
                enter(ctx, DriftState::Gripping, now_ms);
            } else if !controls.handbrake || abs_steering <= config.neutral_steering {
                let tier = ctx.boost_tier.min(3) as usize;
                boost_impulse = config.tier_boost_impulses[tier];
                ctx.boost_tier = 0;
                enter(ctx, DriftState::Recovering, now_ms);
            }
        }
        DriftState::Recovering => {
            if now_ms.saturating_sub(ctx.state_entered_at_ms) >= config.recovery_ms {
                enter(ctx, DriftState::Gripping, now_ms);
            }
        }
    }

    DriftOutput {
        lateral_friction: lateral_friction(ctx.state, config),
        boost_impulse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP_MS: u64 = 10;

    fn drifting_controls() -> ControlState {
        ControlState {
            throttle: 1.0,
            steering: 0.8,
            handbrake: true,
            ..Default::default()
        }
    }

    /// Run ticks every STEP_MS from `from` (exclusive) to `to` (inclusive)
    fn run(ctx: &mut DriftContext, controls: &ControlState, speed: f32, from: u64, to: u64, config: &DriftConfig) -> Vec<DriftOutput> {
        let mut outputs = Vec::new();
        let mut now = from + STEP_MS;
        while now <= to {
            outputs.push(update(ctx, controls, speed, now, config));
            now += STEP_MS;
        }
        outputs
    }

    /// Enter DRIFTING, returning the time it happened
    fn start_drift(ctx: &mut DriftContext, config: &DriftConfig) -> u64 {
        let mut now = 0;
        while ctx.state != DriftState::Drifting {
            now += STEP_MS;
            update(ctx, &drifting_controls(), 20.0, now, config);
            assert!(now < 1000, "never started drifting");
        }
        now
    }

    #[test]
    fn test_gripping_to_initiating() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        let out = update(&mut ctx, &drifting_controls(), 20.0, 10, &config);
        assert_eq!(ctx.state, DriftState::Initiating);
        assert_eq!(ctx.state_entered_at_ms, 10);
        assert_eq!(out.lateral_friction, config.initiating_lateral_friction);
    }

    #[test]
    fn test_no_initiation_when_slow_or_straight() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        update(&mut ctx, &drifting_controls(), 5.0, 10, &config);
        assert_eq!(ctx.state, DriftState::Gripping);

        let straight = ControlState {
            steering: 0.1,
            ..drifting_controls()
        };
        update(&mut ctx, &straight, 20.0, 20, &config);
        assert_eq!(ctx.state, DriftState::Gripping);
    }

    #[test]
    fn test_initiating_promotes_after_hold() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        let started = start_drift(&mut ctx, &config);
        // Entered INITIATING at 10, promoted once held for hold_ms
        assert_eq!(started, 10 + config.hold_ms);
        assert_eq!(ctx.accumulated_ms, 0);
    }

    #[test]
    fn test_initiating_releases_handbrake() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        update(&mut ctx, &drifting_controls(), 20.0, 10, &config);
        let released = ControlState {
            handbrake: false,
            ..drifting_controls()
        };
        update(&mut ctx, &released, 20.0, 20, &config);
        assert_eq!(ctx.state, DriftState::Gripping);
    }

    #[test]
    fn test_initiating_times_out_without_steering() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        update(&mut ctx, &drifting_controls(), 20.0, 10, &config);

        // Handbrake still held but steering straightened out
        let straight = ControlState {
            steering: 0.0,
            ..drifting_controls()
        };
        let outputs = run(&mut ctx, &straight, 20.0, 10, 10 + config.gripping_timeout_ms, &config);
        assert_eq!(ctx.state, DriftState::Gripping);
        assert!(outputs.iter().all(|o| o.boost_impulse == 0.0));
    }

    #[test]
    fn test_tiers_at_thresholds() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        let start = start_drift(&mut ctx, &config);

        run(&mut ctx, &drifting_controls(), 20.0, start, start + 990, &config);
        assert_eq!(ctx.boost_tier, 0);
        run(&mut ctx, &drifting_controls(), 20.0, start + 990, start + 1000, &config);
        assert_eq!(ctx.boost_tier, 1);
        run(&mut ctx, &drifting_controls(), 20.0, start + 1000, start + 2000, &config);
        assert_eq!(ctx.boost_tier, 2);
        run(&mut ctx, &drifting_controls(), 20.0, start + 2000, start + 3000, &config);
        assert_eq!(ctx.boost_tier, 3);
        run(&mut ctx, &drifting_controls(), 20.0, start + 3000, start + 5000, &config);
        assert_eq!(ctx.boost_tier, 3);
    }

    #[test]
    fn test_tier_never_decreases_while_drifting() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        let start = start_drift(&mut ctx, &config);

        let mut last_tier = 0;
        let mut now = start;
        for i in 0..400 {
            now += STEP_MS;
            // Wobble steering without crossing the neutral band
            let controls = ControlState {
                steering: if i % 2 == 0 { 0.9 } else { -0.5 },
                ..drifting_controls()
            };
            update(&mut ctx, &controls, 20.0, now, &config);
            assert_eq!(ctx.state, DriftState::Drifting);
            assert!(ctx.boost_tier >= last_tier);
            last_tier = ctx.boost_tier;
        }
        assert_eq!(last_tier, 3);
    }

    #[test]
    fn test_exit_boost_fires_once() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        let start = start_drift(&mut ctx, &config);
        run(&mut ctx, &drifting_controls(), 20.0, start, start + 2100, &config);
        assert_eq!(ctx.boost_tier, 2);

        let released = ControlState {
            handbrake: false,
            ..drifting_controls()
        };
        let outputs = run(&mut ctx, &released, 20.0, start + 2100, start + 2400, &config);
        assert_eq!(outputs[0].boost_impulse, config.tier_boost_impulses[2]);
        assert!(outputs[1..].iter().all(|o| o.boost_impulse == 0.0));
        assert_eq!(ctx.boost_tier, 0);
    }

    #[test]
    fn test_recovering_returns_to_gripping() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        let start = start_drift(&mut ctx, &config);
        run(&mut ctx, &drifting_controls(), 20.0, start, start + 500, &config);

        let released = ControlState::default();
        update(&mut ctx, &released, 20.0, start + 510, &config);
        assert_eq!(ctx.state, DriftState::Recovering);
        // Accumulated time survives into RECOVERING
        assert!(ctx.accumulated_ms > 0);

        run(&mut ctx, &released, 20.0, start + 510, start + 510 + config.recovery_ms, &config);
        assert_eq!(ctx.state, DriftState::Gripping);
        assert_eq!(ctx.accumulated_ms, 0);
    }

    #[test]
    fn test_speed_drop_cancels_boost() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        let start = start_drift(&mut ctx, &config);
        run(&mut ctx, &drifting_controls(), 20.0, start, start + 1500, &config);
        assert_eq!(ctx.boost_tier, 1);

        let out = update(&mut ctx, &drifting_controls(), config.initiation_speed * 0.4, start + 1510, &config);
        assert_eq!(ctx.state, DriftState::Gripping);
        assert_eq!(ctx.boost_tier, 0);
        assert_eq!(ctx.accumulated_ms, 0);
        assert_eq!(out.boost_impulse, 0.0);
    }

    #[test]
    fn test_entered_at_only_changes_on_transition() {
        let config = DriftConfig::default();
        let mut ctx = DriftContext::new(0);
        let start = start_drift(&mut ctx, &config);
        run(&mut ctx, &drifting_controls(), 20.0, start, start + 800, &config);
        assert_eq!(ctx.state_entered_at_ms, start);
    }
}
