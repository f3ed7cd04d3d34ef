//! Probabilistic glitch bursts which temporarily override grain scheduling and synthesis.

use rand::Rng;

// -------------------------------------------------------------------------------------------------

/// Engine wide glitch state.
///
/// Advanced once per scheduler tick via [`GlitchState::advance`]. When idle, a burst starts
/// with a probability of `chaos * 0.05` per tick, as long as chaos is above `0.05`. A burst
/// lasts 0.1 - 0.3 seconds and always runs to completion in the mode it started with.
#[derive(Debug, Default, Clone, Copy, PartialEq, strum::Display)]
pub enum GlitchState {
    /// No burst is active.
    #[default]
    Idle,
    /// Dense beat repeat of short grains at a frozen scan offset.
    Stutter {
        end_time: f64,
        /// Scan offset of the burst's first grain, reused for all following grains.
        frozen_offset: Option<f64>,
    },
    /// Grains play backwards.
    Reverse { end_time: f64 },
    /// Grains jump an octave up (factor 2) or down (factor 0.5).
    PitchJump { end_time: f64, factor: f64 },
}

impl GlitchState {
    /// Chaos values at or below this threshold never start a burst.
    pub const CHAOS_THRESHOLD: f64 = 0.05;
    /// Per tick burst probability at full chaos.
    pub const MAX_BURST_PROBABILITY: f64 = 0.05;
    /// Burst duration range in seconds.
    pub const MIN_BURST_DURATION: f64 = 0.1;
    pub const MAX_BURST_DURATION: f64 = 0.3;
    /// Grain size of stutter grains in seconds.
    pub const STUTTER_GRAIN_SIZE: f64 = 0.05;

    /// Returns true when a burst is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Returns true when a stutter burst is running.
    pub fn is_stutter(&self) -> bool {
        matches!(self, Self::Stutter { .. })
    }

    /// Absolute clock time in seconds at which the running burst ends.
    pub fn end_time(&self) -> Option<f64> {
        match *self {
            Self::Idle => None,
            Self::Stutter { end_time, .. }
            | Self::Reverse { end_time }
            | Self::PitchJump { end_time, .. } => Some(end_time),
        }
    }

    /// Advance the state machine. `now` is the absolute clock time in seconds.
    pub fn advance<R: Rng>(&mut self, now: f64, chaos: f64, rng: &mut R) {
        if let Some(end_time) = self.end_time() {
            if now > end_time {
                log::debug!("Glitch burst '{self}' ended at {now:.3}s");
                *self = Self::Idle;
            }
        } else if chaos > Self::CHAOS_THRESHOLD
            && rng.random::<f64>() < chaos.min(1.0) * Self::MAX_BURST_PROBABILITY
        {
            let duration = rng.random_range(Self::MIN_BURST_DURATION..=Self::MAX_BURST_DURATION);
            let end_time = now + duration;
            *self = match rng.random_range(0..3) {
                0 => Self::Stutter {
                    end_time,
                    frozen_offset: None,
                },
                1 => Self::Reverse { end_time },
                _ => Self::PitchJump {
                    end_time,
                    factor: if rng.random_bool(0.5) { 2.0 } else { 0.5 },
                },
            };
            log::debug!("Glitch burst '{self}' started at {now:.3}s for {duration:.3}s");
        }
    }

    /// Playback rate multiplier of the running burst.
    pub fn rate_factor(&self) -> f64 {
        match *self {
            Self::Reverse { .. } => -1.0,
            Self::PitchJump { factor, .. } => factor,
            Self::Idle | Self::Stutter { .. } => 1.0,
        }
    }

    /// Forced grain size of the running burst, if any.
    pub fn grain_size_override(&self) -> Option<f64> {
        if self.is_stutter() {
            Some(Self::STUTTER_GRAIN_SIZE)
        } else {
            None
        }
    }

    /// The frozen scan offset of a running stutter burst, if it got recorded already.
    pub fn frozen_offset(&self) -> Option<f64> {
        match *self {
            Self::Stutter { frozen_offset, .. } => frozen_offset,
            _ => None,
        }
    }

    /// Record the scan offset of a stutter burst's first grain. Does nothing when no stutter
    /// burst is running or when an offset got recorded already.
    pub fn freeze_offset(&mut self, offset: f64) {
        if let Self::Stutter { frozen_offset, .. } = self {
            frozen_offset.get_or_insert(offset);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;

    const TICK: f64 = 0.025;

    #[test]
    fn no_chaos_never_glitches() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut state = GlitchState::Idle;
        for chaos in [0.0, 0.01, GlitchState::CHAOS_THRESHOLD] {
            for tick in 0..100_000 {
                state.advance(tick as f64 * TICK, chaos, &mut rng);
                assert_eq!(state, GlitchState::Idle);
            }
        }
    }

    #[test]
    fn bursts_self_terminate() {
        let mut rng = SmallRng::seed_from_u64(2);
        let mut state = GlitchState::Idle;
        let mut bursts = 0;
        let mut modes = [false; 3];
        let mut now = 0.0;
        let mut burst_start = 0.0;
        while bursts < 200 {
            let was_active = state.is_active();
            state.advance(now, 1.0, &mut rng);
            if !was_active && state.is_active() {
                bursts += 1;
                burst_start = now;
                let duration = state.end_time().unwrap() - now;
                assert!((0.1 - 1e-9..=0.3 + 1e-9).contains(&duration), "{duration}");
                match state {
                    GlitchState::Stutter { frozen_offset, .. } => {
                        assert_eq!(frozen_offset, None);
                        modes[0] = true;
                    }
                    GlitchState::Reverse { .. } => modes[1] = true,
                    GlitchState::PitchJump { factor, .. } => {
                        assert!(factor == 2.0 || factor == 0.5);
                        modes[2] = true;
                    }
                    GlitchState::Idle => unreachable!(),
                }
            } else if was_active {
                let end_time = burst_start + GlitchState::MAX_BURST_DURATION + 1e-9;
                if now > end_time {
                    assert!(!state.is_active(), "burst must end on the first late tick");
                }
            }
            now += TICK;
            assert!(now < 100_000.0, "too few bursts");
        }
        assert_eq!(modes, [true; 3]);
    }

    #[test]
    fn ends_on_first_tick_after_end_time() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut state = GlitchState::Reverse { end_time: 1.0 };
        state.advance(1.0, 0.0, &mut rng);
        assert!(state.is_active());
        state.advance(1.0 + TICK, 0.0, &mut rng);
        assert_eq!(state, GlitchState::Idle);
    }

    #[test]
    fn overrides() {
        let mut stutter = GlitchState::Stutter {
            end_time: 1.0,
            frozen_offset: None,
        };
        assert_eq!(stutter.grain_size_override(), Some(0.05));
        assert_eq!(stutter.rate_factor(), 1.0);
        assert_eq!(stutter.frozen_offset(), None);
        stutter.freeze_offset(0.25);
        stutter.freeze_offset(0.75);
        assert_eq!(stutter.frozen_offset(), Some(0.25));

        let mut reverse = GlitchState::Reverse { end_time: 1.0 };
        reverse.freeze_offset(0.25);
        assert_eq!(reverse.frozen_offset(), None);
        assert_eq!(reverse.rate_factor(), -1.0);
        assert_eq!(reverse.grain_size_override(), None);

        let jump = GlitchState::PitchJump {
            end_time: 1.0,
            factor: 0.5,
        };
        assert_eq!(jump.rate_factor(), 0.5);
        assert_eq!(GlitchState::Idle.rate_factor(), 1.0);
        assert_eq!(jump.to_string(), "PitchJump");
    }
}
