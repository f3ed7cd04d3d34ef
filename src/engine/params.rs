//! Plain parameter data, owned and supplied by the engine's clients.

use std::sync::Arc;

use crate::{utils::unique_usize_id, AudioBuffer};

// -------------------------------------------------------------------------------------------------

/// Unique identifier of an [`AudioOrb`].
pub type OrbId = usize;

// -------------------------------------------------------------------------------------------------

/// Engine wide parameters. Replaced as a whole via
/// [`Engine::update_global_params`](crate::Engine::update_global_params).
///
/// Values are clamped where they are used, so out of range values never are rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalParams {
    /// Glitch probability driver in range \[0, 1\]. Values <= 0.05 disable glitches.
    pub chaos: f64,
    /// Delay send, feedback and stereo width driver in range \[0, 1\].
    pub space: f64,
    /// Master output gain in range \[0, 2\].
    pub output_gain: f64,
    /// Master tempo in beats per minute.
    pub master_bpm: f64,
    /// Quantize grain timing, LFO rates, delay time and orb pitches to the master tempo.
    pub beat_sync: bool,
}

impl GlobalParams {
    /// Fallback tempo for invalid master tempos.
    pub const DEFAULT_BPM: f64 = 120.0;

    /// Tempo used for beat synced timing: the master tempo, or 120 BPM when the master tempo
    /// is not a positive number.
    pub fn effective_bpm(&self) -> f64 {
        if self.master_bpm.is_finite() && self.master_bpm > 0.0 {
            self.master_bpm
        } else {
            Self::DEFAULT_BPM
        }
    }

    /// Duration of a single beat (a quarter note) in seconds.
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.effective_bpm()
    }
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            chaos: 0.0,
            space: 0.3,
            output_gain: 0.8,
            master_bpm: 120.0,
            beat_sync: false,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// The single grain parameter an orb's LFO modulates.
#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[strum(serialize_all = "camelCase")]
pub enum LfoTarget {
    #[default]
    None,
    Position,
    GrainSize,
    Density,
    Pitch,
    Volume,
}

// -------------------------------------------------------------------------------------------------

/// Per orb granular synthesis parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GranularParams {
    /// Grain length in seconds.
    pub grain_size: f64,
    /// Grain density in range \[0, 1\]: how many grains per second get spawned.
    pub grain_density: f64,
    /// Scan position in range \[0, 1\], as fraction of the buffer's duration.
    pub position: f64,
    /// Amount of random detune in range \[0, 1\], as fraction of +/- 2400 cents.
    pub random_pitch: f64,
    /// LFO rate in Hz.
    pub lfo_rate: f64,
    /// LFO depth in range \[0, 1\].
    pub lfo_depth: f64,
    /// Grain amplitude. Negative values are treated as silence.
    pub volume: f64,
    /// The parameter the LFO modulates.
    pub lfo_target: LfoTarget,
}

impl Default for GranularParams {
    fn default() -> Self {
        Self {
            grain_size: 0.1,
            grain_density: 0.5,
            position: 0.5,
            random_pitch: 0.0,
            lfo_rate: 0.5,
            lfo_depth: 0.0,
            volume: 1.0,
            lfo_target: LfoTarget::None,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A grain emitter: a decoded sample buffer plus the parameters to carve grains out of it.
///
/// The buffer is shared read-only with all grain voices the orb spawns. Orbs without a buffer
/// (e.g. while their file is still decoding) are scheduled, but never produce grains.
#[derive(Debug, Clone)]
pub struct AudioOrb {
    pub id: OrbId,
    pub buffer: Option<Arc<AudioBuffer>>,
    pub params: GranularParams,
    /// The buffer's tempo, as detected by [`detect_bpm`](crate::engine::tempo::detect_bpm).
    pub detected_bpm: Option<f64>,
}

impl AudioOrb {
    /// Create a new orb with a new unique id.
    pub fn new(buffer: Option<Arc<AudioBuffer>>, params: GranularParams) -> Self {
        Self::with_id(unique_usize_id(), buffer, params)
    }

    /// Create a new orb with the given id, e.g. to update an existing orb.
    pub fn with_id(id: OrbId, buffer: Option<Arc<AudioBuffer>>, params: GranularParams) -> Self {
        Self {
            id,
            buffer,
            params,
            detected_bpm: None,
        }
    }

    /// Set the buffer's detected tempo.
    #[must_use]
    pub fn with_detected_bpm(mut self, bpm: f64) -> Self {
        self.detected_bpm = Some(bpm);
        self
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::VariantNames;

    use super::*;

    #[test]
    fn lfo_target_names() {
        assert_eq!(LfoTarget::GrainSize.to_string(), "grainSize");
        assert_eq!(LfoTarget::from_str("density"), Ok(LfoTarget::Density));
        assert_eq!(LfoTarget::from_str("none"), Ok(LfoTarget::None));
        assert!(LfoTarget::from_str("grain_size").is_err());
        assert_eq!(
            LfoTarget::VARIANTS,
            &["none", "position", "grainSize", "density", "pitch", "volume"]
        );
    }

    #[test]
    fn orbs() {
        let a = AudioOrb::new(None, GranularParams::default());
        let b = AudioOrb::new(None, GranularParams::default());
        assert_ne!(a.id, b.id);
        let c = AudioOrb::with_id(a.id, None, GranularParams::default()).with_detected_bpm(90.0);
        assert_eq!(c.id, a.id);
        assert_eq!(c.detected_bpm, Some(90.0));
        assert_eq!(GlobalParams::default().beat_duration(), 0.5);
        let broken = GlobalParams {
            master_bpm: 0.0,
            ..Default::default()
        };
        assert_eq!(broken.beat_duration(), 0.5);
        let fast = GlobalParams {
            master_bpm: 240.0,
            ..Default::default()
        };
        assert_eq!(fast.beat_duration(), 0.25);
    }
}
