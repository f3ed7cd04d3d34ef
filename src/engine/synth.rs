//! Grain synthesizer: turns an orb, a start time and an LFO sample into a single grain voice.

use std::{fmt, sync::Arc};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    engine::{
        glitch::GlitchState,
        params::{AudioOrb, GlobalParams, LfoTarget, OrbId},
    },
    utils::dsp::window::EnvelopeTable,
    AudioBuffer, Error,
};

// -------------------------------------------------------------------------------------------------

/// Amplitude envelope of a single grain. Times are relative to the grain's start time.
#[derive(Debug, Clone)]
pub enum GrainEnvelope {
    /// The shared window table, scaled by `peak`, stretched to span exactly `duration` seconds.
    /// Holds the table's last value afterwards.
    ValueCurve {
        table: Arc<EnvelopeTable>,
        peak: f32,
        duration: f64,
    },
    /// Linear rise to `peak` at `duration / 2`, then a linear fall to zero at `duration`.
    LinearRamp { peak: f32, duration: f64 },
}

impl GrainEnvelope {
    /// Create a value curve envelope. Fails with [`Error::EnvelopeCurveUnsupported`] when the
    /// target sink can't play curves or when the curve's duration is not a positive number.
    pub fn value_curve(
        table: &Arc<EnvelopeTable>,
        peak: f32,
        duration: f64,
        supported: bool,
    ) -> Result<Self, Error> {
        if !supported || !(duration.is_finite() && duration > 0.0) {
            return Err(Error::EnvelopeCurveUnsupported);
        }
        Ok(Self::ValueCurve {
            table: Arc::clone(table),
            peak,
            duration,
        })
    }

    /// Create a two segment linear ramp envelope.
    pub fn linear_ramp(peak: f32, duration: f64) -> Self {
        Self::LinearRamp { peak, duration }
    }

    pub fn peak(&self) -> f32 {
        match *self {
            Self::ValueCurve { peak, .. } | Self::LinearRamp { peak, .. } => peak,
        }
    }

    pub fn duration(&self) -> f64 {
        match *self {
            Self::ValueCurve { duration, .. } | Self::LinearRamp { duration, .. } => duration,
        }
    }

    /// Evaluate the envelope at the given time in seconds since the grain's start.
    #[inline]
    pub fn value_at(&self, time: f64) -> f32 {
        match self {
            Self::ValueCurve {
                table,
                peak,
                duration,
            } => {
                if time <= 0.0 {
                    table.sample(0.0) * peak
                } else {
                    table.sample(time / duration) * peak
                }
            }
            Self::LinearRamp { peak, duration } => {
                let half = duration / 2.0;
                if time <= 0.0 || time >= *duration || half <= 0.0 {
                    0.0
                } else if time < half {
                    peak * (time / half) as f32
                } else {
                    peak * ((duration - time) / half) as f32
                }
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A fully specified grain, ready to be played by a [`VoiceSink`].
#[derive(Clone)]
pub struct Grain {
    /// The orb which spawned the grain.
    pub orb_id: OrbId,
    /// The orb's sample buffer.
    pub buffer: Arc<AudioBuffer>,
    /// Absolute start time in seconds on the output clock.
    pub start_time: f64,
    /// Scan offset into the buffer in seconds.
    pub offset: f64,
    /// Playback rate. Negative rates play backwards.
    pub playback_rate: f64,
    /// Stereo panning in range \[-1, 1\].
    pub pan: f32,
    /// Grain length in seconds.
    pub grain_size: f64,
    /// Absolute stop time in seconds on the output clock.
    pub stop_time: f64,
    /// Amplitude envelope.
    pub envelope: GrainEnvelope,
}

impl fmt::Debug for Grain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grain")
            .field("orb_id", &self.orb_id)
            .field("start_time", &self.start_time)
            .field("offset", &self.offset)
            .field("playback_rate", &self.playback_rate)
            .field("pan", &self.pan)
            .field("grain_size", &self.grain_size)
            .field("stop_time", &self.stop_time)
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

// -------------------------------------------------------------------------------------------------

/// Plays grains: the seam between the control rate grain scheduling and the realtime mixer.
pub trait VoiceSink {
    /// Returns true when the sink can play [`GrainEnvelope::ValueCurve`] envelopes.
    fn supports_value_curves(&self) -> bool;

    /// Schedule a grain for playback. Must not block.
    fn schedule_grain(&mut self, grain: Grain) -> Result<(), Error>;
}

// -------------------------------------------------------------------------------------------------

/// Builds single grains from an orb's parameters, the global parameters and the glitch state.
pub struct GrainSynthesizer {
    envelope_table: Arc<EnvelopeTable>,
    rng: SmallRng,
}

impl GrainSynthesizer {
    /// Min grain length in seconds.
    pub const MIN_GRAIN_SIZE: f64 = 0.01;
    /// Extra time in seconds a voice keeps running after its grain ended.
    pub const STOP_MARGIN: f64 = 0.05;
    /// Range of absolute playback rates.
    pub const MIN_PLAYBACK_RATE: f64 = 0.05;
    pub const MAX_PLAYBACK_RATE: f64 = 4.0;
    /// Max random scan offset variation in seconds.
    pub const OFFSET_JITTER: f64 = 0.025;
    /// Random detune range in cents at full random pitch.
    pub const MAX_DETUNE_CENTS: f64 = 2400.0;

    /// Create a new synthesizer which seeds its random generator from the OS.
    pub fn new(envelope_table: Arc<EnvelopeTable>) -> Self {
        Self::with_rng(envelope_table, SmallRng::from_os_rng())
    }

    /// Create a new synthesizer with the given random generator.
    pub fn with_rng(envelope_table: Arc<EnvelopeTable>, rng: SmallRng) -> Self {
        Self {
            envelope_table,
            rng,
        }
    }

    /// The shared envelope table.
    pub fn envelope_table(&self) -> &Arc<EnvelopeTable> {
        &self.envelope_table
    }

    /// Build a single grain for the given orb at `start_time` and pass it to the sink.
    ///
    /// Orbs without a (non empty) buffer are silently skipped. A running stutter burst records
    /// the offset of its first grain in the glitch state.
    pub fn trigger(
        &mut self,
        orb: &AudioOrb,
        global: &GlobalParams,
        glitch: &mut GlitchState,
        start_time: f64,
        lfo: f64,
        sink: &mut dyn VoiceSink,
    ) -> Result<(), Error> {
        let Some(buffer) = orb.buffer.as_ref().filter(|b| b.frame_count() > 0) else {
            return Ok(());
        };
        let params = &orb.params;

        let mut position = params.position;
        let mut grain_size = params.grain_size;
        let mut volume = params.volume;
        let mut playback_rate = 1.0;

        match params.lfo_target {
            LfoTarget::Position => position += lfo * 0.5,
            LfoTarget::GrainSize => grain_size += lfo * 0.2,
            LfoTarget::Volume => volume += lfo,
            LfoTarget::Pitch => playback_rate += lfo,
            // density is applied by the scheduler
            LfoTarget::Density | LfoTarget::None => {}
        }

        if global.beat_sync {
            if let Some(detected_bpm) = orb.detected_bpm {
                playback_rate *= beat_sync_ratio(global.effective_bpm(), detected_bpm);
            }
        }

        playback_rate *= glitch.rate_factor();
        if let Some(size) = glitch.grain_size_override() {
            grain_size = size;
        }

        let buffer_duration = buffer.duration();
        let offset = if glitch.is_stutter() {
            match glitch.frozen_offset() {
                Some(frozen_offset) => frozen_offset,
                None => {
                    let offset = wrap_offset(position * buffer_duration, buffer_duration);
                    glitch.freeze_offset(offset);
                    offset
                }
            }
        } else {
            let jitter = self
                .rng
                .random_range(-Self::OFFSET_JITTER..=Self::OFFSET_JITTER);
            wrap_offset(position * buffer_duration + jitter, buffer_duration)
        };

        let grain_size = grain_size.max(Self::MIN_GRAIN_SIZE);

        let space = if global.space.is_nan() {
            0.0
        } else {
            global.space.clamp(0.0, 1.0)
        };
        let pan = (self.rng.random_range(-1.0..=1.0) * space).clamp(-1.0, 1.0) as f32;

        let cents =
            self.rng.random_range(-1.0..=1.0) * params.random_pitch * Self::MAX_DETUNE_CENTS;
        playback_rate *= 2.0f64.powf(cents / 1200.0);
        let playback_rate = clamp_playback_rate(playback_rate);

        let peak = volume.max(0.0) as f32;
        let envelope = match GrainEnvelope::value_curve(
            &self.envelope_table,
            peak,
            grain_size,
            sink.supports_value_curves(),
        ) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::debug!("{err}: using a linear ramp envelope");
                GrainEnvelope::linear_ramp(peak, grain_size)
            }
        };

        sink.schedule_grain(Grain {
            orb_id: orb.id,
            buffer: Arc::clone(buffer),
            start_time,
            offset,
            playback_rate,
            pan,
            grain_size,
            stop_time: start_time + grain_size + Self::STOP_MARGIN,
            envelope,
        })
    }
}

// -------------------------------------------------------------------------------------------------

/// Pitch ratio between the master and an orb's detected tempo, folded by octaves into
/// \[0.75, 1.5\]. Invalid tempos result in a neutral ratio.
fn beat_sync_ratio(master_bpm: f64, detected_bpm: f64) -> f64 {
    let mut ratio = master_bpm / detected_bpm;
    if !(ratio.is_finite() && ratio > 0.0) {
        return 1.0;
    }
    while ratio < 0.75 {
        ratio *= 2.0;
    }
    while ratio > 1.5 {
        ratio /= 2.0;
    }
    ratio
}

/// Wrap a scan offset into \[0, duration).
fn wrap_offset(offset: f64, duration: f64) -> f64 {
    if !offset.is_finite() {
        return 0.0;
    }
    let wrapped = offset.rem_euclid(duration);
    // rem_euclid may round up to `duration` for tiny negative offsets
    if wrapped >= duration {
        0.0
    } else {
        wrapped
    }
}

/// Clamp a playback rate's magnitude into the supported range, keeping its direction.
fn clamp_playback_rate(rate: f64) -> f64 {
    if !rate.is_finite() {
        return 1.0;
    }
    let magnitude = rate.abs().clamp(
        GrainSynthesizer::MIN_PLAYBACK_RATE,
        GrainSynthesizer::MAX_PLAYBACK_RATE,
    );
    if rate < 0.0 {
        -magnitude
    } else {
        magnitude
    }
}

// -------------------------------------------------------------------------------------------------

/// A [`VoiceSink`] which only records scheduled grains.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingVoiceSink {
    pub grains: Vec<Grain>,
    pub value_curves: bool,
}

#[cfg(test)]
impl VoiceSink for RecordingVoiceSink {
    fn supports_value_curves(&self) -> bool {
        self.value_curves
    }

    fn schedule_grain(&mut self, grain: Grain) -> Result<(), Error> {
        self.grains.push(grain);
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
