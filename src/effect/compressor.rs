use crate::{
    effect::{Effect, EffectTime},
    utils::{
        buffer::{copy_buffers, InterleavedBuffer, InterleavedBufferMut},
        db_to_linear,
        dsp::{delay::LookupDelayLine, envelope::EnvelopeFollower},
        linear_to_db,
        smoothed::{ExponentialSmoothedValue, SmoothedValue},
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Stereo compressor effect with limiter mode, lookahead and soft-knee.
///
/// When ratio is above 20.0 it acts as a hard-limiter.
/// Note that the compressor will introduce latency when lookahead is used.
pub struct CompressorEffect {
    // Effect configuration
    sample_rate: u32,
    channel_count: usize,
    // Parameters
    threshold: f32,
    ratio: f32,
    knee_width: f32,
    attack_time: f32,
    release_time: f32,
    makeup_gain: ExponentialSmoothedValue,
    lookahead_time: f32,
    // Internal state
    envelope_follower: EnvelopeFollower,
    input_buffer: Vec<f32>,
    delay_line: LookupDelayLine<2>,
}

impl CompressorEffect {
    pub const EFFECT_NAME: &str = "CompressorEffect";

    /// Ratios at and above this value turn the compressor into a limiter.
    pub const LIMITER_RATIO: f32 = 20.0;

    const SILENCE_DB: f32 = -120.0;

    /// Creates a new `CompressorEffect` with the given parameters.
    ///
    /// `threshold`, `knee_width` and `makeup_gain` are in dB, times in seconds.
    pub fn with_compressor_parameters(
        threshold: f32,
        ratio: f32,
        knee_width: f32,
        attack_time: f32,
        release_time: f32,
        makeup_gain: f32,
        lookahead_time: f32,
    ) -> Self {
        Self {
            sample_rate: 0,
            channel_count: 0,
            threshold: threshold.clamp(-60.0, 0.0),
            ratio: ratio.clamp(1.0, Self::LIMITER_RATIO),
            knee_width: knee_width.clamp(0.0, 12.0),
            attack_time: attack_time.clamp(0.001, 0.5),
            release_time: release_time.clamp(0.01, 2.0),
            makeup_gain: ExponentialSmoothedValue::from(makeup_gain.clamp(-24.0, 24.0)),
            lookahead_time: lookahead_time.clamp(0.0, 0.2),
            envelope_follower: EnvelopeFollower::default(),
            input_buffer: Vec::new(),
            delay_line: LookupDelayLine::<2>::default(),
        }
    }

    /// Creates a new `CompressorEffect` configured as a limiter: hard knee, no makeup gain and
    /// a lookahead of `attack_time`.
    pub fn with_limiter_parameters(threshold: f32, attack_time: f32, release_time: f32) -> Self {
        let ratio = Self::LIMITER_RATIO;
        let knee_width = 0.0;
        let makeup_gain = 0.0;
        let lookahead_time = attack_time;
        Self::with_compressor_parameters(
            threshold,
            ratio,
            knee_width,
            attack_time,
            release_time,
            makeup_gain,
            lookahead_time,
        )
    }

    /// Returns true when the compressor runs in limiter mode.
    pub fn is_limiter(&self) -> bool {
        self.ratio >= Self::LIMITER_RATIO
    }

    /// Latency of the compressor in sample frames. Only valid after initializing.
    pub fn latency(&self) -> usize {
        self.delay_line.delay_frames()
    }

    fn peak_db(peak: f32) -> f32 {
        if peak > 1e-6 {
            linear_to_db(peak)
        } else {
            Self::SILENCE_DB
        }
    }
}

impl Default for CompressorEffect {
    fn default() -> Self {
        Self::with_compressor_parameters(-12.0, 8.0, 3.0, 0.02, 0.2, 0.0, 0.0)
    }
}

impl Effect for CompressorEffect {
    fn name(&self) -> &'static str {
        Self::EFFECT_NAME
    }

    fn initialize(
        &mut self,
        sample_rate: u32,
        channel_count: usize,
        max_frames: usize,
    ) -> Result<(), Error> {
        self.sample_rate = sample_rate;
        self.channel_count = channel_count;
        if channel_count != 2 {
            return Err(Error::ParameterError(
                "CompressorEffect only supports stereo I/O".to_string(),
            ));
        }

        self.makeup_gain.set_sample_rate(sample_rate);

        self.input_buffer = vec![0.0; max_frames * channel_count];
        self.delay_line = LookupDelayLine::new(sample_rate, self.lookahead_time);

        self.envelope_follower =
            EnvelopeFollower::new(sample_rate, self.attack_time, self.release_time);
        let initial_envelope = if self.is_limiter() {
            Self::SILENCE_DB
        } else {
            0.0
        };
        self.envelope_follower.reset(initial_envelope);

        Ok(())
    }

    fn process(&mut self, output: &mut [f32], _time: &EffectTime) {
        assert!(self.channel_count == 2);

        // Copy input to a temporary buffer because we read from it while writing to `output`
        let input = &mut self.input_buffer[..output.len()];
        copy_buffers(input, output);
        let input_frames = input.as_frames::<2>();

        let is_limiter = self.ratio >= Self::LIMITER_RATIO;
        let threshold = self.threshold;
        let knee_width = self.knee_width;
        let slope = if is_limiter {
            1.0
        } else {
            1.0 - 1.0 / self.ratio
        };

        for (out_frame, in_frame) in output.as_frames_mut::<2>().iter_mut().zip(input_frames) {
            // Get delayed frame from delay line (or original frame if no delay)
            let delayed_frame = self.delay_line.process(in_frame);

            // Envelope detection on current (undelayed) input
            let input_db = if is_limiter {
                // Limiter mode: use peak from the entire lookahead buffer to prevent overshoots.
                Self::peak_db(self.delay_line.peak_value())
            } else {
                // Compressor mode: use peak of current frame.
                Self::peak_db(in_frame[0].abs().max(in_frame[1].abs()))
            };

            let envelope = self.envelope_follower.process(input_db);

            // Gain reduction calculation
            let gr_db = if knee_width > 0.0
                && envelope > (threshold - knee_width / 2.0)
                && envelope < (threshold + knee_width / 2.0)
            {
                // In knee (soft knee)
                let knee_lower = threshold - knee_width / 2.0;
                let x = (envelope - knee_lower) / knee_width;
                x * x * slope * knee_width / 2.0
            } else if envelope > (threshold + knee_width / 2.0) {
                // Above knee (hard knee part)
                (envelope - threshold) * slope
            } else {
                // Below knee
                0.0
            };

            // Apply gain to delayed signal
            let makeup_gain = self.makeup_gain.next();
            let total_gain = db_to_linear(makeup_gain - gr_db);

            out_frame[0] = delayed_frame[0] * total_gain;
            out_frame[1] = delayed_frame[1] * total_gain;
        }
    }
}

// -------------------------------------------------------------------------------------------------
