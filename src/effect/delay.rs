use std::any::Any;

use crate::{
    effect::{Effect, EffectMessage, EffectMessagePayload, EffectTime},
    utils::{
        buffer::InterleavedBufferMut,
        dsp::{
            delay::DelayLine,
            filters::biquad::{BiquadFilter, BiquadFilterCoefficients},
        },
        smoothed::{ExponentialSmoothedValue, SmoothedValue},
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Message type for `DubDelayEffect` to change parameters.
#[derive(Clone, Debug)]
pub enum DubDelayEffectMessage {
    /// Set the input send level in range \[0, 1\].
    SetSendLevel(f32),
    /// Set the feedback gain in range \[0, 0.7\].
    SetFeedback(f32),
    /// Set the delay time in seconds in range (0, 5\].
    SetDelayTime(f32),
}

impl EffectMessage for DubDelayEffectMessage {
    fn effect_name(&self) -> &'static str {
        DubDelayEffect::EFFECT_NAME
    }
    fn payload(&self) -> &dyn Any {
        self
    }
}

// -------------------------------------------------------------------------------------------------

/// A stereo dub delay: a delay line with a lowpass filtered feedback loop.
///
/// The input gets scaled by the send level and written into the delay line, together with the
/// lowpass filtered and feedback scaled delay line's output. Outputs the wet signal only, so
/// the effect's output has to be mixed with the dry signal.
///
/// All parameters are smoothed to avoid clicks when changing them.
pub struct DubDelayEffect {
    sample_rate: u32,
    channel_count: usize,
    send_level: ExponentialSmoothedValue,
    feedback: ExponentialSmoothedValue,
    delay_time: ExponentialSmoothedValue,
    delay_line: DelayLine<2>,
    filter_coefficients: BiquadFilterCoefficients,
    filters: [BiquadFilter; 2],
}

impl DubDelayEffect {
    pub const EFFECT_NAME: &str = "DubDelayEffect";

    /// Max delay time in seconds.
    pub const MAX_DELAY_TIME: f32 = 5.0;
    /// Min delay time in seconds.
    pub const MIN_DELAY_TIME: f32 = 0.001;
    /// Max feedback gain.
    pub const MAX_FEEDBACK: f32 = 0.7;

    /// Feedback loop lowpass filter specs.
    pub const FILTER_CUTOFF: f32 = 1200.0;
    pub const FILTER_Q: f32 = 0.5;

    const LEVEL_TIME_CONSTANT: f32 = 0.1;
    const DELAY_TIME_CONSTANT: f32 = 0.2;

    /// Create a new dub delay with the given initial send level, feedback and delay time.
    /// Out of range values get clamped.
    pub fn with_parameters(send_level: f32, feedback: f32, delay_time: f32) -> Self {
        let sample_rate = 0;
        let channel_count = 0;
        let send_level = ExponentialSmoothedValue::with_time_constant(
            Self::clamp_send_level(send_level),
            Self::LEVEL_TIME_CONSTANT,
            sample_rate,
        );
        let feedback = ExponentialSmoothedValue::with_time_constant(
            Self::clamp_feedback(feedback),
            Self::LEVEL_TIME_CONSTANT,
            sample_rate,
        );
        let delay_time = ExponentialSmoothedValue::with_time_constant(
            Self::clamp_delay_time(delay_time),
            Self::DELAY_TIME_CONSTANT,
            sample_rate,
        );
        Self {
            sample_rate,
            channel_count,
            send_level,
            feedback,
            delay_time,
            delay_line: DelayLine::default(),
            filter_coefficients: BiquadFilterCoefficients::default(),
            filters: [BiquadFilter::new(), BiquadFilter::new()],
        }
    }

    /// Current send level target.
    pub fn send_level(&self) -> f32 {
        self.send_level.target()
    }

    /// Current feedback gain target.
    pub fn feedback(&self) -> f32 {
        self.feedback.target()
    }

    /// Current delay time target in seconds.
    pub fn delay_time(&self) -> f32 {
        self.delay_time.target()
    }

    /// Flush the delay line and filter states.
    pub fn reset(&mut self) {
        self.delay_line.flush();
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    fn clamp_send_level(value: f32) -> f32 {
        if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        }
    }

    fn clamp_feedback(value: f32) -> f32 {
        if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, Self::MAX_FEEDBACK)
        }
    }

    fn clamp_delay_time(value: f32) -> f32 {
        if value.is_nan() {
            0.5
        } else {
            value.clamp(Self::MIN_DELAY_TIME, Self::MAX_DELAY_TIME)
        }
    }
}

impl Default for DubDelayEffect {
    fn default() -> Self {
        Self::with_parameters(0.0, 0.0, 0.5)
    }
}

impl Effect for DubDelayEffect {
    fn name(&self) -> &'static str {
        Self::EFFECT_NAME
    }

    fn initialize(
        &mut self,
        sample_rate: u32,
        channel_count: usize,
        _max_frames: usize,
    ) -> Result<(), Error> {
        self.sample_rate = sample_rate;
        self.channel_count = channel_count;
        if channel_count != 2 {
            return Err(Error::ParameterError(
                "DubDelayEffect only supports stereo I/O".to_owned(),
            ));
        }

        self.send_level.set_sample_rate(sample_rate);
        self.feedback.set_sample_rate(sample_rate);
        self.delay_time.set_sample_rate(sample_rate);

        let max_delay_frames = (Self::MAX_DELAY_TIME * sample_rate as f32).ceil() as usize;
        self.delay_line = DelayLine::new(max_delay_frames);
        self.filter_coefficients = BiquadFilterCoefficients::new_lowpass(
            sample_rate,
            Self::FILTER_CUTOFF,
            Self::FILTER_Q,
        )?;

        self.reset();
        Ok(())
    }

    fn process(&mut self, output: &mut [f32], _time: &EffectTime) {
        assert!(self.channel_count == 2);
        let sample_rate = self.sample_rate as f32;
        for frame in output.as_frames_mut::<2>() {
            let send_level = self.send_level.next();
            let feedback = self.feedback.next();
            let delay_frames = self.delay_time.next() * sample_rate;

            let delayed = self.delay_line.read(delay_frames);
            let mut input = [0.0; 2];
            for channel in 0..2 {
                let filtered = self.filters[channel]
                    .process_sample(&self.filter_coefficients, delayed[channel] as f64);
                input[channel] = frame[channel] * send_level + filtered as f32 * feedback;
            }
            self.delay_line.write(input);

            *frame = delayed;
        }
    }

    fn process_message(&mut self, message: &EffectMessagePayload) -> Result<(), Error> {
        if let Some(message) = message.payload().downcast_ref::<DubDelayEffectMessage>() {
            match *message {
                DubDelayEffectMessage::SetSendLevel(value) => {
                    self.send_level.set_target(Self::clamp_send_level(value))
                }
                DubDelayEffectMessage::SetFeedback(value) => {
                    self.feedback.set_target(Self::clamp_feedback(value))
                }
                DubDelayEffectMessage::SetDelayTime(value) => {
                    self.delay_time.set_target(Self::clamp_delay_time(value))
                }
            }
            Ok(())
        } else {
            Err(Error::ParameterError(
                "DubDelayEffect: Invalid/unknown message payload".to_owned(),
            ))
        }
    }
}

// -------------------------------------------------------------------------------------------------
