use std::fmt::{Debug, Display};

use crate::utils::buffer::scale_buffer;

// -------------------------------------------------------------------------------------------------

/// Provides smooth transitions between a current and target f32 value.
/// Smoothing usually needs to be applied to avoid clicks in e.g. volume or other DSP parameter changes.
pub trait SmoothedValue: Debug {
    /// Access to the current, possibly ramped value.
    #[must_use]
    fn current(&self) -> f32;
    /// Access to the target value.
    #[must_use]
    fn target(&self) -> f32;

    /// Ramp, if needed, and get the current ramped value, else returns the target value.
    #[must_use]
    fn next(&mut self) -> f32 {
        if self.need_ramp() {
            self.ramp();
            self.current()
        } else {
            self.target()
        }
    }

    /// Test if ramping is necessary. When ramping is not necessary, parameter changes
    /// may be applied in blocks without calling `next` or `ramp`, which usually is faster.
    #[must_use]
    fn need_ramp(&self) -> bool;
    /// Move current to target value, when ramping is necessary, else does nothing.
    fn ramp(&mut self);

    /// Set current and target to the same value.
    fn init(&mut self, amount: f32);
    /// Set a new target value and ramp current, when current is different from the target.
    fn set_target(&mut self, target: f32);

    /// Update sample rate of the smoothed value. Smoothed values are expected to be called
    /// once per audio frame and the ramping scales with the sample rate.
    fn set_sample_rate(&mut self, sample_rate: u32);
}

impl Display for dyn SmoothedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.need_ramp() {
            f.write_fmt(format_args!("{}(->{})", self.current(), self.target()))
        } else {
            f.write_fmt(format_args!("{}", self.target()))
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Apply a smoothed volume value to an interleaved buffer with the given channel layout,
/// ramping once per frame instead of once per sample.
pub fn apply_smoothed_frame_gain(
    buffer: &mut [f32],
    channel_count: usize,
    smoothed: &mut impl SmoothedValue,
) {
    if smoothed.need_ramp() {
        for frame in buffer.chunks_exact_mut(channel_count) {
            let gain = smoothed.next();
            for s in frame.iter_mut() {
                *s *= gain;
            }
        }
    } else {
        let gain = smoothed.target();
        if (1.0 - gain).abs() > 0.000001 {
            scale_buffer(buffer, gain);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Exponential smoothed value, approaching its target with a fixed time constant.
///
/// After `time_constant` seconds, the value covered ~63% of the distance to the target, which
/// matches the behavior of a classic `set_target_at_time` parameter automation. This should be
/// the default smoothed value for volume alike parameters.
#[derive(Debug, Clone)]
pub struct ExponentialSmoothedValue {
    current: f32,
    target: f32,
    time_constant: f32,
    sample_rate: u32,
    coefficient: f32,
}

impl ExponentialSmoothedValue {
    /// Default time constant in seconds.
    pub const DEFAULT_TIME_CONSTANT: f32 = 0.1;

    const UNINITIALIZED_SAMPLE_RATE: u32 = 0;

    pub fn new(value: f32, sample_rate: u32) -> Self {
        Self::with_time_constant(value, Self::DEFAULT_TIME_CONSTANT, sample_rate)
    }

    pub fn with_time_constant(value: f32, time_constant: f32, sample_rate: u32) -> Self {
        assert!(time_constant > 0.0, "Invalid time constant");
        let current = value;
        let target = value;
        let coefficient = Self::coefficient(time_constant, sample_rate);
        Self {
            current,
            target,
            time_constant,
            sample_rate,
            coefficient,
        }
    }

    #[inline(always)]
    pub fn time_constant(&self) -> f32 {
        self.time_constant
    }

    pub fn reset(&mut self) {
        self.init(self.target);
    }

    fn coefficient(time_constant: f32, sample_rate: u32) -> f32 {
        if sample_rate == Self::UNINITIALIZED_SAMPLE_RATE {
            1.0
        } else {
            1.0 - (-1.0 / (time_constant as f64 * sample_rate as f64)).exp() as f32
        }
    }
}

impl SmoothedValue for ExponentialSmoothedValue {
    #[inline(always)]
    fn current(&self) -> f32 {
        self.current
    }

    #[inline(always)]
    fn target(&self) -> f32 {
        self.target
    }

    fn need_ramp(&self) -> bool {
        debug_assert!(
            self.sample_rate != Self::UNINITIALIZED_SAMPLE_RATE,
            "Call 'set_sample_rate' for default constructed smoothed values before using them!"
        );
        const EPSILON: f32 = 1e-6;
        (self.target - self.current).abs() > EPSILON
    }

    fn ramp(&mut self) {
        self.current += (self.target - self.current) * self.coefficient;
        if !self.need_ramp() {
            self.current = self.target;
        }
    }

    fn init(&mut self, amount: f32) {
        self.target = amount;
        self.current = amount;
    }

    fn set_target(&mut self, target: f32) {
        self.target = target;
        if !self.need_ramp() {
            self.current = self.target;
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.coefficient = Self::coefficient(self.time_constant, sample_rate);
    }
}

impl Default for ExponentialSmoothedValue {
    fn default() -> Self {
        Self::new(0.0, Self::UNINITIALIZED_SAMPLE_RATE)
    }
}

impl From<f32> for ExponentialSmoothedValue {
    fn from(value: f32) -> Self {
        Self::new(value, Self::UNINITIALIZED_SAMPLE_RATE)
    }
}

// -------------------------------------------------------------------------------------------------
