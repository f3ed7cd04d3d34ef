use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

// -------------------------------------------------------------------------------------------------

/// Absolute time in sample frames, counted from the start of an output device.
pub type SampleTime = u64;

// -------------------------------------------------------------------------------------------------

/// Convert a time in seconds into sample frames with the given sample rate, rounding to the
/// nearest frame. Negative times are clamped to zero.
pub fn seconds_to_sample_time(seconds: f64, sample_rate: u32) -> SampleTime {
    debug_assert!(sample_rate > 0, "Invalid sample rate");
    (seconds.max(0.0) * sample_rate as f64).round() as SampleTime
}

/// Convert sample frames into a time in seconds with the given sample rate.
pub fn sample_time_to_seconds(sample_time: SampleTime, sample_rate: u32) -> f64 {
    debug_assert!(sample_rate > 0, "Invalid sample rate");
    sample_time as f64 / sample_rate as f64
}

// -------------------------------------------------------------------------------------------------

/// The execution clock of an output device.
///
/// Output devices count the number of **samples** (not frames) they have rendered so far in a
/// shared atomic. The clock can be cloned and read from any thread, which allows control
/// threads to schedule events relative to the device's playback position without locking.
#[derive(Debug, Clone)]
pub struct OutputClock {
    sample_position: Arc<AtomicU64>,
    sample_rate: u32,
    channel_count: usize,
}

impl OutputClock {
    /// Create a new clock, starting at position zero.
    pub fn new(sample_rate: u32, channel_count: usize) -> Self {
        Self::with_position(Arc::new(AtomicU64::new(0)), sample_rate, channel_count)
    }

    /// Create a clock which reads the given shared sample position.
    pub fn with_position(
        sample_position: Arc<AtomicU64>,
        sample_rate: u32,
        channel_count: usize,
    ) -> Self {
        assert!(sample_rate > 0, "Invalid sample rate");
        assert!(channel_count > 0, "Invalid channel count");
        Self {
            sample_position,
            sample_rate,
            channel_count,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Shared sample position counter. Written by the output device only.
    pub(crate) fn sample_position(&self) -> &Arc<AtomicU64> {
        &self.sample_position
    }

    /// Advance the clock by the given number of samples (not frames).
    pub(crate) fn advance(&self, samples: u64) {
        self.sample_position.fetch_add(samples, Ordering::Relaxed);
    }

    /// Current playback position in sample frames.
    pub fn frames(&self) -> SampleTime {
        self.sample_position.load(Ordering::Relaxed) / self.channel_count as u64
    }

    /// Current playback position in seconds.
    pub fn now(&self) -> f64 {
        sample_time_to_seconds(self.frames(), self.sample_rate)
    }
}

// -------------------------------------------------------------------------------------------------
