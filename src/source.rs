//! Realtime audio sources: grain voices and the grain mixer that renders the final mix.

pub mod grain;
pub mod mixed;

// -------------------------------------------------------------------------------------------------

/// Timing info for [`Source`] and [`Effect`](crate::effect::Effect) impls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceTime {
    /// Absolute position of the first frame in the processed buffer, counted in sample frames
    /// since the output device started running.
    pub pos_in_frames: u64,
}

impl SourceTime {
    pub fn new(pos_in_frames: u64) -> Self {
        Self { pos_in_frames }
    }

    /// Create a new time stamp which is `frames` sample frames ahead of this one.
    #[must_use]
    pub fn with_added_frames(&self, frames: u64) -> Self {
        Self {
            pos_in_frames: self.pos_in_frames + frames,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Types that can produce audio samples in `f32` format. `Send`able across threads.
///
/// NB: `write` is called in realtime audio threads, so it must not block, allocate memory or
/// do other time-consuming tasks.
pub trait Source: Send + 'static {
    /// Write at most `output.len()` samples into the interleaved `output`. Returns the number
    /// of written samples. Should take care to always output full frames.
    fn write(&mut self, output: &mut [f32], time: &SourceTime) -> usize;

    /// The source's output channel layout.
    fn channel_count(&self) -> usize;
    /// The source's output sample rate.
    fn sample_rate(&self) -> u32;

    /// Returns true when the source finished playing and won't produce any more samples.
    fn is_exhausted(&self) -> bool;
}
