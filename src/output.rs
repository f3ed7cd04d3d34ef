//! Audio output devices, which pull samples from a [`Source`] in a realtime thread.

#[cfg(feature = "cpal-output")]
pub mod cpal;
#[cfg(feature = "wav-output")]
pub mod wav;

/// The enabled default audio output type.
#[cfg(feature = "cpal-output")]
pub type DefaultOutputDevice = cpal::CpalOutput;

pub use crate::utils::time::OutputClock;

use crate::source::Source;

// -------------------------------------------------------------------------------------------------

/// An audio output which renders a single main source.
///
/// Devices count the samples they rendered in their [`OutputClock`]. The clock only advances
/// while the device is running: paused devices output silence and keep their position.
pub trait OutputDevice: Send {
    /// Actual device's output sample buffer channel count.
    fn channel_count(&self) -> usize;
    /// Actual device's output sample rate.
    fn sample_rate(&self) -> u32;
    /// The device's execution clock. Can be cloned and read from any thread.
    fn clock(&self) -> OutputClock;

    /// true when the device is rendering, false when paused or closed.
    fn is_running(&self) -> bool;

    /// Play given source as main output source, replacing the current one.
    /// The source must have the device's sample rate and channel layout.
    fn play(&mut self, source: Box<dyn Source>);
    /// Pause playback without dropping the output source.
    fn pause(&mut self);
    /// Start or resume playback.
    fn resume(&mut self);

    /// Release the audio device. Can't be resumed afterwards.
    fn close(&mut self);
}
