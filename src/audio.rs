//! Decoded audio sample buffers, as used by [`AudioOrb`](crate::AudioOrb)s.

use symphonia::core::audio::SampleBuffer;

use crate::{utils::decoder::AudioDecoder, Error};

// -------------------------------------------------------------------------------------------------

/// A decoded, immutable buffer of interleaved `f32` samples.
///
/// Buffers get decoded once and then are shared read-only, via an `Arc`, between an orb and
/// all grain voices it spawns.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channel_count: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new buffer from raw interleaved samples.
    pub fn new(samples: Vec<f32>, channel_count: usize, sample_rate: u32) -> Result<Self, Error> {
        if channel_count == 0 {
            return Err(Error::ParameterError(
                "Audio buffer channel count must be > 0".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(Error::ParameterError(
                "Audio buffer sample rate must be > 0".to_string(),
            ));
        }
        if samples.len() % channel_count != 0 {
            return Err(Error::ParameterError(format!(
                "Audio buffer sample count {} is not a multiple of the channel count {}",
                samples.len(),
                channel_count
            )));
        }
        Ok(Self {
            samples,
            channel_count,
            sample_rate,
        })
    }

    /// Decode an encoded audio file (wav, aiff, flac, ogg, mp3...) from memory into a new buffer.
    ///
    /// Fails with [`Error::MediaFileProbeError`] for unknown or corrupt formats and with
    /// [`Error::AudioDecodingError`] when no audio could be decoded.
    pub fn decode(file_bytes: Vec<u8>) -> Result<Self, Error> {
        let mut audio_decoder = AudioDecoder::from_buffer(file_bytes)?;
        let signal_spec = audio_decoder.signal_spec()?;
        let sample_rate = signal_spec.rate;
        let channel_count = signal_spec.channels.count();

        // prealloc entire buffer, when the decoder gives us a frame hint
        let buffer_capacity =
            audio_decoder.codec_params().n_frames.unwrap_or(0) as usize * channel_count;
        let mut samples = Vec::with_capacity(buffer_capacity);

        // decode the entire file in chunks of max_frames_per_packet sizes
        let decode_buffer_capacity = audio_decoder
            .codec_params()
            .max_frames_per_packet
            .unwrap_or(16 * 1024 * channel_count as u64);
        let mut decode_buffer = SampleBuffer::<f32>::new(decode_buffer_capacity, signal_spec);

        while audio_decoder.read_packet(&mut decode_buffer).is_some() {
            samples.extend_from_slice(decode_buffer.samples());
        }
        if samples.is_empty() {
            return Err(Error::AudioDecodingError(Box::new(
                symphonia::core::errors::Error::DecodeError("failed to decode any audio"),
            )));
        }
        log::debug!(
            "Decoded {} frames of audio ({} channels, {} Hz)",
            samples.len() / channel_count,
            channel_count,
            sample_rate
        );

        Self::new(samples, channel_count, sample_rate)
    }

    /// Interleaved sample data.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames in the buffer.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channel_count
    }

    /// Buffer duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

// -------------------------------------------------------------------------------------------------
