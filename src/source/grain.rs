use std::sync::Arc;

use assume::assume;

use crate::{
    engine::synth::{Grain, GrainEnvelope},
    source::{Source, SourceTime},
    utils::{buffer::InterleavedBufferMut, mono_panning_factors, pan_stereo_frame},
    AudioBuffer,
};

// -------------------------------------------------------------------------------------------------

/// A one-shot, enveloped and panned playback of a segment of a shared [`AudioBuffer`].
///
/// Reads the buffer from the grain's offset with the grain's playback rate, using cubic
/// interpolation. Negative rates read backwards. The voice is exhausted as soon as its read
/// position leaves the buffer: voices never loop. Always outputs stereo: mono buffers are
/// spread with an equal power panning law, stereo buffers are balanced. Of buffers with more
/// than two channels only the first two channels are played.
///
/// The voice does not stop on its own after the grain ended: the envelope holds silence, and
/// the mixer stops the voice at the grain's stop time.
pub struct GrainVoice {
    buffer: Arc<AudioBuffer>,
    envelope: GrainEnvelope,
    pan: f32,
    sample_rate: u32,
    position: f64,
    step: f64,
    frames_played: u64,
    is_exhausted: bool,
}

impl GrainVoice {
    /// Create a new voice which plays the given grain with the given output sample rate.
    pub fn new(grain: &Grain, sample_rate: u32) -> Self {
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        let buffer = Arc::clone(&grain.buffer);
        let buffer_sample_rate = buffer.sample_rate() as f64;
        let position = grain.offset * buffer_sample_rate;
        let step = grain.playback_rate * buffer_sample_rate / sample_rate as f64;
        let is_exhausted = buffer.frame_count() == 0;
        Self {
            buffer,
            envelope: grain.envelope.clone(),
            pan: grain.pan.clamp(-1.0, 1.0),
            sample_rate,
            position,
            step,
            frames_played: 0,
            is_exhausted,
        }
    }

    /// Current read position in buffer frames.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Read position increment in buffer frames per output frame.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Number of frames the voice rendered so far.
    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }
}

impl Source for GrainVoice {
    fn write(&mut self, output: &mut [f32], _time: &SourceTime) -> usize {
        if self.is_exhausted {
            return 0;
        }
        let samples = self.buffer.samples();
        let channel_count = self.buffer.channel_count();
        let frame_count = self.buffer.frame_count();
        let last_frame = (frame_count - 1) as f64;
        let (mono_left, mono_right) = mono_panning_factors(self.pan);

        let mut written_frames = 0;
        for frame in output.as_frames_mut::<2>() {
            if !(0.0..=last_frame).contains(&self.position) {
                self.is_exhausted = true;
                break;
            }
            let gain = self
                .envelope
                .value_at(self.frames_played as f64 / self.sample_rate as f64);
            let (left, right) = if channel_count == 1 {
                let value = interpolate(samples, 1, 0, self.position);
                (value * mono_left, value * mono_right)
            } else {
                let left = interpolate(samples, channel_count, 0, self.position);
                let right = interpolate(samples, channel_count, 1, self.position);
                pan_stereo_frame(left, right, self.pan)
            };
            frame[0] = left * gain;
            frame[1] = right * gain;

            self.position += self.step;
            self.frames_played += 1;
            written_frames += 1;
        }
        written_frames * 2
    }

    fn channel_count(&self) -> usize {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_exhausted(&self) -> bool {
        self.is_exhausted
    }
}

// -------------------------------------------------------------------------------------------------

/// Sample a single channel of an interleaved buffer at a fractional frame position, using
/// 4-point Catmull-Rom interpolation. Neighbour frames get clamped at the buffer's edges.
#[inline]
fn interpolate(samples: &[f32], channel_count: usize, channel: usize, position: f64) -> f32 {
    let len = samples.len() / channel_count;
    assume!(unsafe: len > 0, "Buffer len is checked by the caller");
    assume!(unsafe: channel < channel_count);
    let max_index = len - 1;

    let index = (position.max(0.0) as usize).min(max_index);
    let fraction = (position - index as f64).clamp(0.0, 1.0) as f32;

    let i0 = index.saturating_sub(1);
    let i1 = index;
    let i2 = (index + 1).min(max_index);
    let i3 = (index + 2).min(max_index);

    let sample = |frame: usize| {
        let sample_index = frame * channel_count + channel;
        assume!(unsafe: sample_index < samples.len());
        samples[sample_index]
    };
    let (y0, y1, y2, y3) = (sample(i0), sample(i1), sample(i2), sample(i3));

    // Cubic interpolation (Catmull-Rom)
    let a = -0.5 * y0 + 1.5 * y1 - 1.5 * y2 + 0.5 * y3;
    let b = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
    let c = -0.5 * y0 + 0.5 * y2;
    let d = y1;

    a * fraction * fraction * fraction + b * fraction * fraction + c * fraction + d
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::assert_eq_with_epsilon;

    fn grain(buffer: AudioBuffer, offset: f64, playback_rate: f64, pan: f32) -> Grain {
        Grain {
            orb_id: 1,
            buffer: Arc::new(buffer),
            start_time: 0.0,
            offset,
            playback_rate,
            pan,
            grain_size: 0.1,
            stop_time: 0.15,
            envelope: GrainEnvelope::linear_ramp(1.0, 0.1),
        }
    }

    #[test]
    fn enveloped_mono_playback() {
        let buffer = AudioBuffer::new(vec![1.0; 1000], 1, 1000).unwrap();
        let mut voice = GrainVoice::new(&grain(buffer, 0.1, 1.0, 0.0), 1000);
        assert_eq!(voice.channel_count(), 2);
        let mut output = vec![0.0; 200];
        assert_eq!(voice.write(&mut output, &SourceTime::default()), 200);
        let center = std::f32::consts::FRAC_1_SQRT_2;
        assert_eq!(output[0], 0.0);
        assert_eq_with_epsilon!(output[25 * 2], 0.5 * center, 1e-5);
        assert_eq_with_epsilon!(output[50 * 2], center, 1e-5);
        assert_eq_with_epsilon!(output[50 * 2 + 1], center, 1e-5);
        assert_eq_with_epsilon!(output[75 * 2 + 1], 0.5 * center, 1e-5);
        assert_eq!(voice.frames_played(), 100);
        assert!(!voice.is_exhausted());
    }

    #[test]
    fn panning() {
        let mono = AudioBuffer::new(vec![1.0; 100], 1, 1000).unwrap();
        let mut voice = GrainVoice::new(&grain(mono, 0.0, 1.0, -1.0), 1000);
        let mut output = vec![0.0; 200];
        voice.write(&mut output, &SourceTime::default());
        assert!(output[101] < 1e-6);
        assert!(output[100] > 0.9);

        let stereo = AudioBuffer::new(vec![0.5, -0.5].repeat(100), 2, 1000).unwrap();
        let mut voice = GrainVoice::new(&grain(stereo, 0.0, 1.0, 0.0), 1000);
        voice.write(&mut output, &SourceTime::default());
        assert_eq_with_epsilon!(output[100], 0.5, 1e-5);
        assert_eq_with_epsilon!(output[101], -0.5, 1e-5);
    }

    #[test]
    fn playback_rates() {
        let buffer = AudioBuffer::new(vec![0.0; 1000], 1, 500).unwrap();
        // half the output rate: read at half speed
        let mut voice = GrainVoice::new(&grain(buffer.clone(), 0.5, 1.0, 0.0), 1000);
        assert_eq!(voice.position(), 250.0);
        assert_eq!(voice.step(), 0.5);
        let mut output = vec![0.0; 20];
        voice.write(&mut output, &SourceTime::default());
        assert_eq!(voice.position(), 255.0);

        // octave up
        let voice = GrainVoice::new(&grain(buffer, 0.5, 2.0, 0.0), 500);
        assert_eq!(voice.step(), 2.0);
    }

    #[test]
    fn exhausts_at_buffer_edges() {
        let buffer = AudioBuffer::new(vec![1.0; 1000], 1, 1000).unwrap();
        // backwards from frame 50 to frame 0
        let mut voice = GrainVoice::new(&grain(buffer.clone(), 0.05, -1.0, 0.0), 1000);
        let mut output = vec![0.0; 200];
        assert_eq!(voice.write(&mut output, &SourceTime::default()), 51 * 2);
        assert!(voice.is_exhausted());
        assert_eq!(voice.write(&mut output, &SourceTime::default()), 0);

        // forwards from frame 990 to the last frame
        let mut voice = GrainVoice::new(&grain(buffer, 0.99, 1.0, 0.0), 1000);
        assert_eq!(voice.write(&mut output, &SourceTime::default()), 10 * 2);
        assert!(voice.is_exhausted());

        let empty = AudioBuffer::new(Vec::new(), 1, 1000).unwrap();
        let mut voice = GrainVoice::new(&grain(empty, 0.0, 1.0, 0.0), 1000);
        assert!(voice.is_exhausted());
        assert_eq!(voice.write(&mut output, &SourceTime::default()), 0);
    }

    #[test]
    fn cubic_interpolation() {
        // linear ramps are reproduced exactly
        let ramp = (0..8).map(|i| i as f32).collect::<Vec<_>>();
        assert_eq_with_epsilon!(interpolate(&ramp, 1, 0, 2.5), 2.5, 1e-6);
        assert_eq_with_epsilon!(interpolate(&ramp, 1, 0, 4.25), 4.25, 1e-6);
        assert_eq!(interpolate(&ramp, 1, 0, 7.0), 7.0);
        assert_eq!(interpolate(&ramp, 1, 0, 0.0), 0.0);
        // channels of interleaved buffers
        let stereo = (0..8).flat_map(|i| [i as f32, -(i as f32)]).collect::<Vec<_>>();
        assert_eq_with_epsilon!(interpolate(&stereo, 2, 1, 3.5), -3.5, 1e-6);
    }
}
