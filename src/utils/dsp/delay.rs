//! Delay buffers to delay or lookup signals.

// -------------------------------------------------------------------------------------------------

/// Multi channel delay line buffer with fractional delay time support.
///
/// Reading and writing are separate steps, so the delayed signal can be processed (e.g. filtered)
/// before it gets fed back into the line.
#[derive(Debug, Default)]
pub struct DelayLine<const CHANNELS: usize> {
    buffer: Vec<f32>,
    buffer_mask: usize,
    write_pos: usize,
}

impl<const CHANNELS: usize> DelayLine<CHANNELS> {
    /// Create a new delay buffer with the given max delay time in sample frames.
    pub fn new(max_delay_frames: usize) -> Self {
        let (buffer, buffer_mask) = if max_delay_frames > 0 {
            // one extra frame for the interpolation's second read index
            let buffer_frames = (max_delay_frames + 1).next_power_of_two();
            (vec![0.0; buffer_frames * CHANNELS], buffer_frames - 1)
        } else {
            (Vec::new(), 0)
        };
        let write_pos = 0;
        Self {
            buffer,
            buffer_mask,
            write_pos,
        }
    }

    /// Max supported delay time in sample frames.
    pub fn max_delay_frames(&self) -> usize {
        (self.buffer.len() / CHANNELS).saturating_sub(1)
    }

    /// Reset the delay buffer and write position.
    pub fn flush(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    /// Read a linearly interpolated frame, `delay_frames` frames behind the next write position.
    /// A delay of 1.0 reads the most recently written frame.
    pub fn read(&self, delay_frames: f32) -> [f32; CHANNELS] {
        if self.buffer.is_empty() {
            return [0.0; CHANNELS];
        }
        let delay_frames = delay_frames.clamp(1.0, self.max_delay_frames() as f32);

        let read_pos = self.write_pos as f32 - delay_frames;
        let read_pos_floor = read_pos.floor();
        let fraction = read_pos - read_pos_floor;

        // wrap negative positions into the ring buffer
        let buffer_frames = (self.buffer_mask + 1) as isize;
        let index1 = (read_pos_floor as isize).rem_euclid(buffer_frames) as usize;
        let index2 = (index1 + 1) & self.buffer_mask;

        let mut output = [0.0; CHANNELS];
        for (ch, out) in output.iter_mut().enumerate() {
            let val1 = self.buffer[index1 * CHANNELS + ch];
            let val2 = self.buffer[index2 * CHANNELS + ch];
            *out = val1 + (val2 - val1) * fraction;
        }
        output
    }

    /// Write a new frame into the delay line and advance the write position.
    pub fn write(&mut self, frame: [f32; CHANNELS]) {
        if self.buffer.is_empty() {
            return;
        }
        let write_sample_index = self.write_pos * CHANNELS;
        self.buffer[write_sample_index..write_sample_index + CHANNELS].copy_from_slice(&frame);
        self.write_pos = (self.write_pos + 1) & self.buffer_mask;
    }
}

// -------------------------------------------------------------------------------------------------

/// Multi channel delay line which delays an input signal and keeps track of all channel's
/// peak values. Used as lookahead buffer in the limiter.
#[derive(Debug, Default)]
pub struct LookupDelayLine<const CHANNELS: usize> {
    buffer: Vec<f32>,
    write_pos: usize,
    buffer_mask: usize,
    delay_frames: usize,
    peak_value: f32,
    peak_pos: usize,
}

impl<const CHANNELS: usize> LookupDelayLine<CHANNELS> {
    pub fn new(sample_rate: u32, delay_time: f32) -> Self {
        let delay_frames = (delay_time.max(0.0) * sample_rate as f32).ceil() as usize;

        let (buffer, buffer_mask) = if delay_frames > 0 {
            let buffer_frames = (delay_frames + 1).next_power_of_two();
            (vec![0.0; buffer_frames * CHANNELS], buffer_frames - 1)
        } else {
            (Vec::new(), 0)
        };

        Self {
            buffer,
            buffer_mask,
            write_pos: 0,
            delay_frames,
            peak_value: 0.0,
            peak_pos: 0,
        }
    }

    /// Delay in sample frames.
    pub fn delay_frames(&self) -> usize {
        self.delay_frames
    }

    /// Process one frame. Writes the input frame to the delay line and returns the delayed frame.
    pub fn process(&mut self, input_frame: &[f32; CHANNELS]) -> [f32; CHANNELS] {
        if self.delay_frames == 0 {
            self.peak_value = Self::frame_peak(input_frame);
            return *input_frame;
        }

        let buffer_frames = self.buffer.len() / CHANNELS;
        let read_frame_index =
            (self.write_pos + buffer_frames - self.delay_frames) & self.buffer_mask;
        let read_sample_index = read_frame_index * CHANNELS;

        let mut delayed_frame = [0.0; CHANNELS];
        delayed_frame
            .copy_from_slice(&self.buffer[read_sample_index..read_sample_index + CHANNELS]);

        let write_sample_index = self.write_pos * CHANNELS;
        self.buffer[write_sample_index..write_sample_index + CHANNELS].copy_from_slice(input_frame);

        let peak_expired = self.peak_pos == read_frame_index;
        let new_peak = Self::frame_peak(input_frame);
        if new_peak >= self.peak_value {
            self.peak_value = new_peak;
            self.peak_pos = self.write_pos;
        } else if peak_expired {
            // rescan the lookahead window: the last `delay_frames` written frames
            self.peak_value = 0.0;
            for i in 0..self.delay_frames {
                let frame_index = (self.write_pos + buffer_frames - i) & self.buffer_mask;
                let sample_index = frame_index * CHANNELS;
                let frame_peak = self.buffer[sample_index..sample_index + CHANNELS]
                    .iter()
                    .fold(0.0f32, |max, &val| max.max(val.abs()));
                if frame_peak >= self.peak_value {
                    self.peak_value = frame_peak;
                    self.peak_pos = frame_index;
                }
            }
        }

        self.write_pos = (self.write_pos + 1) & self.buffer_mask;

        delayed_frame
    }

    /// Returns the absolute peak value in the lookahead window from all channels.
    pub fn peak_value(&self) -> f32 {
        self.peak_value
    }

    fn frame_peak(frame: &[f32; CHANNELS]) -> f32 {
        frame.iter().fold(0.0f32, |max, &val| max.max(val.abs()))
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_line_read_write() {
        let mut delay = DelayLine::<1>::new(4);
        assert!(delay.max_delay_frames() >= 4);
        for i in 1..=4 {
            delay.write([i as f32]);
        }
        assert_eq!(delay.read(1.0), [4.0]);
        assert_eq!(delay.read(4.0), [1.0]);
        assert_eq!(delay.read(1.5), [3.5]);
        // wraps around
        for i in 5..=10 {
            delay.write([i as f32]);
        }
        assert_eq!(delay.read(1.0), [10.0]);
        assert_eq!(delay.read(3.0), [8.0]);

        delay.flush();
        assert_eq!(delay.read(2.0), [0.0]);
    }

    #[test]
    fn lookup_delay_line() {
        let mut delay = LookupDelayLine::<2>::new(12, 0.25);
        assert_eq!(delay.delay_frames(), 3);
        assert_eq!(delay.process(&[0.5, -0.8]), [0.0, 0.0]);
        assert_eq!(delay.peak_value(), 0.8);
        delay.process(&[0.1, 0.1]);
        delay.process(&[0.1, 0.1]);
        assert_eq!(delay.process(&[0.2, 0.2]), [0.5, -0.8]);
        // peak left the lookahead window
        assert_eq!(delay.process(&[0.1, 0.1]), [0.1, 0.1]);
        assert_eq!(delay.peak_value(), 0.2);

        let mut passthrough = LookupDelayLine::<2>::new(12, 0.0);
        assert_eq!(passthrough.process(&[0.3, 0.4]), [0.3, 0.4]);
        assert_eq!(passthrough.peak_value(), 0.4);
    }
}
