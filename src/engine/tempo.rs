//! Offline tempo estimation of decoded sample buffers.

use std::{collections::HashMap, sync::Arc, thread};

use crossbeam_channel::{Receiver, TryRecvError};

use crate::{
    utils::dsp::filters::biquad::{BiquadFilter, BiquadFilterCoefficients},
    AudioBuffer, Error,
};

// -------------------------------------------------------------------------------------------------

/// Tempo which is used when no tempo could be detected.
pub const DEFAULT_BPM: f64 = 120.0;

/// Lowpass cutoff in Hz which isolates kick drum alike transients.
const LOWPASS_CUTOFF: f32 = 150.0;
const LOWPASS_Q: f32 = 0.707;
/// Absolute amplitude a filtered sample must exceed to count as peak.
const PEAK_THRESHOLD: f32 = 0.3;
/// Min distance in seconds between two accepted peaks.
const PEAK_REFRACTORY_TIME: f64 = 0.25;
/// Size of the histogram buckets inter peak intervals are quantized to, in sample frames.
const INTERVAL_BUCKET_SIZE: f64 = 1000.0;
/// Estimated tempos are folded by octaves into this range.
const MIN_BPM: f64 = 70.0;
const MAX_BPM: f64 = 180.0;

// -------------------------------------------------------------------------------------------------

/// Detect the tempo of the given buffer in beats per minute.
///
/// Never fails: when the buffer can't be analyzed, or when it contains no clear beat, this
/// returns [`DEFAULT_BPM`]. Runs the entire analysis in the calling thread, so this should not
/// be called in time critical threads. See [`TempoDetection`] for a background variant.
pub fn detect_bpm(buffer: &AudioBuffer) -> f64 {
    match estimate_bpm(buffer) {
        Ok(bpm) => bpm,
        Err(err) => {
            log::warn!("Tempo detection failed: {err}. Falling back to {DEFAULT_BPM} BPM");
            DEFAULT_BPM
        }
    }
}

/// Estimate the tempo of the given buffer in beats per minute.
///
/// Lowpass filters a mono mixdown of the buffer, picks peaks above a fixed threshold and
/// returns the tempo of the most frequent (quantized) interval between peaks, folded into the
/// range \[70, 180\]. Buffers without at least two peaks result in [`DEFAULT_BPM`].
///
/// Fails when the buffer's sample rate is too low to apply the analysis filter.
pub fn estimate_bpm(buffer: &AudioBuffer) -> Result<f64, Error> {
    let sample_rate = buffer.sample_rate();
    let channel_count = buffer.channel_count();

    let coefficients =
        BiquadFilterCoefficients::new_lowpass(sample_rate, LOWPASS_CUTOFF, LOWPASS_Q)?;
    let mut filter = BiquadFilter::new();

    let refractory_frames = (PEAK_REFRACTORY_TIME * sample_rate as f64) as usize;
    let mut peaks = Vec::new();
    let mut last_peak: Option<usize> = None;
    for (frame_index, frame) in buffer.samples().chunks_exact(channel_count).enumerate() {
        let mono = frame.iter().sum::<f32>() / channel_count as f32;
        let filtered = filter.process_sample(&coefficients, mono as f64) as f32;
        if filtered.abs() > PEAK_THRESHOLD
            && last_peak.map_or(true, |last| frame_index - last >= refractory_frames)
        {
            peaks.push(frame_index);
            last_peak = Some(frame_index);
        }
    }
    if peaks.len() < 2 {
        log::debug!("Found less than 2 peaks. Using default tempo");
        return Ok(DEFAULT_BPM);
    }

    // quantized interval -> votes
    let mut histogram = HashMap::<u64, usize>::new();
    for interval in peaks.windows(2).map(|pair| (pair[1] - pair[0]) as f64) {
        let bucket = (interval / INTERVAL_BUCKET_SIZE).round() * INTERVAL_BUCKET_SIZE;
        if bucket > 0.0 {
            *histogram.entry(bucket as u64).or_default() += 1;
        }
    }
    // most votes win, shorter intervals win ties
    let Some((interval, _)) = histogram
        .into_iter()
        .max_by(|(a_interval, a_votes), (b_interval, b_votes)| {
            a_votes.cmp(b_votes).then(b_interval.cmp(a_interval))
        })
    else {
        log::debug!("Found no valid peak intervals. Using default tempo");
        return Ok(DEFAULT_BPM);
    };

    let mut bpm = 60.0 / (interval as f64 / sample_rate as f64);
    while bpm < MIN_BPM {
        bpm *= 2.0;
    }
    while bpm > MAX_BPM {
        bpm /= 2.0;
    }
    log::debug!(
        "Detected {bpm:.2} BPM from {} peaks (interval: {interval} frames)",
        peaks.len()
    );
    Ok(bpm)
}

// -------------------------------------------------------------------------------------------------

/// A tempo detection which runs in a background thread.
///
/// Poll the result with [`TempoDetection::try_result`] or block until it's ready with
/// [`TempoDetection::wait`]. Dropping the handle discards the result: the detection then runs
/// to completion in the background, but its result is never applied.
pub struct TempoDetection {
    receiver: Receiver<f64>,
    result: Option<f64>,
}

impl TempoDetection {
    /// Start detecting the tempo of the given buffer in a new background thread.
    pub fn spawn(buffer: Arc<AudioBuffer>) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let spawn_result = thread::Builder::new()
            .name("tempo_detection".to_string())
            .spawn(move || {
                // receiver may be gone already
                let _ = sender.send(detect_bpm(&buffer));
            });
        let result = match spawn_result {
            Ok(_) => None,
            Err(err) => {
                log::warn!("Failed to spawn tempo detection thread: {err}");
                Some(DEFAULT_BPM)
            }
        };
        Self { receiver, result }
    }

    /// The detected tempo, or None when the detection still is running.
    pub fn try_result(&mut self) -> Option<f64> {
        if self.result.is_none() {
            match self.receiver.try_recv() {
                Ok(bpm) => self.result = Some(bpm),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    log::warn!("Tempo detection thread quit unexpectedly");
                    self.result = Some(DEFAULT_BPM);
                }
            }
        }
        self.result
    }

    /// Block until the detection finished and return the detected tempo.
    pub fn wait(self) -> f64 {
        if let Some(bpm) = self.result {
            return bpm;
        }
        self.receiver.recv().unwrap_or_else(|_| {
            log::warn!("Tempo detection thread quit unexpectedly");
            DEFAULT_BPM
        })
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;

    const SAMPLE_RATE: u32 = 48000;

    /// Mono buffer with 50ms long 60Hz bursts every `interval` frames.
    fn burst_track(interval: usize, bursts: usize, channel_count: usize) -> AudioBuffer {
        let burst_frames = SAMPLE_RATE as usize / 20;
        let frame_count = interval * bursts;
        let mut samples = vec![0.0; frame_count * channel_count];
        for burst in 0..bursts {
            let start = burst * interval;
            for frame in 0..burst_frames {
                let t = frame as f64 / SAMPLE_RATE as f64;
                let value = (0.9 * (2.0 * PI * 60.0 * t).sin()) as f32;
                for channel in 0..channel_count {
                    samples[(start + frame) * channel_count + channel] = value;
                }
            }
        }
        AudioBuffer::new(samples, channel_count, SAMPLE_RATE).unwrap()
    }

    #[test]
    fn detects_burst_tempos() {
        // 120 BPM: a burst every 0.5 seconds
        assert_eq!(detect_bpm(&burst_track(24000, 8, 1)), 120.0);
        // 90 BPM
        assert_eq!(detect_bpm(&burst_track(32000, 8, 1)), 90.0);
        // stereo mixdowns work the same
        assert_eq!(detect_bpm(&burst_track(24000, 8, 2)), 120.0);
    }

    #[test]
    fn folds_into_plausible_range() {
        // 40 BPM doubles up to 80
        assert_eq!(detect_bpm(&burst_track(72000, 4, 1)), 80.0);
        // 240 BPM halves down to 120
        assert_eq!(detect_bpm(&burst_track(12000, 16, 1)), 120.0);
    }

    #[test]
    fn falls_back_to_default() {
        // silence
        let silence = AudioBuffer::new(vec![0.0; 48000 * 2], 2, SAMPLE_RATE).unwrap();
        assert_eq!(detect_bpm(&silence), DEFAULT_BPM);
        // a single peak only
        assert_eq!(detect_bpm(&burst_track(48000, 1, 1)), DEFAULT_BPM);
        // empty buffers
        let empty = AudioBuffer::new(Vec::new(), 1, SAMPLE_RATE).unwrap();
        assert_eq!(detect_bpm(&empty), DEFAULT_BPM);
        // sample rate too low to run the analysis filter
        let low_rate = AudioBuffer::new(vec![1.0; 400], 1, 200).unwrap();
        assert!(estimate_bpm(&low_rate).is_err());
        assert_eq!(detect_bpm(&low_rate), DEFAULT_BPM);
    }

    #[test]
    fn background_detection() {
        let buffer = Arc::new(burst_track(32000, 6, 1));
        let detection = TempoDetection::spawn(Arc::clone(&buffer));
        assert_eq!(detection.wait(), 90.0);

        let mut detection = TempoDetection::spawn(buffer);
        let bpm = loop {
            if let Some(bpm) = detection.try_result() {
                break bpm;
            }
            thread::sleep(std::time::Duration::from_millis(1));
        };
        assert_eq!(bpm, 90.0);
        assert_eq!(detection.try_result(), Some(90.0));
    }
}
