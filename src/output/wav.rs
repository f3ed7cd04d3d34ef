use std::{
    fs::File,
    io::BufWriter,
    path::Path,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::{
    error::Error,
    output::{OutputClock, OutputDevice},
    source::{Source, SourceTime},
    utils::buffer::clear_buffer,
};

// -------------------------------------------------------------------------------------------------

const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_CHANNEL_COUNT: usize = 2;

const BUFFER_SIZE_FRAMES: usize = 512;

// -------------------------------------------------------------------------------------------------

/// Audio output device, which writes audio into a wav file instead of playing it back.
///
/// Rendering is paced to realtime, so the engine's lookahead scheduler sees a clock which
/// behaves like a real audio device's clock. While paused, no samples are written.
///
/// Like all other output devices, the wav output device initially is paused, so it must be
/// resumed after everything you want to write got set up.
pub struct WavOutput {
    channel_count: usize,
    sample_rate: u32,
    clock: OutputClock,
    stream: Arc<Mutex<WavStream>>,
    writer_thread: Option<JoinHandle<()>>,
}

impl WavOutput {
    /// Open a wav output device to write at the given file using default specs and an
    /// endless duration.
    pub fn open<P: AsRef<Path>>(file_path: P) -> Result<Self, Error> {
        Self::open_with_specs(file_path, DEFAULT_SAMPLE_RATE, DEFAULT_CHANNEL_COUNT, None)
    }

    /// Create a new wav output device with the given parameters.
    ///
    /// * `file_path`: Target file path. Should end with ".wav" extension.
    /// * `sample_rate`: The wav file's sample rate.
    /// * `channel_count`: The wav file's channel layout.
    /// * `duration`: Optional max length of the written content. When the duration elapsed,
    ///   the file gets finalized and the device stops running.
    ///
    /// Wav files contents are always saved as 32bit floats.
    pub fn open_with_specs<P: AsRef<Path>>(
        file_path: P,
        sample_rate: u32,
        channel_count: usize,
        duration: Option<Duration>,
    ) -> Result<Self, Error> {
        if sample_rate == 0 || channel_count == 0 || channel_count > u16::MAX as usize {
            return Err(Error::ParameterError(format!(
                "Invalid wav output specs: {channel_count} channels @ {sample_rate}Hz"
            )));
        }
        let spec = WavSpec {
            channels: channel_count as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };

        let writer = WavWriter::create(file_path, spec)
            .map_err(|err| Error::OutputDeviceError(Box::new(err)))?;

        let clock = OutputClock::new(sample_rate, channel_count);
        let max_frames = duration.map(|duration| {
            (duration.as_secs_f64() * sample_rate as f64).round() as u64
        });

        let stream = Arc::new(Mutex::new(WavStream {
            writer: Some(writer),
            channel_count,
            sample_rate,
            clock: clock.clone(),
            source: None,
            buffer: vec![0.0; BUFFER_SIZE_FRAMES * channel_count],
            running: false,
            closed: false,
            resume_instant: Instant::now(),
            resume_frames: 0,
            max_frames,
        }));

        // Start the writer in a new thread
        let writer_thread = thread::Builder::new()
            .name("wav_output".to_string())
            .spawn({
                let stream = Arc::clone(&stream);
                move || {
                    loop {
                        // process the next audio slices
                        {
                            let Ok(mut stream) = stream.lock() else {
                                log::error!("WAV output stream got poisoned");
                                break;
                            };
                            if let Err(err) = stream.process() {
                                log::error!("Error processing WAV output: {err}");
                                stream.closed = true;
                            }
                            if stream.closed {
                                stream.finalize();
                                break;
                            }
                        }
                        // sleep for a short time to avoid busy waiting
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })?;

        Ok(Self {
            channel_count,
            sample_rate,
            clock,
            stream,
            writer_thread: Some(writer_thread),
        })
    }

    fn with_stream<R>(&self, f: impl FnOnce(&mut WavStream) -> R) -> Option<R> {
        match self.stream.lock() {
            Ok(mut stream) => Some(f(&mut stream)),
            Err(_) => {
                log::error!("WAV output stream got poisoned");
                None
            }
        }
    }
}

impl OutputDevice for WavOutput {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clock(&self) -> OutputClock {
        self.clock.clone()
    }

    fn is_running(&self) -> bool {
        self.with_stream(|stream| stream.running && !stream.closed)
            .unwrap_or(false)
    }

    fn play(&mut self, source: Box<dyn Source>) {
        // ensure source has our sample rate and channel layout
        if source.channel_count() != self.channel_count || source.sample_rate() != self.sample_rate
        {
            log::error!(
                "Ignoring output source with mismatching signal specs: {} channels @ {}Hz",
                source.channel_count(),
                source.sample_rate()
            );
            return;
        }
        self.with_stream(move |stream| stream.source = Some(source));
    }

    fn pause(&mut self) {
        self.with_stream(|stream| stream.running = false);
    }

    fn resume(&mut self) {
        self.with_stream(|stream| {
            if !stream.running && !stream.closed {
                stream.running = true;
                stream.resume_instant = Instant::now();
                stream.resume_frames = stream.clock.frames();
            }
        });
    }

    fn close(&mut self) {
        if let Some(writer_thread) = self.writer_thread.take() {
            self.with_stream(|stream| stream.closed = true);
            if writer_thread.join().is_err() {
                log::error!("WAV output thread panicked");
            }
        }
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// -------------------------------------------------------------------------------------------------

struct WavStream {
    writer: Option<WavWriter<BufWriter<File>>>,
    channel_count: usize,
    sample_rate: u32,
    clock: OutputClock,
    source: Option<Box<dyn Source>>,
    buffer: Vec<f32>,
    running: bool,
    closed: bool,
    resume_instant: Instant,
    resume_frames: u64,
    max_frames: Option<u64>,
}

impl WavStream {
    /// Render all frames which are due since the last call.
    fn process(&mut self) -> Result<(), Error> {
        // Do nothing when we didn't start yet
        if !self.running || self.closed {
            return Ok(());
        }

        let elapsed_frames =
            (self.resume_instant.elapsed().as_secs_f64() * self.sample_rate as f64) as u64;
        let mut target_frames = self.resume_frames + elapsed_frames;
        if let Some(max_frames) = self.max_frames {
            target_frames = target_frames.min(max_frames);
        }

        let mut current_frames = self.clock.frames();
        while current_frames < target_frames {
            let frame_count =
                ((target_frames - current_frames) as usize).min(BUFFER_SIZE_FRAMES);
            let buffer = &mut self.buffer[..frame_count * self.channel_count];

            // Write out as many samples as possible from the audio source to the buffer.
            let written = match self.source.as_mut() {
                Some(source) => source.write(buffer, &SourceTime::new(current_frames)),
                None => 0,
            };
            clear_buffer(&mut buffer[written..]);

            // Write to WAV file
            if let Some(writer) = self.writer.as_mut() {
                for sample in buffer.iter() {
                    writer
                        .write_sample(*sample)
                        .map_err(|err| Error::OutputDeviceError(Box::new(err)))?;
                }
            }

            self.clock.advance(buffer.len() as u64);
            current_frames += frame_count as u64;
        }

        // Stop running when we've reached the duration
        if self.max_frames.is_some_and(|max_frames| current_frames >= max_frames) {
            log::info!("WAV output reached its duration");
            self.closed = true;
        }
        Ok(())
    }

    fn finalize(&mut self) {
        self.running = false;
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.finalize() {
                log::error!("Failed to finalize WAV file: {err}");
            }
        }
    }
}

impl Drop for WavStream {
    fn drop(&mut self) {
        self.finalize();
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::unique_usize_id;

    struct ConstantSource {
        value: f32,
        sample_rate: u32,
    }

    impl Source for ConstantSource {
        fn write(&mut self, output: &mut [f32], _time: &SourceTime) -> usize {
            output.fill(self.value);
            output.len()
        }
        fn channel_count(&self) -> usize {
            2
        }
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
        fn is_exhausted(&self) -> bool {
            false
        }
    }

    fn temp_wav_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("grainfield-test-{}.wav", unique_usize_id()))
    }

    #[test]
    fn writes_paced_output() {
        let path = temp_wav_path();
        let mut output =
            WavOutput::open_with_specs(&path, 8000, 2, Some(Duration::from_millis(50))).unwrap();
        assert!(!output.is_running());
        output.play(Box::new(ConstantSource {
            value: 0.25,
            sample_rate: 8000,
        }));
        // sources with mismatching specs are ignored
        output.play(Box::new(ConstantSource {
            value: 1.0,
            sample_rate: 44100,
        }));
        output.resume();
        assert!(output.is_running());

        // give the writer time to reach its duration
        let start = Instant::now();
        while output.clock().frames() < 400 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        output.close();
        assert!(!output.is_running());
        assert_eq!(output.clock().frames(), 400);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        let samples = reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(samples.len(), 800);
        assert!(samples.iter().all(|s| *s == 0.25));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn paused_output_keeps_position() {
        let path = temp_wav_path();
        let mut output = WavOutput::open_with_specs(&path, 8000, 2, None).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(output.clock().frames(), 0);
        output.resume();
        thread::sleep(Duration::from_millis(20));
        output.pause();
        thread::sleep(Duration::from_millis(5));
        let position = output.clock().frames();
        assert!(position > 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(output.clock().frames(), position);
        output.close();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_invalid_specs() {
        let path = temp_wav_path();
        assert!(WavOutput::open_with_specs(&path, 0, 2, None).is_err());
        assert!(WavOutput::open_with_specs(&path, 8000, 0, None).is_err());
    }
}
