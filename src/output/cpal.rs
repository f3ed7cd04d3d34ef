use std::thread::{self, JoinHandle};

#[cfg(feature = "assert-allocs")]
use assert_no_alloc::*;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    StreamConfig,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::{
    error::Error,
    output::{OutputClock, OutputDevice},
    source::{Source, SourceTime},
};

// -------------------------------------------------------------------------------------------------

const PREFERRED_SAMPLE_FORMAT: cpal::SampleFormat = cpal::SampleFormat::F32;
const PREFERRED_SAMPLE_RATE: cpal::SampleRate = cpal::SampleRate(44100);
const PREFERRED_CHANNELS: cpal::ChannelCount = 2;
const PREFERRED_BUFFER_SIZE: cpal::BufferSize = if cfg!(debug_assertions) {
    cpal::BufferSize::Default
} else {
    cpal::BufferSize::Fixed(1024)
};

// -------------------------------------------------------------------------------------------------

/// Audio output device which plays through the system's default audio host and device.
///
/// cpal streams can't be moved across threads on all platforms, so the stream lives in a
/// dedicated thread which receives pause, resume and close requests. Sources and playback
/// state changes are passed to the stream's realtime callback via a separate channel.
pub struct CpalOutput {
    channel_count: usize,
    sample_rate: u32,
    clock: OutputClock,
    is_running: bool,
    callback_send: Sender<CallbackMsg>,
    stream_send: Sender<StreamMsg>,
    stream_thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device of the default host. The device starts paused.
    pub fn open() -> Result<Self, Error> {
        let host = cpal::default_host();

        // Open the default output device.
        let device = host
            .default_output_device()
            .ok_or(cpal::DefaultStreamConfigError::DeviceNotAvailable)?;

        if let Ok(name) = device.name() {
            log::info!("Using audio device: {name}");
        }

        // Get the default device config, so we know what sample format and sample rate
        // the device supports.
        let supported = Self::preferred_output_config(&device)?;
        if supported.sample_format() != PREFERRED_SAMPLE_FORMAT {
            return Err(Error::OutputDeviceError(
                format!(
                    "Unsupported output sample format: {:?}",
                    supported.sample_format()
                )
                .into(),
            ));
        }
        let channel_count = supported.channels() as usize;
        let sample_rate = supported.sample_rate().0;
        let clock = OutputClock::new(sample_rate, channel_count);

        let (callback_send, callback_recv) = bounded(16);
        let (stream_send, stream_recv) = unbounded();
        let (ready_send, ready_recv) = bounded::<Result<(), Error>>(1);

        let stream_thread = thread::Builder::new()
            .name("audio_output".to_string())
            .spawn({
                let config = StreamConfig {
                    buffer_size: PREFERRED_BUFFER_SIZE,
                    ..supported.config()
                };
                let clock = clock.clone();
                move || {
                    let callback = StreamCallback {
                        callback_recv,
                        source: None,
                        clock,
                        state: CallbackState::Paused,
                    };
                    match Stream::open(device, config, callback) {
                        Ok(stream) => {
                            let _ = ready_send.send(Ok(()));
                            stream.run(stream_recv);
                        }
                        Err(err) => {
                            let _ = ready_send.send(Err(err));
                        }
                    }
                }
            })?;

        // wait until the stream got opened
        ready_recv
            .recv()
            .map_err(|err| Error::SendError(err.to_string()))??;

        Ok(Self {
            channel_count,
            sample_rate,
            clock,
            is_running: false,
            callback_send,
            stream_send,
            stream_thread: Some(stream_thread),
        })
    }

    fn preferred_output_config(
        device: &cpal::Device,
    ) -> Result<cpal::SupportedStreamConfig, Error> {
        for s in device.supported_output_configs()? {
            let rates = s.min_sample_rate()..=s.max_sample_rate();
            if s.channels() == PREFERRED_CHANNELS
                && s.sample_format() == PREFERRED_SAMPLE_FORMAT
                && rates.contains(&PREFERRED_SAMPLE_RATE)
            {
                return Ok(s.with_sample_rate(PREFERRED_SAMPLE_RATE));
            }
        }

        Ok(device.default_output_config()?)
    }

    fn send_to_callback(&self, msg: CallbackMsg) {
        if self.callback_send.send(msg).is_err() {
            log::error!("Output stream callback is dead");
        }
    }

    fn send_to_stream(&self, msg: StreamMsg) {
        if self.stream_send.send(msg).is_err() {
            log::error!("Output stream thread is dead");
        }
    }
}

impl OutputDevice for CpalOutput {
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
        self.is_running
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
        // send message to activate it in the writer
        self.send_to_callback(CallbackMsg::PlaySource(source));
    }

    fn pause(&mut self) {
        if self.is_running {
            self.is_running = false;
            self.send_to_stream(StreamMsg::Pause);
            self.send_to_callback(CallbackMsg::Pause);
        }
    }

    fn resume(&mut self) {
        if !self.is_running && self.stream_thread.is_some() {
            self.is_running = true;
            self.send_to_stream(StreamMsg::Resume);
            self.send_to_callback(CallbackMsg::Resume);
        }
    }

    fn close(&mut self) {
        if let Some(stream_thread) = self.stream_thread.take() {
            self.is_running = false;
            self.send_to_stream(StreamMsg::Close);
            if stream_thread.join().is_err() {
                log::error!("Output stream thread panicked");
            }
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// -------------------------------------------------------------------------------------------------

struct Stream {
    stream: cpal::Stream,
    _device: cpal::Device,
}

impl Stream {
    fn open(
        device: cpal::Device,
        config: cpal::StreamConfig,
        mut callback: StreamCallback,
    ) -> Result<Self, Error> {
        log::info!("Opening output stream: {config:?}");
        let stream = device.build_output_stream(
            &config,
            move |output: &mut [f32], _| {
                callback.write_samples(output);
            },
            |err| {
                log::error!("Audio output error: {err}");
            },
            None,
        )?;

        Ok(Self {
            _device: device,
            stream,
        })
    }

    /// Handle stream messages until the stream got closed or the device got dropped.
    fn run(self, stream_recv: Receiver<StreamMsg>) {
        while let Ok(msg) = stream_recv.recv() {
            match msg {
                StreamMsg::Pause => {
                    log::debug!("Pausing audio output stream");
                    if let Err(err) = self.stream.pause() {
                        log::error!("Failed to pause stream: {err}");
                    }
                }
                StreamMsg::Resume => {
                    log::debug!("Resuming audio output stream");
                    if let Err(err) = self.stream.play() {
                        log::error!("Failed to start stream: {err}");
                    }
                }
                StreamMsg::Close => {
                    log::info!("Closing audio output stream");
                    let _ = self.stream.pause();
                    break;
                }
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

enum StreamMsg {
    Pause,
    Resume,
    Close,
}

enum CallbackMsg {
    PlaySource(Box<dyn Source>),
    Pause,
    Resume,
}

enum CallbackState {
    Playing,
    Paused,
}

struct StreamCallback {
    callback_recv: Receiver<CallbackMsg>,
    source: Option<Box<dyn Source>>,
    clock: OutputClock,
    state: CallbackState,
}

impl StreamCallback {
    fn write_samples(&mut self, output: &mut [f32]) {
        // Process any pending data messages.
        while let Ok(msg) = self.callback_recv.try_recv() {
            match msg {
                CallbackMsg::PlaySource(source) => {
                    // NB: the old source gets dropped in the realtime thread here. Sources are
                    // replaced rarely, so this is acceptable.
                    self.source = Some(source);
                }
                CallbackMsg::Pause => {
                    self.state = CallbackState::Paused;
                }
                CallbackMsg::Resume => {
                    self.state = CallbackState::Playing;
                }
            }
        }

        let written = if matches!(self.state, CallbackState::Playing) {
            let written = if let Some(source) = self.source.as_mut() {
                // Write out as many samples as possible from the audio source to the output buffer.
                let time = SourceTime::new(self.clock.frames());

                #[cfg(not(feature = "assert-allocs"))]
                let written = source.write(output, &time);
                #[cfg(feature = "assert-allocs")]
                let written = assert_no_alloc(|| source.write(output, &time));

                written
            } else {
                0
            };

            // Advance playback pos
            self.clock.advance(output.len() as u64);

            // return modified samples
            written
        } else {
            0
        };

        // Mute any remaining samples.
        output[written..].iter_mut().for_each(|s| *s = 0.0);
    }
}

// -------------------------------------------------------------------------------------------------

impl From<cpal::DefaultStreamConfigError> for Error {
    fn from(err: cpal::DefaultStreamConfigError) -> Error {
        Error::OutputDeviceError(Box::new(err))
    }
}

impl From<cpal::SupportedStreamConfigsError> for Error {
    fn from(err: cpal::SupportedStreamConfigsError) -> Error {
        Error::OutputDeviceError(Box::new(err))
    }
}

impl From<cpal::BuildStreamError> for Error {
    fn from(err: cpal::BuildStreamError) -> Error {
        Error::OutputDeviceError(Box::new(err))
    }
}
