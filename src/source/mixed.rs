use std::{collections::VecDeque, sync::Arc};

use basedrop::Owned;
use crossbeam_queue::ArrayQueue;

use crate::{
    effect::{
        compressor::CompressorEffect,
        delay::{DubDelayEffect, DubDelayEffectMessage},
        Effect,
    },
    engine::params::GlobalParams,
    source::{grain::GrainVoice, Source, SourceTime},
    utils::{
        buffer::{add_buffers, clear_buffer, copy_buffers, InterleavedBuffer},
        event::{Event, EventProcessor},
        smoothed::{apply_smoothed_frame_gain, ExponentialSmoothedValue, SmoothedValue},
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Target values of the mixer's bus parameters. Changes get applied smoothed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixBusParameters {
    /// Linear gain of the final mix, before the limiter.
    pub master_gain: f32,
    /// Linear gain of the delay's input.
    pub send_level: f32,
    /// Linear gain of the delay's feedback loop.
    pub feedback: f32,
    /// Delay time in seconds.
    pub delay_time: f32,
}

impl MixBusParameters {
    /// Delay time in seconds when beat sync is disabled.
    pub const FREE_DELAY_TIME: f64 = 0.5;
    /// Delay time in beats when beat sync is enabled: a dotted eighth.
    pub const SYNCED_DELAY_BEATS: f64 = 0.75;

    /// Derive bus parameters from the engine's global parameters. Out of range or invalid
    /// global parameters get clamped.
    pub fn from_global(global: &GlobalParams) -> Self {
        let clamped = |value: f64, max: f64| {
            if value.is_nan() {
                0.0
            } else {
                value.clamp(0.0, max)
            }
        };
        let master_gain = clamped(global.output_gain, 2.0);
        let space = clamped(global.space, 1.0);
        let send_level = space;
        let feedback = (space * 0.8).min(DubDelayEffect::MAX_FEEDBACK as f64);
        let delay_time = if global.beat_sync {
            global.beat_duration() * Self::SYNCED_DELAY_BEATS
        } else {
            Self::FREE_DELAY_TIME
        };
        let delay_time = delay_time.clamp(
            DubDelayEffect::MIN_DELAY_TIME as f64,
            DubDelayEffect::MAX_DELAY_TIME as f64,
        );
        Self {
            master_gain: master_gain as f32,
            send_level: send_level as f32,
            feedback: feedback as f32,
            delay_time: delay_time as f32,
        }
    }
}

impl Default for MixBusParameters {
    fn default() -> Self {
        Self::from_global(&GlobalParams::default())
    }
}

// -------------------------------------------------------------------------------------------------

/// Mixer internal struct to keep track of currently playing grain voices.
pub(crate) struct PlayingVoice {
    is_active: bool,
    voice: Owned<GrainVoice>,
    start_time: u64,
    stop_time: u64,
}

// -------------------------------------------------------------------------------------------------

/// Mixer internal struct to apply sample time tagged events.
pub(crate) enum MixerEvent {
    SetBusParameters {
        parameters: MixBusParameters,
        sample_time: u64,
    },
}

impl Event for MixerEvent {
    fn sample_time(&self) -> u64 {
        match self {
            Self::SetBusParameters { sample_time, .. } => *sample_time,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Messages send from the engine to the mixer to schedule voices or change bus parameters.
pub(crate) enum MixerMessage {
    AddVoice {
        voice: Owned<GrainVoice>,
        start_time: u64,
        stop_time: u64,
    },
    SetBusParameters {
        parameters: MixBusParameters,
        sample_time: u64,
    },
}

// -------------------------------------------------------------------------------------------------

/// A [`Source`] which plays scheduled grain voices through a fixed effect graph.
///
/// Every voice feeds a grain bus and a delay send bus. The send bus runs through a
/// [`DubDelayEffect`], whose wet output joins the grain bus. The sum then gets scaled by the
/// master gain and limited by a [`CompressorEffect`] in limiter mode. Voices are started and
/// stopped sample accurately at the sample times they got scheduled with.
///
/// Internally all busses are stereo. Mono outputs receive a mixdown, outputs with more than two
/// channels get the stereo mix in their first two channels.
pub struct GrainMixer {
    playing_voices: VecDeque<PlayingVoice>,
    message_queue: Arc<ArrayQueue<MixerMessage>>,
    events: VecDeque<MixerEvent>,
    channel_count: usize,
    sample_rate: u32,
    master_gain: ExponentialSmoothedValue,
    delay: DubDelayEffect,
    limiter: CompressorEffect,
    grain_bus: Vec<f32>,
    send_bus: Vec<f32>,
    temp_out: Vec<f32>,
}

impl GrainMixer {
    /// The size of the temporary buffers used for mixing, in frames.
    /// Voices and effects will never be requested to produce more frames than this const.
    pub const MAX_MIX_BUFFER_FRAMES: usize = 2048;

    /// Default size of the mixer's message queue.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

    /// Limiter specs.
    pub const LIMITER_THRESHOLD: f32 = -3.0;
    pub const LIMITER_ATTACK: f32 = 0.001;
    pub const LIMITER_RELEASE: f32 = 0.1;

    const BUS_CHANNEL_COUNT: usize = 2;

    /// Create a new mixer with the given output signal specs and initial bus parameters.
    pub fn new(
        channel_count: usize,
        sample_rate: u32,
        parameters: &MixBusParameters,
        queue_capacity: usize,
    ) -> Result<Self, Error> {
        if channel_count == 0 {
            return Err(Error::ParameterError(
                "Mixer channel count must be > 0".to_string(),
            ));
        }

        // prealloc playing voice list and event queues
        const PLAYING_VOICES_CAPACITY: usize = 1024;
        let playing_voices = VecDeque::with_capacity(PLAYING_VOICES_CAPACITY);
        let message_queue = Arc::new(ArrayQueue::new(queue_capacity.max(1)));
        const EVENTS_CAPACITY: usize = 256;
        let events = VecDeque::with_capacity(EVENTS_CAPACITY);

        let master_gain = ExponentialSmoothedValue::new(parameters.master_gain, sample_rate);

        let bus_samples = Self::MAX_MIX_BUFFER_FRAMES * Self::BUS_CHANNEL_COUNT;
        let mut delay = DubDelayEffect::with_parameters(
            parameters.send_level,
            parameters.feedback,
            parameters.delay_time,
        );
        delay.initialize(
            sample_rate,
            Self::BUS_CHANNEL_COUNT,
            Self::MAX_MIX_BUFFER_FRAMES,
        )?;
        let mut limiter = CompressorEffect::with_limiter_parameters(
            Self::LIMITER_THRESHOLD,
            Self::LIMITER_ATTACK,
            Self::LIMITER_RELEASE,
        );
        limiter.initialize(
            sample_rate,
            Self::BUS_CHANNEL_COUNT,
            Self::MAX_MIX_BUFFER_FRAMES,
        )?;

        // create temp mix buffers
        let grain_bus = vec![0.0; bus_samples];
        let send_bus = vec![0.0; bus_samples];
        let temp_out = vec![0.0; bus_samples];

        Ok(Self {
            playing_voices,
            message_queue,
            events,
            channel_count,
            sample_rate,
            master_gain,
            delay,
            limiter,
            grain_bus,
            send_bus,
            temp_out,
        })
    }

    /// Allows controlling the mixer by pushing messages into this event queue.
    /// NB: Voices must be created with the mixer's sample rate.
    pub(crate) fn message_queue(&self) -> Arc<ArrayQueue<MixerMessage>> {
        Arc::clone(&self.message_queue)
    }

    /// Number of voices which are playing or waiting to be played.
    pub fn playing_voice_count(&self) -> usize {
        self.playing_voices.len()
    }

    /// Output latency of the mixer in sample frames, caused by the limiter's lookahead.
    pub fn latency(&self) -> usize {
        self.limiter.latency()
    }

    /// Process pending mixer messages
    fn process_messages(&mut self) {
        while let Some(message) = self.message_queue.pop() {
            match message {
                MixerMessage::AddVoice {
                    voice,
                    start_time,
                    stop_time,
                } => {
                    debug_assert_eq!(
                        voice.sample_rate(),
                        self.sample_rate,
                        "create voices with the mixer's sample rate"
                    );
                    // sort playing_voices by start time
                    let playing_voices = &mut self.playing_voices;
                    let insert_pos = playing_voices
                        .make_contiguous()
                        .partition_point(|v| v.start_time <= start_time);
                    playing_voices.insert(
                        insert_pos,
                        PlayingVoice {
                            is_active: true,
                            voice,
                            start_time,
                            stop_time,
                        },
                    );
                }
                MixerMessage::SetBusParameters {
                    parameters,
                    sample_time,
                } => {
                    self.insert_event(MixerEvent::SetBusParameters {
                        parameters,
                        sample_time,
                    });
                }
            }
        }
    }

    // Write and mix down all due voices into the grain and send busses.
    fn process_voices(&mut self, frame_count: usize, time: &SourceTime) {
        let bus_len = frame_count * Self::BUS_CHANNEL_COUNT;
        let grain_bus = &mut self.grain_bus[..bus_len];
        let send_bus = &mut self.send_bus[..bus_len];
        clear_buffer(grain_bus);
        clear_buffer(send_bus);

        let chunk_end_time = time.pos_in_frames + frame_count as u64;
        'all_voices: for playing_voice in self.playing_voices.iter_mut() {
            if !playing_voice.is_active {
                continue;
            }
            let mut total_written = 0;

            // apply voice's sample start time
            if playing_voice.start_time > time.pos_in_frames {
                let frames_until_voice_starts =
                    (playing_voice.start_time - time.pos_in_frames) as usize;
                if frames_until_voice_starts >= frame_count {
                    // playing_voices are sorted by start time: all following voices will start
                    // after this voice, and thus can also be skipped...
                    break 'all_voices;
                }
                total_written += frames_until_voice_starts * Self::BUS_CHANNEL_COUNT;
            }

            // apply voice's sample stop time
            let frames_until_stop = playing_voice
                .stop_time
                .saturating_sub(time.pos_in_frames)
                .min(frame_count as u64) as usize;
            let end = frames_until_stop * Self::BUS_CHANNEL_COUNT;

            // run voice on temp_out until we've reached its end or the end of the chunk
            let voice = &mut playing_voice.voice;
            while total_written < end {
                let voice_time = time
                    .with_added_frames((total_written / Self::BUS_CHANNEL_COUNT) as u64);
                let to_write = end - total_written;
                let written = voice.write(&mut self.temp_out[..to_write], &voice_time);

                // add output of the voice to both busses
                let written_out = &self.temp_out[..written];
                add_buffers(&mut grain_bus[total_written..total_written + written], written_out);
                add_buffers(&mut send_bus[total_written..total_written + written], written_out);
                total_written += written;

                if voice.is_exhausted() || written == 0 {
                    playing_voice.is_active = false;
                    break;
                }
            }

            if playing_voice.stop_time <= chunk_end_time {
                playing_voice.is_active = false;
            }
        }
    }

    // Run the effect graph on the busses and write the result into the given output chunk.
    fn process_busses(&mut self, output: &mut [f32], frame_count: usize, time: &SourceTime) {
        let bus_len = frame_count * Self::BUS_CHANNEL_COUNT;
        let grain_bus = &mut self.grain_bus[..bus_len];
        let send_bus = &mut self.send_bus[..bus_len];

        // delay send -> wet signal
        self.delay.process(send_bus, time);
        add_buffers(grain_bus, send_bus);

        // master gain and limiter
        apply_smoothed_frame_gain(grain_bus, Self::BUS_CHANNEL_COUNT, &mut self.master_gain);
        self.limiter.process(grain_bus, time);

        // map stereo bus to the output's channel layout
        match self.channel_count {
            1 => {
                for (out, frame) in output.iter_mut().zip(grain_bus.as_frames::<2>()) {
                    *out = (frame[0] + frame[1]) * 0.5;
                }
            }
            2 => copy_buffers(output, grain_bus),
            channel_count => {
                for (out_frame, frame) in output
                    .chunks_exact_mut(channel_count)
                    .zip(grain_bus.as_frames::<2>())
                {
                    out_frame[..2].copy_from_slice(frame);
                }
            }
        }
    }

    fn apply_bus_parameters(&mut self, parameters: &MixBusParameters) {
        self.master_gain.set_target(parameters.master_gain);
        let messages = [
            DubDelayEffectMessage::SetSendLevel(parameters.send_level),
            DubDelayEffectMessage::SetFeedback(parameters.feedback),
            DubDelayEffectMessage::SetDelayTime(parameters.delay_time),
        ];
        for message in &messages {
            if let Err(err) = self.delay.process_message(message) {
                log::error!("Failed to apply bus parameters: {err}");
            }
        }
    }
}

impl Source for GrainMixer {
    fn write(&mut self, output: &mut [f32], time: &SourceTime) -> usize {
        // Process all pending messages
        self.process_messages();

        // Clear entire output first: channels above the stereo bus stay silent
        clear_buffer(output);

        // Process pending events, voices and effects
        let output_frame_count = output.len() / self.channel_count;
        let mut total_frames_written = 0;

        while total_frames_written < output_frame_count {
            let current_time_in_frames = time.pos_in_frames + total_frames_written as u64;

            // process pending events
            self.process_events(current_time_in_frames);

            // determine how many frames to process until the next event is due
            let frames_to_process = {
                let frames_remaining = output_frame_count - total_frames_written;
                let frames_until_next_event = self.time_until_next_event(current_time_in_frames);
                frames_remaining
                    .min(Self::MAX_MIX_BUFFER_FRAMES)
                    .min(frames_until_next_event)
            };

            // process next chunk until we reach an event or end of the output
            if frames_to_process > 0 {
                let chunk_time = time.with_added_frames(total_frames_written as u64);
                let chunk_output = &mut output[total_frames_written * self.channel_count
                    ..(total_frames_written + frames_to_process) * self.channel_count];

                self.process_voices(frames_to_process, &chunk_time);
                self.process_busses(chunk_output, frames_to_process, &chunk_time);

                total_frames_written += frames_to_process;
            }
        }

        // drop all voices which finished playing in this iteration
        self.playing_voices.retain(|v| v.is_active);

        // Return output len as we've cleared the entire output before processing
        output.len()
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_exhausted(&self) -> bool {
        // mixer never is exhausted, as we may get new voices added any time
        false
    }
}

impl EventProcessor for GrainMixer {
    type Event = MixerEvent;

    fn events(&self) -> &VecDeque<Self::Event> {
        &self.events
    }
    fn events_mut(&mut self) -> &mut VecDeque<Self::Event> {
        &mut self.events
    }

    fn process_event(&mut self, event: Self::Event) {
        match event {
            MixerEvent::SetBusParameters {
                parameters,
                sample_time: _,
            } => self.apply_bus_parameters(&parameters),
        }
    }
}

// -------------------------------------------------------------------------------------------------
