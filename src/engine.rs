//! The engine facade: owns the output device, the realtime mixer and the scheduler thread.

pub mod glitch;
pub mod params;
pub mod scheduler;
pub mod synth;
pub mod tempo;

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use basedrop::{Collector, Handle, Owned};
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use crossbeam_queue::ArrayQueue;
use rand::{rngs::SmallRng, Rng, SeedableRng};

#[cfg(feature = "cpal-output")]
use crate::output::DefaultOutputDevice;
use crate::{
    output::{OutputClock, OutputDevice},
    source::{
        grain::GrainVoice,
        mixed::{GrainMixer, MixBusParameters, MixerMessage},
    },
    utils::{dsp::window::EnvelopeTable, time::seconds_to_sample_time},
    AudioBuffer, Error,
};

use self::{
    params::{AudioOrb, GlobalParams},
    scheduler::GrainScheduler,
    synth::{Grain, GrainSynthesizer, VoiceSink},
    tempo::TempoDetection,
};

// -------------------------------------------------------------------------------------------------

/// Engine construction options.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Interval of the scheduler's control ticks.
    pub tick_interval: Duration,
    /// Scheduling horizon: grains are scheduled this far ahead of the output clock.
    /// Must be larger than the tick interval.
    pub lookahead: Duration,
    /// Capacity of the realtime mixer's message queue.
    pub queue_capacity: usize,
    /// Seed for the engine's random generators. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(25),
            lookahead: Duration::from_secs_f64(GrainScheduler::DEFAULT_LOOKAHEAD),
            queue_capacity: GrainMixer::DEFAULT_QUEUE_CAPACITY,
            seed: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    #[must_use]
    pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check if the config can drive a gapless schedule.
    pub fn validate(&self) -> Result<(), Error> {
        if self.tick_interval.is_zero() {
            return Err(Error::ParameterError(
                "Tick interval must be > 0".to_string(),
            ));
        }
        if self.lookahead <= self.tick_interval {
            return Err(Error::ParameterError(format!(
                "Lookahead ({:?}) must be larger than the tick interval ({:?})",
                self.lookahead, self.tick_interval
            )));
        }
        if self.queue_capacity == 0 {
            return Err(Error::ParameterError(
                "Mixer queue capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Messages from the facade to the scheduler thread.
pub(crate) enum EngineCommand {
    SetGlobalParams(GlobalParams),
    SetOrbs(Vec<AudioOrb>),
    Start,
    Stop,
    Shutdown,
}

// -------------------------------------------------------------------------------------------------

/// A [`VoiceSink`] which turns grains into [`GrainVoice`]s and passes them to the
/// [`GrainMixer`] in the realtime thread.
pub(crate) struct MixerVoiceSink {
    queue: Arc<ArrayQueue<MixerMessage>>,
    collector_handle: Handle,
    sample_rate: u32,
}

impl MixerVoiceSink {
    pub fn new(
        queue: Arc<ArrayQueue<MixerMessage>>,
        collector_handle: Handle,
        sample_rate: u32,
    ) -> Self {
        Self {
            queue,
            collector_handle,
            sample_rate,
        }
    }
}

impl VoiceSink for MixerVoiceSink {
    fn supports_value_curves(&self) -> bool {
        true
    }

    fn schedule_grain(&mut self, grain: Grain) -> Result<(), Error> {
        let start_time = seconds_to_sample_time(grain.start_time, self.sample_rate);
        let stop_time = seconds_to_sample_time(grain.stop_time, self.sample_rate);
        let voice = Owned::new(
            &self.collector_handle,
            GrainVoice::new(&grain, self.sample_rate),
        );
        self.queue
            .push(MixerMessage::AddVoice {
                voice,
                start_time,
                stop_time,
            })
            .map_err(|_| Error::SendError("mixer queue is full".to_string()))
    }
}

// -------------------------------------------------------------------------------------------------

/// Passes mix bus parameter changes to the [`GrainMixer`]. Changes which don't fit into the
/// mixer's queue stay pending until a later [`BusParameterSender::flush`] succeeds.
pub(crate) struct BusParameterSender {
    queue: Arc<ArrayQueue<MixerMessage>>,
    clock: OutputClock,
    pending: Option<MixBusParameters>,
}

impl BusParameterSender {
    pub fn new(queue: Arc<ArrayQueue<MixerMessage>>, clock: OutputClock) -> Self {
        Self {
            queue,
            clock,
            pending: None,
        }
    }

    /// Replace pending parameters and try sending them. Never fails: a full queue only delays
    /// the change.
    pub fn send(&mut self, parameters: MixBusParameters) {
        self.pending = Some(parameters);
        if !self.flush() {
            log::warn!("Mixer queue is full: delaying mix bus parameter changes");
        }
    }

    /// Try sending pending parameters. Returns false when parameters still are pending.
    pub fn flush(&mut self) -> bool {
        if let Some(parameters) = self.pending {
            let message = MixerMessage::SetBusParameters {
                parameters,
                sample_time: self.clock.frames(),
            };
            if self.queue.push(message).is_err() {
                return false;
            }
            self.pending = None;
        }
        true
    }
}

// -------------------------------------------------------------------------------------------------

/// State of the scheduler thread. Owns all mutable scheduling state.
struct SchedulerThread {
    scheduler: GrainScheduler,
    sink: MixerVoiceSink,
    bus_parameters: BusParameterSender,
    collector: Collector,
    clock: OutputClock,
    is_running: bool,
}

impl SchedulerThread {
    fn run(mut self, commands: Receiver<EngineCommand>, tick_interval: Duration) {
        let ticker = tick(tick_interval);
        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(EngineCommand::SetGlobalParams(params)) => {
                        self.scheduler.set_global_params(params);
                        self.bus_parameters.send(MixBusParameters::from_global(&params));
                    }
                    Ok(EngineCommand::SetOrbs(orbs)) => {
                        self.scheduler.set_orbs(orbs);
                    }
                    Ok(EngineCommand::Start) => {
                        if !self.is_running {
                            log::info!("Starting grain scheduler");
                            self.is_running = true;
                            self.tick();
                        }
                    }
                    Ok(EngineCommand::Stop) => {
                        if self.is_running {
                            log::info!("Stopping grain scheduler");
                            self.is_running = false;
                        }
                    }
                    Ok(EngineCommand::Shutdown) | Err(_) => break,
                },
                recv(ticker) -> _ => {
                    // bus parameters go first, before the queue fills up with new voices
                    self.bus_parameters.flush();
                    if self.is_running {
                        self.tick();
                    }
                    // release voices which got dropped in the audio thread
                    self.collector.collect();
                }
            }
        }
        self.collector.collect();
    }

    fn tick(&mut self) {
        self.scheduler.tick(self.clock.now(), &mut self.sink);
    }
}

// -------------------------------------------------------------------------------------------------

/// Handle to a spawned scheduler thread.
struct SchedulerHandle {
    command_send: Sender<EngineCommand>,
    thread: JoinHandle<()>,
}

// -------------------------------------------------------------------------------------------------

/// The granular synthesis engine: the only surface external collaborators touch.
///
/// The engine plays a [`GrainMixer`] on the given output device. A dedicated scheduler thread,
/// spawned with the first [`Engine::resume`] call, periodically fills a lookahead window with
/// grains of all registered [`AudioOrb`]s and passes them to the mixer, which starts and stops
/// them sample accurately.
///
/// All scheduling state is owned by the scheduler thread. The engine only forwards parameter
/// snapshots to it, so parameter changes take effect with the next tick.
pub struct Engine {
    config: EngineConfig,
    output: Box<dyn OutputDevice>,
    clock: OutputClock,
    sample_rate: u32,
    global: GlobalParams,
    orbs: Vec<AudioOrb>,
    mixer_queue: Arc<ArrayQueue<MixerMessage>>,
    // Scheduler and bus parameter sender, until the scheduler thread got spawned.
    pending_scheduler: Option<GrainScheduler>,
    pending_bus_parameters: Option<BusParameterSender>,
    scheduler_thread: Option<SchedulerHandle>,
    is_scheduling: bool,
}

impl Engine {
    /// Create a new engine with the default config, which plays on the given output device.
    pub fn new(output: impl OutputDevice + 'static) -> Result<Self, Error> {
        Self::with_config(output, EngineConfig::default())
    }

    /// Create a new engine with the given config, which plays on the given output device.
    /// The engine is idle until it got resumed.
    pub fn with_config(
        output: impl OutputDevice + 'static,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mut output: Box<dyn OutputDevice> = Box::new(output);
        let channel_count = output.channel_count();
        let sample_rate = output.sample_rate();
        let clock = output.clock();

        let global = GlobalParams::default();
        let mixer = GrainMixer::new(
            channel_count,
            sample_rate,
            &MixBusParameters::from_global(&global),
            config.queue_capacity,
        )?;
        let mixer_queue = mixer.message_queue();
        output.play(Box::new(mixer));

        let mut rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let synth = GrainSynthesizer::with_rng(
            Arc::new(EnvelopeTable::new()),
            SmallRng::seed_from_u64(rng.random()),
        );
        let scheduler = GrainScheduler::new(synth, rng, config.lookahead.as_secs_f64());
        let bus_parameters = BusParameterSender::new(Arc::clone(&mixer_queue), clock.clone());

        log::info!(
            "Created grain engine: {channel_count} channels @ {sample_rate}Hz, \
            tick interval {:?}, lookahead {:?}",
            config.tick_interval,
            config.lookahead
        );

        Ok(Self {
            config,
            output,
            clock,
            sample_rate,
            global,
            orbs: Vec::new(),
            mixer_queue,
            pending_scheduler: Some(scheduler),
            pending_bus_parameters: Some(bus_parameters),
            scheduler_thread: None,
            is_scheduling: false,
        })
    }

    /// Create a new engine which plays on the system's default audio device.
    #[cfg(feature = "cpal-output")]
    pub fn open_default() -> Result<Self, Error> {
        Self::new(DefaultOutputDevice::open()?)
    }

    /// The engine's config.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The output device's execution clock.
    pub fn clock(&self) -> OutputClock {
        self.clock.clone()
    }

    /// The output device's sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// true when the output device runs and grains get scheduled.
    pub fn is_running(&self) -> bool {
        self.is_scheduling && self.output.is_running()
    }

    /// Ensure the output device is running and the scheduler ticks. Idempotent.
    pub fn resume(&mut self) -> Result<(), Error> {
        if !self.output.is_running() {
            self.output.resume();
        }
        if self.is_scheduling {
            return Ok(());
        }
        if self.scheduler_thread.is_none() {
            self.scheduler_thread = Some(self.spawn_scheduler()?);
        }
        self.send_command(EngineCommand::Start)?;
        self.is_scheduling = true;
        Ok(())
    }

    /// Stop scheduling new grains. Already scheduled grains still play, and the output
    /// device keeps running.
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.is_scheduling {
            self.is_scheduling = false;
            self.send_command(EngineCommand::Stop)?;
        }
        Ok(())
    }

    /// Decode an audio file's raw bytes. Fails with the decoder's error for invalid files.
    pub fn decode_audio(file_bytes: Vec<u8>) -> Result<AudioBuffer, Error> {
        AudioBuffer::decode(file_bytes)
    }

    /// Estimate the buffer's tempo in the calling thread. Never fails: falls back to 120 BPM.
    pub fn detect_bpm(buffer: &AudioBuffer) -> f64 {
        tempo::detect_bpm(buffer)
    }

    /// Estimate the buffer's tempo in a background thread. Drop the returned handle to
    /// discard the result.
    pub fn detect_bpm_async(buffer: Arc<AudioBuffer>) -> TempoDetection {
        TempoDetection::spawn(buffer)
    }

    /// Current global parameters.
    pub fn global_params(&self) -> &GlobalParams {
        &self.global
    }

    /// Replace the global parameters. Grain parameters change with the next tick, mixer bus
    /// parameters are applied smoothly, starting as soon as the mixer received them.
    ///
    /// Only fails when the scheduler thread is gone. The engine's parameters then stay
    /// unchanged.
    pub fn update_global_params(&mut self, params: GlobalParams) -> Result<(), Error> {
        match (
            self.pending_scheduler.as_mut(),
            self.pending_bus_parameters.as_mut(),
        ) {
            (Some(scheduler), Some(bus_parameters)) => {
                scheduler.set_global_params(params);
                bus_parameters.send(MixBusParameters::from_global(&params));
            }
            _ => self.send_command(EngineCommand::SetGlobalParams(params))?,
        }
        self.global = params;
        Ok(())
    }

    /// Currently registered orbs.
    pub fn orbs(&self) -> &[AudioOrb] {
        &self.orbs
    }

    /// Replace all registered orbs. Grains of removed orbs, which already got scheduled,
    /// still play. Orb ids must be unique: of orbs sharing an id only the first one plays.
    pub fn update_orbs(&mut self, orbs: Vec<AudioOrb>) -> Result<(), Error> {
        self.orbs = orbs.clone();
        match self.pending_scheduler.as_mut() {
            Some(scheduler) => {
                scheduler.set_orbs(orbs);
                Ok(())
            }
            None => self.send_command(EngineCommand::SetOrbs(orbs)),
        }
    }

    fn spawn_scheduler(&mut self) -> Result<SchedulerHandle, Error> {
        let scheduler = self.pending_scheduler.take().ok_or_else(|| {
            Error::ParameterError("Grain scheduler state got lost".to_string())
        })?;
        let bus_parameters = self.pending_bus_parameters.take().ok_or_else(|| {
            Error::ParameterError("Mix bus parameter state got lost".to_string())
        })?;
        let (command_send, command_recv) = unbounded();
        let clock = self.clock.clone();
        let sample_rate = self.sample_rate;
        let mixer_queue = Arc::clone(&self.mixer_queue);
        let tick_interval = self.config.tick_interval;
        let thread = thread::Builder::new()
            .name("grain_scheduler".to_string())
            .spawn(move || {
                // the collector is not Sync: create it in the thread which collects
                let collector = Collector::new();
                let sink = MixerVoiceSink::new(mixer_queue, collector.handle(), sample_rate);
                SchedulerThread {
                    scheduler,
                    sink,
                    bus_parameters,
                    collector,
                    clock,
                    is_running: false,
                }
                .run(command_recv, tick_interval);
            })?;
        Ok(SchedulerHandle {
            command_send,
            thread,
        })
    }

    fn send_command(&self, command: EngineCommand) -> Result<(), Error> {
        match &self.scheduler_thread {
            Some(handle) => Ok(handle.command_send.send(command)?),
            None => Err(Error::SendError(
                "Grain scheduler is not running".to_string(),
            )),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler_thread.take() {
            let _ = handle.command_send.send(EngineCommand::Shutdown);
            if handle.thread.join().is_err() {
                log::error!("Grain scheduler thread panicked");
            }
        }
        self.output.close();
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use super::*;
    use crate::{
        engine::{params::GranularParams, synth::GrainEnvelope},
        source::{Source, SourceTime},
    };

    const SAMPLE_RATE: u32 = 8000;

    /// An output device which only renders on request.
    #[derive(Clone)]
    struct NullOutputDevice {
        clock: OutputClock,
        source: Arc<Mutex<Option<Box<dyn Source>>>>,
        running: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl NullOutputDevice {
        fn new() -> Self {
            Self {
                clock: OutputClock::new(SAMPLE_RATE, 2),
                source: Arc::new(Mutex::new(None)),
                running: Arc::new(AtomicBool::new(false)),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn render(&self, frames: usize) -> Vec<f32> {
            let mut output = vec![0.0; frames * 2];
            let time = SourceTime::new(self.clock.frames());
            if let Some(source) = self.source.lock().unwrap().as_mut() {
                source.write(&mut output, &time);
            }
            output
        }
    }

    impl OutputDevice for NullOutputDevice {
        fn channel_count(&self) -> usize {
            2
        }
        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }
        fn clock(&self) -> OutputClock {
            self.clock.clone()
        }
        fn is_running(&self) -> bool {
            self.running.load(Ordering::Relaxed)
        }
        fn play(&mut self, source: Box<dyn Source>) {
            *self.source.lock().unwrap() = Some(source);
        }
        fn pause(&mut self) {
            self.running.store(false, Ordering::Relaxed);
        }
        fn resume(&mut self) {
            self.running.store(true, Ordering::Relaxed);
        }
        fn close(&mut self) {
            self.running.store(false, Ordering::Relaxed);
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig::default()
            .with_tick_interval(Duration::from_millis(5))
            .with_seed(0x5eed)
    }

    fn test_orb() -> AudioOrb {
        let buffer = AudioBuffer::new(vec![0.5; SAMPLE_RATE as usize], 1, SAMPLE_RATE).unwrap();
        AudioOrb::new(
            Some(Arc::new(buffer)),
            GranularParams {
                grain_size: 0.05,
                grain_density: 1.0,
                ..Default::default()
            },
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        let config = EngineConfig::default()
            .with_tick_interval(Duration::from_millis(100))
            .with_lookahead(Duration::from_millis(100));
        assert!(config.validate().is_err());
        assert!(Engine::with_config(NullOutputDevice::new(), config).is_err());
        let config = EngineConfig::default().with_queue_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn voice_sink() {
        let collector = Collector::new();
        let queue = Arc::new(ArrayQueue::new(1));
        let mut sink = MixerVoiceSink::new(Arc::clone(&queue), collector.handle(), SAMPLE_RATE);
        assert!(sink.supports_value_curves());
        let grain = Grain {
            orb_id: 1,
            buffer: Arc::new(AudioBuffer::new(vec![0.0; 100], 1, SAMPLE_RATE).unwrap()),
            start_time: 0.5,
            offset: 0.0,
            playback_rate: 1.0,
            pan: 0.0,
            grain_size: 0.1,
            stop_time: 0.65,
            envelope: GrainEnvelope::linear_ramp(1.0, 0.1),
        };
        assert!(sink.schedule_grain(grain.clone()).is_ok());
        // full queue
        assert!(matches!(
            sink.schedule_grain(grain),
            Err(Error::SendError(_))
        ));
        match queue.pop() {
            Some(MixerMessage::AddVoice {
                start_time,
                stop_time,
                ..
            }) => {
                assert_eq!(start_time, 4000);
                assert_eq!(stop_time, 5200);
            }
            _ => panic!("expected a voice"),
        }
    }

    #[test]
    fn resume_is_idempotent() {
        let device = NullOutputDevice::new();
        let mut engine = Engine::with_config(device.clone(), test_config()).unwrap();
        assert!(!engine.is_running());
        engine.resume().unwrap();
        assert!(engine.is_running());
        assert!(device.is_running());
        engine.resume().unwrap();
        assert!(engine.is_running());
        engine.stop().unwrap();
        assert!(!engine.is_running());
        // stop keeps the device running, so scheduled grains play out
        assert!(device.is_running());
        engine.stop().unwrap();
        engine.resume().unwrap();
        assert!(engine.is_running());
    }

    #[test]
    fn schedules_audible_grains() {
        let device = NullOutputDevice::new();
        let mut engine = Engine::with_config(device.clone(), test_config()).unwrap();
        engine.update_orbs(vec![test_orb()]).unwrap();
        assert_eq!(engine.orbs().len(), 1);
        engine.resume().unwrap();
        assert!(wait_until(|| !engine.mixer_queue.is_empty()));

        let output = device.render(SAMPLE_RATE as usize / 5);
        assert!(output.iter().any(|s| s.abs() > 1e-3));
        assert!(output.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn stop_halts_scheduling() {
        let device = NullOutputDevice::new();
        let mut engine = Engine::with_config(device.clone(), test_config()).unwrap();
        engine.update_orbs(vec![test_orb()]).unwrap();
        engine.resume().unwrap();
        assert!(wait_until(|| !engine.mixer_queue.is_empty()));
        // the clock doesn't advance: the horizon is filled after the first tick
        thread::sleep(Duration::from_millis(30));
        let scheduled = engine.mixer_queue.len();

        engine.stop().unwrap();
        thread::sleep(Duration::from_millis(30));
        device.clock.advance(SAMPLE_RATE as u64 * 2);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(engine.mixer_queue.len(), scheduled);

        engine.resume().unwrap();
        assert!(wait_until(|| engine.mixer_queue.len() > scheduled));
    }

    #[test]
    fn removed_orbs_stop_spawning() {
        let device = NullOutputDevice::new();
        let mut engine = Engine::with_config(device.clone(), test_config()).unwrap();
        engine.update_orbs(vec![test_orb()]).unwrap();
        engine.resume().unwrap();
        assert!(wait_until(|| !engine.mixer_queue.is_empty()));
        engine.update_orbs(Vec::new()).unwrap();
        assert!(engine.orbs().is_empty());
        thread::sleep(Duration::from_millis(30));
        let scheduled = engine.mixer_queue.len();
        device.clock.advance(SAMPLE_RATE as u64 * 2);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(engine.mixer_queue.len(), scheduled);
    }

    #[test]
    fn global_params_update_the_mixer() {
        let device = NullOutputDevice::new();
        let mut engine = Engine::with_config(device, test_config()).unwrap();
        let params = GlobalParams {
            space: 0.8,
            output_gain: 1.5,
            ..Default::default()
        };
        engine.update_global_params(params).unwrap();
        assert_eq!(engine.global_params(), &params);
        match engine.mixer_queue.pop() {
            Some(MixerMessage::SetBusParameters { parameters, .. }) => {
                assert_eq!(parameters, MixBusParameters::from_global(&params));
            }
            _ => panic!("expected bus parameters"),
        }
        // also forwarded to a running scheduler
        engine.resume().unwrap();
        assert!(engine.update_global_params(GlobalParams::default()).is_ok());
    }

    #[test]
    fn full_mixer_queue_delays_bus_parameters() {
        let device = NullOutputDevice::new();
        let config = test_config().with_queue_capacity(1);
        let mut engine = Engine::with_config(device, config).unwrap();
        let pop_bus_parameters = |engine: &Engine| match engine.mixer_queue.pop() {
            Some(MixerMessage::SetBusParameters { parameters, .. }) => Some(parameters),
            _ => None,
        };

        let first = GlobalParams {
            space: 0.1,
            ..Default::default()
        };
        engine.update_global_params(first).unwrap();
        assert_eq!(engine.mixer_queue.len(), 1);

        // queue is full: the update still applies as a whole
        let second = GlobalParams {
            chaos: 1.0,
            master_bpm: 90.0,
            beat_sync: true,
            ..first
        };
        engine.update_global_params(second).unwrap();
        assert_eq!(engine.global_params(), &second);
        assert_eq!(
            engine
                .pending_scheduler
                .as_ref()
                .map(|scheduler| *scheduler.global_params()),
            Some(second)
        );

        // delayed bus parameters arrive once the mixer drained the queue
        assert_eq!(
            pop_bus_parameters(&engine),
            Some(MixBusParameters::from_global(&first))
        );
        engine.resume().unwrap();
        let mut delivered = None;
        assert!(wait_until(|| {
            delivered = pop_bus_parameters(&engine);
            delivered.is_some()
        }));
        assert_eq!(delivered, Some(MixBusParameters::from_global(&second)));

        // same with a running scheduler thread
        assert!(engine
            .mixer_queue
            .push(MixerMessage::SetBusParameters {
                parameters: MixBusParameters::default(),
                sample_time: 0,
            })
            .is_ok());
        let third = GlobalParams {
            space: 0.9,
            ..second
        };
        engine.update_global_params(third).unwrap();
        assert_eq!(engine.global_params(), &third);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(
            pop_bus_parameters(&engine),
            Some(MixBusParameters::default())
        );
        let mut delivered = None;
        assert!(wait_until(|| {
            delivered = pop_bus_parameters(&engine);
            delivered.is_some()
        }));
        assert_eq!(delivered, Some(MixBusParameters::from_global(&third)));
    }

    #[test]
    fn drop_closes_output() {
        let device = NullOutputDevice::new();
        let closed = Arc::clone(&device.closed);
        let mut engine = Engine::with_config(device, test_config()).unwrap();
        engine.resume().unwrap();
        drop(engine);
        assert!(closed.load(Ordering::Relaxed));
    }
}
