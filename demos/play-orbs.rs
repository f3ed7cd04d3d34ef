//! Decodes the given audio files and plays them as a field of granular orbs.

use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use arg::{parse_args, Args};

use grainfield::{
    AudioOrb, DefaultOutputDevice, Engine, Error, GlobalParams, GranularParams, LfoTarget, OrbId,
    TempoDetection, WavOutput,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

const DEFAULT_DURATION_SECS: u64 = 10;

// -------------------------------------------------------------------------------------------------

/// Plays audio files as granular orbs.
#[derive(Args, Debug, Default)]
struct Arguments {
    #[arg(short = "o", long = "output")]
    /// Write audio output into the given wav file, instead of using the default audio device.
    output_path: Option<PathBuf>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    /// By default \"debug\" in dev builds and \"warn\" in release builds.
    log_level: Option<log::Level>,
    #[arg(short = "d", long = "duration")]
    /// Playback duration in seconds. 10 seconds by default.
    duration: Option<u64>,
    #[arg(short = "b", long = "bpm")]
    /// Master tempo in beats per minute. Enables beat sync.
    bpm: Option<f64>,
    #[arg(short = "c", long = "chaos")]
    /// Glitch amount in range [0, 1].
    chaos: Option<f64>,
    /// Audio files to play.
    files: Vec<String>,
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    let args = parse_args::<Arguments>();

    simple_logger::SimpleLogger::new()
        .with_level(args.log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        // disable logging in chatty modules
        .with_module_level("symphonia_core", log::LevelFilter::Warn)
        .with_module_level("symphonia_format", log::LevelFilter::Warn)
        .init()
        .expect("Failed to set logger");

    if args.files.is_empty() {
        return Err(Error::ParameterError(
            "Pass at least one audio file to play".to_string(),
        ));
    }

    // Create an engine with the wav or default output device
    let mut engine = if let Some(output_path) = &args.output_path {
        Engine::new(WavOutput::open(output_path)?)?
    } else {
        Engine::new(DefaultOutputDevice::open()?)?
    };

    // Decode files: skip files which fail to decode
    let mut orbs = Vec::new();
    let mut detections = Vec::new();
    for file_path in &args.files {
        let buffer = match fs::read(file_path)
            .map_err(Error::from)
            .and_then(Engine::decode_audio)
        {
            Ok(buffer) => Arc::new(buffer),
            Err(err) => {
                log::error!("Failed to load '{file_path}': {err}");
                continue;
            }
        };
        println!(
            "Loaded '{}': {:.2} seconds, {} channels",
            file_path,
            buffer.duration(),
            buffer.channel_count()
        );
        // spread orbs over the files and give each one a different texture
        let index = orbs.len();
        let orb = AudioOrb::new(
            Some(Arc::clone(&buffer)),
            GranularParams {
                grain_size: 0.08 + 0.04 * index as f64,
                grain_density: 0.6,
                position: 0.2 + 0.15 * index as f64 % 0.8,
                random_pitch: 0.02,
                lfo_rate: 0.2,
                lfo_depth: 0.3,
                volume: 0.6,
                lfo_target: if index % 2 == 0 {
                    LfoTarget::Position
                } else {
                    LfoTarget::GrainSize
                },
            },
        );
        detections.push((orb.id, Engine::detect_bpm_async(buffer)));
        orbs.push(orb);
    }
    if orbs.is_empty() {
        return Err(Error::ParameterError("No playable audio files".to_string()));
    }

    engine.update_global_params(GlobalParams {
        chaos: args.chaos.unwrap_or(0.0),
        space: 0.4,
        output_gain: 0.8,
        master_bpm: args.bpm.unwrap_or(GlobalParams::DEFAULT_BPM),
        beat_sync: args.bpm.is_some(),
    })?;
    engine.update_orbs(orbs.clone())?;
    engine.resume()?;

    // Play, applying detected tempos as soon as they are available
    let duration = Duration::from_secs(args.duration.unwrap_or(DEFAULT_DURATION_SECS));
    let start = Instant::now();
    while start.elapsed() < duration {
        thread::sleep(Duration::from_millis(100));
        if apply_detected_tempos(&mut detections, &mut orbs) {
            engine.update_orbs(orbs.clone())?;
        }
    }

    // Stop scheduling and let the tails ring out
    engine.stop()?;
    thread::sleep(Duration::from_secs(2));

    Ok(())
}

// -------------------------------------------------------------------------------------------------

/// Move finished tempo detections into their orbs. Returns true when an orb changed.
fn apply_detected_tempos(
    detections: &mut Vec<(OrbId, TempoDetection)>,
    orbs: &mut [AudioOrb],
) -> bool {
    let mut changed = false;
    detections.retain_mut(|(orb_id, detection)| match detection.try_result() {
        Some(bpm) => {
            if let Some(orb) = orbs.iter_mut().find(|orb| orb.id == *orb_id) {
                println!("Detected tempo of orb {orb_id}: {bpm:.1} BPM");
                orb.detected_bpm = Some(bpm);
                changed = true;
            }
            false
        }
        None => true,
    });
    changed
}
