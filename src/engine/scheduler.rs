//! Lookahead grain scheduler: fills a rolling time horizon with grains on every control tick.

use std::collections::{HashMap, HashSet};

use rand::{rngs::SmallRng, Rng};

use crate::engine::{
    glitch::GlitchState,
    params::{AudioOrb, GlobalParams, LfoTarget, OrbId},
    synth::{GrainSynthesizer, VoiceSink},
};

// -------------------------------------------------------------------------------------------------

/// Owns all mutable engine state and decides when grains start.
///
/// [`GrainScheduler::tick`] is called periodically with the current time of the output clock.
/// Every tick advances the glitch state, then fills each orb's time cursor with grains up to
/// `now + lookahead`. The realtime mixer plays the grains sample accurately, so ticks may jitter
/// as long as they arrive at least once per lookahead window.
///
/// Within one orb, grains are scheduled in strictly increasing time order. Orb cursors advance
/// independently of each other.
pub struct GrainScheduler {
    global: GlobalParams,
    orbs: Vec<AudioOrb>,
    glitch: GlitchState,
    cursors: HashMap<OrbId, f64>,
    synth: GrainSynthesizer,
    rng: SmallRng,
    lookahead: f64,
}

impl GrainScheduler {
    /// Default scheduling horizon in seconds.
    pub const DEFAULT_LOOKAHEAD: f64 = 0.1;

    /// Free running grain interval range in seconds.
    pub const MIN_INTERVAL: f64 = 0.01;
    pub const MAX_INTERVAL: f64 = 0.5;
    /// Random variation of free running grain intervals in seconds.
    pub const FREE_RUN_JITTER: f64 = 0.01;
    /// Random variation of beat synced grain intervals, relative to the interval.
    pub const BEAT_SYNC_JITTER: f64 = 0.05;
    /// Grain interval in seconds while a stutter burst is running.
    pub const STUTTER_INTERVAL: f64 = 0.05;
    /// Smallest possible step between two grains of an orb.
    pub const MIN_STEP: f64 = 0.005;

    /// Beat synced LFO rates, relative to the master tempo's quarter notes.
    pub const LFO_SYNC_RATIOS: [f64; 8] = [0.125, 0.25, 0.5, 1.0, 1.5, 2.0, 3.0, 4.0];

    /// Create a new scheduler. `rng` drives glitch bursts and grain interval jitter.
    pub fn new(synth: GrainSynthesizer, rng: SmallRng, lookahead: f64) -> Self {
        assert!(lookahead > 0.0, "Invalid lookahead time");
        Self {
            global: GlobalParams::default(),
            orbs: Vec::new(),
            glitch: GlitchState::Idle,
            cursors: HashMap::new(),
            synth,
            rng,
            lookahead,
        }
    }

    /// Scheduling horizon in seconds.
    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    pub fn global_params(&self) -> &GlobalParams {
        &self.global
    }

    /// Replace the global parameters. Applied with the next tick.
    pub fn set_global_params(&mut self, params: GlobalParams) {
        self.global = params;
    }

    pub fn orbs(&self) -> &[AudioOrb] {
        &self.orbs
    }

    /// Replace all orbs. Cursors of orbs which are no longer present are dropped, new orbs get
    /// a fresh cursor with their first tick. Already scheduled grains of removed orbs still play.
    ///
    /// Orbs share cursors by id, so of orbs with the same id only the first one is kept.
    pub fn set_orbs(&mut self, mut orbs: Vec<AudioOrb>) {
        let mut live_ids = HashSet::with_capacity(orbs.len());
        orbs.retain(|orb| {
            let is_unique = live_ids.insert(orb.id);
            if !is_unique {
                log::warn!("Ignoring orb with duplicate id {}", orb.id);
            }
            is_unique
        });
        self.cursors.retain(|id, _| live_ids.contains(id));
        self.orbs = orbs;
    }

    /// Current glitch state.
    pub fn glitch(&self) -> &GlitchState {
        &self.glitch
    }

    /// Time of the given orb's next grain, if the orb got scheduled already.
    pub fn cursor(&self, orb_id: OrbId) -> Option<f64> {
        self.cursors.get(&orb_id).copied()
    }

    /// Number of cursor table entries. Never exceeds the number of orbs.
    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    /// Run a single control tick. `now` is the output clock's current time in seconds.
    pub fn tick(&mut self, now: f64, sink: &mut dyn VoiceSink) {
        let Self {
            global,
            orbs,
            glitch,
            cursors,
            synth,
            rng,
            lookahead,
        } = self;

        glitch.advance(now, global.chaos, rng);

        let horizon = now + *lookahead;
        for orb in orbs.iter() {
            let cursor = cursors.entry(orb.id).or_insert(now);
            // don't try to catch up after stalls
            let mut time = cursor.max(now);
            let lfo_rate = effective_lfo_rate(orb.params.lfo_rate, global);
            while time < horizon {
                let lfo = (2.0 * std::f64::consts::PI * time * lfo_rate).sin()
                    * orb.params.lfo_depth;

                let mut density = orb.params.grain_density;
                if orb.params.lfo_target == LfoTarget::Density {
                    density += lfo;
                }
                if glitch.is_stutter() {
                    density = 1.0;
                }

                if let Err(err) = synth.trigger(orb, global, glitch, time, lfo, sink) {
                    log::warn!("Skipping grain of orb {}: {err}", orb.id);
                }

                time += grain_interval(density, global, glitch, rng);
            }
            *cursor = time;
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// LFO rate in Hz: snapped to the nearest beat synced rate when beat sync is enabled.
fn effective_lfo_rate(lfo_rate: f64, global: &GlobalParams) -> f64 {
    if !global.beat_sync {
        return lfo_rate;
    }
    let quarter_note_hz = 1.0 / global.beat_duration();
    GrainScheduler::LFO_SYNC_RATIOS
        .iter()
        .map(|ratio| quarter_note_hz * ratio)
        .min_by(|a, b| (a - lfo_rate).abs().total_cmp(&(b - lfo_rate).abs()))
        .unwrap_or(lfo_rate)
}

/// Free running grain interval in seconds, without jitter.
fn free_run_interval(density: f64) -> f64 {
    let density = density.clamp(0.01, 1.0);
    GrainScheduler::MAX_INTERVAL
        - density.sqrt() * (GrainScheduler::MAX_INTERVAL - GrainScheduler::MIN_INTERVAL)
}

/// Beat synced grain interval in beats.
fn beat_subdivision(density: f64) -> f64 {
    if density < 0.25 {
        1.0
    } else if density < 0.5 {
        0.5
    } else if density < 0.75 {
        0.25
    } else {
        0.125
    }
}

/// Time in seconds until an orb's next grain.
fn grain_interval(
    density: f64,
    global: &GlobalParams,
    glitch: &GlitchState,
    rng: &mut SmallRng,
) -> f64 {
    let step = if glitch.is_stutter() {
        GrainScheduler::STUTTER_INTERVAL
    } else if global.beat_sync {
        let step = global.beat_duration() * beat_subdivision(density);
        let jitter = GrainScheduler::BEAT_SYNC_JITTER;
        step + step * rng.random_range(-jitter..=jitter)
    } else {
        let jitter = GrainScheduler::FREE_RUN_JITTER;
        free_run_interval(density) + rng.random_range(-jitter..=jitter)
    };
    // always move forward, also with broken tempo or density values
    if step >= GrainScheduler::MIN_STEP {
        step
    } else {
        GrainScheduler::MIN_STEP
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;

    use super::*;
    use crate::{
        engine::{params::GranularParams, synth::RecordingVoiceSink},
        utils::{assert_eq_with_epsilon, dsp::window::EnvelopeTable},
        AudioBuffer,
    };

    const TICK: f64 = 0.025;

    fn scheduler() -> GrainScheduler {
        let synth = GrainSynthesizer::with_rng(
            Arc::new(EnvelopeTable::new()),
            SmallRng::seed_from_u64(1),
        );
        GrainScheduler::new(
            synth,
            SmallRng::seed_from_u64(2),
            GrainScheduler::DEFAULT_LOOKAHEAD,
        )
    }

    fn orb(params: GranularParams) -> AudioOrb {
        let buffer = AudioBuffer::new(vec![0.0; 1000], 1, 1000).unwrap();
        AudioOrb::new(Some(Arc::new(buffer)), params)
    }

    fn start_times(sink: &RecordingVoiceSink, orb_id: OrbId) -> Vec<f64> {
        sink.grains
            .iter()
            .filter(|g| g.orb_id == orb_id)
            .map(|g| g.start_time)
            .collect()
    }

    #[test]
    fn free_run_intervals() {
        let mut last = f64::MAX;
        for i in 0..=100 {
            let density = 0.01 + 0.99 * i as f64 / 100.0;
            let interval = free_run_interval(density);
            assert!(interval < last, "not decreasing at {density}");
            assert!((0.01 - 1e-12..=0.5).contains(&interval), "{interval}");
            last = interval;
        }
        assert_eq_with_epsilon!(free_run_interval(1.0), 0.01, 1e-12);
        assert_eq_with_epsilon!(free_run_interval(0.0), 0.5 - 0.1 * 0.49, 1e-12);
    }

    #[test]
    fn beat_sync_intervals() {
        assert_eq!(beat_subdivision(0.0), 1.0);
        assert_eq!(beat_subdivision(0.2499), 1.0);
        assert_eq!(beat_subdivision(0.25), 0.5);
        assert_eq!(beat_subdivision(0.5), 0.25);
        assert_eq!(beat_subdivision(0.6), 0.25);
        assert_eq!(beat_subdivision(0.75), 0.125);
        assert_eq!(beat_subdivision(1.5), 0.125);

        let global = GlobalParams {
            beat_sync: true,
            master_bpm: 120.0,
            ..Default::default()
        };
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..1000 {
            let interval = grain_interval(0.6, &global, &GlitchState::Idle, &mut rng);
            assert!((0.125 * 0.95 - 1e-12..=0.125 * 1.05 + 1e-12).contains(&interval));
        }
        // broken tempos fall back to 120 BPM
        for master_bpm in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            let broken = GlobalParams {
                master_bpm,
                ..global
            };
            let interval = grain_interval(0.6, &broken, &GlitchState::Idle, &mut rng);
            assert!((0.125 * 0.95 - 1e-12..=0.125 * 1.05 + 1e-12).contains(&interval));
        }
        // broken densities still move forward
        let free_run = GlobalParams::default();
        assert_eq!(
            grain_interval(f64::NAN, &free_run, &GlitchState::Idle, &mut rng),
            GrainScheduler::MIN_STEP
        );
    }

    #[test]
    fn lfo_rate_snapping() {
        let mut global = GlobalParams::default();
        assert_eq!(effective_lfo_rate(0.3, &global), 0.3);
        global.beat_sync = true;
        global.master_bpm = 120.0; // quarter notes at 2 Hz
        assert_eq!(effective_lfo_rate(0.3, &global), 0.25);
        assert_eq!(effective_lfo_rate(2.4, &global), 2.0);
        assert_eq!(effective_lfo_rate(100.0, &global), 8.0);
        assert_eq!(effective_lfo_rate(0.0, &global), 0.25);
    }

    #[test]
    fn fills_horizon_in_order() {
        let mut scheduler = scheduler();
        let mut sink = RecordingVoiceSink::default();
        let orb = orb(GranularParams {
            grain_density: 1.0,
            ..Default::default()
        });
        let orb_id = orb.id;
        scheduler.set_orbs(vec![orb]);

        let mut now = 0.0;
        for _ in 0..100 {
            scheduler.tick(now, &mut sink);
            let cursor = scheduler.cursor(orb_id).unwrap();
            assert!(cursor >= now + scheduler.lookahead());
            assert!(cursor < now + scheduler.lookahead() + 0.02 + 1e-9);
            now += TICK;
        }
        let times = start_times(&sink, orb_id);
        assert!(times.len() > 100);
        assert_eq!(times[0], 0.0);
        for pair in times.windows(2) {
            let step = pair[1] - pair[0];
            assert!(step > 0.0, "grains must be strictly ordered");
            // density 1.0: 10ms +/- 10ms jitter, floored
            assert!(step >= GrainScheduler::MIN_STEP - 1e-12 && step <= 0.02 + 1e-12);
        }
    }

    #[test]
    fn snaps_cursor_after_stall() {
        let mut scheduler = scheduler();
        let mut sink = RecordingVoiceSink::default();
        let orb = orb(GranularParams::default());
        let orb_id = orb.id;
        scheduler.set_orbs(vec![orb]);
        scheduler.tick(0.0, &mut sink);
        sink.grains.clear();
        scheduler.tick(5.0, &mut sink);
        assert_eq!(start_times(&sink, orb_id)[0], 5.0);
    }

    #[test]
    fn cursor_table_reconciles() {
        let mut scheduler = scheduler();
        let mut sink = RecordingVoiceSink::default();
        let a = orb(GranularParams::default());
        let b = orb(GranularParams::default());
        let (a_id, b_id) = (a.id, b.id);

        scheduler.set_orbs(vec![a.clone(), b]);
        assert_eq!(scheduler.cursor_count(), 0);
        scheduler.tick(0.0, &mut sink);
        assert_eq!(scheduler.cursor_count(), 2);

        scheduler.set_orbs(vec![a.clone()]);
        assert_eq!(scheduler.cursor_count(), 1);
        assert!(scheduler.cursor(a_id).is_some());
        assert!(scheduler.cursor(b_id).is_none());

        // orbs churn: cursors never outnumber orbs
        for i in 0..100 {
            let c = orb(GranularParams::default());
            scheduler.set_orbs(vec![a.clone(), c]);
            scheduler.tick(i as f64 * TICK, &mut sink);
            assert_eq!(scheduler.cursor_count(), 2);
        }
        scheduler.set_orbs(Vec::new());
        assert_eq!(scheduler.cursor_count(), 0);
    }

    #[test]
    fn duplicate_orb_ids() {
        let mut scheduler = scheduler();
        let mut sink = RecordingVoiceSink::default();
        let buffer = Arc::new(AudioBuffer::new(vec![0.0; 1000], 1, 1000).unwrap());
        let first = AudioOrb::with_id(
            7,
            Some(Arc::clone(&buffer)),
            GranularParams {
                grain_density: 1.0,
                ..Default::default()
            },
        );
        let second = AudioOrb::with_id(7, Some(buffer), GranularParams::default());
        scheduler.set_orbs(vec![first, second]);
        assert_eq!(scheduler.orbs().len(), 1);
        assert_eq!(scheduler.orbs()[0].params.grain_density, 1.0);

        scheduler.tick(0.0, &mut sink);
        assert_eq!(scheduler.cursor_count(), 1);
        assert!(!start_times(&sink, 7).is_empty());
    }

    #[test]
    fn density_lfo_free_run() {
        let mut scheduler = scheduler();
        let mut sink = RecordingVoiceSink::default();
        let params = GranularParams {
            grain_density: 0.5,
            lfo_target: LfoTarget::Density,
            lfo_rate: 1.0,
            lfo_depth: 1.0,
            ..Default::default()
        };
        let orb = orb(params);
        let orb_id = orb.id;
        scheduler.set_orbs(vec![orb]);

        let mut now = 0.0;
        while now < 2.0 {
            scheduler.tick(now, &mut sink);
            now += TICK;
        }

        let density_at = |time: f64| {
            params.grain_density
                + (2.0 * std::f64::consts::PI * time * params.lfo_rate).sin() * params.lfo_depth
        };
        let times = start_times(&sink, orb_id);
        let mut min_step = f64::MAX;
        let mut max_step = 0.0f64;
        for pair in times.windows(2) {
            let step = pair[1] - pair[0];
            let expected = free_run_interval(density_at(pair[0]));
            assert!(
                (step - expected).abs() <= GrainScheduler::FREE_RUN_JITTER + 1e-9,
                "step {step} at {} should be {expected}",
                pair[0]
            );
            min_step = min_step.min(step);
            max_step = max_step.max(step);
        }
        // the LFO sweeps density through its whole range
        assert!(min_step < 0.03, "{min_step}");
        assert!(max_step > 0.25, "{max_step}");
    }

    #[test]
    fn density_lfo_beat_sync() {
        let mut scheduler = scheduler();
        let mut sink = RecordingVoiceSink::default();
        scheduler.set_global_params(GlobalParams {
            beat_sync: true,
            master_bpm: 120.0,
            ..Default::default()
        });
        let params = GranularParams {
            grain_density: 0.5,
            lfo_target: LfoTarget::Density,
            lfo_rate: 0.3,
            lfo_depth: 0.3,
            ..Default::default()
        };
        let orb = orb(params);
        let orb_id = orb.id;
        scheduler.set_orbs(vec![orb]);

        let mut now = 0.0;
        while now < 8.0 {
            scheduler.tick(now, &mut sink);
            now += TICK;
        }

        // 0.3 Hz snaps to 1/8 of the 2 Hz quarter notes
        let lfo_rate = effective_lfo_rate(params.lfo_rate, scheduler.global_params());
        assert_eq!(lfo_rate, 0.25);
        let density_at = |time: f64| {
            params.grain_density
                + (2.0 * std::f64::consts::PI * time * lfo_rate).sin() * params.lfo_depth
        };
        let times = start_times(&sink, orb_id);
        let mut subdivisions = Vec::new();
        for pair in times.windows(2) {
            let step = pair[1] - pair[0];
            let subdivision = beat_subdivision(density_at(pair[0]));
            let expected = 0.5 * subdivision;
            assert!(
                (step - expected).abs() <= expected * GrainScheduler::BEAT_SYNC_JITTER + 1e-9,
                "step {step} at {} should be {expected}",
                pair[0]
            );
            if !subdivisions.contains(&subdivision) {
                subdivisions.push(subdivision);
            }
        }
        // density 0.2 - 0.8 crosses all bucket boundaries
        assert_eq!(subdivisions.len(), 4, "{subdivisions:?}");
    }

    #[test]
    fn orbs_without_buffer_stay_silent() {
        let mut scheduler = scheduler();
        let mut sink = RecordingVoiceSink::default();
        let orb = AudioOrb::new(None, GranularParams::default());
        let orb_id = orb.id;
        scheduler.set_orbs(vec![orb]);
        scheduler.tick(1.0, &mut sink);
        assert!(sink.grains.is_empty());
        assert!(scheduler.cursor(orb_id).unwrap() >= 1.1);
    }

    #[test]
    fn stutter_bursts() {
        let mut scheduler = scheduler();
        let mut sink = RecordingVoiceSink::default();
        let orb = orb(GranularParams {
            grain_density: 0.0,
            ..Default::default()
        });
        let orb_id = orb.id;
        scheduler.set_orbs(vec![orb]);
        scheduler.glitch = GlitchState::Stutter {
            end_time: 10.0,
            frozen_offset: None,
        };
        scheduler.tick(0.0, &mut sink);
        let times = start_times(&sink, orb_id);
        assert_eq!(times.len(), 2);
        assert_eq_with_epsilon!(times[1] - times[0], GrainScheduler::STUTTER_INTERVAL, 1e-12);
        assert_eq!(sink.grains[0].offset, sink.grains[1].offset);
        assert!(scheduler.glitch().frozen_offset().is_some());
    }

    #[test]
    fn chaos_zero_never_glitches() {
        let mut scheduler = scheduler();
        let mut sink = RecordingVoiceSink::default();
        scheduler.set_orbs(vec![orb(GranularParams::default())]);
        for tick in 0..10_000 {
            scheduler.tick(tick as f64 * TICK, &mut sink);
            assert!(!scheduler.glitch().is_active());
        }
    }
}
