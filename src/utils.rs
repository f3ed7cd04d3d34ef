//! Various helpers used in the engine and DSP code.

pub mod buffer;
pub mod decoder;
pub mod dsp;
pub mod smoothed;
pub mod time;

pub(crate) mod event;

use std::sync::atomic::{AtomicUsize, Ordering};

// -------------------------------------------------------------------------------------------------

const MINUS_INF_IN_DB: f32 = -200.0f32;

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
macro_rules! assert_eq_with_epsilon {
    ($x:expr, $y:expr, $d:expr) => {
        if !(($x - $y).abs() <= $d) {
            panic!(
                "assertion failed: `{} ~= {}` (epsilon: {})",
                $x, $y, $d
            );
        }
    };
}

#[cfg(test)]
pub(crate) use assert_eq_with_epsilon;

// -------------------------------------------------------------------------------------------------

/// Generates a unique usize number, by simply counting atomically upwards from 1.
pub fn unique_usize_id() -> usize {
    static ID_COUNTER: AtomicUsize = AtomicUsize::new(1);
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// -------------------------------------------------------------------------------------------------

/// Convert a linear gain value to decibels.
pub fn linear_to_db(value: f32) -> f32 {
    const LIN_TO_DB_FACTOR: f32 = 20.0f32 / std::f32::consts::LN_10;
    if value == 1.0 {
        return 0.0; // avoid rounding errors at exactly 0 dB
    } else if value > 1e-12f32 {
        return value.ln() * LIN_TO_DB_FACTOR;
    }
    MINUS_INF_IN_DB
}

/// Convert a decibel value to a linear gain.
pub fn db_to_linear(value: f32) -> f32 {
    const DB_TO_LIN_FACTOR: f32 = std::f32::consts::LN_10 / 20.0f32;
    if value == 0.0f32 {
        return 1.0f32; // avoid rounding errors at exactly 0 dB
    } else if value > MINUS_INF_IN_DB {
        return (value * DB_TO_LIN_FACTOR).exp();
    }
    0.0f32
}

// -------------------------------------------------------------------------------------------------

/// Equal power panning factors for a mono signal which gets spread into a stereo pair.
///
/// `pan` is expected to be in range `-1.0..=1.0`, where 0 is center. Returns (left, right)
/// gain factors: at center both channels get `cos(π/4)`.
pub fn mono_panning_factors(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Apply equal power stereo panning (balance) to a stereo frame, moving energy from one
/// channel to the other when panning away from the center.
///
/// `pan` is expected to be in range `-1.0..=1.0`. A centered pan leaves the frame untouched.
#[inline]
pub fn pan_stereo_frame(left: f32, right: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan.abs() < 1e-6 {
        (left, right)
    } else if pan < 0.0 {
        let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_2;
        (left + right * angle.cos(), right * angle.sin())
    } else {
        let angle = pan * std::f32::consts::FRAC_PI_2;
        (left * angle.cos(), right + left * angle.sin())
    }
}

// -------------------------------------------------------------------------------------------------
