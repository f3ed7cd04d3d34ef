//! Filters used in the effect chains and in audio analysis.

pub mod biquad;
