//! Common, shared DSP tools for effects and grain voices.

pub mod delay;
pub mod envelope;
pub mod filters;
pub mod window;
