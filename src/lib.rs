#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod audio;
mod error;

// public, flat re-exports
pub use audio::AudioBuffer;
pub use error::Error;

pub use engine::{
    params::{AudioOrb, GlobalParams, GranularParams, LfoTarget, OrbId},
    tempo::TempoDetection,
    Engine, EngineConfig,
};

#[cfg(feature = "cpal-output")]
pub use output::{cpal::CpalOutput, DefaultOutputDevice};
#[cfg(feature = "wav-output")]
pub use output::wav::WavOutput;
pub use output::{OutputClock, OutputDevice};

pub use source::{Source, SourceTime};

pub use effect::Effect;

// public mods
pub mod effect;
pub mod engine;
pub mod output;
pub mod source;
pub mod utils;
