//! Precomputed window lookup tables for grain envelopes.

use std::{f64::consts::PI, fmt};

// -------------------------------------------------------------------------------------------------

/// A symmetric Hann window lookup table, used as grain amplitude envelope.
///
/// `w[i] = 0.5 * (1 - cos(2πi / (N - 1)))`, so the table starts and ends exactly at zero and
/// peaks at 1 in its center. Tables are built once and then shared (read only) between all
/// grains of an engine.
#[derive(Clone, PartialEq)]
pub struct EnvelopeTable {
    values: Box<[f32]>,
}

impl EnvelopeTable {
    /// Default table size.
    pub const DEFAULT_SIZE: usize = 1024;

    /// Create a new Hann table with [`Self::DEFAULT_SIZE`] points.
    pub fn new() -> Self {
        Self::with_size(Self::DEFAULT_SIZE)
    }

    /// Create a new Hann table with the given number of points (at least 2).
    pub fn with_size(size: usize) -> Self {
        assert!(size >= 2, "Envelope table needs at least 2 points");
        let values = (0..size)
            .map(|i| (0.5 * (1.0 - (2.0 * PI * i as f64 / (size - 1) as f64).cos())) as f32)
            .collect();
        Self { values }
    }

    /// Number of points in the table.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false: tables have at least 2 points.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw table values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Evaluate the window at normalized phase [0.0, 1.0] with linear interpolation.
    /// Phases outside of the range are clamped, so they evaluate to the edges (zero).
    #[inline]
    pub fn sample(&self, phase: f64) -> f32 {
        let last = self.values.len() - 1;
        let index_float = phase.clamp(0.0, 1.0) * last as f64;
        let index = (index_float as usize).min(last);
        if index < last {
            let fraction = (index_float - index as f64) as f32;
            self.values[index] * (1.0 - fraction) + self.values[index + 1] * fraction
        } else {
            self.values[last]
        }
    }
}

impl fmt::Debug for EnvelopeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeTable")
            .field("size", &self.values.len())
            .finish()
    }
}

impl Default for EnvelopeTable {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_table() {
        let table = EnvelopeTable::new();
        assert_eq!(table.len(), 1024);
        assert_eq!(table.values()[0], 0.0);
        assert!(table.values()[1023].abs() < 1e-6);
        // symmetric
        for i in 0..512 {
            assert!((table.values()[i] - table.values()[1023 - i]).abs() < 1e-5);
        }
        // peaks at 1 in the center
        let peak = table.values().iter().cloned().fold(0.0f32, f32::max);
        assert!((peak - 1.0).abs() < 1e-5);
        assert!(table.values().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn interpolated_lookup() {
        let table = EnvelopeTable::with_size(5); // 0, 0.5, 1, 0.5, 0
        assert_eq!(table.sample(0.0), 0.0);
        assert!((table.sample(0.5) - 1.0).abs() < 1e-6);
        assert!((table.sample(0.125) - 0.25).abs() < 1e-6);
        assert!(table.sample(1.0).abs() < 1e-6);
        assert!(table.sample(2.0).abs() < 1e-6);
        assert_eq!(table.sample(-1.0), 0.0);
    }
}
