use std::f64;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// The coefficients that hold parameters and necessary data to process a lowpass filter.
///
/// See [BiquadFilter] for more info about the filter implementation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BiquadFilterCoefficients {
    sample_rate: u32,
    cutoff: f32,
    q: f32,
    a1: f64,
    a2: f64,
    a3: f64,
}

impl BiquadFilterCoefficients {
    /// Create new lowpass coefficients. Fails when the sample rate is zero, Q is not positive
    /// or when the cutoff frequency is above nyquist.
    pub fn new_lowpass(sample_rate: u32, cutoff: f32, q: f32) -> Result<Self, Error> {
        let mut coefficients = BiquadFilterCoefficients {
            sample_rate,
            cutoff,
            q,
            ..Default::default()
        };
        coefficients.apply()?;
        Ok(coefficients)
    }

    fn apply(&mut self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::ParameterError(format!(
                "Invalid filter sample-rate: must be > 0, but is {s}",
                s = self.sample_rate
            )));
        }
        if self.q <= 0.0 {
            return Err(Error::ParameterError(format!(
                "Invalid filter Q: must be > 0, but is {q}",
                q = self.q
            )));
        }
        if self.cutoff <= 0.0 || self.cutoff >= self.sample_rate as f32 / 2.0 {
            return Err(Error::ParameterError(format!(
                "Invalid filter frequency: must be in range 0 - nyquist {n}, but is {f}",
                n = self.sample_rate as f32 / 2.0,
                f = self.cutoff
            )));
        }
        let g = f64::tan(f64::consts::PI * self.cutoff as f64 / self.sample_rate as f64);
        let k = 1.0 / self.q as f64;
        self.a1 = 1.0 / (1.0 + g * (g + k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// State variable biquad filter, designed by Andrew Simper of Cytomic.
/// See <http://cytomic.com/files/dsp/SvfLinearTrapOptimised2.pdf>
///
/// This is a second-order lowpass filter with a cutoff slope of 12 dB/octave. Q = 0.707 means
/// no resonant peaking, lower Q values give a softer knee.
///
/// This filter is stable when modulated at high rates.
#[derive(Debug, Default, Clone)]
pub struct BiquadFilter {
    ic1eq: f64,
    ic2eq: f64,
}

impl BiquadFilter {
    pub fn new() -> Self {
        Self {
            ic1eq: 0.0,
            ic2eq: 0.0,
        }
    }

    /// Apply the filter on a single sample.
    #[inline]
    pub fn process_sample(&mut self, coefficients: &BiquadFilterCoefficients, input: f64) -> f64 {
        let v0 = input;
        let v3 = v0 - self.ic2eq;
        let v1 = coefficients.a1 * self.ic1eq + coefficients.a2 * v3;
        let v2 = self.ic2eq + coefficients.a2 * self.ic1eq + coefficients.a3 * v3;
        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;
        v2
    }

    /// Reset state of filter.
    /// Can be used when the audio callback is restarted.
    #[inline]
    pub fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }
}

// -------------------------------------------------------------------------------------------------
