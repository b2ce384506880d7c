//! Waveform construction
//!
//! - Reference-point definitions ([`reference`])
//! - Shape-preserving interpolation ([`pchip`])
//! - Single-beat synthesis ([`synth`])
//! - Pressure series imported from text files ([`import`])

pub mod import;
pub mod pchip;
pub mod reference;
pub mod synth;

/// One beat (or one imported series) sampled at integer indices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waveform {
    /// Sample indices `0..sample_count`
    pub time_points: Vec<usize>,
    /// Pressure at each sample (mmHg)
    pub pressure_points: Vec<f64>,
}

impl Waveform {
    /// Build a waveform from pressures, assigning indices 0..N-1
    pub fn from_pressures(pressure_points: Vec<f64>) -> Self {
        Self {
            time_points: (0..pressure_points.len()).collect(),
            pressure_points,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.pressure_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pressure_points.is_empty()
    }

    /// Minimum and maximum pressure, `None` when empty
    pub fn pressure_range(&self) -> Option<(f64, f64)> {
        let mut iter = self.pressure_points.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p))))
    }
}
