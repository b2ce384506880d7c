//! Pressure series imported from text files
//!
//! The file format is a single column of pressures in mmHg, one value per
//! line. Lines starting with `#` and blank lines are skipped. The first line
//! that is not a valid pressure aborts the whole import; the reported line
//! number counts data lines only (comments and blanks are not numbered).

use super::Waveform;
use crate::error::ValidationError;
use crate::events::{Event, EventBus};
use std::path::Path;
use std::sync::Arc;

/// Parse a single-column pressure file
///
/// # Example
/// ```
/// use abpgen_core::waveform::import::parse_pressure_lines;
///
/// let values = parse_pressure_lines("# header\n80.5\n90.0\n").unwrap();
/// assert_eq!(values, vec![80.5, 90.0]);
/// ```
pub fn parse_pressure_lines(text: &str) -> Result<Vec<f64>, ValidationError> {
    let mut pressures = Vec::new();

    let data_lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));

    for (index, line) in data_lines.enumerate() {
        let value = line
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| ValidationError::InvalidLine {
                line: index + 1,
                content: line.to_string(),
            })?;
        pressures.push(value);
    }

    if pressures.is_empty() {
        return Err(ValidationError::EmptyImport);
    }
    Ok(pressures)
}

/// Holds the most recently imported waveform
#[derive(Debug)]
pub struct WaveformFileModel {
    waveform: Waveform,
    events: Arc<EventBus>,
}

impl WaveformFileModel {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            waveform: Waveform::default(),
            events,
        }
    }

    /// Replace the waveform; time points become 0..N-1
    pub fn set_waveform(&mut self, pressure_points: Vec<f64>) {
        self.waveform = Waveform::from_pressures(pressure_points);
        self.events.emit(Event::ImportedWaveformChanged);
    }

    pub fn clear(&mut self) {
        self.waveform = Waveform::default();
        self.events.emit(Event::ImportedWaveformChanged);
    }

    /// Import from text; on error the current waveform is left untouched
    pub fn import_str(&mut self, text: &str) -> Result<usize, ValidationError> {
        let pressures = parse_pressure_lines(text)?;
        let count = pressures.len();
        self.set_waveform(pressures);
        Ok(count)
    }

    /// Import from a file; on error the current waveform is left untouched
    pub fn import_path(&mut self, path: impl AsRef<Path>) -> Result<usize, ValidationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ValidationError::Unreadable(format!("{}: {}", path.display(), e)))?;
        let count = self.import_str(&text)?;
        tracing::info!(path = %path.display(), samples = count, "Imported waveform");
        Ok(count)
    }

    /// Copy of the imported waveform
    pub fn waveform(&self) -> Waveform {
        self.waveform.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.waveform.is_empty()
    }
}
