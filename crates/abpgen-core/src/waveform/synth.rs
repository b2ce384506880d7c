//! Single-beat ABP synthesis from reference points
//!
//! Each reference point is mapped onto a sample index of the beat, the sorted
//! anchors are joined with a PCHIP interpolant and the interpolant is sampled
//! at every integer index. Any edit re-synthesizes and emits
//! [`Event::WaveformChanged`] after the new waveform has been published.

use super::pchip::{Pchip, PchipError};
use super::reference::{ReferencePointStore, ReferencePoints};
use super::Waveform;
use crate::error::{ConfigError, UnsupportedOperation, ValidationError};
use crate::events::{Event, EventBus};
use std::sync::{Arc, RwLock};

/// Read-only view on the synthesizer's current waveform
///
/// Cloning the handle is cheap; every read returns an independent copy, so
/// callers can never mutate the synthesizer's state through it.
#[derive(Debug, Clone, Default)]
pub struct WaveformHandle {
    inner: Arc<RwLock<Waveform>>,
}

impl WaveformHandle {
    /// Copy of the current waveform
    pub fn snapshot(&self) -> Waveform {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Copy of the current pressure samples (mmHg)
    pub fn pressure_points(&self) -> Vec<f64> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .pressure_points
            .clone()
    }

    fn publish(&self, waveform: Waveform) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = waveform;
    }
}

/// Reference anchors as placed on the sample grid (sorted, de-duplicated)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceSamples {
    pub time_points: Vec<i64>,
    pub pressure_points: Vec<f64>,
}

/// Sample index of a reference point
///
/// The beat start stays at 0; every other fraction maps to
/// `round(fraction * sample_count) - 1`, so fraction 1.0 lands on the last
/// sample.
pub fn reference_sample_index(time_fraction: f64, sample_count: usize) -> i64 {
    if time_fraction == 0.0 {
        0
    } else {
        (time_fraction * sample_count as f64).round() as i64 - 1
    }
}

/// Builds the dense beat from reference points
#[derive(Debug)]
pub struct WaveformSynthesizer {
    store: ReferencePointStore,
    reference: ReferencePoints,
    sample_count: usize,
    anchors: ReferenceSamples,
    waveform: WaveformHandle,
    events: Arc<EventBus>,
}

impl WaveformSynthesizer {
    /// Load reference points from `store` and synthesize the default beat
    pub fn new(store: ReferencePointStore, events: Arc<EventBus>) -> Result<Self, ConfigError> {
        Self::with_sample_count(store, crate::DEFAULT_SAMPLE_COUNT, events)
    }

    /// Load reference points and synthesize a beat of `sample_count` samples
    pub fn with_sample_count(
        mut store: ReferencePointStore,
        sample_count: usize,
        events: Arc<EventBus>,
    ) -> Result<Self, ConfigError> {
        if sample_count == 0 {
            return Err(ValidationError::ZeroSampleCount.into());
        }
        let reference = store.load()?;
        let mut synth = Self {
            store,
            reference,
            sample_count,
            anchors: ReferenceSamples::default(),
            waveform: WaveformHandle::default(),
            events,
        };
        synth
            .rebuild(synth.sample_count)
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Ok(synth)
    }

    /// Re-synthesize the beat with `sample_count` samples
    pub fn synthesize(&mut self, sample_count: usize) -> Result<(), ValidationError> {
        if sample_count == 0 {
            return Err(ValidationError::ZeroSampleCount);
        }
        self.rebuild(sample_count)
            .map_err(|_| ValidationError::NoReferencePoints)
    }

    /// Move and/or re-level one reference point, then re-synthesize
    ///
    /// The time fraction is clamped to `[0, 1]` and the pressure to
    /// `[0, MAX_PRESSURE_MMHG]`. Moving the last point at time 0 away from
    /// the beat start is rejected.
    pub fn update_reference_point(
        &mut self,
        key: &str,
        new_time_fraction: f64,
        new_pressure: f64,
    ) -> Result<(), ValidationError> {
        if !new_time_fraction.is_finite() {
            return Err(ValidationError::NonFinite("time fraction"));
        }
        if !new_pressure.is_finite() {
            return Err(ValidationError::NonFinite("pressure"));
        }

        let time_fraction = new_time_fraction.clamp(0.0, 1.0);
        if self.reference.get(key).is_none() {
            return Err(ValidationError::UnknownReferencePoint(key.to_string()));
        }
        let keeps_beat_start = time_fraction == 0.0
            || self
                .reference
                .iter()
                .any(|p| p.name != key && p.time_fraction == 0.0);
        if !keeps_beat_start {
            return Err(ValidationError::BeatStartRequired(key.to_string()));
        }

        let point = self
            .reference
            .get_mut(key)
            .ok_or_else(|| ValidationError::UnknownReferencePoint(key.to_string()))?;
        point.time_fraction = time_fraction;
        point.pressure = new_pressure.clamp(0.0, crate::MAX_PRESSURE_MMHG);

        tracing::debug!(
            key,
            time_fraction = point.time_fraction,
            pressure = point.pressure,
            "Reference point updated"
        );
        self.synthesize(self.sample_count)
    }

    /// Reload reference points from the settings document and re-synthesize
    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.reference = self.store.load()?;
        self.rebuild(self.sample_count)
            .map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    /// Direct waveform assignment is not supported; edit reference points instead
    pub fn set_waveform_points(&mut self, _waveform: Waveform) -> Result<(), UnsupportedOperation> {
        Err(UnsupportedOperation("Direct waveform point assignment"))
    }

    fn rebuild(&mut self, sample_count: usize) -> Result<(), PchipError> {
        let mut anchors: Vec<(i64, f64)> = self
            .reference
            .iter()
            .map(|p| (reference_sample_index(p.time_fraction, sample_count), p.pressure))
            .collect();

        // Stable: among equal indices the first point in load order wins
        anchors.sort_by_key(|(index, _)| *index);
        let before = anchors.len();
        anchors.dedup_by_key(|(index, _)| *index);
        if anchors.len() != before {
            tracing::warn!(
                dropped = before - anchors.len(),
                "Reference points collapsed onto the same sample index"
            );
        }

        let x: Vec<f64> = anchors.iter().map(|(i, _)| *i as f64).collect();
        let y: Vec<f64> = anchors.iter().map(|(_, p)| *p).collect();
        tracing::debug!("Generating ABP waveform with reference time points [samples]: {x:?}");
        tracing::debug!("Generating ABP waveform with reference pressure points [mmHg]: {y:?}");

        let interpolant = Pchip::new(&x, &y)?;
        let pressures = interpolant.evaluate_many((0..sample_count).map(|i| i as f64));

        self.anchors = ReferenceSamples {
            time_points: anchors.iter().map(|(i, _)| *i).collect(),
            pressure_points: y,
        };
        self.sample_count = sample_count;
        self.waveform.publish(Waveform::from_pressures(pressures));
        self.events.emit(Event::WaveformChanged);
        Ok(())
    }

    /// Copy of the current beat
    pub fn waveform(&self) -> Waveform {
        self.waveform.snapshot()
    }

    /// Shared read-only handle for consumers that re-pull on change events
    pub fn handle(&self) -> WaveformHandle {
        self.waveform.clone()
    }

    /// Anchors on the sample grid, for chart overlays
    pub fn reference_samples(&self) -> ReferenceSamples {
        self.anchors.clone()
    }

    /// Copy of the current reference points
    pub fn reference_points(&self) -> ReferencePoints {
        self.reference.clone()
    }

    /// Reference point names in load order
    pub fn reference_point_keys(&self) -> Vec<String> {
        self.reference.keys()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn store(&self) -> &ReferencePointStore {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }
}
