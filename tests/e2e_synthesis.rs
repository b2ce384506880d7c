//! E2E tests for reference-point loading, beat synthesis and voltage output
//!
//! Loads settings documents from disk, synthesizes beats at several lengths
//! and checks anchor fidelity, overshoot-free interpolation, notification
//! behaviour and the conversion to analog output voltages.

use abpgen_core::device::AnalogOutputBuffer;
use abpgen_core::waveform::synth::reference_sample_index;
use abpgen_core::{
    pressure_to_volts, ConfigError, Event, EventBus, ReferencePointStore, ValidationError,
    Waveform, WaveformSynthesizer,
};
use approx::assert_relative_eq;
use std::path::Path;
use std::sync::Arc;

fn write_points(dir: &Path, points: &[(&str, f64, f64)]) -> std::path::PathBuf {
    let body: String = points
        .iter()
        .map(|(name, t, p)| {
            format!(
                "    <point name=\"{}\" time_s=\"{}\" pressure_mmHg=\"{}\"/>\n",
                name, t, p
            )
        })
        .collect();
    let xml = format!(
        "<heartbeat>\n  <abp_waveform_features>\n{}  </abp_waveform_features>\n</heartbeat>\n",
        body
    );
    let path = dir.join("heartBeat.xml");
    std::fs::write(&path, xml).unwrap();
    path
}

fn default_synth(sample_count: usize) -> (tempfile::TempDir, Arc<EventBus>, WaveformSynthesizer) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heartBeat.xml");
    std::fs::write(&path, abpgen_core::DEFAULT_REFERENCE_DOCUMENT).unwrap();
    let bus = Arc::new(EventBus::new());
    let synth =
        WaveformSynthesizer::with_sample_count(ReferencePointStore::new(path), sample_count, Arc::clone(&bus))
            .unwrap();
    (dir, bus, synth)
}

/// The three-point scenario maps to anchors 0, 2 and 9 and stays bounded
#[test]
fn test_three_point_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_points(
        dir.path(),
        &[("A", 0.0, 80.0), ("B", 0.3, 120.0), ("C", 1.0, 80.0)],
    );
    let synth = WaveformSynthesizer::with_sample_count(
        ReferencePointStore::new(path),
        10,
        Arc::new(EventBus::new()),
    )
    .unwrap();

    assert_eq!(synth.reference_samples().time_points, vec![0, 2, 9]);

    let p = synth.waveform().pressure_points;
    assert_eq!(p.len(), 10);
    assert_relative_eq!(p[0], 80.0, epsilon = 1e-9);
    assert_relative_eq!(p[2], 120.0, epsilon = 1e-9);
    assert_relative_eq!(p[9], 80.0, epsilon = 1e-9);
    for (i, &v) in p.iter().enumerate() {
        assert!((80.0 - 1e-9..=120.0 + 1e-9).contains(&v), "p[{}] = {}", i, v);
    }
    // Rising to B, falling after it
    assert!(p[0] <= p[1] && p[1] <= p[2]);
    assert!(p[2..].windows(2).all(|w| w[1] <= w[0] + 1e-12));
}

/// Synthesized beats hit every reference pressure at its mapped index
#[test]
fn test_anchors_reproduced_at_every_length() {
    for n in [50, 100, 333, 1000, 2500] {
        let (_dir, _bus, synth) = default_synth(n);
        let waveform = synth.waveform();
        assert_eq!(waveform.sample_count(), n);
        assert_eq!(waveform.time_points, (0..n).collect::<Vec<_>>());

        for point in synth.reference_points().iter() {
            let index = reference_sample_index(point.time_fraction, n);
            assert!(index >= 0 && (index as usize) < n);
            assert_relative_eq!(
                waveform.pressure_points[index as usize],
                point.pressure,
                epsilon = 1e-9
            );
        }
    }
}

/// Between neighbouring anchors the beat never leaves their pressure span
#[test]
fn test_no_overshoot_between_anchors() {
    let (_dir, _bus, synth) = default_synth(1000);
    let anchors = synth.reference_samples();
    let p = synth.waveform().pressure_points;

    for i in 0..anchors.time_points.len() - 1 {
        let (a, b) = (anchors.time_points[i], anchors.time_points[i + 1]);
        let lo = anchors.pressure_points[i].min(anchors.pressure_points[i + 1]);
        let hi = anchors.pressure_points[i].max(anchors.pressure_points[i + 1]);
        for &v in &p[a as usize..=b as usize] {
            assert!(v >= lo - 1e-9 && v <= hi + 1e-9);
        }
    }
}

/// Re-synthesizing unchanged inputs is bit-identical
#[test]
fn test_synthesis_is_idempotent() {
    let (_dir, _bus, mut synth) = default_synth(1000);
    let first = synth.waveform();
    synth.synthesize(1000).unwrap();
    let second = synth.waveform();
    assert_eq!(first, second);
    assert!(first
        .pressure_points
        .iter()
        .zip(&second.pressure_points)
        .all(|(a, b)| a.to_bits() == b.to_bits()));
}

/// Every successful synthesis notifies; failed edits do not
#[test]
fn test_waveform_notifications() {
    let (_dir, bus, mut synth) = default_synth(200);
    let (_, rx) = bus.subscribe_channel();

    synth.synthesize(300).unwrap();
    synth.update_reference_point("systolic_peak", 0.16, 125.0).unwrap();
    synth.reset_to_defaults().unwrap();
    assert_eq!(rx.try_iter().count(), 3);

    assert_eq!(
        synth.update_reference_point("no_such_point", 0.5, 90.0),
        Err(ValidationError::UnknownReferencePoint("no_such_point".into()))
    );
    assert_eq!(synth.synthesize(0), Err(ValidationError::ZeroSampleCount));
    assert!(rx.try_recv().is_err());
}

/// Edits are clamped to the unit beat and to 0..=300 mmHg
#[test]
fn test_edit_clamping() {
    let (_dir, _bus, mut synth) = default_synth(100);

    synth.update_reference_point("systolic_peak", 1.4, 900.0).unwrap();
    let peak = synth.reference_points().get("systolic_peak").cloned().unwrap();
    assert_eq!(peak.time_fraction, 1.0);
    assert_eq!(peak.pressure, abpgen_core::MAX_PRESSURE_MMHG);

    synth.update_reference_point("systolic_peak", -0.2, -5.0).unwrap();
    let peak = synth.reference_points().get("systolic_peak").cloned().unwrap();
    assert_eq!(peak.time_fraction, 0.0);
    assert_eq!(peak.pressure, 0.0);

    assert!(matches!(
        synth.update_reference_point("systolic_peak", f64::NAN, 100.0),
        Err(ValidationError::NonFinite(_))
    ));
}

/// The edited beat is sized to the current sample count
#[test]
fn test_edit_uses_current_sample_count() {
    let (_dir, _bus, mut synth) = default_synth(100);
    synth.synthesize(640).unwrap();
    synth.update_reference_point("dicrotic_notch", 0.36, 93.0).unwrap();
    assert_eq!(synth.sample_count(), 640);
    assert_eq!(synth.waveform().sample_count(), 640);
}

/// Reset reloads the document, picking up on-disk changes
#[test]
fn test_reset_reloads_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_points(dir.path(), &[("a", 0.0, 80.0), ("b", 0.5, 110.0), ("c", 1.0, 80.0)]);
    let mut synth =
        WaveformSynthesizer::with_sample_count(ReferencePointStore::new(&path), 100, Arc::new(EventBus::new()))
            .unwrap();

    synth.update_reference_point("b", 0.5, 140.0).unwrap();
    write_points(dir.path(), &[("a", 0.0, 70.0), ("b", 0.5, 115.0), ("c", 1.0, 70.0)]);
    synth.reset_to_defaults().unwrap();

    assert_eq!(synth.reference_points().get("b").map(|p| p.pressure), Some(115.0));
    assert_eq!(synth.reference_point_keys(), vec!["a", "b", "c"]);
}

/// A broken document on reset leaves the previous state in place
#[test]
fn test_reset_with_broken_document_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_points(dir.path(), &[("a", 0.0, 80.0), ("b", 1.0, 90.0)]);
    let mut synth =
        WaveformSynthesizer::with_sample_count(ReferencePointStore::new(&path), 20, Arc::new(EventBus::new()))
            .unwrap();
    let before = synth.waveform();

    std::fs::write(&path, "<heartbeat><abp_waveform_features>").unwrap();
    assert!(matches!(synth.reset_to_defaults(), Err(ConfigError::Malformed(_))));
    assert_eq!(synth.waveform(), before);
}

/// Unsupported contracts fail loudly
#[test]
fn test_unsupported_operations() {
    let (_dir, _bus, mut synth) = default_synth(10);
    let err = synth.set_waveform_points(Waveform::from_pressures(vec![1.0; 10]));
    assert!(err.is_err());
    assert!(synth.store().save().unwrap_err().to_string().contains("not supported"));
}

/// The output buffer is the converted beat plus a flat reference channel
#[test]
fn test_output_buffer_from_beat() {
    let (_dir, _bus, synth) = default_synth(1000);
    let waveform = synth.waveform();
    let buffer = AnalogOutputBuffer::from_pressures(&waveform.pressure_points, 0.0);

    assert_eq!(buffer.len(), 1000);
    assert!(buffer.channel1.iter().all(|&v| v == 0.0));
    for (v, p) in buffer.channel0.iter().zip(&waveform.pressure_points) {
        assert_relative_eq!(*v, pressure_to_volts(*p), max_relative = 1e-12);
    }

    let (min, max) = waveform.pressure_range().unwrap();
    assert_relative_eq!(min, 80.0, epsilon = 1e-9);
    assert_relative_eq!(max, 120.0, epsilon = 1e-9);
    // 120 mmHg peak stays far inside the +-10 V range
    assert!(buffer.channel0.iter().all(|&v| v > 0.0 && v < 1.3));
}

/// Conversion is linear through the origin
#[test]
fn test_pressure_to_volts_linear() {
    assert_eq!(pressure_to_volts(0.0), 0.0);
    for x in [0.5, 1.0, 37.5, 120.0, 150.0] {
        assert_relative_eq!(pressure_to_volts(2.0 * x), 2.0 * pressure_to_volts(x), max_relative = 1e-12);
    }
}

/// Anchors that round onto the same sample keep the first point in load order
#[test]
fn test_colliding_anchors_keep_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_points(
        dir.path(),
        &[("a", 0.0, 80.0), ("b", 0.41, 100.0), ("c", 0.44, 130.0), ("d", 1.0, 80.0)],
    );
    let synth =
        WaveformSynthesizer::with_sample_count(ReferencePointStore::new(path), 5, Arc::new(EventBus::new()))
            .unwrap();

    // b and c both land on index 1 with five samples
    let anchors = synth.reference_samples();
    assert_eq!(anchors.time_points, vec![0, 1, 4]);
    assert_eq!(anchors.pressure_points, vec![80.0, 100.0, 80.0]);
}

/// A waveform change event carries no payload; consumers re-read the handle
#[test]
fn test_handle_tracks_latest_beat() {
    let (_dir, bus, mut synth) = default_synth(100);
    let handle = synth.handle();
    let (_, rx) = bus.subscribe_channel();

    synth.synthesize(250).unwrap();
    assert_eq!(rx.try_recv().unwrap(), Event::WaveformChanged);
    assert_eq!(handle.pressure_points().len(), 250);
    assert_eq!(handle.snapshot(), synth.waveform());
}
