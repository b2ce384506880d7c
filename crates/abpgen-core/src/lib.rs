//! ABPGen Core - waveform synthesis, pressure conversion and device lifecycle
//!
//! This library builds a single arterial blood-pressure beat from a handful of
//! clinician-tunable reference points, converts it into calibrated analog
//! output voltages and keeps an NI-6216 USB DAQ generating it continuously
//! while the device comes and goes.

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod transducer;
pub mod waveform;

pub use config::{AppConfig, DeviceConfig};
pub use device::session::DeviceSession;
pub use error::{ConfigError, DeviceError, UnsupportedOperation, ValidationError};
pub use events::{Event, EventBus, EventListener, SubscriptionId};
pub use transducer::{pressure_to_volts, pressures_to_volts};
pub use waveform::import::WaveformFileModel;
pub use waveform::reference::{ReferencePoint, ReferencePointStore, ReferencePoints};
pub use waveform::synth::{WaveformHandle, WaveformSynthesizer};
pub use waveform::Waveform;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Samples in one synthesized heart beat
pub const DEFAULT_SAMPLE_COUNT: usize = 1000;

/// Analog output sample clock (1 kHz, so a 1000-sample beat lasts one second)
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 1000.0;

/// Upper pressure bound accepted for reference-point edits (mmHg)
pub const MAX_PRESSURE_MMHG: f64 = 300.0;

/// Reference-point document shipped with the crate
pub const DEFAULT_REFERENCE_DOCUMENT: &str = include_str!("../assets/heartBeat.xml");
