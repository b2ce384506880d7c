//! ABPGen - synthetic arterial blood-pressure generator for the NI-6216
//!
//! This library re-exports waveform synthesis, pressure conversion and the
//! DAQ device session from `abpgen-core`.

pub use abpgen_core::{config, device, error, events, transducer, waveform};

pub use abpgen_core::{
    AppConfig, DeviceConfig, DeviceSession, Event, EventBus, WaveformFileModel,
    WaveformSynthesizer,
};
pub use abpgen_core::{
    DEFAULT_REFERENCE_DOCUMENT, DEFAULT_SAMPLE_COUNT, DEFAULT_SAMPLE_RATE_HZ, MAX_PRESSURE_MMHG,
    VERSION,
};
