//! DAQ device handling
//!
//! This module contains:
//! - USB presence discovery ([`probe`])
//! - NI-DAQmx analog output backend ([`daqmx`])
//! - Simulated probe and backend for tests and demos ([`sim`])
//! - Generation lifecycle owner ([`session`])
//!
//! The session only talks to hardware through [`DeviceProbe`] and
//! [`DaqBackend`], so the same lifecycle code drives the real driver and the
//! simulator.

pub mod daqmx;
pub mod probe;
pub mod session;
pub mod sim;

use crate::error::DeviceError;

/// A USB device matched by vendor/product id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
}

/// Checks whether the target device is plugged in
pub trait DeviceProbe: Send + Sync {
    /// Look for a device with the given ids; `Ok(None)` when absent
    fn find(&self, vendor_id: u16, product_id: u16) -> Result<Option<UsbDeviceInfo>, DeviceError>;
}

/// Creates hardware output tasks
pub trait DaqBackend: Send + Sync {
    /// Allocate an empty task (no channels, not started)
    fn create_task(&self, name: &str) -> Result<Box<dyn OutputTask>, DeviceError>;
}

/// One hardware analog-output task
///
/// Setup order is: channels, sample clock, regeneration, buffer write, start.
pub trait OutputTask: Send {
    fn add_voltage_channel(
        &mut self,
        physical_channel: &str,
        min_voltage: f64,
        max_voltage: f64,
    ) -> Result<(), DeviceError>;

    /// Continuous sample clock; `samples_per_channel` sizes the output buffer
    fn configure_continuous_clock(
        &mut self,
        rate_hz: f64,
        samples_per_channel: usize,
    ) -> Result<(), DeviceError>;

    /// Let the hardware loop the written buffer
    fn allow_regeneration(&mut self) -> Result<(), DeviceError>;

    fn write(&mut self, buffer: &AnalogOutputBuffer, timeout_s: f64) -> Result<(), DeviceError>;

    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Release the task; it cannot be used afterwards
    fn clear(self: Box<Self>) -> Result<(), DeviceError>;
}

/// Voltages for both output channels, always rebuilt as a whole
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalogOutputBuffer {
    /// Synthesized waveform (V)
    pub channel0: Vec<f64>,
    /// Flat reference level (V)
    pub channel1: Vec<f64>,
}

impl AnalogOutputBuffer {
    /// Convert a pressure waveform; channel 1 holds `reference_voltage` throughout
    pub fn from_pressures(pressures_mmhg: &[f64], reference_voltage: f64) -> Self {
        let channel0 = crate::transducer::pressures_to_volts(pressures_mmhg);
        let channel1 = vec![reference_voltage; channel0.len()];
        Self { channel0, channel1 }
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channel0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel0.is_empty()
    }

    /// Channel-major layout: all of channel 0, then all of channel 1
    pub fn grouped_by_channel(&self) -> Vec<f64> {
        let mut data = Vec::with_capacity(self.channel0.len() + self.channel1.len());
        data.extend_from_slice(&self.channel0);
        data.extend_from_slice(&self.channel1);
        data
    }
}
