//! NI-DAQmx analog output backend
//!
//! The driver's C library is loaded at runtime, so machines without NI-DAQmx
//! installed can still run the simulator. The library is opened once and kept
//! for the lifetime of the process.

use super::{AnalogOutputBuffer, DaqBackend, OutputTask};
use crate::error::DeviceError;
use anyhow::{anyhow, Context, Result};
use libloading::Library;
use once_cell::sync::OnceCell;
use std::ffi::{c_char, c_void, CString};

type TaskHandle = *mut c_void;

const DAQMX_VAL_VOLTS: i32 = 10348;
const DAQMX_VAL_RISING: i32 = 10280;
const DAQMX_VAL_CONT_SAMPS: i32 = 10123;
const DAQMX_VAL_ALLOW_REGEN: i32 = 10097;
const DAQMX_VAL_GROUP_BY_CHANNEL: u32 = 0;

const EXTENDED_ERROR_LEN: usize = 2048;

#[cfg(windows)]
const LIBRARY_NAMES: &[&str] = &["nicaiu.dll"];
#[cfg(not(windows))]
const LIBRARY_NAMES: &[&str] = &["libnidaqmx.so", "libnidaqmx.so.1"];

struct DaqmxApi {
    _lib: Library,
    create_task: unsafe extern "C" fn(*const c_char, *mut TaskHandle) -> i32,
    create_ao_voltage_chan: unsafe extern "C" fn(
        TaskHandle,
        *const c_char,
        *const c_char,
        f64,
        f64,
        i32,
        *const c_char,
    ) -> i32,
    cfg_samp_clk_timing: unsafe extern "C" fn(TaskHandle, *const c_char, f64, i32, i32, u64) -> i32,
    set_write_regen_mode: unsafe extern "C" fn(TaskHandle, i32) -> i32,
    write_analog_f64: unsafe extern "C" fn(
        TaskHandle,
        i32,
        u32,
        f64,
        u32,
        *const f64,
        *mut i32,
        *mut u32,
    ) -> i32,
    start_task: unsafe extern "C" fn(TaskHandle) -> i32,
    stop_task: unsafe extern "C" fn(TaskHandle) -> i32,
    clear_task: unsafe extern "C" fn(TaskHandle) -> i32,
    get_extended_error_info: unsafe extern "C" fn(*mut c_char, u32) -> i32,
}

impl DaqmxApi {
    fn load() -> Result<Self> {
        let lib = LIBRARY_NAMES
            .iter()
            .find_map(|name| unsafe { Library::new(name) }.ok())
            .ok_or_else(|| anyhow!("NI-DAQmx runtime not found (tried {})", LIBRARY_NAMES.join(", ")))?;
        // Safety: signatures follow NIDAQmx.h
        unsafe {
            Ok(Self {
                create_task: *lib.get(b"DAQmxCreateTask\0").context("DAQmxCreateTask")?,
                create_ao_voltage_chan: *lib
                    .get(b"DAQmxCreateAOVoltageChan\0")
                    .context("DAQmxCreateAOVoltageChan")?,
                cfg_samp_clk_timing: *lib
                    .get(b"DAQmxCfgSampClkTiming\0")
                    .context("DAQmxCfgSampClkTiming")?,
                set_write_regen_mode: *lib
                    .get(b"DAQmxSetWriteRegenMode\0")
                    .context("DAQmxSetWriteRegenMode")?,
                write_analog_f64: *lib
                    .get(b"DAQmxWriteAnalogF64\0")
                    .context("DAQmxWriteAnalogF64")?,
                start_task: *lib.get(b"DAQmxStartTask\0").context("DAQmxStartTask")?,
                stop_task: *lib.get(b"DAQmxStopTask\0").context("DAQmxStopTask")?,
                clear_task: *lib.get(b"DAQmxClearTask\0").context("DAQmxClearTask")?,
                get_extended_error_info: *lib
                    .get(b"DAQmxGetExtendedErrorInfo\0")
                    .context("DAQmxGetExtendedErrorInfo")?,
                _lib: lib,
            })
        }
    }

    fn instance() -> Result<&'static DaqmxApi> {
        static API: OnceCell<DaqmxApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }

    /// Negative codes are errors, positive codes are warnings
    fn check(&self, code: i32, ctx: &str) -> Result<(), DeviceError> {
        if code < 0 {
            Err(DeviceError::Io(format!(
                "{ctx} failed ({code}): {}",
                self.extended_error()
            )))
        } else {
            if code > 0 {
                tracing::warn!(code, ctx, detail = %self.extended_error(), "NI-DAQmx warning");
            }
            Ok(())
        }
    }

    fn extended_error(&self) -> String {
        let mut buf = vec![0 as c_char; EXTENDED_ERROR_LEN];
        let code = unsafe { (self.get_extended_error_info)(buf.as_mut_ptr(), buf.len() as u32) };
        if code < 0 {
            return "no extended error information".to_string();
        }
        let bytes: Vec<u8> = buf
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}

fn c_string(value: &str) -> Result<CString, DeviceError> {
    CString::new(value).map_err(|_| DeviceError::Io(format!("invalid NI-DAQmx name: {value:?}")))
}

/// Backend driving real hardware through the NI-DAQmx C API
#[derive(Debug, Default, Clone, Copy)]
pub struct NiDaqmx;

impl NiDaqmx {
    pub fn new() -> Self {
        Self
    }

    /// Whether the driver library can be loaded on this machine
    pub fn is_available() -> bool {
        match DaqmxApi::instance() {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %format!("{e:#}"), "NI-DAQmx unavailable");
                false
            }
        }
    }
}

impl DaqBackend for NiDaqmx {
    fn create_task(&self, name: &str) -> Result<Box<dyn OutputTask>, DeviceError> {
        let api = DaqmxApi::instance().map_err(|e| DeviceError::Io(format!("{e:#}")))?;
        let name = c_string(name)?;
        let mut handle: TaskHandle = std::ptr::null_mut();
        api.check(
            unsafe { (api.create_task)(name.as_ptr(), &mut handle as *mut TaskHandle) },
            "DAQmxCreateTask",
        )?;
        Ok(Box::new(NiTask { api, handle }))
    }
}

struct NiTask {
    api: &'static DaqmxApi,
    handle: TaskHandle,
}

// Safety: NI-DAQmx task handles may be used from any thread; the session
// serializes all calls on one task behind its generation lock.
unsafe impl Send for NiTask {}

impl OutputTask for NiTask {
    fn add_voltage_channel(
        &mut self,
        physical_channel: &str,
        min_voltage: f64,
        max_voltage: f64,
    ) -> Result<(), DeviceError> {
        let channel = c_string(physical_channel)?;
        self.api.check(
            unsafe {
                (self.api.create_ao_voltage_chan)(
                    self.handle,
                    channel.as_ptr(),
                    std::ptr::null(),
                    min_voltage,
                    max_voltage,
                    DAQMX_VAL_VOLTS,
                    std::ptr::null(),
                )
            },
            "DAQmxCreateAOVoltageChan",
        )
    }

    fn configure_continuous_clock(
        &mut self,
        rate_hz: f64,
        samples_per_channel: usize,
    ) -> Result<(), DeviceError> {
        self.api.check(
            unsafe {
                (self.api.cfg_samp_clk_timing)(
                    self.handle,
                    std::ptr::null(),
                    rate_hz,
                    DAQMX_VAL_RISING,
                    DAQMX_VAL_CONT_SAMPS,
                    samples_per_channel as u64,
                )
            },
            "DAQmxCfgSampClkTiming",
        )
    }

    fn allow_regeneration(&mut self) -> Result<(), DeviceError> {
        self.api.check(
            unsafe { (self.api.set_write_regen_mode)(self.handle, DAQMX_VAL_ALLOW_REGEN) },
            "DAQmxSetWriteRegenMode",
        )
    }

    fn write(&mut self, buffer: &AnalogOutputBuffer, timeout_s: f64) -> Result<(), DeviceError> {
        let data = buffer.grouped_by_channel();
        let samples = i32::try_from(buffer.len())
            .map_err(|_| DeviceError::Io(format!("buffer too large: {} samples", buffer.len())))?;
        let mut written: i32 = 0;
        self.api.check(
            unsafe {
                (self.api.write_analog_f64)(
                    self.handle,
                    samples,
                    0,
                    timeout_s,
                    DAQMX_VAL_GROUP_BY_CHANNEL,
                    data.as_ptr(),
                    &mut written as *mut i32,
                    std::ptr::null_mut(),
                )
            },
            "DAQmxWriteAnalogF64",
        )?;
        if written != samples {
            tracing::warn!(written, expected = samples, "Short NI-DAQmx buffer write");
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.api
            .check(unsafe { (self.api.start_task)(self.handle) }, "DAQmxStartTask")
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.api
            .check(unsafe { (self.api.stop_task)(self.handle) }, "DAQmxStopTask")
    }

    fn clear(mut self: Box<Self>) -> Result<(), DeviceError> {
        let handle = std::mem::replace(&mut self.handle, std::ptr::null_mut());
        self.api
            .check(unsafe { (self.api.clear_task)(handle) }, "DAQmxClearTask")
    }
}

impl Drop for NiTask {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            let code = unsafe { (self.api.clear_task)(self.handle) };
            tracing::warn!(code, "NI-DAQmx task dropped without clear");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_string_rejects_interior_nul() {
        assert!(c_string("Dev1/ao0").is_ok());
        assert!(matches!(c_string("Dev1\0ao0"), Err(DeviceError::Io(_))));
    }

    #[test]
    fn test_backend_without_driver() {
        // Most build machines lack the NI runtime; creating a task must then fail cleanly
        if !NiDaqmx::is_available() {
            let result = NiDaqmx::new().create_task("");
            assert!(matches!(result, Err(DeviceError::Io(_))));
        }
    }
}
