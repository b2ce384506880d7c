//! Simulated hardware
//!
//! [`SimulatedProbe`] reports whatever presence the caller sets, and
//! [`SimulatedDaq`] records every task operation so lifecycle ordering can be
//! asserted without an NI device attached. Both support failure injection.

use super::{AnalogOutputBuffer, DaqBackend, DeviceProbe, OutputTask, UsbDeviceInfo};
use crate::error::DeviceError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Presence source controlled by the caller
#[derive(Debug, Default)]
pub struct SimulatedProbe {
    present: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl SimulatedProbe {
    pub fn new(present: bool) -> Self {
        Self {
            present: AtomicBool::new(present),
            failure: Mutex::new(None),
        }
    }

    /// Plug or unplug the simulated device
    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    /// Make every lookup fail with `message` until cleared with `None`
    pub fn fail_discovery(&self, message: Option<String>) {
        *lock(&self.failure) = message;
    }
}

impl DeviceProbe for SimulatedProbe {
    fn find(&self, vendor_id: u16, product_id: u16) -> Result<Option<UsbDeviceInfo>, DeviceError> {
        if let Some(message) = lock(&self.failure).clone() {
            return Err(DeviceError::Discovery(message));
        }
        Ok(self.is_present().then_some(UsbDeviceInfo {
            vendor_id,
            product_id,
            bus: 1,
            address: 4,
        }))
    }
}

/// One recorded task operation
#[derive(Debug, Clone, PartialEq)]
pub enum DaqOp {
    CreateTask,
    AddChannel(String),
    ConfigureClock { rate_hz: f64, samples_per_channel: usize },
    AllowRegeneration,
    Write { samples_per_channel: usize },
    Start,
    Stop,
    Clear,
}

/// Operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateTask,
    AddChannel,
    ConfigureClock,
    AllowRegeneration,
    Write,
    Start,
    Stop,
}

type WriteHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SimState {
    log: Mutex<Vec<DaqOp>>,
    failure: Mutex<Option<(FailPoint, String)>>,
    last_written: Mutex<Option<AnalogOutputBuffer>>,
    write_hook: Mutex<Option<WriteHook>>,
    open_tasks: AtomicUsize,
    running_tasks: AtomicUsize,
}

impl SimState {
    fn record(&self, op: DaqOp) {
        lock(&self.log).push(op);
    }

    fn check(&self, point: FailPoint) -> Result<(), DeviceError> {
        match &*lock(&self.failure) {
            Some((p, message)) if *p == point => Err(DeviceError::Io(message.clone())),
            _ => Ok(()),
        }
    }
}

/// In-memory DAQ backend
#[derive(Clone, Default)]
pub struct SimulatedDaq {
    state: Arc<SimState>,
}

impl std::fmt::Debug for SimulatedDaq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDaq")
            .field("open_tasks", &self.open_tasks())
            .field("running_tasks", &self.running_tasks())
            .finish()
    }
}

impl SimulatedDaq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `point` with `message` on every call until [`clear_failure`](Self::clear_failure)
    pub fn fail_at(&self, point: FailPoint, message: impl Into<String>) {
        *lock(&self.state.failure) = Some((point, message.into()));
    }

    pub fn clear_failure(&self) {
        *lock(&self.state.failure) = None;
    }

    /// Run `hook` inside every buffer write, before it returns
    pub fn on_write(&self, hook: impl Fn() + Send + Sync + 'static) {
        *lock(&self.state.write_hook) = Some(Box::new(hook));
    }

    /// All operations so far, in call order
    pub fn operations(&self) -> Vec<DaqOp> {
        lock(&self.state.log).clone()
    }

    pub fn clear_operations(&self) {
        lock(&self.state.log).clear();
    }

    /// Tasks created and not yet cleared
    pub fn open_tasks(&self) -> usize {
        self.state.open_tasks.load(Ordering::SeqCst)
    }

    /// Tasks started and not yet stopped or cleared
    pub fn running_tasks(&self) -> usize {
        self.state.running_tasks.load(Ordering::SeqCst)
    }

    /// Most recent buffer handed to a task
    pub fn last_written(&self) -> Option<AnalogOutputBuffer> {
        lock(&self.state.last_written).clone()
    }
}

impl DaqBackend for SimulatedDaq {
    fn create_task(&self, _name: &str) -> Result<Box<dyn OutputTask>, DeviceError> {
        self.state.check(FailPoint::CreateTask)?;
        self.state.record(DaqOp::CreateTask);
        self.state.open_tasks.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimTask {
            state: Arc::clone(&self.state),
            running: false,
        }))
    }
}

struct SimTask {
    state: Arc<SimState>,
    running: bool,
}

impl SimTask {
    fn set_running(&mut self, running: bool) {
        if self.running != running {
            if running {
                self.state.running_tasks.fetch_add(1, Ordering::SeqCst);
            } else {
                self.state.running_tasks.fetch_sub(1, Ordering::SeqCst);
            }
            self.running = running;
        }
    }
}

impl OutputTask for SimTask {
    fn add_voltage_channel(
        &mut self,
        physical_channel: &str,
        _min_voltage: f64,
        _max_voltage: f64,
    ) -> Result<(), DeviceError> {
        self.state.check(FailPoint::AddChannel)?;
        self.state
            .record(DaqOp::AddChannel(physical_channel.to_string()));
        Ok(())
    }

    fn configure_continuous_clock(
        &mut self,
        rate_hz: f64,
        samples_per_channel: usize,
    ) -> Result<(), DeviceError> {
        self.state.check(FailPoint::ConfigureClock)?;
        self.state.record(DaqOp::ConfigureClock {
            rate_hz,
            samples_per_channel,
        });
        Ok(())
    }

    fn allow_regeneration(&mut self) -> Result<(), DeviceError> {
        self.state.check(FailPoint::AllowRegeneration)?;
        self.state.record(DaqOp::AllowRegeneration);
        Ok(())
    }

    fn write(&mut self, buffer: &AnalogOutputBuffer, _timeout_s: f64) -> Result<(), DeviceError> {
        if let Some(hook) = &*lock(&self.state.write_hook) {
            hook();
        }
        self.state.check(FailPoint::Write)?;
        self.state.record(DaqOp::Write {
            samples_per_channel: buffer.len(),
        });
        *lock(&self.state.last_written) = Some(buffer.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.state.check(FailPoint::Start)?;
        self.state.record(DaqOp::Start);
        self.set_running(true);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.state.check(FailPoint::Stop)?;
        self.state.record(DaqOp::Stop);
        self.set_running(false);
        Ok(())
    }

    fn clear(mut self: Box<Self>) -> Result<(), DeviceError> {
        self.state.record(DaqOp::Clear);
        self.set_running(false);
        self.state.open_tasks.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_presence() {
        let probe = SimulatedProbe::new(false);
        assert_eq!(probe.find(1, 2).unwrap(), None);
        probe.set_present(true);
        assert_eq!(probe.find(1, 2).unwrap().map(|d| d.vendor_id), Some(1));
    }

    #[test]
    fn test_probe_failure() {
        let probe = SimulatedProbe::new(true);
        probe.fail_discovery(Some("bus reset".into()));
        assert_eq!(
            probe.find(1, 2),
            Err(DeviceError::Discovery("bus reset".into()))
        );
        probe.fail_discovery(None);
        assert!(probe.find(1, 2).unwrap().is_some());
    }

    #[test]
    fn test_task_bookkeeping() {
        let daq = SimulatedDaq::new();
        let mut task = daq.create_task("").unwrap();
        task.start().unwrap();
        assert_eq!((daq.open_tasks(), daq.running_tasks()), (1, 1));

        task.clear().unwrap();
        assert_eq!((daq.open_tasks(), daq.running_tasks()), (0, 0));
        assert_eq!(
            daq.operations(),
            vec![DaqOp::CreateTask, DaqOp::Start, DaqOp::Clear]
        );
    }

    #[test]
    fn test_injected_failure() {
        let daq = SimulatedDaq::new();
        daq.fail_at(FailPoint::Start, "timing violation");
        let mut task = daq.create_task("").unwrap();
        assert_eq!(
            task.start(),
            Err(DeviceError::Io("timing violation".into()))
        );
        assert_eq!(daq.running_tasks(), 0);
    }
}
