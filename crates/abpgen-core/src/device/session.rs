//! Device session: presence polling and the generation lifecycle
//!
//! A [`DeviceSession`] owns at most one hardware output task. A background
//! thread polls USB presence and is the only writer of the connection state.
//! Every task transition (start, stop, resync after a waveform change,
//! teardown on disconnect) happens under a single generation lock, so the
//! hardware never sees two overlapping tasks.
//!
//! Notifications raised while the lock is held are collected and emitted only
//! after it is released. Listeners may therefore call back into the session
//! (e.g. start generation on `ConnectionChanged(true)`) without deadlocking.

use super::{AnalogOutputBuffer, DaqBackend, DeviceProbe, OutputTask};
use crate::config::DeviceConfig;
use crate::error::DeviceError;
use crate::events::{Event, EventBus, SubscriptionId};
use crate::waveform::synth::WaveformHandle;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;

/// Generation state guarded by the session lock
#[derive(Default)]
struct Generation {
    task: Option<Box<dyn OutputTask>>,
    buffer: AnalogOutputBuffer,
}

struct SessionInner {
    config: DeviceConfig,
    probe: Arc<dyn DeviceProbe>,
    backend: Arc<dyn DaqBackend>,
    waveform: WaveformHandle,
    events: Arc<EventBus>,
    /// Raw presence from the latest poll, written before the lock is taken
    device_present: AtomicBool,
    /// Published connection state; flipped under the generation lock
    connected: AtomicBool,
    /// Mirrors `generation.task.is_some()` for lock-free reads
    generating: AtomicBool,
    shutting_down: AtomicBool,
    generation: Mutex<Generation>,
}

/// Owns the DAQ device for the lifetime of the application
pub struct DeviceSession {
    inner: Arc<SessionInner>,
    subscription: SubscriptionId,
    stop_tx: Mutex<Option<Sender<()>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSession {
    /// Start the presence poller and follow waveform changes on `events`
    ///
    /// The first presence check runs immediately; later checks run every
    /// `config.poll_interval_ms`. Generation is not started automatically.
    pub fn spawn(
        config: DeviceConfig,
        probe: Arc<dyn DeviceProbe>,
        backend: Arc<dyn DaqBackend>,
        waveform: WaveformHandle,
        events: Arc<EventBus>,
    ) -> std::io::Result<Self> {
        let buffer =
            AnalogOutputBuffer::from_pressures(&waveform.pressure_points(), config.reference_voltage);

        let inner = Arc::new(SessionInner {
            config,
            probe,
            backend,
            waveform,
            events: Arc::clone(&events),
            device_present: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            generating: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            generation: Mutex::new(Generation { task: None, buffer }),
        });

        let weak: Weak<SessionInner> = Arc::downgrade(&inner);
        let subscription = events.subscribe_fn(move |event| {
            if *event == Event::WaveformChanged {
                if let Some(inner) = weak.upgrade() {
                    inner.on_waveform_changed();
                }
            }
        });

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let poll_inner = Arc::clone(&inner);
        let spawned = std::thread::Builder::new()
            .name("daq-presence-poller".into())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    poll_inner.run_poller(stop_rx);
                }));
                match result {
                    Ok(()) => tracing::info!("Presence poller exited normally"),
                    Err(panic_info) => {
                        let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic_info.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        tracing::error!(panic = %msg, "Presence poller PANICKED");
                    }
                }
            });

        let poller = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                events.unsubscribe(subscription);
                return Err(e);
            }
        };

        tracing::info!(
            vendor_id = %format!("{:04X}", inner.config.vendor_id),
            product_id = %format!("{:04X}", inner.config.product_id),
            device = %inner.config.device_name,
            "Device session started"
        );

        Ok(Self {
            inner,
            subscription,
            stop_tx: Mutex::new(Some(stop_tx)),
            poller: Mutex::new(Some(poller)),
        })
    }

    /// Begin continuous output of the current buffer
    ///
    /// Failures never propagate: they end in the idle state with a status
    /// message. Calling this while already generating is a no-op.
    pub fn start_generation(&self) {
        self.inner.start_generation();
    }

    /// Stop output and release the task; no-op when idle
    pub fn stop_generation(&self) {
        self.inner.stop_generation();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_generating(&self) -> bool {
        self.inner.generating.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Copy of the buffer that the next start will write
    pub fn output_buffer(&self) -> AnalogOutputBuffer {
        self.inner.lock_generation().buffer.clone()
    }

    /// Ordered teardown: stop generation, stop the poller, wait for it
    ///
    /// Safe to call more than once; also runs on drop.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.events.unsubscribe(self.subscription);

        self.inner.stop_generation();

        if let Some(tx) = lock(&self.stop_tx).take() {
            // Poller may already be gone
            let _ = tx.send(());
        }
        if let Some(handle) = lock(&self.poller).take() {
            // Dropped from inside a poller-side listener: the thread exits on its own
            if handle.thread().id() == std::thread::current().id() {
                tracing::debug!("Session dropped on the poller thread");
            } else if handle.join().is_err() {
                tracing::error!("Presence poller could not be joined");
            }
        }

        // A listener may have raced a start in before the flag was seen
        self.inner.stop_generation();
        tracing::info!("Device session shut down");
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.inner.config.device_name)
            .field("connected", &self.is_connected())
            .field("generating", &self.is_generating())
            .finish()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionInner {
    fn lock_generation(&self) -> MutexGuard<'_, Generation> {
        lock(&self.generation)
    }

    fn label(&self) -> &str {
        &self.config.label
    }

    fn flush(&self, outbox: Vec<Event>) {
        for event in outbox {
            self.events.emit(event);
        }
    }

    fn run_poller(&self, stop_rx: Receiver<()>) {
        let interval = self.config.poll_interval();
        tracing::info!(interval_ms = interval.as_millis() as u64, "Presence poller running");

        let mut last_status: Option<String> = None;
        loop {
            let status = self.poll_once();
            if last_status.as_deref() != Some(status.as_str()) {
                self.events.emit(Event::StatusMessage(status.clone()));
                last_status = Some(status);
            }

            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// One presence check; returns the status line describing the result
    fn poll_once(&self) -> String {
        let (vid, pid) = (self.config.vendor_id, self.config.product_id);
        match self.probe.find(vid, pid) {
            Ok(Some(info)) => {
                self.set_connected(true);
                format!(
                    "{} Connected:[VID:{:04X},PID:{:04X}]",
                    self.label(),
                    info.vendor_id,
                    info.product_id
                )
            }
            Ok(None) => {
                self.set_connected(false);
                format!("{}: device not found.", self.label())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Presence check failed");
                self.set_connected(false);
                e.to_string()
            }
        }
    }

    fn set_connected(&self, present: bool) {
        self.device_present.store(present, Ordering::SeqCst);
        if self.connected.load(Ordering::SeqCst) == present {
            return;
        }

        let mut outbox = Vec::new();
        {
            let mut generation = self.lock_generation();
            if !present {
                self.stop_locked(&mut generation, &mut outbox);
            }
            self.connected.store(present, Ordering::SeqCst);
        }

        if present {
            tracing::info!(device = %self.config.device_name, "DAQ device connected");
        } else {
            tracing::warn!(device = %self.config.device_name, "DAQ device disconnected");
        }
        outbox.push(Event::ConnectionChanged(present));
        self.flush(outbox);
    }

    fn start_generation(&self) {
        let mut outbox = Vec::new();
        {
            let mut generation = self.lock_generation();
            self.start_locked(&mut generation, &mut outbox);
        }
        self.flush(outbox);
    }

    fn stop_generation(&self) {
        let mut outbox = Vec::new();
        {
            let mut generation = self.lock_generation();
            self.stop_locked(&mut generation, &mut outbox);
        }
        self.flush(outbox);
    }

    fn on_waveform_changed(&self) {
        let mut outbox = Vec::new();
        {
            let mut generation = self.lock_generation();
            let was_generating = generation.task.is_some();
            if was_generating {
                self.stop_locked(&mut generation, &mut outbox);
            }

            generation.buffer = AnalogOutputBuffer::from_pressures(
                &self.waveform.pressure_points(),
                self.config.reference_voltage,
            );
            tracing::debug!(samples = generation.buffer.len(), "Output buffer resynced");
            outbox.push(Event::StatusMessage(format!(
                "{}: waveform updated from HeartBeat model.",
                self.label()
            )));

            if was_generating {
                self.start_locked(&mut generation, &mut outbox);
            }
        }
        self.flush(outbox);
    }

    fn start_locked(&self, generation: &mut Generation, outbox: &mut Vec<Event>) {
        if generation.task.is_some() {
            tracing::debug!("Generation already running");
            return;
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            tracing::debug!("Ignoring start during shutdown");
            return;
        }

        let refused = if !self.connected.load(Ordering::SeqCst) {
            Some(DeviceError::NotConnected)
        } else if generation.buffer.is_empty() {
            Some(DeviceError::NoWaveform)
        } else {
            None
        };
        if let Some(e) = refused {
            tracing::warn!(error = %e, "Generation not started");
            outbox.push(Event::StatusMessage(format!("{}: {}.", self.label(), e)));
            return;
        }

        match self.build_task(&generation.buffer) {
            Ok(task) => {
                generation.task = Some(task);
                self.generating.store(true, Ordering::SeqCst);
                tracing::info!(
                    samples = generation.buffer.len(),
                    rate_hz = self.config.sample_rate_hz,
                    "Waveform generation started"
                );
                outbox.push(Event::GenerationStateChanged(true));
                outbox.push(Event::StatusMessage(format!(
                    "{}: waveform generation started.",
                    self.label()
                )));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start generation");
                outbox.push(Event::StatusMessage(format!(
                    "{} generation error: {}",
                    self.label(),
                    e
                )));
            }
        }
    }

    /// Create, configure and start a task; on failure nothing is left open
    fn build_task(&self, buffer: &AnalogOutputBuffer) -> Result<Box<dyn OutputTask>, DeviceError> {
        let mut task = self.backend.create_task("")?;
        match self.configure_and_start(task.as_mut(), buffer) {
            Ok(()) => Ok(task),
            Err(e) => {
                if let Err(clear_err) = task.clear() {
                    tracing::warn!(error = %clear_err, "Failed to release task after setup error");
                }
                Err(e)
            }
        }
    }

    fn configure_and_start(
        &self,
        task: &mut dyn OutputTask,
        buffer: &AnalogOutputBuffer,
    ) -> Result<(), DeviceError> {
        let c = &self.config;
        task.add_voltage_channel(&c.physical_channel(&c.signal_channel), c.min_voltage, c.max_voltage)?;
        task.add_voltage_channel(
            &c.physical_channel(&c.reference_channel),
            c.min_voltage,
            c.max_voltage,
        )?;
        task.configure_continuous_clock(c.sample_rate_hz, buffer.len())?;
        task.allow_regeneration()?;
        task.write(buffer, c.write_timeout_s)?;

        // The poller may have seen the device disappear while we were configuring
        if !self.device_present.load(Ordering::SeqCst) {
            return Err(DeviceError::Vanished);
        }
        task.start()
    }

    fn stop_locked(&self, generation: &mut Generation, outbox: &mut Vec<Event>) {
        let Some(mut task) = generation.task.take() else {
            return;
        };

        if let Err(e) = task.stop() {
            tracing::warn!(error = %e, "Failed to stop task");
            outbox.push(Event::StatusMessage(format!("{} stop error: {}", self.label(), e)));
        }
        if let Err(e) = task.clear() {
            tracing::warn!(error = %e, "Failed to release task");
            outbox.push(Event::StatusMessage(format!("{} stop error: {}", self.label(), e)));
        }

        self.generating.store(false, Ordering::SeqCst);
        tracing::info!("Waveform generation stopped");
        outbox.push(Event::GenerationStateChanged(false));
        outbox.push(Event::StatusMessage(format!(
            "{}: waveform generation stopped.",
            self.label()
        )));
    }
}
