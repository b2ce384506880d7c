//! Notification surface between the core and its observers
//!
//! The synthesizer and the device session publish [`Event`]s on a shared
//! [`EventBus`]. Delivery is synchronous and in emission order: an event
//! emitted while another one is being dispatched (for example the session
//! reacting to `WaveformChanged`) is queued and delivered right after the
//! current event has reached every listener. Emitting never blocks on a
//! listener running on another thread; the dispatching thread delivers it.
//! A panicking listener is logged and skipped.

use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// State-change notification
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The synthesized beat was recomputed
    WaveformChanged,
    /// The imported waveform was replaced or cleared
    ImportedWaveformChanged,
    /// Device presence changed
    ConnectionChanged(bool),
    /// Continuous generation started (`true`) or stopped (`false`)
    GenerationStateChanged(bool),
    /// Human-readable status line
    StatusMessage(String),
}

/// Receives events from an [`EventBus`]
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fire-and-forget observer registry
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn EventListener>)>>,
    queue: Mutex<VecDeque<Event>>,
    dispatching: AtomicBool,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it receives every event emitted afterwards
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Register a closure listener
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(f))
    }

    /// Register an unbounded channel and return its receiving end
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<Event>) {
        let (tx, rx): (Sender<Event>, Receiver<Event>) = crossbeam_channel::unbounded();
        // A dropped receiver is ignored
        let id = self.subscribe_fn(move |event| {
            let _ = tx.try_send(event.clone());
        });
        (id, rx)
    }

    /// Remove a listener. Returns false if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Publish an event to every listener
    pub fn emit(&self, event: Event) {
        tracing::trace!(?event, "emit");
        self.lock_queue().push_back(event);

        if self.dispatching.swap(true, Ordering::AcqRel) {
            // Another frame (this thread, re-entrantly, or another thread) drains the queue
            return;
        }

        loop {
            let next = self.lock_queue().pop_front();
            match next {
                Some(event) => self.deliver(&event),
                None => {
                    self.dispatching.store(false, Ordering::Release);
                    // An emitter may have queued after our pop but before the store
                    if self.lock_queue().is_empty() || self.dispatching.swap(true, Ordering::AcqRel)
                    {
                        break;
                    }
                }
            }
        }
    }

    fn deliver(&self, event: &Event) {
        // Snapshot so listeners may subscribe/unsubscribe while being notified
        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if let Err(panic_info) = result {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!(?event, panic = %msg, "Event listener PANICKED");
            }
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_receives_in_order() {
        let bus = EventBus::new();
        let (_, rx) = bus.subscribe_channel();

        bus.emit(Event::ConnectionChanged(true));
        bus.emit(Event::StatusMessage("hello".into()));

        assert_eq!(rx.try_recv().unwrap(), Event::ConnectionChanged(true));
        assert_eq!(rx.try_recv().unwrap(), Event::StatusMessage("hello".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let (id, rx) = bus.subscribe_channel();
        assert_eq!(bus.listener_count(), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(Event::WaveformChanged);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_nested_emit_is_delivered_after_current_event() {
        let bus = Arc::new(EventBus::new());

        // First listener reacts to WaveformChanged by emitting more events
        let inner = Arc::clone(&bus);
        bus.subscribe_fn(move |event| {
            if *event == Event::WaveformChanged {
                inner.emit(Event::GenerationStateChanged(false));
                inner.emit(Event::GenerationStateChanged(true));
            }
        });
        let (_, rx) = bus.subscribe_channel();

        bus.emit(Event::WaveformChanged);

        let seen: Vec<Event> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                Event::WaveformChanged,
                Event::GenerationStateChanged(false),
                Event::GenerationStateChanged(true),
            ]
        );
    }

    #[test]
    fn test_panicking_listener_does_not_stall_delivery() {
        let bus = EventBus::new();
        bus.subscribe_fn(|event| {
            if *event == Event::WaveformChanged {
                panic!("listener failed");
            }
        });
        let (_, rx) = bus.subscribe_channel();

        bus.emit(Event::WaveformChanged);
        bus.emit(Event::ConnectionChanged(true));
        bus.emit(Event::StatusMessage("after".into()));

        let seen: Vec<Event> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                Event::WaveformChanged,
                Event::ConnectionChanged(true),
                Event::StatusMessage("after".into()),
            ]
        );
    }

    #[test]
    fn test_dropped_receiver_does_not_break_emit() {
        let bus = EventBus::new();
        let (_, rx) = bus.subscribe_channel();
        drop(rx);
        bus.emit(Event::WaveformChanged);

        let (_, rx2) = bus.subscribe_channel();
        bus.emit(Event::ConnectionChanged(false));
        assert_eq!(rx2.try_recv().unwrap(), Event::ConnectionChanged(false));
    }
}
