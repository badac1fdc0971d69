//! Helpers for testing code that emits metrics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::event::Event;
use crate::listener::Listener;

/// A [`Listener`] that records every event in memory.
#[derive(Debug, Default)]
pub struct CapturingListener {
    events: Mutex<Vec<Event>>,
    stopped: AtomicBool,
    indexing: bool,
}

impl CapturingListener {
    /// Creates a listener without the indexing capability.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a listener that requires collision indexing.
    pub fn indexing() -> Arc<Self> {
        Arc::new(Self {
            indexing: true,
            ..Self::default()
        })
    }

    /// Returns a copy of all captured events.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Returns captured events with the given name.
    pub fn events_named(&self, name: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Removes and returns all captured events.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of captured events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns `true` if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`Listener::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

impl Listener for CapturingListener {
    fn on_event(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    fn requires_indexing(&self) -> bool {
        self.indexing
    }
}
