use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use crate::event::{Event, EventType, now_millis};
use crate::key::Tags;
use crate::registry::RegistryInner;

struct CounterInner {
    name: String,
    tags: Tags,
    value: AtomicI64,
    registry: Weak<RegistryInner>,
}

/// A running total.
///
/// Every change emits an event carrying the new total. Counters are cached by the
/// [`Registry`](crate::Registry): all callers resolving the same name and tags share one
/// instance, and clones share the same total.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

impl Counter {
    /// Creates a counter for the prefixed `name` and fully merged `tags`.
    pub(crate) fn new(name: String, tags: Tags, registry: Weak<RegistryInner>) -> Self {
        Self {
            inner: Arc::new(CounterInner {
                name,
                tags,
                value: AtomicI64::new(0),
                registry,
            }),
        }
    }

    /// Adds one.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Subtracts one.
    pub fn decrement(&self) {
        self.add(-1);
    }

    /// Adds `delta`, which may be negative.
    pub fn add(&self, delta: i64) {
        let total = self.inner.value.fetch_add(delta, Ordering::Relaxed) + delta;
        if let Some(registry) = self.inner.registry.upgrade() {
            let event = Event::new(
                self.inner.name.clone(),
                self.inner.tags.clone(),
                now_millis(),
                total,
                EventType::Counter,
            );
            registry.emit(event, false);
        }
    }

    /// The current total.
    pub fn value(&self) -> i64 {
        self.inner.value.load(Ordering::Relaxed)
    }

    /// The prefixed name of the counter.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` if both handles refer to the same counter.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("name", &self.inner.name)
            .field("tags", &self.inner.tags)
            .field("value", &self.value())
            .finish()
    }
}
