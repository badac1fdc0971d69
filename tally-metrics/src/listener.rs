use std::sync::Arc;

use crate::event::Event;

/// A consumer of dispatched [`Event`]s.
///
/// The registry calls [`on_event`](Self::on_event) synchronously on the producer's thread, for
/// every listener in registration order. Implementations must therefore return quickly and must
/// never block on I/O. Delivery belongs on a background thread owned by the listener, fed through
/// a bounded queue.
pub trait Listener: Send + Sync {
    /// Accepts an event for delivery.
    ///
    /// When the listener cannot keep up, it drops the event according to its backpressure policy
    /// instead of blocking the producer.
    fn on_event(&self, event: &Event);

    /// Number of events accepted but not yet delivered.
    fn events_buffered(&self) -> usize {
        0
    }

    /// Drains pending events and stops background work.
    ///
    /// Blocks the caller for a bounded grace period. Calling `stop` more than once has no effect.
    fn stop(&self) {}

    /// Declares that the listener needs events of the same key and millisecond to be
    /// distinguished by an `index` tag.
    ///
    /// Collision indexing is only active while at least one such listener is registered.
    fn requires_indexing(&self) -> bool {
        false
    }
}

/// Returns `true` if both handles point to the same listener.
pub(crate) fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
