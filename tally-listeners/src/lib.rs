//! Listeners delivering tally metric events to their destinations.
//!
//! All listeners here share the same shape: a [`ThreadedListener`] accepts events from producer
//! threads into a bounded queue and hands them in batches to a [`Sink`] running on a dedicated
//! worker thread. Producers never block on I/O. When the queue is full, events are dropped and
//! counted, optionally after waiting for a bounded time (see [`QueueConfig::offer_timeout_ms`]).
//!
//! Three sinks are provided:
//!
//!  - [`ConsoleSink`] prints one line per event.
//!  - [`KairosSink`] posts batches to the KairosDB datapoint API.
//!  - [`GraphiteSink`] writes the Graphite plaintext protocol over TCP.
//!
//! Listeners are usually created from a [`ListenerConfig`]:
//!
//! ```
//! use tally_listeners::ListenerConfig;
//!
//! let config: ListenerConfig = serde_yaml::from_str("type: console").unwrap();
//! let listener = config.build().unwrap();
//! listener.stop();
//! ```

#![warn(missing_docs)]

mod config;
mod console;
mod graphite;
mod kairos;
mod sink;
mod threaded;

pub use self::config::*;
pub use self::console::*;
pub use self::graphite::*;
pub use self::kairos::*;
pub use self::sink::*;
pub use self::threaded::*;
