//! In-process metrics: counters, timers, gauges, meters and events.
//!
//! A [`Registry`] hands out metrics identified by a [`MetricKey`], merges tags and dispatches
//! every resulting [`Event`] synchronously to its [`Listener`]s. Delivery, buffering and
//! backpressure are the responsibility of the listeners.
//!
//! Besides raw events, a registry can aggregate values:
//!
//!  - **Percentile reservoirs** collect a fixed number of samples per metric and emit
//!    percentiles and summary statistics whenever the buffer fills. See [`ReservoirConfig`].
//!  - **Buckets** aggregate timers, events and alerts into time windows and emit count, min, max
//!    and, for timers, `tp90` and `tp99`. See [`RegistryBuilder::bucket_window`].
//!  - **Collision indexing** stamps events that share a key and millisecond with an `index` tag,
//!    whenever a listener asks for it via [`Listener::requires_indexing`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use tally_metrics::{Registries, RegistryBuilder, Tags};
//!
//! let registry = Registries::global()
//!     .get_or_build(RegistryBuilder::new("shop", "checkout", "prod").host("web1"))
//!     .unwrap();
//!
//! registry.counter("orders").increment();
//!
//! let timer = registry.timer("payment");
//! // ... perform the payment
//! timer.stop();
//!
//! registry
//!     .schedule_gauge("queue_depth", Duration::from_secs(10), || 42, Tags::new())
//!     .unwrap();
//! ```

#![warn(missing_docs)]

mod bucket;
mod counter;
mod event;
mod gauge;
mod indexer;
mod key;
mod listener;
mod registries;
mod registry;
mod reservoir;
mod scheduler;
mod stats;
mod timer;
mod worker;

#[cfg(any(test, feature = "test"))]
pub mod testutils;

pub use self::bucket::MIN_BUCKET_WINDOW;
pub use self::counter::*;
pub use self::event::*;
pub use self::gauge::{Gauge, Meter};
pub use self::indexer::BASE_INDEX;
pub use self::key::*;
pub use self::listener::*;
pub use self::registries::*;
pub use self::registry::*;
pub use self::reservoir::{ReservoirConfig, ReservoirConfigError};
pub use self::stats::{MAX_PERCENTILE, Statistic, Summary, percentile_index};
pub use self::timer::*;
