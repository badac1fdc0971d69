//! Fixed-capacity percentile sampling.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use enumset::EnumSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventType, EventValue, now_millis};
use crate::key::MetricKey;
use crate::stats::{self, MAX_PERCENTILE, Statistic, Summary};
use crate::worker;

/// An error returned when validating a [`ReservoirConfig`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReservoirConfigError {
    /// The capacity is zero.
    #[error("reservoir capacity must be at least 1")]
    ZeroCapacity,
    /// A percentile is outside the supported range.
    #[error("percentile {0} is out of range, must be at most 99999")]
    InvalidPercentile(u32),
    /// The capacity is too small to resolve a percentile.
    #[error("capacity {capacity} is too small to resolve percentile {percentile}")]
    CapacityTooSmall {
        /// The configured capacity.
        capacity: usize,
        /// The first percentile that cannot be resolved.
        percentile: u32,
    },
}

/// Configuration for percentile reservoirs.
///
/// The configuration applies to every reservoir of a registry and can only be changed before
/// the first reservoir has been created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservoirConfig {
    /// Number of samples collected before percentiles are computed.
    ///
    /// Defaults to `100`.
    pub capacity: usize,

    /// Percentiles to report, emitted as `<name>.p<N>`.
    ///
    /// `90` denotes the 90th percentile, `999` the 99.9th and `9999` the 99.99th. Defaults to
    /// `[90, 99]`.
    pub percentiles: Vec<u32>,

    /// Additional statistics to report.
    ///
    /// Defaults to none.
    pub stats: Vec<Statistic>,
}

impl ReservoirConfig {
    /// Checks that every percentile is supported and resolvable with the configured capacity.
    pub fn validate(&self) -> Result<(), ReservoirConfigError> {
        if self.capacity == 0 {
            return Err(ReservoirConfigError::ZeroCapacity);
        }

        for &percentile in &self.percentiles {
            if percentile > MAX_PERCENTILE {
                return Err(ReservoirConfigError::InvalidPercentile(percentile));
            }
            if !stats::is_resolvable(percentile, self.capacity) {
                return Err(ReservoirConfigError::CapacityTooSmall {
                    capacity: self.capacity,
                    percentile,
                });
            }
        }

        Ok(())
    }

    fn stat_set(&self) -> EnumSet<Statistic> {
        self.stats.iter().copied().collect()
    }
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            percentiles: vec![90, 99],
            stats: Vec::new(),
        }
    }
}

/// A rotating sample buffer for a single metric.
#[derive(Debug)]
pub(crate) struct Reservoir {
    key: MetricKey,
    config: Arc<ReservoirConfig>,
    buffer: Mutex<Vec<EventValue>>,
}

impl Reservoir {
    /// Creates an empty reservoir for the prefixed name and merged tags in `key`.
    pub fn new(key: MetricKey, config: Arc<ReservoirConfig>) -> Self {
        let buffer = Mutex::new(Vec::with_capacity(config.capacity));
        Self {
            key,
            config,
            buffer,
        }
    }

    /// Adds a sample.
    ///
    /// When the buffer is full, it is swapped for an empty one and the full buffer is returned
    /// for computation. The returned buffer is never touched by producers again.
    #[must_use]
    pub fn update(&self, value: EventValue) -> Option<ReservoirFlush> {
        let mut buffer = self.buffer.lock();
        buffer.push(value);
        if buffer.len() < self.config.capacity {
            return None;
        }

        let samples = std::mem::replace(&mut *buffer, Vec::with_capacity(self.config.capacity));
        Some(ReservoirFlush {
            key: self.key.clone(),
            config: Arc::clone(&self.config),
            samples,
        })
    }

    /// Number of samples in the current buffer.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }
}

/// A full reservoir buffer waiting to be computed.
#[derive(Debug)]
pub(crate) struct ReservoirFlush {
    key: MetricKey,
    config: Arc<ReservoirConfig>,
    samples: Vec<EventValue>,
}

impl ReservoirFlush {
    /// Sorts the samples and computes the configured percentiles and statistics.
    ///
    /// All events carry the key's tags and the given flush timestamp. Percentiles that the sample
    /// cannot resolve are skipped.
    pub fn compute(mut self, timestamp: u64) -> Vec<Event> {
        self.samples.sort_unstable_by(EventValue::total_cmp);

        let name = self.key.name();
        let tags = self.key.tags();
        let derived = |suffix: &str, value: EventValue| {
            Event::new(
                format!("{name}.{suffix}"),
                tags.clone(),
                timestamp,
                value,
                EventType::Gauge,
            )
        };

        let mut events = Vec::new();
        for &percentile in &self.config.percentiles {
            match stats::percentile_index(percentile, self.samples.len()) {
                Some(index) => {
                    events.push(derived(&format!("p{percentile}"), self.samples[index]));
                }
                None => tally_log::debug!(
                    "not enough samples in {} for percentile {percentile}",
                    self.key
                ),
            }
        }

        let stat_set = self.config.stat_set();
        if stat_set.is_empty() || self.samples.is_empty() {
            return events;
        }

        let summary: Summary = self.samples.iter().map(|v| v.as_f64()).collect();
        for stat in stat_set {
            let value = match stat {
                Statistic::Min => self.samples[0],
                Statistic::Max => self.samples[self.samples.len() - 1],
                Statistic::Std => EventValue::Float(summary.std_dev()),
                Statistic::Ave => EventValue::Float(summary.mean()),
            };
            events.push(derived(stat.suffix(), value));
        }

        events
    }
}

/// Background thread computing full reservoirs off the producer threads.
///
/// Dropping the worker disconnects its channel. The thread drains pending flushes and exits.
#[derive(Debug)]
pub(crate) struct ReservoirWorker {
    tx: Sender<ReservoirFlush>,
    _handle: JoinHandle<()>,
}

impl ReservoirWorker {
    /// Spawns the worker. `emit` receives the computed events of every flush.
    pub fn spawn<F>(name: String, emit: F) -> io::Result<Self>
    where
        F: Fn(Vec<Event>) + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = worker::spawn_named(name, move || run_worker(rx, emit))?;
        Ok(Self {
            tx,
            _handle: handle,
        })
    }

    /// Queues a full buffer for computation.
    pub fn submit(&self, flush: ReservoirFlush) {
        if self.tx.send(flush).is_err() {
            tally_log::error!("reservoir worker is gone, dropping samples");
        }
    }
}

fn run_worker(rx: Receiver<ReservoirFlush>, emit: impl Fn(Vec<Event>)) {
    for flush in rx {
        worker::run_guarded("reservoir", || emit(flush.compute(now_millis())));
    }
    tally_log::debug!("reservoir worker stopped");
}
