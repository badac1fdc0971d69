use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use std::{fmt, io};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tally_log::LogError;
use tally_metrics::{Event, EventType, Listener, now_millis, tags};

use crate::sink::Sink;

/// How long the worker waits for the first event of a batch before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often [`ThreadedListener::stop`] checks whether the worker has finished.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Queue and worker settings of a [`ThreadedListener`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of events waiting for delivery.
    ///
    /// Defaults to `1000`.
    pub queue_size: usize,
    /// Maximum number of events handed to the sink at once.
    ///
    /// Defaults to `100`.
    pub batch_size: usize,
    /// How long a producer may wait for space in a full queue, in milliseconds.
    ///
    /// Defaults to not waiting: events offered to a full queue are dropped immediately.
    pub offer_timeout_ms: Option<u64>,
    /// How long `stop` waits for pending events to drain, in milliseconds.
    ///
    /// Defaults to `2000`.
    pub stop_grace_ms: u64,
    /// Interval of the delivery statistics log line, in seconds. `0` disables it.
    ///
    /// Defaults to `60`.
    pub stats_interval_secs: u64,
    /// Name prefix of delivery statistics reported through the sink itself.
    ///
    /// When set, each statistics log line is accompanied by the gauges `<prefix>.delivered`,
    /// `<prefix>.failed` and `<prefix>.dropped`, tagged with the listener name. These events
    /// bypass the queue and are not counted. Defaults to not reporting.
    pub stats_prefix: Option<String>,
}

impl QueueConfig {
    /// Returns the policy applied when the queue is full.
    pub fn offer_policy(&self) -> OfferPolicy {
        match self.offer_timeout_ms {
            Some(0) | None => OfferPolicy::Drop,
            Some(ms) => OfferPolicy::Wait(Duration::from_millis(ms)),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            batch_size: 100,
            offer_timeout_ms: None,
            stop_grace_ms: 2000,
            stats_interval_secs: 60,
            stats_prefix: None,
        }
    }
}

/// What a producer does when the listener's queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferPolicy {
    /// Drop the event immediately.
    Drop,
    /// Wait up to the given duration for space, then drop the event.
    Wait(Duration),
}

/// Delivery counters of a [`ThreadedListener`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    /// Events handed to the sink successfully.
    pub delivered: u64,
    /// Events in batches the sink failed to deliver.
    pub failed: u64,
    /// Events rejected because the queue was full or the listener was stopped.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Handle {
    sender: Sender<Event>,
    shutdown: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// A [`Listener`] that hands events to a [`Sink`] on a dedicated worker thread.
///
/// Producers only ever enqueue into a bounded channel. When the channel is full, events are
/// dropped according to the configured [`OfferPolicy`] and counted in [`ListenerStats::dropped`].
pub struct ThreadedListener {
    name: &'static str,
    handle: Handle,
    policy: OfferPolicy,
    stop_grace: Duration,
    stopped: AtomicBool,
    indexing: bool,
    counters: Arc<Counters>,
}

impl ThreadedListener {
    /// Starts the worker thread for `sink`.
    pub fn spawn<S: Sink>(sink: S, config: &QueueConfig) -> io::Result<Self> {
        let name = sink.name();
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_size.max(1));
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(1);
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            sink,
            receiver,
            shutdown: shutdown_rx,
            batch_size: config.batch_size.max(1),
            stats_interval: match config.stats_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            stats_prefix: config.stats_prefix.clone(),
            counters: Arc::clone(&counters),
        };

        let join = thread::Builder::new()
            .name(format!("tally-listener-{name}"))
            .spawn(move || worker.run())?;

        Ok(Self {
            name,
            handle: Handle {
                sender,
                shutdown,
                worker: Mutex::new(Some(join)),
            },
            policy: config.offer_policy(),
            stop_grace: Duration::from_millis(config.stop_grace_ms),
            stopped: AtomicBool::new(false),
            indexing: false,
            counters,
        })
    }

    /// Requests collision indexing from registries this listener is attached to.
    pub fn with_indexing(mut self, indexing: bool) -> Self {
        self.indexing = indexing;
        self
    }

    /// Returns the name of the underlying sink.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns a snapshot of the delivery counters.
    pub fn stats(&self) -> ListenerStats {
        self.counters.snapshot()
    }

    fn drop_event(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl Listener for ThreadedListener {
    fn on_event(&self, event: &Event) {
        if self.stopped.load(Ordering::Acquire) {
            self.drop_event();
            return;
        }

        let accepted = match self.policy {
            OfferPolicy::Drop => match self.handle.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
            },
            OfferPolicy::Wait(timeout) => {
                match self.handle.sender.send_timeout(event.clone(), timeout) {
                    Ok(()) => true,
                    Err(SendTimeoutError::Timeout(_) | SendTimeoutError::Disconnected(_)) => false,
                }
            }
        };

        if !accepted {
            self.drop_event();
        }
    }

    fn events_buffered(&self) -> usize {
        self.handle.sender.len()
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        // A full shutdown channel means a signal is already pending.
        self.handle.shutdown.try_send(()).ok();

        let Some(join) = self.handle.worker.lock().take() else {
            return;
        };

        let deadline = Instant::now() + self.stop_grace;
        while !join.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if join.is_finished() {
            if join.join().is_err() {
                tally_log::error!(listener = self.name, "listener worker panicked");
            }
        } else {
            tally_log::warn!(
                listener = self.name,
                pending = self.handle.sender.len(),
                "listener did not drain within {:?}, detaching worker",
                self.stop_grace,
            );
        }
    }

    fn requires_indexing(&self) -> bool {
        self.indexing
    }
}

impl Drop for ThreadedListener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ThreadedListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedListener")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("buffered", &self.handle.sender.len())
            .field("stats", &self.stats())
            .finish()
    }
}

struct Worker<S> {
    sink: S,
    receiver: Receiver<Event>,
    shutdown: Receiver<()>,
    batch_size: usize,
    stats_interval: Option<Duration>,
    stats_prefix: Option<String>,
    counters: Arc<Counters>,
}

impl<S: Sink> Worker<S> {
    fn run(mut self) {
        let name = self.sink.name();
        tally_log::debug!(listener = name, "listener worker started");

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut last_stats = Instant::now();
        let mut logged = ListenerStats::default();

        loop {
            if self.shutdown.try_recv().is_ok() {
                break;
            }

            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    batch.push(event);
                    batch.extend(self.receiver.try_iter().take(self.batch_size - 1));
                    self.deliver(&mut batch);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Some(interval) = self.stats_interval {
                if last_stats.elapsed() >= interval {
                    self.report_stats(&mut logged);
                    last_stats = Instant::now();
                }
            }
        }

        // Drain whatever was accepted before the shutdown.
        loop {
            batch.extend(self.receiver.try_iter().take(self.batch_size));
            if batch.is_empty() {
                break;
            }
            self.deliver(&mut batch);
        }

        self.report_stats(&mut logged);

        if let Err(error) = self.sink.flush() {
            tally_log::error!(
                listener = name,
                error = &error as &dyn std::error::Error,
                "failed to flush listener"
            );
        }

        tally_log::debug!(listener = name, "listener worker stopped");
    }

    fn deliver(&mut self, batch: &mut Vec<Event>) {
        let count = batch.len() as u64;
        let name = self.sink.name();
        let sink = &mut self.sink;

        match panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(batch))) {
            Ok(Ok(())) => {
                self.counters.delivered.fetch_add(count, Ordering::Relaxed);
            }
            Ok(Err(error)) => {
                self.counters.failed.fetch_add(count, Ordering::Relaxed);
                tally_log::error!(
                    listener = name,
                    events = count,
                    "failed to deliver events: {}",
                    LogError(&error)
                );
            }
            Err(_) => {
                self.counters.failed.fetch_add(count, Ordering::Relaxed);
                tally_log::error!(listener = name, events = count, "listener sink panicked");
            }
        }

        batch.clear();
    }

    /// Logs the counters if they changed since the previous call, and reports them as gauges
    /// if a stats prefix is configured.
    fn report_stats(&mut self, reported: &mut ListenerStats) {
        let stats = self.counters.snapshot();
        if stats == *reported {
            return;
        }
        *reported = stats;

        let name = self.sink.name();
        tally_log::info!(
            listener = name,
            delivered = stats.delivered,
            failed = stats.failed,
            dropped = stats.dropped,
            pending = self.receiver.len(),
            "listener statistics"
        );

        let Some(prefix) = &self.stats_prefix else {
            return;
        };

        let timestamp = now_millis();
        let gauge = |field: &str, value: u64| {
            let tags = tags! { "listener" => name };
            Event::new(format!("{prefix}.{field}"), tags, timestamp, value, EventType::Gauge)
        };
        let events = [
            gauge("delivered", stats.delivered),
            gauge("failed", stats.failed),
            gauge("dropped", stats.dropped),
        ];

        let sink = &mut self.sink;
        match panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(&events))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tally_log::warn!(
                    listener = name,
                    "failed to report statistics: {}",
                    LogError(&error)
                );
            }
            Err(_) => tally_log::warn!(listener = name, "listener sink panicked on statistics"),
        }
    }
}
