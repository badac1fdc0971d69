//! Time-windowed aggregation of events.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::event::{Event, EventType, EventValue};
use crate::key::MetricKey;
use crate::stats;
use crate::worker;

/// The smallest supported bucket window.
pub const MIN_BUCKET_WINDOW: Duration = Duration::from_secs(1);

/// Interval at which the sweeper checks every bucket for an expired window.
pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Percentiles reported for timer buckets.
const TIMER_PERCENTILES: [(u32, &str); 2] = [(90, "tp90"), (99, "tp99")];

/// Reported for a timer percentile the window holds too few values for.
const MISSING_PERCENTILE: EventValue = EventValue::Int(-1);

#[derive(Debug)]
struct BucketState {
    window_start: u64,
    values: Vec<EventValue>,
}

/// The values of one metric within the current window.
#[derive(Debug)]
struct Bucket {
    ty: EventType,
    state: Mutex<BucketState>,
}

impl Bucket {
    fn new(ty: EventType, now: u64) -> Self {
        Self {
            ty,
            state: Mutex::new(BucketState {
                window_start: now,
                values: Vec::new(),
            }),
        }
    }
}

/// Values claimed from an expired window.
#[derive(Debug)]
struct Expired {
    window_start: u64,
    values: Vec<EventValue>,
}

impl BucketState {
    /// Swaps out the values if the window has expired, starting a new window at `now`.
    ///
    /// Runs under the bucket lock, so exactly one caller claims a given window.
    fn take_expired(&mut self, now: u64, window_ms: u64) -> Option<Expired> {
        if now.saturating_sub(self.window_start) < window_ms {
            return None;
        }

        let window_start = std::mem::replace(&mut self.window_start, now);
        let values = std::mem::take(&mut self.values);
        (!values.is_empty()).then_some(Expired {
            window_start,
            values,
        })
    }
}

/// Aggregates events per metric into fixed time windows.
///
/// On window expiry, `<name>.count`, `<name>.min` and `<name>.max` are emitted, timestamped at the
/// start of the window. Timer windows additionally report `<name>.tp90` and `<name>.tp99`.
pub(crate) struct BucketAggregator {
    window_ms: u64,
    buckets: papaya::HashMap<MetricKey, Arc<Bucket>>,
}

impl fmt::Debug for BucketAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketAggregator")
            .field("window_ms", &self.window_ms)
            .field("num_buckets", &self.buckets.len())
            .finish()
    }
}

impl BucketAggregator {
    /// Creates an aggregator. Windows shorter than [`MIN_BUCKET_WINDOW`] are raised to it.
    pub fn new(window: Duration) -> Self {
        let window = window.max(MIN_BUCKET_WINDOW);
        Self {
            window_ms: window.as_millis() as u64,
            buckets: papaya::HashMap::new(),
        }
    }

    /// Adds an event to its bucket.
    ///
    /// If the bucket's window has expired, the expired window is flushed first and its summary
    /// returned. The event then opens the next window.
    pub fn add(&self, event: &Event, now: u64) -> Vec<Event> {
        let key = MetricKey::new(event.name.clone(), event.tags.clone());
        let buckets = self.buckets.pin();

        let bucket = match buckets.get(&key) {
            Some(bucket) => bucket,
            None => buckets.get_or_insert_with(key.clone(), || {
                Arc::new(Bucket::new(event.ty, now))
            }),
        };

        let expired = {
            let mut state = bucket.state.lock();
            let expired = state.take_expired(now, self.window_ms);
            state.values.push(event.value);
            expired
        };

        match expired {
            Some(expired) => summarize(&key, bucket.ty, expired),
            None => Vec::new(),
        }
    }

    /// Flushes every bucket whose window has expired.
    pub fn flush_expired(&self, now: u64) -> Vec<Event> {
        let mut events = Vec::new();
        for (key, bucket) in self.buckets.pin().iter() {
            let expired = bucket.state.lock().take_expired(now, self.window_ms);
            if let Some(expired) = expired {
                events.extend(summarize(key, bucket.ty, expired));
            }
        }
        events
    }

    /// Number of known buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }
}

fn summarize(key: &MetricKey, ty: EventType, expired: Expired) -> Vec<Event> {
    let Expired {
        window_start,
        mut values,
    } = expired;
    values.sort_unstable_by(EventValue::total_cmp);

    let derived = |suffix: &str, value: EventValue| {
        Event::new(
            format!("{}.{suffix}", key.name()),
            key.tags().clone(),
            window_start,
            value,
            EventType::Gauge,
        )
    };

    let (Some(&min), Some(&max)) = (values.first(), values.last()) else {
        return Vec::new();
    };

    let mut events = vec![
        derived("count", EventValue::from(values.len())),
        derived("min", min),
        derived("max", max),
    ];

    if ty == EventType::Timer {
        for (percentile, suffix) in TIMER_PERCENTILES {
            let value = stats::percentile_index(percentile, values.len())
                .map_or(MISSING_PERCENTILE, |index| values[index]);
            events.push(derived(suffix, value));
        }
    }

    events
}

/// Background thread that flushes expired buckets when no new events arrive.
///
/// Dropping the sweeper stops the thread after its current iteration.
#[derive(Debug)]
pub(crate) struct Sweeper {
    _stop: Sender<()>,
    _handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawns the sweeper, calling `sweep` every `interval`.
    ///
    /// The thread also exits when `sweep` returns `false`.
    pub fn spawn<F>(name: String, interval: Duration, mut sweep: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = worker::spawn_named(name, move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let mut keep_running = true;
                        worker::run_guarded("bucket sweeper", || keep_running = sweep());
                        if !keep_running {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tally_log::debug!("bucket sweeper stopped");
        })?;

        Ok(Self {
            _stop: stop_tx,
            _handle: handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use similar_asserts::assert_eq;

    use super::*;

    fn event(name: &str, value: i64, ty: EventType) -> Event {
        Event::new(name, crate::tags! { "host" => "web1" }, 0, value, ty)
    }

    fn summary(events: &[Event]) -> Vec<(&str, EventValue, u64)> {
        events
            .iter()
            .map(|e| (e.name.as_str(), e.value, e.timestamp))
            .collect()
    }

    #[test]
    fn test_window_minimum() {
        let aggregator = BucketAggregator::new(Duration::from_millis(10));
        assert_eq!(aggregator.window_ms, 1_000);
    }

    #[test]
    fn test_timer_window() {
        let aggregator = BucketAggregator::new(Duration::from_secs(1));

        for (i, value) in [30, 10, 20, 50, 40].into_iter().enumerate() {
            let now = 10_000 + i as u64;
            let flushed = aggregator.add(&event("latency", value, EventType::Timer), now);
            assert!(flushed.is_empty());
        }
        assert!(aggregator.flush_expired(10_999).is_empty());

        let events = aggregator.flush_expired(11_000);
        assert_eq!(
            summary(&events),
            vec![
                ("latency.count", EventValue::Int(5), 10_000),
                ("latency.min", EventValue::Int(10), 10_000),
                ("latency.max", EventValue::Int(50), 10_000),
                ("latency.tp90", EventValue::Int(50), 10_000),
                ("latency.tp99", EventValue::Int(50), 10_000),
            ]
        );
        assert!(events.iter().all(|e| e.tags["host"] == "web1"));

        // The window is claimed exactly once.
        assert!(aggregator.flush_expired(11_001).is_empty());
    }

    #[test]
    fn test_timer_percentiles_large_window() {
        let aggregator = BucketAggregator::new(Duration::from_secs(1));
        for value in 1..=100 {
            aggregator.add(&event("latency", value, EventType::Timer), 0);
        }

        let events = aggregator.flush_expired(1_000);
        assert_eq!(events[3].name, "latency.tp90");
        assert_eq!(events[3].value, EventValue::Int(91));
        assert_eq!(events[4].value, EventValue::Int(100));
    }

    #[test]
    fn test_event_window_has_no_percentiles() {
        let aggregator = BucketAggregator::new(Duration::from_secs(1));
        aggregator.add(&event("logins", 1, EventType::Event), 0);
        aggregator.add(&event("logins", 1, EventType::Event), 5);

        let events = aggregator.flush_expired(2_000);
        let names: Vec<_> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["logins.count", "logins.min", "logins.max"]);
        assert_eq!(events[0].value, EventValue::Int(2));
    }

    #[test]
    fn test_add_flushes_expired_window() {
        let aggregator = BucketAggregator::new(Duration::from_secs(1));
        assert!(aggregator.add(&event("latency", 5, EventType::Timer), 0).is_empty());

        let flushed = aggregator.add(&event("latency", 7, EventType::Timer), 1_500);
        assert_eq!(flushed[0].value, EventValue::Int(1));
        assert_eq!(flushed[1].value, EventValue::Int(5));

        // The triggering event belongs to the next window.
        let events = aggregator.flush_expired(2_500);
        assert_eq!(events[0].value, EventValue::Int(1));
        assert_eq!(events[1].value, EventValue::Int(7));
        assert_eq!(events[0].timestamp, 1_500);
    }

    #[test]
    fn test_buckets_by_tags() {
        let aggregator = BucketAggregator::new(Duration::from_secs(1));
        aggregator.add(&event("latency", 5, EventType::Timer), 0);

        let mut other = event("latency", 9, EventType::Timer);
        other.tags.insert("host".to_owned(), "web2".to_owned());
        aggregator.add(&other, 0);

        assert_eq!(aggregator.len(), 2);
        assert_eq!(aggregator.flush_expired(1_000).len(), 10);
    }

    #[test]
    fn test_concurrent_adds_are_counted_once() {
        let aggregator = Arc::new(BucketAggregator::new(Duration::from_secs(1)));
        let threads = 8;
        let per_thread = 1_000;

        let flushed: Vec<Event> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let aggregator = &aggregator;
                    scope.spawn(move || {
                        let mut flushed = Vec::new();
                        for i in 0..per_thread {
                            // Half of the adds land in a later window.
                            let now = if i < per_thread / 2 { 0 } else { 1_000 + t };
                            let hit = event("hits", 1, EventType::Event);
                            flushed.extend(aggregator.add(&hit, now));
                        }
                        flushed
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let total: i64 = flushed
            .iter()
            .chain(aggregator.flush_expired(10_000).iter())
            .filter(|e| e.name == "hits.count")
            .map(|e| match e.value {
                EventValue::Int(count) => count,
                EventValue::Float(_) => unreachable!(),
            })
            .sum();

        assert_eq!(total, threads as i64 * per_thread as i64);
    }

    #[test]
    fn test_sweeper_runs_and_stops() {
        tally_test::setup();

        let sweeps = Arc::new(AtomicUsize::new(0));
        let sweeper = {
            let sweeps = Arc::clone(&sweeps);
            Sweeper::spawn("test-sweeper".to_owned(), Duration::from_millis(1), move || {
                sweeps.fetch_add(1, Ordering::Relaxed);
                true
            })
            .unwrap()
        };

        assert!(tally_test::wait_until(Duration::from_secs(5), || {
            sweeps.load(Ordering::Relaxed) >= 3
        }));
        drop(sweeper);
    }
}
