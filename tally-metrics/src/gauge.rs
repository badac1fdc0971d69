use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::event::{Event, EventType, EventValue};
use crate::key::Tags;

/// A pull-based value source polled on a schedule.
///
/// Implemented for closures returning a number:
///
/// ```
/// use tally_metrics::{EventValue, Gauge};
///
/// let gauge = || 42u32;
/// assert_eq!(gauge.value(), EventValue::Int(42));
/// ```
pub trait Gauge: Send + Sync + 'static {
    /// Returns the current value.
    fn value(&self) -> EventValue;
}

impl<F, T> Gauge for F
where
    F: Fn() -> T + Send + Sync + 'static,
    T: Into<EventValue>,
{
    fn value(&self) -> EventValue {
        self().into()
    }
}

/// A resettable accumulator reporting rates.
///
/// Each poll reports the count accumulated since the previous poll and resets it, so readings
/// are windowed rates rather than cumulative totals. Clones share the same accumulator.
#[derive(Clone, Default)]
pub struct Meter {
    count: Arc<AtomicI64>,
}

impl Meter {
    /// Creates a meter with a count of zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one occurrence.
    pub fn mark(&self) {
        self.mark_n(1);
    }

    /// Records `n` occurrences.
    pub fn mark_n(&self, n: i64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns the accumulated count and resets it to zero.
    pub(crate) fn take(&self) -> i64 {
        self.count.swap(0, Ordering::Relaxed)
    }

    /// Returns `true` if both handles share the same accumulator.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.count, &other.count)
    }
}

impl Gauge for Meter {
    fn value(&self) -> EventValue {
        EventValue::Int(self.take())
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter")
            .field("count", &self.count.load(Ordering::Relaxed))
            .finish()
    }
}

/// How a [`GaugeRunner`] turns polls into events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GaugeMode {
    /// Every poll is reported.
    Direct,
    /// Only the maximum over `polls_per_report` polls is reported.
    MaxWindowed { polls_per_report: u32 },
}

impl GaugeMode {
    /// Derives a max-windowed mode from the collect and report intervals.
    pub fn max_windowed(collect: Duration, report: Duration) -> Self {
        let polls = report.as_nanos() / collect.as_nanos().max(1);
        Self::MaxWindowed {
            polls_per_report: u32::try_from(polls).unwrap_or(u32::MAX).max(1),
        }
    }
}

/// Polls a gauge and builds the events to emit.
pub(crate) struct GaugeRunner {
    name: String,
    tags: Tags,
    gauge: Arc<dyn Gauge>,
    mode: GaugeMode,
    max: Option<EventValue>,
    polls: u32,
}

impl GaugeRunner {
    /// Creates a runner for the prefixed `name` with fully merged `tags`.
    pub fn new(name: String, tags: Tags, gauge: Arc<dyn Gauge>, mode: GaugeMode) -> Self {
        Self {
            name,
            tags,
            gauge,
            mode,
            max: None,
            polls: 0,
        }
    }

    /// Polls the gauge once and returns the event to emit, if this poll reports.
    pub fn tick(&mut self, now: u64) -> Option<Event> {
        let value = self.gauge.value();

        let report = match self.mode {
            GaugeMode::Direct => value,
            GaugeMode::MaxWindowed { polls_per_report } => {
                let max = match self.max {
                    Some(max) if max.total_cmp(&value).is_ge() => max,
                    _ => value,
                };
                self.polls += 1;
                if self.polls < polls_per_report {
                    self.max = Some(max);
                    return None;
                }
                self.polls = 0;
                self.max = None;
                max
            }
        };

        Some(Event::new(
            self.name.clone(),
            self.tags.clone(),
            now,
            report,
            EventType::Gauge,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use similar_asserts::assert_eq;

    use super::*;

    fn sequence(values: Vec<i64>) -> Arc<dyn Gauge> {
        let position = AtomicUsize::new(0);
        Arc::new(move || values[position.fetch_add(1, Ordering::Relaxed) % values.len()])
    }

    #[test]
    fn test_meter_resets_on_poll() {
        let meter = Meter::new();
        meter.mark();
        meter.mark_n(4);
        assert_eq!(meter.value(), EventValue::Int(5));
        assert_eq!(meter.value(), EventValue::Int(0));

        let clone = meter.clone();
        clone.mark();
        assert!(clone.ptr_eq(&meter));
        assert_eq!(meter.value(), EventValue::Int(1));
    }

    #[test]
    fn test_closure_gauge() {
        let gauge = || 2.5f64;
        assert_eq!(gauge.value(), EventValue::Float(2.5));
    }

    #[test]
    fn test_direct_runner() {
        let tags = crate::tags! { "host" => "web1" };
        let gauge = sequence(vec![3, 7]);
        let mut runner =
            GaugeRunner::new("app.queue".to_owned(), tags.clone(), gauge, GaugeMode::Direct);

        let event = runner.tick(100).unwrap();
        assert_eq!(event.name, "app.queue");
        assert_eq!(event.value, EventValue::Int(3));
        assert_eq!(event.timestamp, 100);
        assert_eq!(event.ty, EventType::Gauge);
        assert_eq!(event.tags, tags);

        assert_eq!(runner.tick(200).unwrap().value, EventValue::Int(7));
    }

    #[test]
    fn test_max_windowed_runner() {
        let mode = GaugeMode::max_windowed(Duration::from_millis(10), Duration::from_millis(30));
        assert_eq!(mode, GaugeMode::MaxWindowed { polls_per_report: 3 });

        let gauge = sequence(vec![4, 9, 2, 1, 1, 5]);
        let mut runner = GaugeRunner::new("q".to_owned(), Tags::new(), gauge, mode);

        assert!(runner.tick(0).is_none());
        assert!(runner.tick(10).is_none());
        assert_eq!(runner.tick(20).unwrap().value, EventValue::Int(9));

        // The maximum is reset after each report.
        assert!(runner.tick(30).is_none());
        assert!(runner.tick(40).is_none());
        assert_eq!(runner.tick(50).unwrap().value, EventValue::Int(5));
    }

    #[test]
    fn test_max_windowed_minimum_one_poll() {
        let mode = GaugeMode::max_windowed(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(mode, GaugeMode::MaxWindowed { polls_per_report: 1 });
    }
}
