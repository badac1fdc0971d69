use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::event::now_millis;
use crate::key::Tags;
use crate::registry::Registry;

/// Selects what a [`Timer`] does with its measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    /// Emits one event per measurement.
    #[default]
    Raw,
    /// Feeds the measurement into the metric's percentile reservoir.
    Percentile,
    /// Emits one event per measurement, always stamped with a collision index.
    Indexed,
}

/// A single in-flight duration measurement.
///
/// Created running by [`Registry::timer`]. Stopping the timer consumes it and records the elapsed
/// milliseconds according to its [`TimerMode`]. The event is timestamped at the start or at the
/// end of the measurement, depending on the registry's configuration.
#[derive(Debug)]
#[must_use = "a timer only records a measurement when stopped"]
pub struct Timer {
    registry: Registry,
    name: String,
    tags: Tags,
    mode: TimerMode,
    start: Instant,
    start_millis: u64,
}

impl Timer {
    pub(crate) fn start(registry: Registry, name: String, tags: Tags, mode: TimerMode) -> Self {
        Self {
            registry,
            name,
            tags,
            mode,
            start: Instant::now(),
            start_millis: now_millis(),
        }
    }

    /// Overrides the registry's default [`TimerMode`] for this measurement.
    pub fn with_mode(mut self, mode: TimerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Adds a tag to the running timer.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Time since the timer was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// UNIX timestamp in milliseconds at which the timer was started.
    pub fn start_millis(&self) -> u64 {
        self.start_millis
    }

    /// Stops the timer and returns the measured duration in milliseconds.
    pub fn stop(self) -> u64 {
        self.stop_with_tags(Tags::new())
    }

    /// Stops the timer with additional tags and returns the measured duration in milliseconds.
    pub fn stop_with_tags(mut self, tags: Tags) -> u64 {
        let duration = self.elapsed().as_millis() as u64;
        self.tags.extend(tags);
        self.registry.record_timer(
            &self.name,
            &self.tags,
            self.start_millis,
            duration,
            self.mode,
        );
        duration
    }
}
