use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::key::{Tags, write_tags};

/// The tag attached to events stamped by the collision indexer.
pub const INDEX_TAG: &str = "index";

/// Returns the current UNIX time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// The kind of metric operation that produced an [`Event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// The running total of a counter.
    Counter,
    /// The duration of a timer in milliseconds.
    Timer,
    /// A polled gauge or meter reading.
    Gauge,
    /// An ad-hoc event.
    Event,
    /// An alert.
    Alert,
}

impl EventType {
    /// Returns the lowercase name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Timer => "timer",
            Self::Gauge => "gauge",
            Self::Event => "event",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The numeric value of an [`Event`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    /// An integer value.
    Int(i64),
    /// A floating point value.
    Float(f64),
}

impl EventValue {
    /// Returns the value as a float.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Compares two values numerically.
    ///
    /// Integers are compared exactly. Mixed comparisons go through `f64`, `NaN` sorts last.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            _ => self.as_f64().total_cmp(&other.as_f64()),
        }
    }
}

impl Default for EventValue {
    fn default() -> Self {
        Self::Int(0)
    }
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => v.fmt(f),
            Self::Float(v) => v.fmt(f),
        }
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for EventValue {
            fn from(value: $ty) -> Self {
                Self::Int(value.into())
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for EventValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for EventValue {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f32> for EventValue {
    fn from(value: f32) -> Self {
        Self::Float(value.into())
    }
}

impl From<f64> for EventValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// A recorded occurrence dispatched to [`Listener`](crate::Listener)s.
///
/// Events are built by metric operations and by reservoir or bucket flushes. Once dispatched,
/// listeners only ever see a shared reference, so neither the tags nor the value can change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The fully prefixed metric name.
    pub name: String,
    /// Registry default tags merged with metric and call-time tags.
    pub tags: Tags,
    /// UNIX timestamp in milliseconds.
    pub timestamp: u64,
    /// The recorded value.
    pub value: EventValue,
    /// The operation that produced the event.
    #[serde(rename = "type")]
    pub ty: EventType,
    /// Sequence number among events of the same key and millisecond.
    ///
    /// Only set when collision indexing is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl Event {
    /// Creates an unindexed event.
    pub fn new(
        name: impl Into<String>,
        tags: Tags,
        timestamp: u64,
        value: impl Into<EventValue>,
        ty: EventType,
    ) -> Self {
        Self {
            name: name.into(),
            tags,
            timestamp,
            value: value.into(),
            ty,
            index: None,
        }
    }
}

impl fmt::Display for Event {
    /// Formats the event as `<timestamp> <name> <k=v,...> <value>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.timestamp, self.name)?;
        write_tags(f, &self.tags)?;
        write!(f, " {}", self.value)
    }
}
