use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::{Event, INDEX_TAG};
use crate::key::MetricKey;

/// The index assigned to the first event of a key in a millisecond.
pub const BASE_INDEX: u32 = 0;

/// Number of distinct milliseconds remembered per key.
///
/// Events arriving for an older millisecond than all remembered ones start again at
/// [`BASE_INDEX`].
const MAX_TRACKED_MILLIS: usize = 1024;

/// The next free index of every recently seen millisecond of a key.
#[derive(Debug, Default)]
struct Window {
    next: BTreeMap<u64, u32>,
}

impl Window {
    fn next_index(&mut self, millis: u64) -> u32 {
        let next = self.next.entry(millis).or_insert(BASE_INDEX);
        let index = *next;
        *next = next.saturating_add(1);

        while self.next.len() > MAX_TRACKED_MILLIS {
            self.next.pop_first();
        }

        index
    }
}

/// Disambiguates events that share a metric key and a millisecond timestamp.
///
/// Each such event receives an increasing `index` starting at [`BASE_INDEX`]. Indexes are kept
/// per millisecond, so events arriving out of timestamp order never reuse an index.
#[derive(Default)]
pub(crate) struct CollisionIndexer {
    windows: papaya::HashMap<MetricKey, Arc<Mutex<Window>>>,
}

impl CollisionIndexer {
    /// Returns the index for the next event of `key` at `millis`.
    pub fn next_index(&self, key: MetricKey, millis: u64) -> u32 {
        let window = {
            let windows = self.windows.pin();
            Arc::clone(windows.get_or_insert_with(key, Default::default))
        };
        window.lock().next_index(millis)
    }

    /// Sets the event's index and adds it as the `index` tag.
    pub fn stamp(&self, event: &mut Event) {
        let key = MetricKey::new(event.name.clone(), event.tags.clone());
        let index = self.next_index(key, event.timestamp);
        event.index = Some(index);
        event.tags.insert(INDEX_TAG.to_owned(), index.to_string());
    }
}

impl fmt::Debug for CollisionIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollisionIndexer")
            .field("num_keys", &self.windows.len())
            .finish()
    }
}
