//! Named event counters for observability.
//!
//! A process-wide store maps `"<group> <counter>"` strings to totals.
//! Components hold a [`Counters`] handle bound to their group so call
//! sites stay one-liners. The daemon prints a snapshot on SIGQUIT and at
//! exit, and can export it as JSON for out-of-process inspection.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Shared counter storage.
#[derive(Clone, Default)]
pub struct CounterStore {
    inner: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that prefixes every counter with `group`.
    pub fn group(&self, group: &'static str) -> Counters {
        Counters {
            store: self.clone(),
            group,
        }
    }

    /// Increment a fully qualified counter by one.
    pub fn increment(&self, key: String) {
        let mut map = self.inner.lock().expect("counter store poisoned");
        *map.entry(key).or_insert(0) += 1;
    }

    /// Current value of a fully qualified counter.
    pub fn value(&self, key: &str) -> u64 {
        let map = self.inner.lock().expect("counter store poisoned");
        map.get(key).copied().unwrap_or(0)
    }

    /// A sorted copy of every counter.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.inner.lock().expect("counter store poisoned").clone()
    }
}

/// A group-bound handle into the [`CounterStore`].
#[derive(Clone)]
pub struct Counters {
    store: CounterStore,
    group: &'static str,
}

impl Counters {
    pub fn inc(&self, name: &str) {
        self.store.increment(format!("{} {}", self.group, name));
    }

    pub fn group(&self) -> &'static str {
        self.group
    }
}
