//! TTL-bounded envelope deduplication cache
//!
//! Both the actor shell and the agent core suppress envelopes whose id was
//! already seen. Entries expire after a TTL and the cache is capped, so a
//! long-lived actor never grows an unbounded seen-set.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RuntimeConfig;
use crate::domain_types::EventId;

#[derive(Debug, Default)]
struct DedupInner {
    seen: HashMap<EventId, Instant>,
    order: VecDeque<(EventId, Instant)>,
}

/// Bounded first-seen filter over envelope ids
#[derive(Debug)]
pub struct DedupCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<DedupInner>,
}

impl DedupCache {
    /// Creates a cache with the given entry TTL and entry cap
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(DedupInner::default()),
        }
    }

    /// Creates a cache from the runtime configuration
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            config.dedup_ttl_ms.as_duration(),
            config.dedup_capacity.as_usize(),
        )
    }

    /// Records the id and reports whether it was seen for the first time.
    ///
    /// An id whose previous sighting has expired counts as first-seen
    /// again.
    pub fn observe(&self, id: EventId) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("dedup lock poisoned");

        Self::purge_expired(&mut inner, now, self.ttl);
        if inner.seen.contains_key(&id) {
            return false;
        }
        // At capacity, evict the oldest entry to stay bounded.
        while inner.seen.len() >= self.capacity {
            let Some((old_id, old_at)) = inner.order.pop_front() else {
                break;
            };
            if inner.seen.get(&old_id) == Some(&old_at) {
                inner.seen.remove(&old_id);
            }
        }
        inner.seen.insert(id, now);
        inner.order.push_back((id, now));
        true
    }

    /// Whether the id is currently held (and unexpired)
    #[must_use]
    pub fn contains(&self, id: EventId) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("dedup lock poisoned");
        Self::purge_expired(&mut inner, now, self.ttl);
        inner.seen.contains_key(&id)
    }

    /// Number of unexpired entries
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("dedup lock poisoned");
        Self::purge_expired(&mut inner, now, self.ttl);
        inner.seen.len()
    }

    /// Whether the cache holds no unexpired entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(inner: &mut DedupInner, now: Instant, ttl: Duration) {
        while let Some((id, at)) = inner.order.front().copied() {
            if now.duration_since(at) < ttl {
                break;
            }
            inner.order.pop_front();
            // Only drop the seen entry if it still refers to this sighting.
            if inner.seen.get(&id) == Some(&at) {
                inner.seen.remove(&id);
            }
        }
    }
}
