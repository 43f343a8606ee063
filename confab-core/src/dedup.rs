// ABOUTME: Trailing-window deduplication of inbound message ids
// ABOUTME: SeenRegistry drops redelivered webhooks before they reach any buffer

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Default trailing window for duplicate detection: five minutes.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(300);

/// Registry of recently seen message ids with trailing-window eviction.
///
/// Purging is folded into `accept` so the registry stays bounded without a
/// dedicated sweep task: each call pops expired arrivals off the front of
/// the queue before deciding, amortized O(1) per event.
pub struct SeenRegistry {
    ttl: Duration,
    seen: HashMap<String, Instant>,
    arrivals: VecDeque<(Instant, String)>,
}

impl SeenRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
            arrivals: VecDeque::new(),
        }
    }

    /// Records `message_id` and returns true if it has not been seen within
    /// the TTL window. Returns false for a duplicate, leaving the original
    /// first-seen timestamp in place.
    pub fn accept(&mut self, message_id: &str, now: Instant) -> bool {
        self.purge_expired(now);

        if let Some(first_seen) = self.seen.get(message_id) {
            if now.duration_since(*first_seen) <= self.ttl {
                return false;
            }
        }

        self.seen.insert(message_id.to_string(), now);
        self.arrivals.push_back((now, message_id.to_string()));
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    // Duplicates never enqueue a second arrival and re-inserts happen only
    // after the stale arrival was popped, so each queued arrival owns its
    // map entry.
    fn purge_expired(&mut self, now: Instant) {
        while let Some((arrived, _)) = self.arrivals.front() {
            if now.duration_since(*arrived) <= self.ttl {
                break;
            }
            if let Some((_, id)) = self.arrivals.pop_front() {
                self.seen.remove(&id);
            }
        }
    }
}
