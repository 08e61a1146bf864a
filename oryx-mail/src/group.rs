//! Adaptive STATUS batching hint. Grounded on `original_source/imap/
//! mailboxgroup.cpp`: once a client has asked STATUS for several
//! siblings of the same parent in a short window, treat the group as
//! "hot" and suggest batching the next STATUS calls. Never affects
//! correctness — only whether callers choose to prefetch in bulk.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const HOT_THRESHOLD: usize = 3;
const OBSERVATION_WINDOW: Duration = Duration::from_secs(10);
const RING_CAPACITY: usize = 64;

pub type ChildName = String;

struct Observation {
    parent: String,
    child: ChildName,
    at: Instant,
}

/// Tracks recent (parent, child) STATUS observations and, once a parent
/// has had `HOT_THRESHOLD` or more distinct children observed within
/// [`OBSERVATION_WINDOW`], returns the full set of observed siblings so
/// the caller can batch-fetch their counters in one round-trip.
#[derive(Default)]
pub struct MailboxGroup {
    ring: VecDeque<Observation>,
}

impl MailboxGroup {
    pub fn new() -> Self {
        Self {
            ring: VecDeque::new(),
        }
    }

    pub fn observe(&mut self, parent: &str, child: &str) {
        let now = Instant::now();
        self.ring.push_back(Observation {
            parent: parent.to_string(),
            child: child.to_string(),
            at: now,
        });
        while self.ring.len() > RING_CAPACITY {
            self.ring.pop_front();
        }
        self.evict_stale(now);
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(front) = self.ring.front() {
            if now.duration_since(front.at) > OBSERVATION_WINDOW {
                self.ring.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns the distinct children observed for `parent` within the
    /// window, if there are at least [`HOT_THRESHOLD`] of them.
    pub fn should_batch(&self, parent: &str) -> Option<Vec<ChildName>> {
        let mut children: Vec<ChildName> = Vec::new();
        for obs in &self.ring {
            if obs.parent == parent && !children.contains(&obs.child) {
                children.push(obs.child.clone());
            }
        }
        if children.len() >= HOT_THRESHOLD {
            Some(children)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_after_three_distinct_siblings() {
        let mut g = MailboxGroup::new();
        assert!(g.should_batch("INBOX").is_none());
        g.observe("INBOX", "a");
        g.observe("INBOX", "b");
        assert!(g.should_batch("INBOX").is_none());
        g.observe("INBOX", "c");
        let batch = g.should_batch("INBOX").unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn never_batches_unrelated_parent() {
        let mut g = MailboxGroup::new();
        g.observe("INBOX", "a");
        g.observe("INBOX", "b");
        g.observe("INBOX", "c");
        assert!(g.should_batch("Archive").is_none());
    }
}
