//! Short-lived "just arrived" markers for entry animations.
//!
//! Markers are advisory view state only. The reconciler never reads them, and
//! a marker outliving its entity is harmless. Re-marking a live id resets its
//! expiry, so a burst of arrivals for the same id animates once, from the
//! latest arrival.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_MARKER_TTL_MS: u64 = 500;

#[derive(Clone, Debug)]
pub struct ArrivalMarkers {
    ttl: Duration,
    expiries: HashMap<String, Instant>,
}

impl Default for ArrivalMarkers {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_MARKER_TTL_MS))
    }
}

impl ArrivalMarkers {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, expiries: HashMap::new() }
    }

    pub fn mark(&mut self, id: impl Into<String>) {
        self.mark_at(id, Instant::now());
    }

    pub fn mark_at(&mut self, id: impl Into<String>, now: Instant) {
        self.expiries.insert(id.into(), now + self.ttl);
    }

    #[must_use]
    pub fn is_marked(&self, id: &str) -> bool {
        self.is_marked_at(id, Instant::now())
    }

    #[must_use]
    pub fn is_marked_at(&self, id: &str, now: Instant) -> bool {
        self.expiries.get(id).is_some_and(|due| now < *due)
    }

    /// Drop expired markers and return their ids, sorted.
    pub fn prune_at(&mut self, now: Instant) -> Vec<String> {
        let mut expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, due)| now >= **due)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.expiries.remove(id);
        }
        expired.sort();
        expired
    }

    /// Earliest pending expiry, for scheduling the next prune.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.expiries.values().min().copied()
    }

    pub fn clear(&mut self) {
        self.expiries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }
}

#[cfg(test)]
#[path = "markers_test.rs"]
mod tests;
