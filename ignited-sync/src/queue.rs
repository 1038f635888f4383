//! Pending fat-build queue and in-flight tracking
//!
//! The per-server set of build ids flagged for fat-build reload, plus the
//! set of ids currently queued/running upstream. The pending set is the one
//! piece of shared mutable state with an explicit critical section
//! (read-drain-clear under one lock); everything else in the mirror leans
//! on the store's per-key atomicity.

use ignited_core::BuildId;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Per-server fat-build work queue.
#[derive(Debug, Default)]
pub struct FatBuildQueue {
    /// Ids flagged for reload (trigger calls, backlog detection, explicit
    /// caller requests)
    pending: Mutex<HashSet<BuildId>>,
    /// Ids observed queued/running upstream
    in_flight: Mutex<HashSet<BuildId>>,
}

impl FatBuildQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag ids for reload; returns how many were not already pending.
    pub fn enqueue(&self, ids: impl IntoIterator<Item = BuildId>) -> usize {
        let mut pending = self.pending.lock();
        ids.into_iter().filter(|id| pending.insert(*id)).count()
    }

    /// Take the whole pending set. Read-drain-clear is atomic: an id
    /// enqueued during a drain lands in the next drain, never in both.
    pub fn drain(&self) -> Vec<BuildId> {
        let mut pending = self.pending.lock();
        pending.drain().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Mark a build as queued/running upstream.
    pub fn track_in_flight(&self, id: BuildId) {
        self.in_flight.lock().insert(id);
    }

    /// A build finished (or vanished); stop tracking it.
    pub fn untrack_in_flight(&self, id: BuildId) {
        self.in_flight.lock().remove(&id);
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn in_flight_snapshot(&self) -> Vec<BuildId> {
        self.in_flight.lock().iter().copied().collect()
    }

    /// Stale-queue heuristic: remove and return in-flight ids further than
    /// `gap` behind the newest observed id. Newest-first page scans may
    /// never promptly revisit a build that far behind the frontier, so
    /// these get handed to direct fat-build reload instead.
    pub fn drain_stale(&self, frontier: BuildId, gap: u32) -> Vec<BuildId> {
        let mut in_flight = self.in_flight.lock();
        let stale: Vec<BuildId> = in_flight
            .iter()
            .filter(|id| frontier.0.saturating_sub(id.0) > gap)
            .copied()
            .collect();
        for id in &stale {
            in_flight.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dedupes_and_drain_clears() {
        let queue = FatBuildQueue::new();
        assert_eq!(queue.enqueue([BuildId(1), BuildId(2), BuildId(2)]), 2);
        assert_eq!(queue.enqueue([BuildId(2)]), 0);
        assert_eq!(queue.pending_len(), 2);

        let mut drained = queue.drain();
        drained.sort();
        assert_eq!(drained, vec![BuildId(1), BuildId(2)]);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn stale_in_flight_ids_are_handed_off() {
        let queue = FatBuildQueue::new();
        queue.track_in_flight(BuildId(100));
        queue.track_in_flight(BuildId(4_900));
        queue.track_in_flight(BuildId(4_999));

        let mut stale = queue.drain_stale(BuildId(5_000), 2_000);
        stale.sort();
        assert_eq!(stale, vec![BuildId(100)]);
        // Handed-off ids leave the in-flight set; fresh ones stay
        assert_eq!(queue.in_flight_len(), 2);
    }

    #[test]
    fn untrack_removes() {
        let queue = FatBuildQueue::new();
        queue.track_in_flight(BuildId(7));
        assert_eq!(queue.in_flight_len(), 1);
        queue.untrack_in_flight(BuildId(7));
        assert_eq!(queue.in_flight_len(), 0);
    }
}
