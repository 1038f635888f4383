//! Run-history entries
//!
//! One entry per `(test-or-suite, suite, branch)` key within a server
//! partition: a bounded most-recent-first outcome window plus unbounded
//! running totals. The totals cover a longer horizon than the retained
//! window — they only grow, and are always at least what the window alone
//! would show.

use crate::stat::{self, FlakyMotif, RunOutcome};
use ignited_core::{BuildId, CompactedEntity, Family, StringId};
use serde::{Deserialize, Serialize};

/// Current run-history schema version.
pub const RUN_HISTORY_SCHEMA_VERSION: u32 = 1;

/// One observed run inside the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMark {
    pub build_id: BuildId,
    /// Build start time, epoch millis; the window orders by this
    pub started_at: i64,
    pub outcome: RunOutcome,
}

/// Rolling history for one `(test-or-suite, suite, branch)` key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    #[serde(default)]
    pub schema_version: u32,
    /// Dictionary id of the composite key string; also the store key
    pub key: StringId,
    pub test_name: StringId,
    pub suite: StringId,
    pub branch: StringId,
    /// Bounded, most-recent-first (descending start time)
    pub window: Vec<RunMark>,
    pub runs: u64,
    pub failures: u64,
    pub critical_failures: u64,
}

impl RunHistoryEntry {
    pub fn new(key: StringId, test_name: StringId, suite: StringId, branch: StringId) -> Self {
        RunHistoryEntry {
            schema_version: RUN_HISTORY_SCHEMA_VERSION,
            key,
            test_name,
            suite,
            branch,
            window: Vec::new(),
            runs: 0,
            failures: 0,
            critical_failures: 0,
        }
    }

    /// Record one run.
    ///
    /// The mark lands at its chronological position (ordering is by build
    /// start time, not arrival order), the oldest mark is evicted once the
    /// window is full, and the totals are bumped. A build id already in the
    /// window is ignored entirely, so replays never double-count.
    pub fn observe(&mut self, mark: RunMark, capacity: usize) -> bool {
        if self.window.iter().any(|m| m.build_id == mark.build_id) {
            return false;
        }

        self.runs += 1;
        if mark.outcome.is_failure() {
            self.failures += 1;
        }
        if mark.outcome.is_critical() {
            self.critical_failures += 1;
        }

        let position = self
            .window
            .iter()
            .position(|m| (m.started_at, m.build_id) < (mark.started_at, mark.build_id))
            .unwrap_or(self.window.len());
        self.window.insert(position, mark);
        if self.window.len() > capacity {
            self.window.truncate(capacity);
        }
        true
    }

    /// The retained outcome sequence, most recent first.
    pub fn outcomes(&self) -> Vec<RunOutcome> {
        self.window.iter().map(|m| m.outcome).collect()
    }

    /// Share of failing runs over the long horizon. 0.0 with no evidence.
    pub fn fail_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.failures as f64 / self.runs as f64
        }
    }

    /// Share of critically failing runs. 1.0 with no evidence: an untested
    /// suite is "no evidence of health", not healthy.
    pub fn critical_fail_rate(&self) -> f64 {
        if self.runs == 0 {
            1.0
        } else {
            self.critical_failures as f64 / self.runs as f64
        }
    }

    pub fn is_flaky(&self) -> bool {
        stat::is_flaky(&self.outcomes())
    }

    pub fn motif(&self) -> Option<FlakyMotif> {
        stat::match_motif(&self.outcomes())
    }
}

impl CompactedEntity for RunHistoryEntry {
    const FAMILY: Family = Family::RunHistory;

    fn entity_id(&self) -> u32 {
        self.key.0 as u32
    }

    fn upgrade(mut self) -> Self {
        if self.schema_version < RUN_HISTORY_SCHEMA_VERSION {
            self.schema_version = RUN_HISTORY_SCHEMA_VERSION;
        }
        self
    }
}

/// Derived read view over one entry.
#[derive(Clone, Debug)]
pub struct RunHistoryView {
    pub entry: RunHistoryEntry,
    pub fail_rate: f64,
    pub critical_fail_rate: f64,
    pub flaky: bool,
    pub motif: Option<FlakyMotif>,
}

impl RunHistoryView {
    pub fn of(entry: RunHistoryEntry) -> Self {
        RunHistoryView {
            fail_rate: entry.fail_rate(),
            critical_fail_rate: entry.critical_fail_rate(),
            flaky: entry.is_flaky(),
            motif: entry.motif(),
            entry,
        }
    }
}
