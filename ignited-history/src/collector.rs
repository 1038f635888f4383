//! Run-history collector
//!
//! Consumes actually-saved fat builds and maintains the rolling per-test
//! and per-suite windows. The whole index is derived state: replaying the
//! sequence of fat-build saves in save order reproduces it exactly, and
//! late-arriving older builds slot into their chronological position.
//!
//! Suite identity is the build's compacted build-type id; the suite's own
//! entry uses that id in both key positions.

use crate::entry::{RunHistoryEntry, RunMark};
use crate::stat::RunOutcome;
use async_trait::async_trait;
use ignited_core::{
    statuses, BuildId, EntityStore, FatBuild, FatBuildSink, KvStore, Result, ServerMask,
    StringCompactor, StringId,
};
use std::fmt::Debug;
use std::sync::Arc;

/// Maintains run history for every server sharing one store.
pub struct RunHistoryCollector {
    compactor: Arc<StringCompactor>,
    entries: EntityStore<RunHistoryEntry>,
    window_capacity: usize,
}

impl Debug for RunHistoryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHistoryCollector")
            .field("window_capacity", &self.window_capacity)
            .finish()
    }
}

impl RunHistoryCollector {
    pub fn new(kv: Arc<dyn KvStore>, compactor: Arc<StringCompactor>, window_capacity: usize) -> Self {
        Self {
            compactor,
            entries: EntityStore::new(kv),
            window_capacity,
        }
    }

    /// Composite key string for one history entry. Compacting it through
    /// the dictionary gives a collision-free store key by construction.
    fn key_string(test_name: StringId, suite: StringId, branch: StringId) -> String {
        format!("{}|{}|{}", test_name.0, suite.0, branch.0)
    }

    /// Fold one finished fat build into the history.
    pub async fn ingest(&self, mask: ServerMask, fat: &FatBuild) -> Result<()> {
        if fat.fake_stub || !fat.build.is_finished() {
            return Ok(());
        }
        // Cancelled builds say nothing about test health
        if let Some(cancelled) = self.compactor.lookup(statuses::CANCELLED).await {
            if fat.build.status == cancelled {
                return Ok(());
            }
        }

        let success = self.compactor.id(statuses::SUCCESS).await?;
        let critical = fat.has_critical_problems();
        let started_at = fat
            .started_at
            .or(fat.queued_at)
            .or(fat.finished_at)
            .unwrap_or(0);
        let suite = fat.build.build_type;
        let branch = fat.build.branch;

        let mut any_test_failed = false;
        for test in fat.tests.iter().filter(|t| !t.ignored && !t.muted) {
            let failed = test.status != success;
            any_test_failed |= failed;
            let outcome = match (failed, critical) {
                (true, true) => RunOutcome::CriticalFailure,
                (true, false) => RunOutcome::Failure,
                (false, _) => RunOutcome::Success,
            };
            self.record(mask, test.name, suite, branch, fat.id(), started_at, outcome)
                .await?;
        }

        let build_failed = fat.build.status != success;
        let suite_outcome = if critical {
            RunOutcome::CriticalFailure
        } else if any_test_failed || build_failed {
            RunOutcome::Failure
        } else {
            RunOutcome::Success
        };
        self.record(mask, suite, suite, branch, fat.id(), started_at, suite_outcome)
            .await?;

        tracing::debug!(
            build = fat.id().0,
            tests = fat.tests.len(),
            critical,
            "Ingested fat build into run history"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        mask: ServerMask,
        test_name: StringId,
        suite: StringId,
        branch: StringId,
        build_id: BuildId,
        started_at: i64,
        outcome: RunOutcome,
    ) -> Result<()> {
        let key = self
            .compactor
            .id(&Self::key_string(test_name, suite, branch))
            .await?;
        let mut entry = self
            .entries
            .get(mask, key.0 as u32)
            .await?
            .unwrap_or_else(|| RunHistoryEntry::new(key, test_name, suite, branch));

        let inserted = entry.observe(
            RunMark {
                build_id,
                started_at,
                outcome,
            },
            self.window_capacity,
        );
        if inserted {
            self.entries.save_if_changed(mask, &entry).await?;
        }
        Ok(())
    }

    /// History for one test in one suite/branch. Read-only: never allocates
    /// dictionary entries for keys that were never recorded.
    pub async fn test_history(
        &self,
        mask: ServerMask,
        test_name: StringId,
        suite: StringId,
        branch: StringId,
    ) -> Result<Option<RunHistoryEntry>> {
        let Some(key) = self
            .compactor
            .lookup(&Self::key_string(test_name, suite, branch))
            .await
        else {
            return Ok(None);
        };
        self.entries.get(mask, key.0 as u32).await
    }

    /// History for a whole suite on one branch.
    pub async fn suite_history(
        &self,
        mask: ServerMask,
        suite: StringId,
        branch: StringId,
    ) -> Result<Option<RunHistoryEntry>> {
        self.test_history(mask, suite, suite, branch).await
    }
}

#[async_trait]
impl FatBuildSink for RunHistoryCollector {
    async fn on_fat_build_saved(&self, mask: ServerMask, build: &FatBuild) -> Result<()> {
        self.ingest(mask, build).await
    }
}
