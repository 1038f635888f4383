//! Proactive fat-build loader
//!
//! Pulls full build detail (tests, problems, statistics, changes) for every
//! id flagged in the [`FatBuildQueue`], fanned out across a small fixed
//! number of named lanes with random assignment. Reloading is idempotent:
//! the change-aware save makes a second reload with no upstream change a
//! no-op, and the [`FatBuildSink`] only ever sees physical saves.

use crate::client::TeamcityClient;
use crate::compact::{
    build_ref_from_dto, change_from_dto, problem_from_dto, revision_from_dto, statistic_from_dto,
    test_from_dto,
};
use crate::error::Result;
use crate::queue::FatBuildQueue;
use crate::scheduler::{Submitted, TaskScheduler};
use ignited_core::{
    statuses, BuildId, BuildRef, BuildState, ChangeCompacted, EntityStore, FatBuild, FatBuildSink,
    MuteCompacted, ServerConfig, ServerMask, StringCompactor, FAT_BUILD_SCHEMA_VERSION,
};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Per-server proactive fat-build sync.
pub struct ProactiveFatBuildSync {
    mask: ServerMask,
    config: ServerConfig,
    client: Arc<dyn TeamcityClient>,
    compactor: Arc<StringCompactor>,
    fat: EntityStore<FatBuild>,
    refs: EntityStore<BuildRef>,
    changes: EntityStore<ChangeCompacted>,
    mutes: EntityStore<MuteCompacted>,
    queue: Arc<FatBuildQueue>,
    sink: RwLock<Option<Arc<dyn FatBuildSink>>>,
}

impl std::fmt::Debug for ProactiveFatBuildSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProactiveFatBuildSync")
            .field("server", &self.config.code)
            .field("pending", &self.queue.pending_len())
            .finish()
    }
}

impl ProactiveFatBuildSync {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ServerConfig,
        client: Arc<dyn TeamcityClient>,
        compactor: Arc<StringCompactor>,
        fat: EntityStore<FatBuild>,
        refs: EntityStore<BuildRef>,
        changes: EntityStore<ChangeCompacted>,
        mutes: EntityStore<MuteCompacted>,
        queue: Arc<FatBuildQueue>,
    ) -> Self {
        Self {
            mask: ServerMask::of(&config.code),
            config,
            client,
            compactor,
            fat,
            refs,
            changes,
            mutes,
            queue,
            sink: RwLock::new(None),
        }
    }

    /// Register the consumer of actually-saved fat builds.
    pub fn set_sink(&self, sink: Arc<dyn FatBuildSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Shared pending queue (trigger calls and external callers enqueue
    /// through it).
    pub fn queue(&self) -> &Arc<FatBuildQueue> {
        &self.queue
    }

    /// Reload one build's full projection.
    ///
    /// Returns the saved value, or `None` when the freshly built value was
    /// structurally identical to the stored one. Transport/parse errors
    /// propagate; a not-found falls back to the cancellation/stub path.
    pub async fn reload_build(&self, id: BuildId) -> Result<Option<FatBuild>> {
        let existing = self.fat.get(self.mask, id.0).await?;

        let (candidate, changes) = match self.fetch_full(id).await {
            Ok(pair) => pair,
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    server = %self.config.code,
                    build = id.0,
                    "Build vanished upstream, applying cancellation fallback"
                );
                (self.vanished_fallback(id, existing).await?, Vec::new())
            }
            Err(e) => return Err(e),
        };

        if !changes.is_empty() {
            self.changes.put_all(self.mask, changes).await?;
        }
        self.record_mutes(&candidate).await?;

        if !self
            .fat
            .save_if_changed(self.mask, &candidate)
            .await?
            .was_saved()
        {
            return Ok(None);
        }

        // The embedded reference fields are authoritative here; keep the
        // standalone reference row from diverging.
        self.refs.save_if_changed(self.mask, &candidate.build).await?;
        if candidate.build.is_finished() {
            self.queue.untrack_in_flight(id);
        }

        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.on_fat_build_saved(self.mask, &candidate).await?;
        }
        Ok(Some(candidate))
    }

    /// Fetch and compact the complete build payload.
    async fn fetch_full(&self, id: BuildId) -> Result<(FatBuild, Vec<ChangeCompacted>)> {
        let dto = self.client.build(id).await?;
        let build = build_ref_from_dto(&self.compactor, &dto).await?;

        // Composite builds only carry roll-up occurrences; skip the
        // per-test pages for them.
        let mut tests = Vec::new();
        if !dto.is_composite() {
            let mut start = 0usize;
            loop {
                let page = self
                    .client
                    .test_occurrences_page(id, start, self.config.page_size)
                    .await?;
                let fetched = page.test_occurrences.len();
                for occurrence in &page.test_occurrences {
                    tests.push(test_from_dto(&self.compactor, occurrence).await?);
                }
                if !page.has_more() {
                    break;
                }
                start += fetched;
            }
        }

        let mut problems = Vec::new();
        for problem in &self.client.problem_occurrences(id).await? {
            problems.push(problem_from_dto(&self.compactor, problem).await?);
        }

        let mut statistics = Vec::new();
        for property in &self.client.build_statistics(id).await? {
            if let Some(statistic) = statistic_from_dto(&self.compactor, property).await? {
                statistics.push(statistic);
            }
        }

        let change_dtos = self.client.build_changes(id).await?;
        let change_ids: Vec<u32> = change_dtos.iter().map(|c| c.id).collect();
        let mut changes = Vec::with_capacity(change_dtos.len());
        for change in &change_dtos {
            changes.push(change_from_dto(&self.compactor, change).await?);
        }

        let mut revisions = Vec::new();
        if let Some(container) = &dto.revisions {
            for revision in &container.revisions {
                revisions.push(revision_from_dto(&self.compactor, revision).await?);
            }
        }

        let (project, name) = match &dto.build_type {
            Some(bt) => {
                let project = match &bt.project_id {
                    Some(project_id) => self.compactor.id(project_id).await?,
                    None => ignited_core::StringId::NONE,
                };
                let name = match &bt.name {
                    Some(name) => self.compactor.id(name).await?,
                    None => ignited_core::StringId::NONE,
                };
                (project, name)
            }
            None => (ignited_core::StringId::NONE, ignited_core::StringId::NONE),
        };

        let fat = FatBuild {
            schema_version: FAT_BUILD_SCHEMA_VERSION,
            build,
            queued_at: dto.queued_date.as_deref().and_then(crate::dto::parse_upstream_time),
            started_at: dto.start_date.as_deref().and_then(crate::dto::parse_upstream_time),
            finished_at: dto.finish_date.as_deref().and_then(crate::dto::parse_upstream_time),
            project,
            name,
            composite: dto.is_composite(),
            fake_stub: false,
            tests,
            problems,
            statistics,
            change_ids,
            revisions,
        };
        Ok((fat, changes))
    }

    /// Not-found fallback: synthesize from the stored version (cancelling a
    /// queued/running build, keeping its last known tests), or store a
    /// minimal fake stub so the id stops getting re-fetched forever.
    async fn vanished_fallback(
        &self,
        id: BuildId,
        existing: Option<FatBuild>,
    ) -> Result<FatBuild> {
        match existing {
            Some(mut previous) => {
                if previous.build.is_in_flight() {
                    previous.build.state = BuildState::Finished;
                    previous.build.status = self.compactor.id(statuses::CANCELLED).await?;
                }
                Ok(previous)
            }
            None => {
                let mut stub = FatBuild::fake_stub(id);
                // A reference row may exist even though the projection never
                // loaded; carry its fields over so it gets cancelled too.
                if let Some(mut reference) = self.refs.get(self.mask, id.0).await? {
                    if reference.is_in_flight() {
                        reference.state = BuildState::Finished;
                        reference.status = self.compactor.id(statuses::CANCELLED).await?;
                    }
                    stub.build = reference;
                }
                Ok(stub)
            }
        }
    }

    /// First-observation mute records for muted test occurrences.
    async fn record_mutes(&self, build: &FatBuild) -> Result<()> {
        for test in build.tests.iter().filter(|t| t.muted) {
            let key = test.name.0 as u32;
            if self.mutes.get(self.mask, key).await?.is_none() {
                let mute = MuteCompacted {
                    test_name: test.name,
                    scope: build.build.branch,
                    assignment_ts: now_millis(),
                };
                self.mutes.save_if_changed(self.mask, &mute).await?;
            }
        }
        Ok(())
    }

    /// Drain the pending queue and fan the work out across the named lanes.
    ///
    /// Builds are randomly assigned to lanes; a busy lane's share is pushed
    /// back to the queue for the next drain rather than piled onto the
    /// running task.
    pub fn drain_to_lanes(self: &Arc<Self>, scheduler: &TaskScheduler) -> usize {
        let pending = self.queue.drain();
        if pending.is_empty() {
            return 0;
        }

        let lanes = self.config.fat_build_lanes.max(1);
        let mut buckets: Vec<Vec<BuildId>> = vec![Vec::new(); lanes];
        {
            let mut rng = rand::thread_rng();
            for id in pending {
                buckets[rng.gen_range(0..lanes)].push(id);
            }
        }

        let mut spawned = 0;
        for (lane, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let name = format!("fat-build-lane-{}-{}", self.config.code, lane);
            let this = self.clone();
            let work = bucket.clone();
            match scheduler.submit_named(&name, async move { this.load_lane(work).await }) {
                Submitted::Spawned => spawned += 1,
                Submitted::Coalesced => {
                    self.queue.enqueue(bucket);
                }
            }
        }
        spawned
    }

    /// Sequentially reload one lane's share. Failures are logged and left
    /// for the next scheduled pass instead of retried in a tight loop.
    async fn load_lane(&self, builds: Vec<BuildId>) {
        for id in builds {
            match self.reload_build(id).await {
                Ok(Some(_)) => {
                    tracing::debug!(server = %self.config.code, build = id.0, "Fat build saved");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        server = %self.config.code,
                        build = id.0,
                        error = %e,
                        "Fat build reload failed, left for next pass"
                    );
                }
            }
        }
    }
}
