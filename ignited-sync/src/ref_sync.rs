//! Incremental build-reference synchronizer
//!
//! Keeps the lightweight build-reference index fresh for one server. Three
//! modes:
//!
//! - [`RefSyncMode::FullReindex`]: page the upstream listing newest-first to
//!   exhaustion, even through pages with no changes (periodic self-healing
//!   resync).
//! - [`RefSyncMode::Incremental`]: stop after the first page that saved
//!   nothing new *and* contains no build id from the must-observe set. This
//!   bounds polling cost while guaranteeing explicitly-awaited builds are
//!   found even deep in a backlog.
//! - [`RefSyncMode::Ultrafast`]: fetch exactly the given ids (post-trigger
//!   path) with no page scan at all.
//!
//! Queued/running builds land in the shared in-flight set; after each pass,
//! ids too far behind the newest observed id are handed to direct fat-build
//! reload — a newest-first page scan may never revisit them promptly.

use crate::client::{BuildLocator, TeamcityClient};
use crate::compact::build_ref_from_dto;
use crate::error::Result;
use crate::queue::FatBuildQueue;
use crate::scheduler::TaskScheduler;
use ignited_core::{BuildId, BuildRef, EntityStore, ServerConfig, ServerMask, StringCompactor};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Retry window for failing scheduled passes: 5s after the first failure,
/// capped at 5min.
const RETRY_FLOOR_MS: u64 = 5_000;
const RETRY_CEILING_MS: u64 = 300_000;

/// Reschedule delay after a run of consecutive failed passes.
///
/// Doubles per failure from the floor to the ceiling; a random share of up
/// to a quarter of the delay is added so retries spread out.
fn retry_delay(consecutive_failures: u32) -> Duration {
    let doublings = consecutive_failures.saturating_sub(1).min(8);
    let capped = RETRY_FLOOR_MS
        .saturating_mul(1u64 << doublings)
        .min(RETRY_CEILING_MS);
    let spread = rand::random::<u64>() % (capped / 4 + 1);
    Duration::from_millis(capped + spread)
}

/// What kind of reference pass to run.
#[derive(Clone, Debug)]
pub enum RefSyncMode {
    /// Page to exhaustion regardless of per-page change counts
    FullReindex,
    /// Stop at the first quiet page not containing a must-observe id
    Incremental { must_observe: HashSet<BuildId> },
    /// Fetch exactly these ids, no page scan
    Ultrafast { ids: Vec<BuildId> },
}

impl RefSyncMode {
    /// Incremental pass with an empty must-observe set.
    pub fn incremental() -> Self {
        RefSyncMode::Incremental {
            must_observe: HashSet::new(),
        }
    }
}

/// Summary of one reference pass.
#[derive(Clone, Debug, Default)]
pub struct SyncPass {
    /// Listing pages fetched
    pub pages: usize,
    /// References physically written (new or changed)
    pub saved: usize,
    /// References compared equal and skipped
    pub unchanged: usize,
    /// Highest build id observed during the pass
    pub max_observed: Option<BuildId>,
    /// In-flight ids handed to direct fat-build reload by the stale-queue
    /// heuristic
    pub handed_to_reload: Vec<BuildId>,
}

/// Per-server build-reference synchronizer.
pub struct BuildRefSync {
    mask: ServerMask,
    config: ServerConfig,
    client: Arc<dyn TeamcityClient>,
    compactor: Arc<StringCompactor>,
    refs: EntityStore<BuildRef>,
    queue: Arc<FatBuildQueue>,
    last_pass_at: Mutex<Option<SystemTime>>,
    /// Consecutive failed scheduled passes, for the retry delay
    failed_passes: Mutex<u32>,
}

impl std::fmt::Debug for BuildRefSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildRefSync")
            .field("server", &self.config.code)
            .field("mask", &self.mask)
            .finish()
    }
}

impl BuildRefSync {
    pub fn new(
        config: ServerConfig,
        client: Arc<dyn TeamcityClient>,
        compactor: Arc<StringCompactor>,
        refs: EntityStore<BuildRef>,
        queue: Arc<FatBuildQueue>,
    ) -> Self {
        Self {
            mask: ServerMask::of(&config.code),
            config,
            client,
            compactor,
            refs,
            queue,
            last_pass_at: Mutex::new(None),
            failed_passes: Mutex::new(0),
        }
    }

    /// Age of the last completed pass, for staleness reporting.
    pub fn last_pass_age(&self) -> Option<Duration> {
        let at = *self.last_pass_at.lock();
        at.and_then(|at| at.elapsed().ok())
    }

    /// Run one reference pass.
    pub async fn run(&self, mode: RefSyncMode, locator: &BuildLocator) -> Result<SyncPass> {
        let mut pass = SyncPass::default();

        match mode {
            RefSyncMode::Ultrafast { ids } => {
                for id in ids {
                    let dto = self.client.build(id).await?;
                    let build = build_ref_from_dto(&self.compactor, &dto).await?;
                    self.observe_max(&mut pass, build.id);
                    self.apply_ref(&mut pass, build).await?;
                }
            }
            RefSyncMode::FullReindex => {
                self.page_scan(&mut pass, locator, None).await?;
            }
            RefSyncMode::Incremental { must_observe } => {
                self.page_scan(&mut pass, locator, Some(must_observe)).await?;
            }
        }

        if let Some(frontier) = pass.max_observed {
            let stale = self
                .queue
                .drain_stale(frontier, self.config.stale_queue_gap);
            if !stale.is_empty() {
                tracing::warn!(
                    server = %self.config.code,
                    count = stale.len(),
                    frontier = frontier.0,
                    "Stale in-flight builds handed to direct reload"
                );
                self.queue.enqueue(stale.iter().copied());
                pass.handed_to_reload = stale;
            }
        }

        *self.last_pass_at.lock() = Some(SystemTime::now());
        tracing::info!(
            server = %self.config.code,
            pages = pass.pages,
            saved = pass.saved,
            unchanged = pass.unchanged,
            "Build reference pass done"
        );
        Ok(pass)
    }

    /// Newest-first page scan. `must_observe: None` means full reindex.
    async fn page_scan(
        &self,
        pass: &mut SyncPass,
        locator: &BuildLocator,
        mut must_observe: Option<HashSet<BuildId>>,
    ) -> Result<()> {
        let mut start = 0usize;
        loop {
            let page = self
                .client
                .builds_page(locator, start, self.config.page_size)
                .await?;
            pass.pages += 1;
            if page.builds.is_empty() {
                break;
            }

            let mut page_saved = 0usize;
            let mut page_had_awaited = false;
            let fetched = page.builds.len();
            for dto in &page.builds {
                let build = build_ref_from_dto(&self.compactor, dto).await?;
                self.observe_max(pass, build.id);
                if let Some(awaited) = &mut must_observe {
                    if awaited.remove(&build.id) {
                        page_had_awaited = true;
                    }
                }
                if self.apply_ref(pass, build).await? {
                    page_saved += 1;
                }
            }

            // Incremental stop: a quiet page with nothing we are waiting for
            if must_observe.is_some() && page_saved == 0 && !page_had_awaited {
                break;
            }
            if !page.has_more() {
                break;
            }
            start += fetched;
        }
        Ok(())
    }

    fn observe_max(&self, pass: &mut SyncPass, id: BuildId) {
        pass.max_observed = Some(pass.max_observed.map_or(id, |m| m.max(id)));
    }

    /// Save one reference (change-aware) and maintain the in-flight set.
    /// Returns whether a physical write happened.
    async fn apply_ref(&self, pass: &mut SyncPass, build: BuildRef) -> Result<bool> {
        let id = build.id;
        let in_flight = build.is_in_flight();
        let saved = self
            .refs
            .save_if_changed(self.mask, &build)
            .await?
            .was_saved();

        if in_flight {
            self.queue.track_in_flight(id);
        } else {
            self.queue.untrack_in_flight(id);
        }

        if saved {
            pass.saved += 1;
            // A new or changed finished build is worth a full projection
            if build.is_finished() {
                self.queue.enqueue([id]);
            }
        } else {
            pass.unchanged += 1;
        }
        Ok(saved)
    }

    /// Arm the recurring background passes: the next incremental pass at a
    /// short delay and a self-healing full reindex at a long one. Redundant
    /// arming coalesces by task name.
    pub fn schedule_background(self: &Arc<Self>, scheduler: &TaskScheduler) {
        self.schedule_incremental_after(scheduler, self.config.incremental_delay());
        self.schedule_full_reindex(scheduler);
    }

    /// Each incremental pass re-arms the next one: at the configured delay
    /// after a success, on a widening retry delay after a failure.
    fn schedule_incremental_after(self: &Arc<Self>, scheduler: &TaskScheduler, delay: Duration) {
        let name = format!("ref-sync-incremental-{}", self.config.code);
        let this = self.clone();
        let rearm = scheduler.clone();
        scheduler.submit_named_after(&name, delay, async move {
            let next_delay = match this.run(RefSyncMode::incremental(), &BuildLocator::any()).await
            {
                Ok(_) => {
                    *this.failed_passes.lock() = 0;
                    this.config.incremental_delay()
                }
                Err(e) => {
                    let failures = {
                        let mut failed = this.failed_passes.lock();
                        *failed = failed.saturating_add(1);
                        *failed
                    };
                    let delay = retry_delay(failures);
                    tracing::warn!(
                        server = %this.config.code,
                        error = %e,
                        failures,
                        retry_in = ?delay,
                        "Scheduled incremental pass failed"
                    );
                    delay
                }
            };
            this.schedule_incremental_after(&rearm, next_delay);
        });
    }

    fn schedule_full_reindex(self: &Arc<Self>, scheduler: &TaskScheduler) {
        let name = format!("ref-sync-full-{}", self.config.code);
        let this = self.clone();
        let rearm = scheduler.clone();
        scheduler.submit_named_after(&name, self.config.full_reindex_delay(), async move {
            if let Err(e) = this.run(RefSyncMode::FullReindex, &BuildLocator::any()).await {
                tracing::warn!(server = %this.config.code, error = %e, "Scheduled full reindex failed");
            }
            this.schedule_full_reindex(&rearm);
        });
    }
}
