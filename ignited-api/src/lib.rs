//! Facade over the teamcity-ignited mirror
//!
//! [`IgnitedBuilder`] wires one shared key-value store, the string
//! dictionary and the per-server sync machinery into an [`Ignited`]
//! instance; [`IgnitedServer`] is the per-server API the external
//! collaborators (REST layer, issue detector, trigger service) consume.
//!
//! Reads always serve best-available cached data; refreshes happen in the
//! background (or synchronously where a [`FatBuildSyncMode`] asks for it),
//! and staleness is visible through [`IgnitedServer::sync_status`] rather
//! than hidden.
//!
//! # Example
//!
//! ```ignore
//! use ignited_api::{IgnitedBuilder, FatBuildSyncMode};
//! use ignited_core::ServerConfig;
//!
//! let ignited = IgnitedBuilder::memory()
//!     .add_http_server(ServerConfig::new("apache", "https://ci.example.org"))?
//!     .build()
//!     .await?;
//!
//! let server = ignited.server("apache")?;
//! server.actualize_recent_build_refs().await?;
//! let builds = server.all_builds("Apache_Pr", "pr/42").await?;
//! ```

pub mod error;

pub use error::{ApiError, Result};

use ignited_core::{
    BuildId, BuildRef, BuildTypeCompacted, ChangeCompacted, EntityStore, FatBuild, KvStore,
    LogCheckCompacted, MemoryKvStore, MuteCompacted, SaveOutcome, ServerConfig, ServerMask,
    StringCompactor, StringId,
};
use ignited_history::{RunHistoryCollector, RunHistoryView};
use ignited_sync::{
    BuildLocator, BuildRefSync, FatBuildQueue, HttpTeamcityClient, ProactiveFatBuildSync,
    RefSyncMode, SyncPass, TaskScheduler, TeamcityClient, TriggerBuildRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a fat-build read treats stale or missing cache entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatBuildSyncMode {
    /// Best-effort cached data only
    None,
    /// Fetch synchronously when nothing is cached
    LoadNew,
    /// Fetch synchronously when nothing is cached or the cached build is
    /// still queued/running
    ReloadQueued,
    /// Always fetch synchronously
    Full,
}

/// Result of a trigger call.
#[derive(Clone, Debug)]
pub struct TriggeredBuild {
    /// Reference of the just-queued build
    pub build: BuildRef,
    /// Snapshot-dependency ids reported by upstream
    pub dependency_ids: Vec<BuildId>,
}

/// Freshness metadata for read callers deciding whether to warn.
#[derive(Clone, Debug)]
pub struct SyncStatus {
    /// Builds currently tracked queued/running upstream
    pub in_flight: usize,
    /// Build ids flagged for fat reload but not yet loaded
    pub pending_fat_loads: usize,
    /// Age of the last completed reference pass; `None` before the first
    pub last_ref_pass_age: Option<Duration>,
}

/// Builder for an [`Ignited`] instance.
pub struct IgnitedBuilder {
    kv: Arc<dyn KvStore>,
    servers: Vec<(ServerConfig, Arc<dyn TeamcityClient>)>,
}

impl IgnitedBuilder {
    /// Start from an in-memory store.
    pub fn memory() -> Self {
        Self::with_store(Arc::new(MemoryKvStore::new()))
    }

    /// Start from an existing store backend.
    pub fn with_store(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            servers: Vec::new(),
        }
    }

    /// Register a server with an explicit client (tests, custom transports).
    pub fn add_server(mut self, config: ServerConfig, client: Arc<dyn TeamcityClient>) -> Self {
        self.servers.push((config, client));
        self
    }

    /// Register a server reached over HTTP.
    pub fn add_http_server(self, config: ServerConfig) -> Result<Self> {
        let client = Arc::new(HttpTeamcityClient::new(&config)?);
        Ok(self.add_server(config, client))
    }

    /// Load the dictionary, validate the server set and wire everything up.
    pub async fn build(self) -> Result<Ignited> {
        let compactor = Arc::new(StringCompactor::load(self.kv.clone()).await?);
        let scheduler = TaskScheduler::new();

        // Masks must be collision-free within the configured server set
        // (the dictionary's reserved partition included).
        let mut masks: HashMap<u32, String> = HashMap::new();
        masks.insert(ServerMask::of("_dict").0, "_dict".to_string());

        let mut servers = HashMap::new();
        for (config, client) in self.servers {
            let mask = ServerMask::of(&config.code);
            if let Some(other) = masks.insert(mask.0, config.code.clone()) {
                return Err(ApiError::config(format!(
                    "Server mask collision between '{}' and '{}'",
                    other, config.code
                )));
            }
            let code = config.code.clone();
            let server = Arc::new(IgnitedServer::wire(
                config,
                client,
                self.kv.clone(),
                compactor.clone(),
                scheduler.clone(),
            ));
            servers.insert(code, server);
        }

        Ok(Ignited {
            compactor,
            scheduler,
            servers,
        })
    }
}

/// The mirror: one instance per process, multiplexing servers over one
/// store. Explicitly constructed and dependency-injected; no process-wide
/// statics.
pub struct Ignited {
    compactor: Arc<StringCompactor>,
    scheduler: TaskScheduler,
    servers: HashMap<String, Arc<IgnitedServer>>,
}

impl std::fmt::Debug for Ignited {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ignited")
            .field("servers", &self.servers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Ignited {
    /// Per-server handle by logical code.
    pub fn server(&self, code: &str) -> Result<&Arc<IgnitedServer>> {
        self.servers
            .get(code)
            .ok_or_else(|| ApiError::config(format!("Unknown server '{code}'")))
    }

    /// All configured server handles.
    pub fn servers(&self) -> impl Iterator<Item = &Arc<IgnitedServer>> {
        self.servers.values()
    }

    /// The shared string dictionary.
    pub fn compactor(&self) -> &Arc<StringCompactor> {
        &self.compactor
    }

    /// Arm the recurring background passes for every server.
    pub fn start_background(&self) {
        for server in self.servers.values() {
            server.start_background();
        }
    }

    /// The shared background task scheduler.
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }
}

/// Per-server facade.
pub struct IgnitedServer {
    config: ServerConfig,
    mask: ServerMask,
    client: Arc<dyn TeamcityClient>,
    compactor: Arc<StringCompactor>,
    scheduler: TaskScheduler,
    refs: EntityStore<BuildRef>,
    fat: EntityStore<FatBuild>,
    build_types: EntityStore<BuildTypeCompacted>,
    changes: EntityStore<ChangeCompacted>,
    mutes: EntityStore<MuteCompacted>,
    log_checks: EntityStore<LogCheckCompacted>,
    queue: Arc<FatBuildQueue>,
    ref_sync: Arc<BuildRefSync>,
    fat_sync: Arc<ProactiveFatBuildSync>,
    history: Arc<RunHistoryCollector>,
}

impl std::fmt::Debug for IgnitedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnitedServer")
            .field("code", &self.config.code)
            .field("mask", &self.mask)
            .finish()
    }
}

impl IgnitedServer {
    fn wire(
        config: ServerConfig,
        client: Arc<dyn TeamcityClient>,
        kv: Arc<dyn KvStore>,
        compactor: Arc<StringCompactor>,
        scheduler: TaskScheduler,
    ) -> Self {
        let mask = ServerMask::of(&config.code);
        let refs: EntityStore<BuildRef> = EntityStore::new(kv.clone());
        let fat: EntityStore<FatBuild> = EntityStore::new(kv.clone());
        let build_types: EntityStore<BuildTypeCompacted> = EntityStore::new(kv.clone());
        let changes: EntityStore<ChangeCompacted> = EntityStore::new(kv.clone());
        let mutes: EntityStore<MuteCompacted> = EntityStore::new(kv.clone());
        let log_checks: EntityStore<LogCheckCompacted> = EntityStore::new(kv.clone());
        let queue = Arc::new(FatBuildQueue::new());

        let ref_sync = Arc::new(BuildRefSync::new(
            config.clone(),
            client.clone(),
            compactor.clone(),
            refs.clone(),
            queue.clone(),
        ));
        let fat_sync = Arc::new(ProactiveFatBuildSync::new(
            config.clone(),
            client.clone(),
            compactor.clone(),
            fat.clone(),
            refs.clone(),
            changes.clone(),
            mutes.clone(),
            queue.clone(),
        ));
        let history = Arc::new(RunHistoryCollector::new(
            kv,
            compactor.clone(),
            config.history_window,
        ));
        fat_sync.set_sink(history.clone());

        Self {
            config,
            mask,
            client,
            compactor,
            scheduler,
            refs,
            fat,
            build_types,
            changes,
            mutes,
            log_checks,
            queue,
            ref_sync,
            fat_sync,
            history,
        }
    }

    pub fn code(&self) -> &str {
        &self.config.code
    }

    pub fn mask(&self) -> ServerMask {
        self.mask
    }

    // ------------------------------------------------------------------
    // Compacted reads
    // ------------------------------------------------------------------

    /// Every cached build reference of one build type and branch.
    pub async fn all_builds(&self, build_type: &str, branch: &str) -> Result<Vec<BuildRef>> {
        let (Some(bt), Some(br)) = (
            self.compactor.lookup(build_type).await,
            self.compactor.lookup(branch).await,
        ) else {
            return Ok(Vec::new());
        };
        Ok(self
            .refs
            .scan(self.mask)
            .await?
            .into_iter()
            .filter(|b| b.build_type == bt && b.branch == br)
            .collect())
    }

    /// Finished builds of one build type and branch, optionally bounded by
    /// finish time (epoch millis). Bounds apply where the fat projection
    /// knows the timestamp; references without one pass the filter.
    pub async fn finished_builds(
        &self,
        build_type: &str,
        branch: &str,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<BuildRef>> {
        let finished: Vec<BuildRef> = self
            .all_builds(build_type, branch)
            .await?
            .into_iter()
            .filter(BuildRef::is_finished)
            .collect();
        if since.is_none() && until.is_none() {
            return Ok(finished);
        }

        let ids: Vec<u32> = finished.iter().map(|b| b.id.0).collect();
        let fat = self.fat.get_many(self.mask, &ids).await?;
        Ok(finished
            .into_iter()
            .filter(|b| {
                let Some(at) = fat
                    .get(&b.id.0)
                    .and_then(|f| f.finished_at.or(f.started_at))
                else {
                    return true;
                };
                since.is_none_or(|s| at >= s) && until.is_none_or(|u| at <= u)
            })
            .collect())
    }

    /// Builds currently queued or running, optionally scoped to a branch.
    pub async fn queued_and_running_builds(&self, branch: Option<&str>) -> Result<Vec<BuildRef>> {
        let branch_id = match branch {
            Some(branch) => match self.compactor.lookup(branch).await {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        Ok(self
            .refs
            .scan(self.mask)
            .await?
            .into_iter()
            .filter(|b| b.is_in_flight() && branch_id.is_none_or(|id| b.branch == id))
            .collect())
    }

    /// Full build projection.
    pub async fn fat_build(
        &self,
        id: BuildId,
        mode: FatBuildSyncMode,
    ) -> Result<Option<FatBuild>> {
        let cached = self.fat.get(self.mask, id.0).await?;
        let reload = match mode {
            FatBuildSyncMode::None => false,
            FatBuildSyncMode::LoadNew => cached.is_none(),
            FatBuildSyncMode::ReloadQueued => {
                cached.as_ref().is_none_or(|f| f.build.is_in_flight())
            }
            FatBuildSyncMode::Full => true,
        };
        if !reload {
            return Ok(cached);
        }
        match self.fat_sync.reload_build(id).await? {
            Some(saved) => Ok(Some(saved)),
            None => Ok(cached),
        }
    }

    /// VCS changes referenced by a fat build.
    pub async fn changes_for(&self, build: &FatBuild) -> Result<Vec<ChangeCompacted>> {
        let rows = self.changes.get_many(self.mask, &build.change_ids).await?;
        Ok(build
            .change_ids
            .iter()
            .filter_map(|id| rows.get(id).cloned())
            .collect())
    }

    // ------------------------------------------------------------------
    // Triggering and actualization
    // ------------------------------------------------------------------

    /// Queue a new build upstream and mirror it immediately.
    ///
    /// The just-triggered build and its snapshot dependencies are fetched
    /// ultrafast (no page scan) and flagged for fat reload; with
    /// `actualize_refs_now` an incremental pass with the new ids in the
    /// must-observe set follows synchronously.
    pub async fn trigger_build(
        &self,
        request: TriggerBuildRequest,
        actualize_refs_now: bool,
    ) -> Result<TriggeredBuild> {
        let dto = self.client.trigger_build(&request).await?;
        let new_id = BuildId(dto.id);
        let dependency_ids: Vec<BuildId> =
            dto.dependency_ids().into_iter().map(BuildId).collect();
        tracing::info!(
            server = %self.config.code,
            build = new_id.0,
            dependencies = dependency_ids.len(),
            "Triggered build"
        );

        let mut ids = vec![new_id];
        ids.extend(dependency_ids.iter().copied());
        self.ref_sync
            .run(
                RefSyncMode::Ultrafast { ids: ids.clone() },
                &BuildLocator::any(),
            )
            .await?;
        self.queue.enqueue(ids.iter().copied());
        self.fat_sync.drain_to_lanes(&self.scheduler);

        if actualize_refs_now {
            self.ref_sync
                .run(
                    RefSyncMode::Incremental {
                        must_observe: ids.iter().copied().collect(),
                    },
                    &BuildLocator::any(),
                )
                .await?;
        }

        let build = self.refs.get(self.mask, new_id.0).await?.ok_or_else(|| {
            ignited_core::Error::not_found(format!("triggered build {new_id}"))
        })?;
        Ok(TriggeredBuild {
            build,
            dependency_ids,
        })
    }

    /// Run one incremental reference pass now and kick the fat-build lanes.
    pub async fn actualize_recent_build_refs(&self) -> Result<SyncPass> {
        let pass = self
            .ref_sync
            .run(RefSyncMode::incremental(), &BuildLocator::any())
            .await?;
        self.fat_sync.drain_to_lanes(&self.scheduler);
        Ok(pass)
    }

    /// Drain the pending fat-build queue synchronously (callers that need
    /// the projections loaded before returning). Returns how many builds
    /// were physically saved.
    pub async fn load_pending_fat_builds(&self) -> Result<usize> {
        let pending = self.queue.drain();
        let mut loaded = 0;
        for id in pending {
            if self.fat_sync.reload_build(id).await?.is_some() {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Arm the recurring incremental/full background passes.
    pub fn start_background(&self) {
        self.ref_sync.schedule_background(&self.scheduler);
    }

    // ------------------------------------------------------------------
    // Run history
    // ------------------------------------------------------------------

    /// Rolling history of a whole suite (build type) on one branch.
    pub async fn suite_run_history(
        &self,
        suite: &str,
        branch: &str,
    ) -> Result<Option<RunHistoryView>> {
        let (Some(suite), Some(branch)) = (
            self.compactor.lookup(suite).await,
            self.compactor.lookup(branch).await,
        ) else {
            return Ok(None);
        };
        Ok(self
            .history
            .suite_history(self.mask, suite, branch)
            .await?
            .map(RunHistoryView::of))
    }

    /// Rolling history of one test in a suite on one branch.
    pub async fn test_run_history(
        &self,
        test_name: &str,
        suite: &str,
        branch: &str,
    ) -> Result<Option<RunHistoryView>> {
        let (Some(test_name), Some(suite), Some(branch)) = (
            self.compactor.lookup(test_name).await,
            self.compactor.lookup(suite).await,
            self.compactor.lookup(branch).await,
        ) else {
            return Ok(None);
        };
        Ok(self
            .history
            .test_history(self.mask, test_name, suite, branch)
            .await?
            .map(RunHistoryView::of))
    }

    // ------------------------------------------------------------------
    // Catalog families
    // ------------------------------------------------------------------

    /// Mirrored build-type listing, refreshed from upstream when it
    /// answers. A refresh failure degrades to cached data and only
    /// surfaces when nothing is cached at all.
    pub async fn build_types(&self) -> Result<Vec<BuildTypeCompacted>> {
        match self.client.build_types().await {
            Ok(dtos) => {
                let mut compacted = Vec::with_capacity(dtos.len());
                for dto in &dtos {
                    let project = match &dto.project_id {
                        Some(project_id) => self.compactor.id(project_id).await?,
                        None => StringId::NONE,
                    };
                    let name = match &dto.name {
                        Some(name) => self.compactor.id(name).await?,
                        None => StringId::NONE,
                    };
                    compacted.push(BuildTypeCompacted {
                        id: self.compactor.id(&dto.id).await?,
                        project,
                        name,
                        paused: dto.paused,
                    });
                }
                self.build_types.put_all(self.mask, compacted).await?;
            }
            Err(e) => {
                let cached = self.build_types.scan(self.mask).await?;
                if cached.is_empty() {
                    return Err(e.into());
                }
                tracing::warn!(
                    server = %self.config.code,
                    error = %e,
                    "Build type refresh failed, serving cached listing"
                );
                return Ok(cached);
            }
        }
        Ok(self.build_types.scan(self.mask).await?)
    }

    /// Mirrored mute records.
    pub async fn mutes(&self) -> Result<Vec<MuteCompacted>> {
        Ok(self.mutes.scan(self.mask).await?)
    }

    /// Log-check result for one build, if the analyzer ran.
    pub async fn log_check(&self, build_id: BuildId) -> Result<Option<LogCheckCompacted>> {
        Ok(self.log_checks.get(self.mask, build_id.0).await?)
    }

    /// Record a log-check result (change-aware).
    pub async fn save_log_check(&self, entry: &LogCheckCompacted) -> Result<SaveOutcome> {
        Ok(self.log_checks.save_if_changed(self.mask, entry).await?)
    }

    // ------------------------------------------------------------------
    // Staleness metadata
    // ------------------------------------------------------------------

    /// Freshness metadata: reads never hard-fail while cached data exists,
    /// so callers use this to decide whether to warn.
    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus {
            in_flight: self.queue.in_flight_len(),
            pending_fat_loads: self.queue.pending_len(),
            last_ref_pass_age: self.ref_sync.last_pass_age(),
        }
    }
}
