//! In-memory upstream server double for testing
//!
//! Holds a mutable picture of "what upstream would say" and serves the
//! whole [`TeamcityClient`] surface from it: newest-first paginated build
//! listings, detail fetches (with simulated not-found for purged ids),
//! test/problem/statistic/change lookups and build triggering.

use crate::client::{BuildLocator, TeamcityClient, TriggerBuildRequest};
use crate::dto::{
    BuildDto, BuildListDto, BuildTypeDto, ChangeDto, ProblemOccurrenceDto, StatisticPropertyDto,
    TestOccurrenceDto, TestOccurrencesDto,
};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use ignited_core::BuildId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One build as the mock upstream knows it.
#[derive(Clone, Debug, Default)]
pub struct MockBuild {
    pub dto: BuildDto,
    pub tests: Vec<TestOccurrenceDto>,
    pub problems: Vec<ProblemOccurrenceDto>,
    pub statistics: Vec<StatisticPropertyDto>,
    pub changes: Vec<ChangeDto>,
}

impl MockBuild {
    /// Finished build with the given status and no detail payloads.
    pub fn finished(id: u32, build_type: &str, branch: &str, status: &str) -> Self {
        MockBuild {
            dto: BuildDto {
                id,
                build_type_id: build_type.to_string(),
                branch_name: Some(branch.to_string()),
                status: Some(status.to_string()),
                state: "finished".to_string(),
                start_date: Some(format!("20250101T{:02}0000+0000", (id % 24))),
                ..BuildDto::default()
            },
            ..MockBuild::default()
        }
    }

    /// Queued or running build (no status yet).
    pub fn in_state(id: u32, build_type: &str, branch: &str, state: &str) -> Self {
        MockBuild {
            dto: BuildDto {
                id,
                build_type_id: build_type.to_string(),
                branch_name: Some(branch.to_string()),
                status: None,
                state: state.to_string(),
                ..BuildDto::default()
            },
            ..MockBuild::default()
        }
    }

    pub fn with_tests(mut self, tests: Vec<TestOccurrenceDto>) -> Self {
        self.tests = tests;
        self
    }

    pub fn with_problems(mut self, problems: Vec<ProblemOccurrenceDto>) -> Self {
        self.problems = problems;
        self
    }

    pub fn with_start_date(mut self, date: &str) -> Self {
        self.dto.start_date = Some(date.to_string());
        self
    }
}

/// Convenience test occurrence.
pub fn test_occurrence(name: &str, status: &str) -> TestOccurrenceDto {
    TestOccurrenceDto {
        name: name.to_string(),
        status: Some(status.to_string()),
        duration: Some(10),
        ignored: false,
        muted: false,
    }
}

#[derive(Debug, Default)]
struct MockState {
    builds: BTreeMap<u32, MockBuild>,
    gone: HashSet<u32>,
    trigger_dependencies: Vec<u32>,
}

/// Mock upstream server implementing [`TeamcityClient`].
#[derive(Debug, Default)]
pub struct MockTeamcityClient {
    state: Mutex<MockState>,
    /// While set, every remote call fails with a transport error
    fail_transport: AtomicBool,
    pages_served: AtomicUsize,
}

impl MockTeamcityClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a build upstream.
    pub fn upsert(&self, build: MockBuild) {
        let mut state = self.state.lock();
        state.gone.remove(&build.dto.id);
        state.builds.insert(build.dto.id, build);
    }

    /// Transition a build's state/status in place.
    pub fn set_state(&self, id: u32, build_state: &str, status: Option<&str>) {
        let mut state = self.state.lock();
        if let Some(build) = state.builds.get_mut(&id) {
            build.dto.state = build_state.to_string();
            build.dto.status = status.map(str::to_string);
        }
    }

    /// Make an id disappear upstream (detail fetches 404).
    pub fn mark_gone(&self, id: u32) {
        let mut state = self.state.lock();
        state.builds.remove(&id);
        state.gone.insert(id);
    }

    /// Snapshot-dependency ids the next trigger call reports.
    pub fn set_trigger_dependencies(&self, ids: Vec<u32>) {
        self.state.lock().trigger_dependencies = ids;
    }

    /// Simulate upstream transport failures on every call.
    pub fn set_fail_transport(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    /// Listing pages served so far.
    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }

    fn check_transport(&self) -> Result<()> {
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(SyncError::Upstream("simulated transport failure".into()));
        }
        Ok(())
    }

    fn matches(locator: &BuildLocator, dto: &BuildDto) -> bool {
        if let Some(bt) = &locator.build_type {
            if &dto.build_type_id != bt {
                return false;
            }
        }
        if let Some(branch) = &locator.branch {
            if dto.branch() != branch {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl TeamcityClient for MockTeamcityClient {
    async fn builds_page(
        &self,
        locator: &BuildLocator,
        start: usize,
        count: usize,
    ) -> Result<BuildListDto> {
        self.check_transport()?;
        self.pages_served.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock();
        // Newest first, like the upstream listing
        let mut matching: Vec<BuildDto> = state
            .builds
            .values()
            .rev()
            .filter(|b| Self::matches(locator, &b.dto))
            .map(|b| b.dto.clone())
            .collect();
        let total = matching.len();
        let end = (start + count).min(total);
        let builds = if start < total {
            matching.drain(start..end).collect()
        } else {
            Vec::new()
        };
        Ok(BuildListDto {
            count: builds.len() as u32,
            next_href: (end < total).then(|| format!("/app/rest/builds?start:{end}")),
            builds,
        })
    }

    async fn build(&self, id: BuildId) -> Result<BuildDto> {
        self.check_transport()?;
        let state = self.state.lock();
        if state.gone.contains(&id.0) {
            return Err(SyncError::NotFound(format!("build {id}")));
        }
        state
            .builds
            .get(&id.0)
            .map(|b| b.dto.clone())
            .ok_or_else(|| SyncError::NotFound(format!("build {id}")))
    }

    async fn test_occurrences_page(
        &self,
        id: BuildId,
        start: usize,
        count: usize,
    ) -> Result<TestOccurrencesDto> {
        self.check_transport()?;
        let state = self.state.lock();
        let tests = state
            .builds
            .get(&id.0)
            .map(|b| b.tests.clone())
            .unwrap_or_default();
        let total = tests.len();
        let end = (start + count).min(total);
        let page: Vec<TestOccurrenceDto> = if start < total {
            tests[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(TestOccurrencesDto {
            count: page.len() as u32,
            next_href: (end < total).then(|| format!("/app/rest/testOccurrences?start:{end}")),
            test_occurrences: page,
        })
    }

    async fn problem_occurrences(&self, id: BuildId) -> Result<Vec<ProblemOccurrenceDto>> {
        self.check_transport()?;
        Ok(self
            .state
            .lock()
            .builds
            .get(&id.0)
            .map(|b| b.problems.clone())
            .unwrap_or_default())
    }

    async fn build_statistics(&self, id: BuildId) -> Result<Vec<StatisticPropertyDto>> {
        self.check_transport()?;
        Ok(self
            .state
            .lock()
            .builds
            .get(&id.0)
            .map(|b| b.statistics.clone())
            .unwrap_or_default())
    }

    async fn build_changes(&self, id: BuildId) -> Result<Vec<ChangeDto>> {
        self.check_transport()?;
        Ok(self
            .state
            .lock()
            .builds
            .get(&id.0)
            .map(|b| b.changes.clone())
            .unwrap_or_default())
    }

    async fn trigger_build(&self, request: &TriggerBuildRequest) -> Result<BuildDto> {
        self.check_transport()?;
        let mut state = self.state.lock();
        let id = state.builds.keys().next_back().copied().unwrap_or(0) + 1;
        let dependency_builds: Vec<BuildDto> = state
            .trigger_dependencies
            .iter()
            .filter_map(|dep| state.builds.get(dep).map(|b| b.dto.clone()))
            .collect();

        let mut dto = BuildDto {
            id,
            build_type_id: request.build_type.clone(),
            branch_name: request.branch.clone(),
            status: None,
            state: "queued".to_string(),
            ..BuildDto::default()
        };
        state.builds.insert(
            id,
            MockBuild {
                dto: dto.clone(),
                ..MockBuild::default()
            },
        );
        dto.snapshot_dependencies = Some(BuildListDto {
            count: dependency_builds.len() as u32,
            next_href: None,
            builds: dependency_builds,
        });
        Ok(dto)
    }

    async fn build_types(&self) -> Result<Vec<BuildTypeDto>> {
        self.check_transport()?;
        let state = self.state.lock();
        let mut seen = HashSet::new();
        Ok(state
            .builds
            .values()
            .filter(|b| seen.insert(b.dto.build_type_id.clone()))
            .map(|b| BuildTypeDto {
                id: b.dto.build_type_id.clone(),
                name: Some(b.dto.build_type_id.clone()),
                project_id: Some("Root".to_string()),
                paused: false,
            })
            .collect())
    }
}
