//! Compacted fat build
//!
//! The full locally-cached projection of a remote build: the embedded
//! reference fields plus timestamps, tests, problems, statistics, change ids
//! and revisions. Test/problem records are positional — they only mean
//! something inside the fat build that owns them; cross-build test identity
//! comes from the compacted test name, not from any occurrence-local id.
//!
//! Rows carry a schema version so older stored shapes are upgraded lazily on
//! read, never by a blocking migration.

use crate::build::{BuildRef, BuildState};
use crate::error::Result;
use crate::keys::{BuildId, ServerMask, StringId};
use crate::store::{CompactedEntity, Family};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Current fat-build schema version.
pub const FAT_BUILD_SCHEMA_VERSION: u32 = 2;

/// Upstream problem kinds that mean the build infrastructure itself broke.
///
/// These count as critical failures in run history regardless of individual
/// test results.
pub mod problem_kinds {
    pub const TC_EXECUTION_TIMEOUT: &str = "TC_EXECUTION_TIMEOUT";
    pub const TC_JVM_CRASH: &str = "TC_JVM_CRASH";
    pub const TC_OOME: &str = "TC_OOME";
    pub const TC_EXIT_CODE: &str = "TC_EXIT_CODE";

    /// Whether a problem kind is build-critical.
    pub fn is_critical(kind: &str) -> bool {
        matches!(
            kind,
            TC_EXECUTION_TIMEOUT | TC_JVM_CRASH | TC_OOME | TC_EXIT_CODE
        )
    }
}

/// One test occurrence inside a fat build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCompacted {
    pub name: StringId,
    pub status: StringId,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub muted: bool,
}

/// One problem occurrence inside a fat build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemCompacted {
    pub kind: StringId,
    pub identity: StringId,
    /// Derived from the kind string at compaction time
    #[serde(default)]
    pub critical: bool,
}

/// One build statistic (duration, artifact size, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticCompacted {
    pub name: StringId,
    pub value: i64,
}

/// One VCS revision the build ran against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionCompacted {
    pub vcs_root: StringId,
    pub revision: StringId,
}

/// Full locally-cached projection of a remote build.
///
/// Embeds its [`BuildRef`] by composition; the reference fields must stay
/// consistent with the standalone `BuildRefs` row (the sync layer is the
/// only writer of both).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FatBuild {
    #[serde(default)]
    pub schema_version: u32,
    pub build: BuildRef,
    #[serde(default)]
    pub queued_at: Option<i64>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default = "StringId::none")]
    pub project: StringId,
    #[serde(default = "StringId::none")]
    pub name: StringId,
    /// Composite (aggregate) builds carry roll-up tests only; per-test
    /// detail is not fetched for them.
    #[serde(default)]
    pub composite: bool,
    /// Placeholder for an id upstream can no longer produce
    #[serde(default)]
    pub fake_stub: bool,
    #[serde(default)]
    pub tests: Vec<TestCompacted>,
    #[serde(default)]
    pub problems: Vec<ProblemCompacted>,
    #[serde(default)]
    pub statistics: Vec<StatisticCompacted>,
    #[serde(default)]
    pub change_ids: Vec<u32>,
    #[serde(default)]
    pub revisions: Vec<RevisionCompacted>,
}

impl FatBuild {
    /// Minimal placeholder for a build id upstream can no longer produce.
    ///
    /// Stored so future lookups stop re-fetching a permanently gone id.
    pub fn fake_stub(id: BuildId) -> Self {
        FatBuild {
            schema_version: FAT_BUILD_SCHEMA_VERSION,
            build: BuildRef {
                id,
                build_type: StringId::NONE,
                branch: StringId::NONE,
                status: StringId::NONE,
                state: BuildState::Finished,
            },
            queued_at: None,
            started_at: None,
            finished_at: None,
            project: StringId::NONE,
            name: StringId::NONE,
            composite: false,
            fake_stub: true,
            tests: Vec::new(),
            problems: Vec::new(),
            statistics: Vec::new(),
            change_ids: Vec::new(),
            revisions: Vec::new(),
        }
    }

    pub fn id(&self) -> BuildId {
        self.build.id
    }

    /// Whether any problem on this build is build-critical.
    pub fn has_critical_problems(&self) -> bool {
        self.problems.iter().any(|p| p.critical)
    }

    /// Look up a statistic by its compacted name.
    pub fn statistic(&self, name: StringId) -> Option<i64> {
        self.statistics
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value)
    }
}

impl CompactedEntity for FatBuild {
    const FAMILY: Family = Family::FatBuilds;

    fn entity_id(&self) -> u32 {
        self.build.id.0
    }

    /// Pre-versioned rows only normalize the version tag here; missing
    /// fields already default on deserialize. The row is rewritten in the
    /// current shape on its next real save.
    fn upgrade(mut self) -> Self {
        if self.schema_version < FAT_BUILD_SCHEMA_VERSION {
            self.schema_version = FAT_BUILD_SCHEMA_VERSION;
        }
        self
    }
}

/// Consumer of actually-saved fat builds.
///
/// The loader calls this exactly once per physical save; no-op
/// (change-aware skipped) saves never reach it, which is what keeps
/// derived aggregates replay-safe.
#[async_trait]
pub trait FatBuildSink: Debug + Send + Sync {
    async fn on_fat_build_saved(&self, mask: ServerMask, build: &FatBuild) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_kind_set() {
        assert!(problem_kinds::is_critical(problem_kinds::TC_OOME));
        assert!(problem_kinds::is_critical(problem_kinds::TC_JVM_CRASH));
        assert!(!problem_kinds::is_critical("TC_FAILED_TESTS"));
    }

    #[test]
    fn fake_stub_is_finished_and_marked() {
        let stub = FatBuild::fake_stub(BuildId(42));
        assert!(stub.fake_stub);
        assert!(stub.build.is_finished());
        assert_eq!(stub.id(), BuildId(42));
    }

    #[test]
    fn old_schema_upgrades_on_read() {
        // A row persisted before versioning: no schema_version field at all
        let json = r#"{
            "build": {
                "id": 7,
                "build_type": 0,
                "branch": 1,
                "status": 2,
                "state": "Finished"
            },
            "tests": [{"name": 3, "status": 2}]
        }"#;
        let fat: FatBuild = serde_json::from_str(json).unwrap();
        assert_eq!(fat.schema_version, 0);
        let fat = fat.upgrade();
        assert_eq!(fat.schema_version, FAT_BUILD_SCHEMA_VERSION);
        assert_eq!(fat.tests.len(), 1);
        assert!(!fat.tests[0].ignored);
    }
}
