//! Wire DTOs for the upstream CI REST API
//!
//! Shapes mirror the upstream JSON: paginated containers carry a `nextHref`
//! when more pages exist, numbers sometimes arrive as strings (statistics),
//! and timestamps use the compact `20191123T213045+0300` format.

use serde::{Deserialize, Serialize};

/// Parse an upstream timestamp (`yyyyMMddTHHmmss±zzzz`) to epoch millis.
pub fn parse_upstream_time(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_str(value, "%Y%m%dT%H%M%S%z")
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Nested build-type reference inside a build payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildTypeDto {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "projectId", default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub paused: bool,
}

/// One build as listed or fetched in detail.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildDto {
    pub id: u32,
    #[serde(rename = "buildTypeId")]
    pub build_type_id: String,
    /// Absent for builds on the default branch
    #[serde(rename = "branchName", default)]
    pub branch_name: Option<String>,
    /// SUCCESS / FAILURE / UNKNOWN; absent while queued
    #[serde(default)]
    pub status: Option<String>,
    /// queued / running / finished
    pub state: String,
    #[serde(default)]
    pub composite: Option<bool>,
    #[serde(rename = "queuedDate", default)]
    pub queued_date: Option<String>,
    #[serde(rename = "startDate", default)]
    pub start_date: Option<String>,
    #[serde(rename = "finishDate", default)]
    pub finish_date: Option<String>,
    /// Present on detail fetches
    #[serde(rename = "buildType", default)]
    pub build_type: Option<BuildTypeDto>,
    #[serde(rename = "snapshot-dependencies", default)]
    pub snapshot_dependencies: Option<BuildListDto>,
    #[serde(default)]
    pub revisions: Option<RevisionsDto>,
}

impl BuildDto {
    /// Branch, with the upstream default-branch sentinel for absent names.
    pub fn branch(&self) -> &str {
        self.branch_name.as_deref().unwrap_or("<default>")
    }

    pub fn is_composite(&self) -> bool {
        self.composite.unwrap_or(false)
    }

    /// Ids of the snapshot dependencies, when present.
    pub fn dependency_ids(&self) -> Vec<u32> {
        self.snapshot_dependencies
            .as_ref()
            .map(|deps| deps.builds.iter().map(|b| b.id).collect())
            .unwrap_or_default()
    }
}

/// Paginated build listing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildListDto {
    #[serde(default)]
    pub count: u32,
    #[serde(rename = "nextHref", default)]
    pub next_href: Option<String>,
    #[serde(rename = "build", default)]
    pub builds: Vec<BuildDto>,
}

impl BuildListDto {
    pub fn has_more(&self) -> bool {
        self.next_href.is_some() && !self.builds.is_empty()
    }
}

/// One test occurrence inside a build.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestOccurrenceDto {
    pub name: String,
    /// SUCCESS / FAILURE / UNKNOWN
    #[serde(default)]
    pub status: Option<String>,
    /// Milliseconds
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub muted: bool,
}

/// Paginated test occurrence listing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestOccurrencesDto {
    #[serde(default)]
    pub count: u32,
    #[serde(rename = "nextHref", default)]
    pub next_href: Option<String>,
    #[serde(rename = "testOccurrence", default)]
    pub test_occurrences: Vec<TestOccurrenceDto>,
}

impl TestOccurrencesDto {
    pub fn has_more(&self) -> bool {
        self.next_href.is_some() && !self.test_occurrences.is_empty()
    }
}

/// One build problem occurrence.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProblemOccurrenceDto {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub identity: Option<String>,
}

/// Container for problem occurrences.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProblemOccurrencesDto {
    #[serde(rename = "problemOccurrence", default)]
    pub problems: Vec<ProblemOccurrenceDto>,
}

/// One statistic property; values arrive as strings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatisticPropertyDto {
    pub name: String,
    pub value: String,
}

/// Container for build statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatisticsDto {
    #[serde(rename = "property", default)]
    pub properties: Vec<StatisticPropertyDto>,
}

/// One VCS change attached to a build.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChangeDto {
    pub id: u32,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Container for build changes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChangesDto {
    #[serde(rename = "change", default)]
    pub changes: Vec<ChangeDto>,
}

/// One VCS revision the build ran against.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RevisionDto {
    pub version: String,
    #[serde(rename = "vcsRootId", default)]
    pub vcs_root_id: Option<String>,
}

/// Container for build revisions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RevisionsDto {
    #[serde(rename = "revision", default)]
    pub revisions: Vec<RevisionDto>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_upstream_time_round_trip() {
        let millis = parse_upstream_time("20191123T213045+0300").unwrap();
        // 2019-11-23 18:30:45 UTC
        assert_eq!(millis, 1_574_533_845_000);
        assert!(parse_upstream_time("garbage").is_none());
    }

    #[test]
    fn build_list_parses_upstream_shape() {
        let json = r#"{
            "count": 2,
            "nextHref": "/app/rest/builds?locator=start:2,count:2",
            "build": [
                {"id": 100, "buildTypeId": "Apache_Pr", "state": "finished", "status": "SUCCESS", "branchName": "pr/42"},
                {"id": 99, "buildTypeId": "Apache_Pr", "state": "queued"}
            ]
        }"#;
        let page: BuildListDto = serde_json::from_str(json).unwrap();
        assert_eq!(page.builds.len(), 2);
        assert!(page.has_more());
        assert_eq!(page.builds[1].branch(), "<default>");
        assert!(page.builds[1].status.is_none());
    }

    #[test]
    fn detail_build_carries_dependencies() {
        let json = r#"{
            "id": 7, "buildTypeId": "Chain", "state": "queued",
            "snapshot-dependencies": {"count": 2, "build": [
                {"id": 5, "buildTypeId": "Dep1", "state": "queued"},
                {"id": 6, "buildTypeId": "Dep2", "state": "queued"}
            ]}
        }"#;
        let build: BuildDto = serde_json::from_str(json).unwrap();
        assert_eq!(build.dependency_ids(), vec![5, 6]);
    }
}
