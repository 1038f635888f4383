//! Compacted build reference
//!
//! The minimal projection of a remote build kept fresh by the reference
//! synchronizer: id, build type, branch, status, state — strings dictionary
//! compacted. Created on first sighting, updated in place while
//! queued/running, immutable once finished barring upstream correction.

use crate::keys::{BuildId, StringId};
use crate::store::{CompactedEntity, Family};
use serde::{Deserialize, Serialize};

/// Upstream build/test status strings.
///
/// `CANCELLED` is local: upstream reports a vanished build by ceasing to
/// list it, and the fallback path records it under this status.
pub mod statuses {
    pub const SUCCESS: &str = "SUCCESS";
    pub const FAILURE: &str = "FAILURE";
    pub const UNKNOWN: &str = "UNKNOWN";
    pub const CANCELLED: &str = "CANCELLED";
}

/// Lifecycle state of a remote build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildState {
    Queued,
    Running,
    Finished,
}

impl BuildState {
    /// Parse the upstream wire value ("queued" | "running" | "finished").
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(BuildState::Queued),
            "running" => Some(BuildState::Running),
            "finished" => Some(BuildState::Finished),
            _ => None,
        }
    }
}

/// Minimal cached projection of a remote build.
///
/// Only the reference synchronizer writes these; the fat-build loader keeps
/// its embedded copy consistent with this row (same writer, no independent
/// divergence).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRef {
    pub id: BuildId,
    pub build_type: StringId,
    pub branch: StringId,
    pub status: StringId,
    pub state: BuildState,
}

impl BuildRef {
    pub fn is_queued(&self) -> bool {
        self.state == BuildState::Queued
    }

    pub fn is_running(&self) -> bool {
        self.state == BuildState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state == BuildState::Finished
    }

    /// Queued or running: still moving upstream, tracked in the in-flight set.
    pub fn is_in_flight(&self) -> bool {
        !self.is_finished()
    }
}

impl CompactedEntity for BuildRef {
    const FAMILY: Family = Family::BuildRefs;

    fn entity_id(&self) -> u32 {
        self.id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_parse() {
        assert_eq!(BuildState::parse("queued"), Some(BuildState::Queued));
        assert_eq!(BuildState::parse("running"), Some(BuildState::Running));
        assert_eq!(BuildState::parse("finished"), Some(BuildState::Finished));
        assert_eq!(BuildState::parse("deleted"), None);
    }

    #[test]
    fn in_flight_follows_state() {
        let mut build = BuildRef {
            id: BuildId(1),
            build_type: StringId(0),
            branch: StringId(1),
            status: StringId::NONE,
            state: BuildState::Queued,
        };
        assert!(build.is_in_flight());
        build.state = BuildState::Finished;
        assert!(!build.is_in_flight());
    }
}
