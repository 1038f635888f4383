//! Smaller compacted entity families: build types, changes, mutes and
//! log-check results.

use crate::keys::StringId;
use crate::store::{CompactedEntity, Family};
use serde::{Deserialize, Serialize};

/// Mirrored build configuration record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTypeCompacted {
    pub id: StringId,
    pub project: StringId,
    pub name: StringId,
    #[serde(default)]
    pub paused: bool,
}

impl CompactedEntity for BuildTypeCompacted {
    const FAMILY: Family = Family::BuildTypes;

    fn entity_id(&self) -> u32 {
        self.id.0 as u32
    }
}

/// Mirrored VCS change record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCompacted {
    pub id: u32,
    pub vcs_username: StringId,
    /// Commit date, epoch millis
    pub date: i64,
    /// VCS revision string (hash)
    pub version: StringId,
}

impl CompactedEntity for ChangeCompacted {
    const FAMILY: Family = Family::Changes;

    fn entity_id(&self) -> u32 {
        self.id
    }
}

/// A test mute observed upstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteCompacted {
    pub test_name: StringId,
    /// Branch or project scope the mute applies to
    pub scope: StringId,
    /// When the mute was first observed, epoch millis
    pub assignment_ts: i64,
}

impl CompactedEntity for MuteCompacted {
    const FAMILY: Family = Family::Mutes;

    fn entity_id(&self) -> u32 {
        self.test_name.0 as u32
    }
}

/// Result of the external build-log analyzer for one build.
///
/// Written by the (out-of-process) log checker through the facade; read back
/// to avoid re-analyzing a log that was already checked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCheckCompacted {
    pub build_id: u32,
    /// When the log was last analyzed, epoch millis
    pub last_checked_ts: i64,
    /// Compacted warning lines extracted from the log
    #[serde(default)]
    pub warnings: Vec<StringId>,
}

impl CompactedEntity for LogCheckCompacted {
    const FAMILY: Family = Family::LogChecks;

    fn entity_id(&self) -> u32 {
        self.build_id
    }
}
