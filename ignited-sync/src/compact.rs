//! Wire DTO -> compacted entity conversion
//!
//! Every string crossing this boundary goes through the dictionary; the
//! store above here only sees integers.

use crate::dto::{
    parse_upstream_time, BuildDto, ChangeDto, ProblemOccurrenceDto, RevisionDto,
    StatisticPropertyDto, TestOccurrenceDto,
};
use crate::error::{Result, SyncError};
use ignited_core::{
    problem_kinds, BuildId, BuildRef, BuildState, ChangeCompacted, ProblemCompacted,
    RevisionCompacted, StatisticCompacted, StringCompactor, StringId, TestCompacted,
};

/// Compact a build payload down to its reference fields.
pub async fn build_ref_from_dto(compactor: &StringCompactor, dto: &BuildDto) -> Result<BuildRef> {
    let state = BuildState::parse(&dto.state).ok_or_else(|| {
        SyncError::Upstream(format!(
            "Unknown build state '{}' for build {}",
            dto.state, dto.id
        ))
    })?;
    let status = match &dto.status {
        Some(status) => compactor.id(status).await?,
        None => StringId::NONE,
    };
    Ok(BuildRef {
        id: BuildId(dto.id),
        build_type: compactor.id(&dto.build_type_id).await?,
        branch: compactor.id(dto.branch()).await?,
        status,
        state,
    })
}

pub async fn test_from_dto(
    compactor: &StringCompactor,
    dto: &TestOccurrenceDto,
) -> Result<TestCompacted> {
    let status = match &dto.status {
        Some(status) => compactor.id(status).await?,
        None => StringId::NONE,
    };
    Ok(TestCompacted {
        name: compactor.id(&dto.name).await?,
        status,
        duration_ms: dto.duration,
        ignored: dto.ignored,
        muted: dto.muted,
    })
}

pub async fn problem_from_dto(
    compactor: &StringCompactor,
    dto: &ProblemOccurrenceDto,
) -> Result<ProblemCompacted> {
    let identity = match &dto.identity {
        Some(identity) => compactor.id(identity).await?,
        None => StringId::NONE,
    };
    Ok(ProblemCompacted {
        kind: compactor.id(&dto.kind).await?,
        identity,
        critical: problem_kinds::is_critical(&dto.kind),
    })
}

/// Compact a statistic; `None` for values that are not integral.
pub async fn statistic_from_dto(
    compactor: &StringCompactor,
    dto: &StatisticPropertyDto,
) -> Result<Option<StatisticCompacted>> {
    let Ok(value) = dto.value.parse::<i64>() else {
        return Ok(None);
    };
    Ok(Some(StatisticCompacted {
        name: compactor.id(&dto.name).await?,
        value,
    }))
}

pub async fn change_from_dto(
    compactor: &StringCompactor,
    dto: &ChangeDto,
) -> Result<ChangeCompacted> {
    let vcs_username = match &dto.username {
        Some(username) => compactor.id(username).await?,
        None => StringId::NONE,
    };
    let version = match &dto.version {
        Some(version) => compactor.id(version).await?,
        None => StringId::NONE,
    };
    Ok(ChangeCompacted {
        id: dto.id,
        vcs_username,
        date: dto
            .date
            .as_deref()
            .and_then(parse_upstream_time)
            .unwrap_or(0),
        version,
    })
}

pub async fn revision_from_dto(
    compactor: &StringCompactor,
    dto: &RevisionDto,
) -> Result<RevisionCompacted> {
    let vcs_root = match &dto.vcs_root_id {
        Some(root) => compactor.id(root).await?,
        None => StringId::NONE,
    };
    Ok(RevisionCompacted {
        vcs_root,
        revision: compactor.id(&dto.version).await?,
    })
}
