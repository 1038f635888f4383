//! Incremental synchronization against the upstream CI REST API
//!
//! This crate keeps the local mirror fresh:
//!
//! - [`client`]: upstream client trait + HTTP implementation
//! - [`dto`]: wire DTOs for the upstream JSON
//! - [`compact`]: DTO -> compacted entity conversion
//! - [`ref_sync`]: the build-reference synchronizer (full / incremental /
//!   ultrafast)
//! - [`fat_sync`]: the proactive fat-build loader with named lanes
//! - [`queue`]: pending fat-build queue + in-flight tracking
//! - [`scheduler`]: named coalescing background tasks
//! - [`testing`]: in-memory upstream double for tests
//!
//! Remote fetches are the only operations here that block on I/O; a failed
//! fetch is logged and left for the next scheduled pass, never retried in a
//! tight loop, and never recorded as a successful save.

pub mod client;
pub mod compact;
pub mod dto;
pub mod error;
pub mod fat_sync;
pub mod queue;
pub mod ref_sync;
pub mod scheduler;
pub mod testing;

pub use client::{BuildLocator, HttpTeamcityClient, TeamcityClient, TriggerBuildRequest};
pub use error::{Result, SyncError};
pub use fat_sync::ProactiveFatBuildSync;
pub use queue::FatBuildQueue;
pub use ref_sync::{BuildRefSync, RefSyncMode, SyncPass};
pub use scheduler::{Submitted, TaskScheduler};
