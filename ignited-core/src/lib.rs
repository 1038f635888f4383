//! Core types for the teamcity-ignited mirror
//!
//! This crate holds everything the sync and statistics layers build on:
//!
//! - [`keys`]: server-mask partitioned composite keys and compact ids
//! - [`compactor`]: the shared bidirectional string dictionary
//! - [`store`]: the partitioned key-value contract and typed change-aware
//!   entity stores
//! - [`memory`]: in-memory store implementation
//! - [`build`] / [`fat_build`] / [`catalog`]: the compacted entity types
//! - [`config`]: per-server configuration
//! - [`error`]: error types
//!
//! The store is the system of record; the dictionary is shared, append-only
//! and process-lifetime; derived indexes (run history) are rebuildable from
//! fat builds at any time.

pub mod build;
pub mod catalog;
pub mod compactor;
pub mod config;
pub mod error;
pub mod fat_build;
pub mod keys;
pub mod memory;
pub mod store;

pub use build::{statuses, BuildRef, BuildState};
pub use catalog::{BuildTypeCompacted, ChangeCompacted, LogCheckCompacted, MuteCompacted};
pub use compactor::StringCompactor;
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use fat_build::{
    problem_kinds, FatBuild, FatBuildSink, ProblemCompacted, RevisionCompacted,
    StatisticCompacted, TestCompacted, FAT_BUILD_SCHEMA_VERSION,
};
pub use keys::{BuildId, ServerMask, StringId};
pub use memory::MemoryKvStore;
pub use store::{CompactedEntity, EntityStore, Family, KvStore, SaveOutcome};
