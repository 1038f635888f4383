//! Rolling pass/fail statistics over mirrored build history
//!
//! - [`stat`]: outcome codes, flaky classification and motif templates
//! - [`entry`]: bounded most-recent-first windows with long-horizon totals
//! - [`collector`]: the [`ignited_core::FatBuildSink`] that folds saved fat
//!   builds into the windows
//!
//! The whole index is a derived cache: it can be rebuilt at any time by
//! replaying fat-build saves in save order.

pub mod collector;
pub mod entry;
pub mod stat;

pub use collector::RunHistoryCollector;
pub use entry::{RunHistoryEntry, RunHistoryView, RunMark, RUN_HISTORY_SCHEMA_VERSION};
pub use stat::{is_flaky, match_motif, FlakyMotif, RunOutcome};
