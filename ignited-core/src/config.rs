//! Per-server mirror configuration
//!
//! Serde-loadable knobs for one upstream server: endpoint, auth, polling
//! cadence and sync tuning. Everything has a default; only `code` and
//! `base_url` are required.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}
fn default_page_size() -> usize {
    100
}
fn default_incremental_delay_secs() -> u64 {
    180
}
fn default_full_reindex_delay_secs() -> u64 {
    4 * 3600
}
fn default_fat_build_lanes() -> usize {
    4
}
fn default_stale_queue_gap() -> u32 {
    2_000
}
fn default_history_window() -> usize {
    50
}

/// Configuration for one mirrored upstream server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Logical server code; hashed into the store partition mask
    pub code: String,
    /// Upstream REST base URL
    pub base_url: String,
    /// Bearer token for upstream requests
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Page size for build-reference and test-occurrence listings
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Delay before the next incremental reference pass
    #[serde(default = "default_incremental_delay_secs")]
    pub incremental_delay_secs: u64,
    /// Delay before the next full reindex (self-healing resync)
    #[serde(default = "default_full_reindex_delay_secs")]
    pub full_reindex_delay_secs: u64,
    /// Number of named fat-build loader lanes
    #[serde(default = "default_fat_build_lanes")]
    pub fat_build_lanes: usize,
    /// In-flight builds this far behind the newest observed id get handed
    /// to direct fat-build reload instead of waiting for the page scan
    #[serde(default = "default_stale_queue_gap")]
    pub stale_queue_gap: u32,
    /// Bounded run-history window capacity per (test, suite, branch) key
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl ServerConfig {
    /// Minimal config with all knobs at their defaults.
    pub fn new(code: impl Into<String>, base_url: impl Into<String>) -> Self {
        ServerConfig {
            code: code.into(),
            base_url: base_url.into(),
            token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            page_size: default_page_size(),
            incremental_delay_secs: default_incremental_delay_secs(),
            full_reindex_delay_secs: default_full_reindex_delay_secs(),
            fat_build_lanes: default_fat_build_lanes(),
            stale_queue_gap: default_stale_queue_gap(),
            history_window: default_history_window(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn incremental_delay(&self) -> Duration {
        Duration::from_secs(self.incremental_delay_secs)
    }

    pub fn full_reindex_delay(&self) -> Duration {
        Duration::from_secs(self.full_reindex_delay_secs)
    }
}
