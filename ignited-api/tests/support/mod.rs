//! Shared helpers for facade integration tests
#![allow(dead_code)]

pub mod event_capture;

use ignited_api::{Ignited, IgnitedBuilder};
use ignited_core::ServerConfig;
use ignited_sync::testing::{MockBuild, MockTeamcityClient};
use std::ops::RangeInclusive;
use std::sync::Arc;

pub struct Rig {
    pub ignited: Ignited,
    pub upstream: Arc<MockTeamcityClient>,
}

/// One-server rig over an in-memory store and a mock upstream.
pub async fn rig(code: &str) -> Rig {
    rig_with(ServerConfig::new(code, "http://mock")).await
}

pub async fn rig_with(config: ServerConfig) -> Rig {
    let upstream = Arc::new(MockTeamcityClient::new());
    let ignited = IgnitedBuilder::memory()
        .add_server(config, upstream.clone())
        .build()
        .await
        .expect("rig wiring");
    Rig { ignited, upstream }
}

/// Seed a range of finished builds for one build type and branch.
pub fn seed_finished(
    upstream: &MockTeamcityClient,
    ids: RangeInclusive<u32>,
    build_type: &str,
    branch: &str,
) {
    for id in ids {
        upstream.upsert(MockBuild::finished(id, build_type, branch, "SUCCESS"));
    }
}
