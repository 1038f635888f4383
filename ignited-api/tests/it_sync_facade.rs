mod support;

use ignited_api::{FatBuildSyncMode, IgnitedBuilder};
use ignited_core::{BuildId, LogCheckCompacted, SaveOutcome, ServerConfig, StringId};
use ignited_sync::testing::{test_occurrence, MockBuild, MockTeamcityClient};
use ignited_sync::TriggerBuildRequest;
use std::sync::Arc;

/// Seed 1000 refs, leave 500 in flight, finish them upstream, actualize,
/// and check the whole index converges.
#[tokio::test]
async fn end_to_end_incremental_convergence() {
    let rig = support::rig("apache").await;
    for id in 1..=1000u32 {
        if (500..=999).contains(&id) {
            let state = if id % 2 == 0 { "queued" } else { "running" };
            rig.upstream
                .upsert(MockBuild::in_state(id, "Apache_Pr", "pr/42", state));
        } else {
            rig.upstream
                .upsert(MockBuild::finished(id, "Apache_Pr", "pr/42", "SUCCESS"));
        }
    }

    let server = rig.ignited.server("apache").unwrap();
    server.actualize_recent_build_refs().await.unwrap();

    let in_flight = server
        .queued_and_running_builds(Some("pr/42"))
        .await
        .unwrap();
    assert_eq!(in_flight.len(), 500);
    assert_eq!(server.sync_status().in_flight, 500);

    // Everything finishes upstream
    for id in 500..=999u32 {
        rig.upstream.set_state(id, "finished", Some("SUCCESS"));
    }
    server.actualize_recent_build_refs().await.unwrap();

    assert!(server
        .queued_and_running_builds(None)
        .await
        .unwrap()
        .is_empty());
    let all = server.all_builds("Apache_Pr", "pr/42").await.unwrap();
    assert_eq!(all.len(), 1000);
    assert!(all.iter().all(|b| b.is_finished()));
}

#[tokio::test]
async fn second_actualize_fetches_one_quiet_page() {
    let rig = support::rig("apache").await;
    support::seed_finished(&rig.upstream, 1..=250, "Apache_Pr", "pr/42");
    let server = rig.ignited.server("apache").unwrap();

    let first = server.actualize_recent_build_refs().await.unwrap();
    assert_eq!(first.saved, 250);

    let second = server.actualize_recent_build_refs().await.unwrap();
    assert_eq!(second.pages, 1);
    assert_eq!(second.saved, 0);
}

#[tokio::test]
async fn fat_build_sync_modes() {
    let rig = support::rig("apache").await;
    rig.upstream.upsert(
        MockBuild::finished(42, "Apache_Pr", "pr/42", "SUCCESS")
            .with_tests(vec![test_occurrence("suite: testA", "SUCCESS")]),
    );
    let server = rig.ignited.server("apache").unwrap();
    let compactor = rig.ignited.compactor();

    // Best-effort read with an empty cache stays empty
    assert!(server
        .fat_build(BuildId(42), FatBuildSyncMode::None)
        .await
        .unwrap()
        .is_none());

    // LoadNew fetches once, then serves the cache
    let loaded = server
        .fat_build(BuildId(42), FatBuildSyncMode::LoadNew)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.tests.len(), 1);

    rig.upstream.set_state(42, "finished", Some("FAILURE"));
    let cached = server
        .fat_build(BuildId(42), FatBuildSyncMode::LoadNew)
        .await
        .unwrap()
        .unwrap();
    let success = compactor.lookup("SUCCESS").await.unwrap();
    assert_eq!(cached.build.status, success);

    // Full always refetches
    let refreshed = server
        .fat_build(BuildId(42), FatBuildSyncMode::Full)
        .await
        .unwrap()
        .unwrap();
    let failure = compactor.lookup("FAILURE").await.unwrap();
    assert_eq!(refreshed.build.status, failure);
}

#[tokio::test]
async fn reload_queued_refreshes_only_in_flight_builds() {
    let rig = support::rig("apache").await;
    rig.upstream
        .upsert(MockBuild::in_state(43, "Apache_Pr", "pr/42", "running"));
    let server = rig.ignited.server("apache").unwrap();

    let running = server
        .fat_build(BuildId(43), FatBuildSyncMode::LoadNew)
        .await
        .unwrap()
        .unwrap();
    assert!(running.build.is_running());

    rig.upstream.set_state(43, "finished", Some("SUCCESS"));
    let finished = server
        .fat_build(BuildId(43), FatBuildSyncMode::ReloadQueued)
        .await
        .unwrap()
        .unwrap();
    assert!(finished.build.is_finished());

    // A finished cache entry is not refetched by ReloadQueued
    rig.upstream.set_state(43, "finished", Some("FAILURE"));
    let served = server
        .fat_build(BuildId(43), FatBuildSyncMode::ReloadQueued)
        .await
        .unwrap()
        .unwrap();
    let success = rig.ignited.compactor().lookup("SUCCESS").await.unwrap();
    assert_eq!(served.build.status, success);
}

#[tokio::test]
async fn trigger_build_mirrors_the_new_build_immediately() {
    let rig = support::rig("apache").await;
    support::seed_finished(&rig.upstream, 1..=2, "Apache_Dep", "pr/42");
    rig.upstream.set_trigger_dependencies(vec![1, 2]);
    let server = rig.ignited.server("apache").unwrap();

    let request = TriggerBuildRequest {
        build_type: "Apache_Pr".to_string(),
        branch: Some("pr/42".to_string()),
        queue_at_top: true,
        ..TriggerBuildRequest::default()
    };
    let triggered = server.trigger_build(request, true).await.unwrap();

    assert!(triggered.build.is_queued());
    assert_eq!(triggered.dependency_ids, vec![BuildId(1), BuildId(2)]);

    // The new build is already visible through the compacted reads
    let in_flight = server
        .queued_and_running_builds(Some("pr/42"))
        .await
        .unwrap();
    assert!(in_flight.iter().any(|b| b.id == triggered.build.id));
}

#[tokio::test]
async fn partitions_stay_isolated_across_servers() {
    let upstream_a = Arc::new(MockTeamcityClient::new());
    let upstream_b = Arc::new(MockTeamcityClient::new());
    // Deliberately colliding build ids across the two servers
    upstream_a.upsert(MockBuild::finished(7, "Apache_Pr", "pr/42", "SUCCESS"));
    upstream_b.upsert(MockBuild::finished(7, "Private_Pr", "pr/42", "FAILURE"));

    let ignited = IgnitedBuilder::memory()
        .add_server(
            ServerConfig::new("apache", "http://mock-a"),
            upstream_a.clone(),
        )
        .add_server(
            ServerConfig::new("private", "http://mock-b"),
            upstream_b.clone(),
        )
        .build()
        .await
        .unwrap();

    for server in ignited.servers() {
        server.actualize_recent_build_refs().await.unwrap();
    }

    let apache = ignited.server("apache").unwrap();
    let private = ignited.server("private").unwrap();

    let apache_builds = apache.all_builds("Apache_Pr", "pr/42").await.unwrap();
    assert_eq!(apache_builds.len(), 1);
    assert!(apache.all_builds("Private_Pr", "pr/42").await.unwrap().is_empty());

    let private_builds = private.all_builds("Private_Pr", "pr/42").await.unwrap();
    assert_eq!(private_builds.len(), 1);

    let failure = ignited.compactor().lookup("FAILURE").await.unwrap();
    assert_eq!(private_builds[0].status, failure);
    assert_ne!(apache_builds[0].status, private_builds[0].status);
}

#[tokio::test]
async fn duplicate_server_codes_are_rejected_at_wiring() {
    let upstream = Arc::new(MockTeamcityClient::new());
    let result = IgnitedBuilder::memory()
        .add_server(ServerConfig::new("apache", "http://a"), upstream.clone())
        .add_server(ServerConfig::new("apache", "http://b"), upstream)
        .build()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn reads_keep_serving_cached_data_through_an_outage() {
    let rig = support::rig("apache").await;
    support::seed_finished(&rig.upstream, 1..=10, "Apache_Pr", "pr/42");
    let server = rig.ignited.server("apache").unwrap();
    server.actualize_recent_build_refs().await.unwrap();

    rig.upstream.set_fail_transport(true);

    // Refresh fails loudly for the sync caller...
    assert!(server.actualize_recent_build_refs().await.is_err());
    // ...but reads still serve the mirror, with staleness visible
    let builds = server.all_builds("Apache_Pr", "pr/42").await.unwrap();
    assert_eq!(builds.len(), 10);
    assert!(server.sync_status().last_ref_pass_age.is_some());
}

#[tokio::test]
async fn build_types_refresh_and_degrade_to_cache() {
    let rig = support::rig("apache").await;
    support::seed_finished(&rig.upstream, 1..=1, "Apache_Pr", "pr/42");
    support::seed_finished(&rig.upstream, 2..=2, "Apache_Nightly", "pr/42");
    let server = rig.ignited.server("apache").unwrap();

    let listing = server.build_types().await.unwrap();
    assert_eq!(listing.len(), 2);

    rig.upstream.set_fail_transport(true);
    let cached = server.build_types().await.unwrap();
    assert_eq!(cached.len(), 2);
}

#[tokio::test]
async fn log_check_results_round_trip_change_aware() {
    let rig = support::rig("apache").await;
    let server = rig.ignited.server("apache").unwrap();

    let entry = LogCheckCompacted {
        build_id: 11,
        last_checked_ts: 1_700_000_000_000,
        warnings: vec![StringId(3), StringId(4)],
    };
    assert_eq!(
        server.save_log_check(&entry).await.unwrap(),
        SaveOutcome::Saved
    );
    assert_eq!(
        server.save_log_check(&entry).await.unwrap(),
        SaveOutcome::Unchanged
    );
    let read = server.log_check(BuildId(11)).await.unwrap().unwrap();
    assert_eq!(read, entry);
}
