mod support;

use ignited_api::FatBuildSyncMode;
use ignited_core::BuildId;
use ignited_history::FlakyMotif;
use ignited_sync::dto::ProblemOccurrenceDto;
use ignited_sync::testing::{test_occurrence, MockBuild};

const SUITE: &str = "Apache_Pr";
const BRANCH: &str = "pr/42";
const TEST: &str = "org.apache.CoreTest.testIndex";

/// Seed one finished build whose single test has the given status.
fn seed_run(rig: &support::Rig, id: u32, test_status: &str) {
    let build_status = if test_status == "SUCCESS" {
        "SUCCESS"
    } else {
        "FAILURE"
    };
    rig.upstream.upsert(
        MockBuild::finished(id, SUITE, BRANCH, build_status)
            .with_tests(vec![test_occurrence(TEST, test_status)])
            .with_start_date(&format!("20250101T{:02}{:02}00+0000", id / 60, id % 60)),
    );
}

/// Load the given builds synchronously so ingestion order is deterministic.
async fn load_all(rig: &support::Rig, ids: impl IntoIterator<Item = u32>) {
    let server = rig.ignited.server("apache").unwrap();
    for id in ids {
        server
            .fat_build(BuildId(id), FatBuildSyncMode::Full)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn alternating_outcomes_classify_as_flaky() {
    let rig = support::rig("apache").await;
    // Most-recent-first window: fail, pass, fail, pass, pass
    seed_run(&rig, 1, "SUCCESS");
    seed_run(&rig, 2, "SUCCESS");
    seed_run(&rig, 3, "FAILURE");
    seed_run(&rig, 4, "SUCCESS");
    seed_run(&rig, 5, "FAILURE");
    load_all(&rig, 1..=5).await;

    let server = rig.ignited.server("apache").unwrap();
    let view = server
        .test_run_history(TEST, SUITE, BRANCH)
        .await
        .unwrap()
        .unwrap();
    assert!(view.flaky);
    assert_eq!(view.motif, None);
    assert_eq!(view.entry.runs, 5);
    assert_eq!(view.entry.failures, 2);
}

#[tokio::test]
async fn failure_streak_after_passes_is_newly_broken_not_flaky() {
    let rig = support::rig("apache").await;
    // Older all-pass tail, then four straight failures
    for id in 1..=2u32 {
        seed_run(&rig, id, "SUCCESS");
    }
    for id in 3..=6u32 {
        seed_run(&rig, id, "FAILURE");
    }
    load_all(&rig, 1..=6).await;

    let server = rig.ignited.server("apache").unwrap();
    let view = server
        .test_run_history(TEST, SUITE, BRANCH)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.motif, Some(FlakyMotif::FailureStreakStabilizing));
    assert!(!view.flaky);
}

#[tokio::test]
async fn suite_fail_rate_over_the_long_horizon() {
    let rig = support::rig("apache").await;
    for id in 1..=10u32 {
        seed_run(&rig, id, if id <= 5 { "FAILURE" } else { "SUCCESS" });
    }
    load_all(&rig, 1..=10).await;

    let server = rig.ignited.server("apache").unwrap();
    let view = server
        .suite_run_history(SUITE, BRANCH)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.entry.runs, 10);
    assert!((view.fail_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(view.entry.critical_failures, 0);
}

#[tokio::test]
async fn critical_problems_drive_the_critical_fail_rate() {
    let rig = support::rig("apache").await;
    seed_run(&rig, 1, "SUCCESS");
    rig.upstream.upsert(
        MockBuild::finished(2, SUITE, BRANCH, "FAILURE")
            .with_tests(vec![test_occurrence(TEST, "FAILURE")])
            .with_problems(vec![ProblemOccurrenceDto {
                kind: "TC_EXECUTION_TIMEOUT".to_string(),
                identity: None,
            }])
            .with_start_date("20250101T020000+0000"),
    );
    load_all(&rig, 1..=2).await;

    let server = rig.ignited.server("apache").unwrap();
    let suite = server
        .suite_run_history(SUITE, BRANCH)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(suite.entry.critical_failures, 1);
    assert!((suite.critical_fail_rate - 0.5).abs() < f64::EPSILON);

    let test = server
        .test_run_history(TEST, SUITE, BRANCH)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(test.entry.critical_failures, 1);
}

#[tokio::test]
async fn reloading_without_upstream_change_never_double_counts() {
    let rig = support::rig("apache").await;
    seed_run(&rig, 1, "FAILURE");
    load_all(&rig, [1, 1, 1]).await;

    let server = rig.ignited.server("apache").unwrap();
    let view = server
        .suite_run_history(SUITE, BRANCH)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.entry.runs, 1);
    assert_eq!(view.entry.failures, 1);
}

#[tokio::test]
async fn unknown_keys_read_as_no_history() {
    let rig = support::rig("apache").await;
    let server = rig.ignited.server("apache").unwrap();
    assert!(server
        .test_run_history("never.ran.Test", SUITE, BRANCH)
        .await
        .unwrap()
        .is_none());
    assert!(server
        .suite_run_history("Never_Suite", BRANCH)
        .await
        .unwrap()
        .is_none());
}
