//! Outcome codes and window classification
//!
//! Pure functions over a bounded most-recent-first outcome window. The
//! motif templates distinguish a transient flake from a test that broke and
//! stayed broken; they scan the ordered window left-to-right (newest to
//! oldest) and report the first match.

use serde::{Deserialize, Serialize};

/// Outcome of one run of a test or suite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Success,
    Failure,
    /// Build-level breakage (timeout, JVM crash, OOM, bad exit code):
    /// counts against the run regardless of individual test results
    CriticalFailure,
}

impl RunOutcome {
    pub fn is_failure(self) -> bool {
        !matches!(self, RunOutcome::Success)
    }

    pub fn is_critical(self) -> bool {
        matches!(self, RunOutcome::CriticalFailure)
    }
}

/// Recognized shapes in an outcome window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlakyMotif {
    /// A streak of recent failures over an older all-pass tail: a new
    /// failure becoming stable, not a flake
    FailureStreakStabilizing,
    /// A single failure surrounded by passes: a transient flake
    IsolatedFailure,
}

/// First matching motif in a most-recent-first window, or `None`.
pub fn match_motif(outcomes: &[RunOutcome]) -> Option<FlakyMotif> {
    let leading_failures = outcomes
        .iter()
        .take_while(|outcome| outcome.is_failure())
        .count();
    if leading_failures >= 2
        && leading_failures < outcomes.len()
        && outcomes[leading_failures..]
            .iter()
            .all(|outcome| !outcome.is_failure())
    {
        return Some(FlakyMotif::FailureStreakStabilizing);
    }

    if outcomes.len() >= 3 && outcomes.iter().filter(|o| o.is_failure()).count() == 1 {
        let failure_at = outcomes
            .iter()
            .position(|outcome| outcome.is_failure())
            .unwrap_or(0);
        if failure_at > 0 && failure_at < outcomes.len() - 1 {
            return Some(FlakyMotif::IsolatedFailure);
        }
    }

    None
}

/// A window is flaky when it holds both a success and a failure, unless the
/// motif scan recognizes a failure streak stabilizing into permanent
/// failure.
pub fn is_flaky(outcomes: &[RunOutcome]) -> bool {
    let has_failure = outcomes.iter().any(|outcome| outcome.is_failure());
    let has_success = outcomes.iter().any(|outcome| !outcome.is_failure());
    has_failure
        && has_success
        && !matches!(
            match_motif(outcomes),
            Some(FlakyMotif::FailureStreakStabilizing)
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use RunOutcome::{CriticalFailure, Failure, Success};

    #[test]
    fn alternating_window_is_flaky() {
        let window = [Failure, Success, Failure, Success, Success];
        assert!(is_flaky(&window));
        assert_eq!(match_motif(&window), None);
    }

    #[test]
    fn failure_streak_over_passes_is_newly_broken_not_flaky() {
        let window = [Failure, Failure, Failure, Failure, Success, Success];
        assert_eq!(
            match_motif(&window),
            Some(FlakyMotif::FailureStreakStabilizing)
        );
        assert!(!is_flaky(&window));
    }

    #[test]
    fn single_surrounded_failure_is_an_isolated_flake() {
        let window = [Success, Failure, Success, Success];
        assert_eq!(match_motif(&window), Some(FlakyMotif::IsolatedFailure));
        assert!(is_flaky(&window));
    }

    #[test]
    fn monotonic_windows_are_not_flaky() {
        assert!(!is_flaky(&[Success, Success, Success]));
        assert!(!is_flaky(&[Failure, Failure, Failure]));
        assert!(!is_flaky(&[]));
    }

    #[test]
    fn newest_single_failure_has_no_motif_yet() {
        // Too early to tell a flake from the start of a breakage
        let window = [Failure, Success, Success];
        assert_eq!(match_motif(&window), None);
        assert!(is_flaky(&window));
    }

    #[test]
    fn critical_failures_count_as_failures() {
        let window = [CriticalFailure, CriticalFailure, Success, Success];
        assert_eq!(
            match_motif(&window),
            Some(FlakyMotif::FailureStreakStabilizing)
        );
        assert!(!is_flaky(&window));
    }
}
