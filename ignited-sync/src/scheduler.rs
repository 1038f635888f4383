//! Named coalescing background tasks
//!
//! The mirror's scheduling discipline: every background unit of work has a
//! name, and re-submitting a name while a task under it is still pending or
//! running coalesces instead of double-running. This is what keeps many
//! concurrent "ensure fresh" callers from stampeding the upstream with
//! duplicate fetches.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// What happened to a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submitted {
    /// A new task was spawned under the name
    Spawned,
    /// A task under the name was already pending/running; nothing spawned
    Coalesced,
}

/// Removes the name when the task finishes, unwinds, or is dropped, so a
/// panicking task can never wedge its name forever.
struct NamedTaskGuard {
    name: String,
    tasks: Arc<DashMap<String, ()>>,
}

impl Drop for NamedTaskGuard {
    fn drop(&mut self) {
        self.tasks.remove(&self.name);
    }
}

/// Bounded-by-name pool of background tasks on the tokio runtime.
#[derive(Clone, Default)]
pub struct TaskScheduler {
    tasks: Arc<DashMap<String, ()>>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("pending", &self.tasks.len())
            .finish()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` under `name`, unless a task under that name is already
    /// pending or running.
    pub fn submit_named<F>(&self, name: &str, fut: F) -> Submitted
    where
        F: Future<Output = ()> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry;
        match self.tasks.entry(name.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(task = name, "Coalesced redundant submission");
                Submitted::Coalesced
            }
            Entry::Vacant(entry) => {
                entry.insert(());
                let guard = NamedTaskGuard {
                    name: name.to_string(),
                    tasks: self.tasks.clone(),
                };
                tokio::spawn(async move {
                    let _guard = guard;
                    fut.await;
                });
                Submitted::Spawned
            }
        }
    }

    /// Like [`submit_named`](Self::submit_named) with an initial delay. The
    /// name is occupied for the whole delay, so re-arming a scheduled pass
    /// coalesces too.
    pub fn submit_named_after<F>(&self, name: &str, delay: Duration, fut: F) -> Submitted
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_named(name, async move {
            tokio::time::sleep(delay).await;
            fut.await;
        })
    }

    /// Whether a task under the name is pending or running.
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Number of pending/running named tasks.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn redundant_submissions_coalesce() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let first_runs = runs.clone();
        let first = scheduler.submit_named("sync-apache", async move {
            first_runs.fetch_add(1, Ordering::SeqCst);
            let _ = rx.await;
        });
        assert_eq!(first, Submitted::Spawned);

        // While the first is parked, every re-submission coalesces
        for _ in 0..5 {
            let extra_runs = runs.clone();
            let outcome = scheduler.submit_named("sync-apache", async move {
                extra_runs.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(outcome, Submitted::Coalesced);
        }
        assert!(scheduler.is_scheduled("sync-apache"));

        tx.send(()).unwrap();
        // Wait for the name to clear, then a fresh submission spawns again
        for _ in 0..100 {
            if !scheduler.is_scheduled("sync-apache") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let again_runs = runs.clone();
        let again = scheduler.submit_named("sync-apache", async move {
            again_runs.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(again, Submitted::Spawned);
    }

    #[tokio::test]
    async fn distinct_names_run_independently() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for lane in 0..4 {
            let lane_runs = runs.clone();
            let outcome = scheduler.submit_named(&format!("fat-build-lane-{lane}"), async move {
                lane_runs.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(outcome, Submitted::Spawned);
        }

        for _ in 0..100 {
            if runs.load(Ordering::SeqCst) == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }
}
