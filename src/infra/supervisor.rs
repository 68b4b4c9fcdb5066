//! Supervised background tasks
//!
//! Each long-running loop is spawned through `spawn_supervised`, which owns a
//! factory for the task future. Peripheral tasks (dashboard, notification
//! worker) are restarted after a panic; the sensing loop is spawned with
//! `RestartPolicy::Never` so a broken occupancy invariant takes the process
//! down instead of being silently retried.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Respawn after a panic, waiting `backoff` first
    OnPanic { backoff: Duration },
    Never,
}

/// How a supervised task finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    Completed,
    Panicked,
    Cancelled,
}

/// Spawn `make()` and keep it alive according to `policy`.
///
/// The returned handle resolves once the task completes normally, panics
/// under `RestartPolicy::Never`, or shutdown is signaled.
pub fn spawn_supervised<F, Fut>(
    name: &'static str,
    policy: RestartPolicy,
    shutdown: watch::Receiver<bool>,
    mut make: F,
) -> JoinHandle<TaskExit>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut restarts = 0u32;
        loop {
            info!(task = name, restarts = restarts, "task_started");
            match tokio::spawn(make()).await {
                Ok(()) => {
                    info!(task = name, "task_completed");
                    return TaskExit::Completed;
                }
                Err(e) if e.is_panic() => {
                    error!(task = name, restarts = restarts, "task_panicked");
                    let RestartPolicy::OnPanic { backoff } = policy else {
                        return TaskExit::Panicked;
                    };
                    if *shutdown.borrow() {
                        return TaskExit::Panicked;
                    }
                    warn!(task = name, backoff_ms = %backoff.as_millis(), "task_restarting");
                    tokio::time::sleep(backoff).await;
                    restarts += 1;
                }
                Err(_) => {
                    warn!(task = name, "task_cancelled");
                    return TaskExit::Cancelled;
                }
            }
        }
    })
}
