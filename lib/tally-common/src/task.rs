//! Helpers for working with asynchronous tasks.

use std::future::Future;

use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::Instrument as _;

/// Spawns a new asynchronous task, returning a [`JoinHandle`] for it.
///
/// This function is a thin wrapper over [`tokio::spawn`], and provides implicit "tracing" for spawned futures by
/// ensuring that the task is attached to the current `tracing` span.
#[track_caller]
pub fn spawn_traced<F, T>(f: F) -> JoinHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn(f.in_current_span())
}

/// Spawns a new named asynchronous task, returning a [`JoinHandle`] for it.
///
/// The task is attached to a child span of the current span, named `task`, with the given name recorded as the
/// `task_name` field.
pub fn spawn_traced_named<S, F, T>(name: S, f: F) -> JoinHandle<T>
where
    S: Into<String>,
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let task_name = name.into();
    tokio::task::spawn(f.instrument(tracing::debug_span!("task", task_name = %task_name)))
}

/// Helper trait for providing traced spawning when using `JoinSet<T>`.
pub trait JoinSetExt<T> {
    /// Spawns a new asynchronous task, returning an [`AbortHandle`] for it.
    ///
    /// This is meant to be a thin wrapper over [`JoinSet::spawn`], and provides implicit "tracing" for spawned futures
    /// by ensuring that the task is attached to the current `tracing` span.
    fn spawn_traced<F>(&mut self, f: F) -> AbortHandle
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static;
}

impl<T> JoinSetExt<T> for JoinSet<T> {
    fn spawn_traced<F>(&mut self, f: F) -> AbortHandle
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(f.in_current_span())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_tasks_run_to_completion() {
        let handle = spawn_traced(async { 40 + 2 });
        assert_eq!(handle.await.unwrap(), 42);

        let handle = spawn_traced_named("named", async { "done" });
        assert_eq!(handle.await.unwrap(), "done");

        let mut set = JoinSet::new();
        set.spawn_traced(async { 1 });
        set.spawn_traced(async { 2 });

        let mut total = 0;
        while let Some(result) = set.join_next().await {
            total += result.unwrap();
        }
        assert_eq!(total, 3);
    }
}
