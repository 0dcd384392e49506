//! Task spawning abstraction for single-threaded fibers.

use async_trait::async_trait;
use std::future::Future;

/// Provider for spawning local tasks in a single-threaded context.
///
/// Fibers, channels and sessions are `!Send` (`Rc`/`RefCell` state), so every
/// background task runs on the current thread's `LocalSet`.
#[async_trait(?Send)]
pub trait TaskProvider: Clone {
    /// Spawn a named task on the current thread.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;

    /// Yield control to let other tasks on the run loop make progress.
    async fn yield_now(&self);
}

/// Tokio implementation of [`TaskProvider`] backed by `spawn_local`.
///
/// Must be used from within a `tokio::task::LocalSet`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTaskProvider;

#[async_trait(?Send)]
impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!(task = %task_name, "task started");
            future.await;
            tracing::trace!(task = %task_name, "task finished");
        })
    }

    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }
}
