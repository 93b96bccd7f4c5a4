// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Work submission for poll runners and follow-up fetches.
//!
//! The host never decides where work runs; it hands each unit to a
//! [`FetchExecutor`]. Poll runners are long-lived units (they loop until
//! stopped), so an executor must not run units on a bounded pool smaller than
//! the number of connected streams times categories.

use std::sync::atomic::{AtomicU64, Ordering};

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Accepts units of work and runs them somewhere.
pub trait FetchExecutor: Send + Sync {
    fn execute(&self, job: Job);
}

/// A function-based executor.
impl<F> FetchExecutor for F
where
    F: Fn(Job) + Send + Sync,
{
    fn execute(&self, job: Job) {
        self(job)
    }
}

/// One OS thread per unit of work.
#[derive(Debug)]
pub struct ThreadExecutor {
    prefix: String,
    spawned: AtomicU64,
}

impl ThreadExecutor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            spawned: AtomicU64::new(0),
        }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("datastore-fetch")
    }
}

impl FetchExecutor for ThreadExecutor {
    fn execute(&self, job: Job) {
        let id = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.prefix, id);
        if let Err(e) = std::thread::Builder::new().name(name.clone()).spawn(job) {
            tracing::error!("Failed to spawn {}: {}", name, e);
        }
    }
}

/// Runs units on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime of the calling context.
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl FetchExecutor for TokioExecutor {
    fn execute(&self, job: Job) {
        // Detached: completion is observed through the datastore, not the JoinHandle
        drop(self.handle.spawn_blocking(job));
    }
}

/// Runs every unit on the submitting thread.
///
/// Only suitable for follow-up fetches in tests; a poll runner submitted here
/// would block the caller until stopped from another thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl FetchExecutor for InlineExecutor {
    fn execute(&self, job: Job) {
        job()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_inline_executor_runs_immediately() {
        let ran = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ran);
        InlineExecutor.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_executor_names_threads() {
        let executor = ThreadExecutor::new("unit");
        let (tx, rx) = mpsc::channel();
        executor.execute(Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("unit-0"));
    }

    #[test]
    fn test_closure_executor() {
        let submitted = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&submitted);
        let executor = move |job: Job| {
            seen.fetch_add(1, Ordering::SeqCst);
            job();
        };
        executor.execute(Box::new(|| {}));
        assert_eq!(submitted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tokio_executor_runs_on_blocking_pool() {
        let executor = TokioExecutor::current();
        let (tx, rx) = tokio::sync::oneshot::channel();
        executor.execute(Box::new(move || {
            let _ = tx.send(42);
        }));

        let value = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 42);
    }
}
