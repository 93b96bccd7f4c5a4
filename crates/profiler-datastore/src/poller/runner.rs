// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-cadence poll loop.
//!
//! A runner repeatedly calls [`Poller::poll`] with [`POLLING_DELAY`] between
//! cycles until [`PollRunner::stop`] is called. A failing or panicking cycle
//! is reported to the exception handler and never ends the loop.
//!
//! Stop semantics:
//! - `stop()` wakes a sleeping runner immediately.
//! - `stop()` waits for an in-flight cycle, then runs [`Poller::stop`] once.
//! - No cycle starts after `stop()` returns.

use super::Poller;
use crate::error::{DatastoreError, ExceptionHandler};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Delay between two poll cycles.
pub const POLLING_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct RunnerStats {
    cycles: AtomicU64,
    failures: AtomicU64,
    panics: AtomicU64,
}

/// Point-in-time copy of runner counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStatsSnapshot {
    pub cycles: u64,
    pub failures: u64,
    pub panics: u64,
}

/// Drives one poller on a dedicated unit of work.
pub struct PollRunner {
    name: String,
    delay: Duration,
    poller: Mutex<Box<dyn Poller>>,
    stopped: Mutex<bool>,
    wake: Condvar,
    stats: RunnerStats,
    handler: ExceptionHandler,
}

impl PollRunner {
    pub fn new(
        name: impl Into<String>,
        delay: Duration,
        poller: Box<dyn Poller>,
        handler: ExceptionHandler,
    ) -> Self {
        Self {
            name: name.into(),
            delay,
            poller: Mutex::new(poller),
            stopped: Mutex::new(false),
            wake: Condvar::new(),
            stats: RunnerStats::default(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    pub fn stats(&self) -> RunnerStatsSnapshot {
        RunnerStatsSnapshot {
            cycles: self.stats.cycles.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            panics: self.stats.panics.load(Ordering::Relaxed),
        }
    }

    /// Poll until stopped. Blocks the calling thread.
    pub fn run(&self) {
        tracing::debug!("Poll runner '{}' started", self.name);

        while !self.is_stopped() {
            self.run_cycle();
            self.sleep();
        }

        tracing::debug!("Poll runner '{}' exited", self.name);
    }

    /// Execute a single cycle unless the runner is stopped.
    ///
    /// Returns `false` if the runner was stopped before the cycle started.
    pub fn run_cycle(&self) -> bool {
        let mut poller = self.poller.lock();
        // stop() raises the flag before taking the poller lock
        if self.is_stopped() {
            return false;
        }

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        match panic::catch_unwind(AssertUnwindSafe(|| poller.poll())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Poll cycle '{}' failed: {}", self.name, e);
                (self.handler)(&e);
            }
            Err(payload) => {
                self.stats.panics.fetch_add(1, Ordering::Relaxed);
                let e = DatastoreError::PollPanicked(panic_message(payload.as_ref()));
                tracing::error!("Poll cycle '{}' panicked: {}", self.name, e);
                (self.handler)(&e);
            }
        }
        true
    }

    fn sleep(&self) {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            let _ = self.wake.wait_for(&mut stopped, self.delay);
        }
    }

    /// Stop polling and finalize the poller. Idempotent.
    pub fn stop(&self) {
        {
            let mut stopped = self.stopped.lock();
            if *stopped {
                return;
            }
            *stopped = true;
            self.wake.notify_all();
        }

        // Waits out any in-flight cycle
        let mut poller = self.poller.lock();
        if panic::catch_unwind(AssertUnwindSafe(|| poller.stop())).is_err() {
            tracing::error!("Poller '{}' panicked while stopping", self.name);
        }
        tracing::debug!("Poll runner '{}' stopped", self.name);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
