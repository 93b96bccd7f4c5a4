// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic datastore self-report
//!
//! Collects the age of the datastore, the size of the shared database file
//! and per-table record counts, and hands the result to a [`ReportCallback`].
//! Collection is best-effort: a failing database is skipped.

use crate::store::{BackingNamespace, DatabaseRegistry, TableStats};
use crossbeam::channel::{self, Sender};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Delay before the first report
pub const REPORT_INITIAL_DELAY: Duration = Duration::from_secs(15 * 60);
/// Delay between two reports
pub const REPORT_PERIOD: Duration = Duration::from_secs(60 * 60);

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Snapshot of datastore usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbStats {
    /// Seconds since the datastore was created
    pub age_sec: u64,
    /// Size of the shared database file
    pub total_disk_mb: u64,
    pub tables: Vec<TableStatsReport>,
}

/// Record count of one table, tagged with its database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatsReport {
    pub database: String,
    pub table: String,
    pub num_records: u64,
}

/// Receives each self-report.
pub type ReportCallback = Arc<dyn Fn(&DbStats) + Send + Sync>;

/// Callback that logs the report through `tracing`.
pub fn log_report_callback() -> ReportCallback {
    Arc::new(|stats: &DbStats| {
        let records: u64 = stats.tables.iter().map(|t| t.num_records).sum();
        tracing::info!(
            age_sec = stats.age_sec,
            total_disk_mb = stats.total_disk_mb,
            tables = stats.tables.len(),
            records,
            "Datastore report"
        );
    })
}

/// Gather a report over every database in `registry`.
pub fn collect_report(registry: &DatabaseRegistry, started: Instant) -> DbStats {
    let shared = registry
        .root()
        .join(BackingNamespace::DEFAULT_SHARED_NAME);

    let mut tables = Vec::new();
    let mut databases = registry.databases();
    databases.sort_by(|a, b| a.0.name.cmp(&b.0.name));
    for (namespace, db) in databases {
        match db.table_stats() {
            Ok(stats) => tables.extend(stats.into_iter().map(|TableStats { name, num_records }| {
                TableStatsReport {
                    database: namespace.name.clone(),
                    table: name,
                    num_records,
                }
            })),
            Err(e) => {
                tracing::debug!("Skipping '{}' in datastore report: {}", namespace.name, e);
            }
        }
    }

    DbStats {
        age_sec: started.elapsed().as_secs(),
        total_disk_mb: file_size_mb(&shared),
        tables,
    }
}

fn file_size_mb(path: &Path) -> u64 {
    std::fs::metadata(path)
        .map(|m| m.len() / BYTES_PER_MB)
        .unwrap_or(0)
}

/// Background thread running a task on a fixed schedule.
///
/// The first run happens after `initial_delay`, then every `period`.
/// [`cancel`](Self::cancel) interrupts any pending wait.
pub struct ReportTimer {
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ReportTimer {
    pub fn start<F>(initial_delay: Duration, period: Duration, task: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (cancel, cancelled) = channel::bounded::<()>(0);
        let worker = std::thread::Builder::new()
            .name("datastore-report".to_string())
            .spawn(move || {
                let due = channel::select! {
                    recv(cancelled) -> _ => false,
                    recv(channel::after(initial_delay)) -> _ => true,
                };
                if !due {
                    return;
                }
                task();

                let ticker = channel::tick(period);
                loop {
                    let due = channel::select! {
                        recv(cancelled) -> _ => false,
                        recv(ticker) -> _ => true,
                    };
                    if !due {
                        break;
                    }
                    task();
                }
            })?;

        Ok(Self {
            cancel: Some(cancel),
            worker: Some(worker),
        })
    }

    /// A timer that never fires.
    pub fn disabled() -> Self {
        Self {
            cancel: None,
            worker: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop the timer and wait for the worker to exit. Idempotent.
    pub fn cancel(&mut self) {
        // Dropping the sender disconnects the cancel channel
        self.cancel.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("Datastore report task panicked");
            }
        }
    }
}

impl Drop for ReportTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
