// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CPU usage table.

use crate::error::Result;
use crate::model::{CpuUsageSample, Session};
use crate::rpc::{CpuData, CpuDataRequest};
use crate::store::Database;
use rusqlite::params;
use std::sync::Arc;

/// SQLite-backed CPU usage samples, keyed by `(session, timestamp)`.
pub struct CpuUsageTable {
    db: Arc<Database>,
}

impl CpuUsageTable {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        db.with_connection(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS Cpu_Usage (
                    session INTEGER NOT NULL,
                    timestamp INTEGER NOT NULL,
                    elapsed_time_ms INTEGER NOT NULL,
                    app_cpu_time_ms INTEGER NOT NULL,
                    system_cpu_time_ms INTEGER NOT NULL,
                    PRIMARY KEY (session, timestamp)
                )",
                [],
            )?;
            Ok(())
        })?;
        Ok(Self { db })
    }

    pub fn insert_cpu_usage(&self, session: &Session, samples: &[CpuUsageSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO Cpu_Usage
                     (session, timestamp, elapsed_time_ms, app_cpu_time_ms, system_cpu_time_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for s in samples {
                    stmt.execute(params![
                        session.session_id,
                        s.timestamp,
                        s.elapsed_time_ms,
                        s.app_cpu_time_ms,
                        s.system_cpu_time_ms,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Samples in `(start_time, end_time]`
    pub fn get_cpu_usage(&self, request: &CpuDataRequest) -> Result<CpuData> {
        let usage_samples = self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, elapsed_time_ms, app_cpu_time_ms, system_cpu_time_ms
                 FROM Cpu_Usage
                 WHERE session = ?1 AND timestamp > ?2 AND timestamp <= ?3
                 ORDER BY timestamp ASC",
            )?;
            let rows = stmt.query_map(
                params![
                    request.session.session_id,
                    request.start_time,
                    request.end_time.to_raw()
                ],
                |row| {
                    Ok(CpuUsageSample {
                        timestamp: row.get(0)?,
                        elapsed_time_ms: row.get(1)?,
                        app_cpu_time_ms: row.get(2)?,
                        system_cpu_time_ms: row.get(3)?,
                    })
                },
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        let end_timestamp = usage_samples
            .last()
            .map(|s| s.timestamp)
            .unwrap_or(request.start_time);
        Ok(CpuData {
            usage_samples,
            end_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EndTime;

    #[test]
    fn test_cpu_usage_upsert_and_range() {
        let db = Arc::new(Database::open_in_memory("cpu-test").unwrap());
        let table = CpuUsageTable::new(db).unwrap();
        let session = Session {
            session_id: 1,
            stream_id: 1,
            pid: 1,
            start_timestamp: 0,
        };

        let samples: Vec<_> = (1..=5)
            .map(|i| CpuUsageSample {
                timestamp: i * 100,
                elapsed_time_ms: i,
                ..CpuUsageSample::default()
            })
            .collect();
        table.insert_cpu_usage(&session, &samples).unwrap();
        table.insert_cpu_usage(&session, &samples[3..]).unwrap();

        let data = table
            .get_cpu_usage(&CpuDataRequest {
                session,
                start_time: 200,
                end_time: EndTime::Closed(400),
            })
            .unwrap();
        assert_eq!(data.usage_samples.len(), 2);
        assert_eq!(data.end_timestamp, 400);

        let all = table
            .get_cpu_usage(&CpuDataRequest {
                session,
                start_time: i64::MIN,
                end_time: EndTime::Open,
            })
            .unwrap();
        assert_eq!(all.usage_samples.len(), 5);
    }
}
