// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memory tables
//!
//! Time-series samples (memory, allocation counters, GC) are keyed by
//! `(session, timestamp)`; info records (allocation tracking, heap dumps)
//! are keyed by `(session, start_time)`. Every write is an
//! `INSERT OR REPLACE`, so re-delivering the same record across overlapping
//! poll windows is harmless.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE Memory_Samples (session, timestamp, java_mem, ..., PRIMARY KEY (session, timestamp));
//! CREATE TABLE Memory_AllocStats (session, timestamp, alloc_count, free_count, PRIMARY KEY (session, timestamp));
//! CREATE TABLE Memory_GcStats (session, start_time, end_time, PRIMARY KEY (session, start_time));
//! CREATE TABLE Memory_AllocationInfo (session, start_time, end_time, legacy, status, PRIMARY KEY (session, start_time));
//! CREATE TABLE Memory_HeapDumpInfo (session, start_time, end_time, success, file_name, PRIMARY KEY (session, start_time));
//! CREATE TABLE Memory_LegacyAllocatedClass (session, class_id, class_name, PRIMARY KEY (session, class_id));
//! CREATE TABLE Memory_LegacyAllocationStack (session, stack_id, frames, PRIMARY KEY (session, stack_id));
//! CREATE TABLE Memory_LegacyAllocationEvents (session, start_time, events, PRIMARY KEY (session, start_time));
//! ```

use crate::error::Result;
use crate::model::{
    AllocStatsSample, AllocatedClass, AllocationStack, AllocationStatus, AllocationsInfo, EndTime,
    GcStatsSample, HeapDumpInfo, LegacyAllocationEvent, MemorySample, Session,
};
use crate::rpc::{
    LegacyAllocationContextsRequest, LegacyAllocationContextsResponse,
    LegacyAllocationEventsRequest, LegacyAllocationEventsResponse, MemoryData, MemoryRequest,
};
use crate::store::Database;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

/// Write side of the memory tables, as used by the memory poller.
pub trait MemoryStatsStore: Send + Sync {
    fn insert_memory(&self, session: &Session, samples: &[MemorySample]) -> Result<()>;

    fn insert_alloc_stats(&self, session: &Session, samples: &[AllocStatsSample]) -> Result<()>;

    fn insert_gc_stats(&self, session: &Session, samples: &[GcStatsSample]) -> Result<()>;

    fn insert_or_replace_allocations_info(
        &self,
        session: &Session,
        info: &AllocationsInfo,
    ) -> Result<()>;

    fn insert_or_replace_heap_info(&self, session: &Session, info: &HeapDumpInfo) -> Result<()>;

    /// Persist class and stack definitions referenced by legacy events
    fn insert_legacy_allocation_context(
        &self,
        session: &Session,
        classes: &[AllocatedClass],
        stacks: &[AllocationStack],
    ) -> Result<()>;

    /// Attach the fetched events to the allocation sample starting at `start_time`
    fn update_legacy_allocation_events(
        &self,
        session: &Session,
        start_time: i64,
        response: &LegacyAllocationEventsResponse,
    ) -> Result<()>;
}

/// SQLite-backed memory tables.
pub struct MemoryStatsTable {
    db: Arc<Database>,
}

impl MemoryStatsTable {
    /// Bind to `db`, creating the tables if needed
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let table = Self { db };
        table.init_schema()?;
        Ok(table)
    }

    fn init_schema(&self) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS Memory_Samples (
                    session INTEGER NOT NULL,
                    timestamp INTEGER NOT NULL,
                    java_mem INTEGER NOT NULL,
                    native_mem INTEGER NOT NULL,
                    stack_mem INTEGER NOT NULL,
                    graphics_mem INTEGER NOT NULL,
                    code_mem INTEGER NOT NULL,
                    others_mem INTEGER NOT NULL,
                    total_mem INTEGER NOT NULL,
                    PRIMARY KEY (session, timestamp)
                );
                CREATE TABLE IF NOT EXISTS Memory_AllocStats (
                    session INTEGER NOT NULL,
                    timestamp INTEGER NOT NULL,
                    java_allocation_count INTEGER NOT NULL,
                    java_free_count INTEGER NOT NULL,
                    PRIMARY KEY (session, timestamp)
                );
                CREATE TABLE IF NOT EXISTS Memory_GcStats (
                    session INTEGER NOT NULL,
                    start_time INTEGER NOT NULL,
                    end_time INTEGER NOT NULL,
                    PRIMARY KEY (session, start_time)
                );
                CREATE TABLE IF NOT EXISTS Memory_AllocationInfo (
                    session INTEGER NOT NULL,
                    start_time INTEGER NOT NULL,
                    end_time INTEGER NOT NULL,
                    legacy INTEGER NOT NULL,
                    status INTEGER NOT NULL,
                    PRIMARY KEY (session, start_time)
                );
                CREATE TABLE IF NOT EXISTS Memory_HeapDumpInfo (
                    session INTEGER NOT NULL,
                    start_time INTEGER NOT NULL,
                    end_time INTEGER NOT NULL,
                    success INTEGER NOT NULL,
                    file_name TEXT NOT NULL,
                    PRIMARY KEY (session, start_time)
                );
                CREATE TABLE IF NOT EXISTS Memory_LegacyAllocatedClass (
                    session INTEGER NOT NULL,
                    class_id INTEGER NOT NULL,
                    class_name TEXT NOT NULL,
                    PRIMARY KEY (session, class_id)
                );
                CREATE TABLE IF NOT EXISTS Memory_LegacyAllocationStack (
                    session INTEGER NOT NULL,
                    stack_id INTEGER NOT NULL,
                    frames TEXT NOT NULL,
                    PRIMARY KEY (session, stack_id)
                );
                CREATE TABLE IF NOT EXISTS Memory_LegacyAllocationEvents (
                    session INTEGER NOT NULL,
                    start_time INTEGER NOT NULL,
                    events TEXT NOT NULL,
                    PRIMARY KEY (session, start_time)
                );",
            )?;
            Ok(())
        })
    }

    /// Range read for UI consumers.
    ///
    /// Samples are selected in `(start_time, end_time]`; info records are
    /// selected when they overlap the range (open records always overlap).
    pub fn get_data(&self, request: &MemoryRequest) -> Result<MemoryData> {
        let session = request.session.session_id;
        let start = request.start_time;
        let end = request.end_time.to_raw();

        self.db.with_connection(|conn| {
            let mem_samples = {
                let mut stmt = conn.prepare(
                    "SELECT timestamp, java_mem, native_mem, stack_mem, graphics_mem, code_mem,
                            others_mem, total_mem
                     FROM Memory_Samples
                     WHERE session = ?1 AND timestamp > ?2 AND timestamp <= ?3
                     ORDER BY timestamp ASC",
                )?;
                let rows = stmt.query_map(params![session, start, end], |row| {
                    Ok(MemorySample {
                        timestamp: row.get(0)?,
                        java_mem: row.get(1)?,
                        native_mem: row.get(2)?,
                        stack_mem: row.get(3)?,
                        graphics_mem: row.get(4)?,
                        code_mem: row.get(5)?,
                        others_mem: row.get(6)?,
                        total_mem: row.get(7)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let alloc_stats_samples = {
                let mut stmt = conn.prepare(
                    "SELECT timestamp, java_allocation_count, java_free_count
                     FROM Memory_AllocStats
                     WHERE session = ?1 AND timestamp > ?2 AND timestamp <= ?3
                     ORDER BY timestamp ASC",
                )?;
                let rows = stmt.query_map(params![session, start, end], |row| {
                    Ok(AllocStatsSample {
                        timestamp: row.get(0)?,
                        java_allocation_count: row.get(1)?,
                        java_free_count: row.get(2)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let gc_stats_samples = {
                let mut stmt = conn.prepare(
                    "SELECT start_time, end_time
                     FROM Memory_GcStats
                     WHERE session = ?1 AND start_time > ?2 AND start_time <= ?3
                     ORDER BY start_time ASC",
                )?;
                let rows = stmt.query_map(params![session, start, end], |row| {
                    Ok(GcStatsSample {
                        start_time: row.get(0)?,
                        end_time: row.get(1)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let allocations_info = {
                let mut stmt = conn.prepare(
                    "SELECT start_time, end_time, legacy, status
                     FROM Memory_AllocationInfo
                     WHERE session = ?1 AND end_time > ?2 AND start_time <= ?3
                     ORDER BY start_time ASC",
                )?;
                let rows = stmt.query_map(params![session, start, end], |row| {
                    Ok(AllocationsInfo {
                        start_time: row.get(0)?,
                        end_time: EndTime::from_raw(row.get(1)?),
                        legacy: row.get(2)?,
                        status: AllocationStatus::from_i64(row.get(3)?),
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let heap_dump_infos = {
                let mut stmt = conn.prepare(
                    "SELECT start_time, end_time, success, file_name
                     FROM Memory_HeapDumpInfo
                     WHERE session = ?1 AND end_time > ?2 AND start_time <= ?3
                     ORDER BY start_time ASC",
                )?;
                let rows = stmt.query_map(params![session, start, end], |row| {
                    Ok(HeapDumpInfo {
                        start_time: row.get(0)?,
                        end_time: EndTime::from_raw(row.get(1)?),
                        success: row.get(2)?,
                        file_name: row.get(3)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let end_timestamp = mem_samples
                .iter()
                .map(|s| s.timestamp)
                .chain(alloc_stats_samples.iter().map(|s| s.timestamp))
                .chain(gc_stats_samples.iter().map(|s| s.start_time))
                .max()
                .unwrap_or(start);

            Ok(MemoryData {
                mem_samples,
                alloc_stats_samples,
                gc_stats_samples,
                allocations_info,
                heap_dump_infos,
                end_timestamp,
            })
        })
    }

    /// Events previously attached to the sample starting at `request.start_time`
    pub fn get_legacy_allocation_events(
        &self,
        request: &LegacyAllocationEventsRequest,
    ) -> Result<LegacyAllocationEventsResponse> {
        let blob: Option<String> = self.db.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT events FROM Memory_LegacyAllocationEvents
                     WHERE session = ?1 AND start_time = ?2",
                    params![request.session.session_id, request.start_time],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        let events: Vec<LegacyAllocationEvent> = match blob {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        Ok(LegacyAllocationEventsResponse { events })
    }

    /// Class/stack definitions for the requested ids; unknown ids are skipped
    pub fn get_legacy_allocation_contexts(
        &self,
        request: &LegacyAllocationContextsRequest,
    ) -> Result<LegacyAllocationContextsResponse> {
        let session = request.session.session_id;
        let (classes, stack_blobs) = self.db.with_connection(|conn| {
            let mut classes = Vec::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT class_id, class_name FROM Memory_LegacyAllocatedClass
                     WHERE session = ?1 AND class_id = ?2",
                )?;
                for id in &request.class_ids {
                    let class = stmt
                        .query_row(params![session, id], |row| {
                            Ok(AllocatedClass {
                                class_id: row.get(0)?,
                                class_name: row.get(1)?,
                            })
                        })
                        .optional()?;
                    classes.extend(class);
                }
            }

            let mut stacks = Vec::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT stack_id, frames FROM Memory_LegacyAllocationStack
                     WHERE session = ?1 AND stack_id = ?2",
                )?;
                for id in &request.stack_ids {
                    let stack = stmt
                        .query_row(params![session, id], |row| {
                            Ok((row.get::<_, i32>(0)?, row.get::<_, String>(1)?))
                        })
                        .optional()?;
                    stacks.extend(stack);
                }
            }
            Ok((classes, stacks))
        })?;

        let stacks = stack_blobs
            .into_iter()
            .map(|(stack_id, frames)| {
                Ok(AllocationStack {
                    stack_id,
                    frames: serde_json::from_str(&frames)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(LegacyAllocationContextsResponse { classes, stacks })
    }
}

impl MemoryStatsStore for MemoryStatsTable {
    fn insert_memory(&self, session: &Session, samples: &[MemorySample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO Memory_Samples
                     (session, timestamp, java_mem, native_mem, stack_mem, graphics_mem,
                      code_mem, others_mem, total_mem)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for s in samples {
                    stmt.execute(params![
                        session.session_id,
                        s.timestamp,
                        s.java_mem,
                        s.native_mem,
                        s.stack_mem,
                        s.graphics_mem,
                        s.code_mem,
                        s.others_mem,
                        s.total_mem,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn insert_alloc_stats(&self, session: &Session, samples: &[AllocStatsSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO Memory_AllocStats
                     (session, timestamp, java_allocation_count, java_free_count)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for s in samples {
                    stmt.execute(params![
                        session.session_id,
                        s.timestamp,
                        s.java_allocation_count,
                        s.java_free_count,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn insert_gc_stats(&self, session: &Session, samples: &[GcStatsSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO Memory_GcStats (session, start_time, end_time)
                     VALUES (?1, ?2, ?3)",
                )?;
                for s in samples {
                    stmt.execute(params![session.session_id, s.start_time, s.end_time])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn insert_or_replace_allocations_info(
        &self,
        session: &Session,
        info: &AllocationsInfo,
    ) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO Memory_AllocationInfo
                 (session, start_time, end_time, legacy, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.session_id,
                    info.start_time,
                    info.end_time.to_raw(),
                    info.legacy,
                    info.status.as_i64(),
                ],
            )?;
            Ok(())
        })
    }

    fn insert_or_replace_heap_info(&self, session: &Session, info: &HeapDumpInfo) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO Memory_HeapDumpInfo
                 (session, start_time, end_time, success, file_name)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.session_id,
                    info.start_time,
                    info.end_time.to_raw(),
                    info.success,
                    info.file_name,
                ],
            )?;
            Ok(())
        })
    }

    fn insert_legacy_allocation_context(
        &self,
        session: &Session,
        classes: &[AllocatedClass],
        stacks: &[AllocationStack],
    ) -> Result<()> {
        let stack_rows = stacks
            .iter()
            .map(|s| Ok((s.stack_id, serde_json::to_string(&s.frames)?)))
            .collect::<Result<Vec<_>>>()?;

        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO Memory_LegacyAllocatedClass
                     (session, class_id, class_name) VALUES (?1, ?2, ?3)",
                )?;
                for class in classes {
                    stmt.execute(params![session.session_id, class.class_id, class.class_name])?;
                }

                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO Memory_LegacyAllocationStack
                     (session, stack_id, frames) VALUES (?1, ?2, ?3)",
                )?;
                for (stack_id, frames) in &stack_rows {
                    stmt.execute(params![session.session_id, stack_id, frames])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn update_legacy_allocation_events(
        &self,
        session: &Session,
        start_time: i64,
        response: &LegacyAllocationEventsResponse,
    ) -> Result<()> {
        let events = serde_json::to_string(&response.events)?;
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO Memory_LegacyAllocationEvents
                 (session, start_time, events) VALUES (?1, ?2, ?3)",
                params![session.session_id, start_time, events],
            )?;
            Ok(())
        })
    }
}
