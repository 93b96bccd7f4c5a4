// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memory category poller
//!
//! Besides the plain time series, the memory stream carries two kinds of
//! info records (allocation tracking, heap dumps) that the device reports
//! while still open and again once closed. The poller keeps at most one
//! pending record of each kind and reconciles it against the next batch so
//! that every record is written exactly once open and once closed.
//!
//! Closed legacy allocation samples need a follow-up fetch of their events
//! and of the classes/stacks those events reference. That fetch runs on the
//! [`FetchExecutor`] so it never delays the next poll cycle.

use super::{Checkpoint, Poller};
use crate::error::{ExceptionHandler, Result};
use crate::executor::FetchExecutor;
use crate::model::{AllocationStatus, AllocationsInfo, EndTime, HeapDumpInfo, Session};
use crate::rpc::{
    LegacyAllocationContextsRequest, LegacyAllocationEventsRequest, MemoryClient, MemoryRequest,
};
use crate::store::MemoryStatsStore;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Polls one stream's memory data into a [`MemoryStatsStore`].
pub struct MemoryDataPoller {
    session: Session,
    checkpoint: Checkpoint,
    pending_allocation_sample: Option<AllocationsInfo>,
    pending_heap_dump_sample: Option<HeapDumpInfo>,
    client: Arc<dyn MemoryClient>,
    table: Arc<dyn MemoryStatsStore>,
    fetch_executor: Arc<dyn FetchExecutor>,
    handler: ExceptionHandler,
}

impl MemoryDataPoller {
    pub fn new(
        session: Session,
        client: Arc<dyn MemoryClient>,
        table: Arc<dyn MemoryStatsStore>,
        fetch_executor: Arc<dyn FetchExecutor>,
        handler: ExceptionHandler,
    ) -> Self {
        Self {
            session,
            checkpoint: Checkpoint::new(),
            pending_allocation_sample: None,
            pending_heap_dump_sample: None,
            client,
            table,
            fetch_executor,
            handler,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn checkpoint(&self) -> i64 {
        self.checkpoint.get()
    }

    pub fn pending_allocation_sample(&self) -> Option<&AllocationsInfo> {
        self.pending_allocation_sample.as_ref()
    }

    pub fn pending_heap_dump_sample(&self) -> Option<&HeapDumpInfo> {
        self.pending_heap_dump_sample.as_ref()
    }

    /// Persist the allocation records of one batch.
    ///
    /// Closed records that need a follow-up fetch are appended to `to_fetch`.
    fn reconcile_allocations(
        &mut self,
        infos: &[AllocationsInfo],
        to_fetch: &mut Vec<AllocationsInfo>,
    ) -> Result<()> {
        for (i, info) in infos.iter().enumerate() {
            match self.pending_allocation_sample {
                Some(pending) => {
                    // The device resends the pending record first
                    debug_assert_eq!(i, 0, "pending allocation sample resent out of order");
                    debug_assert_eq!(pending.start_time, info.start_time);
                    if info.end_time.is_open() {
                        // Duplicate of what is already stored
                        break;
                    }
                    self.table
                        .insert_or_replace_allocations_info(&self.session, info)?;
                    to_fetch.push(*info);
                    self.pending_allocation_sample = None;
                }
                None => {
                    self.table
                        .insert_or_replace_allocations_info(&self.session, info)?;
                    if info.end_time.is_open() {
                        debug_assert_eq!(i, infos.len() - 1, "open allocation sample not last");
                        self.pending_allocation_sample = Some(*info);
                    } else {
                        to_fetch.push(*info);
                    }
                }
            }
        }
        Ok(())
    }

    fn reconcile_heap_dumps(&mut self, infos: &[HeapDumpInfo]) -> Result<()> {
        for (i, info) in infos.iter().enumerate() {
            match &self.pending_heap_dump_sample {
                Some(pending) => {
                    debug_assert_eq!(i, 0, "pending heap dump resent out of order");
                    debug_assert_eq!(pending.start_time, info.start_time);
                    if info.end_time.is_open() {
                        break;
                    }
                    self.table.insert_or_replace_heap_info(&self.session, info)?;
                    self.pending_heap_dump_sample = None;
                }
                None => {
                    self.table.insert_or_replace_heap_info(&self.session, info)?;
                    if info.end_time.is_open() {
                        debug_assert_eq!(i, infos.len() - 1, "open heap dump not last");
                        self.pending_heap_dump_sample = Some(info.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand the legacy event fetch for `samples` to the fetch executor.
    fn fetch_legacy_allocation_data(&self, samples: Vec<AllocationsInfo>) {
        if samples.is_empty() {
            return;
        }

        let session = self.session;
        let client = Arc::clone(&self.client);
        let table = Arc::clone(&self.table);
        let handler = Arc::clone(&self.handler);
        self.fetch_executor.execute(Box::new(move || {
            if let Err(e) = fetch_legacy_allocations(&session, &*client, &*table, &samples) {
                tracing::warn!(
                    "Legacy allocation fetch failed for session {}: {}",
                    session.session_id,
                    e
                );
                handler(&e);
            }
        }));
    }
}

/// Fetch events for every sample, then the contexts they reference.
///
/// Contexts are written before any event so that stored events never
/// reference a class or stack the table does not know.
fn fetch_legacy_allocations(
    session: &Session,
    client: &dyn MemoryClient,
    table: &dyn MemoryStatsStore,
    samples: &[AllocationsInfo],
) -> Result<()> {
    let mut class_ids = BTreeSet::new();
    let mut stack_ids = BTreeSet::new();
    let mut fetched = Vec::with_capacity(samples.len());

    for sample in samples {
        let EndTime::Closed(end_time) = sample.end_time else {
            continue;
        };
        let response = client.get_legacy_allocation_events(&LegacyAllocationEventsRequest {
            session: *session,
            start_time: sample.start_time,
            end_time,
        })?;
        for event in &response.events {
            class_ids.insert(event.class_id);
            stack_ids.insert(event.stack_id);
        }
        fetched.push((sample.start_time, response));
    }

    if fetched.is_empty() {
        return Ok(());
    }

    let contexts = client.get_legacy_allocation_contexts(&LegacyAllocationContextsRequest {
        session: *session,
        class_ids: class_ids.into_iter().collect(),
        stack_ids: stack_ids.into_iter().collect(),
    })?;
    table.insert_legacy_allocation_context(session, &contexts.classes, &contexts.stacks)?;

    for (start_time, response) in &fetched {
        table.update_legacy_allocation_events(session, *start_time, response)?;
    }

    tracing::debug!(
        "Stored legacy allocations for {} sample(s) of session {}",
        fetched.len(),
        session.session_id
    );
    Ok(())
}

impl Poller for MemoryDataPoller {
    fn poll(&mut self) -> Result<()> {
        let request = MemoryRequest {
            session: self.session,
            start_time: self.checkpoint.get(),
            end_time: EndTime::Open,
        };
        let response = self.client.get_data(&request)?;

        self.table
            .insert_memory(&self.session, &response.mem_samples)?;
        self.table
            .insert_alloc_stats(&self.session, &response.alloc_stats_samples)?;
        self.table
            .insert_gc_stats(&self.session, &response.gc_stats_samples)?;

        let mut to_fetch = Vec::new();
        self.reconcile_allocations(&response.allocations_info, &mut to_fetch)?;
        self.reconcile_heap_dumps(&response.heap_dump_infos)?;

        to_fetch.retain(|info| info.legacy);
        self.fetch_legacy_allocation_data(to_fetch);

        self.checkpoint.advance(response.end_timestamp);
        Ok(())
    }

    fn stop(&mut self) {
        // The device will never close these; persist them as failed
        if let Some(pending) = self.pending_heap_dump_sample.take() {
            let closed = HeapDumpInfo {
                end_time: EndTime::Closed(pending.start_time.saturating_add(1)),
                success: false,
                ..pending
            };
            if let Err(e) = self.table.insert_or_replace_heap_info(&self.session, &closed) {
                tracing::warn!("Failed to close pending heap dump: {}", e);
                (self.handler)(&e);
            }
        }

        if let Some(pending) = self.pending_allocation_sample.take() {
            if pending.legacy {
                let closed = AllocationsInfo {
                    end_time: EndTime::Closed(pending.start_time.saturating_add(1)),
                    status: AllocationStatus::FailureUnknown,
                    ..pending
                };
                if let Err(e) = self
                    .table
                    .insert_or_replace_allocations_info(&self.session, &closed)
                {
                    tracing::warn!("Failed to close pending allocation sample: {}", e);
                    (self.handler)(&e);
                }
            }
        }
    }
}
