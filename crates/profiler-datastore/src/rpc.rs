// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instrumentation RPC interface
//!
//! Abstract client interface for the device-side instrumentation service.
//! The datastore only depends on these traits; transports (gRPC, in-process,
//! adb forwarding) implement [`Channel`] and hand out per-category clients.
//!
//! # Integration
//!
//! ```ignore
//! impl Channel for GrpcChannel {
//!     fn memory_client(&self) -> Arc<dyn MemoryClient> {
//!         Arc::new(GrpcMemoryClient::new(self.inner.clone()))
//!     }
//!     // ...
//! }
//! ```

use crate::model::{
    AllocStatsSample, AllocatedClass, AllocationStack, AllocationsInfo, CpuUsageSample, EndTime,
    GcStatsSample, HeapDumpInfo, LegacyAllocationEvent, MemorySample, Session,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by instrumentation calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Call cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for RPC calls
pub type RpcResult<T> = Result<T, RpcError>;

// ============================================================================
// Messages
// ============================================================================

/// Memory data request: everything in `(start_time, end_time]` for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRequest {
    pub session: Session,
    pub start_time: i64,
    pub end_time: EndTime,
}

/// Batch of memory data returned by a poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryData {
    pub mem_samples: Vec<MemorySample>,
    pub alloc_stats_samples: Vec<AllocStatsSample>,
    pub gc_stats_samples: Vec<GcStatsSample>,
    pub allocations_info: Vec<AllocationsInfo>,
    pub heap_dump_infos: Vec<HeapDumpInfo>,
    /// Latest timestamp covered by this batch
    pub end_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAllocationEventsRequest {
    pub session: Session,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAllocationEventsResponse {
    pub events: Vec<LegacyAllocationEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAllocationContextsRequest {
    pub session: Session,
    pub class_ids: Vec<i32>,
    pub stack_ids: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAllocationContextsResponse {
    pub classes: Vec<AllocatedClass>,
    pub stacks: Vec<AllocationStack>,
}

/// CPU data request: everything in `(start_time, end_time]` for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuDataRequest {
    pub session: Session,
    pub start_time: i64,
    pub end_time: EndTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuData {
    pub usage_samples: Vec<CpuUsageSample>,
    pub end_timestamp: i64,
}

// ============================================================================
// Client traits
// ============================================================================

/// Blocking memory service client.
pub trait MemoryClient: Send + Sync {
    fn get_data(&self, request: &MemoryRequest) -> RpcResult<MemoryData>;

    fn get_legacy_allocation_events(
        &self,
        request: &LegacyAllocationEventsRequest,
    ) -> RpcResult<LegacyAllocationEventsResponse>;

    fn get_legacy_allocation_contexts(
        &self,
        request: &LegacyAllocationContextsRequest,
    ) -> RpcResult<LegacyAllocationContextsResponse>;
}

/// Blocking CPU service client.
pub trait CpuClient: Send + Sync {
    fn get_data(&self, request: &CpuDataRequest) -> RpcResult<CpuData>;
}

/// Connection to a single device stream.
pub trait Channel: Send + Sync {
    /// Bind a memory client to this channel
    fn memory_client(&self) -> Arc<dyn MemoryClient>;

    /// Bind a CPU client to this channel
    fn cpu_client(&self) -> Arc<dyn CpuClient>;

    /// Graceful shutdown: in-flight calls are allowed to complete
    fn shutdown(&self);

    /// Immediate shutdown: in-flight calls are cancelled
    fn shutdown_now(&self);

    fn is_shutdown(&self) -> bool;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Shutdown state of a [`MockChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockChannelState {
    Open,
    Draining,
    Terminated,
}

#[derive(Default)]
struct MockInstrumentationState {
    memory_responses: VecDeque<RpcResult<MemoryData>>,
    cpu_responses: VecDeque<RpcResult<CpuData>>,
    legacy_events: HashMap<i64, Vec<LegacyAllocationEvent>>,
    classes: HashMap<i32, AllocatedClass>,
    stacks: HashMap<i32, AllocationStack>,
    memory_requests: Vec<MemoryRequest>,
    cpu_requests: Vec<CpuDataRequest>,
    events_requests: Vec<LegacyAllocationEventsRequest>,
    contexts_requests: Vec<LegacyAllocationContextsRequest>,
}

/// Scripted instrumentation service shared by a mock channel's clients.
struct MockInstrumentation {
    state: parking_lot::Mutex<MockInstrumentationState>,
    channel_state: parking_lot::Mutex<MockChannelState>,
}

impl MockInstrumentation {
    fn check_open(&self) -> RpcResult<()> {
        match *self.channel_state.lock() {
            MockChannelState::Terminated => Err(RpcError::Cancelled),
            _ => Ok(()),
        }
    }
}

impl MemoryClient for MockInstrumentation {
    fn get_data(&self, request: &MemoryRequest) -> RpcResult<MemoryData> {
        self.check_open()?;
        let mut state = self.state.lock();
        state.memory_requests.push(request.clone());
        state.memory_responses.pop_front().unwrap_or_else(|| {
            Ok(MemoryData {
                end_timestamp: request.start_time,
                ..MemoryData::default()
            })
        })
    }

    fn get_legacy_allocation_events(
        &self,
        request: &LegacyAllocationEventsRequest,
    ) -> RpcResult<LegacyAllocationEventsResponse> {
        self.check_open()?;
        let mut state = self.state.lock();
        state.events_requests.push(request.clone());
        Ok(LegacyAllocationEventsResponse {
            events: state
                .legacy_events
                .get(&request.start_time)
                .cloned()
                .unwrap_or_default(),
        })
    }

    fn get_legacy_allocation_contexts(
        &self,
        request: &LegacyAllocationContextsRequest,
    ) -> RpcResult<LegacyAllocationContextsResponse> {
        self.check_open()?;
        let mut state = self.state.lock();
        state.contexts_requests.push(request.clone());
        let classes = request
            .class_ids
            .iter()
            .filter_map(|id| state.classes.get(id).cloned())
            .collect();
        let stacks = request
            .stack_ids
            .iter()
            .filter_map(|id| state.stacks.get(id).cloned())
            .collect();
        Ok(LegacyAllocationContextsResponse { classes, stacks })
    }
}

impl CpuClient for MockInstrumentation {
    fn get_data(&self, request: &CpuDataRequest) -> RpcResult<CpuData> {
        self.check_open()?;
        let mut state = self.state.lock();
        state.cpu_requests.push(request.clone());
        state.cpu_responses.pop_front().unwrap_or_else(|| {
            Ok(CpuData {
                usage_samples: Vec::new(),
                end_timestamp: request.start_time,
            })
        })
    }
}

/// Mock channel for testing without a device.
///
/// Responses are scripted in order; once the script runs out, polls return
/// an empty batch whose end timestamp echoes the request's start time.
#[derive(Clone)]
pub struct MockChannel {
    inner: Arc<MockInstrumentation>,
    bindings: Arc<AtomicUsize>,
}

impl MockChannel {
    /// Create a new mock channel
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInstrumentation {
                state: parking_lot::Mutex::new(MockInstrumentationState::default()),
                channel_state: parking_lot::Mutex::new(MockChannelState::Open),
            }),
            bindings: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue the next memory poll result
    pub fn push_memory_response(&self, response: RpcResult<MemoryData>) {
        self.inner.state.lock().memory_responses.push_back(response);
    }

    /// Queue the next CPU poll result
    pub fn push_cpu_response(&self, response: RpcResult<CpuData>) {
        self.inner.state.lock().cpu_responses.push_back(response);
    }

    /// Register the legacy events reported for the sample starting at `start_time`
    pub fn set_legacy_events(&self, start_time: i64, events: Vec<LegacyAllocationEvent>) {
        self.inner.state.lock().legacy_events.insert(start_time, events);
    }

    /// Register a class definition
    pub fn add_class(&self, class: AllocatedClass) {
        self.inner.state.lock().classes.insert(class.class_id, class);
    }

    /// Register a stack definition
    pub fn add_stack(&self, stack: AllocationStack) {
        self.inner.state.lock().stacks.insert(stack.stack_id, stack);
    }

    pub fn memory_requests(&self) -> Vec<MemoryRequest> {
        self.inner.state.lock().memory_requests.clone()
    }

    pub fn cpu_requests(&self) -> Vec<CpuDataRequest> {
        self.inner.state.lock().cpu_requests.clone()
    }

    pub fn events_requests(&self) -> Vec<LegacyAllocationEventsRequest> {
        self.inner.state.lock().events_requests.clone()
    }

    pub fn contexts_requests(&self) -> Vec<LegacyAllocationContextsRequest> {
        self.inner.state.lock().contexts_requests.clone()
    }

    /// Number of client handles bound on this channel
    pub fn binding_count(&self) -> usize {
        self.bindings.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> MockChannelState {
        *self.inner.channel_state.lock()
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for MockChannel {
    fn memory_client(&self) -> Arc<dyn MemoryClient> {
        self.bindings.fetch_add(1, Ordering::SeqCst);
        Arc::clone(&self.inner) as Arc<dyn MemoryClient>
    }

    fn cpu_client(&self) -> Arc<dyn CpuClient> {
        self.bindings.fetch_add(1, Ordering::SeqCst);
        Arc::clone(&self.inner) as Arc<dyn CpuClient>
    }

    fn shutdown(&self) {
        let mut state = self.inner.channel_state.lock();
        if *state == MockChannelState::Open {
            *state = MockChannelState::Draining;
        }
        tracing::debug!("MockChannel: shutdown ({:?})", *state);
    }

    fn shutdown_now(&self) {
        *self.inner.channel_state.lock() = MockChannelState::Terminated;
        tracing::debug!("MockChannel: shutdown_now");
    }

    fn is_shutdown(&self) -> bool {
        self.state() != MockChannelState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            session_id: 1,
            stream_id: 7,
            pid: 100,
            start_timestamp: 0,
        }
    }

    #[test]
    fn test_mock_scripted_memory_responses() {
        let channel = MockChannel::new();
        channel.push_memory_response(Ok(MemoryData {
            end_timestamp: 50,
            ..MemoryData::default()
        }));
        channel.push_memory_response(Err(RpcError::Unavailable("device gone".into())));

        let client = channel.memory_client();
        let request = MemoryRequest {
            session: session(),
            start_time: 10,
            end_time: EndTime::Open,
        };

        assert_eq!(client.get_data(&request).unwrap().end_timestamp, 50);
        assert!(client.get_data(&request).is_err());
        // Script exhausted: echo the lower bound
        assert_eq!(client.get_data(&request).unwrap().end_timestamp, 10);
        assert_eq!(channel.memory_requests().len(), 3);
    }

    #[test]
    fn test_mock_contexts_only_known_ids() {
        let channel = MockChannel::new();
        channel.add_class(AllocatedClass {
            class_id: 1,
            class_name: "java.lang.String".into(),
        });

        let client = channel.memory_client();
        let response = client
            .get_legacy_allocation_contexts(&LegacyAllocationContextsRequest {
                session: session(),
                class_ids: vec![1, 2],
                stack_ids: vec![9],
            })
            .unwrap();
        assert_eq!(response.classes.len(), 1);
        assert!(response.stacks.is_empty());
    }

    #[test]
    fn test_mock_shutdown_states() {
        let channel = MockChannel::new();
        let client = channel.cpu_client();
        assert_eq!(channel.binding_count(), 1);

        channel.shutdown();
        assert_eq!(channel.state(), MockChannelState::Draining);
        // Draining still answers in-flight calls
        let request = CpuDataRequest {
            session: session(),
            start_time: 0,
            end_time: EndTime::Open,
        };
        assert!(client.get_data(&request).is_ok());

        channel.shutdown_now();
        assert_eq!(client.get_data(&request), Err(RpcError::Cancelled));
    }
}
