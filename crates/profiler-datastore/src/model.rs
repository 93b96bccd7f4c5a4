// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Profiling data model
//!
//! Streams, sessions, and the sample/info records exchanged with the
//! instrumentation service and persisted in the datastore.

use serde::{Deserialize, Serialize};

/// Stream id reserved for datastore metadata.
///
/// Events stored under this id are generated by the datastore itself
/// (stream connected / disconnected) rather than by a device.
pub const DATASTORE_RESERVED_STREAM_ID: i64 = -1;

/// Raw wire value of an unresolved end time.
pub const OPEN_END_TIME_RAW: i64 = i64::MAX;

/// A connected device/process endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Stream id (never 0)
    pub stream_id: i64,
    /// Process id of the profiled app
    pub pid: i32,
    /// Human readable device/process name
    pub name: String,
}

impl Stream {
    /// Create a new stream descriptor
    pub fn new(stream_id: i64, pid: i32, name: impl Into<String>) -> Self {
        Self {
            stream_id,
            pid,
            name: name.into(),
        }
    }
}

/// A profiling session scoped to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    /// Session id (monotonically assigned, never 0)
    pub session_id: i64,
    /// Owning stream
    pub stream_id: i64,
    /// Process id of the profiled app
    pub pid: i32,
    /// Session start (device nanoseconds)
    pub start_timestamp: i64,
}

/// End boundary of an info record.
///
/// Devices report an in-progress record with an open end time and resend
/// it with a closed one once the operation finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndTime {
    /// Still in progress
    Open,
    /// Finished at the given timestamp
    Closed(i64),
}

impl EndTime {
    /// Decode the raw wire/storage representation.
    pub fn from_raw(raw: i64) -> Self {
        if raw == OPEN_END_TIME_RAW {
            Self::Open
        } else {
            Self::Closed(raw)
        }
    }

    /// Encode to the raw wire/storage representation.
    pub fn to_raw(self) -> i64 {
        match self {
            Self::Open => OPEN_END_TIME_RAW,
            Self::Closed(ts) => ts,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Host-side change in a stream's connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEventKind {
    Connected,
    Disconnected,
}

impl StreamEventKind {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Connected => 1,
            Self::Disconnected => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Connected),
            2 => Some(Self::Disconnected),
            _ => None,
        }
    }
}

/// Datastore metadata event, stored under [`DATASTORE_RESERVED_STREAM_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Host wall clock, nanoseconds since the epoch
    pub timestamp: i64,
    pub kind: StreamEventKind,
    /// The stream the event is about
    pub stream: Stream,
}

// ============================================================================
// Memory
// ============================================================================

/// Memory usage breakdown at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemorySample {
    pub timestamp: i64,
    pub java_mem: i64,
    pub native_mem: i64,
    pub stack_mem: i64,
    pub graphics_mem: i64,
    pub code_mem: i64,
    pub others_mem: i64,
    pub total_mem: i64,
}

/// Cumulative allocation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocStatsSample {
    pub timestamp: i64,
    pub java_allocation_count: i64,
    pub java_free_count: i64,
}

/// A garbage collection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GcStatsSample {
    pub start_time: i64,
    pub end_time: i64,
}

/// Allocation tracking status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllocationStatus {
    #[default]
    Unspecified,
    InProgress,
    Completed,
    PostProcess,
    FailureUnknown,
}

impl AllocationStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Unspecified => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
            Self::PostProcess => 3,
            Self::FailureUnknown => 4,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::InProgress,
            2 => Self::Completed,
            3 => Self::PostProcess,
            4 => Self::FailureUnknown,
            _ => Self::Unspecified,
        }
    }
}

/// An allocation tracking session.
///
/// Legacy samples are bounded operations whose events must be fetched
/// explicitly once closed. Non-legacy samples stream continuously for the
/// lifetime of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationsInfo {
    pub start_time: i64,
    pub end_time: EndTime,
    pub legacy: bool,
    pub status: AllocationStatus,
}

/// A heap dump request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapDumpInfo {
    pub start_time: i64,
    pub end_time: EndTime,
    pub success: bool,
    pub file_name: String,
}

/// A single allocation recorded by legacy tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAllocationEvent {
    pub class_id: i32,
    pub stack_id: i32,
    pub thread_id: i32,
    pub size: i64,
    pub timestamp: i64,
}

/// Class referenced by allocation events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedClass {
    pub class_id: i32,
    pub class_name: String,
}

/// Call stack referenced by allocation events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStack {
    pub stack_id: i32,
    pub frames: Vec<String>,
}

// ============================================================================
// CPU
// ============================================================================

/// Process CPU usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpuUsageSample {
    pub timestamp: i64,
    pub elapsed_time_ms: i64,
    pub app_cpu_time_ms: i64,
    pub system_cpu_time_ms: i64,
}
