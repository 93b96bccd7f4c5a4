// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Profiler Datastore
//!
//! Polls profiling data from connected device streams and persists it into
//! SQLite namespaces, one poller per stream and data category.
//!
//! # Features
//!
//! - **Checkpointed polling** -- Each poll requests only data newer than the last batch
//! - **Open/closed reconciliation** -- In-progress records are written once open, once closed
//! - **Legacy allocation fetch** -- Follow-up event/context fetch off the poll path
//! - **Shared namespaces** -- Services declaring the same namespace share one database
//! - **Self-report** -- Periodic database size and record counts
//! - **Stream events** -- Connects and disconnects logged under the reserved stream id
//!
//! # Architecture
//!
//! ```text
//! DataStoreService
//! +-- DatabaseRegistry     (namespace -> SQLite database)
//! +-- MemoryService        (memory tables, queries, MemoryDataPoller)
//! +-- CpuService           (cpu table, queries, CpuDataPoller)
//! +-- Server               (in-process query server)
//! +-- StreamClientRegistry (stream id -> bound clients)
//! +-- PollRunner           (one per stream x category)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use profiler_datastore::{DataStoreService, DatastoreConfig, MockChannel, Stream};
//!
//! let config = DatastoreConfig::builder()
//!     .datastore_dir("/var/lib/profiler")
//!     .build();
//!
//! let datastore = DataStoreService::new(config)?;
//! datastore.connect(&Stream::new(1, 4242, "emulator-5554"), Arc::new(MockChannel::new()))?;
//! // ...
//! datastore.shutdown();
//! ```

pub mod client;
pub mod config;
pub mod datastore;
pub mod error;
pub mod executor;
pub mod model;
pub mod poller;
pub mod report;
pub mod rpc;
pub mod server;
pub mod service;
pub mod store;

pub use client::{StreamClient, StreamClientRegistry};
pub use config::{ConfigError, DatastoreConfig};
pub use datastore::{DataStoreService, DataStoreServiceBuilder};
pub use error::{default_exception_handler, DatastoreError, ExceptionHandler, Result};
pub use executor::{FetchExecutor, InlineExecutor, Job, ThreadExecutor, TokioExecutor};
pub use model::{
    EndTime, Session, Stream, StreamEvent, StreamEventKind, DATASTORE_RESERVED_STREAM_ID,
};
pub use poller::{Category, Checkpoint, CpuDataPoller, MemoryDataPoller, PollRunner, Poller};
pub use report::{collect_report, DbStats, ReportCallback, ReportTimer};
pub use rpc::{Channel, CpuClient, MemoryClient, MockChannel, RpcError};
pub use server::{BoundService, Interceptor, RpcHandler, Server, ServerError};
pub use service::{CpuService, MemoryService, PollerContext, ServicePassThrough};
pub use store::{BackingNamespace, Characteristic, Database, DatabaseRegistry, StreamEventTable};
