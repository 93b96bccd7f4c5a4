// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datastore error types.

use crate::rpc::RpcError;
use std::sync::Arc;
use thiserror::Error;

/// Result type for datastore operations
pub type Result<T> = std::result::Result<T, DatastoreError>;

/// Errors raised by the datastore.
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stream id: {0}")]
    InvalidStream(i64),

    #[error("Database '{0}' is disconnected")]
    Disconnected(String),

    #[error("Backing store not set for service '{0}'")]
    NoBackingStore(String),

    #[error("Poll cycle panicked: {0}")]
    PollPanicked(String),

    #[error("Datastore has been shut down")]
    ShutDown,

    #[error("Server error: {0}")]
    Server(#[from] crate::server::ServerError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Consumer of errors that must be reported without personal data.
///
/// One handler is owned by each [`DataStoreService`](crate::DataStoreService)
/// and threaded into every runner and poller it creates.
pub type ExceptionHandler = Arc<dyn Fn(&DatastoreError) + Send + Sync>;

/// Handler that logs through `tracing`.
pub fn default_exception_handler() -> ExceptionHandler {
    Arc::new(|e: &DatastoreError| tracing::error!("Datastore error: {}", e))
}
