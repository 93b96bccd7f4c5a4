// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memory category service.

use super::{PollerContext, ServicePassThrough};
use crate::client::StreamClient;
use crate::error::{default_exception_handler, DatastoreError, ExceptionHandler, Result};
use crate::model::Session;
use crate::poller::{Category, MemoryDataPoller, Poller};
use crate::rpc::{
    LegacyAllocationContextsRequest, LegacyAllocationContextsResponse,
    LegacyAllocationEventsRequest, LegacyAllocationEventsResponse, MemoryData, MemoryRequest,
};
use crate::server::{dispatch_json, BoundService, RpcHandler, ServerError};
use crate::store::{BackingNamespace, Database, MemoryStatsStore, MemoryStatsTable};
use parking_lot::RwLock;
use std::sync::Arc;

/// Memory query methods
pub mod methods {
    pub const GET_DATA: &str = "GetData";
    pub const GET_LEGACY_ALLOCATION_EVENTS: &str = "GetLegacyAllocationEvents";
    pub const GET_LEGACY_ALLOCATION_CONTEXTS: &str = "GetLegacyAllocationContexts";
}

/// Owns the memory tables.
pub struct MemoryService {
    table: RwLock<Option<Arc<MemoryStatsTable>>>,
    handler: RwLock<ExceptionHandler>,
}

impl MemoryService {
    pub const SERVICE_NAME: &'static str = "MemoryService";

    pub fn new() -> Self {
        Self {
            table: RwLock::new(None),
            handler: RwLock::new(default_exception_handler()),
        }
    }

    /// Surface a failed query to the exception handler
    fn reported<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::warn!("MemoryService query failed: {}", e);
            let handler = Arc::clone(&*self.handler.read());
            handler(e);
        }
        result
    }

    fn table(&self) -> Result<Arc<MemoryStatsTable>> {
        self.table
            .read()
            .clone()
            .ok_or_else(|| DatastoreError::NoBackingStore(Self::SERVICE_NAME.to_string()))
    }

    pub fn get_data(&self, request: &MemoryRequest) -> Result<MemoryData> {
        self.table()?.get_data(request)
    }

    pub fn get_legacy_allocation_events(
        &self,
        request: &LegacyAllocationEventsRequest,
    ) -> Result<LegacyAllocationEventsResponse> {
        self.table()?.get_legacy_allocation_events(request)
    }

    pub fn get_legacy_allocation_contexts(
        &self,
        request: &LegacyAllocationContextsRequest,
    ) -> Result<LegacyAllocationContextsResponse> {
        self.table()?.get_legacy_allocation_contexts(request)
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcHandler for MemoryService {
    fn handle(&self, method: &str, payload: &[u8]) -> std::result::Result<Vec<u8>, ServerError> {
        match method {
            methods::GET_DATA => dispatch_json(payload, |req: MemoryRequest| {
                self.reported(self.get_data(&req))
            }),
            methods::GET_LEGACY_ALLOCATION_EVENTS => {
                dispatch_json(payload, |req: LegacyAllocationEventsRequest| {
                    self.reported(self.get_legacy_allocation_events(&req))
                })
            }
            methods::GET_LEGACY_ALLOCATION_CONTEXTS => {
                dispatch_json(payload, |req: LegacyAllocationContextsRequest| {
                    self.reported(self.get_legacy_allocation_contexts(&req))
                })
            }
            _ => Err(ServerError::UnknownMethod {
                service: Self::SERVICE_NAME.to_string(),
                method: method.to_string(),
            }),
        }
    }
}

impl ServicePassThrough for MemoryService {
    fn name(&self) -> &str {
        Self::SERVICE_NAME
    }

    fn category(&self) -> Category {
        Category::Memory
    }

    fn set_backing_store(&self, namespace: &BackingNamespace, db: Arc<Database>) -> Result<()> {
        let table = MemoryStatsTable::new(db)?;
        *self.table.write() = Some(Arc::new(table));
        tracing::debug!("MemoryService backed by '{}'", namespace.name);
        Ok(())
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        *self.handler.write() = handler;
    }

    fn bind_service(self: Arc<Self>) -> BoundService {
        BoundService::new(Self::SERVICE_NAME, self)
    }

    fn create_poller(
        &self,
        session: Session,
        client: &StreamClient,
        context: &PollerContext,
    ) -> Result<Option<Box<dyn Poller>>> {
        let table: Arc<dyn MemoryStatsStore> = self.table()?;
        Ok(Some(Box::new(MemoryDataPoller::new(
            session,
            client.memory(),
            table,
            Arc::clone(&context.fetch_executor),
            Arc::clone(&context.exception_handler),
        ))))
    }
}
