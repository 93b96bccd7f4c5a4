// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CPU category service.

use super::{PollerContext, ServicePassThrough};
use crate::client::StreamClient;
use crate::error::{default_exception_handler, DatastoreError, ExceptionHandler, Result};
use crate::model::Session;
use crate::poller::{Category, CpuDataPoller, Poller};
use crate::rpc::{CpuData, CpuDataRequest};
use crate::server::{dispatch_json, BoundService, RpcHandler, ServerError};
use crate::store::{BackingNamespace, CpuUsageTable, Database};
use parking_lot::RwLock;
use std::sync::Arc;

/// Owns the CPU usage table.
pub struct CpuService {
    table: RwLock<Option<Arc<CpuUsageTable>>>,
    handler: RwLock<ExceptionHandler>,
}

impl CpuService {
    pub const SERVICE_NAME: &'static str = "CpuService";
    pub const GET_DATA: &'static str = "GetData";

    pub fn new() -> Self {
        Self {
            table: RwLock::new(None),
            handler: RwLock::new(default_exception_handler()),
        }
    }

    fn table(&self) -> Result<Arc<CpuUsageTable>> {
        self.table
            .read()
            .clone()
            .ok_or_else(|| DatastoreError::NoBackingStore(Self::SERVICE_NAME.to_string()))
    }

    pub fn get_data(&self, request: &CpuDataRequest) -> Result<CpuData> {
        self.table()?.get_cpu_usage(request)
    }
}

impl Default for CpuService {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcHandler for CpuService {
    fn handle(&self, method: &str, payload: &[u8]) -> std::result::Result<Vec<u8>, ServerError> {
        match method {
            Self::GET_DATA => dispatch_json(payload, |req: CpuDataRequest| {
                let result = self.get_data(&req);
                if let Err(e) = &result {
                    tracing::warn!("CpuService query failed: {}", e);
                    let handler = Arc::clone(&*self.handler.read());
                    handler(e);
                }
                result
            }),
            _ => Err(ServerError::UnknownMethod {
                service: Self::SERVICE_NAME.to_string(),
                method: method.to_string(),
            }),
        }
    }
}

impl ServicePassThrough for CpuService {
    fn name(&self) -> &str {
        Self::SERVICE_NAME
    }

    fn category(&self) -> Category {
        Category::Cpu
    }

    fn set_backing_store(&self, namespace: &BackingNamespace, db: Arc<Database>) -> Result<()> {
        *self.table.write() = Some(Arc::new(CpuUsageTable::new(db)?));
        tracing::debug!("CpuService backed by '{}'", namespace.name);
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
        _context: &PollerContext,
    ) -> Result<Option<Box<dyn Poller>>> {
        Ok(Some(Box::new(CpuDataPoller::new(
            session,
            client.cpu(),
            self.table()?,
        ))))
    }
}
