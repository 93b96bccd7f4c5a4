// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Category services
//!
//! A category service owns the tables of one data category. It declares the
//! namespaces it needs, receives their databases from the host, answers
//! queries through the [`Server`](crate::server::Server) and creates the
//! poller that fills its tables for each connected stream.

pub mod cpu;
pub mod memory;

pub use cpu::CpuService;
pub use memory::MemoryService;

use crate::client::StreamClient;
use crate::error::{ExceptionHandler, Result};
use crate::executor::FetchExecutor;
use crate::model::Session;
use crate::poller::{Category, Poller};
use crate::server::BoundService;
use crate::store::{BackingNamespace, Database};
use std::sync::Arc;

/// What a poller needs from the host besides its clients.
#[derive(Clone)]
pub struct PollerContext {
    pub fetch_executor: Arc<dyn FetchExecutor>,
    pub exception_handler: ExceptionHandler,
}

/// Contract between the host and a category service.
pub trait ServicePassThrough: Send + Sync {
    /// RPC service name
    fn name(&self) -> &str;

    fn category(&self) -> Category;

    /// Namespaces this service writes to
    fn backing_namespaces(&self) -> Vec<BackingNamespace> {
        vec![BackingNamespace::default_shared()]
    }

    /// Attach the database backing `namespace`. Called once per namespace.
    fn set_backing_store(&self, namespace: &BackingNamespace, db: Arc<Database>) -> Result<()>;

    /// Handler for errors raised while answering queries. Called once at
    /// registration, before [`bind_service`](Self::bind_service).
    fn set_exception_handler(&self, _handler: ExceptionHandler) {}

    /// Bind the query handler for registration with the server
    fn bind_service(self: Arc<Self>) -> BoundService;

    /// Create the poller for a newly connected stream.
    ///
    /// `None` means this category has nothing to poll on that stream.
    fn create_poller(
        &self,
        session: Session,
        client: &StreamClient,
        context: &PollerContext,
    ) -> Result<Option<Box<dyn Poller>>>;
}
