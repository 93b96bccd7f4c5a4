// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process query server
//!
//! Category services answer queries from the UI side through this server.
//! Requests and responses are JSON-encoded so that any transport in front of
//! the server (gRPC bridge, local socket) only moves bytes.
//!
//! ```text
//! caller --(service, method, json)--> Server --> [Interceptor] --> RpcHandler
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Server errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServerError {
    #[error("Service '{0}' registered twice")]
    DuplicateService(String),

    #[error("Server '{0}' is not running")]
    NotRunning(String),

    #[error("Server '{0}' already started")]
    AlreadyStarted(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown method: {service}/{method}")]
    UnknownMethod { service: String, method: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Handles every method of one service.
pub trait RpcHandler: Send + Sync {
    fn handle(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>, ServerError>;
}

/// A function-based handler.
impl<F> RpcHandler for F
where
    F: Fn(&str, &[u8]) -> Result<Vec<u8>, ServerError> + Send + Sync,
{
    fn handle(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>, ServerError> {
        self(method, payload)
    }
}

/// Wraps every call of every registered service.
pub trait Interceptor: Send + Sync {
    fn intercept(
        &self,
        service: &str,
        method: &str,
        payload: &[u8],
        next: &dyn RpcHandler,
    ) -> Result<Vec<u8>, ServerError>;
}

/// A named handler ready to be added to a server.
#[derive(Clone)]
pub struct BoundService {
    name: String,
    handler: Arc<dyn RpcHandler>,
}

impl BoundService {
    pub fn new(name: impl Into<String>, handler: Arc<dyn RpcHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Route every call through `interceptor` first.
    pub fn intercept(self, interceptor: Arc<dyn Interceptor>) -> Self {
        let name = self.name.clone();
        let inner = self.handler;
        let wrapped = move |method: &str, payload: &[u8]| {
            interceptor.intercept(&name, method, payload, inner.as_ref())
        };
        Self {
            name: self.name,
            handler: Arc::new(wrapped),
        }
    }
}

impl std::fmt::Debug for BoundService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundService").field("name", &self.name).finish()
    }
}

/// Collects services before the server starts.
#[derive(Debug)]
pub struct ServerBuilder {
    name: String,
    services: Vec<BoundService>,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            services: Vec::new(),
        }
    }

    pub fn add_service(&mut self, service: BoundService) -> &mut Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> Server {
        Server {
            name: self.name,
            services: self.services,
            routes: parking_lot::RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }
}

/// Dispatches calls to registered services.
pub struct Server {
    name: String,
    services: Vec<BoundService>,
    routes: parking_lot::RwLock<HashMap<String, Arc<dyn RpcHandler>>>,
    running: AtomicBool,
    started: AtomicBool,
}

impl Server {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start serving. Fails if two services share a name.
    ///
    /// A server can only be started once, even if the first attempt failed.
    pub fn start(&self) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted(self.name.clone()));
        }

        let mut routes = HashMap::with_capacity(self.services.len());
        for service in &self.services {
            if routes
                .insert(service.name.clone(), Arc::clone(&service.handler))
                .is_some()
            {
                return Err(ServerError::DuplicateService(service.name.clone()));
            }
        }

        *self.routes.write() = routes;
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Server '{}' started with {} service(s)",
            self.name,
            self.services.len()
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting calls immediately. Idempotent.
    pub fn shutdown_now(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.routes.write().clear();
            tracing::info!("Server '{}' shut down", self.name);
        }
    }

    /// Names of the registered services, in registration order
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    /// Dispatch a raw call
    pub fn call(&self, service: &str, method: &str, payload: &[u8]) -> Result<Vec<u8>, ServerError> {
        if !self.is_running() {
            return Err(ServerError::NotRunning(self.name.clone()));
        }
        let handler = self
            .routes
            .read()
            .get(service)
            .cloned()
            .ok_or_else(|| ServerError::UnknownService(service.to_string()))?;
        handler.handle(method, payload)
    }

    /// Dispatch a typed call
    pub fn call_json<Req, Resp>(&self, service: &str, method: &str, request: &Req) -> Result<Resp, ServerError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload =
            serde_json::to_vec(request).map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        let response = self.call(service, method, &payload)?;
        serde_json::from_slice(&response).map_err(|e| ServerError::Internal(e.to_string()))
    }
}

/// Decode `payload`, run `f`, encode its result.
pub fn dispatch_json<Req, Resp, F>(payload: &[u8], f: F) -> Result<Vec<u8>, ServerError>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: FnOnce(Req) -> crate::error::Result<Resp>,
{
    let request: Req =
        serde_json::from_slice(payload).map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
    let response = f(request).map_err(|e| ServerError::Internal(e.to_string()))?;
    serde_json::to_vec(&response).map_err(|e| ServerError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn echo() -> Arc<dyn RpcHandler> {
        Arc::new(|method: &str, payload: &[u8]| match method {
            "Echo" => Ok(payload.to_vec()),
            _ => Err(ServerError::UnknownMethod {
                service: "Echo".into(),
                method: method.into(),
            }),
        })
    }

    #[test]
    fn test_start_and_call() {
        let mut builder = ServerBuilder::new("test");
        builder.add_service(BoundService::new("Echo", echo()));
        let server = builder.build();

        assert!(matches!(
            server.call("Echo", "Echo", b"x"),
            Err(ServerError::NotRunning(_))
        ));
        server.start().unwrap();
        assert_eq!(server.call("Echo", "Echo", b"hello").unwrap(), b"hello");
        assert!(matches!(
            server.call("Nope", "Echo", b""),
            Err(ServerError::UnknownService(_))
        ));
    }

    #[test]
    fn test_duplicate_service_fails_start() {
        let mut builder = ServerBuilder::new("dup");
        builder
            .add_service(BoundService::new("Echo", echo()))
            .add_service(BoundService::new("Echo", echo()));
        let server = builder.build();

        assert_eq!(
            server.start(),
            Err(ServerError::DuplicateService("Echo".into()))
        );
        assert!(!server.is_running());
        assert!(matches!(server.start(), Err(ServerError::AlreadyStarted(_))));
    }

    #[test]
    fn test_shutdown_now_rejects_calls() {
        let mut builder = ServerBuilder::new("stop");
        builder.add_service(BoundService::new("Echo", echo()));
        let server = builder.build();
        server.start().unwrap();

        server.shutdown_now();
        server.shutdown_now();
        assert!(matches!(
            server.call("Echo", "Echo", b""),
            Err(ServerError::NotRunning(_))
        ));
    }

    struct Recorder(Mutex<Vec<String>>);

    impl Interceptor for Recorder {
        fn intercept(
            &self,
            service: &str,
            method: &str,
            payload: &[u8],
            next: &dyn RpcHandler,
        ) -> Result<Vec<u8>, ServerError> {
            self.0.lock().push(format!("{}/{}", service, method));
            next.handle(method, payload)
        }
    }

    #[test]
    fn test_interceptor_wraps_calls() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut builder = ServerBuilder::new("intercepted");
        builder.add_service(
            BoundService::new("Echo", echo())
                .intercept(Arc::clone(&recorder) as Arc<dyn Interceptor>),
        );
        let server = builder.build();
        server.start().unwrap();

        server.call("Echo", "Echo", b"1").unwrap();
        assert!(server.call("Echo", "Other", b"2").is_err());
        assert_eq!(*recorder.0.lock(), vec!["Echo/Echo", "Echo/Other"]);
    }

    #[test]
    fn test_dispatch_json() {
        let payload = serde_json::to_vec(&3i64).unwrap();
        let out = dispatch_json(&payload, |n: i64| Ok(n * 2)).unwrap();
        assert_eq!(serde_json::from_slice::<i64>(&out).unwrap(), 6);

        assert!(matches!(
            dispatch_json(b"not json", |n: i64| Ok(n)),
            Err(ServerError::InvalidRequest(_))
        ));
    }
}
