// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datastore host
//!
//! Owns the backing databases, the category services, the query server and
//! one poll runner per connected stream and category.
//!
//! # Lifecycle
//!
//! ```text
//! build()      register services -> start server -> start report timer
//! connect()    bind clients -> one runner per (stream, category)
//! disconnect() drain channel -> stop that stream's runners
//! shutdown()   cancel timer -> stop server -> kill channels
//!              -> stop runners -> close databases
//! ```
//!
//! `connect`, `disconnect` and `shutdown` are serialized on one lifecycle
//! lock, so a stream's runners are always registered before it can be
//! disconnected. `shutdown` is terminal: later connects fail with
//! [`DatastoreError::ShutDown`].

use crate::client::StreamClientRegistry;
use crate::config::{ConfigError, DatastoreConfig};
use crate::error::{default_exception_handler, DatastoreError, ExceptionHandler, Result};
use crate::executor::{FetchExecutor, ThreadExecutor};
use crate::model::{Session, Stream, StreamEvent, StreamEventKind, DATASTORE_RESERVED_STREAM_ID};
use crate::poller::{Category, PollRunner};
use crate::report::{collect_report, log_report_callback, ReportCallback, ReportTimer};
use crate::rpc::{Channel, CpuClient, MemoryClient};
use crate::server::{Interceptor, Server, ServerBuilder};
use crate::service::{CpuService, MemoryService, PollerContext, ServicePassThrough};
use crate::store::{BackingNamespace, Database, DatabaseRegistry, StreamEventTable};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Builder for [`DataStoreService`].
pub struct DataStoreServiceBuilder {
    config: DatastoreConfig,
    fetch_executor: Option<Arc<dyn FetchExecutor>>,
    interceptor: Option<Arc<dyn Interceptor>>,
    exception_handler: Option<ExceptionHandler>,
    report_callback: Option<ReportCallback>,
    services: Vec<Arc<dyn ServicePassThrough>>,
}

impl DataStoreServiceBuilder {
    fn new(config: DatastoreConfig) -> Self {
        Self {
            config,
            fetch_executor: None,
            interceptor: None,
            exception_handler: None,
            report_callback: None,
            services: Vec::new(),
        }
    }

    /// Executor for poll runners and follow-up fetches (default: one thread per unit)
    pub fn fetch_executor(mut self, executor: Arc<dyn FetchExecutor>) -> Self {
        self.fetch_executor = Some(executor);
        self
    }

    /// Interceptor wrapping every registered service
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn exception_handler(mut self, handler: ExceptionHandler) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    pub fn report_callback(mut self, callback: ReportCallback) -> Self {
        self.report_callback = Some(callback);
        self
    }

    /// Register an additional category service after the built-in ones
    pub fn service(mut self, service: Arc<dyn ServicePassThrough>) -> Self {
        self.services.push(service);
        self
    }

    /// Register every service and start serving.
    ///
    /// Two services sharing a [`Category`] are rejected. A server that fails
    /// to start (e.g. duplicate service names) is logged and left stopped;
    /// polling still works.
    pub fn build(self) -> Result<DataStoreService> {
        self.config.validate()?;
        std::fs::create_dir_all(&self.config.datastore_dir)?;

        let mut services: Vec<Arc<dyn ServicePassThrough>> =
            vec![Arc::new(MemoryService::new()), Arc::new(CpuService::new())];
        services.extend(self.services);
        check_categories(&services)?;

        let exception_handler = Arc::new(RwLock::new(
            self.exception_handler
                .unwrap_or_else(default_exception_handler),
        ));

        let databases = Arc::new(DatabaseRegistry::new(&self.config.datastore_dir));
        let mut server_builder = ServerBuilder::new(self.config.service_name.clone());

        for service in &services {
            service.set_exception_handler(forwarding_handler(&exception_handler));
            register_service(
                &databases,
                &mut server_builder,
                self.interceptor.as_ref(),
                service,
            )?;
        }

        let events =
            StreamEventTable::new(databases.get_or_create(&BackingNamespace::default_shared())?)?;

        let server = server_builder.build();
        if let Err(e) = server.start() {
            tracing::error!("Failed to start server '{}': {}", server.name(), e);
        }

        let report_timer = if self.config.report_enabled {
            start_report_timer(
                &self.config,
                Arc::clone(&databases),
                self.report_callback.unwrap_or_else(log_report_callback),
            )
        } else {
            ReportTimer::disabled()
        };

        tracing::info!(
            "Datastore '{}' ready at {} ({} service(s))",
            self.config.service_name,
            self.config.datastore_dir.display(),
            services.len()
        );

        Ok(DataStoreService {
            config: self.config,
            databases,
            services,
            server,
            fetch_executor: self
                .fetch_executor
                .unwrap_or_else(|| Arc::new(ThreadExecutor::default())),
            exception_handler,
            events,
            lifecycle: Mutex::new(false),
            clients: StreamClientRegistry::new(),
            runners: Mutex::new(HashMap::new()),
            next_session_id: AtomicI64::new(1),
            report_timer: Mutex::new(report_timer),
        })
    }
}

/// Every service must own a distinct category.
fn check_categories(services: &[Arc<dyn ServicePassThrough>]) -> Result<()> {
    let mut owners: HashMap<Category, &str> = HashMap::new();
    for service in services {
        if let Some(owner) = owners.insert(service.category(), service.name()) {
            return Err(ConfigError::Invalid(format!(
                "Services '{}' and '{}' both declare category '{}'",
                owner,
                service.name(),
                service.category()
            ))
            .into());
        }
    }
    Ok(())
}

/// Handler forwarding to whatever handler is current at report time
fn forwarding_handler(current: &Arc<RwLock<ExceptionHandler>>) -> ExceptionHandler {
    let current = Arc::clone(current);
    Arc::new(move |e: &DatastoreError| {
        let handler = Arc::clone(&*current.read());
        handler(e)
    })
}

/// Attach every namespace `service` declares and add it to the server.
fn register_service(
    databases: &DatabaseRegistry,
    server_builder: &mut ServerBuilder,
    interceptor: Option<&Arc<dyn Interceptor>>,
    service: &Arc<dyn ServicePassThrough>,
) -> Result<()> {
    for namespace in service.backing_namespaces() {
        if namespace.name.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Service '{}' declared an unnamed namespace",
                service.name()
            ))
            .into());
        }
        let db = databases.get_or_create(&namespace)?;
        service.set_backing_store(&namespace, db)?;
    }

    let bound = Arc::clone(service).bind_service();
    let bound = match interceptor {
        Some(interceptor) => bound.intercept(Arc::clone(interceptor)),
        None => bound,
    };
    server_builder.add_service(bound);
    tracing::debug!("Registered service '{}'", service.name());
    Ok(())
}

fn start_report_timer(
    config: &DatastoreConfig,
    databases: Arc<DatabaseRegistry>,
    callback: ReportCallback,
) -> ReportTimer {
    let started = Instant::now();
    let task = move || callback(&collect_report(&databases, started));
    match ReportTimer::start(config.report_initial_delay(), config.report_period(), task) {
        Ok(timer) => timer,
        Err(e) => {
            tracing::error!("Failed to start datastore report timer: {}", e);
            ReportTimer::disabled()
        }
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// The datastore host.
pub struct DataStoreService {
    config: DatastoreConfig,
    databases: Arc<DatabaseRegistry>,
    services: Vec<Arc<dyn ServicePassThrough>>,
    server: Server,
    fetch_executor: Arc<dyn FetchExecutor>,
    exception_handler: Arc<RwLock<ExceptionHandler>>,
    events: StreamEventTable,
    /// Serializes connect/disconnect/shutdown; `true` once shut down
    lifecycle: Mutex<bool>,
    clients: StreamClientRegistry,
    runners: Mutex<HashMap<(i64, Category), Arc<PollRunner>>>,
    next_session_id: AtomicI64,
    report_timer: Mutex<ReportTimer>,
}

impl DataStoreService {
    pub fn builder(config: DatastoreConfig) -> DataStoreServiceBuilder {
        DataStoreServiceBuilder::new(config)
    }

    /// Build a host with default executor, handler and report callback
    pub fn new(config: DatastoreConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    /// Replace the exception handler. `None` restores the logging default.
    ///
    /// Applies to services, runners and pollers that already exist.
    pub fn set_no_pii_exception_handler(&self, handler: Option<ExceptionHandler>) {
        *self.exception_handler.write() = handler.unwrap_or_else(default_exception_handler);
    }

    fn report_error(&self, e: &DatastoreError) {
        let handler = Arc::clone(&*self.exception_handler.read());
        handler(e)
    }

    fn record_stream_event(&self, kind: StreamEventKind, stream: &Stream) {
        let event = StreamEvent {
            timestamp: now_nanos(),
            kind,
            stream: stream.clone(),
        };
        if let Err(e) = self.events.insert_stream_event(&event) {
            tracing::warn!(
                "Failed to record {:?} for stream {}: {}",
                kind,
                stream.stream_id,
                e
            );
            self.report_error(&e);
        }
    }

    /// Start polling `stream` over `channel`.
    ///
    /// Connecting an already connected stream is a no-op. Stream 0 and the
    /// reserved datastore id are rejected, as is any connect after
    /// [`shutdown`](Self::shutdown).
    pub fn connect(&self, stream: &Stream, channel: Arc<dyn Channel>) -> Result<()> {
        if stream.stream_id == 0 || stream.stream_id == DATASTORE_RESERVED_STREAM_ID {
            return Err(DatastoreError::InvalidStream(stream.stream_id));
        }

        let shut_down = self.lifecycle.lock();
        if *shut_down {
            return Err(DatastoreError::ShutDown);
        }

        let Some(client) = self.clients.connect(stream, channel) else {
            tracing::debug!("Stream {} already connected", stream.stream_id);
            return Ok(());
        };

        let session = Session {
            session_id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            stream_id: stream.stream_id,
            pid: stream.pid,
            start_timestamp: now_nanos(),
        };
        let handler = forwarding_handler(&self.exception_handler);
        let context = PollerContext {
            fetch_executor: Arc::clone(&self.fetch_executor),
            exception_handler: Arc::clone(&handler),
        };

        for service in &self.services {
            let poller = match service.create_poller(session, &client, &context) {
                Ok(Some(poller)) => poller,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        "Service '{}' could not create a poller for stream {}: {}",
                        service.name(),
                        stream.stream_id,
                        e
                    );
                    handler(&e);
                    continue;
                }
            };

            let category = service.category();
            let runner = Arc::new(PollRunner::new(
                format!("{}-{}", category, stream.stream_id),
                self.config.poll_interval(),
                poller,
                Arc::clone(&handler),
            ));
            // Categories are unique per host and the stream was not connected
            self.runners
                .lock()
                .insert((stream.stream_id, category), Arc::clone(&runner));

            let worker = Arc::clone(&runner);
            self.fetch_executor.execute(Box::new(move || worker.run()));
        }

        self.record_stream_event(StreamEventKind::Connected, stream);
        tracing::info!(
            "Connected stream {} ({}, pid {}) as session {}",
            stream.stream_id,
            stream.name,
            stream.pid,
            session.session_id
        );
        Ok(())
    }

    /// Stop polling `stream_id` and drain its channel. Unknown ids are ignored.
    pub fn disconnect(&self, stream_id: i64) {
        let _lifecycle = self.lifecycle.lock();
        let Some(client) = self.clients.disconnect(stream_id) else {
            return;
        };
        client.channel().shutdown();
        self.stop_runners(|(id, _)| *id == stream_id);
        self.record_stream_event(StreamEventKind::Disconnected, client.stream());
        tracing::info!("Disconnected stream {}", stream_id);
    }

    fn stop_runners(&self, mut filter: impl FnMut(&(i64, Category)) -> bool) {
        let stopped: Vec<_> = {
            let mut runners = self.runners.lock();
            let keys: Vec<_> = runners.keys().filter(|k| filter(k)).copied().collect();
            keys.into_iter()
                .filter_map(|k| runners.remove(&k))
                .collect()
        };
        // Outside the runners lock: stop() waits for in-flight cycles
        for runner in stopped {
            runner.stop();
        }
    }

    /// Tear everything down. Terminal and idempotent.
    pub fn shutdown(&self) {
        let mut shut_down = self.lifecycle.lock();
        if *shut_down {
            return;
        }
        *shut_down = true;

        self.report_timer.lock().cancel();
        self.server.shutdown_now();

        for (_, client) in self.clients.drain() {
            client.channel().shutdown_now();
        }
        self.stop_runners(|_| true);

        let handler = forwarding_handler(&self.exception_handler);
        self.databases.disconnect_all(&handler);
        tracing::info!("Datastore '{}' shut down", self.config.service_name);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.lifecycle.lock()
    }

    /// Stream connect/disconnect events newer than `since` (nanoseconds)
    pub fn stream_events(&self, since: i64) -> Result<Vec<StreamEvent>> {
        self.events.get_stream_events(since)
    }

    pub fn is_connected(&self, stream_id: i64) -> bool {
        self.clients.contains(stream_id)
    }

    /// Connected stream ids, ascending
    pub fn connected_streams(&self) -> Vec<i64> {
        self.clients.stream_ids()
    }

    pub fn memory_client(&self, stream_id: i64) -> Option<Arc<dyn MemoryClient>> {
        self.clients.get(stream_id).map(|c| c.memory())
    }

    pub fn cpu_client(&self, stream_id: i64) -> Option<Arc<dyn CpuClient>> {
        self.clients.get(stream_id).map(|c| c.cpu())
    }

    pub fn runner(&self, stream_id: i64, category: Category) -> Option<Arc<PollRunner>> {
        self.runners.lock().get(&(stream_id, category)).cloned()
    }

    /// Active runners, sorted by stream then category
    pub fn active_runners(&self) -> Vec<(i64, Category)> {
        let mut keys: Vec<_> = self.runners.lock().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Every database created so far
    pub fn databases(&self) -> Vec<(BackingNamespace, Arc<Database>)> {
        self.databases.databases()
    }

    pub fn registered_services(&self) -> &[Arc<dyn ServicePassThrough>] {
        &self.services
    }

    pub fn server(&self) -> &Server {
        &self.server
    }
}

impl Drop for DataStoreService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StreamClient;
    use crate::poller::Poller;
    use crate::rpc::MockChannel;
    use crate::server::{BoundService, RpcHandler, ServerError};
    use crate::store::Characteristic;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> DatastoreConfig {
        DatastoreConfig::builder()
            .datastore_dir(dir)
            .poll_interval_ms(5)
            .report_enabled(false)
            .build()
    }

    /// Service with no poller and a transient namespace.
    struct ScratchService {
        name: &'static str,
        attached: AtomicUsize,
    }

    impl ScratchService {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                attached: AtomicUsize::new(0),
            })
        }
    }

    impl ServicePassThrough for ScratchService {
        fn name(&self) -> &str {
            self.name
        }

        fn category(&self) -> Category {
            Category::Custom(self.name)
        }

        fn backing_namespaces(&self) -> Vec<BackingNamespace> {
            vec![
                BackingNamespace::default_shared(),
                BackingNamespace::new("scratch", Characteristic::InMemory),
            ]
        }

        fn set_backing_store(&self, _: &BackingNamespace, _: Arc<Database>) -> Result<()> {
            self.attached.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn bind_service(self: Arc<Self>) -> BoundService {
            let handler: Arc<dyn RpcHandler> = Arc::new(
                |_: &str, _: &[u8]| -> std::result::Result<Vec<u8>, ServerError> {
                    Err(ServerError::Internal("scratch".into()))
                },
            );
            BoundService::new(self.name, handler)
        }

        fn create_poller(
            &self,
            _: Session,
            _: &StreamClient,
            _: &PollerContext,
        ) -> Result<Option<Box<dyn Poller>>> {
            Ok(None)
        }
    }

    #[test]
    fn test_shared_namespace_single_database() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchService::new("Scratch");
        let service = DataStoreService::builder(config(dir.path()))
            .service(Arc::clone(&scratch) as Arc<dyn ServicePassThrough>)
            .build()
            .unwrap();

        let names: Vec<_> = service
            .databases()
            .into_iter()
            .map(|(ns, _)| ns.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"default.sql".to_string()));
        assert_eq!(scratch.attached.load(Ordering::SeqCst), 2);
        assert_eq!(service.registered_services().len(), 3);
        assert!(service.server().is_running());
    }

    #[test]
    fn test_duplicate_service_name_leaves_server_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let service = DataStoreService::builder(config(dir.path()))
            .service(ScratchService::new("MemoryService") as Arc<dyn ServicePassThrough>)
            .build()
            .unwrap();

        assert!(!service.server().is_running());

        // Polling is unaffected
        let stream = Stream::new(1, 100, "app");
        service
            .connect(&stream, Arc::new(MockChannel::new()))
            .unwrap();
        assert_eq!(
            service.active_runners(),
            vec![(1, Category::Memory), (1, Category::Cpu)]
        );
    }

    #[test]
    fn test_runner_failures_reach_replaced_handler() {
        let dir = tempfile::tempdir().unwrap();
        let service = DataStoreService::new(config(dir.path())).unwrap();
        let channel = MockChannel::new();
        channel.push_memory_response(Err(crate::rpc::RpcError::Unavailable("offline".into())));

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        service.set_no_pii_exception_handler(Some(Arc::new(move |_: &DatastoreError| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        service
            .connect(&Stream::new(3, 300, "app"), Arc::new(channel))
            .unwrap();

        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while seen.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        service.set_no_pii_exception_handler(None);
        service.shutdown();
    }

    #[test]
    fn test_empty_namespace_name_is_rejected() {
        struct Unnamed;

        impl ServicePassThrough for Unnamed {
            fn name(&self) -> &str {
                "Unnamed"
            }

            fn category(&self) -> Category {
                Category::Custom("unnamed")
            }

            fn backing_namespaces(&self) -> Vec<BackingNamespace> {
                vec![BackingNamespace::new("", Characteristic::InMemory)]
            }

            fn set_backing_store(&self, _: &BackingNamespace, _: Arc<Database>) -> Result<()> {
                Ok(())
            }

            fn bind_service(self: Arc<Self>) -> BoundService {
                let echo = |_: &str, p: &[u8]| Ok::<_, ServerError>(p.to_vec());
                BoundService::new("Unnamed", Arc::new(echo))
            }

            fn create_poller(
                &self,
                _: Session,
                _: &StreamClient,
                _: &PollerContext,
            ) -> Result<Option<Box<dyn Poller>>> {
                Ok(None)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let result = DataStoreService::builder(config(dir.path()))
            .service(Arc::new(Unnamed))
            .build();
        assert!(matches!(result, Err(DatastoreError::Config(_))));
    }

    struct IdlePoller;

    impl Poller for IdlePoller {
        fn poll(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Service whose poller creation parks until released.
    struct GatedService {
        entered: Barrier,
        release: Barrier,
    }

    impl ServicePassThrough for GatedService {
        fn name(&self) -> &str {
            "GatedService"
        }

        fn category(&self) -> Category {
            Category::Custom("gated")
        }

        fn backing_namespaces(&self) -> Vec<BackingNamespace> {
            Vec::new()
        }

        fn set_backing_store(&self, _: &BackingNamespace, _: Arc<Database>) -> Result<()> {
            Ok(())
        }

        fn bind_service(self: Arc<Self>) -> BoundService {
            let echo = |_: &str, p: &[u8]| Ok::<_, ServerError>(p.to_vec());
            BoundService::new("GatedService", Arc::new(echo))
        }

        fn create_poller(
            &self,
            _: Session,
            _: &StreamClient,
            _: &PollerContext,
        ) -> Result<Option<Box<dyn Poller>>> {
            self.entered.wait();
            self.release.wait();
            Ok(Some(Box::new(IdlePoller)))
        }
    }

    #[test]
    fn test_disconnect_during_connect_stops_every_runner() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(GatedService {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        let service = Arc::new(
            DataStoreService::builder(config(dir.path()))
                .service(Arc::clone(&gated) as Arc<dyn ServicePassThrough>)
                .build()
                .unwrap(),
        );

        let connector = {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                service.connect(&Stream::new(9, 900, "app"), Arc::new(MockChannel::new()))
            })
        };
        // connect() is now inside create_poller with the built-in runners registered
        gated.entered.wait();
        let disconnector = {
            let service = Arc::clone(&service);
            std::thread::spawn(move || service.disconnect(9))
        };
        std::thread::sleep(Duration::from_millis(50));
        gated.release.wait();

        connector.join().unwrap().unwrap();
        disconnector.join().unwrap();

        assert!(!service.is_connected(9));
        assert!(service.active_runners().is_empty());
        service.shutdown();
    }

    #[test]
    fn test_connect_after_shutdown_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = DataStoreService::new(config(dir.path())).unwrap();
        let channel = MockChannel::new();

        service.shutdown();
        assert!(service.is_shut_down());
        let result = service.connect(&Stream::new(3, 1, "late"), Arc::new(channel.clone()));

        assert!(matches!(result, Err(DatastoreError::ShutDown)));
        assert_eq!(channel.binding_count(), 0);
        assert!(service.connected_streams().is_empty());
        assert!(service.active_runners().is_empty());

        // Second shutdown returns early
        service.shutdown();
        assert!(service.is_shut_down());
    }

    #[test]
    fn test_services_sharing_a_category_are_rejected() {
        struct ShadowCpu;

        impl ServicePassThrough for ShadowCpu {
            fn name(&self) -> &str {
                "ShadowCpu"
            }

            fn category(&self) -> Category {
                Category::Cpu
            }

            fn set_backing_store(&self, _: &BackingNamespace, _: Arc<Database>) -> Result<()> {
                Ok(())
            }

            fn bind_service(self: Arc<Self>) -> BoundService {
                let echo = |_: &str, p: &[u8]| Ok::<_, ServerError>(p.to_vec());
                BoundService::new("ShadowCpu", Arc::new(echo))
            }

            fn create_poller(
                &self,
                _: Session,
                _: &StreamClient,
                _: &PollerContext,
            ) -> Result<Option<Box<dyn Poller>>> {
                Ok(Some(Box::new(IdlePoller)))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let result = DataStoreService::builder(config(dir.path()))
            .service(Arc::new(ShadowCpu))
            .build();
        assert!(matches!(result, Err(DatastoreError::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn test_custom_category_runs_alongside_built_ins() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(GatedService {
            entered: Barrier::new(1),
            release: Barrier::new(1),
        });
        let service = DataStoreService::builder(config(dir.path()))
            .service(gated as Arc<dyn ServicePassThrough>)
            .build()
            .unwrap();

        service
            .connect(&Stream::new(4, 400, "app"), Arc::new(MockChannel::new()))
            .unwrap();
        assert_eq!(
            service.active_runners(),
            vec![
                (4, Category::Memory),
                (4, Category::Cpu),
                (4, Category::Custom("gated"))
            ]
        );
        service.shutdown();
    }
}
