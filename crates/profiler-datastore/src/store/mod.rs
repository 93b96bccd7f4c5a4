// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backing store
//!
//! Every category service declares the [`BackingNamespace`]s it writes to.
//! The [`DatabaseRegistry`] maps each distinct namespace to exactly one
//! SQLite [`Database`], created lazily the first time a service references it.
//!
//! # Layout
//!
//! ```text
//! <datastore_dir>/
//! +-- default.sql      (Durable, shared by memory + cpu tables)
//! +-- <other>.sql      (Durable namespaces)
//!     (InMemory namespaces never touch the disk)
//! ```

pub mod cpu;
pub mod events;
pub mod memory;

pub use cpu::CpuUsageTable;
pub use events::StreamEventTable;
pub use memory::{MemoryStatsStore, MemoryStatsTable};

use crate::error::{DatastoreError, ExceptionHandler, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durability of a namespace's physical storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// File-backed, survives restarts
    Durable,
    /// Transient, lives only as long as the connection
    InMemory,
}

/// A named, durability-tagged storage partition.
///
/// Two namespaces are the same partition only if both the name and the
/// characteristic match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackingNamespace {
    pub name: String,
    pub characteristic: Characteristic,
}

impl BackingNamespace {
    /// Namespace shared by the built-in category services.
    pub const DEFAULT_SHARED_NAME: &'static str = "default.sql";

    pub fn new(name: impl Into<String>, characteristic: Characteristic) -> Self {
        Self {
            name: name.into(),
            characteristic,
        }
    }

    pub fn default_shared() -> Self {
        Self::new(Self::DEFAULT_SHARED_NAME, Characteristic::Durable)
    }
}

/// Record count of a single table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub name: String,
    pub num_records: u64,
}

/// One physical SQLite database.
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync). After
/// [`disconnect`](Self::disconnect) every operation fails with
/// [`DatastoreError::Disconnected`].
pub struct Database {
    name: String,
    characteristic: Characteristic,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("characteristic", &self.characteristic)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Database {
    /// Open a database for `namespace`, rooted at `dir` when durable.
    pub fn open(dir: &Path, namespace: &BackingNamespace) -> Result<Self> {
        match namespace.characteristic {
            Characteristic::Durable => Self::open_file(&dir.join(&namespace.name)),
            Characteristic::InMemory => Self::open_in_memory(&namespace.name),
        }
    }

    /// Open (or create) a file-backed database
    pub fn open_file(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        tracing::debug!("Opened durable database at {}", path.display());

        Ok(Self {
            name: path.display().to_string(),
            characteristic: Characteristic::Durable,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Create an in-memory database
    pub fn open_in_memory(name: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        Ok(Self {
            name: name.to_string(),
            characteristic: Characteristic::InMemory,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn characteristic(&self) -> Characteristic {
        self.characteristic
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Run `f` against the live connection.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self.conn.lock();
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(DatastoreError::Disconnected(self.name.clone())),
        }
    }

    /// Close the connection. Idempotent.
    pub fn disconnect(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| DatastoreError::Sqlite(e))?;
            tracing::debug!("Closed database {}", self.name);
        }
        Ok(())
    }

    /// Record counts of every table in this database
    pub fn table_stats(&self) -> Result<Vec<TableStats>> {
        self.with_connection(|conn| {
            let names = {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut stats = Vec::with_capacity(names.len());
            for name in names {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM \"{}\"", name.replace('"', "\"\"")),
                    [],
                    |row| row.get(0),
                )?;
                stats.push(TableStats {
                    name,
                    num_records: count.max(0) as u64,
                });
            }
            Ok(stats)
        })
    }
}

/// Lazily-populated map from namespace to database.
pub struct DatabaseRegistry {
    root: PathBuf,
    databases: Mutex<HashMap<BackingNamespace, Arc<Database>>>,
}

impl DatabaseRegistry {
    /// Create a registry rooting durable namespaces under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            databases: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the database for `namespace`, creating it on first use.
    ///
    /// Creation happens under the registry lock, so concurrent callers
    /// naming the same namespace always observe a single instance.
    pub fn get_or_create(&self, namespace: &BackingNamespace) -> Result<Arc<Database>> {
        let mut databases = self.databases.lock();
        if let Some(db) = databases.get(namespace) {
            return Ok(Arc::clone(db));
        }

        let db = Arc::new(Database::open(&self.root, namespace)?);
        tracing::info!(
            "Created database for namespace '{}' ({:?})",
            namespace.name,
            namespace.characteristic
        );
        databases.insert(namespace.clone(), Arc::clone(&db));
        Ok(db)
    }

    pub fn get(&self, namespace: &BackingNamespace) -> Option<Arc<Database>> {
        self.databases.lock().get(namespace).cloned()
    }

    pub fn len(&self) -> usize {
        self.databases.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.lock().is_empty()
    }

    /// Snapshot of every registered database
    pub fn databases(&self) -> Vec<(BackingNamespace, Arc<Database>)> {
        self.databases
            .lock()
            .iter()
            .map(|(ns, db)| (ns.clone(), Arc::clone(db)))
            .collect()
    }

    /// Disconnect every database. A failure on one database is reported
    /// to `handler` and does not stop the others from closing.
    pub fn disconnect_all(&self, handler: &ExceptionHandler) {
        self.disconnect_all_with(handler, Database::disconnect);
    }

    fn disconnect_all_with<F>(&self, handler: &ExceptionHandler, close: F)
    where
        F: Fn(&Database) -> Result<()>,
    {
        let databases: Vec<_> = self.databases.lock().drain().collect();
        for (namespace, db) in databases {
            if let Err(e) = close(&db) {
                tracing::warn!("Failed to close namespace '{}': {}", namespace.name, e);
                handler(&e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_equality_covers_characteristic() {
        let durable = BackingNamespace::new("a.sql", Characteristic::Durable);
        let transient = BackingNamespace::new("a.sql", Characteristic::InMemory);
        assert_ne!(durable, transient);
        assert_eq!(durable, BackingNamespace::new("a.sql", Characteristic::Durable));
    }

    #[test]
    fn test_registry_memoizes_namespace() {
        let registry = DatabaseRegistry::new(".");
        let ns = BackingNamespace::new("memo.sql", Characteristic::InMemory);

        let first = registry.get_or_create(&ns).unwrap();
        let second = registry.get_or_create(&ns).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_concurrent_create_single_instance() {
        let registry = Arc::new(DatabaseRegistry::new("."));
        let ns = BackingNamespace::new("race.sql", Characteristic::InMemory);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let ns = ns.clone();
                std::thread::spawn(move || registry.get_or_create(&ns).unwrap())
            })
            .collect();
        let dbs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.len(), 1);
        assert!(dbs.iter().all(|db| Arc::ptr_eq(db, &dbs[0])));
    }

    #[test]
    fn test_durable_namespace_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::new(dir.path());
        let db = registry.get_or_create(&BackingNamespace::default_shared()).unwrap();

        assert_eq!(db.characteristic(), Characteristic::Durable);
        assert!(dir.path().join("default.sql").exists());
    }

    #[test]
    fn test_disconnect_is_idempotent_and_blocks_access() {
        let db = Database::open_in_memory("closing").unwrap();
        db.disconnect().unwrap();
        db.disconnect().unwrap();

        assert!(!db.is_connected());
        assert!(matches!(
            db.table_stats(),
            Err(DatastoreError::Disconnected(_))
        ));
    }

    #[test]
    fn test_table_stats_counts_rows() {
        let db = Database::open_in_memory("stats").unwrap();
        db.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);",
            )?;
            Ok(())
        })
        .unwrap();

        let stats = db.table_stats().unwrap();
        assert_eq!(
            stats,
            vec![TableStats {
                name: "t".to_string(),
                num_records: 2
            }]
        );
    }

    #[test]
    fn test_disconnect_all_clears_registry() {
        let registry = DatabaseRegistry::new(".");
        let a = registry
            .get_or_create(&BackingNamespace::new("a", Characteristic::InMemory))
            .unwrap();
        let b = registry
            .get_or_create(&BackingNamespace::new("b", Characteristic::InMemory))
            .unwrap();

        let handler = crate::error::default_exception_handler();
        registry.disconnect_all(&handler);

        assert!(registry.is_empty());
        assert!(!a.is_connected());
        assert!(!b.is_connected());
    }

    #[test]
    fn test_disconnect_all_continues_past_failed_close() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let registry = DatabaseRegistry::new(".");
        let names = ["a", "b", "c"];
        let dbs: Vec<_> = names
            .iter()
            .map(|n| {
                registry
                    .get_or_create(&BackingNamespace::new(*n, Characteristic::InMemory))
                    .unwrap()
            })
            .collect();

        let reported = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&reported);
        let handler: ExceptionHandler = Arc::new(move |e: &DatastoreError| {
            assert!(matches!(e, DatastoreError::Disconnected(_)));
            seen.fetch_add(1, Ordering::SeqCst);
        });
        registry.disconnect_all_with(&handler, |db| {
            if db.name() == "b" {
                return Err(DatastoreError::Disconnected(db.name().to_string()));
            }
            db.disconnect()
        });

        assert_eq!(reported.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert!(!dbs[0].is_connected());
        assert!(dbs[1].is_connected());
        assert!(!dbs[2].is_connected());
    }
}
