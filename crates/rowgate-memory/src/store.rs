//! Row storage and transaction state
//!
//! Tables hold JSON object rows. A transaction works on a private copy of
//! the tables taken at `begin` and publishes it on commit; savepoints are
//! further copies stacked inside the transaction. Writes outside a
//! transaction made while one is open are overwritten when it commits.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::error::{DbError, Result};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// A table's rows and key
#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub(crate) primary_key: Option<String>,
    pub(crate) rows: Vec<JsonValue>,
}

/// All tables of a store, by name
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables(BTreeMap<String, Table>);

impl Tables {
    pub(crate) fn get(&self, name: &str) -> Result<&Table> {
        self.0
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.0
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }
}

struct StoreInner {
    schema: String,
    tables: RwLock<Tables>,
}

/// Shared in-memory database
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Empty store with the `public` schema
    pub fn new() -> Self {
        Self::with_schema_name("public")
    }

    pub fn with_schema_name(schema: &str) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                schema: schema.to_string(),
                tables: RwLock::new(Tables::default()),
            }),
        }
    }

    /// Schema name queries may qualify tables with
    pub fn schema(&self) -> &str {
        &self.inner.schema
    }

    /// Create a table; rows are unique on `primary_key` when one is given
    pub fn create_table(&self, name: &str, primary_key: Option<&str>) -> Result<()> {
        let mut tables = self.inner.tables.write();
        if tables.0.contains_key(name) {
            return Err(DbError::TableExists(name.to_string()));
        }
        tables.0.insert(
            name.to_string(),
            Table {
                primary_key: primary_key.map(str::to_string),
                rows: Vec::new(),
            },
        );
        info!(table = name, "Table created");
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.inner.tables.read().0.keys().cloned().collect()
    }

    /// Remove every row, keeping the tables
    pub fn truncate_all(&self) {
        for table in self.inner.tables.write().0.values_mut() {
            table.rows.clear();
        }
    }

    fn snapshot(&self) -> Tables {
        self.inner.tables.read().clone()
    }

    fn publish(&self, tables: Tables) {
        *self.inner.tables.write() = tables;
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one open transaction
pub(crate) struct TxState {
    id: u64,
    store: Store,
    working: Mutex<Tables>,
    savepoints: Mutex<Vec<(String, Tables)>>,
    active: AtomicBool,
}

impl TxState {
    fn begin(store: &Store) -> Self {
        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        debug!(tx = id, "Transaction started");
        Self {
            id,
            store: store.clone(),
            working: Mutex::new(store.snapshot()),
            savepoints: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbError::TransactionClosed)
        }
    }

    pub(crate) fn commit(&self) -> Result<()> {
        self.ensure_active()?;
        self.active.store(false, Ordering::SeqCst);
        self.store.publish(self.working.lock().clone());
        debug!(tx = self.id, "Transaction committed");
        Ok(())
    }

    pub(crate) fn rollback(&self) -> Result<()> {
        self.ensure_active()?;
        self.active.store(false, Ordering::SeqCst);
        debug!(tx = self.id, "Transaction rolled back");
        Ok(())
    }

    pub(crate) fn savepoint(&self, name: &str) -> Result<()> {
        self.ensure_active()?;
        let snapshot = self.working.lock().clone();
        self.savepoints.lock().push((name.to_string(), snapshot));
        debug!(tx = self.id, savepoint = name, "Savepoint created");
        Ok(())
    }

    /// Restore the tables as they were at `name`; the savepoint stays
    pub(crate) fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.ensure_active()?;
        let mut savepoints = self.savepoints.lock();
        let index = Self::position(&savepoints, name)?;
        savepoints.truncate(index + 1);
        *self.working.lock() = savepoints[index].1.clone();
        debug!(tx = self.id, savepoint = name, "Rolled back to savepoint");
        Ok(())
    }

    pub(crate) fn release_savepoint(&self, name: &str) -> Result<()> {
        self.ensure_active()?;
        let mut savepoints = self.savepoints.lock();
        let index = Self::position(&savepoints, name)?;
        savepoints.truncate(index);
        debug!(tx = self.id, savepoint = name, "Savepoint released");
        Ok(())
    }

    fn position(savepoints: &[(String, Tables)], name: &str) -> Result<usize> {
        savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| DbError::SavepointNotFound(name.to_string()))
    }
}

/// Where a query's reads and writes go
#[derive(Clone)]
pub(crate) enum Executor {
    Direct(Store),
    Transaction(Arc<TxState>),
}

impl Executor {
    pub(crate) fn store(&self) -> &Store {
        match self {
            Executor::Direct(store) => store,
            Executor::Transaction(tx) => &tx.store,
        }
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Tables) -> Result<R>) -> Result<R> {
        match self {
            Executor::Direct(store) => f(&store.inner.tables.read()),
            Executor::Transaction(tx) => {
                tx.ensure_active()?;
                f(&tx.working.lock())
            }
        }
    }

    /// Apply `f` to a copy of the tables and keep it only if `f` succeeds
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R>) -> Result<R> {
        match self {
            Executor::Direct(store) => {
                let mut tables = store.inner.tables.write();
                let mut next = tables.clone();
                let out = f(&mut next)?;
                *tables = next;
                Ok(out)
            }
            Executor::Transaction(tx) => {
                tx.ensure_active()?;
                let mut tables = tx.working.lock();
                let mut next = tables.clone();
                let out = f(&mut next)?;
                *tables = next;
                Ok(out)
            }
        }
    }

    pub(crate) fn begin(&self) -> Result<Arc<TxState>> {
        match self {
            Executor::Direct(store) => Ok(Arc::new(TxState::begin(store))),
            Executor::Transaction(_) => Err(DbError::NestedTransaction),
        }
    }
}
