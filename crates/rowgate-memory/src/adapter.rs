use serde_json::Value as JsonValue;

use rowgate_core::Adapter;

use crate::error::DbError;
use crate::query::{Db, DeleteQuery, SelectQuery, UpdateQuery};
use crate::store::Store;

/// Gate adapter for the in-memory client
#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    db: Db,
}

impl MemoryAdapter {
    pub fn new(store: &Store) -> Self {
        Self { db: Db::new(store) }
    }

    pub fn store(&self) -> &Store {
        self.db.store()
    }
}

impl Adapter for MemoryAdapter {
    type Client = Db;
    type Select = SelectQuery;
    type Update = UpdateQuery;
    type Delete = DeleteQuery;
    type Row = JsonValue;
    type Error = DbError;

    fn name(&self) -> &str {
        "memory"
    }

    fn raw(&self) -> Db {
        self.db.clone()
    }

    fn table_names(&self) -> Option<Vec<String>> {
        Some(self.db.store().table_names())
    }
}
