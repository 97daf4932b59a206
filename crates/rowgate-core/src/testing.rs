//! Minimal adapter for unit tests: builders are lists of clauses, rows are JSON

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use rowgate_common::{MissingTablePolicy, RowGateError};

use crate::adapter::Adapter;
use crate::gated::Session;
use crate::policy::{PolicyTable, TablePolicy};

#[derive(Error, Debug)]
pub enum TestError {
    #[error(transparent)]
    Gate(#[from] RowGateError),
    #[error("backend: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Default)]
pub struct TestClient {
    pub tables: Vec<String>,
}

pub struct TestAdapter {
    pub client: TestClient,
}

impl Adapter for TestAdapter {
    type Client = TestClient;
    type Select = Vec<String>;
    type Update = Vec<String>;
    type Delete = Vec<String>;
    type Row = Value;
    type Error = TestError;

    fn name(&self) -> &str {
        "test"
    }

    fn raw(&self) -> TestClient {
        self.client.clone()
    }

    fn table_names(&self) -> Option<Vec<String>> {
        if self.client.tables.is_empty() {
            None
        } else {
            Some(self.client.tables.clone())
        }
    }
}

fn owned_by(owner: String, column: &'static str) -> TablePolicy<TestAdapter> {
    let filter_owner = owner.clone();
    TablePolicy::new()
        .select_filter(move |mut qb: Vec<String>, table| {
            qb.push(format!("{table}.{column} = {filter_owner}"));
            qb
        })
        .insert_check(move |_db, row: Value| {
            let owner = owner.clone();
            async move {
                Ok(match row.get(column) {
                    None | Some(Value::Null) => true,
                    Some(value) => value.as_str() == Some(owner.as_str()),
                })
            }
        })
}

/// Post and User owned by `ctx`; Tag declared without rules
pub fn policy(ctx: &str) -> PolicyTable<TestAdapter> {
    PolicyTable::new()
        .table("Post", owned_by(ctx.to_string(), "authorId"))
        .table("User", owned_by(ctx.to_string(), "id"))
        .table("Tag", TablePolicy::new())
}

pub(crate) fn session(missing: MissingTablePolicy) -> (TestClient, Arc<Session<TestAdapter>>) {
    let session = Session::new(
        "test",
        policy("1"),
        vec!["Audit".to_string()],
        missing,
        vec!["json_object_from".to_string()],
    );
    (TestClient::default(), Arc::new(session))
}
