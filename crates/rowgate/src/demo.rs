//! Blog walkthrough
//!
//! Two users, posts owned through `authorId`. Each step runs under one
//! user's gated session and records what that user could see or change.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::info;

use rowgate_common::{GateConfig, Operation, RowGateError};
use rowgate_core::{expect_fields, Gate, PolicyTable, TablePolicy};
use rowgate_memory::prelude::*;
use rowgate_memory::{Db, DbError, DeleteQuery, MutationResult, SelectQuery, Store, UpdateQuery};

/// Rules for a table whose rows belong to the user named in `column`
fn owned_by(user_id: &str, table: &'static str, column: &'static str) -> TablePolicy<MemoryAdapter> {
    let select_owner = user_id.to_string();
    let update_owner = user_id.to_string();
    let delete_owner = user_id.to_string();
    let insert_expected = JsonValue::Object(Map::from_iter([(column.to_string(), json!(user_id))]));
    let update_expected = insert_expected.clone();

    TablePolicy::new()
        .select_filter(move |q: SelectQuery, alias: &str| {
            q.and_where(col(format!("{alias}.{column}")).eq(select_owner.as_str()))
        })
        .insert_check(move |_db: Db, row: JsonValue| {
            let outcome = expect_fields(&insert_expected, &row, table, Operation::Insert);
            async move { outcome.map(|()| true).map_err(DbError::from) }
        })
        .update_filter(move |q: UpdateQuery, alias: &str| {
            q.and_where(col(format!("{alias}.{column}")).eq(update_owner.as_str()))
        })
        .update_check(move |_db: Db, values: JsonValue| {
            let outcome = expect_fields(&update_expected, &values, table, Operation::Update);
            async move { outcome.map(|()| true).map_err(DbError::from) }
        })
        .delete_filter(move |q: DeleteQuery, alias: &str| {
            q.and_where(col(format!("{alias}.{column}")).eq(delete_owner.as_str()))
        })
}

/// Users see and edit their own `User` row and the posts they authored
pub fn blog_policy(user_id: &str) -> PolicyTable<MemoryAdapter> {
    PolicyTable::new()
        .table("User", owned_by(user_id, "User", "id"))
        .table("Post", owned_by(user_id, "Post", "authorId"))
}

/// Empty `User` and `Post` tables keyed on `id`
pub fn blog_store() -> Result<Store, DbError> {
    let store = Store::new();
    store.create_table("User", Some("id"))?;
    store.create_table("Post", Some("id"))?;
    Ok(store)
}

pub fn blog_gate(store: &Store, config: GateConfig) -> Result<Gate<String, MemoryAdapter>, RowGateError> {
    Gate::builder(MemoryAdapter::new(store))
        .policy(|user_id: &String| blog_policy(user_id))
        .config(config)
        .build()
}

/// Result of one step
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Rows { rows: Vec<JsonValue> },
    Affected { rows_affected: u64 },
    Denied { code: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub at: DateTime<Utc>,
    pub user: String,
    pub action: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Steps in the order they ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub steps: Vec<Step>,
}

impl Report {
    fn record<T>(
        &mut self,
        user: &str,
        action: &str,
        result: Result<T, DbError>,
        ok: impl FnOnce(T) -> Outcome,
    ) -> Result<(), DbError> {
        let outcome = match result {
            Ok(value) => ok(value),
            Err(err) if err.is_denial() => Outcome::Denied {
                code: err.code().to_string(),
                message: err.to_string(),
            },
            Err(err) => return Err(err),
        };
        info!(user, action, ?outcome, "Demo step");
        self.steps.push(Step {
            at: Utc::now(),
            user: user.to_string(),
            action: action.to_string(),
            outcome,
        });
        Ok(())
    }
}

fn affected(result: MutationResult) -> Outcome {
    Outcome::Affected {
        rows_affected: result.rows_affected,
    }
}

fn rows(rows: Vec<JsonValue>) -> Outcome {
    Outcome::Rows { rows }
}

/// Run the walkthrough against a fresh blog store
pub async fn run(config: GateConfig) -> anyhow::Result<Report> {
    let store = blog_store()?;
    let gate = blog_gate(&store, config)?;
    let mut report = Report::default();

    gate.system()
        .insert_into("User")
        .values(json!([
            { "id": "1", "email": "ada@example.com" },
            { "id": "2", "email": "grace@example.com" },
        ]))
        .execute()
        .await?;

    let ada = gate.gated("1").await?;
    let grace = gate.gated("2").await?;

    let result = ada
        .insert_into("Post")?
        .values(json!({ "id": "1", "title": "Notes on the engine", "authorId": "1" }))
        .execute()
        .await;
    report.record("1", "insert own post", result, affected)?;

    let result = grace
        .insert_into("Post")?
        .values(json!({ "id": "2", "title": "Compilers", "authorId": "2" }))
        .execute()
        .await;
    report.record("2", "insert own post", result, affected)?;

    let result = ada
        .insert_into("Post")?
        .values(json!({ "id": "3", "title": "Forged", "authorId": "2" }))
        .execute()
        .await;
    report.record("1", "insert post as user 2", result, affected)?;

    let result = ada
        .select_from("Post")?
        .select_all()
        .order_by("Post.id", Order::Asc)
        .execute()
        .await;
    report.record("1", "list posts", result, rows)?;

    let result = grace
        .update_table("Post")?
        .set(json!({ "title": "Taken over" }))
        .and_where(col("Post.id").eq("1"))?
        .execute()
        .await;
    report.record("2", "retitle user 1's post", result, affected)?;

    let result = ada
        .update_table("Post")?
        .set(json!({ "authorId": "2" }))
        .and_where(col("Post.id").eq("1"))?
        .execute()
        .await;
    report.record("1", "hand post to user 2", result, affected)?;

    let result = ada
        .select_from("Post as p")?
        .select(&["p.id", "p.title"])
        .select_with(|eb| {
            Ok(eb
                .json_object_from(
                    eb.select_from("User as u")?
                        .select(&["u.email"])
                        .where_with(|inner| inner.expr(col("u.id").eq_col("p.authorId")))?,
                )?
                .as_("author"))
        })?
        .execute()
        .await;
    report.record("1", "posts with author", result, rows)?;

    let result = grace
        .delete_from("Post")?
        .and_where(col("Post.id").eq("1"))?
        .execute()
        .await;
    report.record("2", "delete user 1's post", result, affected)?;

    let result = grace.select_from("Post")?.select_all().execute().await;
    report.record("2", "list posts", result, rows)?;

    Ok(report)
}
