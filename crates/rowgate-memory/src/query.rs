//! Fluent query builders
//!
//! Builders are plain values: every method consumes the builder and returns
//! the next stage. Terminal methods run the query against the store (or the
//! transaction) the builder was created from.

use std::fmt;

use futures::stream::{self, BoxStream, StreamExt};
use rowgate_core::{RawFragment, RawInspect, TableRef};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::engine;
use crate::error::{DbError, Result};
use crate::expr::{col, Expr, Selection};
use crate::store::{Executor, Store};
use crate::transaction::{StartTransaction, TransactionBuilder};

/// A table as named in a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Source {
    pub(crate) table: String,
    pub(crate) runtime: String,
}

impl Source {
    fn parse(reference: &str) -> Self {
        let parsed = TableRef::parse(reference);
        Self {
            table: parsed.table.to_string(),
            runtime: parsed.runtime.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Cte {
    pub(crate) name: String,
    pub(crate) query: SelectQuery,
}

/// Anything queries can be started from: the database or a transaction
pub trait QuerySource {
    fn query_creator(&self) -> Db;
}

/// Root query handle
#[derive(Clone)]
pub struct Db {
    pub(crate) executor: Executor,
    pub(crate) ctes: Vec<Cte>,
    pub(crate) schema: Option<String>,
}

impl Db {
    pub fn new(store: &Store) -> Self {
        Self {
            executor: Executor::Direct(store.clone()),
            ctes: Vec::new(),
            schema: None,
        }
    }

    pub(crate) fn with_executor(executor: Executor) -> Self {
        Self {
            executor,
            ctes: Vec::new(),
            schema: None,
        }
    }

    pub fn store(&self) -> &Store {
        self.executor.store()
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self.executor, Executor::Transaction(_))
    }

    pub fn select_from(&self, table: &str) -> SelectQuery {
        self.select_from_tables(&[table])
    }

    /// Select from the cross product of several tables
    pub fn select_from_tables(&self, tables: &[&str]) -> SelectQuery {
        SelectQuery {
            db: self.clone(),
            from: tables.iter().map(|t| Source::parse(t)).collect(),
            joins: Vec::new(),
            wheres: Vec::new(),
            selections: Vec::new(),
            select_all: false,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn insert_into(&self, table: &str) -> InsertQuery {
        InsertQuery {
            db: self.clone(),
            table: Source::parse(table).table,
            rows: Vec::new(),
            columns: Vec::new(),
            expression: None,
        }
    }

    pub fn update_table(&self, table: &str) -> UpdateQuery {
        UpdateQuery {
            db: self.clone(),
            source: Source::parse(table),
            values: None,
            wheres: Vec::new(),
        }
    }

    pub fn delete_from(&self, table: &str) -> DeleteQuery {
        DeleteQuery {
            db: self.clone(),
            source: Source::parse(table),
            wheres: Vec::new(),
        }
    }

    /// Define a common table expression visible to queries started from the result
    #[must_use]
    pub fn with(&self, name: &str, build: impl FnOnce(&Db) -> SelectQuery) -> Db {
        let query = build(self);
        self.clone().push_cte(name, query)
    }

    pub(crate) fn push_cte(mut self, name: &str, query: SelectQuery) -> Db {
        self.ctes.push(Cte {
            name: cte_name(name).to_string(),
            query,
        });
        self
    }

    /// Qualify every table with `schema`
    #[must_use]
    pub fn with_schema(&self, schema: &str) -> Db {
        Db {
            schema: Some(schema.to_string()),
            ..self.clone()
        }
    }

    pub fn transaction(&self) -> TransactionBuilder {
        TransactionBuilder::new(self.clone())
    }

    pub fn start_transaction(&self) -> StartTransaction {
        StartTransaction::new(self.clone())
    }
}

impl QuerySource for Db {
    fn query_creator(&self) -> Db {
        self.clone()
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("schema", &self.schema)
            .field("ctes", &self.ctes.iter().map(|c| &c.name).collect::<Vec<_>>())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

/// `"name(col_a, col_b)"` names the CTE `name`
pub(crate) fn cte_name(definition: &str) -> &str {
    definition
        .split_once('(')
        .map_or(definition, |(name, _)| name)
        .trim()
}

/// Starts subqueries inside callbacks
#[derive(Debug, Clone)]
pub struct ExpressionBuilder {
    db: Db,
}

impl ExpressionBuilder {
    pub fn select_from(&self, table: &str) -> SelectQuery {
        self.db.select_from(table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinKind {
    Inner,
    Left,
    Cross,
}

#[derive(Debug, Clone)]
pub(crate) struct Join {
    pub(crate) kind: JoinKind,
    pub(crate) source: Source,
    pub(crate) on: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub(crate) db: Db,
    pub(crate) from: Vec<Source>,
    pub(crate) joins: Vec<Join>,
    pub(crate) wheres: Vec<Expr>,
    pub(crate) selections: Vec<Selection>,
    pub(crate) select_all: bool,
    pub(crate) order_by: Vec<(Expr, Order)>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: Option<usize>,
}

impl SelectQuery {
    fn join(mut self, kind: JoinKind, table: &str, on: Option<Expr>) -> Self {
        self.joins.push(Join {
            kind,
            source: Source::parse(table),
            on,
        });
        self
    }

    #[must_use]
    pub fn inner_join(self, table: &str, left: &str, right: &str) -> Self {
        self.join(JoinKind::Inner, table, Some(col(left).eq_col(right)))
    }

    #[must_use]
    pub fn left_join(self, table: &str, left: &str, right: &str) -> Self {
        self.join(JoinKind::Left, table, Some(col(left).eq_col(right)))
    }

    #[must_use]
    pub fn cross_join(self, table: &str) -> Self {
        self.join(JoinKind::Cross, table, None)
    }

    #[must_use]
    pub fn and_where(mut self, expr: Expr) -> Self {
        self.wheres.push(expr);
        self
    }

    /// Project columns; `"Post.id as pid"` renames
    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.selections.extend(columns.iter().map(|c| {
            let parsed = TableRef::parse(c);
            Selection {
                expr: col(parsed.table),
                alias: parsed.is_aliased().then(|| parsed.runtime.to_string()),
            }
        }));
        self
    }

    #[must_use]
    pub fn select_all(mut self) -> Self {
        self.select_all = true;
        self
    }

    #[must_use]
    pub fn select_as(self, expr: Expr, alias: &str) -> Self {
        self.select_expr(expr.as_(alias))
    }

    #[must_use]
    pub fn select_expr(mut self, selection: Selection) -> Self {
        self.selections.push(selection);
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order_by.push((col(column), order));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Use the query as a scalar subquery in a projection
    pub fn as_(self, alias: &str) -> Selection {
        Expr::Subquery(Box::new(self)).as_(alias)
    }

    pub fn expression_builder(&self) -> ExpressionBuilder {
        ExpressionBuilder {
            db: self.db.clone(),
        }
    }

    pub async fn execute(self) -> Result<Vec<JsonValue>> {
        tokio::task::yield_now().await;
        self.db
            .executor
            .read(|tables| engine::select(&self, tables))
    }

    pub async fn execute_take_first(self) -> Result<Option<JsonValue>> {
        Ok(self.execute().await?.into_iter().next())
    }

    pub async fn execute_take_first_or_throw(self) -> Result<JsonValue> {
        self.execute_take_first().await?.ok_or(DbError::NoResult)
    }

    /// Rows as a stream; the query runs once, up front
    pub async fn stream(self) -> Result<BoxStream<'static, Result<JsonValue>>> {
        let rows = self.execute().await?;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

/// Rows written by a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MutationResult {
    pub rows_affected: u64,
}

#[derive(Debug, Clone)]
pub struct InsertQuery {
    pub(crate) db: Db,
    pub(crate) table: String,
    pub(crate) rows: Vec<JsonValue>,
    pub(crate) columns: Vec<String>,
    pub(crate) expression: Option<SelectQuery>,
}

impl InsertQuery {
    /// One row (an object) or a batch (an array of objects)
    #[must_use]
    pub fn values(mut self, values: JsonValue) -> Self {
        match values {
            JsonValue::Array(rows) => self.rows.extend(rows),
            row => self.rows.push(row),
        }
        self
    }

    /// Columns filled from the output of [`InsertQuery::expression`]
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Insert the rows a query selects
    #[must_use]
    pub fn expression(mut self, query: SelectQuery) -> Self {
        self.expression = Some(query);
        self
    }

    pub fn expression_builder(&self) -> ExpressionBuilder {
        ExpressionBuilder {
            db: self.db.clone(),
        }
    }

    pub async fn execute(self) -> Result<MutationResult> {
        tokio::task::yield_now().await;
        let rows_affected = self
            .db
            .executor
            .write(|tables| engine::insert(&self, tables))?;
        Ok(MutationResult { rows_affected })
    }

    pub async fn execute_take_first_or_throw(self) -> Result<MutationResult> {
        let result = self.execute().await?;
        if result.rows_affected == 0 {
            return Err(DbError::NoResult);
        }
        Ok(result)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateQuery {
    pub(crate) db: Db,
    pub(crate) source: Source,
    pub(crate) values: Option<JsonValue>,
    pub(crate) wheres: Vec<Expr>,
}

impl UpdateQuery {
    /// New values; repeated calls merge
    #[must_use]
    pub fn set(mut self, values: JsonValue) -> Self {
        self.values = Some(match (self.values.take(), values) {
            (Some(JsonValue::Object(mut current)), JsonValue::Object(next)) => {
                current.extend(next);
                JsonValue::Object(current)
            }
            (_, next) => next,
        });
        self
    }

    #[must_use]
    pub fn and_where(mut self, expr: Expr) -> Self {
        self.wheres.push(expr);
        self
    }

    pub fn expression_builder(&self) -> ExpressionBuilder {
        ExpressionBuilder {
            db: self.db.clone(),
        }
    }

    pub async fn execute(self) -> Result<MutationResult> {
        tokio::task::yield_now().await;
        let rows_affected = self
            .db
            .executor
            .write(|tables| engine::update(&self, tables))?;
        Ok(MutationResult { rows_affected })
    }

    pub async fn execute_take_first_or_throw(self) -> Result<MutationResult> {
        let result = self.execute().await?;
        if result.rows_affected == 0 {
            return Err(DbError::NoResult);
        }
        Ok(result)
    }
}

#[derive(Debug, Clone)]
pub struct DeleteQuery {
    pub(crate) db: Db,
    pub(crate) source: Source,
    pub(crate) wheres: Vec<Expr>,
}

impl DeleteQuery {
    #[must_use]
    pub fn and_where(mut self, expr: Expr) -> Self {
        self.wheres.push(expr);
        self
    }

    pub fn expression_builder(&self) -> ExpressionBuilder {
        ExpressionBuilder {
            db: self.db.clone(),
        }
    }

    pub async fn execute(self) -> Result<MutationResult> {
        tokio::task::yield_now().await;
        let rows_affected = self
            .db
            .executor
            .write(|tables| engine::delete(&self, tables))?;
        Ok(MutationResult { rows_affected })
    }
}

impl RawInspect for SelectQuery {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        for cte in &self.db.ctes {
            cte.query.visit_raw(visit);
        }
        for join in &self.joins {
            join.on.visit_raw(visit);
        }
        self.wheres.visit_raw(visit);
        self.selections.visit_raw(visit);
        for (expr, _) in &self.order_by {
            expr.visit_raw(visit);
        }
    }
}

impl RawInspect for InsertQuery {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        self.expression.visit_raw(visit);
    }
}

impl RawInspect for UpdateQuery {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        self.wheres.visit_raw(visit);
    }
}

impl RawInspect for DeleteQuery {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        self.wheres.visit_raw(visit);
    }
}
