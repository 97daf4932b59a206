//! Gated fluent surface of the in-memory client
//!
//! Extension traits over [`Gated`] mirroring the raw builders. Calls that
//! name a table go through the matching gate transition, callbacks receive
//! gated nested builders and every terminal drains pending checks first.

use std::future::Future;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value as JsonValue;

use rowgate_core::transitions::{terminal, Transitions};
use rowgate_core::{Gated, RowGateError};

use crate::adapter::MemoryAdapter;
use crate::error::{DbError, Result};
use crate::expr::{self, Expr, Selection};
use crate::query::{
    cte_name, Db, DeleteQuery, ExpressionBuilder, InsertQuery, MutationResult, Order, QuerySource,
    SelectQuery, UpdateQuery,
};
use crate::transaction::{
    CommitCommand, ReleaseSavepoint, RollbackCommand, RollbackToSavepoint, Savepoint,
    StartTransaction, Transaction, TransactionBuilder,
};

type GateResult<T> = std::result::Result<T, RowGateError>;

pub type GatedDb = Gated<Db, MemoryAdapter>;
pub type GatedTransaction = Gated<Transaction, MemoryAdapter>;
pub type GatedSelect = Gated<SelectQuery, MemoryAdapter>;
pub type GatedInsert = Gated<InsertQuery, MemoryAdapter>;
pub type GatedUpdate = Gated<UpdateQuery, MemoryAdapter>;
pub type GatedDelete = Gated<DeleteQuery, MemoryAdapter>;
pub type GatedExpressions = Gated<ExpressionBuilder, MemoryAdapter>;
pub type GatedExpr = Gated<Expr, MemoryAdapter>;
pub type GatedSelection = Gated<Selection, MemoryAdapter>;

/// Query starters on the gated database and on gated transactions
pub trait QueryCreatorOps {
    fn select_from(&self, table: &str) -> GateResult<GatedSelect>;

    fn select_from_tables(&self, tables: &[&str]) -> GateResult<GatedSelect>;

    fn insert_into(&self, table: &str) -> GateResult<GatedInsert>;

    fn update_table(&self, table: &str) -> GateResult<GatedUpdate>;

    fn delete_from(&self, table: &str) -> GateResult<GatedDelete>;

    /// Define a CTE from a gated query. Reads of the CTE name skip policy
    /// lookup; a name that shadows a table is refused.
    fn with<F>(&self, name: &str, build: F) -> GateResult<GatedDb>
    where
        F: FnOnce(GatedDb) -> GateResult<GatedSelect>;

    fn with_schema(&self, schema: &str) -> GatedDb;
}

impl<B: QuerySource> QueryCreatorOps for Gated<B, MemoryAdapter> {
    fn select_from(&self, table: &str) -> GateResult<GatedSelect> {
        self.select_from_tables(&[table])
    }

    fn select_from_tables(&self, tables: &[&str]) -> GateResult<GatedSelect> {
        self.derive(|b| b.query_creator().select_from_tables(tables))
            .after_read(tables)
    }

    fn insert_into(&self, table: &str) -> GateResult<GatedInsert> {
        self.derive(|b| b.query_creator().insert_into(table))
            .after_insert(table)
    }

    fn update_table(&self, table: &str) -> GateResult<GatedUpdate> {
        self.derive(|b| b.query_creator().update_table(table))
            .after_update(table)
    }

    fn delete_from(&self, table: &str) -> GateResult<GatedDelete> {
        self.derive(|b| b.query_creator().delete_from(table))
            .after_delete(&[table])
    }

    fn with<F>(&self, name: &str, build: F) -> GateResult<GatedDb>
    where
        F: FnOnce(GatedDb) -> GateResult<GatedSelect>,
    {
        let mut creator = self.derive(B::query_creator);
        let query = creator.after_composite(Db::clone, build)?;
        creator
            .pass(|db| db.push_cte(name, query))
            .after_cte(cte_name(name))
    }

    fn with_schema(&self, schema: &str) -> GatedDb {
        self.derive(|b| b.query_creator().with_schema(schema))
    }
}

pub trait TransactionOps {
    /// Run a callback in a transaction whose handles queue checks on their own scope
    fn transaction(&self) -> Gated<TransactionBuilder, MemoryAdapter>;

    fn start_transaction(&self) -> Gated<StartTransaction, MemoryAdapter>;
}

impl TransactionOps for GatedDb {
    fn transaction(&self) -> Gated<TransactionBuilder, MemoryAdapter> {
        self.derive(Db::transaction)
    }

    fn start_transaction(&self) -> Gated<StartTransaction, MemoryAdapter> {
        self.derive(Db::start_transaction)
    }
}

#[async_trait]
pub trait SelectOps: Sized {
    fn inner_join(self, table: &str, left: &str, right: &str) -> GateResult<Self>;

    fn left_join(self, table: &str, left: &str, right: &str) -> GateResult<Self>;

    fn cross_join(self, table: &str) -> GateResult<Self>;

    /// Add a predicate; raw fragments are refused
    fn and_where(self, expr: Expr) -> GateResult<Self>;

    /// Add a predicate built from gated subqueries
    fn where_with<F>(self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedExpr>;

    #[must_use]
    fn select(self, columns: &[&str]) -> Self;

    #[must_use]
    fn select_all(self) -> Self;

    fn select_as(self, expr: Expr, alias: &str) -> GateResult<Self>;

    /// Add a projection built from gated subqueries
    fn select_with<F>(self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedSelection>;

    #[must_use]
    fn order_by(self, column: &str, order: Order) -> Self;

    #[must_use]
    fn limit(self, limit: usize) -> Self;

    #[must_use]
    fn offset(self, offset: usize) -> Self;

    /// Use the query as a scalar subquery in an enclosing projection
    fn as_(self, alias: &str) -> GatedSelection;

    fn exists(self) -> GatedExpr;

    async fn execute(self) -> Result<Vec<JsonValue>>;

    async fn execute_take_first(self) -> Result<Option<JsonValue>>;

    async fn execute_take_first_or_throw(self) -> Result<JsonValue>;

    async fn stream(self) -> Result<BoxStream<'static, Result<JsonValue>>>;
}

#[async_trait]
impl SelectOps for GatedSelect {
    fn inner_join(self, table: &str, left: &str, right: &str) -> GateResult<Self> {
        self.pass(|q| q.inner_join(table, left, right))
            .after_join(table)
    }

    fn left_join(self, table: &str, left: &str, right: &str) -> GateResult<Self> {
        self.pass(|q| q.left_join(table, left, right))
            .after_join(table)
    }

    fn cross_join(self, table: &str) -> GateResult<Self> {
        self.pass(|q| q.cross_join(table)).after_join(table)
    }

    fn and_where(self, expr: Expr) -> GateResult<Self> {
        self.inspect(&expr)?;
        Ok(self.pass(|q| q.and_where(expr)))
    }

    fn where_with<F>(mut self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedExpr>,
    {
        let expr = self.after_composite(SelectQuery::expression_builder, build)?;
        Ok(self.pass(|q| q.and_where(expr)))
    }

    fn select(self, columns: &[&str]) -> Self {
        self.pass(|q| q.select(columns))
    }

    fn select_all(self) -> Self {
        self.pass(SelectQuery::select_all)
    }

    fn select_as(self, expr: Expr, alias: &str) -> GateResult<Self> {
        self.inspect(&expr)?;
        Ok(self.pass(|q| q.select_as(expr, alias)))
    }

    fn select_with<F>(mut self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedSelection>,
    {
        let selection = self.after_composite(SelectQuery::expression_builder, build)?;
        Ok(self.pass(|q| q.select_expr(selection)))
    }

    fn order_by(self, column: &str, order: Order) -> Self {
        self.pass(|q| q.order_by(column, order))
    }

    fn limit(self, limit: usize) -> Self {
        self.pass(|q| q.limit(limit))
    }

    fn offset(self, offset: usize) -> Self {
        self.pass(|q| q.offset(offset))
    }

    fn as_(self, alias: &str) -> GatedSelection {
        self.pass(|q| q.as_(alias))
    }

    fn exists(self) -> GatedExpr {
        self.pass(expr::exists)
    }

    async fn execute(self) -> Result<Vec<JsonValue>> {
        terminal(self, SelectQuery::execute).await
    }

    async fn execute_take_first(self) -> Result<Option<JsonValue>> {
        terminal(self, SelectQuery::execute_take_first).await
    }

    async fn execute_take_first_or_throw(self) -> Result<JsonValue> {
        terminal(self, SelectQuery::execute_take_first_or_throw)
            .await
    }

    async fn stream(self) -> Result<BoxStream<'static, Result<JsonValue>>> {
        terminal(self, SelectQuery::stream).await
    }
}

/// Subquery and expression helpers handed to callbacks
pub trait ExpressionOps {
    fn select_from(&self, table: &str) -> GateResult<GatedSelect>;

    fn json_object_from(&self, query: GatedSelect) -> GateResult<GatedExpr>;

    fn json_array_from(&self, query: GatedSelect) -> GateResult<GatedExpr>;

    fn exists(&self, query: GatedSelect) -> GateResult<GatedExpr>;

    /// Wrap a plain expression; raw fragments are refused
    fn expr(&self, expr: Expr) -> GateResult<GatedExpr>;
}

fn wrap_query(
    builder: &GatedExpressions,
    query: GatedSelect,
    wrap: fn(SelectQuery) -> Expr,
) -> GateResult<GatedExpr> {
    let mut out = builder.nested(());
    let query = out.absorb(query)?;
    Ok(out.pass(|()| wrap(query)))
}

impl ExpressionOps for GatedExpressions {
    fn select_from(&self, table: &str) -> GateResult<GatedSelect> {
        self.derive(|eb| eb.select_from(table)).after_read(&[table])
    }

    fn json_object_from(&self, query: GatedSelect) -> GateResult<GatedExpr> {
        wrap_query(self, query, expr::json_object_from)
    }

    fn json_array_from(&self, query: GatedSelect) -> GateResult<GatedExpr> {
        wrap_query(self, query, expr::json_array_from)
    }

    fn exists(&self, query: GatedSelect) -> GateResult<GatedExpr> {
        wrap_query(self, query, expr::exists)
    }

    fn expr(&self, expr: Expr) -> GateResult<GatedExpr> {
        self.inspect(&expr)?;
        Ok(self.nested(expr))
    }
}

pub trait ExprOps: Sized {
    fn as_(self, alias: &str) -> GatedSelection;

    fn and(self, other: Expr) -> GateResult<Self>;

    fn or(self, other: Expr) -> GateResult<Self>;
}

impl ExprOps for GatedExpr {
    fn as_(self, alias: &str) -> GatedSelection {
        self.pass(|e| e.as_(alias))
    }

    fn and(self, other: Expr) -> GateResult<Self> {
        self.inspect(&other)?;
        Ok(self.pass(|e| e.and(other)))
    }

    fn or(self, other: Expr) -> GateResult<Self> {
        self.inspect(&other)?;
        Ok(self.pass(|e| e.or(other)))
    }
}

#[async_trait]
pub trait InsertOps: Sized {
    /// Values to insert; queues the table's insert check once per row
    fn values(self, values: JsonValue) -> Self;

    /// Refused while the table has an insert check
    fn columns(self, columns: &[&str]) -> GateResult<Self>;

    /// Refused while the table has an insert check
    fn expression<F>(self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedSelect>;

    async fn execute(self) -> Result<MutationResult>;

    async fn execute_take_first_or_throw(self) -> Result<MutationResult>;
}

#[async_trait]
impl InsertOps for GatedInsert {
    fn values(self, values: JsonValue) -> Self {
        let rows = match &values {
            JsonValue::Array(rows) => rows.clone(),
            row => vec![row.clone()],
        };
        self.pass(|q| q.values(values)).after_mutation_define(rows)
    }

    fn columns(self, columns: &[&str]) -> GateResult<Self> {
        self.forbid_raw_escape("columns")?;
        Ok(self.pass(|q| q.columns(columns)))
    }

    fn expression<F>(mut self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedSelect>,
    {
        self.forbid_raw_escape("expression")?;
        let query = self.after_composite(InsertQuery::expression_builder, build)?;
        Ok(self.pass(|q| q.expression(query)))
    }

    async fn execute(self) -> Result<MutationResult> {
        terminal(self, InsertQuery::execute).await
    }

    async fn execute_take_first_or_throw(self) -> Result<MutationResult> {
        terminal(self, InsertQuery::execute_take_first_or_throw)
            .await
    }
}

#[async_trait]
pub trait UpdateOps: Sized {
    /// New values; queues the table's update check
    fn set(self, values: JsonValue) -> Self;

    fn and_where(self, expr: Expr) -> GateResult<Self>;

    fn where_with<F>(self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedExpr>;

    async fn execute(self) -> Result<MutationResult>;

    async fn execute_take_first_or_throw(self) -> Result<MutationResult>;
}

#[async_trait]
impl UpdateOps for GatedUpdate {
    fn set(self, values: JsonValue) -> Self {
        let row = values.clone();
        self.pass(|q| q.set(values)).after_mutation_define(vec![row])
    }

    fn and_where(self, expr: Expr) -> GateResult<Self> {
        self.inspect(&expr)?;
        Ok(self.pass(|q| q.and_where(expr)))
    }

    fn where_with<F>(mut self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedExpr>,
    {
        let expr = self.after_composite(UpdateQuery::expression_builder, build)?;
        Ok(self.pass(|q| q.and_where(expr)))
    }

    async fn execute(self) -> Result<MutationResult> {
        terminal(self, UpdateQuery::execute).await
    }

    async fn execute_take_first_or_throw(self) -> Result<MutationResult> {
        terminal(self, UpdateQuery::execute_take_first_or_throw)
            .await
    }
}

#[async_trait]
pub trait DeleteOps: Sized {
    fn and_where(self, expr: Expr) -> GateResult<Self>;

    fn where_with<F>(self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedExpr>;

    async fn execute(self) -> Result<MutationResult>;
}

#[async_trait]
impl DeleteOps for GatedDelete {
    fn and_where(self, expr: Expr) -> GateResult<Self> {
        self.inspect(&expr)?;
        Ok(self.pass(|q| q.and_where(expr)))
    }

    fn where_with<F>(mut self, build: F) -> GateResult<Self>
    where
        F: FnOnce(GatedExpressions) -> GateResult<GatedExpr>,
    {
        let expr = self.after_composite(DeleteQuery::expression_builder, build)?;
        Ok(self.pass(|q| q.and_where(expr)))
    }

    async fn execute(self) -> Result<MutationResult> {
        terminal(self, DeleteQuery::execute).await
    }
}

#[async_trait]
pub trait TransactionBuilderOps {
    /// Drain the outer scope, then run `f` with a gated transaction handle.
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    async fn execute<T, E, F, Fut>(self, f: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<DbError> + Send,
        F: FnOnce(GatedTransaction) -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send;
}

#[async_trait]
impl TransactionBuilderOps for Gated<TransactionBuilder, MemoryAdapter> {
    async fn execute<T, E, F, Fut>(self, f: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<DbError> + Send,
        F: FnOnce(GatedTransaction) -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        let seed = self.seed();
        terminal(self, move |builder| {
            builder.execute(move |trx| {
                let client = trx.query_creator();
                f(seed.open(trx, client))
            })
        })
        .await
    }
}

/// Manual transaction control on a gated transaction handle
pub trait TransactionControl {
    fn commit(&self) -> Gated<CommitCommand, MemoryAdapter>;

    fn rollback(&self) -> Gated<RollbackCommand, MemoryAdapter>;

    fn savepoint(&self, name: &str) -> Gated<Savepoint, MemoryAdapter>;

    fn rollback_to_savepoint(&self, name: &str) -> Gated<RollbackToSavepoint, MemoryAdapter>;

    fn release_savepoint(&self, name: &str) -> Gated<ReleaseSavepoint, MemoryAdapter>;
}

impl TransactionControl for GatedTransaction {
    fn commit(&self) -> Gated<CommitCommand, MemoryAdapter> {
        self.derive(Transaction::commit)
    }

    fn rollback(&self) -> Gated<RollbackCommand, MemoryAdapter> {
        self.derive(Transaction::rollback)
    }

    fn savepoint(&self, name: &str) -> Gated<Savepoint, MemoryAdapter> {
        self.derive(|trx| trx.savepoint(name))
    }

    fn rollback_to_savepoint(&self, name: &str) -> Gated<RollbackToSavepoint, MemoryAdapter> {
        self.derive(|trx| trx.rollback_to_savepoint(name))
    }

    fn release_savepoint(&self, name: &str) -> Gated<ReleaseSavepoint, MemoryAdapter> {
        self.derive(|trx| trx.release_savepoint(name))
    }
}

/// Transaction commands; savepoint commands open a fresh check scope
#[async_trait]
pub trait GatedCommand {
    type Output: Send;

    async fn execute(self) -> Result<Self::Output>;
}

/// Run a command yielding a transaction and wrap it on a new scope
async fn reopen<C, F, Fut>(command: Gated<C, MemoryAdapter>, run: F) -> Result<GatedTransaction>
where
    F: FnOnce(C) -> Fut,
    Fut: Future<Output = Result<Transaction>>,
{
    let seed = command.seed();
    let trx = terminal(command, run).await?;
    let client = trx.query_creator();
    Ok(seed.open(trx, client))
}

#[async_trait]
impl GatedCommand for Gated<StartTransaction, MemoryAdapter> {
    type Output = GatedTransaction;

    async fn execute(self) -> Result<GatedTransaction> {
        reopen(self, StartTransaction::execute).await
    }
}

#[async_trait]
impl GatedCommand for Gated<CommitCommand, MemoryAdapter> {
    type Output = ();

    async fn execute(self) -> Result<()> {
        terminal(self, CommitCommand::execute).await
    }
}

#[async_trait]
impl GatedCommand for Gated<RollbackCommand, MemoryAdapter> {
    type Output = ();

    async fn execute(self) -> Result<()> {
        self.discard_pending();
        terminal(self, RollbackCommand::execute).await
    }
}

#[async_trait]
impl GatedCommand for Gated<Savepoint, MemoryAdapter> {
    type Output = GatedTransaction;

    async fn execute(self) -> Result<GatedTransaction> {
        reopen(self, Savepoint::execute).await
    }
}

#[async_trait]
impl GatedCommand for Gated<RollbackToSavepoint, MemoryAdapter> {
    type Output = GatedTransaction;

    async fn execute(self) -> Result<GatedTransaction> {
        self.discard_pending();
        reopen(self, RollbackToSavepoint::execute).await
    }
}

#[async_trait]
impl GatedCommand for Gated<ReleaseSavepoint, MemoryAdapter> {
    type Output = GatedTransaction;

    async fn execute(self) -> Result<GatedTransaction> {
        reopen(self, ReleaseSavepoint::execute).await
    }
}
