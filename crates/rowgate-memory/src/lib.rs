//! In-memory query builder client and its RowGate adapter
//!
//! A small JSON row store with a fluent builder (joins, CTEs, scalar and JSON
//! subqueries, raw expressions, transactions and savepoints). The
//! [`gated`] module is the client's gated surface: bring [`prelude`] into
//! scope and a [`rowgate_core::Gated`] root behaves like a [`Db`].

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
mod engine;
pub mod error;
pub mod expr;
pub mod gated;
pub mod query;
pub mod store;
pub mod transaction;

pub use adapter::MemoryAdapter;
pub use error::{DbError, Result};
pub use expr::{col, exists, json_array_from, json_object_from, raw, val, Expr, Op, RowView, Selection};
pub use query::{
    Db, DeleteQuery, ExpressionBuilder, InsertQuery, MutationResult, Order, QuerySource,
    SelectQuery, UpdateQuery,
};
pub use store::Store;
pub use transaction::{StartTransaction, Transaction, TransactionBuilder};

/// Everything needed to write queries against a gated root
///
/// Only the gated surface is exported. Calls a handle forwards to the
/// wrapped builder stay with the adapter:
///
/// ```
/// use rowgate_memory::prelude::*;
///
/// fn visible(db: &GatedDb) -> rowgate_core::Result<()> {
///     let _posts = db.select_from("Post")?.select_all();
///     Ok(())
/// }
/// ```
///
/// ```compile_fail,E0599
/// use rowgate_memory::prelude::*;
///
/// fn unfiltered(db: &GatedDb) {
///     let _posts = db.derive(|d| d.select_from("Post"));
/// }
/// ```
///
/// ```compile_fail,E0599
/// use rowgate_memory::prelude::*;
///
/// fn shadow(db: GatedDb) {
///     let _db = db.pass(|d| d.with_schema("public"));
/// }
/// ```
pub mod prelude {
    pub use crate::expr::{col, raw, val, Expr, Op};
    pub use crate::gated::{
        DeleteOps, ExprOps, ExpressionOps, GatedCommand, GatedDb, GatedTransaction, InsertOps,
        QueryCreatorOps, SelectOps, TransactionBuilderOps, TransactionControl, TransactionOps,
        UpdateOps,
    };
    pub use crate::query::{Order, QuerySource};
    pub use crate::MemoryAdapter;
}
