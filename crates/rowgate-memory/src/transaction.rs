//! Transactions and savepoints

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::error::{DbError, Result};
use crate::query::{Db, QuerySource};
use crate::store::{Executor, TxState};

/// Runs a callback inside a transaction
#[derive(Debug)]
pub struct TransactionBuilder {
    db: Db,
}

impl TransactionBuilder {
    pub(crate) fn new(db: Db) -> Self {
        Self { db }
    }

    /// Commit when `f` returns `Ok`, roll back when it returns `Err`
    pub async fn execute<T, E, F, Fut>(self, f: F) -> std::result::Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let trx = Transaction::begin(&self.db)?;
        match f(trx.clone()).await {
            Ok(value) => {
                trx.state.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = trx.state.rollback() {
                    warn!(error = %rollback, "Rollback after failed transaction callback failed");
                }
                Err(err)
            }
        }
    }
}

/// Opens a transaction controlled by explicit commit/rollback calls
#[derive(Debug)]
pub struct StartTransaction {
    db: Db,
}

impl StartTransaction {
    pub(crate) fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn execute(self) -> Result<Transaction> {
        Transaction::begin(&self.db)
    }
}

/// An open transaction; queries started from it see its uncommitted writes
#[derive(Clone)]
pub struct Transaction {
    db: Db,
    state: Arc<TxState>,
}

impl Transaction {
    fn begin(db: &Db) -> Result<Self> {
        let state = db.executor.begin()?;
        Ok(Self {
            db: Db::with_executor(Executor::Transaction(Arc::clone(&state))),
            state,
        })
    }

    /// Query handle bound to this transaction
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn commit(&self) -> CommitCommand {
        CommitCommand { trx: self.clone() }
    }

    pub fn rollback(&self) -> RollbackCommand {
        RollbackCommand { trx: self.clone() }
    }

    pub fn savepoint(&self, name: &str) -> Savepoint {
        Savepoint {
            trx: self.clone(),
            name: name.to_string(),
        }
    }

    pub fn rollback_to_savepoint(&self, name: &str) -> RollbackToSavepoint {
        RollbackToSavepoint {
            trx: self.clone(),
            name: name.to_string(),
        }
    }

    pub fn release_savepoint(&self, name: &str) -> ReleaseSavepoint {
        ReleaseSavepoint {
            trx: self.clone(),
            name: name.to_string(),
        }
    }
}

impl QuerySource for Transaction {
    fn query_creator(&self) -> Db {
        self.db.clone()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct CommitCommand {
    trx: Transaction,
}

impl CommitCommand {
    pub async fn execute(self) -> Result<()> {
        self.trx.state.commit()
    }
}

#[derive(Debug)]
pub struct RollbackCommand {
    trx: Transaction,
}

impl RollbackCommand {
    pub async fn execute(self) -> Result<()> {
        self.trx.state.rollback()
    }
}

/// Creates a savepoint; executes to the transaction it belongs to
#[derive(Debug)]
pub struct Savepoint {
    trx: Transaction,
    name: String,
}

impl Savepoint {
    pub async fn execute(self) -> Result<Transaction> {
        self.trx.state.savepoint(&self.name)?;
        Ok(self.trx)
    }
}

#[derive(Debug)]
pub struct RollbackToSavepoint {
    trx: Transaction,
    name: String,
}

impl RollbackToSavepoint {
    pub async fn execute(self) -> Result<Transaction> {
        self.trx.state.rollback_to_savepoint(&self.name)?;
        Ok(self.trx)
    }
}

#[derive(Debug)]
pub struct ReleaseSavepoint {
    trx: Transaction,
    name: String,
}

impl ReleaseSavepoint {
    pub async fn execute(self) -> Result<Transaction> {
        self.trx.state.release_savepoint(&self.name)?;
        Ok(self.trx)
    }
}
