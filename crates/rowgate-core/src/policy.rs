//! Policy definitions and resolution
//!
//! A [`PolicyTable`] maps table names to a [`TablePolicy`] of up to four rule
//! slots. It is produced fresh for every validated context by a
//! [`PolicyResolver`] and is immutable afterwards. An empty slot means the
//! operation is unrestricted on that table.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use rowgate_common::{Operation, RowGateError};

use crate::adapter::Adapter;

/// Narrows a builder to the rows visible under the policy.
/// Receives the alias the query uses for the table.
pub type Filter<B> = Arc<dyn Fn(B, &str) -> B + Send + Sync>;

/// Decides whether a row (or set of new values) may be written
pub type Check<A> = Arc<
    dyn Fn(
            <A as Adapter>::Client,
            <A as Adapter>::Row,
        ) -> BoxFuture<'static, Result<bool, <A as Adapter>::Error>>
        + Send
        + Sync,
>;

/// Rules for a single table
pub struct TablePolicy<A: Adapter> {
    select_filter: Option<Filter<A::Select>>,
    insert_check: Option<Check<A>>,
    update_filter: Option<Filter<A::Update>>,
    update_check: Option<Check<A>>,
    delete_filter: Option<Filter<A::Delete>>,
}

impl<A: Adapter> TablePolicy<A> {
    /// A policy with every slot empty
    pub fn new() -> Self {
        Self {
            select_filter: None,
            insert_check: None,
            update_filter: None,
            update_check: None,
            delete_filter: None,
        }
    }

    pub fn select_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(A::Select, &str) -> A::Select + Send + Sync + 'static,
    {
        self.select_filter = Some(Arc::new(filter));
        self
    }

    pub fn insert_check<F, Fut>(mut self, check: F) -> Self
    where
        F: Fn(A::Client, A::Row) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, A::Error>> + Send + 'static,
    {
        self.insert_check = Some(Arc::new(move |client, row| Box::pin(check(client, row))));
        self
    }

    pub fn update_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(A::Update, &str) -> A::Update + Send + Sync + 'static,
    {
        self.update_filter = Some(Arc::new(filter));
        self
    }

    pub fn update_check<F, Fut>(mut self, check: F) -> Self
    where
        F: Fn(A::Client, A::Row) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, A::Error>> + Send + 'static,
    {
        self.update_check = Some(Arc::new(move |client, row| Box::pin(check(client, row))));
        self
    }

    pub fn delete_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(A::Delete, &str) -> A::Delete + Send + Sync + 'static,
    {
        self.delete_filter = Some(Arc::new(filter));
        self
    }

    pub fn select(&self) -> Option<&Filter<A::Select>> {
        self.select_filter.as_ref()
    }

    pub fn update(&self) -> Option<&Filter<A::Update>> {
        self.update_filter.as_ref()
    }

    pub fn delete(&self) -> Option<&Filter<A::Delete>> {
        self.delete_filter.as_ref()
    }

    /// The check attached to a write operation, if any
    pub fn check(&self, operation: Operation) -> Option<&Check<A>> {
        match operation {
            Operation::Insert => self.insert_check.as_ref(),
            Operation::Update => self.update_check.as_ref(),
            Operation::Select | Operation::Delete => None,
        }
    }
}

impl<A: Adapter> Default for TablePolicy<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Adapter> Clone for TablePolicy<A> {
    fn clone(&self) -> Self {
        Self {
            select_filter: self.select_filter.clone(),
            insert_check: self.insert_check.clone(),
            update_filter: self.update_filter.clone(),
            update_check: self.update_check.clone(),
            delete_filter: self.delete_filter.clone(),
        }
    }
}

/// Resolved policy for one context
pub struct PolicyTable<A: Adapter> {
    tables: HashMap<String, TablePolicy<A>>,
}

impl<A: Adapter> PolicyTable<A> {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Add (or replace) the rules of a table
    pub fn table(mut self, name: impl Into<String>, policy: TablePolicy<A>) -> Self {
        self.tables.insert(name.into(), policy);
        self
    }

    pub fn get(&self, table: &str) -> Option<&TablePolicy<A>> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<A: Adapter> Default for PolicyTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Produces the policy table for a validated context.
///
/// Implementations must be deterministic and side-effect free for a given
/// context; the gate calls them on every `gated()` and never caches.
#[async_trait]
pub trait PolicyResolver<C, A: Adapter>: Send + Sync {
    async fn resolve(&self, context: &C) -> Result<PolicyTable<A>, RowGateError>;

    /// Tables this resolver always declares, when known without a context
    fn declared_tables(&self) -> Option<Vec<String>> {
        None
    }
}

#[async_trait]
impl<C, A, F> PolicyResolver<C, A> for F
where
    C: Sync,
    A: Adapter,
    F: Fn(&C) -> PolicyTable<A> + Send + Sync,
{
    async fn resolve(&self, context: &C) -> Result<PolicyTable<A>, RowGateError> {
        Ok(self(context))
    }
}

/// Resolver backed by an async function of the context
pub struct AsyncPolicy<F>(F);

pub fn from_async_fn<F>(resolve: F) -> AsyncPolicy<F> {
    AsyncPolicy(resolve)
}

#[async_trait]
impl<C, A, F, Fut> PolicyResolver<C, A> for AsyncPolicy<F>
where
    C: Clone + Send + Sync + 'static,
    A: Adapter,
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PolicyTable<A>, RowGateError>> + Send + 'static,
{
    async fn resolve(&self, context: &C) -> Result<PolicyTable<A>, RowGateError> {
        (self.0)(context.clone()).await
    }
}

type TableRules<C, A> = Arc<dyn Fn(&C) -> TablePolicy<A> + Send + Sync>;

/// Per-table rule factories; the declared table set is known up front so
/// coverage can be asserted when the gate is built.
pub struct PolicySet<C, A: Adapter> {
    tables: BTreeMap<String, TableRules<C, A>>,
}

impl<C, A: Adapter> PolicySet<C, A> {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
        }
    }

    pub fn table<F>(mut self, name: impl Into<String>, rules: F) -> Self
    where
        F: Fn(&C) -> TablePolicy<A> + Send + Sync + 'static,
    {
        self.tables.insert(name.into(), Arc::new(rules));
        self
    }
}

impl<C, A: Adapter> Default for PolicySet<C, A> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C, A> PolicyResolver<C, A> for PolicySet<C, A>
where
    C: Sync,
    A: Adapter,
{
    async fn resolve(&self, context: &C) -> Result<PolicyTable<A>, RowGateError> {
        Ok(self
            .tables
            .iter()
            .fold(PolicyTable::new(), |table, (name, rules)| {
                table.table(name.clone(), rules(context))
            }))
    }

    fn declared_tables(&self) -> Option<Vec<String>> {
        Some(self.tables.keys().cloned().collect())
    }
}

/// Fail when any expected table lacks a policy entry
pub fn assert_coverage<'a>(
    adapter: &str,
    expected: &[String],
    declared: impl IntoIterator<Item = &'a str>,
) -> Result<(), RowGateError> {
    let declared: Vec<&str> = declared.into_iter().collect();
    let missing: Vec<String> = expected
        .iter()
        .filter(|table| !declared.contains(&table.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(RowGateError::missing_policy(adapter, missing))
    }
}
