//! Transitions adapter crates build their gated surface from
//!
//! Each fluent call of an adapter is the real builder call followed by one of
//! these, so every derived stage stays gated:
//!
//! - `after_read` / `after_join` / `after_delete` / `after_update` apply the
//!   table's filter to the builder as soon as the table is named
//! - `after_insert` + `after_mutation_define` queue insert/update checks
//! - `after_cte` declares a CTE name for later reads
//! - `after_composite` gates a nested builder handed to a callback
//! - [`terminal`] drains the check queue and then runs the real call
//! - `seed` opens a fresh scope for a transaction or savepoint
//!
//! `pass`/`derive` forward calls that do not change what the query touches.
//! These reach the wrapped builder, so they are kept out of application
//! preludes: only the adapter's own surface should call them.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, trace};

use rowgate_common::{metrics, MissingTablePolicy, Operation, RowGateError};

use crate::adapter::Adapter;
use crate::alias::TableRef;
use crate::gated::{Gated, MutationTarget, Session};
use crate::policy::{Filter, TablePolicy};
use crate::queue::CheckScope;
use crate::raw::{self, RawInspect};

/// Adapter-side transitions of a [`Gated`] stage
pub trait Transitions<B, A: Adapter>: Sized {
    /// Forward a call that keeps the query's tables and values as they are
    fn pass<N>(self, f: impl FnOnce(B) -> N) -> Gated<N, A>;

    fn try_pass<N, E>(self, f: impl FnOnce(B) -> Result<N, E>) -> Result<Gated<N, A>, E>;

    /// Like `pass`, for calls made through a shared reference
    fn derive<N>(&self, f: impl FnOnce(&B) -> N) -> Gated<N, A>;

    /// Declare a CTE name that later reads on this handle resolve to the
    /// CTE instead of a table. Refused when it would shadow a real table.
    fn after_cte(self, name: &str) -> Result<Self, RowGateError>;

    /// Apply each read table's select filter
    fn after_read(self, tables: &[&str]) -> Result<Self, RowGateError>
    where
        A: Adapter<Select = B>;

    /// Apply the joined table's select filter under the join alias
    fn after_join(self, table: &str) -> Result<Self, RowGateError>
    where
        A: Adapter<Select = B>;

    fn after_delete(self, tables: &[&str]) -> Result<Self, RowGateError>
    where
        A: Adapter<Delete = B>;

    /// Apply the update filter and arm the update check for `set` values
    fn after_update(self, table: &str) -> Result<Self, RowGateError>
    where
        A: Adapter<Update = B>;

    /// Arm the insert check for the values supplied next
    fn after_insert(self, table: &str) -> Result<Self, RowGateError>;

    /// Queue the armed check once per row of values just supplied
    #[must_use]
    fn after_mutation_define(self, rows: Vec<A::Row>) -> Self;

    /// Refuse a call whose values cannot be inspected while an insert check is armed
    fn forbid_raw_escape(&self, what: &str) -> Result<(), RowGateError>;

    /// Refuse raw fragments in `value` unless an allowed helper produced them
    fn inspect<T: RawInspect + ?Sized>(&self, value: &T) -> Result<(), RowGateError>;

    /// A gated handle for a nested builder sharing this handle's policy and scope
    fn nested<N>(&self, inner: N) -> Gated<N, A>;

    /// Take back a nested builder; its checks now guard this handle too
    fn absorb<R: RawInspect>(&mut self, nested: Gated<R, A>) -> Result<R, RowGateError>;

    /// Gate the builder `make` derives from this stage, hand it to a user
    /// callback and take back what the callback built
    fn after_composite<N, R: RawInspect>(
        &mut self,
        make: impl FnOnce(&B) -> N,
        build: impl FnOnce(Gated<N, A>) -> Result<Gated<R, A>, RowGateError>,
    ) -> Result<R, RowGateError>;

    /// Check scope this handle queues on
    fn scope(&self) -> &Arc<CheckScope<A>>;

    /// Drop the scope's queued checks (the work they guard is being abandoned)
    fn discard_pending(&self) -> usize;

    /// Seed for handles of a transaction or savepoint opened from here
    fn seed(&self) -> ScopeSeed<A>;
}

impl<B, A: Adapter> Transitions<B, A> for Gated<B, A> {
    fn pass<N>(self, f: impl FnOnce(B) -> N) -> Gated<N, A> {
        Gated {
            inner: f(self.inner),
            session: self.session,
            scope: self.scope,
            tickets: self.tickets,
            mutation: self.mutation,
            virtual_tables: self.virtual_tables,
        }
    }

    fn try_pass<N, E>(self, f: impl FnOnce(B) -> Result<N, E>) -> Result<Gated<N, A>, E> {
        let inner = f(self.inner)?;
        Ok(Gated {
            inner,
            session: self.session,
            scope: self.scope,
            tickets: self.tickets,
            mutation: self.mutation,
            virtual_tables: self.virtual_tables,
        })
    }

    fn derive<N>(&self, f: impl FnOnce(&B) -> N) -> Gated<N, A> {
        Gated {
            inner: f(&self.inner),
            session: Arc::clone(&self.session),
            scope: Arc::clone(&self.scope),
            tickets: self.tickets.clone(),
            mutation: self.mutation.clone(),
            virtual_tables: self.virtual_tables.clone(),
        }
    }

    fn after_cte(mut self, name: &str) -> Result<Self, RowGateError> {
        if self.session.is_table(name) {
            metrics::record_unsupported("cte_shadows_table");
            return Err(RowGateError::unsupported(format!(
                "RowGate does not support a CTE named \"{name}\": it shadows a table of \
                 Gate({}). Rename the CTE or use the ungated handle instead.",
                self.session.adapter
            )));
        }
        if !self.virtual_tables.iter().any(|v| v == name) {
            self.virtual_tables.push(name.to_string());
        }
        Ok(self)
    }

    fn after_read(self, tables: &[&str]) -> Result<Self, RowGateError>
    where
        A: Adapter<Select = B>,
    {
        narrow(self, tables, Lookup::Read, Operation::Select, |rules| rules.select().cloned())
    }

    fn after_join(self, table: &str) -> Result<Self, RowGateError>
    where
        A: Adapter<Select = B>,
    {
        narrow(self, &[table], Lookup::Read, Operation::Select, |rules| rules.select().cloned())
    }

    fn after_delete(self, tables: &[&str]) -> Result<Self, RowGateError>
    where
        A: Adapter<Delete = B>,
    {
        narrow(self, tables, Lookup::Write, Operation::Delete, |rules| rules.delete().cloned())
    }

    fn after_update(self, table: &str) -> Result<Self, RowGateError>
    where
        A: Adapter<Update = B>,
    {
        let mut gated = narrow(self, &[table], Lookup::Write, Operation::Update, |rules| {
            rules.update().cloned()
        })?;
        arm(&mut gated, table, Operation::Update)?;
        Ok(gated)
    }

    fn after_insert(mut self, table: &str) -> Result<Self, RowGateError> {
        arm(&mut self, table, Operation::Insert)?;
        Ok(self)
    }

    fn after_mutation_define(mut self, rows: Vec<A::Row>) -> Self {
        let Some(target) = self.mutation.clone() else {
            return self;
        };
        for row in rows {
            let check = Arc::clone(&target.check);
            let client = self.scope.check_client().clone();
            let ticket = self
                .scope
                .enqueue(&target.table, target.operation, move || check(client, row));
            self.tickets.push(ticket);
        }
        self
    }

    fn forbid_raw_escape(&self, what: &str) -> Result<(), RowGateError> {
        match &self.mutation {
            Some(target) if target.operation == Operation::Insert => {
                metrics::record_unsupported("insert_escape");
                Err(RowGateError::unsupported(format!(
                    "RowGate does not support `{what}` on inserts into \"{}\" while an insert \
                     check is active. Use the ungated handle instead.",
                    target.table
                )))
            }
            _ => Ok(()),
        }
    }

    fn inspect<T: RawInspect + ?Sized>(&self, value: &T) -> Result<(), RowGateError> {
        raw::assert_no_raw(value, &self.session.allowed_raw_helpers)
    }

    fn nested<N>(&self, inner: N) -> Gated<N, A> {
        Gated {
            inner,
            session: Arc::clone(&self.session),
            scope: Arc::clone(&self.scope),
            tickets: Vec::new(),
            mutation: None,
            virtual_tables: self.virtual_tables.clone(),
        }
    }

    fn absorb<R: RawInspect>(&mut self, nested: Gated<R, A>) -> Result<R, RowGateError> {
        nested.inspect(&nested.inner)?;
        self.tickets.extend(nested.tickets);
        Ok(nested.inner)
    }

    fn after_composite<N, R: RawInspect>(
        &mut self,
        make: impl FnOnce(&B) -> N,
        build: impl FnOnce(Gated<N, A>) -> Result<Gated<R, A>, RowGateError>,
    ) -> Result<R, RowGateError> {
        let nested = self.nested(make(&self.inner));
        let built = build(nested)?;
        self.absorb(built)
    }

    fn scope(&self) -> &Arc<CheckScope<A>> {
        &self.scope
    }

    fn discard_pending(&self) -> usize {
        self.scope.discard()
    }

    fn seed(&self) -> ScopeSeed<A> {
        ScopeSeed {
            session: Arc::clone(&self.session),
            parent: Arc::clone(&self.scope),
        }
    }
}

/// Settle `gated`, then hand its builder to the real terminal call
pub async fn terminal<B, A, T, E, F, Fut>(gated: Gated<B, A>, run: F) -> Result<T, E>
where
    A: Adapter,
    E: From<A::Error>,
    F: FnOnce(B) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    gated.settle().await.map_err(E::from)?;
    run(gated.inner).await
}

/// Whether CTE names declared on the handle may stand in for a table
#[derive(Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Read,
    Write,
}

fn table_rules<'s, B, A: Adapter>(
    gated: &'s Gated<B, A>,
    table: &str,
    lookup: Lookup,
) -> Result<Option<&'s TablePolicy<A>>, RowGateError> {
    if lookup == Lookup::Read && gated.virtual_tables.iter().any(|v| v == table) {
        return Ok(None);
    }
    let session: &Session<A> = &gated.session;
    match session.policy.get(table) {
        Some(rules) => Ok(Some(rules)),
        None if session.missing_table == MissingTablePolicy::Allow => Ok(None),
        None => {
            debug!(session = session.id, table, "No policy entry for table");
            Err(RowGateError::missing_policy(&session.adapter, vec![table.to_string()]))
        }
    }
}

fn narrow<B, A: Adapter>(
    mut gated: Gated<B, A>,
    tables: &[&str],
    lookup: Lookup,
    operation: Operation,
    pick: impl Fn(&TablePolicy<A>) -> Option<Filter<B>>,
) -> Result<Gated<B, A>, RowGateError> {
    for reference in tables {
        let table = TableRef::parse(reference);
        let Some(filter) = table_rules(&gated, table.table, lookup)?.and_then(&pick) else {
            continue;
        };
        gated.inner = filter(gated.inner, table.runtime);
        metrics::record_filter_applied(table.table, operation);
        trace!(
            session = gated.session.id,
            table = table.table,
            alias = table.runtime,
            operation = %operation,
            "Filter applied"
        );
    }
    Ok(gated)
}

fn arm<B, A: Adapter>(
    gated: &mut Gated<B, A>,
    reference: &str,
    operation: Operation,
) -> Result<(), RowGateError> {
    let table = TableRef::parse(reference).table;
    let check = table_rules(gated, table, Lookup::Write)?
        .and_then(|rules| rules.check(operation).cloned());
    gated.mutation = check.map(|check| MutationTarget {
        table: table.to_string(),
        operation,
        check,
    });
    Ok(())
}

/// Opens gated handles on a fresh, empty check scope
pub struct ScopeSeed<A: Adapter> {
    session: Arc<Session<A>>,
    parent: Arc<CheckScope<A>>,
}

impl<A: Adapter> ScopeSeed<A> {
    /// Wrap a transaction (or savepoint) handle. Checks queued through it
    /// run against `check_client`.
    pub fn open<N>(&self, inner: N, check_client: A::Client) -> Gated<N, A> {
        let scope = CheckScope::child(&self.parent, check_client);
        debug!(
            session = self.session.id,
            depth = scope.depth(),
            "Transaction scope opened"
        );
        Gated::open(inner, Arc::clone(&self.session), scope)
    }
}

impl<A: Adapter> Clone for ScopeSeed<A> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            parent: Arc::clone(&self.parent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::testing::{session, TestAdapter, TestClient, TestError};
    use serde_json::{json, Value};

    fn root(missing: MissingTablePolicy) -> Gated<TestClient, TestAdapter> {
        let (client, session) = session(missing);
        let scope = CheckScope::root(client.clone());
        Gated::open(client, session, scope)
    }

    fn read(
        root: &Gated<TestClient, TestAdapter>,
        table: &str,
    ) -> Result<Gated<Vec<String>, TestAdapter>, RowGateError> {
        root.derive(|_| vec![format!("from {table}")]).after_read(&[table])
    }

    fn delete(
        root: &Gated<TestClient, TestAdapter>,
        table: &str,
    ) -> Result<Gated<Vec<String>, TestAdapter>, RowGateError> {
        root.derive(|_| vec![format!("delete {table}")]).after_delete(&[table])
    }

    #[test]
    fn test_read_applies_filter_with_alias() {
        let db = root(MissingTablePolicy::Deny);
        let query = read(&db, "Post as p").unwrap();
        assert_eq!(query.inner, vec!["from Post as p", "p.authorId = 1"]);
    }

    #[test]
    fn test_join_filter_uses_joined_alias() {
        let db = root(MissingTablePolicy::Deny);
        let query = read(&db, "Post")
            .unwrap()
            .pass(|mut q| {
                q.push("join User as u".into());
                q
            })
            .after_join("User as u")
            .unwrap();
        assert_eq!(query.inner.last().unwrap(), "u.id = 1");
    }

    #[test]
    fn test_missing_table_denied_by_default() {
        let db = root(MissingTablePolicy::Deny);
        let err = read(&db, "Comment").unwrap_err();
        match err {
            RowGateError::PolicyConfiguration { tables, .. } => assert_eq!(tables, vec!["Comment"]),
            other => panic!("unexpected error: {other:?}"),
        }

        let open = root(MissingTablePolicy::Allow);
        assert_eq!(read(&open, "Comment").unwrap().inner, vec!["from Comment"]);
    }

    #[test]
    fn test_cte_names_only_exempt_reads() {
        let db = root(MissingTablePolicy::Deny).after_cte("recent").unwrap();
        assert_eq!(read(&db, "recent").unwrap().inner, vec!["from recent"]);

        // writes never resolve to the CTE
        let err = delete(&db, "recent").unwrap_err();
        assert_eq!(err.code(), "ROWGATE_POLICY_CONFIG_ERROR");
        assert!(db.derive(Clone::clone).after_insert("recent").is_err());
    }

    #[rstest::rstest]
    #[case("Post")]
    #[case("Tag")]
    #[case("Audit")]
    fn test_cte_cannot_shadow_a_table(#[case] name: &str) {
        let err = root(MissingTablePolicy::Allow).after_cte(name).unwrap_err();
        assert_eq!(err.code(), "ROWGATE_NOT_SUPPORTED_ERROR");
        assert!(err.to_string().contains(name));
    }

    #[tokio::test]
    async fn test_terminal_runs_checks_before_the_call() {
        let db = root(MissingTablePolicy::Deny);
        let insert = db
            .derive(Clone::clone)
            .after_insert("Post")
            .unwrap()
            .after_mutation_define(vec![json!({ "authorId": "2" })]);
        assert_eq!(insert.pending_checks(), 1);

        let ran = AtomicBool::new(false);
        let err = terminal(insert, |_| async {
            ran.store(true, Ordering::SeqCst);
            Ok::<_, TestError>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TestError::Gate(RowGateError::PolicyCheckFailed { .. })));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_ticket_blocks_handle_after_sibling_drain() {
        let db = root(MissingTablePolicy::Deny);
        let bad = db
            .derive(Clone::clone)
            .after_insert("Post")
            .unwrap()
            .after_mutation_define(vec![json!({ "authorId": "2" })]);

        // a sibling drains the shared queue and sees the failure first
        assert!(db.settle().await.is_err());
        assert!(db.settle().await.is_ok());

        let err = terminal(bad, |_| async { Ok::<_, TestError>(()) }).await.unwrap_err();
        assert!(matches!(err, TestError::Gate(RowGateError::PolicyCheckFailed { .. })));
    }

    #[tokio::test]
    async fn test_composite_merges_nested_checks() {
        let mut db = root(MissingTablePolicy::Deny);
        let nested: Value = db
            .after_composite(|_| json!({}), |inner| {
                Ok(inner
                    .after_insert("Post")?
                    .after_mutation_define(vec![json!({ "authorId": "1" })]))
            })
            .unwrap();

        assert_eq!(nested, json!({}));
        assert_eq!(db.pending_checks(), 1);
        db.settle().await.unwrap();
        assert_eq!(db.pending_checks(), 0);
    }

    #[test]
    fn test_raw_escape_refused_on_checked_insert() {
        let db = root(MissingTablePolicy::Deny);
        let insert = db.derive(Clone::clone).after_insert("Post").unwrap();
        let err = insert.forbid_raw_escape("expression").unwrap_err();
        assert_eq!(err.code(), "ROWGATE_NOT_SUPPORTED_ERROR");

        // no insert check on Tag, so nothing to protect
        let tag = db.derive(Clone::clone).after_insert("Tag").unwrap();
        assert!(tag.forbid_raw_escape("expression").is_ok());
    }

    #[tokio::test]
    async fn test_seed_opens_isolated_scope() {
        let db = root(MissingTablePolicy::Deny);
        let _queued = db
            .derive(Clone::clone)
            .after_insert("Post")
            .unwrap()
            .after_mutation_define(vec![json!({ "authorId": "2" })]);

        let trx = db.seed().open(TestClient::default(), TestClient::default());
        assert_eq!(trx.scope().depth(), 1);
        assert!(trx.scope().is_empty());
        assert!(trx.settle().await.is_ok());

        assert_eq!(db.discard_pending(), 1);
    }
}
