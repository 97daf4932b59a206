//! The gated wrapper
//!
//! [`Gated<B, A>`] wraps one builder stage `B` of adapter `A` together with
//! the session's resolved policy and the check scope it queues on. Its public
//! surface only reports on the session; everything that reaches the wrapped
//! builder lives in [`crate::transitions`], which adapter crates use to write
//! their fluent surface.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rowgate_common::{MissingTablePolicy, Operation};

use crate::adapter::Adapter;
use crate::policy::{Check, PolicyTable};
use crate::queue::{CheckScope, CheckTicket};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by every handle of one `gated()` session
pub(crate) struct Session<A: Adapter> {
    pub(crate) id: u64,
    pub(crate) adapter: String,
    pub(crate) policy: PolicyTable<A>,
    /// Tables the adapter reported when the session opened
    pub(crate) known_tables: Vec<String>,
    pub(crate) missing_table: MissingTablePolicy,
    pub(crate) allowed_raw_helpers: Vec<String>,
}

impl<A: Adapter> Session<A> {
    pub(crate) fn new(
        adapter: &str,
        policy: PolicyTable<A>,
        known_tables: Vec<String>,
        missing_table: MissingTablePolicy,
        allowed_raw_helpers: Vec<String>,
    ) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            adapter: adapter.to_string(),
            policy,
            known_tables,
            missing_table,
            allowed_raw_helpers,
        }
    }

    /// True when `name` is a real table the session knows of
    pub(crate) fn is_table(&self, name: &str) -> bool {
        self.policy.contains(name) || self.known_tables.iter().any(|t| t == name)
    }
}

/// Table whose write builder is active, with the check its values go through
pub(crate) struct MutationTarget<A: Adapter> {
    pub(crate) table: String,
    pub(crate) operation: Operation,
    pub(crate) check: Check<A>,
}

impl<A: Adapter> Clone for MutationTarget<A> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            operation: self.operation,
            check: Arc::clone(&self.check),
        }
    }
}

/// A builder stage gated by a session's policy
pub struct Gated<B, A: Adapter> {
    pub(crate) inner: B,
    pub(crate) session: Arc<Session<A>>,
    pub(crate) scope: Arc<CheckScope<A>>,
    pub(crate) tickets: Vec<Arc<CheckTicket>>,
    pub(crate) mutation: Option<MutationTarget<A>>,
    /// CTE names declared on this handle; exempt from read lookups only
    pub(crate) virtual_tables: Vec<String>,
}

impl<B, A: Adapter> Gated<B, A> {
    pub(crate) fn open(inner: B, session: Arc<Session<A>>, scope: Arc<CheckScope<A>>) -> Self {
        Self {
            inner,
            session,
            scope,
            tickets: Vec::new(),
            mutation: None,
            virtual_tables: Vec::new(),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session.id
    }

    pub fn adapter_name(&self) -> &str {
        &self.session.adapter
    }

    /// Checks this handle depends on that have not passed yet
    pub fn pending_checks(&self) -> usize {
        self.tickets.iter().filter(|t| !t.is_passed()).count()
    }

    /// Run queued checks of this scope, then confirm this handle's own
    /// checks all passed
    pub async fn settle(&self) -> Result<(), A::Error> {
        self.scope.drain().await?;
        for ticket in &self.tickets {
            ticket.verify()?;
        }
        Ok(())
    }
}

impl<B: fmt::Debug, A: Adapter> fmt::Debug for Gated<B, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gated")
            .field("inner", &self.inner)
            .field("session", &self.session.id)
            .field("depth", &self.scope.depth())
            .field("pending_checks", &self.pending_checks())
            .finish_non_exhaustive()
    }
}
