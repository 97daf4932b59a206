//! Pending-check queue
//!
//! Every gated session owns a stack of [`CheckScope`]s: the root scope, and
//! one more per transaction or savepoint opened through the session. Insert
//! and update checks are queued on the scope of the handle that defined them
//! and drained, in order, right before a terminal call on that scope.
//!
//! Each queued check is paired with a [`CheckTicket`] that the defining handle
//! keeps. A handle only executes when every ticket it carries has passed, so a
//! check drained by a sibling handle still blocks its own write if it failed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, trace};

use rowgate_common::{metrics, Operation, RowGateError};

use crate::adapter::Adapter;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

type CheckThunk<E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<bool, E>> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TicketState {
    Pending,
    Passed,
    Failed,
}

/// Outcome slot of one queued check
#[derive(Debug)]
pub struct CheckTicket {
    table: String,
    operation: Operation,
    state: Mutex<TicketState>,
}

impl CheckTicket {
    fn new(table: &str, operation: Operation) -> Self {
        Self {
            table: table.to_string(),
            operation,
            state: Mutex::new(TicketState::Pending),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn is_passed(&self) -> bool {
        *self.state.lock() == TicketState::Passed
    }

    fn settle(&self, passed: bool) {
        *self.state.lock() = if passed {
            TicketState::Passed
        } else {
            TicketState::Failed
        };
    }

    /// Error unless the check ran and passed
    pub fn verify(&self) -> Result<(), RowGateError> {
        let reason = match *self.state.lock() {
            TicketState::Passed => return Ok(()),
            TicketState::Failed => "check rejected the values in an earlier execution",
            TicketState::Pending => "check was discarded before it ran",
        };
        Err(RowGateError::PolicyCheckFailed {
            table: self.table.clone(),
            operation: self.operation,
            mismatches: Vec::new(),
            reason: Some(reason.to_string()),
        })
    }
}

struct PendingCheck<E> {
    ticket: Arc<CheckTicket>,
    run: CheckThunk<E>,
}

/// One level of the check-queue stack
pub struct CheckScope<A: Adapter> {
    id: u64,
    depth: usize,
    check_client: A::Client,
    entries: Mutex<VecDeque<PendingCheck<A::Error>>>,
    running: tokio::sync::Mutex<()>,
    parent: Option<Arc<CheckScope<A>>>,
}

impl<A: Adapter> CheckScope<A> {
    /// Root scope of a session
    pub fn root(check_client: A::Client) -> Arc<Self> {
        Arc::new(Self::with_parent(check_client, None))
    }

    /// Scope for a transaction or savepoint opened under `parent`
    pub fn child(parent: &Arc<Self>, check_client: A::Client) -> Arc<Self> {
        let scope = Self::with_parent(check_client, Some(Arc::clone(parent)));
        trace!(scope = scope.id, parent = parent.id, depth = scope.depth, "Check scope opened");
        Arc::new(scope)
    }

    fn with_parent(check_client: A::Client, parent: Option<Arc<Self>>) -> Self {
        Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            depth: parent.as_ref().map_or(0, |p| p.depth + 1),
            check_client,
            entries: Mutex::new(VecDeque::new()),
            running: tokio::sync::Mutex::new(()),
            parent,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Client checks queued on this scope receive
    pub fn check_client(&self) -> &A::Client {
        &self.check_client
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Append a check; the returned ticket records its outcome
    pub fn enqueue<F>(&self, table: &str, operation: Operation, run: F) -> Arc<CheckTicket>
    where
        F: FnOnce() -> BoxFuture<'static, Result<bool, A::Error>> + Send + 'static,
    {
        let ticket = Arc::new(CheckTicket::new(table, operation));
        let mut entries = self.entries.lock();
        entries.push_back(PendingCheck {
            ticket: Arc::clone(&ticket),
            run: Box::new(run),
        });
        debug!(
            scope = self.id,
            table,
            operation = %operation,
            queued = entries.len(),
            "Check queued"
        );
        ticket
    }

    /// Run queued checks in insertion order.
    ///
    /// Stops at the first check that fails or errors; checks behind it stay
    /// queued. A check returning `false` becomes `PolicyCheckFailed`, a check
    /// returning an error propagates it as is.
    pub async fn drain(&self) -> Result<(), A::Error> {
        let _running = self.running.lock().await;
        let mut drained = 0usize;

        loop {
            let next = self.entries.lock().pop_front();
            let Some(entry) = next else {
                break;
            };
            let ticket = entry.ticket;
            let start = Instant::now();
            let outcome = (entry.run)().await;
            #[allow(clippy::cast_precision_loss)]
            let latency_us = start.elapsed().as_micros() as f64;

            let passed = matches!(outcome, Ok(true));
            ticket.settle(passed);
            metrics::record_check(ticket.table(), ticket.operation(), passed, latency_us);

            match outcome {
                Ok(true) => drained += 1,
                Ok(false) => {
                    debug!(
                        scope = self.id,
                        table = ticket.table(),
                        operation = %ticket.operation(),
                        "Check rejected values"
                    );
                    return Err(RowGateError::check_failed(ticket.table(), ticket.operation()).into());
                }
                Err(err) => {
                    debug!(
                        scope = self.id,
                        table = ticket.table(),
                        operation = %ticket.operation(),
                        error = %err,
                        "Check failed"
                    );
                    return Err(err);
                }
            }
        }

        if drained > 0 {
            trace!(scope = self.id, drained, "Check queue drained");
        }
        Ok(())
    }

    /// Drop every queued check without running it
    pub fn discard(&self) -> usize {
        let mut entries = self.entries.lock();
        let discarded = entries.len();
        entries.clear();
        if discarded > 0 {
            debug!(scope = self.id, discarded, "Pending checks discarded");
        }
        discarded
    }
}
