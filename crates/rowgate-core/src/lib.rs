//! Row-level authorization gate
//!
//! Wraps a data-access client so every operation issued through it is
//! narrowed and checked against a per-context policy table:
//! - Context validation before a session is opened
//! - Per-table select/update/delete filters applied to builders as they are created
//! - Insert/update checks queued and run right before execution
//! - Nested builders (subqueries, CTEs) and transactions gated recursively
//! - Raw, uninspectable expressions refused while gated

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod alias;
pub mod check;
pub mod context;
pub mod gate;
pub mod gated;
pub mod policy;
pub mod queue;
pub mod raw;
#[doc(hidden)]
pub mod transitions;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::Adapter;
pub use alias::TableRef;
pub use check::expect_fields;
pub use context::{ContextSchema, Validation};
pub use gate::{Gate, GateBuilder};
pub use gated::Gated;
pub use policy::{PolicyResolver, PolicySet, PolicyTable, TablePolicy};
pub use queue::{CheckScope, CheckTicket};
pub use raw::{RawFragment, RawInspect};

pub use rowgate_common::{
    ErrorKind, GateConfig, Issue, MissingTablePolicy, Mismatch, Operation, Result, RowGateError,
};
