//! RowGate - Row-level authorization gate
//!
//! Umbrella crate:
//! - [`core`]: the gate, policies and the gated wrapper
//! - [`memory`]: the in-memory query builder client and its adapter
//! - [`common`]: errors, configuration, metrics and tracing setup
//! - [`demo`]: the blog walkthrough used by the `rowgate` binary

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod demo;

pub use rowgate_common as common;
pub use rowgate_core as core;
pub use rowgate_memory as memory;

pub use rowgate_common::{Config, GateConfig, MissingTablePolicy, Operation, RowGateError};
pub use rowgate_core::{Gate, GateBuilder, Gated, PolicySet, PolicyTable, TablePolicy};
