//! RowGate Common - Shared utilities and types
//!
//! This crate provides functionality used across all RowGate components:
//! - The closed error taxonomy surfaced to callers
//! - Configuration management
//! - Metrics and tracing setup
//! - Common type definitions

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;
pub mod types;

pub use config::{Config, GateConfig, MissingTablePolicy, TelemetryConfig};
pub use error::{ErrorKind, Issue, Mismatch, Result, RowGateError};
pub use types::Operation;
