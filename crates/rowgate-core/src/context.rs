//! Context validation
//!
//! A [`ContextSchema`] turns the caller-supplied context into the typed value
//! policies are resolved from, or reports structured issues. Schemas are
//! synchronous unless the gate is configured for asynchronous validation.

use std::future::Future;
use std::marker::PhantomData;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use rowgate_common::{GateConfig, Issue, RowGateError};

/// Result of a validation call
pub enum Validation<C> {
    /// Completed synchronously
    Ready(Result<C, Vec<Issue>>),
    /// Needs to be awaited; only accepted with `async_validation`
    Pending(BoxFuture<'static, Result<C, Vec<Issue>>>),
}

impl<C> Validation<C> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Validation::Pending(_))
    }
}

/// Validation entry point for a context type
pub trait ContextSchema<C>: Send + Sync {
    fn validate(&self, input: JsonValue) -> Validation<C>;
}

/// Schema that accepts whatever deserializes into `C`
pub struct Typed<C>(PhantomData<fn() -> C>);

impl<C> Typed<C> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<C> Default for Typed<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: DeserializeOwned> ContextSchema<C> for Typed<C> {
    fn validate(&self, input: JsonValue) -> Validation<C> {
        Validation::Ready(deserialize(input))
    }
}

fn deserialize<C: DeserializeOwned>(input: JsonValue) -> Result<C, Vec<Issue>> {
    serde_json::from_value(input).map_err(|e| vec![Issue::new(e.to_string())])
}

pub struct FnSchema<F>(F);

/// Schema backed by a synchronous function
pub fn from_fn<C, F>(validate: F) -> FnSchema<F>
where
    F: Fn(JsonValue) -> Result<C, Vec<Issue>> + Send + Sync,
{
    FnSchema(validate)
}

impl<C, F> ContextSchema<C> for FnSchema<F>
where
    F: Fn(JsonValue) -> Result<C, Vec<Issue>> + Send + Sync,
{
    fn validate(&self, input: JsonValue) -> Validation<C> {
        Validation::Ready((self.0)(input))
    }
}

pub struct AsyncSchema<F>(F);

/// Schema backed by an asynchronous function
pub fn from_async_fn<C, F, Fut>(validate: F) -> AsyncSchema<F>
where
    F: Fn(JsonValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C, Vec<Issue>>> + Send + 'static,
{
    AsyncSchema(validate)
}

impl<C, F, Fut> ContextSchema<C> for AsyncSchema<F>
where
    F: Fn(JsonValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C, Vec<Issue>>> + Send + 'static,
{
    fn validate(&self, input: JsonValue) -> Validation<C> {
        Validation::Pending(Box::pin((self.0)(input)))
    }
}

/// Validate `input` under `config`.
///
/// With validation disabled the raw input is only deserialized into `C`.
pub async fn validate_context<C, S>(
    schema: &S,
    input: JsonValue,
    config: &GateConfig,
) -> Result<C, RowGateError>
where
    C: DeserializeOwned,
    S: ContextSchema<C> + ?Sized,
{
    if config.disable_context_validation {
        return deserialize(input).map_err(RowGateError::context);
    }

    match schema.validate(input) {
        Validation::Ready(result) => result.map_err(RowGateError::context),
        Validation::Pending(_) if !config.async_validation => Err(RowGateError::context(vec![
            Issue::new("context schema validated asynchronously; enable async_validation to allow it"),
        ])),
        Validation::Pending(future) => future.await.map_err(RowGateError::context),
    }
}
