//! Gate facade
//!
//! Entry point for application code: `gated(ctx)` validates the context,
//! resolves the policy table for it and returns a freshly scoped gated root
//! handle. `ungated()`/`system()` return the raw client for trusted code.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use rowgate_common::{metrics, GateConfig, Issue, RowGateError};

use crate::adapter::Adapter;
use crate::context::{validate_context, ContextSchema, Typed};
use crate::gated::{Gated, Session};
use crate::policy::{assert_coverage, PolicyResolver};
use crate::queue::CheckScope;

/// Builder for a [`Gate`]
pub struct GateBuilder<C, A: Adapter> {
    adapter: A,
    schema: Box<dyn ContextSchema<C>>,
    policy: Option<Box<dyn PolicyResolver<C, A>>>,
    config: GateConfig,
}

impl<C, A> GateBuilder<C, A>
where
    C: DeserializeOwned + Send + Sync + 'static,
    A: Adapter,
{
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            schema: Box::new(Typed::<C>::new()),
            policy: None,
            config: GateConfig::default(),
        }
    }

    /// Schema the context is validated with; defaults to deserializing into `C`
    #[must_use]
    pub fn context_schema(mut self, schema: impl ContextSchema<C> + 'static) -> Self {
        self.schema = Box::new(schema);
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: impl PolicyResolver<C, A> + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    #[must_use]
    pub fn config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// Skip schema validation; policies receive the raw context deserialized as is
    #[must_use]
    pub fn disable_context_validation(mut self) -> Self {
        self.config.disable_context_validation = true;
        self
    }

    /// Build the gate, asserting policy coverage when both the adapter's
    /// tables and the policy's declared tables are known up front
    pub fn build(self) -> Result<Gate<C, A>, RowGateError> {
        let policy = self.policy.ok_or_else(|| RowGateError::PolicyConfiguration {
            message: format!("Gate({}): no policy configured", self.adapter.name()),
            tables: Vec::new(),
        })?;

        let mut coverage_asserted = false;
        if self.config.require_full_coverage {
            if let (Some(expected), Some(declared)) =
                (self.adapter.table_names(), policy.declared_tables())
            {
                assert_coverage(
                    self.adapter.name(),
                    &expected,
                    declared.iter().map(String::as_str),
                )?;
                coverage_asserted = true;
            }
        }

        info!(
            adapter = self.adapter.name(),
            validation = !self.config.disable_context_validation,
            missing_table = ?self.config.missing_table,
            "Gate initialized"
        );

        Ok(Gate {
            adapter: self.adapter,
            schema: self.schema,
            policy,
            config: self.config,
            coverage_asserted,
        })
    }
}

/// Policy gate in front of an adapter's client
pub struct Gate<C, A: Adapter> {
    adapter: A,
    schema: Box<dyn ContextSchema<C>>,
    policy: Box<dyn PolicyResolver<C, A>>,
    config: GateConfig,
    coverage_asserted: bool,
}

impl<C, A> Gate<C, A>
where
    C: DeserializeOwned + Send + Sync + 'static,
    A: Adapter,
{
    pub fn builder(adapter: A) -> GateBuilder<C, A> {
        GateBuilder::new(adapter)
    }

    /// Open a gated session for `context`
    pub async fn gated(&self, context: impl Serialize) -> Result<Gated<A::Client, A>, RowGateError> {
        let input = serde_json::to_value(context)
            .map_err(|e| RowGateError::context(vec![Issue::new(e.to_string())]))?;
        let context: C = validate_context(self.schema.as_ref(), input, &self.config).await?;
        let policy = self.policy.resolve(&context).await?;

        let known_tables = self.adapter.table_names();
        if self.config.require_full_coverage && !self.coverage_asserted {
            if let Some(expected) = &known_tables {
                let declared = policy.table_names();
                assert_coverage(
                    self.adapter.name(),
                    expected,
                    declared.iter().map(String::as_str),
                )?;
            }
        }

        let session = Arc::new(Session::new(
            self.adapter.name(),
            policy,
            known_tables.unwrap_or_default(),
            self.config.missing_table,
            self.config.allowed_raw_helpers.clone(),
        ));
        let client = self.adapter.raw();
        let scope = CheckScope::root(client.clone());

        metrics::record_session_opened();
        debug!(
            session = session.id,
            adapter = self.adapter.name(),
            "Gated session opened"
        );
        Ok(Gated::open(client, session, scope))
    }

    /// The raw client; bypasses every policy
    pub fn ungated(&self) -> A::Client {
        self.adapter.raw()
    }

    /// Alias of [`Gate::ungated`] for trusted internal code paths
    pub fn system(&self) -> A::Client {
        self.ungated()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}
