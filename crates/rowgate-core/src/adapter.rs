//! Capability contract between the gate and a wrapped data-access client

use rowgate_common::RowGateError;

/// A data-access client the gate knows how to wrap.
///
/// The associated builder types are the stages policies operate on: filters
/// receive `Select`, `Update` and `Delete` builders, checks receive a `Row`.
/// The adapter crate writes the gated fluent surface for its client on top of
/// [`crate::Gated`]'s transitions.
pub trait Adapter: Send + Sync + 'static {
    /// Root query handle; cloned into every check so checks can query
    type Client: Clone + Send + Sync + 'static;
    /// Read builder narrowed by `select` filters (also used for joins)
    type Select: Send + 'static;
    /// Update builder narrowed by `update` filters
    type Update: Send + 'static;
    /// Delete builder narrowed by `delete` filters
    type Delete: Send + 'static;
    /// Row values handed to insert/update checks
    type Row: Clone + Send + Sync + 'static;
    /// Client error; gate failures convert into it without losing their kind
    type Error: From<RowGateError> + std::error::Error + Send + Sync + 'static;

    /// Adapter name used in error messages
    fn name(&self) -> &str;

    /// Unwrapped client handle
    fn raw(&self) -> Self::Client;

    /// Tables the client knows about, when it can enumerate them
    fn table_names(&self) -> Option<Vec<String>> {
        None
    }
}
