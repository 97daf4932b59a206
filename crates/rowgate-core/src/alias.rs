//! Table reference parsing (`"Post as p"`)

/// A table named in a query, split into its policy key and the name the
/// query uses for it at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRef<'a> {
    /// Unaliased table name, used to look up the policy
    pub table: &'a str,
    /// Alias when present, otherwise the table name
    pub runtime: &'a str,
}

impl<'a> TableRef<'a> {
    pub fn parse(reference: &'a str) -> Self {
        let mut parts = reference.split_whitespace();
        let table = parts.next().unwrap_or("");
        let runtime = parts.last().unwrap_or(table);
        Self { table, runtime }
    }

    pub fn is_aliased(&self) -> bool {
        self.table != self.runtime
    }
}
