//! CockroachDB dialect implementation.

use warp_core::{BinaryOp, Function};

use super::{Dialect, PostgresDialect};

/// CockroachDB speaks the PostgreSQL wire dialect; this type composes
/// [`PostgresDialect`] and only overrides the name.
#[derive(Debug, Default, Clone, Copy)]
pub struct CockroachDialect {
    inner: PostgresDialect,
}

impl CockroachDialect {
    /// Creates a new CockroachDB dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: PostgresDialect::new(),
        }
    }
}

impl Dialect for CockroachDialect {
    fn name(&self) -> &'static str {
        "cockroach"
    }

    fn literal_blob(&self, bytes: &[u8]) -> Option<String> {
        self.inner.literal_blob(bytes)
    }

    fn binary_expression(&self, op: BinaryOp, lhs: &str, rhs: &str) -> Option<String> {
        self.inner.binary_expression(op, lhs, rhs)
    }

    fn function_call(&self, function: Function, args: &[String]) -> Option<String> {
        self.inner.function_call(function, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cockroach_delegates_to_postgres() {
        let dialect = CockroachDialect::new();
        assert_eq!(dialect.name(), "cockroach");
        assert_eq!(
            dialect
                .binary_expression(BinaryOp::MatchesRegex, "a", "'x'")
                .as_deref(),
            Some("(a ~* 'x')")
        );
    }
}
