//! PostgreSQL dialect implementation.

use std::fmt::Write as _;

use warp_core::{BinaryOp, Function};

use super::{ansi_binary_expression, ansi_function_call, Dialect};

/// PostgreSQL dialect. Regex via `~`/`~*`, `POSITION` for contains,
/// bytea blob literals.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn literal_blob(&self, bytes: &[u8]) -> Option<String> {
        let mut hex = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            let _ = write!(hex, "{byte:02x}");
        }
        Some(format!("'\\x{hex}'::bytea"))
    }

    fn binary_expression(&self, op: BinaryOp, lhs: &str, rhs: &str) -> Option<String> {
        match op {
            BinaryOp::Contains => Some(format!(
                "(POSITION(LOWER({rhs}) IN LOWER({lhs})) > 0)"
            )),
            BinaryOp::ContainsStrict => Some(format!("(POSITION({rhs} IN {lhs}) > 0)")),
            BinaryOp::MatchesRegex => Some(format!("({lhs} ~* {rhs})")),
            BinaryOp::MatchesRegexStrict => Some(format!("({lhs} ~ {rhs})")),
            other => ansi_binary_expression(other, lhs, rhs),
        }
    }

    fn function_call(&self, function: Function, args: &[String]) -> Option<String> {
        match function {
            Function::Left => args
                .first()
                .zip(args.get(1))
                .map(|(s, n)| format!("LEFT({s}, {n})")),
            Function::Right => args
                .first()
                .zip(args.get(1))
                .map(|(s, n)| format!("RIGHT({s}, {n})")),
            Function::Now => Some("NOW()".to_string()),
            other => ansi_function_call(other, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_dialect() {
        let dialect = PostgresDialect::new();
        assert_eq!(
            dialect
                .binary_expression(BinaryOp::MatchesRegex, "a", "'x'")
                .as_deref(),
            Some("(a ~* 'x')")
        );
        assert_eq!(
            dialect
                .function_call(Function::Left, &["a".to_string(), "2".to_string()])
                .as_deref(),
            Some("LEFT(a, 2)")
        );
        assert_eq!(
            dialect.literal_blob(&[0xAB]).as_deref(),
            Some("'\\xab'::bytea")
        );
    }
}
