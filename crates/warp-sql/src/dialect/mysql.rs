//! MySQL dialect implementation.

use warp_core::{BinaryOp, Function};

use super::{ansi_binary_expression, ansi_function_call, Dialect};

/// MySQL dialect. Backtick identifiers, `CONCAT` instead of `||`,
/// `RAND()` and `REGEXP`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn identifier_quote(&self) -> char {
        '`'
    }

    fn binary_expression(&self, op: BinaryOp, lhs: &str, rhs: &str) -> Option<String> {
        match op {
            // || is logical OR in MySQL unless PIPES_AS_CONCAT is set.
            BinaryOp::Cat => Some(format!("CONCAT({lhs}, {rhs})")),
            BinaryOp::MatchesRegex => Some(format!("({lhs} REGEXP {rhs})")),
            BinaryOp::MatchesRegexStrict => Some(format!("({lhs} REGEXP BINARY {rhs})")),
            other => ansi_binary_expression(other, lhs, rhs),
        }
    }

    fn function_call(&self, function: Function, args: &[String]) -> Option<String> {
        match function {
            Function::Concat => Some(format!("CONCAT({})", args.join(", "))),
            Function::Now => Some("NOW()".to_string()),
            other => ansi_function_call(other, args),
        }
    }

    fn random_function(&self) -> Option<&'static str> {
        Some("RAND()")
    }

    fn offset_clause(&self, count: usize) -> String {
        // MySQL has no bare OFFSET; an effectively unbounded LIMIT is
        // the documented idiom.
        format!("LIMIT 18446744073709551615 OFFSET {count}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_dialect() {
        let dialect = MysqlDialect::new();
        assert_eq!(dialect.quote_identifier("city"), "`city`");
        assert_eq!(
            dialect.binary_expression(BinaryOp::Cat, "a", "b").as_deref(),
            Some("CONCAT(a, b)")
        );
        assert_eq!(
            dialect
                .binary_expression(BinaryOp::MatchesRegex, "a", "'x'")
                .as_deref(),
            Some("(a REGEXP 'x')")
        );
        assert_eq!(dialect.random_function(), Some("RAND()"));
    }
}
