//! SQLite dialect implementation.

use warp_core::{BinaryOp, Function};

use super::{ansi_function_call, Dialect};

/// SQLite dialect.
///
/// The math functions (`SQRT`, `POWER`, trigonometry) are an optional
/// compile-time extension, so they are treated as unsupported and fall
/// back; regex matching has no built-in operator at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn literal_bool(&self, value: bool) -> String {
        // SQLite has no boolean type; 1/0 compare correctly.
        if value { "1" } else { "0" }.to_string()
    }

    fn binary_expression(&self, op: BinaryOp, lhs: &str, rhs: &str) -> Option<String> {
        match op {
            BinaryOp::Mod => Some(format!("({lhs} % {rhs})")),
            BinaryOp::Pow | BinaryOp::MatchesRegex | BinaryOp::MatchesRegexStrict => None,
            other => super::ansi_binary_expression(other, lhs, rhs),
        }
    }

    fn function_call(&self, function: Function, args: &[String]) -> Option<String> {
        match function {
            Function::Sqrt
            | Function::Exp
            | Function::Ln
            | Function::Sign
            | Function::Power
            | Function::Ceiling
            | Function::Floor
            | Function::Cos
            | Function::Sin
            | Function::Tan
            | Function::Acos
            | Function::Asin
            | Function::Atan => None,
            other => ansi_function_call(other, args),
        }
    }

    fn offset_clause(&self, count: usize) -> String {
        // SQLite requires a LIMIT before a bare OFFSET.
        format!("LIMIT -1 OFFSET {count}")
    }
}
