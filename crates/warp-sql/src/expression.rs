//! SQL emission of expression trees.
//!
//! Translation is total-or-nothing: any subexpression the dialect
//! cannot represent makes the whole emission return `None`, and the
//! caller falls back to the raster/stream path rather than approximate
//! the semantics in SQL.

use warp_core::{Expression, Function};

use crate::dialect::Dialect;

/// Emits an expression against a table alias. Sibling references
/// qualify with `alias`; Foreign references qualify with
/// `foreign_alias` and fail when none is given. `Identity` has no SQL
/// counterpart.
pub fn sql_expression(
    expression: &Expression,
    dialect: &dyn Dialect,
    alias: &str,
    foreign_alias: Option<&str>,
) -> Option<String> {
    match expression {
        Expression::Literal { value } => dialect.literal_value(value),
        Expression::Identity => None,
        Expression::Sibling { column } => Some(dialect.qualify(alias, column.name())),
        Expression::Foreign { column } => {
            foreign_alias.map(|foreign| dialect.qualify(foreign, column.name()))
        }
        Expression::Binary { op, lhs, rhs } => {
            let left = sql_expression(lhs, dialect, alias, foreign_alias)?;
            let right = sql_expression(rhs, dialect, alias, foreign_alias)?;
            dialect.binary_expression(*op, &left, &right)
        }
        Expression::Call { function, args } => {
            if !function.arity().valid(args.len()) {
                return None;
            }
            let emitted: Vec<String> = args
                .iter()
                .map(|arg| sql_expression(arg, dialect, alias, foreign_alias))
                .collect::<Option<_>>()?;
            match function {
                // IN with a non-literal haystack expands to a chain of
                // comparisons for portability.
                Function::In if !all_literals(&args[1..]) => {
                    expand_membership(dialect, &emitted, warp_core::BinaryOp::Eq, " OR ")
                }
                Function::NotIn if !all_literals(&args[1..]) => {
                    expand_membership(dialect, &emitted, warp_core::BinaryOp::Neq, " AND ")
                }
                other => dialect.function_call(*other, &emitted),
            }
        }
    }
}

fn all_literals(args: &[Expression]) -> bool {
    args.iter()
        .all(|arg| matches!(arg, Expression::Literal { .. }))
}

/// `needle IN (a, b)` as `(needle = a) OR (needle = b)`, and the
/// NOT IN analogue with `<>` and AND.
fn expand_membership(
    dialect: &dyn Dialect,
    emitted: &[String],
    op: warp_core::BinaryOp,
    connective: &str,
) -> Option<String> {
    let (needle, hay) = emitted.split_first()?;
    if hay.is_empty() {
        return None;
    }
    let comparisons: Vec<String> = hay
        .iter()
        .map(|value| dialect.binary_expression(op, needle, value))
        .collect::<Option<_>>()?;
    Some(format!("({})", comparisons.join(connective)))
}
