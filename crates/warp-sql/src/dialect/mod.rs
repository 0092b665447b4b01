//! SQL dialect support.
//!
//! Backends differ in quoting, literals, function spellings and which
//! constructs exist at all. Every emitter returns `Option`: `None`
//! means the construct cannot be represented in this dialect, and the
//! caller falls back to the raster/stream path instead of emitting
//! wrong SQL.

mod cockroach;
mod mysql;
mod postgres;
mod sqlite;

use std::fmt;
use std::fmt::Write as _;

pub use cockroach::CockroachDialect;
pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use warp_core::{BinaryOp, Function, Value, REFERENCE_UNIX_OFFSET};
use warp_engine::JoinType;

/// Trait for dialect-specific SQL emission.
///
/// The defaults are ANSI-flavored; each backend overrides what it
/// spells differently or does not support.
pub trait Dialect: fmt::Debug + Send + Sync {
    /// The name of the dialect.
    fn name(&self) -> &'static str;

    /// The identifier quote character.
    fn identifier_quote(&self) -> char {
        '"'
    }

    /// Quotes an identifier, escaping embedded quote characters by
    /// doubling.
    fn quote_identifier(&self, name: &str) -> String {
        let quote = self.identifier_quote();
        let escaped = name.replace(quote, &format!("{quote}{quote}"));
        format!("{quote}{escaped}{quote}")
    }

    /// Qualifies a column with a table alias.
    fn qualify(&self, alias: &str, column: &str) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(alias),
            self.quote_identifier(column)
        )
    }

    /// A string literal with embedded quotes doubled.
    fn literal_string(&self, value: &str) -> String {
        let escaped = value.replace('\'', "''");
        format!("'{escaped}'")
    }

    /// A boolean literal.
    fn literal_bool(&self, value: bool) -> String {
        if value { "TRUE" } else { "FALSE" }.to_string()
    }

    /// A blob literal, when the dialect has one.
    fn literal_blob(&self, bytes: &[u8]) -> Option<String> {
        let mut hex = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            let _ = write!(hex, "{byte:02X}");
        }
        Some(format!("X'{hex}'"))
    }

    /// A date literal. The portable default is the UNIX timestamp as a
    /// number; dialects with a native form override this.
    fn literal_date(&self, seconds_since_reference: f64) -> Option<String> {
        Some(format!(
            "{}",
            seconds_since_reference + REFERENCE_UNIX_OFFSET
        ))
    }

    /// Any value as a literal; `None` when unrepresentable (Invalid
    /// has no SQL form).
    fn literal_value(&self, value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(self.literal_string(s)),
            Value::Int(i) => Some(i.to_string()),
            Value::Double(d) if d.is_finite() => Some(format!("{d}")),
            Value::Double(_) => None,
            Value::Bool(b) => Some(self.literal_bool(*b)),
            Value::Date(d) => self.literal_date(*d),
            Value::Blob(b) => self.literal_blob(b),
            Value::Empty => Some("NULL".to_string()),
            Value::Invalid => None,
        }
    }

    /// An infix binary expression, parenthesized. `None` for
    /// operators this dialect cannot express.
    fn binary_expression(&self, op: BinaryOp, lhs: &str, rhs: &str) -> Option<String> {
        ansi_binary_expression(op, lhs, rhs)
    }

    /// A scalar function call. `None` for functions this dialect
    /// cannot express; the caller then falls back off the SQL path.
    fn function_call(&self, function: Function, args: &[String]) -> Option<String> {
        ansi_function_call(function, args)
    }

    /// An aggregation over an already-emitted map expression. `None`
    /// for reducers with no SQL counterpart in this dialect.
    fn aggregation(&self, reduce: Function, map_sql: &str) -> Option<String> {
        match reduce {
            Function::Sum => Some(format!("SUM({map_sql})")),
            Function::Average => Some(format!("AVG({map_sql})")),
            Function::Min => Some(format!("MIN({map_sql})")),
            Function::Max => Some(format!("MAX({map_sql})")),
            Function::Count => Some(format!("COUNT({map_sql})")),
            Function::CountAll => Some("COUNT(*)".to_string()),
            _ => None,
        }
    }

    /// The keyword introducing a join of the given type.
    fn join_keyword(&self, join_type: JoinType) -> Option<&'static str> {
        match join_type {
            JoinType::Inner => Some("INNER JOIN"),
            JoinType::Left => Some("LEFT JOIN"),
        }
    }

    /// The backend's random-value function, used for `ORDER BY` in
    /// random sampling. `None` disables random pushdown.
    fn random_function(&self) -> Option<&'static str> {
        Some("RANDOM()")
    }

    /// The clause limiting a result to `count` rows.
    fn limit_clause(&self, count: usize) -> String {
        format!("LIMIT {count}")
    }

    /// The clause skipping `count` rows without limiting.
    fn offset_clause(&self, count: usize) -> String {
        format!("OFFSET {count}")
    }

    /// Whether UNION ALL between two compatible queries is supported.
    fn supports_union(&self) -> bool {
        true
    }
}

/// The ANSI-flavored default operator emission shared by the concrete
/// dialects.
pub(crate) fn ansi_binary_expression(op: BinaryOp, lhs: &str, rhs: &str) -> Option<String> {
    let infix = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Gt => ">",
        BinaryOp::Lt => "<",
        BinaryOp::Gte => ">=",
        BinaryOp::Lte => "<=",
        BinaryOp::Eq => "=",
        BinaryOp::Neq => "<>",
        BinaryOp::Mod => return Some(format!("MOD({lhs}, {rhs})")),
        BinaryOp::Pow => return Some(format!("POWER({lhs}, {rhs})")),
        BinaryOp::Cat => return Some(format!("({lhs} || {rhs})")),
        BinaryOp::Contains => {
            return Some(format!("(INSTR(LOWER({lhs}), LOWER({rhs})) > 0)"));
        }
        BinaryOp::ContainsStrict => {
            return Some(format!("(INSTR({lhs}, {rhs}) > 0)"));
        }
        BinaryOp::MatchesRegex | BinaryOp::MatchesRegexStrict => return None,
    };
    Some(format!("({lhs} {infix} {rhs})"))
}

/// The ANSI-flavored default function emission shared by the concrete
/// dialects.
#[allow(clippy::too_many_lines)]
pub(crate) fn ansi_function_call(function: Function, args: &[String]) -> Option<String> {
    let joined = args.join(", ");
    match function {
        Function::Upper => Some(format!("UPPER({joined})")),
        Function::Lower => Some(format!("LOWER({joined})")),
        Function::Trim => Some(format!("TRIM({joined})")),
        Function::Length => Some(format!("LENGTH({joined})")),
        Function::Abs => Some(format!("ABS({joined})")),
        Function::Negate => Some(format!("(-{joined})")),
        Function::Identity => args.first().cloned(),
        Function::Round => Some(format!("ROUND({joined})")),
        Function::Ceiling => Some(format!("CEILING({joined})")),
        Function::Floor => Some(format!("FLOOR({joined})")),
        Function::Sqrt => Some(format!("SQRT({joined})")),
        Function::Exp => Some(format!("EXP({joined})")),
        Function::Ln => Some(format!("LN({joined})")),
        Function::Sign => Some(format!("SIGN({joined})")),
        Function::Power => Some(format!("POWER({joined})")),
        Function::Cos => Some(format!("COS({joined})")),
        Function::Sin => Some(format!("SIN({joined})")),
        Function::Tan => Some(format!("TAN({joined})")),
        Function::Acos => Some(format!("ACOS({joined})")),
        Function::Asin => Some(format!("ASIN({joined})")),
        Function::Atan => Some(format!("ATAN({joined})")),
        Function::Coalesce => Some(format!("COALESCE({joined})")),
        Function::Substitute => Some(format!("REPLACE({joined})")),
        Function::Mid => Some(format!("SUBSTR({joined})")),
        Function::Left => args
            .first()
            .zip(args.get(1))
            .map(|(s, n)| format!("SUBSTR({s}, 1, {n})")),
        Function::Right => args
            .first()
            .zip(args.get(1))
            .map(|(s, n)| format!("SUBSTR({s}, -({n}))")),
        Function::Concat => Some(format!("({})", args.join(" || "))),
        Function::Not => args.first().map(|a| format!("(NOT {a})")),
        Function::And => Some(format!("({})", args.join(" AND "))),
        Function::Or => Some(format!("({})", args.join(" OR "))),
        Function::Xor => args
            .first()
            .zip(args.get(1))
            .map(|(a, b)| format!("({a} <> {b})")),
        Function::If => match args {
            [condition, then, otherwise] => Some(format!(
                "CASE WHEN {condition} THEN {then} ELSE {otherwise} END"
            )),
            _ => None,
        },
        Function::In => match args {
            [needle, hay @ ..] if !hay.is_empty() => {
                Some(format!("{needle} IN ({})", hay.join(", ")))
            }
            _ => None,
        },
        Function::NotIn => match args {
            [needle, hay @ ..] if !hay.is_empty() => {
                Some(format!("{needle} NOT IN ({})", hay.join(", ")))
            }
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quoting_and_literals() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.quote_identifier("city"), "\"city\"");
        assert_eq!(dialect.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(dialect.literal_string("O'Brien"), "'O''Brien'");
        assert_eq!(dialect.literal_value(&Value::Empty).as_deref(), Some("NULL"));
        assert_eq!(dialect.literal_value(&Value::Invalid), None);
    }

    #[test]
    fn test_binary_defaults() {
        let dialect = PostgresDialect::new();
        assert_eq!(
            dialect.binary_expression(BinaryOp::Eq, "a", "b").as_deref(),
            Some("(a = b)")
        );
        assert_eq!(
            dialect.binary_expression(BinaryOp::Cat, "a", "b").as_deref(),
            Some("(a || b)")
        );
    }

    #[test]
    fn test_unsupported_function_is_none() {
        let dialect = SqliteDialect::new();
        assert_eq!(dialect.function_call(Function::Levenshtein, &[]), None);
        assert_eq!(dialect.aggregation(Function::Pack, "x"), None);
    }
}
