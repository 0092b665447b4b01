//! The binary operator table.
//!
//! Eighteen infix operators over the value domain. Every operator
//! propagates [`Value::Invalid`]; arithmetic coerces through doubles;
//! `cat` (`&`) is the only string concatenation; division and modulo by
//! zero are Invalid, not errors.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A binary operator. The serialized form is the stable identifier
/// used by persisted expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `mod`
    Mod,
    /// `&` string concatenation
    Cat,
    /// `^` exponentiation
    Pow,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Gte,
    /// `<=`
    Lte,
    /// `=`
    Eq,
    /// `<>`
    Neq,
    /// `~=` contains, case-insensitive
    Contains,
    /// `~~=` contains, case-sensitive
    ContainsStrict,
    /// `±=` regex match, case-insensitive
    MatchesRegex,
    /// `±±=` regex match, case-sensitive
    MatchesRegexStrict,
}

impl BinaryOp {
    /// The operator with its operands swapped, when one exists:
    /// `a < b` is `b > a`, and the commutative operators mirror to
    /// themselves.
    #[must_use]
    pub const fn mirror(self) -> Option<Self> {
        match self {
            Self::Gt => Some(Self::Lt),
            Self::Lt => Some(Self::Gt),
            Self::Gte => Some(Self::Lte),
            Self::Lte => Some(Self::Gte),
            Self::Eq | Self::Neq | Self::Add | Self::Mul => Some(self),
            _ => None,
        }
    }

    /// The negated comparison, when one exists.
    #[must_use]
    pub const fn negation(self) -> Option<Self> {
        match self {
            Self::Eq => Some(Self::Neq),
            Self::Neq => Some(Self::Eq),
            Self::Gt => Some(Self::Lte),
            Self::Lte => Some(Self::Gt),
            Self::Lt => Some(Self::Gte),
            Self::Gte => Some(Self::Lt),
            _ => None,
        }
    }

    /// Constant result when both operands are structurally equivalent
    /// and deterministic: `a = a` is true, `a < a` is false.
    #[must_use]
    pub const fn fold_on_equivalence(self) -> Option<bool> {
        match self {
            Self::Eq | Self::Gte | Self::Lte => Some(true),
            Self::Neq | Self::Gt | Self::Lt => Some(false),
            _ => None,
        }
    }

    /// Whether this operator yields a boolean.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Gt
                | Self::Lt
                | Self::Gte
                | Self::Lte
                | Self::Eq
                | Self::Neq
                | Self::Contains
                | Self::ContainsStrict
                | Self::MatchesRegex
                | Self::MatchesRegexStrict
        )
    }

    /// Applies the operator.
    #[must_use]
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Value {
        if matches!(lhs, Value::Invalid) || matches!(rhs, Value::Invalid) {
            return Value::Invalid;
        }
        match self {
            Self::Add => arithmetic(lhs, rhs, |a, b| a + b),
            Self::Sub => arithmetic(lhs, rhs, |a, b| a - b),
            Self::Mul => arithmetic(lhs, rhs, |a, b| a * b),
            Self::Div => match (lhs.double_value(), rhs.double_value()) {
                (Some(_), Some(b)) if b == 0.0 => Value::Invalid,
                (Some(a), Some(b)) => Value::Double(a / b),
                _ => Value::Invalid,
            },
            Self::Mod => match (lhs.double_value(), rhs.double_value()) {
                (Some(_), Some(b)) if b == 0.0 => Value::Invalid,
                (Some(a), Some(b)) => Value::Double(a % b),
                _ => Value::Invalid,
            },
            Self::Pow => arithmetic(lhs, rhs, f64::powf),
            Self::Cat => match (lhs.string_value(), rhs.string_value()) {
                (Some(a), Some(b)) => Value::String(a + &b),
                _ => Value::Invalid,
            },
            Self::Eq => Value::Bool(lhs == rhs),
            Self::Neq => Value::Bool(lhs != rhs),
            Self::Gt => compare(lhs, rhs, |o| o == std::cmp::Ordering::Greater),
            Self::Lt => compare(lhs, rhs, |o| o == std::cmp::Ordering::Less),
            Self::Gte => compare(lhs, rhs, |o| o != std::cmp::Ordering::Less),
            Self::Lte => compare(lhs, rhs, |o| o != std::cmp::Ordering::Greater),
            Self::Contains => strings(lhs, rhs, |h, n| {
                h.to_lowercase().contains(&n.to_lowercase())
            }),
            Self::ContainsStrict => strings(lhs, rhs, |h, n| h.contains(n)),
            Self::MatchesRegex => regex_match(lhs, rhs, false),
            Self::MatchesRegexStrict => regex_match(lhs, rhs, true),
        }
    }
}

/// Numeric coercion for `+ - * ^`: both sides must coerce to double.
fn arithmetic(lhs: &Value, rhs: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    match (lhs.double_value(), rhs.double_value()) {
        (Some(a), Some(b)) => Value::Double(f(a, b)),
        _ => Value::Invalid,
    }
}

/// Ordering comparison: numeric when both operands are numeric, string
/// comparison otherwise; Invalid when either side has no string form.
fn compare(lhs: &Value, rhs: &Value, f: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    if lhs.is_numeric() && rhs.is_numeric() {
        match (lhs.double_value(), rhs.double_value()) {
            (Some(a), Some(b)) => Value::Bool(f(a.total_cmp(&b))),
            _ => Value::Invalid,
        }
    } else {
        match (lhs.string_value(), rhs.string_value()) {
            (Some(a), Some(b)) => Value::Bool(f(a.cmp(&b))),
            _ => Value::Invalid,
        }
    }
}

/// String predicate helper for the contains operators.
fn strings(lhs: &Value, rhs: &Value, f: impl Fn(&str, &str) -> bool) -> Value {
    match (lhs.string_value(), rhs.string_value()) {
        (Some(h), Some(n)) => Value::Bool(f(&h, &n)),
        _ => Value::Invalid,
    }
}

/// Regex match; the right operand is the pattern. A pattern that does
/// not compile yields Invalid.
fn regex_match(lhs: &Value, rhs: &Value, case_sensitive: bool) -> Value {
    let (Some(text), Some(pattern)) = (lhs.string_value(), rhs.string_value()) else {
        return Value::Invalid;
    };
    let pattern = if case_sensitive {
        pattern
    } else {
        format!("(?i){pattern}")
    };
    regex::Regex::new(&pattern).map_or(Value::Invalid, |re| Value::Bool(re.is_match(&text)))
}
