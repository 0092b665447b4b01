//! The dynamically typed value domain.
//!
//! Every cell, literal and expression result in Warp is a [`Value`]: a
//! tagged sum over strings, integers, doubles, booleans, dates, blobs,
//! the empty value and the invalid value. Coercion is total; operations
//! that cannot produce a sensible result return [`Value::Invalid`]
//! rather than an error.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Seconds between the UNIX epoch and the Warp reference date
/// (2001-01-01T00:00:00Z). Dates are stored as seconds since reference.
pub const REFERENCE_UNIX_OFFSET: f64 = 978_307_200.0;

/// A dynamically typed value.
///
/// Dates carry UTC seconds since the reference date. [`Value::Empty`]
/// is the absence of a value (a missing cell); [`Value::Invalid`] is
/// the result of an operation outside its domain. Arithmetic with
/// Invalid yields Invalid; Empty coerces to `""` for concatenation but
/// is not equal to `0` or `false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    /// A Unicode string.
    String(String),
    /// A signed 64-bit integer.
    Int(i64),
    /// A double-precision float.
    Double(f64),
    /// A boolean.
    Bool(bool),
    /// UTC seconds since the reference date.
    Date(f64),
    /// An opaque byte sequence.
    Blob(Vec<u8>),
    /// The absence of a value.
    Empty,
    /// The result of an operation outside its domain.
    Invalid,
}

impl Value {
    /// Returns true unless this value is [`Value::Invalid`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Returns true if this value is [`Value::Empty`].
    #[must_use]
    pub const fn is_empty_value(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns true for [`Value::Int`] and [`Value::Double`].
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Double(_))
    }

    /// Numeric coercion.
    ///
    /// Integers and doubles convert directly, booleans to 1.0/0.0, and
    /// strings parse when they hold a number. Everything else is not
    /// numeric.
    #[must_use]
    pub fn double_value(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(s) => s.trim().parse::<f64>().ok(),
            Self::Date(_) | Self::Blob(_) | Self::Empty | Self::Invalid => None,
        }
    }

    /// Integer coercion through [`Self::double_value`], truncating.
    #[must_use]
    pub fn int_value(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            other => other.double_value().map(|d| d as i64),
        }
    }

    /// Boolean coercion. Only booleans coerce; `Empty` is not `false`.
    #[must_use]
    pub const fn bool_value(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String form used by concatenation. Empty coerces to `""`;
    /// Invalid has no string form.
    #[must_use]
    pub fn string_value(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Double(d) => Some(format_double(*d)),
            Self::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Self::Date(d) => Some(format_double(*d)),
            Self::Blob(b) => String::from_utf8(b.clone()).ok(),
            Self::Empty => Some(String::new()),
            Self::Invalid => None,
        }
    }

    /// Seconds since reference, for date values only.
    #[must_use]
    pub const fn date_value(&self) -> Option<f64> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// The variant ordinal used to break ties in the total order.
    const fn ordinal(&self) -> u8 {
        match self {
            Self::String(_) => 0,
            Self::Int(_) => 1,
            Self::Double(_) => 2,
            Self::Bool(_) => 3,
            Self::Date(_) => 4,
            Self::Blob(_) => 5,
            Self::Empty => 6,
            Self::Invalid => 7,
        }
    }

    /// Rank in the total order: Invalid < Empty < Bool < numeric <
    /// String < Date < Blob.
    const fn rank(&self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Empty => 1,
            Self::Bool(_) => 2,
            Self::Int(_) | Self::Double(_) => 3,
            Self::String(_) => 4,
            Self::Date(_) => 5,
            Self::Blob(_) => 6,
        }
    }

    /// Total order over all values, used by sorting and min/max.
    ///
    /// Within the numeric rank integers and doubles compare by value;
    /// remaining ties break on the variant ordinal so the order is
    /// antisymmetric.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        let within = match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Blob(a), Self::Blob(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.total_cmp(b),
            (Self::Empty, Self::Empty) | (Self::Invalid, Self::Invalid) => Ordering::Equal,
            (a, b) => {
                let (x, y) = (
                    a.double_value().unwrap_or(f64::NAN),
                    b.double_value().unwrap_or(f64::NAN),
                );
                x.total_cmp(&y)
            }
        };
        within.then_with(|| self.ordinal().cmp(&other.ordinal()))
    }
}

/// Formats a double the way it appears in string coercion: integral
/// values drop the fraction.
fn format_double(d: f64) -> String {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        format!("{d}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "?"),
            other => write!(f, "{}", other.string_value().unwrap_or_default()),
        }
    }
}

impl PartialEq for Value {
    /// Value equality with numeric coercion: `Int(1) == Double(1.0)`,
    /// and `String("1") == Int(1)` when the string parses. Empty only
    /// equals Empty; Invalid only equals Invalid (the `eq` *operator*
    /// yields Invalid instead, see the binary operator table).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => double_eq(*a, *b),
            (Self::Empty, Self::Empty) | (Self::Invalid, Self::Invalid) => true,
            (Self::Empty | Self::Invalid, _) | (_, Self::Empty | Self::Invalid) => false,
            (Self::Bool(_), _) | (_, Self::Bool(_)) => false,
            (Self::Date(_), _) | (_, Self::Date(_)) => false,
            (Self::Blob(_), _) | (_, Self::Blob(_)) => false,
            (a, b) => match (a.double_value(), b.double_value()) {
                (Some(x), Some(y)) => double_eq(x, y),
                _ => false,
            },
        }
    }
}

impl Eq for Value {}

/// Equality that treats NaN as equal to itself so containers behave.
fn double_eq(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl Hash for Value {
    /// Invalid and Empty hash to fixed tags; numeric values hash by
    /// their normalized double bits so `Int(1)` and `Double(1.0)`
    /// collide; strings hash case-sensitively.
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Invalid => state.write_u8(0),
            Self::Empty => state.write_u8(1),
            Self::Bool(b) => {
                state.write_u8(2);
                b.hash(state);
            }
            Self::Int(_) | Self::Double(_) => {
                state.write_u8(3);
                let d = self.double_value().unwrap_or(f64::NAN);
                state.write_u64(normalize_bits(d));
            }
            Self::String(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Self::Date(d) => {
                state.write_u8(5);
                state.write_u64(normalize_bits(*d));
            }
            Self::Blob(b) => {
                state.write_u8(6);
                b.hash(state);
            }
        }
    }
}

/// Canonical bit pattern: -0.0 folds to 0.0 and all NaNs to one NaN.
fn normalize_bits(d: f64) -> u64 {
    if d.is_nan() {
        f64::NAN.to_bits()
    } else if d == 0.0 {
        0.0f64.to_bits()
    } else {
        d.to_bits()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
