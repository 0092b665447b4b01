//! The named scalar function library.
//!
//! Every function carries a stable identifier (its serialized form), an
//! arity, a determinism flag and an application over values. Arity
//! mismatches yield [`Value::Invalid`]; numeric functions propagate
//! Invalid on non-numeric inputs. Date functions operate in UTC unless
//! the name says Local.

use std::fmt::Write as _;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::expression::Expression;
use crate::pack;
use crate::value::{Value, REFERENCE_UNIX_OFFSET};

/// Number of arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments.
    Fixed(usize),
    /// n or more arguments.
    AtLeast(usize),
    /// Between a and b arguments, inclusive.
    Between(usize, usize),
    /// Any number of arguments.
    Any,
}

impl Arity {
    /// Whether an argument count satisfies this arity.
    #[must_use]
    pub const fn valid(self, count: usize) -> bool {
        match self {
            Self::Fixed(n) => count == n,
            Self::AtLeast(n) => count >= n,
            Self::Between(a, b) => count >= a && count <= b,
            Self::Any => true,
        }
    }
}

/// A named scalar function. The serialized camelCase form is the
/// stable identifier under which expressions persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum Function {
    Upper,
    Lower,
    Negate,
    Identity,
    Abs,
    And,
    Or,
    Xor,
    If,
    Concat,
    Cos,
    Sin,
    Tan,
    Cosh,
    Sinh,
    Tanh,
    Acos,
    Asin,
    Atan,
    Sqrt,
    Left,
    Right,
    Mid,
    Length,
    Log,
    Not,
    Substitute,
    Trim,
    Coalesce,
    Iferror,
    Count,
    Sum,
    Average,
    Min,
    Max,
    RandomItem,
    CountAll,
    Pack,
    Exp,
    Ln,
    Round,
    Choose,
    RandomBetween,
    Random,
    RegexSubstitute,
    NormalInverse,
    Sign,
    Split,
    Nth,
    Items,
    Levenshtein,
    Urlencode,
    In,
    NotIn,
    Capitalize,
    Now,
    FromUnix,
    ToUnix,
    FromISO8601,
    ToLocalISO8601,
    ToUTCISO8601,
    FromExcelDate,
    ToExcelDate,
    Date,
    Day,
    Month,
    Year,
    Minute,
    Hour,
    Second,
    Duration,
    After,
    Ceiling,
    Floor,
    RandomString,
    FromUnicodeDateString,
    ToUnicodeDateString,
    Power,
}

/// Days between the Excel epoch (1899-12-30) and the UNIX epoch.
const EXCEL_UNIX_DAYS: f64 = 25_569.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

impl Function {
    /// The number of arguments this function accepts.
    #[must_use]
    pub const fn arity(self) -> Arity {
        match self {
            Self::Upper
            | Self::Lower
            | Self::Negate
            | Self::Identity
            | Self::Abs
            | Self::Not
            | Self::Cos
            | Self::Sin
            | Self::Tan
            | Self::Cosh
            | Self::Sinh
            | Self::Tanh
            | Self::Acos
            | Self::Asin
            | Self::Atan
            | Self::Sqrt
            | Self::Length
            | Self::Trim
            | Self::Exp
            | Self::Ln
            | Self::Sign
            | Self::Items
            | Self::Urlencode
            | Self::Capitalize
            | Self::FromUnix
            | Self::ToUnix
            | Self::FromISO8601
            | Self::ToLocalISO8601
            | Self::ToUTCISO8601
            | Self::FromExcelDate
            | Self::ToExcelDate
            | Self::Day
            | Self::Month
            | Self::Year
            | Self::Minute
            | Self::Hour
            | Self::Second
            | Self::Ceiling
            | Self::Floor
            | Self::RandomString => Arity::Fixed(1),
            Self::Xor
            | Self::Left
            | Self::Right
            | Self::Iferror
            | Self::Split
            | Self::Nth
            | Self::Levenshtein
            | Self::Duration
            | Self::After
            | Self::FromUnicodeDateString
            | Self::ToUnicodeDateString
            | Self::RandomBetween
            | Self::Power => Arity::Fixed(2),
            Self::If | Self::Mid | Self::Substitute | Self::RegexSubstitute | Self::Date
            | Self::NormalInverse => Arity::Fixed(3),
            Self::Log | Self::Round => Arity::Between(1, 2),
            Self::And | Self::Or => Arity::AtLeast(1),
            Self::Choose | Self::In | Self::NotIn => Arity::AtLeast(2),
            Self::Random | Self::Now => Arity::Fixed(0),
            Self::Concat
            | Self::Coalesce
            | Self::Count
            | Self::Sum
            | Self::Average
            | Self::Min
            | Self::Max
            | Self::RandomItem
            | Self::CountAll
            | Self::Pack => Arity::Any,
        }
    }

    /// Whether the function yields the same result for the same
    /// arguments.
    #[must_use]
    pub const fn is_deterministic(self) -> bool {
        !matches!(
            self,
            Self::Now | Self::Random | Self::RandomBetween | Self::RandomItem | Self::RandomString
        )
    }

    /// Whether the function is an associative reducer usable for
    /// aggregation: `reduce(a..z) == reduce(reduce(a..k), reduce(l..z))`.
    #[must_use]
    pub const fn is_reducer(self) -> bool {
        matches!(
            self,
            Self::Sum
                | Self::Count
                | Self::CountAll
                | Self::Average
                | Self::Min
                | Self::Max
                | Self::Concat
                | Self::Pack
                | Self::RandomItem
        )
    }

    /// Applies the function to its arguments.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn apply(self, args: &[Value]) -> Value {
        if !self.arity().valid(args.len()) {
            return Value::Invalid;
        }
        match self {
            Self::Identity => args[0].clone(),
            Self::Upper => string_map(&args[0], |s| s.to_uppercase()),
            Self::Lower => string_map(&args[0], |s| s.to_lowercase()),
            Self::Trim => string_map(&args[0], |s| s.trim().to_string()),
            Self::Capitalize => string_map(&args[0], |s| capitalize(&s)),
            Self::Urlencode => string_map(&args[0], |s| urlencode(&s)),
            Self::Length => args[0]
                .string_value()
                .map_or(Value::Invalid, |s| Value::Int(s.chars().count() as i64)),
            Self::Negate => unary_math(&args[0], |d| -d),
            Self::Abs => unary_math(&args[0], f64::abs),
            Self::Sqrt => unary_math(&args[0], f64::sqrt),
            Self::Cos => unary_math(&args[0], f64::cos),
            Self::Sin => unary_math(&args[0], f64::sin),
            Self::Tan => unary_math(&args[0], f64::tan),
            Self::Cosh => unary_math(&args[0], f64::cosh),
            Self::Sinh => unary_math(&args[0], f64::sinh),
            Self::Tanh => unary_math(&args[0], f64::tanh),
            Self::Acos => unary_math(&args[0], f64::acos),
            Self::Asin => unary_math(&args[0], f64::asin),
            Self::Atan => unary_math(&args[0], f64::atan),
            Self::Exp => unary_math(&args[0], f64::exp),
            Self::Ln => unary_math(&args[0], f64::ln),
            Self::Ceiling => unary_math(&args[0], f64::ceil),
            Self::Floor => unary_math(&args[0], f64::floor),
            Self::Sign => args[0].double_value().map_or(Value::Invalid, |d| {
                Value::Int(if d > 0.0 {
                    1
                } else {
                    i64::from(d < 0.0) * -1
                })
            }),
            Self::Log => {
                let base = if args.len() == 2 {
                    match args[1].double_value() {
                        Some(b) => b,
                        None => return Value::Invalid,
                    }
                } else {
                    10.0
                };
                unary_math(&args[0], |d| d.log(base))
            }
            Self::Round => {
                let digits = if args.len() == 2 {
                    match args[1].int_value() {
                        Some(d) => d,
                        None => return Value::Invalid,
                    }
                } else {
                    0
                };
                let factor = 10f64.powi(digits as i32);
                unary_math(&args[0], |d| (d * factor).round() / factor)
            }
            Self::Power => match (args[0].double_value(), args[1].double_value()) {
                (Some(a), Some(b)) => finite_or_invalid(a.powf(b)),
                _ => Value::Invalid,
            },
            Self::Not => args[0]
                .bool_value()
                .map_or(Value::Invalid, |b| Value::Bool(!b)),
            Self::And => bools(args).map_or(Value::Invalid, |bs| {
                Value::Bool(bs.iter().all(|b| *b))
            }),
            Self::Or => bools(args).map_or(Value::Invalid, |bs| {
                Value::Bool(bs.iter().any(|b| *b))
            }),
            Self::Xor => match (args[0].bool_value(), args[1].bool_value()) {
                (Some(a), Some(b)) => Value::Bool(a ^ b),
                _ => Value::Invalid,
            },
            Self::If => args[0].bool_value().map_or(Value::Invalid, |cond| {
                if cond {
                    args[1].clone()
                } else {
                    args[2].clone()
                }
            }),
            Self::Iferror => {
                if args[0].is_valid() {
                    args[0].clone()
                } else {
                    args[1].clone()
                }
            }
            Self::Coalesce => args
                .iter()
                .find(|v| v.is_valid() && !v.is_empty_value())
                .cloned()
                .unwrap_or(Value::Empty),
            Self::Concat => {
                let mut out = String::new();
                for arg in args {
                    match arg.string_value() {
                        Some(s) => out.push_str(&s),
                        None => return Value::Invalid,
                    }
                }
                Value::String(out)
            }
            Self::Left => string_slice(args, |s, n| s.chars().take(n).collect()),
            Self::Right => string_slice(args, |s, n| {
                let count = s.chars().count();
                s.chars().skip(count.saturating_sub(n)).collect()
            }),
            Self::Mid => {
                let (Some(s), Some(start), Some(len)) = (
                    args[0].string_value(),
                    args[1].int_value(),
                    args[2].int_value(),
                ) else {
                    return Value::Invalid;
                };
                if start < 1 || len < 0 {
                    return Value::Invalid;
                }
                let out: String = s
                    .chars()
                    .skip((start - 1) as usize)
                    .take(len as usize)
                    .collect();
                Value::String(out)
            }
            Self::Substitute => {
                let (Some(s), Some(find), Some(replace)) = (
                    args[0].string_value(),
                    args[1].string_value(),
                    args[2].string_value(),
                ) else {
                    return Value::Invalid;
                };
                Value::String(s.replace(&find, &replace))
            }
            Self::RegexSubstitute => {
                let (Some(s), Some(pattern), Some(replace)) = (
                    args[0].string_value(),
                    args[1].string_value(),
                    args[2].string_value(),
                ) else {
                    return Value::Invalid;
                };
                regex::Regex::new(&pattern).map_or(Value::Invalid, |re| {
                    Value::String(re.replace_all(&s, replace.as_str()).into_owned())
                })
            }
            Self::Levenshtein => match (args[0].string_value(), args[1].string_value()) {
                (Some(a), Some(b)) => Value::Int(levenshtein(&a, &b) as i64),
                _ => Value::Invalid,
            },
            Self::Count => numeric_list(args).map_or(Value::Invalid, |ds| {
                Value::Int(ds.len() as i64)
            }),
            Self::CountAll => Value::Int(args.len() as i64),
            Self::Sum => numeric_list(args).map_or(Value::Invalid, |ds| {
                Value::Double(ds.iter().sum())
            }),
            Self::Average => numeric_list(args).map_or(Value::Invalid, |ds| {
                if ds.is_empty() {
                    Value::Empty
                } else {
                    Value::Double(ds.iter().sum::<f64>() / ds.len() as f64)
                }
            }),
            Self::Min => extremum(args, std::cmp::Ordering::Less),
            Self::Max => extremum(args, std::cmp::Ordering::Greater),
            Self::Pack => {
                let mut items = Vec::with_capacity(args.len());
                for arg in args {
                    match arg.string_value() {
                        Some(s) => items.push(s),
                        None => return Value::Invalid,
                    }
                }
                Value::String(pack::pack(items))
            }
            Self::Nth => {
                let (Some(packed), Some(index)) =
                    (args[0].string_value(), args[1].int_value())
                else {
                    return Value::Invalid;
                };
                if index < 1 {
                    return Value::Invalid;
                }
                let items = pack::unpack(&packed);
                items
                    .get((index - 1) as usize)
                    .map_or(Value::Invalid, |s| Value::String(s.clone()))
            }
            Self::Items => args[0].string_value().map_or(Value::Invalid, |packed| {
                Value::Int(pack::unpack(&packed).len() as i64)
            }),
            Self::Split => match (args[0].string_value(), args[1].string_value()) {
                (Some(s), Some(sep)) if !sep.is_empty() => {
                    Value::String(pack::pack(s.split(sep.as_str())))
                }
                _ => Value::Invalid,
            },
            Self::Choose => args[0].int_value().map_or(Value::Invalid, |index| {
                if index < 1 {
                    return Value::Invalid;
                }
                args.get(index as usize).cloned().unwrap_or(Value::Invalid)
            }),
            Self::In => Value::Bool(args[1..].contains(&args[0])),
            Self::NotIn => Value::Bool(!args[1..].contains(&args[0])),
            Self::Random => Value::Double(rand::thread_rng().gen::<f64>()),
            Self::RandomBetween => match (args[0].int_value(), args[1].int_value()) {
                (Some(a), Some(b)) => {
                    let (low, high) = if a <= b { (a, b) } else { (b, a) };
                    Value::Int(rand::thread_rng().gen_range(low..=high))
                }
                _ => Value::Invalid,
            },
            Self::RandomItem => {
                if args.is_empty() {
                    Value::Invalid
                } else {
                    args[rand::thread_rng().gen_range(0..args.len())].clone()
                }
            }
            Self::RandomString => args[0].int_value().map_or(Value::Invalid, |len| {
                if len < 0 {
                    return Value::Invalid;
                }
                let mut rng = rand::thread_rng();
                let s: String = (0..len)
                    .map(|_| char::from(rng.sample(Alphanumeric)))
                    .collect();
                Value::String(s)
            }),
            Self::NormalInverse => {
                let (Some(p), Some(mean), Some(sd)) = (
                    args[0].double_value(),
                    args[1].double_value(),
                    args[2].double_value(),
                ) else {
                    return Value::Invalid;
                };
                normal_inverse(p).map_or(Value::Invalid, |z| Value::Double(mean + sd * z))
            }
            Self::Now => Value::Date(unix_now() - REFERENCE_UNIX_OFFSET),
            Self::FromUnix => args[0]
                .double_value()
                .map_or(Value::Invalid, |unix| Value::Date(unix - REFERENCE_UNIX_OFFSET)),
            Self::ToUnix => args[0].date_value().map_or(Value::Invalid, |d| {
                Value::Int((d + REFERENCE_UNIX_OFFSET).round() as i64)
            }),
            Self::FromISO8601 => args[0]
                .string_value()
                .and_then(|s| parse_iso8601(&s))
                .map_or(Value::Invalid, Value::Date),
            Self::ToUTCISO8601 => date_format(&args[0], "%Y-%m-%dT%H:%M:%SZ", false),
            Self::ToLocalISO8601 => date_format(&args[0], "%Y-%m-%dT%H:%M:%S%:z", true),
            Self::FromExcelDate => args[0].double_value().map_or(Value::Invalid, |serial| {
                Value::Date((serial - EXCEL_UNIX_DAYS) * SECONDS_PER_DAY - REFERENCE_UNIX_OFFSET)
            }),
            Self::ToExcelDate => args[0].date_value().map_or(Value::Invalid, |d| {
                Value::Double((d + REFERENCE_UNIX_OFFSET) / SECONDS_PER_DAY + EXCEL_UNIX_DAYS)
            }),
            Self::Date => {
                let (Some(y), Some(m), Some(d)) = (
                    args[0].int_value(),
                    args[1].int_value(),
                    args[2].int_value(),
                ) else {
                    return Value::Invalid;
                };
                NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                    .and_then(|nd| nd.and_hms_opt(0, 0, 0))
                    .map_or(Value::Invalid, |ndt| {
                        Value::Date(ndt.and_utc().timestamp() as f64 - REFERENCE_UNIX_OFFSET)
                    })
            }
            Self::Year => date_part(&args[0], |dt| i64::from(dt.year())),
            Self::Month => date_part(&args[0], |dt| i64::from(dt.month())),
            Self::Day => date_part(&args[0], |dt| i64::from(dt.day())),
            Self::Hour => date_part(&args[0], |dt| i64::from(dt.hour())),
            Self::Minute => date_part(&args[0], |dt| i64::from(dt.minute())),
            Self::Second => date_part(&args[0], |dt| i64::from(dt.second())),
            Self::Duration => match (args[0].date_value(), args[1].date_value()) {
                (Some(a), Some(b)) => Value::Double(b - a),
                _ => Value::Invalid,
            },
            Self::After => match (args[0].date_value(), args[1].double_value()) {
                (Some(d), Some(secs)) => Value::Date(d + secs),
                _ => Value::Invalid,
            },
            Self::FromUnicodeDateString => {
                let (Some(s), Some(format)) = (args[0].string_value(), args[1].string_value())
                else {
                    return Value::Invalid;
                };
                parse_formatted(&s, &format).map_or(Value::Invalid, Value::Date)
            }
            Self::ToUnicodeDateString => {
                let (Some(_), Some(format)) = (args[0].date_value(), args[1].string_value())
                else {
                    return Value::Invalid;
                };
                date_format(&args[0], &format, false)
            }
        }
    }

    /// Seeds for expression inference: candidate wrappers that could
    /// turn `from` into `to`. The driver verifies every candidate
    /// against the full row before keeping it.
    #[must_use]
    pub fn suggest(self, from: &Value, to: &Value) -> Vec<Expression> {
        let identity = Expression::Identity;
        let unary = |f: Self| Expression::call(f, vec![identity.clone()]);
        match self {
            Self::Upper | Self::Lower | Self::Trim | Self::Capitalize | Self::Negate
            | Self::Abs => {
                if self.apply(&[from.clone()]) == *to {
                    vec![unary(self)]
                } else {
                    Vec::new()
                }
            }
            Self::Left | Self::Right => {
                let (Some(f), Some(t)) = (from.string_value(), to.string_value()) else {
                    return Vec::new();
                };
                let fits = match self {
                    Self::Left => f.starts_with(&t),
                    _ => f.ends_with(&t),
                };
                if fits && f != t {
                    vec![Expression::call(
                        self,
                        vec![
                            identity,
                            Expression::literal(Value::Int(t.chars().count() as i64)),
                        ],
                    )]
                } else {
                    Vec::new()
                }
            }
            Self::Mid => {
                let (Some(f), Some(t)) = (from.string_value(), to.string_value()) else {
                    return Vec::new();
                };
                f.find(&t).map_or_else(Vec::new, |byte_start| {
                    let start = f[..byte_start].chars().count() as i64 + 1;
                    vec![Expression::call(
                        self,
                        vec![
                            identity,
                            Expression::literal(Value::Int(start)),
                            Expression::literal(Value::Int(t.chars().count() as i64)),
                        ],
                    )]
                })
            }
            Self::Concat => {
                let (Some(f), Some(t)) = (from.string_value(), to.string_value()) else {
                    return Vec::new();
                };
                let mut out = Vec::new();
                if !f.is_empty() && t.starts_with(&f) && f != t {
                    out.push(Expression::call(
                        self,
                        vec![
                            identity.clone(),
                            Expression::literal(Value::String(t[f.len()..].to_string())),
                        ],
                    ));
                }
                if !f.is_empty() && t.ends_with(&f) && f != t {
                    out.push(Expression::call(
                        self,
                        vec![
                            Expression::literal(Value::String(t[..t.len() - f.len()].to_string())),
                            identity,
                        ],
                    ));
                }
                out
            }
            Self::Length => {
                if self.apply(&[from.clone()]) == *to {
                    vec![unary(self)]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }
}

/// Applies a string transform; Invalid when the value has no string
/// form.
fn string_map(value: &Value, f: impl FnOnce(String) -> String) -> Value {
    value
        .string_value()
        .map_or(Value::Invalid, |s| Value::String(f(s)))
}

/// Applies a numeric transform; NaN results collapse to Invalid.
fn unary_math(value: &Value, f: impl FnOnce(f64) -> f64) -> Value {
    value
        .double_value()
        .map_or(Value::Invalid, |d| finite_or_invalid(f(d)))
}

fn finite_or_invalid(d: f64) -> Value {
    if d.is_nan() {
        Value::Invalid
    } else {
        Value::Double(d)
    }
}

/// left/right share this (string, count) shape.
fn string_slice(args: &[Value], f: impl FnOnce(&str, usize) -> String) -> Value {
    match (args[0].string_value(), args[1].int_value()) {
        (Some(s), Some(n)) if n >= 0 => Value::String(f(&s, n as usize)),
        _ => Value::Invalid,
    }
}

/// All arguments as booleans, or None when any is not a boolean.
fn bools(args: &[Value]) -> Option<Vec<bool>> {
    args.iter().map(Value::bool_value).collect()
}

/// Numeric arguments for the reducers: Empty values are skipped, an
/// Invalid or non-numeric value poisons the whole list.
fn numeric_list(args: &[Value]) -> Option<Vec<f64>> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if arg.is_empty_value() {
            continue;
        }
        out.push(arg.double_value()?);
    }
    Some(out)
}

/// min/max over the total value order, skipping Empty.
fn extremum(args: &[Value], keep: std::cmp::Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for arg in args {
        if arg.is_empty_value() {
            continue;
        }
        if !arg.is_valid() {
            return Value::Invalid;
        }
        best = match best {
            None => Some(arg),
            Some(current) => {
                if arg.total_cmp(current) == keep {
                    Some(arg)
                } else {
                    Some(current)
                }
            }
        };
    }
    best.cloned().unwrap_or(Value::Empty)
}

fn capitalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphanumeric();
    }
    out
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(char::from(byte));
            }
            other => {
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
    out
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Acklam's rational approximation to the inverse standard normal CDF.
fn normal_inverse(p: f64) -> Option<f64> {
    if !(0.0..=1.0).contains(&p) || p == 0.0 || p == 1.0 {
        return None;
    }
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const LOW: f64 = 0.024_25;
    const HIGH: f64 = 1.0 - LOW;
    let z = if p < LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= HIGH {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    Some(z)
}

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Reference seconds → UTC datetime, for the extraction functions.
fn utc_datetime(reference_secs: f64) -> Option<DateTime<Utc>> {
    let unix = reference_secs + REFERENCE_UNIX_OFFSET;
    let secs = unix.floor();
    let nanos = ((unix - secs) * 1e9) as u32;
    Utc.timestamp_opt(secs as i64, nanos).single()
}

fn date_part(value: &Value, f: impl FnOnce(DateTime<Utc>) -> i64) -> Value {
    value
        .date_value()
        .and_then(utc_datetime)
        .map_or(Value::Invalid, |dt| Value::Int(f(dt)))
}

/// Formats a date value; a malformed format string yields Invalid
/// rather than a panic.
fn date_format(value: &Value, format: &str, local: bool) -> Value {
    let Some(dt) = value.date_value().and_then(utc_datetime) else {
        return Value::Invalid;
    };
    let mut out = String::new();
    let ok = if local {
        write!(out, "{}", dt.with_timezone(&Local).format(format)).is_ok()
    } else {
        write!(out, "{}", dt.format(format)).is_ok()
    };
    if ok {
        Value::String(out)
    } else {
        Value::Invalid
    }
}

fn parse_iso8601(s: &str) -> Option<f64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis() as f64 / 1000.0 - REFERENCE_UNIX_OFFSET);
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok()?;
    Some(naive.and_utc().timestamp() as f64 - REFERENCE_UNIX_OFFSET)
}

fn parse_formatted(s: &str, format: &str) -> Option<f64> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
        return Some(naive.and_utc().timestamp() as f64 - REFERENCE_UNIX_OFFSET);
    }
    let date = NaiveDate::parse_from_str(s, format).ok()?;
    let naive = date.and_hms_opt(0, 0, 0)?;
    Some(naive.and_utc().timestamp() as f64 - REFERENCE_UNIX_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_mismatch_is_invalid() {
        assert_eq!(Function::Upper.apply(&[]), Value::Invalid);
        assert_eq!(
            Function::If.apply(&[Value::Bool(true), Value::Int(1)]),
            Value::Invalid
        );
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(
            Function::Upper.apply(&[Value::from("warp")]),
            Value::from("WARP")
        );
        assert_eq!(
            Function::Capitalize.apply(&[Value::from("hello warp")]),
            Value::from("Hello Warp")
        );
        assert_eq!(
            Function::Mid.apply(&[Value::from("abcdef"), Value::Int(2), Value::Int(3)]),
            Value::from("bcd")
        );
        assert_eq!(Function::Length.apply(&[Value::from("héllo")]), Value::Int(5));
    }

    #[test]
    fn test_numeric_functions_propagate_invalid() {
        assert_eq!(Function::Sqrt.apply(&[Value::from("x")]), Value::Invalid);
        assert_eq!(Function::Sqrt.apply(&[Value::Double(-1.0)]), Value::Invalid);
        assert_eq!(Function::Sqrt.apply(&[Value::Int(9)]), Value::Double(3.0));
    }

    #[test]
    fn test_reducers() {
        let values = [Value::Int(10), Value::Empty, Value::Int(20)];
        assert_eq!(Function::Sum.apply(&values), Value::Double(30.0));
        assert_eq!(Function::Count.apply(&values), Value::Int(2));
        assert_eq!(Function::CountAll.apply(&values), Value::Int(3));
        assert_eq!(Function::Average.apply(&values), Value::Double(15.0));
        assert_eq!(Function::Min.apply(&values), Value::Int(10));
        assert_eq!(Function::Max.apply(&values), Value::Int(20));
        assert_eq!(
            Function::Sum.apply(&[Value::Int(1), Value::Invalid]),
            Value::Invalid
        );
    }

    #[test]
    fn test_in_not_in_value_equality() {
        assert_eq!(
            Function::In.apply(&[Value::from("1"), Value::Int(1), Value::Int(2)]),
            Value::Bool(true)
        );
        assert_eq!(
            Function::NotIn.apply(&[Value::Int(3), Value::Int(1), Value::Int(2)]),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_pack_family() {
        let packed = Function::Pack.apply(&[Value::from("a,b"), Value::from("c")]);
        assert_eq!(packed, Value::from("a$,b,c"));
        assert_eq!(
            Function::Nth.apply(&[packed.clone(), Value::Int(1)]),
            Value::from("a,b")
        );
        assert_eq!(Function::Items.apply(&[packed]), Value::Int(2));
        assert_eq!(
            Function::Split.apply(&[Value::from("x;y"), Value::from(";")]),
            Value::from("x,y")
        );
    }

    #[test]
    fn test_date_round_trips() {
        let date = Function::FromUnix.apply(&[Value::Int(978_307_200)]);
        assert_eq!(date, Value::Date(0.0));
        assert_eq!(
            Function::ToUnix.apply(&[date.clone()]),
            Value::Int(978_307_200)
        );
        assert_eq!(Function::Year.apply(&[date.clone()]), Value::Int(2001));
        assert_eq!(Function::Month.apply(&[date.clone()]), Value::Int(1));
        assert_eq!(Function::Day.apply(&[date]), Value::Int(1));
    }

    #[test]
    fn test_iso8601() {
        let date = Function::FromISO8601.apply(&[Value::from("2001-01-01T00:00:00Z")]);
        assert_eq!(date, Value::Date(0.0));
        assert_eq!(
            Function::ToUTCISO8601.apply(&[date]),
            Value::from("2001-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_excel_date() {
        // 25569 is the UNIX epoch as an Excel serial.
        let date = Function::FromExcelDate.apply(&[Value::Double(25_569.0)]);
        assert_eq!(date, Value::Date(-REFERENCE_UNIX_OFFSET));
        assert_eq!(
            Function::ToExcelDate.apply(&[date]),
            Value::Double(25_569.0)
        );
    }

    #[test]
    fn test_logic() {
        assert_eq!(
            Function::And.apply(&[Value::Bool(true), Value::Bool(false)]),
            Value::Bool(false)
        );
        assert_eq!(
            Function::Or.apply(&[Value::Bool(false), Value::Bool(true)]),
            Value::Bool(true)
        );
        assert_eq!(
            Function::And.apply(&[Value::Bool(true), Value::Int(1)]),
            Value::Invalid
        );
        assert_eq!(
            Function::If.apply(&[Value::Bool(true), Value::from("t"), Value::from("f")]),
            Value::from("t")
        );
    }

    #[test]
    fn test_coalesce_and_iferror() {
        assert_eq!(
            Function::Coalesce.apply(&[Value::Empty, Value::Invalid, Value::Int(3)]),
            Value::Int(3)
        );
        assert_eq!(
            Function::Iferror.apply(&[Value::Invalid, Value::Int(1)]),
            Value::Int(1)
        );
    }

    #[test]
    fn test_levenshtein_and_urlencode() {
        assert_eq!(
            Function::Levenshtein.apply(&[Value::from("kitten"), Value::from("sitting")]),
            Value::Int(3)
        );
        assert_eq!(
            Function::Urlencode.apply(&[Value::from("a b&c")]),
            Value::from("a%20b%26c")
        );
    }

    #[test]
    fn test_normal_inverse() {
        let median =
            Function::NormalInverse.apply(&[Value::Double(0.5), Value::Int(0), Value::Int(1)]);
        let Some(z) = median.double_value() else {
            panic!("expected a number")
        };
        assert!(z.abs() < 1e-8);
    }

    #[test]
    fn test_nondeterministic_flags() {
        for f in [
            Function::Now,
            Function::Random,
            Function::RandomBetween,
            Function::RandomItem,
            Function::RandomString,
        ] {
            assert!(!f.is_deterministic());
        }
        assert!(Function::Sum.is_deterministic());
    }

    #[test]
    fn test_serde_identifiers() {
        assert_eq!(
            serde_json::to_string(&Function::ToUTCISO8601).unwrap(),
            r#""toUTCISO8601""#
        );
        assert_eq!(
            serde_json::to_string(&Function::Iferror).unwrap(),
            r#""iferror""#
        );
        assert_eq!(serde_json::to_string(&Function::In).unwrap(), r#""in""#);
        let back: Function = serde_json::from_str(r#""randomItem""#).unwrap();
        assert_eq!(back, Function::RandomItem);
    }

    #[test]
    fn test_suggest_seeds() {
        let from = Value::from("warp");
        let to = Value::from("WARP");
        assert!(!Function::Upper.suggest(&from, &to).is_empty());
        assert!(Function::Lower.suggest(&from, &to).is_empty());
        let left = Function::Left.suggest(&Value::from("abcdef"), &Value::from("abc"));
        assert_eq!(left.len(), 1);
    }
}
