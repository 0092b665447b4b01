//! Sort specifications.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::expression::Expression;
use crate::value::Value;

/// One sort key. A sort specification is a sequence of orders applied
/// lexicographically, first order first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Evaluated per row to produce the sort key.
    pub expression: Expression,
    /// Ascending when true.
    pub ascending: bool,
    /// Compare keys numerically instead of as strings.
    pub numeric: bool,
}

impl Order {
    /// An ascending numeric order.
    #[must_use]
    pub const fn ascending(expression: Expression) -> Self {
        Self {
            expression,
            ascending: true,
            numeric: true,
        }
    }

    /// A descending numeric order.
    #[must_use]
    pub const fn descending(expression: Expression) -> Self {
        Self {
            expression,
            ascending: false,
            numeric: true,
        }
    }

    /// Compares two already-evaluated keys under this order.
    #[must_use]
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = if self.numeric {
            match (a.double_value(), b.double_value()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.total_cmp(b),
            }
        } else {
            match (a.string_value(), b.string_value()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => a.total_cmp(b),
            }
        };
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Lexicographic comparison of two key tuples under a sort
/// specification.
#[must_use]
pub fn compare_keys(orders: &[Order], a: &[Value], b: &[Value]) -> Ordering {
    for (index, order) in orders.iter().enumerate() {
        let (Some(ka), Some(kb)) = (a.get(index), b.get(index)) else {
            return Ordering::Equal;
        };
        match order.compare(ka, kb) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_vs_string_comparison() {
        let numeric = Order::ascending(Expression::Identity);
        assert_eq!(
            numeric.compare(&Value::Int(10), &Value::Int(9)),
            Ordering::Greater
        );
        let textual = Order {
            expression: Expression::Identity,
            ascending: true,
            numeric: false,
        };
        assert_eq!(
            textual.compare(&Value::Int(10), &Value::Int(9)),
            Ordering::Less
        );
    }

    #[test]
    fn test_descending_reverses() {
        let order = Order::descending(Expression::Identity);
        assert_eq!(
            order.compare(&Value::Int(1), &Value::Int(2)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_lexicographic_composition() {
        let orders = [
            Order::ascending(Expression::Identity),
            Order::descending(Expression::Identity),
        ];
        let a = [Value::Int(1), Value::Int(5)];
        let b = [Value::Int(1), Value::Int(9)];
        assert_eq!(compare_keys(&orders, &a, &b), Ordering::Greater);
    }
}
