//! Expression inference: "learn by example".
//!
//! Given a source value, a target value and the row they came from,
//! enumerate candidate expressions that transform source into target.
//! Functions and operators contribute seeds through their `suggest`
//! hooks; the driver searches breadth-first over compositions, pruning
//! by complexity and memoizing intermediate values. The search is
//! deterministic given its inputs.

use std::collections::HashSet;

use crate::binary::BinaryOp;
use crate::expression::Expression;
use crate::functions::Function;
use crate::row::Row;
use crate::value::Value;

/// Unary functions the breadth-first search composes blindly, beyond
/// the targeted `suggest` seeds.
const SEARCH_FUNCTIONS: [Function; 8] = [
    Function::Upper,
    Function::Lower,
    Function::Trim,
    Function::Capitalize,
    Function::Length,
    Function::Negate,
    Function::Abs,
    Function::Sqrt,
];

/// Inference parameters.
#[derive(Debug, Clone, Copy)]
pub struct Inference {
    /// Maximum node count of a candidate expression.
    pub max_complexity: usize,
    /// Maximum number of search levels.
    pub max_depth: usize,
}

impl Default for Inference {
    fn default() -> Self {
        Self {
            max_complexity: 7,
            max_depth: 3,
        }
    }
}

impl Inference {
    /// Enumerates expressions `e` with `e.apply(row, None, from) == to`,
    /// simplest first.
    #[must_use]
    pub fn infer(&self, from: &Value, to: &Value, row: &Row) -> Vec<Expression> {
        let mut found = Vec::new();
        let mut frontier: Vec<Expression> = vec![Expression::Identity];
        // Sibling references whose value already equals the source are
        // alternative roots: the user may have meant another column.
        for column in row.columns().iter() {
            if row.value(column) == *from {
                frontier.push(Expression::sibling(column.clone()));
            }
        }
        let mut seen_values: HashSet<Value> = HashSet::new();
        for candidate in &frontier {
            Self::keep_if_hit(candidate, from, to, row, &mut found);
        }
        for _ in 0..self.max_depth {
            let mut next = Vec::new();
            for base in &frontier {
                let produced = base.apply(row, None, from);
                if !produced.is_valid() {
                    continue;
                }
                for candidate in expansions(base, &produced, to) {
                    if complexity(&candidate) > self.max_complexity {
                        continue;
                    }
                    let value = candidate.apply(row, None, from);
                    if !value.is_valid() {
                        continue;
                    }
                    Self::keep_if_hit(&candidate, from, to, row, &mut found);
                    // Expanding two candidates that produce the same
                    // value explores the same space twice.
                    if seen_values.insert(value) {
                        next.push(candidate);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        found.sort_by_key(complexity);
        found.dedup_by(|a, b| a.is_equivalent(b));
        found
    }

    fn keep_if_hit(
        candidate: &Expression,
        from: &Value,
        to: &Value,
        row: &Row,
        found: &mut Vec<Expression>,
    ) {
        if candidate.is_deterministic() && candidate.apply(row, None, from) == *to {
            found.push(candidate.clone());
        }
    }
}

/// All one-step growths of a candidate: targeted suggestions from the
/// function and operator hooks, plus the blind unary set.
fn expansions(base: &Expression, produced: &Value, to: &Value) -> Vec<Expression> {
    let mut out = Vec::new();
    for function in all_suggesting_functions() {
        for seed in function.suggest(produced, to) {
            out.push(graft(&seed, base));
        }
    }
    for (op, operand) in binary_suggestions(produced, to) {
        out.push(Expression::binary(
            op,
            base.clone(),
            Expression::literal(operand),
        ));
    }
    for function in SEARCH_FUNCTIONS {
        out.push(Expression::call(function, vec![base.clone()]));
    }
    out
}

/// Functions with targeted suggest hooks.
fn all_suggesting_functions() -> [Function; 10] {
    [
        Function::Upper,
        Function::Lower,
        Function::Trim,
        Function::Capitalize,
        Function::Negate,
        Function::Abs,
        Function::Left,
        Function::Right,
        Function::Mid,
        Function::Concat,
    ]
}

/// Arithmetic seeds: the constant that maps `from` to `to` under each
/// operator, when both are numeric.
fn binary_suggestions(from: &Value, to: &Value) -> Vec<(BinaryOp, Value)> {
    let (Some(f), Some(t)) = (from.double_value(), to.double_value()) else {
        return Vec::new();
    };
    let mut out = vec![(BinaryOp::Add, Value::Double(t - f))];
    if f != 0.0 && (t / f).is_finite() {
        out.push((BinaryOp::Mul, Value::Double(t / f)));
    }
    out
}

/// Replaces the Identity leaves of a suggestion with the base
/// candidate, composing the two.
fn graft(seed: &Expression, base: &Expression) -> Expression {
    seed.visit(&mut |node| match node {
        Expression::Identity => Some(base.clone()),
        _ => None,
    })
}

/// Node count, the complexity measure used for pruning.
fn complexity(expression: &Expression) -> usize {
    match expression {
        Expression::Binary { lhs, rhs, .. } => 1 + complexity(lhs) + complexity(rhs),
        Expression::Call { args, .. } => 1 + args.iter().map(complexity).sum::<usize>(),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::OrderedColumns;
    use std::sync::Arc;

    fn row() -> Row {
        Row::new(
            vec![Value::from("warp"), Value::Int(10)],
            Arc::new(OrderedColumns::from_names(["name", "n"])),
        )
    }

    #[test]
    fn test_infers_upper() {
        let results =
            Inference::default().infer(&Value::from("warp"), &Value::from("WARP"), &row());
        assert!(results
            .iter()
            .any(|e| matches!(e, Expression::Call { function: Function::Upper, .. })));
    }

    #[test]
    fn test_infers_arithmetic() {
        let results = Inference::default().infer(&Value::Int(10), &Value::Double(30.0), &row());
        assert!(!results.is_empty());
        let r = row();
        for e in &results {
            assert_eq!(
                e.apply(&r, None, &Value::Int(10)),
                Value::Double(30.0)
            );
        }
    }

    #[test]
    fn test_identity_when_equal() {
        let results = Inference::default().infer(&Value::Int(10), &Value::Int(10), &row());
        assert!(results.contains(&Expression::Identity));
    }

    #[test]
    fn test_deterministic_results() {
        let a = Inference::default().infer(&Value::from("ab"), &Value::from("AB"), &row());
        let b = Inference::default().infer(&Value::from("ab"), &Value::from("AB"), &row());
        assert_eq!(a, b);
    }
}
