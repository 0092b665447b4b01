//! The expression tree and its symbolic optimizer.
//!
//! Expressions are a closed sum evaluated against a row, an optional
//! joined foreign row and an input value. [`Expression::prepare`]
//! constant-folds and applies a finite set of structural rewrites; it
//! is idempotent and preserves semantics for every row.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::binary::BinaryOp;
use crate::column::Column;
use crate::functions::Function;
use crate::row::Row;
use crate::value::Value;

/// A formula over rows. The serialized form (tagged by `type`) is the
/// persisted on-wire representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Expression {
    /// A constant value.
    Literal {
        /// The constant.
        value: Value,
    },
    /// The evaluator's input value.
    Identity,
    /// The current row's value for a column.
    Sibling {
        /// The referenced column.
        column: Column,
    },
    /// A joined row's value for a column; Invalid when no foreign row
    /// is bound.
    Foreign {
        /// The referenced column.
        column: Column,
    },
    /// An infix operator application.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expression>,
        /// Right operand.
        rhs: Box<Expression>,
    },
    /// A named function application.
    Call {
        /// The function.
        function: Function,
        /// Arguments in order.
        args: Vec<Expression>,
    },
}

impl Expression {
    /// A literal expression.
    #[must_use]
    pub const fn literal(value: Value) -> Self {
        Self::Literal { value }
    }

    /// A reference to the current row's column.
    pub fn sibling(column: impl Into<Column>) -> Self {
        Self::Sibling {
            column: column.into(),
        }
    }

    /// A reference to the joined row's column.
    pub fn foreign(column: impl Into<Column>) -> Self {
        Self::Foreign {
            column: column.into(),
        }
    }

    /// An operator application.
    #[must_use]
    pub fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// A function application.
    #[must_use]
    pub const fn call(function: Function, args: Vec<Self>) -> Self {
        Self::Call { function, args }
    }

    /// Conjunction of the given expressions.
    #[must_use]
    pub const fn and(args: Vec<Self>) -> Self {
        Self::call(Function::And, args)
    }

    /// Disjunction of the given expressions.
    #[must_use]
    pub const fn or(args: Vec<Self>) -> Self {
        Self::call(Function::Or, args)
    }

    /// Evaluates the expression.
    #[must_use]
    pub fn apply(&self, row: &Row, foreign: Option<&Row>, input: &Value) -> Value {
        match self {
            Self::Literal { value } => value.clone(),
            Self::Identity => input.clone(),
            Self::Sibling { column } => row.value(column),
            Self::Foreign { column } => {
                foreign.map_or(Value::Invalid, |foreign_row| foreign_row.value(column))
            }
            Self::Binary { op, lhs, rhs } => op.apply(
                &lhs.apply(row, foreign, input),
                &rhs.apply(row, foreign, input),
            ),
            Self::Call { function, args } => {
                let values: Vec<Value> = args
                    .iter()
                    .map(|arg| arg.apply(row, foreign, input))
                    .collect();
                function.apply(&values)
            }
        }
    }

    /// Evaluates against a row alone.
    #[must_use]
    pub fn apply_row(&self, row: &Row) -> Value {
        self.apply(row, None, &Value::Empty)
    }

    /// Whether the expression yields the same value on repeated
    /// evaluation.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        match self {
            Self::Literal { .. } | Self::Identity | Self::Sibling { .. } | Self::Foreign { .. } => {
                true
            }
            Self::Binary { lhs, rhs, .. } => lhs.is_deterministic() && rhs.is_deterministic(),
            Self::Call { function, args } => {
                function.is_deterministic() && args.iter().all(Self::is_deterministic)
            }
        }
    }

    /// Whether the expression evaluates to the same value regardless
    /// of row and input.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Literal { .. } => true,
            Self::Identity | Self::Sibling { .. } | Self::Foreign { .. } => false,
            Self::Binary { lhs, rhs, .. } => lhs.is_constant() && rhs.is_constant(),
            Self::Call { function, args } => {
                function.is_deterministic() && args.iter().all(Self::is_constant)
            }
        }
    }

    /// Returns an equivalent expression with constant subtrees folded
    /// to literals and the structural rewrites applied, bottom-up.
    #[must_use]
    pub fn prepare(&self) -> Self {
        let prepared = match self {
            Self::Binary { op, lhs, rhs } => Self::binary(*op, lhs.prepare(), rhs.prepare()),
            Self::Call { function, args } => {
                Self::call(*function, args.iter().map(Self::prepare).collect())
            }
            leaf => leaf.clone(),
        };
        prepared.rewritten()
    }

    /// One rewrite step over an expression whose children are already
    /// prepared.
    fn rewritten(self) -> Self {
        let node = match self {
            Self::Call {
                function: Function::Not,
                args,
            } if args.len() == 1 => rewrite_not(args.into_iter().next().unwrap_or(Self::Identity)),
            Self::Call {
                function: Function::And,
                args,
            } => rewrite_and(flatten(Function::And, args)),
            Self::Call {
                function: Function::Or,
                args,
            } => rewrite_or(flatten(Function::Or, args)),
            Self::Binary { op, lhs, rhs } => {
                if op.fold_on_equivalence().is_some()
                    && lhs.is_deterministic()
                    && lhs.is_equivalent(&rhs)
                {
                    Self::literal(Value::Bool(op.fold_on_equivalence().unwrap_or(false)))
                } else {
                    Self::Binary { op, lhs, rhs }
                }
            }
            other => other,
        };
        if node.is_constant() && !matches!(node, Self::Literal { .. }) {
            Self::literal(node.apply_row(&Row::empty()))
        } else {
            node
        }
    }

    /// Structural equivalence: same variant with recursively
    /// equivalent children. Binary nodes also match their mirror, so
    /// `a < b` is equivalent to `b > a`.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal { value: a }, Self::Literal { value: b }) => a == b,
            (Self::Identity, Self::Identity) => true,
            (Self::Sibling { column: a }, Self::Sibling { column: b })
            | (Self::Foreign { column: a }, Self::Foreign { column: b }) => a == b,
            (
                Self::Binary { op, lhs, rhs },
                Self::Binary {
                    op: other_op,
                    lhs: other_lhs,
                    rhs: other_rhs,
                },
            ) => {
                (op == other_op && lhs.is_equivalent(other_lhs) && rhs.is_equivalent(other_rhs))
                    || (op.mirror() == Some(*other_op)
                        && lhs.is_equivalent(other_rhs)
                        && rhs.is_equivalent(other_lhs))
            }
            (
                Self::Call { function, args },
                Self::Call {
                    function: other_function,
                    args: other_args,
                },
            ) => {
                function == other_function
                    && args.len() == other_args.len()
                    && args
                        .iter()
                        .zip(other_args)
                        .all(|(a, b)| a.is_equivalent(b))
            }
            _ => false,
        }
    }

    /// Rebuilds the tree top-down: `f` may replace each node before
    /// its children are visited. This is the sole mutator used by the
    /// dependency analyses.
    pub fn visit<F>(&self, f: &mut F) -> Self
    where
        F: FnMut(&Self) -> Option<Self>,
    {
        let node = f(self).unwrap_or_else(|| self.clone());
        match node {
            Self::Binary { op, lhs, rhs } => Self::binary(op, lhs.visit(f), rhs.visit(f)),
            Self::Call { function, args } => {
                Self::call(function, args.iter().map(|arg| arg.visit(f)).collect())
            }
            leaf => leaf,
        }
    }

    /// The set of sibling columns this expression reads.
    #[must_use]
    pub fn sibling_dependencies(&self) -> HashSet<Column> {
        let mut deps = HashSet::new();
        self.collect_dependencies(&mut deps, false);
        deps
    }

    /// The set of foreign columns this expression reads.
    #[must_use]
    pub fn foreign_dependencies(&self) -> HashSet<Column> {
        let mut deps = HashSet::new();
        self.collect_dependencies(&mut deps, true);
        deps
    }

    fn collect_dependencies(&self, deps: &mut HashSet<Column>, foreign: bool) {
        match self {
            Self::Sibling { column } if !foreign => {
                deps.insert(column.clone());
            }
            Self::Foreign { column } if foreign => {
                deps.insert(column.clone());
            }
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_dependencies(deps, foreign);
                rhs.collect_dependencies(deps, foreign);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_dependencies(deps, foreign);
                }
            }
            _ => {}
        }
    }

    /// Whether any subexpression reads a foreign column.
    #[must_use]
    pub fn depends_on_foreign(&self) -> bool {
        match self {
            Self::Foreign { .. } => true,
            Self::Binary { lhs, rhs, .. } => lhs.depends_on_foreign() || rhs.depends_on_foreign(),
            Self::Call { args, .. } => args.iter().any(Self::depends_on_foreign),
            _ => false,
        }
    }

    /// Whether any subexpression reads a sibling column.
    #[must_use]
    pub fn depends_on_sibling(&self) -> bool {
        match self {
            Self::Sibling { .. } => true,
            Self::Binary { lhs, rhs, .. } => {
                lhs.depends_on_sibling() || rhs.depends_on_sibling()
            }
            Self::Call { args, .. } => args.iter().any(Self::depends_on_sibling),
            _ => false,
        }
    }

    /// Factorizes a join condition into `(sibling side, foreign side)`
    /// equality pairs, when the condition is a conjunction of
    /// comparisons where one operand reads only siblings and the other
    /// only foreigns. Returns None when the condition does not
    /// factorize; the evaluator then falls back to a Cartesian join.
    #[must_use]
    pub fn equijoin_pairs(&self) -> Option<Vec<(Self, Self)>> {
        let conjuncts: Vec<&Self> = match self {
            Self::Call {
                function: Function::And,
                args,
            } => args.iter().collect(),
            other => vec![other],
        };
        let mut pairs = Vec::with_capacity(conjuncts.len());
        for conjunct in conjuncts {
            let Self::Binary {
                op: BinaryOp::Eq,
                lhs,
                rhs,
            } = conjunct
            else {
                return None;
            };
            let left_local = !lhs.depends_on_foreign();
            let right_local = !rhs.depends_on_foreign();
            match (left_local, right_local) {
                (true, false) if !rhs.depends_on_sibling() => {
                    pairs.push(((**lhs).clone(), (**rhs).clone()));
                }
                (false, true) if !lhs.depends_on_sibling() => {
                    pairs.push(((**rhs).clone(), (**lhs).clone()));
                }
                _ => return None,
            }
        }
        Some(pairs)
    }

    /// The conjuncts of this condition that read only foreign columns,
    /// rewritten so they apply directly to the foreign dataset
    /// (Foreign references become Sibling references). None when no
    /// conjunct qualifies.
    #[must_use]
    pub fn expression_for_foreign_filtering(&self) -> Option<Self> {
        let conjuncts: Vec<&Self> = match self {
            Self::Call {
                function: Function::And,
                args,
            } => args.iter().collect(),
            other => vec![other],
        };
        let foreign_only: Vec<Self> = conjuncts
            .into_iter()
            .filter(|c| c.depends_on_foreign() && !c.depends_on_sibling())
            .map(|c| {
                c.visit(&mut |node| match node {
                    Self::Foreign { column } => Some(Self::Sibling {
                        column: column.clone(),
                    }),
                    _ => None,
                })
            })
            .collect();
        match foreign_only.len() {
            0 => None,
            1 => foreign_only.into_iter().next(),
            _ => Some(Self::and(foreign_only)),
        }
    }
}

/// Flattens directly nested And/Or calls into one argument list.
fn flatten(function: Function, args: Vec<Expression>) -> Vec<Expression> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Expression::Call {
                function: inner,
                args: inner_args,
            } if inner == function => out.extend(flatten(function, inner_args)),
            other => out.push(other),
        }
    }
    out
}

fn rewrite_not(arg: Expression) -> Expression {
    match arg {
        Expression::Binary {
            op: BinaryOp::Eq,
            lhs,
            rhs,
        } => Expression::Binary {
            op: BinaryOp::Neq,
            lhs,
            rhs,
        },
        Expression::Call {
            function: Function::In,
            args,
        } => Expression::call(Function::NotIn, args),
        Expression::Call {
            function: Function::NotIn,
            args,
        } => Expression::call(Function::In, args),
        Expression::Call {
            function: Function::Not,
            mut args,
        } if args.len() == 1 => args.remove(0),
        other => Expression::call(Function::Not, vec![other]),
    }
}

fn rewrite_and(args: Vec<Expression>) -> Expression {
    let constant_false = args.iter().any(|arg| {
        matches!(
            arg,
            Expression::Literal {
                value: Value::Bool(false)
            }
        )
    });
    if constant_false {
        return Expression::literal(Value::Bool(false));
    }
    // a <> 1 AND a <> 2 collapses to notIn(a; 1; 2).
    comparison_chain(&args, BinaryOp::Neq, Function::NotIn)
        .unwrap_or(Expression::Call {
            function: Function::And,
            args,
        })
}

fn rewrite_or(args: Vec<Expression>) -> Expression {
    let constant_true = args.iter().any(|arg| {
        matches!(
            arg,
            Expression::Literal {
                value: Value::Bool(true)
            }
        )
    });
    if constant_true {
        return Expression::literal(Value::Bool(true));
    }
    // a = 1 OR a = 2 collapses to in(a; 1; 2).
    comparison_chain(&args, BinaryOp::Eq, Function::In)
        .unwrap_or(Expression::Call {
            function: Function::Or,
            args,
        })
}

/// Detects `col <op> literal` chains over one column and rebuilds them
/// as an in/notIn call. Requires at least two members.
fn comparison_chain(
    args: &[Expression],
    op: BinaryOp,
    target: Function,
) -> Option<Expression> {
    if args.len() < 2 {
        return None;
    }
    let mut column: Option<&Column> = None;
    let mut haystack = Vec::with_capacity(args.len());
    for arg in args {
        let Expression::Binary {
            op: arg_op,
            lhs,
            rhs,
        } = arg
        else {
            return None;
        };
        if *arg_op != op {
            return None;
        }
        let (sibling, literal) = match (&**lhs, &**rhs) {
            (Expression::Sibling { column }, Expression::Literal { .. }) => (column, &**rhs),
            (Expression::Literal { .. }, Expression::Sibling { column }) => (column, &**lhs),
            _ => return None,
        };
        match column {
            None => column = Some(sibling),
            Some(seen) if seen == sibling => {}
            Some(_) => return None,
        }
        haystack.push(literal.clone());
    }
    let column = column?;
    let mut call_args = Vec::with_capacity(haystack.len() + 1);
    call_args.push(Expression::Sibling {
        column: column.clone(),
    });
    call_args.extend(haystack);
    Some(Expression::call(target, call_args))
}
