//! # warp-core
//!
//! The value and expression algebra of the Warp data-wrangling engine,
//! plus the concurrency primitives the execution substrates share.
//!
//! This crate provides:
//! - A dynamically typed [`Value`] domain with total coercion
//! - An [`Expression`] tree with a symbolic optimizer ([`Expression::prepare`])
//! - The named [`Function`] library and [`BinaryOp`] operator table
//! - [`Row`] and [`Raster`] in-memory tabular containers
//! - [`Job`] cancellation/progress, memoized [`ValueFuture`]s and the
//!   [`Reservoir`]/[`MovingSample`] samplers
//!
//! Evaluation is total: an operation outside its domain yields
//! [`Value::Invalid`] rather than an error. Errors ([`WarpError`]) are
//! reserved for schemas, backends and mutation contracts.

pub mod aggregation;
pub mod binary;
pub mod column;
pub mod error;
pub mod expression;
pub mod functions;
pub mod future;
pub mod infer;
pub mod job;
pub mod pack;
pub mod row;
pub mod sample;
pub mod sorting;
pub mod value;

pub use aggregation::Aggregation;
pub use binary::BinaryOp;
pub use column::{Column, OrderedColumns};
pub use error::{Result, WarpError};
pub use expression::Expression;
pub use functions::{Arity, Function};
pub use future::ValueFuture;
pub use infer::Inference;
pub use job::{Job, PROGRESS_INTERVAL};
pub use row::{Raster, Row};
pub use sample::{MovingSample, Reservoir};
pub use sorting::Order;
pub use value::{Value, REFERENCE_UNIX_OFFSET};
