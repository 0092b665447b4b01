//! # warp-engine
//!
//! The dataset operator algebra of Warp and two of its three execution
//! substrates: the parallel in-memory raster evaluator and the chunked
//! stream evaluator with per-operator transformer stages. The
//! [`Coalesced`] wrapper fuses compatible adjacent operators
//! algebraically before any execution happens.
//!
//! Datasets are immutable values; operators compose synchronously and
//! only the terminal calls (`columns`, `raster`, `unique`, pulling a
//! stream) do work. SQL pushdown, the third substrate, lives in the
//! `warp-sql` crate and implements the same [`Dataset`] trait.

pub mod coalesce;
pub mod dataset;
mod parallel;
pub mod raster_dataset;
mod raster_ops;
pub mod stream;
pub mod transformers;

pub use coalesce::Coalesced;
pub use dataset::{
    Calculation, Dataset, DatasetExt, DatasetRef, JoinClause, JoinType, Operation,
};
pub use parallel::worker_count;
pub use raster_dataset::{RasterDataset, RasterResult};
pub use stream::{
    to_raster, RasterStream, Stream, StreamBatch, StreamDataset, StreamRef, StreamStatus,
    STREAM_BATCH_SIZE,
};
