//! Chunked streams with back-pressure and the wavefront puller.
//!
//! A stream delivers batches of at most [`STREAM_BATCH_SIZE`] rows.
//! `fetch` may be called concurrently (wavefronts); every batch
//! carries the ordinal assigned while the stream's cursor was held, so
//! a consumer can reassemble source order no matter how wavefronts
//! interleave. `clone_stream` produces a reset copy that yields the
//! same sequence from the beginning.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use warp_core::{Job, OrderedColumns, Raster, Result, Value, ValueFuture, WarpError};

use crate::dataset::{Dataset, DatasetRef, Operation};
use crate::parallel;
use crate::raster_dataset::{RasterDataset, RasterResult};
use crate::transformers;

/// Maximum number of rows per fetched chunk.
pub const STREAM_BATCH_SIZE: usize = 256;

/// Whether more batches follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// More rows may follow; fetch again.
    HasMore,
    /// The stream is exhausted.
    Finished,
}

/// One delivered chunk.
#[derive(Debug, Clone)]
pub struct StreamBatch {
    /// Position of this batch in source order.
    pub ordinal: usize,
    /// The rows of this batch; may be empty on the final fetch.
    pub rows: Vec<Vec<Value>>,
    /// Continuation flag.
    pub status: StreamStatus,
}

impl StreamBatch {
    /// An empty, final batch: what a drained or cancelled stream
    /// returns.
    #[must_use]
    pub const fn finished(ordinal: usize) -> Self {
        Self {
            ordinal,
            rows: Vec::new(),
            status: StreamStatus::Finished,
        }
    }
}

/// A lazy, chunked row producer.
#[async_trait]
pub trait Stream: fmt::Debug + Send + Sync {
    /// The columns every batch conforms to.
    async fn columns(&self, job: &Job) -> Result<OrderedColumns>;

    /// Delivers the next batch. Safe to call concurrently; batches are
    /// assigned ordinals in source order. After the stream finishes,
    /// further fetches return empty finished batches. A failed stream
    /// reports the error once and is finished thereafter.
    async fn fetch(&self, job: &Job) -> Result<StreamBatch>;

    /// A reset copy yielding the same sequence from the beginning.
    fn clone_stream(&self) -> StreamRef;
}

/// A shared, type-erased stream.
pub type StreamRef = Arc<dyn Stream>;

#[derive(Debug, Default)]
struct Cursor {
    position: usize,
    ordinal: usize,
}

/// A stream over a (possibly still unproduced) raster.
#[derive(Debug)]
pub struct RasterStream {
    source: Arc<ValueFuture<RasterResult>>,
    cursor: Mutex<Cursor>,
}

impl RasterStream {
    /// A stream over a raster future; SQL datasets use this to chunk a
    /// drained result set.
    #[must_use]
    pub fn new(source: Arc<ValueFuture<RasterResult>>) -> Self {
        Self {
            source,
            cursor: Mutex::new(Cursor::default()),
        }
    }
}

#[async_trait]
impl Stream for RasterStream {
    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        match self.source.get(job).await {
            Ok(raster) => Ok(raster.columns().clone()),
            Err(error) => Err(error.cloned()),
        }
    }

    async fn fetch(&self, job: &Job) -> Result<StreamBatch> {
        let raster = self.source.get(job).await.map_err(|error| error.cloned())?;
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| WarpError::Backend("stream cursor poisoned".to_string()))?;
        let start = cursor.position.min(raster.row_count());
        let end = (start + STREAM_BATCH_SIZE).min(raster.row_count());
        cursor.position = end;
        let ordinal = cursor.ordinal;
        cursor.ordinal += 1;
        let status = if end >= raster.row_count() {
            StreamStatus::Finished
        } else {
            StreamStatus::HasMore
        };
        Ok(StreamBatch {
            ordinal,
            rows: raster.rows()[start..end].to_vec(),
            status,
        })
    }

    fn clone_stream(&self) -> StreamRef {
        Arc::new(Self::new(Arc::clone(&self.source)))
    }
}

/// Pulls a stream to completion with up to one wavefront per CPU core,
/// reassembling batches in ordinal order. Cancellation yields an empty
/// raster; a stream error surfaces once.
pub async fn to_raster(stream: StreamRef, job: &Job) -> Result<Raster> {
    let columns = stream.columns(job).await?;
    let wavefronts = parallel::worker_count();
    let batches: Arc<Mutex<BTreeMap<usize, Vec<Vec<Value>>>>> =
        Arc::new(Mutex::new(BTreeMap::new()));
    let failure: Arc<Mutex<Option<WarpError>>> = Arc::new(Mutex::new(None));

    let tasks: Vec<_> = (0..wavefronts)
        .map(|_| {
            let stream = Arc::clone(&stream);
            let batches = Arc::clone(&batches);
            let failure = Arc::clone(&failure);
            let job = job.clone();
            tokio::spawn(async move {
                loop {
                    if job.is_cancelled() {
                        break;
                    }
                    match stream.fetch(&job).await {
                        Ok(batch) => {
                            let finished = batch.status == StreamStatus::Finished;
                            if !batch.rows.is_empty() {
                                if let Ok(mut slots) = batches.lock() {
                                    slots.insert(batch.ordinal, batch.rows);
                                }
                            }
                            if finished {
                                break;
                            }
                        }
                        Err(error) => {
                            if let Ok(mut slot) = failure.lock() {
                                slot.get_or_insert(error);
                            }
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    join_all(tasks).await;

    if let Some(error) = failure.lock().ok().and_then(|mut slot| slot.take()) {
        return Err(error);
    }
    if job.is_cancelled() {
        debug!("stream pull cancelled");
        return Ok(Raster::empty(columns).freeze());
    }
    let rows: Vec<Vec<Value>> = batches
        .lock()
        .map(|mut slots| std::mem::take(&mut *slots))
        .unwrap_or_default()
        .into_values()
        .flatten()
        .collect();
    Ok(Raster::new(columns, rows).freeze())
}

/// A dataset over a stream. Operators with a transformer stage stay
/// incremental; the rest materialize the stream into a raster first.
#[derive(Debug)]
pub struct StreamDataset {
    stream: StreamRef,
}

impl StreamDataset {
    /// Wraps a stream as a dataset.
    #[must_use]
    pub const fn new(stream: StreamRef) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Dataset for StreamDataset {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        self.stream.columns(job).await
    }

    async fn raster(&self, job: &Job) -> Result<Arc<Raster>> {
        to_raster(self.stream.clone_stream(), job).await.map(Arc::new)
    }

    fn stream(&self) -> StreamRef {
        self.stream.clone_stream()
    }

    fn apply(self: Arc<Self>, operation: Operation) -> DatasetRef {
        match transformers::transform(self.stream.clone_stream(), &operation) {
            Some(stream) => Arc::new(Self { stream }),
            None => {
                // No incremental stage for this operator; materialize
                // and continue on the raster path.
                let materialized: DatasetRef =
                    Arc::new(RasterDataset::from_stream(self.stream.clone_stream()));
                materialized.apply(operation)
            }
        }
    }
}
