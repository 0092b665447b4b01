//! The in-memory dataset: a memoized raster with lazy operators.
//!
//! Every operator application produces a new dataset whose raster is
//! computed on the first terminal call and memoized; chains share
//! their intermediate results through [`ValueFuture`].

use std::sync::Arc;

use async_trait::async_trait;

use warp_core::{Job, OrderedColumns, Raster, Result, ValueFuture, WarpError};

use crate::dataset::{Dataset, DatasetRef, Operation};
use crate::raster_ops;
use crate::stream::{self, RasterStream, StreamRef};

/// A shared raster or the error that prevented producing it. Shared so
/// every waiter of a memoized future receives the same result.
pub type RasterResult = std::result::Result<Arc<Raster>, Arc<WarpError>>;

/// A dataset backed by an in-memory raster.
#[derive(Debug)]
pub struct RasterDataset {
    future: Arc<ValueFuture<RasterResult>>,
}

impl RasterDataset {
    /// A dataset over an already-materialized raster.
    #[must_use]
    pub fn from_raster(raster: Raster) -> Self {
        Self {
            future: Arc::new(ValueFuture::ready(Ok(Arc::new(raster.freeze())))),
        }
    }

    /// A dataset whose raster is produced on first use.
    pub fn deferred<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(Job) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<Raster>> + Send + 'static,
    {
        Self {
            future: Arc::new(ValueFuture::new(move |job| async move {
                producer(job)
                    .await
                    .map(|raster| Arc::new(raster.freeze()))
                    .map_err(Arc::new)
            })),
        }
    }

    /// A dataset that materializes a stream on first use.
    #[must_use]
    pub fn from_stream(source: StreamRef) -> Self {
        Self::deferred(move |job| async move { stream::to_raster(source, &job).await })
    }

    pub(crate) fn shared_future(&self) -> Arc<ValueFuture<RasterResult>> {
        Arc::clone(&self.future)
    }
}

#[async_trait]
impl Dataset for RasterDataset {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        match self.future.get(job).await {
            Ok(raster) => Ok(raster.columns().clone()),
            Err(error) => Err(error.cloned()),
        }
    }

    async fn raster(&self, job: &Job) -> Result<Arc<Raster>> {
        self.future.get(job).await.map_err(|error| error.cloned())
    }

    fn stream(&self) -> StreamRef {
        Arc::new(RasterStream::new(Arc::clone(&self.future)))
    }

    fn apply(self: Arc<Self>, operation: Operation) -> DatasetRef {
        let source = Arc::clone(&self.future);
        Arc::new(Self {
            future: Arc::new(ValueFuture::new(move |job| async move {
                match source.get(&job).await {
                    Err(error) => Err(error),
                    Ok(raster) => raster_ops::apply(&operation, &raster, &job)
                        .await
                        .map(Arc::new)
                        .map_err(Arc::new),
                }
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_core::{Column, Expression, Value};

    use crate::dataset::DatasetExt;

    fn dataset() -> DatasetRef {
        let raster = Raster::new(
            OrderedColumns::from_names(["n"]),
            (0..10).map(|i| vec![Value::Int(i)]).collect(),
        );
        Arc::new(RasterDataset::from_raster(raster))
    }

    #[tokio::test]
    async fn test_terminal_calls_share_the_memoized_raster() {
        let dataset = dataset();
        let job = Job::new();
        let first = dataset.raster(&job).await.unwrap();
        let second = dataset.raster(&job).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_apply_is_lazy_and_immutable() {
        let dataset = dataset();
        let limited = dataset.limit(3);
        let job = Job::new();
        assert_eq!(limited.raster(&job).await.unwrap().row_count(), 3);
        // The source dataset is unchanged.
        assert_eq!(dataset.raster(&job).await.unwrap().row_count(), 10);
    }

    #[tokio::test]
    async fn test_unique_default() {
        let raster = Raster::new(
            OrderedColumns::from_names(["k"]),
            vec![
                vec![Value::from("a")],
                vec![Value::from("b")],
                vec![Value::from("a")],
            ],
        );
        let dataset: DatasetRef = Arc::new(RasterDataset::from_raster(raster));
        let job = Job::new();
        let unique = dataset
            .unique(&Expression::sibling(Column::new("k")), &job)
            .await
            .unwrap();
        assert_eq!(unique.len(), 2);
    }
}
