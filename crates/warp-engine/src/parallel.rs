//! Chunked parallel row mapping for the raster evaluator.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;

use warp_core::{Job, OrderedColumns, Row, Value, PROGRESS_INTERVAL};

/// Size of the worker pool: one task per available CPU core.
#[must_use]
pub fn worker_count() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Maps every row through `map`, in parallel chunks.
///
/// Each source row may produce zero, one or many output rows; chunk
/// results are concatenated in source order, so the mapping preserves
/// row order. Progress is reported and cancellation polled every
/// [`PROGRESS_INTERVAL`] rows; on cancellation the surviving prefix is
/// returned and the caller is expected to discard it.
pub async fn map_rows<F>(
    job: &Job,
    progress_key: &str,
    columns: Arc<OrderedColumns>,
    rows: Vec<Vec<Value>>,
    map: F,
) -> Vec<Vec<Value>>
where
    F: Fn(&Row) -> Vec<Vec<Value>> + Send + Sync + 'static,
{
    let total = rows.len();
    if total == 0 {
        return Vec::new();
    }
    let chunk_size = total.div_ceil(worker_count()).max(1);
    let map = Arc::new(map);
    let done = Arc::new(AtomicUsize::new(0));

    let mut remaining = rows;
    let mut tasks = Vec::new();
    while !remaining.is_empty() {
        let rest = remaining.split_off(chunk_size.min(remaining.len()));
        let chunk = std::mem::replace(&mut remaining, rest);
        let map = Arc::clone(&map);
        let columns = Arc::clone(&columns);
        let done = Arc::clone(&done);
        let job = job.clone();
        let key = progress_key.to_string();
        tasks.push(tokio::spawn(async move {
            let mut out = Vec::with_capacity(chunk.len());
            for values in chunk {
                let row = Row::new(values, Arc::clone(&columns));
                out.extend(map(&row));
                let processed = done.fetch_add(1, Ordering::Relaxed) + 1;
                if processed % PROGRESS_INTERVAL == 0 {
                    if job.is_cancelled() {
                        break;
                    }
                    job.report_progress(&key, processed as f64 / total as f64);
                }
            }
            out
        }));
    }

    let chunks = join_all(tasks).await;
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend(chunk.unwrap_or_default());
    }
    out
}
