//! Jobs: cancellation and progress reporting for long-running work.
//!
//! A job is created at the call site of a terminal operation and
//! passed down to everything that works on its behalf. Child jobs
//! inherit cancellation from their parent; cancelling a parent cancels
//! all children. Cancellation is a best-effort signal, never an error:
//! cancelled work returns an empty successful result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, trace};

/// Long-running loops poll cancellation and report progress at least
/// once per this many rows.
pub const PROGRESS_INTERVAL: usize = 512;

/// A cancellable unit of work with a keyed progress map.
#[derive(Debug, Clone, Default)]
pub struct Job {
    inner: Arc<JobInner>,
}

#[derive(Debug, Default)]
struct JobInner {
    parent: Option<Job>,
    cancelled: AtomicBool,
    progress: Mutex<HashMap<String, f64>>,
}

impl Job {
    /// Creates a root job.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a child job that is cancelled whenever this job is.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(JobInner {
                parent: Some(self.clone()),
                cancelled: AtomicBool::new(false),
                progress: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Signals cancellation to this job and all of its children.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether this job or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(Job::is_cancelled)
    }

    /// Records progress for a key as a fraction in `[0, 1]`.
    pub fn report_progress(&self, key: &str, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        trace!(key, fraction, "progress");
        if let Ok(mut progress) = self.inner.progress.lock() {
            progress.insert(key.to_string(), fraction);
        }
    }

    /// The last reported progress for a key.
    #[must_use]
    pub fn progress(&self, key: &str) -> Option<f64> {
        self.inner
            .progress
            .lock()
            .ok()
            .and_then(|progress| progress.get(key).copied())
    }

    /// The mean progress over all reported keys, or zero when nothing
    /// has reported yet.
    #[must_use]
    pub fn overall_progress(&self) -> f64 {
        self.inner.progress.lock().map_or(0.0, |progress| {
            if progress.is_empty() {
                0.0
            } else {
                progress.values().sum::<f64>() / progress.len() as f64
            }
        })
    }

    /// Runs a future and logs its wall-clock time at debug level.
    pub async fn time<T, F>(&self, description: &str, work: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let started = Instant::now();
        let result = work.await;
        debug!(
            description,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "timed section"
        );
        result
    }
}
