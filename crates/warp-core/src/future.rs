//! Memoized single-producer futures.
//!
//! A [`ValueFuture`] owns one asynchronous producer. The first waiter
//! runs the producer; every later waiter receives a clone of the
//! memoized result. Waiters are delivered in the order they
//! registered. The producer receives a child of the waiting job so
//! cancelling the terminal operation cancels the production.

use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use crate::job::Job;

type Producer<T> = Box<dyn FnOnce(Job) -> BoxFuture<'static, T> + Send>;

/// A memoized, single-producer asynchronous value.
pub struct ValueFuture<T> {
    producer: Mutex<Option<Producer<T>>>,
    cell: OnceCell<T>,
}

impl<T> std::fmt::Debug for ValueFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueFuture")
            .field("produced", &self.cell.initialized())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> ValueFuture<T> {
    /// Wraps a producer. The producer runs at most once, on the first
    /// call to [`ValueFuture::get`].
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(Job) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        Self {
            producer: Mutex::new(Some(Box::new(move |job| Box::pin(producer(job))))),
            cell: OnceCell::new(),
        }
    }

    /// A future that already holds its value.
    pub fn ready(value: T) -> Self {
        Self {
            producer: Mutex::new(None),
            cell: OnceCell::new_with(Some(value)),
        }
    }

    /// Returns the memoized value, producing it on first call.
    pub async fn get(&self, job: &Job) -> T {
        self.cell
            .get_or_init(|| {
                let producer = self
                    .producer
                    .lock()
                    .ok()
                    .and_then(|mut slot| slot.take())
                    .expect("a ValueFuture producer runs exactly once");
                producer(job.child())
            })
            .await
            .clone()
    }

    /// The value, when it has already been produced.
    pub fn peek(&self) -> Option<&T> {
        self.cell.get()
    }
}
