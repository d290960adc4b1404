use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::task::JoinSet;

/// Async module errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrellisAsyncError {
    /// Generic join error
    #[error("Unable to rejoin pending future")]
    JoinError,

    /// A future did not complete before its deadline
    #[error("Future did not complete within {0:?}")]
    Elapsed(Duration),
}

/// Drive `future` to completion, giving up once `limit` has elapsed.
///
/// A `limit` of `None` waits indefinitely.
pub async fn deadline<F>(limit: Option<Duration>, future: F) -> Result<F::Output, TrellisAsyncError>
where
    F: Future,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| TrellisAsyncError::Elapsed(limit)),
        None => Ok(future.await),
    }
}

/// An aggregator of async work whose outputs are collected once all of it
/// has completed. Outputs are returned in the order the work was queued,
/// regardless of the order in which it finished.
///
/// ```rust
/// # use trellis_common::TaskQueue;
/// #
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut task_queue = TaskQueue::default();
/// for i in 0..10 {
///     task_queue.spawn(async move { i * 2 });
/// }
/// let outputs = task_queue.join().await?;
/// assert_eq!(outputs[3], 6);
/// #   Ok(())
/// # }
/// ```
pub struct TaskQueue<T> {
    tasks: JoinSet<(usize, T)>,
    queued: usize,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            tasks: JoinSet::new(),
            queued: 0,
        }
    }
}

impl<T> TaskQueue<T>
where
    T: Send + 'static,
{
    /// Queue a future to be spawned in the ambient executor. All queued
    /// futures will be polled to completion before the [TaskQueue] can be
    /// joined.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let index = self.queued;
        self.queued += 1;
        self.tasks.spawn(async move { (index, future.await) });
    }

    /// Returns a future that finishes when all queued futures have finished,
    /// yielding their outputs in queue order.
    pub async fn join(&mut self) -> Result<Vec<T>, TrellisAsyncError> {
        let mut outputs = Vec::with_capacity(self.tasks.len());
        while let Some(result) = self.tasks.join_next().await {
            outputs.push(result.map_err(|_| TrellisAsyncError::JoinError)?);
        }
        outputs.sort_by_key(|(index, _)| *index);
        self.queued = 0;
        Ok(outputs.into_iter().map(|(_, output)| output).collect())
    }

    /// The number of queued tasks that have not been joined yet
    pub fn count(&self) -> usize {
        self.tasks.len()
    }
}

impl<T> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
