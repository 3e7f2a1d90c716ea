//! Fan-out of independent start-up work.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::debug;

use super::NetworkError;

/// A group of tasks awaited together. The first failure aborts everything still
/// running in the group and is returned; results of tasks that had already finished are
/// dropped.
#[derive(Debug)]
pub struct TaskGroup<T> {
    set: JoinSet<Result<T, NetworkError>>,
}

impl<T: Send + 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new() -> Self {
        Self { set: JoinSet::new() }
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T, NetworkError>> + Send + 'static,
    {
        self.set.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Waits for every task, in completion order.
    pub async fn join(mut self) -> Result<Vec<T>, NetworkError> {
        let mut results = Vec::with_capacity(self.set.len());
        while let Some(joined) = self.set.join_next().await {
            let outcome = joined.map_err(|e| NetworkError::Task(e.to_string())).and_then(|result| result);
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    debug!(remaining = self.set.len(), "Task failed, aborting the rest");
                    self.set.abort_all();
                    while self.set.join_next().await.is_some() {}
                    return Err(e);
                }
            }
        }
        Ok(results)
    }
}
