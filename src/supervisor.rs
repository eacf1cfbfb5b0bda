//! Supervised background tasks

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::errors::Result;

/// Tracks background tasks so shutdown can wait for all of them
///
/// Task failures are logged and never propagate; the supervisor only answers
/// "is everything finished".
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    tracker: TaskTracker,
}

impl Supervisor {
    /// Empty supervisor
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a named fallible task
    pub fn spawn<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tracker.spawn(async move {
            match task.await {
                Ok(()) => debug!(task = name, "task finished"),
                Err(err) => error!(task = name, error = %err, "task failed"),
            }
        })
    }

    /// Number of tasks still running
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Whether no task is running
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Close the tracker and wait until every task has finished
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
