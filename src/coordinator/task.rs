use crate::prelude::*;

use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    TimedOut(Duration),
    /// The task panicked or was cancelled from elsewhere.
    Failed(JoinError),
}

/// A future running on its own task, raced against a wall-clock limit by its owner.
///
/// Dropping the handle (including after a timeout) aborts the task. Abort is
/// cooperative: it takes effect at the task's next await point, so a device
/// read already handed to the kernel is not interrupted. Bytes that arrive
/// after an abandoned exchange are discarded by the next command's flush.
pub struct BoundedTask<T> {
    name: String,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> BoundedTask<T> {
    pub fn spawn<F>(name: &str, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            name: name.to_owned(),
            handle: tokio::spawn(future),
        }
    }

    pub async fn wait(mut self, limit: Duration) -> TaskOutcome<T> {
        match tokio::time::timeout(limit, &mut self.handle).await {
            Ok(Ok(value)) => TaskOutcome::Completed(value),
            Ok(Err(e)) => TaskOutcome::Failed(e),
            Err(_) => {
                debug!("{}: abandoning task after {}ms", self.name, limit.as_millis());
                TaskOutcome::TimedOut(limit)
            }
        }
    }
}

impl<T> Drop for BoundedTask<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
