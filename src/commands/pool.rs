use std::{future::Future, sync::Arc};

use tokio::{sync::Semaphore, task::JoinHandle};

/// Caps how many requests are in flight at once. Extra requests wait for a
/// permit instead of being dropped.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `task` on the runtime once a permit is free.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // The semaphore is never closed, so this only fails if that changes.
            let _permit = permits.acquire_owned().await.ok();
            task.await
        })
    }
}
