//! Bounded pool of background scan workers
//!
//! Each task runs as its own tokio task; a semaphore caps how many process
//! sources at the same time. Cancellation tokens are registered at submit
//! time so a task can be cancelled while still waiting for a permit.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    cancellation_tokens: Arc<RwLock<HashMap<i64, CancellationToken>>>,
    running: Arc<AtomicUsize>,
    max_concurrent: usize,
}

/// Decrements the running count even if the worker future panics
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
        }
    }

    /// Token for `task_id`, created on first call
    pub async fn register(&self, task_id: i64) -> CancellationToken {
        self.cancellation_tokens
            .write()
            .await
            .entry(task_id)
            .or_default()
            .clone()
    }

    /// Trip the task's token; false if the task is not tracked
    pub async fn cancel(&self, task_id: i64) -> bool {
        match self.cancellation_tokens.read().await.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_tracked(&self, task_id: i64) -> bool {
        self.cancellation_tokens.read().await.contains_key(&task_id)
    }

    /// Run `work` once a permit is free; the token is dropped when it finishes
    pub fn spawn<F>(&self, task_id: i64, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let tokens = self.cancellation_tokens.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::error!(task_id, "Worker pool closed before task could start");
                    tokens.write().await.remove(&task_id);
                    return;
                }
            };

            running.fetch_add(1, Ordering::SeqCst);
            let guard = RunningGuard(running);
            work.await;
            drop(guard);

            tokens.write().await.remove(&task_id);
        })
    }

    /// Tasks currently holding a permit
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Tasks submitted and not yet finished, queued ones included
    pub async fn tracked(&self) -> usize {
        self.cancellation_tokens.read().await.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel::<i64>();

        pool.register(1).await;
        pool.register(2).await;

        let tx1 = started_tx.clone();
        let first = pool.spawn(1, async move {
            tx1.send(1).unwrap();
            release_rx.await.ok();
        });
        let second = pool.spawn(2, async move {
            started_tx.send(2).unwrap();
        });

        assert_eq!(started_rx.recv().await, Some(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started_rx.try_recv().is_err());
        assert_eq!(pool.running(), 1);
        assert_eq!(pool.tracked().await, 2);

        release_tx.send(()).unwrap();
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(started_rx.recv().await, Some(2));
        assert_eq!(pool.running(), 0);
        assert_eq!(pool.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_trips_registered_token() {
        let pool = WorkerPool::new(2);
        let token = pool.register(9).await;
        assert!(pool.cancel(9).await);
        assert!(token.is_cancelled());
        assert!(!pool.cancel(10).await);
    }
}
