// Bounded worker pool for trigger firings
//
// `size` tasks run at once and up to `queue_capacity` more may wait for a
// run permit; submissions beyond that are rejected immediately.

use crate::errors::SchedulerError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct WorkerPool {
    run_permits: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    capacity: usize,
    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(size: usize, queue_capacity: usize) -> Self {
        let capacity = size + queue_capacity;
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            run_permits: Arc::new(Semaphore::new(size)),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            shutdown_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue `task`; it is cancelled if the pool shuts down before or while it runs
    pub fn submit<F>(&self, task: F) -> Result<JoinHandle<()>, SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::PoolShutdown);
        }

        let slot = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| SchedulerError::PoolSaturated {
                capacity: self.capacity,
            })?;
        let run_permits = Arc::clone(&self.run_permits);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Ok(tokio::spawn(async move {
            let _slot = slot;
            let _permit = tokio::select! {
                permit = run_permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = shutdown_rx.recv() => return,
            };

            tokio::select! {
                _ = task => {}
                _ = shutdown_rx.recv() => {
                    debug!("Worker task interrupted by pool shutdown");
                }
            }
        }))
    }

    /// Tasks queued or running
    pub fn in_use(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reject new submissions and interrupt everything queued or running
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        self.run_permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_runs_submitted_tasks() {
        let pool = WorkerPool::new(2, 2);
        let done = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let done = Arc::clone(&done);
                pool.submit(async move {
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();
        futures::future::join_all(handles).await;

        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_rejects_when_saturated() {
        let pool = WorkerPool::new(1, 1);
        let gate = Arc::new(Notify::new());

        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            pool.submit(async move { gate.notified().await }).unwrap();
        }

        let err = pool.submit(async {}).unwrap_err();
        assert!(matches!(err, SchedulerError::PoolSaturated { capacity: 2 }));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_running_tasks() {
        let pool = WorkerPool::new(1, 0);
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let handle = pool
            .submit(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        tokio::task::yield_now().await;

        pool.shutdown();
        handle.await.unwrap();

        assert!(!finished.load(Ordering::SeqCst));
        assert!(matches!(
            pool.submit(async {}).unwrap_err(),
            SchedulerError::PoolShutdown
        ));
    }
}
