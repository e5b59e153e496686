use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{TransferError, TransferResult};

/// Bounded worker pool executing transfer operations off the
/// request-handling path.
///
/// `dispatch` hands the work to the pool and returns a [`TaskHandle`]
/// immediately; completion is signaled through the handle. Requests beyond
/// pool capacity queue up to `queue_depth` before intake starts waiting -
/// backpressure by queueing, not rejection.
pub struct TaskDispatcher {
    queue: mpsc::Sender<BoxFuture<'static, ()>>,
    workers: Vec<JoinHandle<()>>,
}

/// Pending result of a dispatched task.
///
/// Await [`TaskHandle::join`] for the outcome, or call
/// [`TaskHandle::cancel`] to request the task stop early.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
    cancel: CancellationToken,
}

impl<T> TaskHandle<T> {
    /// Request cancellation.
    ///
    /// The task observes the token at its own checkpoints; work already
    /// dispatched to a backend is allowed to finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to complete
    pub async fn join(self) -> TransferResult<T> {
        self.rx.await.map_err(|_| TransferError::Cancelled)
    }
}

impl TaskDispatcher {
    /// Create a dispatcher with `worker_count` workers and room for
    /// `queue_depth` queued tasks
    pub fn new(worker_count: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<BoxFuture<'static, ()>>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    debug!(worker, "transfer worker started");
                    loop {
                        // Hold the lock only while receiving so other
                        // workers can drain the queue concurrently.
                        let task = rx.lock().await.recv().await;
                        match task {
                            Some(task) => task.await,
                            None => break,
                        }
                    }
                    debug!(worker, "transfer worker stopped");
                })
            })
            .collect();

        Self { queue: tx, workers }
    }

    /// Create a dispatcher sized from a transfer configuration
    pub fn from_config(config: &crate::TransferConfig) -> Self {
        Self::new(config.worker_count, config.queue_depth)
    }

    /// Submit a unit of work.
    ///
    /// Returns once the task is queued (waiting for queue space if the pool
    /// is saturated); the returned handle resolves when the task finishes.
    pub async fn dispatch<F, Fut, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (tx, rx) = oneshot::channel();

        let fut: BoxFuture<'static, ()> = Box::pin(async move {
            let result = task(token).await;
            // Receiver may have been dropped; completion is best-effort.
            let _ = tx.send(result);
        });

        if self.queue.send(fut).await.is_err() {
            // Dispatcher shut down: the dropped sender resolves the handle
            // as cancelled.
            error!("task dispatcher queue is closed");
        }

        TaskHandle { rx, cancel }
    }

    /// Stop accepting work and wait for the workers to drain the queue
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_completion_through_the_handle() {
        let dispatcher = TaskDispatcher::new(2, 4);

        let handle = dispatcher.dispatch(|_cancel| async { 21 * 2 }).await;

        assert_eq!(handle.join().await.unwrap(), 42);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn bounds_concurrent_execution_to_the_worker_count() {
        let dispatcher = TaskDispatcher::new(2, 16);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let active = active.clone();
            let peak = peak.clone();
            let handle = dispatcher
                .dispatch(move |_cancel| async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            handles.push(handle);
        }

        for handle in handles {
            handle.join().await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn cancellation_reaches_the_running_task() {
        let dispatcher = TaskDispatcher::new(1, 4);

        let handle = dispatcher
            .dispatch(|cancel| async move {
                cancel.cancelled().await;
                "stopped"
            })
            .await;

        handle.cancel();
        assert_eq!(handle.join().await.unwrap(), "stopped");
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn queued_tasks_run_after_workers_free_up() {
        let dispatcher = TaskDispatcher::new(1, 8);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let order = order.clone();
            let handle = dispatcher
                .dispatch(move |_cancel| async move {
                    order.lock().push(i);
                })
                .await;
            handles.push(handle);
        }
        for handle in handles {
            handle.join().await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        dispatcher.shutdown().await;
    }
}
