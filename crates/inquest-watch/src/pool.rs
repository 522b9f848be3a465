//! Bounded pool of async workers for file handlers.
//!
//! Jobs are queued on a bounded channel and drained by a fixed number of
//! worker tasks on a tokio runtime. When the queue is full the pool either
//! blocks the submitter ([`SaturationPolicy::Wait`]) or refuses the job
//! ([`SaturationPolicy::Reject`]). `submit` is meant to be called from a plain
//! thread (the watcher's consumer thread), never from inside the runtime.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::WatchError;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaturationPolicy {
    /// Block the submitting thread until a slot frees up.
    #[default]
    Wait,
    /// Drop the job and report [`WatchError::PoolSaturated`].
    Reject,
}

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
    policy: SaturationPolicy,
}

impl WorkerPool {
    pub fn new(
        runtime: &Handle,
        workers: usize,
        capacity: usize,
        policy: SaturationPolicy,
    ) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                runtime.spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };
                        // A panicking handler takes down its own task only.
                        if let Err(err) = tokio::spawn(job).await {
                            tracing::error!(worker, error = %err, "file handler panicked");
                        }
                    }
                    tracing::debug!(worker, "worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            capacity,
            policy,
        }
    }

    pub fn policy(&self) -> SaturationPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues `job` according to the saturation policy.
    pub fn submit<F>(&self, job: F) -> Result<(), WatchError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(sender) = self.sender.lock().clone() else {
            return Err(WatchError::PoolClosed);
        };
        let job: Job = Box::pin(job);
        match self.policy {
            SaturationPolicy::Wait => sender
                .blocking_send(job)
                .map_err(|_| WatchError::PoolClosed),
            SaturationPolicy::Reject => sender.try_send(job).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => WatchError::PoolSaturated {
                    capacity: self.capacity,
                },
                mpsc::error::TrySendError::Closed(_) => WatchError::PoolClosed,
            }),
        }
    }

    /// Stops accepting jobs, lets queued jobs finish and waits for the workers.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "worker task failed");
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("open", &self.sender.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn queued_jobs_all_run_before_shutdown_returns() {
        let rt = runtime();
        let pool = WorkerPool::new(rt.handle(), 3, 4, SaturationPolicy::Wait);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let done = Arc::clone(&done);
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        rt.block_on(pool.shutdown());

        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert!(matches!(
            pool.submit(async {}),
            Err(WatchError::PoolClosed)
        ));
    }

    #[test]
    fn reject_policy_refuses_when_full() {
        let rt = runtime();
        let pool = WorkerPool::new(rt.handle(), 1, 1, SaturationPolicy::Reject);
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));

        // Occupies the single worker until released.
        let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
        let gate = Arc::clone(&release_rx);
        pool.submit(async move {
            let _ = started_tx.send(());
            let _ = tokio::task::spawn_blocking(move || gate.lock().recv()).await;
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Fills the queue.
        pool.submit(async {}).unwrap();
        assert!(matches!(
            pool.submit(async {}),
            Err(WatchError::PoolSaturated { capacity: 1 })
        ));

        release_tx.send(()).unwrap();
        rt.block_on(pool.shutdown());
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let rt = runtime();
        let pool = WorkerPool::new(rt.handle(), 1, 4, SaturationPolicy::Wait);
        let done = Arc::new(AtomicUsize::new(0));

        pool.submit(async { panic!("handler bug") }).unwrap();
        let counter = Arc::clone(&done);
        pool.submit(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        rt.block_on(pool.shutdown());

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
