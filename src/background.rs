//! Bounded background work queue.
//!
//! Jobs are blocking closures run on tokio's blocking pool. Every submitted job is
//! spawned immediately and waits for one of `capacity` semaphore permits, so a
//! burst queues up instead of being lost. Without a tokio runtime the job runs
//! inline on the caller's thread.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    inline: AtomicU64,
}

impl Counters {
    fn record(&self, name: &'static str, result: Result<()>) {
        match result {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = name, error = %e, "background job failed");
            }
        }
    }
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    /// Jobs holding a permit right now.
    pub in_flight: usize,
    /// Spawned jobs not yet finished, waiting or running.
    pub pending: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Jobs run on the caller's thread for lack of a runtime.
    pub inline: u64,
}

#[derive(Debug, Clone)]
pub struct BackgroundQueue {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    counters: Arc<Counters>,
}

impl BackgroundQueue {
    pub fn new(max_concurrency: usize) -> Self {
        let capacity = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Run `job` in the background. Returns `false` if it ran inline instead.
    pub fn submit<F>(&self, name: &'static str, job: F) -> bool
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(job = name, "no tokio runtime, running job inline");
            self.counters.inline.fetch_add(1, Ordering::Relaxed);
            self.counters.record(name, job());
            return false;
        };

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::SeqCst);
        let semaphore = Arc::clone(&self.semaphore);
        let pending = Arc::clone(&self.pending);
        let idle = Arc::clone(&self.idle);
        let counters = Arc::clone(&self.counters);

        handle.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(permit) => tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    job()
                })
                .await
                .unwrap_or_else(|e| Err(anyhow!("background job panicked: {e}"))),
                Err(e) => Err(anyhow!("background queue closed: {e}")),
            };
            counters.record(name, result);
            if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                idle.notify_waiters();
            }
        });
        true
    }

    /// Wait until every job submitted so far, including queued ones, has finished.
    pub async fn flush(&self) -> Result<()> {
        loop {
            let idle = self.idle.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            idle.await;
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            in_flight: self.capacity - self.semaphore.available_permits(),
            pending: self.pending.load(Ordering::SeqCst),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            inline: self.counters.inline.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_runs_inline_without_runtime() {
        let queue = BackgroundQueue::new(2);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        assert!(!queue.submit("inline", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));
        assert!(ran.load(Ordering::SeqCst));

        let stats = queue.stats();
        assert_eq!(stats.inline, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_jobs_complete_and_failures_counted() {
        let queue = BackgroundQueue::new(4);
        assert!(queue.submit("ok", || Ok(())));
        assert!(queue.submit("fails", || anyhow::bail!("boom")));
        queue.flush().await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_waits_for_a_permit() {
        let queue = BackgroundQueue::new(1);
        let (release, wait) = mpsc::channel::<()>();
        assert!(queue.submit("blocker", move || {
            let _ = wait.recv();
            Ok(())
        }));
        assert!(queue.submit("extra", || Ok(())));
        assert_eq!(queue.stats().pending, 2);

        release.send(()).unwrap();
        queue.flush().await.unwrap();
        let stats = queue.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_is_bounded() {
        let queue = BackgroundQueue::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            queue.submit("slow", move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        queue.flush().await.unwrap();

        assert_eq!(queue.stats().completed, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flush_on_idle_queue_returns() {
        BackgroundQueue::new(1).flush().await.unwrap();
    }
}
