//! Background revalidation worker pool.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
struct RevalidatorInner {
    workers: Arc<Semaphore>,
    in_flight: DashMap<String, JoinHandle<()>>,
}

/// Bounded pool of background revalidation tasks.
///
/// At most one task runs per fingerprint; duplicate schedules while a
/// revalidation is in flight are dropped. `shutdown` aborts everything
/// still running.
#[derive(Debug, Clone)]
pub struct AsyncRevalidator {
    inner: Arc<RevalidatorInner>,
}

impl AsyncRevalidator {
    /// Creates a pool running at most `max_workers` revalidations at once.
    pub fn new(max_workers: usize) -> Self {
        AsyncRevalidator {
            inner: Arc::new(RevalidatorInner {
                workers: Arc::new(Semaphore::new(max_workers.max(1))),
                in_flight: DashMap::new(),
            }),
        }
    }

    /// Schedules `task` for the entry identified by `key`.
    ///
    /// Returns `false` when a revalidation for the same key is already in
    /// flight and the task was dropped.
    pub fn schedule<F>(&self, key: String, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.in_flight.contains_key(&key) {
            debug!(%key, "Revalidation already in flight");
            return false;
        }

        let inner = self.inner.clone();
        let workers = self.inner.workers.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            // Closed only at shutdown, at which point the task is aborted
            // anyway.
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            task.await;
            inner.in_flight.remove(&task_key);
        });
        self.inner.in_flight.insert(key, handle);
        true
    }

    /// Number of revalidations scheduled or running.
    pub fn in_flight_count(&self) -> usize {
        self.inner
            .in_flight
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Waits until every scheduled revalidation has finished.
    pub async fn drain(&self) {
        loop {
            self.inner
                .in_flight
                .retain(|_, handle| !handle.is_finished());
            if self.inner.in_flight.is_empty() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Aborts every in-flight revalidation.
    pub fn shutdown(&self) {
        self.inner.workers.close();
        for entry in self.inner.in_flight.iter() {
            entry.value().abort();
        }
        self.inner.in_flight.clear();
    }
}

impl Default for AsyncRevalidator {
    fn default() -> Self {
        AsyncRevalidator::new(1)
    }
}
