//! Bounded pool of infer-request handles.
//!
//! A fixed set of `nireq` handles sits behind a semaphore. Acquisition blocks
//! until a slot frees or the deadline passes; release happens in the guard's
//! `Drop` so every exit path returns the slot.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::metrics::ModelMetricReporter;
use crate::runtime::{InferRequest, ModelRuntime};
use crate::status::StatusCode;

pub struct InferRequestPool {
    slots: Arc<Mutex<VecDeque<InferRequest>>>,
    semaphore: Arc<Semaphore>,
    nireq: usize,
}

impl InferRequestPool {
    pub fn new(runtime: &dyn ModelRuntime, nireq: usize) -> Self {
        let slots = (0..nireq)
            .map(|id| runtime.create_infer_request(id))
            .collect();
        InferRequestPool {
            slots: Arc::new(Mutex::new(slots)),
            semaphore: Arc::new(Semaphore::new(nireq)),
            nireq,
        }
    }

    pub fn capacity(&self) -> usize {
        self.nireq
    }

    /// Currently unoccupied slots; sampled for diagnostics.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquires a handle, waiting up to `timeout` when one is given. The
    /// returned guard owns the slot exclusively until dropped.
    pub async fn acquire(
        &self,
        timeout: Option<Duration>,
        reporter: Arc<ModelMetricReporter>,
    ) -> Result<InferRequestGuard, StatusCode> {
        let acquired = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.semaphore.clone().acquire_owned())
                .await
                .map_err(|_| {
                    warn!(limit_ms = limit.as_millis() as u64, "infer request acquisition timed out");
                    StatusCode::DeadlineExceeded
                })?,
            None => self.semaphore.clone().acquire_owned().await,
        };
        let permit = acquired.map_err(|_| StatusCode::Internal)?;
        let infer_request = self
            .slots
            .lock()
            .map_err(|_| StatusCode::Internal)?
            .pop_front()
            .ok_or(StatusCode::Internal)?;
        reporter.inc_infer_req_active();
        Ok(InferRequestGuard {
            infer_request: Some(infer_request),
            slots: Arc::clone(&self.slots),
            reporter,
            _permit: permit,
        })
    }
}

/// Exclusive ownership of one pooled handle. Move-only; the destructor puts
/// the handle back and frees the semaphore slot.
pub struct InferRequestGuard {
    infer_request: Option<InferRequest>,
    slots: Arc<Mutex<VecDeque<InferRequest>>>,
    reporter: Arc<ModelMetricReporter>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for InferRequestGuard {
    type Target = InferRequest;

    fn deref(&self) -> &InferRequest {
        self.infer_request
            .as_ref()
            .expect("guard holds its handle until drop")
    }
}

impl DerefMut for InferRequestGuard {
    fn deref_mut(&mut self) -> &mut InferRequest {
        self.infer_request
            .as_mut()
            .expect("guard holds its handle until drop")
    }
}

impl Drop for InferRequestGuard {
    fn drop(&mut self) {
        if let Some(infer_request) = self.infer_request.take() {
            if let Ok(mut slots) = self.slots.lock() {
                slots.push_back(infer_request);
            }
            self.reporter.dec_infer_req_active();
        }
        // The permit is released after the slot is back in the queue.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRegistry;
    use crate::runtime::accumulator::AccumulatorRuntime;

    fn pool_and_reporter(nireq: usize) -> (InferRequestPool, Arc<ModelMetricReporter>) {
        let runtime = AccumulatorRuntime::new(4, 1);
        let registry = MetricRegistry::disabled();
        let reporter = ModelMetricReporter::new(&registry, "pool-test", 1);
        (InferRequestPool::new(&runtime, nireq), reporter)
    }

    #[tokio::test]
    async fn acquired_handles_are_distinct() {
        let (pool, reporter) = pool_and_reporter(2);
        let first = pool.acquire(None, Arc::clone(&reporter)).await.expect("slot");
        let second = pool.acquire(None, Arc::clone(&reporter)).await.expect("slot");
        assert_ne!(first.id(), second.id());
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn dropping_the_guard_frees_the_slot() {
        let (pool, reporter) = pool_and_reporter(1);
        let guard = pool.acquire(None, Arc::clone(&reporter)).await.expect("slot");
        assert_eq!(pool.available(), 0);
        drop(guard);
        assert_eq!(pool.available(), 1);
        let _again = pool.acquire(None, reporter).await.expect("slot reusable");
    }

    #[tokio::test]
    async fn exhausted_pool_times_out_with_deadline_exceeded() {
        let (pool, reporter) = pool_and_reporter(1);
        let _held = pool.acquire(None, Arc::clone(&reporter)).await.expect("slot");
        let result = pool
            .acquire(Some(Duration::from_millis(20)), reporter)
            .await;
        assert!(matches!(result, Err(StatusCode::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn waiter_proceeds_once_a_slot_frees() {
        let (pool, reporter) = pool_and_reporter(1);
        let pool = Arc::new(pool);
        let held = pool.acquire(None, Arc::clone(&reporter)).await.expect("slot");

        let waiter = {
            let pool = Arc::clone(&pool);
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move {
                pool.acquire(Some(Duration::from_secs(1)), reporter).await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);
        let acquired = waiter.await.expect("join");
        assert!(acquired.is_ok());
    }
}
