//! Admission control for pipeline executions
//!
//! At most `max_concurrent` requests run at once. Up to `max_queue_depth`
//! more wait for a slot; beyond that a request is rejected immediately with
//! [`RagError::QueueFull`] and a retry-after hint.

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::AdmissionConfig;
use crate::errors::RagError;
use crate::errors::Result;
use crate::models::round_to;

const SLOW_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct AdmissionState {
    waiting: AtomicUsize,
    in_flight: AtomicUsize,
    total_queued: AtomicU64,
    total_processed: AtomicU64,
    total_rejected: AtomicU64,
    max_depth_seen: AtomicUsize,
    total_wait_us: AtomicU64,
}

/// Point-in-time admission counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueMetrics {
    pub capacity: usize,
    pub in_flight: usize,
    pub available_slots: usize,
    pub waiting: usize,
    pub max_queue_depth: usize,
    pub total_queued: u64,
    pub total_processed: u64,
    pub total_rejected: u64,
    pub max_depth_seen: usize,
    pub avg_wait_ms: f64,
    pub retry_after_secs: u64,
}

/// Removes a waiter from the count however its wait ends
struct WaitingGuard(Arc<AdmissionState>);

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A held execution slot. Dropping it frees the slot and counts the request
/// as processed.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    state: Arc<AdmissionState>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.total_processed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionControl {
    semaphore: Arc<Semaphore>,
    state: Arc<AdmissionState>,
    capacity: usize,
    max_queue_depth: usize,
    retry_after_secs: u64,
}

impl AdmissionControl {
    pub fn new(capacity: usize, max_queue_depth: usize, retry_after_secs: u64) -> Self {
        let capacity = capacity.max(1);
        info!(
            "Admission control: {} concurrent, {} queued, retry after {}s",
            capacity, max_queue_depth, retry_after_secs
        );
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            state: Arc::new(AdmissionState::default()),
            capacity,
            max_queue_depth,
            retry_after_secs,
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(
            config.max_concurrent,
            config.max_queue_depth,
            config.retry_after_secs,
        )
    }

    fn admitted(&self, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        AdmissionPermit {
            _permit: permit,
            state: Arc::clone(&self.state),
        }
    }

    /// Wait for an execution slot.
    ///
    /// # Errors
    /// - `QueueFull` when `max_queue_depth` requests are already waiting
    pub async fn acquire(&self) -> Result<AdmissionPermit> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            self.state.total_queued.fetch_add(1, Ordering::Relaxed);
            return Ok(self.admitted(permit));
        }

        let max_depth = self.max_queue_depth;
        let depth = match self
            .state
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| {
                (waiting < max_depth).then_some(waiting + 1)
            }) {
            Ok(previous) => previous + 1,
            Err(current) => {
                self.state.total_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Queue full: {} waiting (max {}), rejecting request",
                    current, max_depth
                );
                return Err(RagError::QueueFull {
                    depth: current,
                    max_depth,
                    retry_after_secs: self.retry_after_secs,
                });
            }
        };

        let waiting = WaitingGuard(Arc::clone(&self.state));
        self.state.total_queued.fetch_add(1, Ordering::Relaxed);
        self.state.max_depth_seen.fetch_max(depth, Ordering::Relaxed);
        debug!("Request queued at depth {}", depth);

        let started = Instant::now();
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| RagError::Custom("admission semaphore closed".to_string()))?;
        drop(waiting);

        let waited = started.elapsed();
        let waited_us = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.state.total_wait_us.fetch_add(waited_us, Ordering::Relaxed);
        if waited > SLOW_WAIT {
            info!("Request admitted after waiting {:?}", waited);
        }

        Ok(self.admitted(permit))
    }

    /// Run `task` inside an execution slot
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.acquire().await?;
        task.await
    }

    pub fn metrics(&self) -> QueueMetrics {
        let state = &self.state;
        let total_queued = state.total_queued.load(Ordering::Relaxed);
        let total_wait_us = state.total_wait_us.load(Ordering::Relaxed);

        QueueMetrics {
            capacity: self.capacity,
            in_flight: state.in_flight.load(Ordering::SeqCst),
            available_slots: self.semaphore.available_permits(),
            waiting: state.waiting.load(Ordering::SeqCst),
            max_queue_depth: self.max_queue_depth,
            total_queued,
            total_processed: state.total_processed.load(Ordering::Relaxed),
            total_rejected: state.total_rejected.load(Ordering::Relaxed),
            max_depth_seen: state.max_depth_seen.load(Ordering::Relaxed),
            avg_wait_ms: if total_queued == 0 {
                0.0
            } else {
                round_to(total_wait_us as f64 / total_queued as f64 / 1000.0, 2)
            },
            retry_after_secs: self.retry_after_secs,
        }
    }

    /// Zero the cumulative counters; live in-flight and waiting counts stay.
    pub fn reset_metrics(&self) {
        let state = &self.state;
        state.total_queued.store(0, Ordering::Relaxed);
        state.total_processed.store(0, Ordering::Relaxed);
        state.total_rejected.store(0, Ordering::Relaxed);
        state.max_depth_seen.store(0, Ordering::Relaxed);
        state.total_wait_us.store(0, Ordering::Relaxed);
        info!("Admission metrics reset");
    }
}
