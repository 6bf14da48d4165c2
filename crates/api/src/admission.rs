//! Bounded admission queue between the webhook route and update processing.
//!
//! The HTTP route must fast-ack within a sub-second budget no matter what,
//! so `enqueue` is synchronous and never suspends: it pushes under a plain
//! mutex and wakes a worker. Backpressure policy is drop-oldest, exactly
//! one policy, applied in exactly one place -- when the queue is full the
//! oldest pending update is discarded and counted, and the new one is
//! admitted.
//!
//! A fixed pool of workers drains the queue. Before dispatching, a worker
//! must win the cross-instance `processed_events` claim; dedup-store
//! failures are handled fail-closed (drop, log, flag degraded). A handler
//! error is caught and logged with the update id as correlation id and
//! never kills the worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use atelier_db::repositories::ProcessedEventRepo;
use atelier_db::DbPool;

use crate::handler::UpdateHandler;

/// Queue capacity. Beyond this, drop-oldest applies.
pub const QUEUE_CAPACITY: usize = 100;

/// Number of dequeue workers.
pub const WORKER_COUNT: usize = 4;

/// An inbound messaging-platform update, as received by the webhook.
#[derive(Debug, Clone)]
pub struct InboundUpdate {
    /// The platform's per-bot monotonic update id; the dedup key.
    pub update_id: i64,
    /// The raw update payload.
    pub payload: serde_json::Value,
}

/// Monotonic counters for health inspection.
#[derive(Default)]
struct Counters {
    received: AtomicU64,
    processed: AtomicU64,
    deduped: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    /// Set while the dedup store is erroring; cleared by the next
    /// successful claim.
    degraded: AtomicBool,
}

/// Point-in-time snapshot of the counters, serialized into /health and the
/// webhook diagnostic payload.
#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    pub received: u64,
    pub processed: u64,
    pub deduped: u64,
    pub dropped: u64,
    pub failed: u64,
    pub depth: usize,
    pub dedup_degraded: bool,
}

/// The bounded queue plus its workers' shared state.
pub struct AdmissionQueue {
    queue: Mutex<VecDeque<InboundUpdate>>,
    notify: Notify,
    capacity: usize,
    counters: Counters,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            counters: Counters::default(),
        })
    }

    /// Admit an update. Never suspends, never fails: on a full queue the
    /// oldest pending update is dropped to make room.
    pub fn enqueue(&self, update: InboundUpdate) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let mut queue = self.queue.lock().expect("admission queue poisoned");
        if queue.len() >= self.capacity {
            if let Some(evicted) = queue.pop_front() {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    update_id = evicted.update_id,
                    depth = queue.len(),
                    "Admission queue full, dropped oldest update"
                );
            }
        }
        queue.push_back(update);
        drop(queue);

        self.notify.notify_one();
    }

    fn pop(&self) -> Option<InboundUpdate> {
        self.queue.lock().expect("admission queue poisoned").pop_front()
    }

    /// Snapshot of the counters and current depth.
    pub fn counters(&self) -> CountersSnapshot {
        CountersSnapshot {
            received: self.counters.received.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            deduped: self.counters.deduped.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            depth: self.queue.lock().expect("admission queue poisoned").len(),
            dedup_degraded: self.counters.degraded.load(Ordering::Relaxed),
        }
    }

    /// Spawn the fixed worker pool. Workers run until `cancel` fires.
    pub fn spawn_workers(
        self: &Arc<Self>,
        pool: DbPool,
        handler: Arc<dyn UpdateHandler>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..WORKER_COUNT)
            .map(|worker_id| {
                let queue = Arc::clone(self);
                let pool = pool.clone();
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    queue.worker_loop(worker_id, pool, handler, cancel).await;
                })
            })
            .collect()
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        pool: DbPool,
        handler: Arc<dyn UpdateHandler>,
        cancel: CancellationToken,
    ) {
        tracing::debug!(worker_id, "Admission worker started");
        loop {
            while let Some(update) = self.pop() {
                if cancel.is_cancelled() {
                    tracing::debug!(worker_id, "Admission worker stopping");
                    return;
                }
                self.process(&pool, handler.as_ref(), update).await;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(worker_id, "Admission worker stopping");
                    return;
                }
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Claim and dispatch one update. All failure modes are absorbed here:
    /// the worker itself must survive anything a handler throws at it.
    async fn process(&self, pool: &DbPool, handler: &dyn UpdateHandler, update: InboundUpdate) {
        match ProcessedEventRepo::try_claim(pool, update.update_id).await {
            Ok(true) => {
                self.counters.degraded.store(false, Ordering::Relaxed);
            }
            Ok(false) => {
                // Another worker or instance already owns this update.
                self.counters.degraded.store(false, Ordering::Relaxed);
                self.counters.deduped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(update_id = update.update_id, "Update already claimed elsewhere");
                return;
            }
            Err(e) => {
                // Fail-closed: without the at-most-once guarantee this
                // update is not processed at all.
                self.counters.degraded.store(true, Ordering::Relaxed);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    update_id = update.update_id,
                    error = %e,
                    "Dedup store unavailable, dropping update (fail-closed)"
                );
                return;
            }
        }

        match handler.handle(&update).await {
            Ok(()) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    update_id = update.update_id,
                    error = %e,
                    "Update handler failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(id: i64) -> InboundUpdate {
        InboundUpdate {
            update_id: id,
            payload: json!({"update_id": id}),
        }
    }

    #[test]
    fn enqueue_preserves_fifo_order() {
        let queue = AdmissionQueue::new(10);
        queue.enqueue(update(1));
        queue.enqueue(update(2));
        queue.enqueue(update(3));

        assert_eq!(queue.pop().unwrap().update_id, 1);
        assert_eq!(queue.pop().unwrap().update_id, 2);
        assert_eq!(queue.pop().unwrap().update_id, 3);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn full_queue_drops_the_oldest_update() {
        let queue = AdmissionQueue::new(3);
        for id in 1..=5 {
            queue.enqueue(update(id));
        }

        // 1 and 2 were evicted; 3, 4, 5 remain in order.
        assert_eq!(queue.pop().unwrap().update_id, 3);
        assert_eq!(queue.pop().unwrap().update_id, 4);
        assert_eq!(queue.pop().unwrap().update_id, 5);
        assert!(queue.pop().is_none());

        let counters = queue.counters();
        assert_eq!(counters.received, 5);
        assert_eq!(counters.dropped, 2);
        assert_eq!(counters.depth, 0);
    }

    #[test]
    fn counters_snapshot_tracks_depth() {
        let queue = AdmissionQueue::new(10);
        queue.enqueue(update(1));
        queue.enqueue(update(2));

        let counters = queue.counters();
        assert_eq!(counters.received, 2);
        assert_eq!(counters.depth, 2);
        assert_eq!(counters.processed, 0);
        assert!(!counters.dedup_degraded);
    }
}
