//! Bounded parallel work execution with live progress reporting
//!
//! The work queue runs many independent units of work with a fixed
//! concurrency budget and broadcasts a status snapshot on every slot change
//! so UIs and telemetry can show what is currently executing.
//!
//! Each `parallel_map` call drives its own bounded sub-pool: an outer task
//! that awaits an inner `parallel_map` holds no execution slot the inner map
//! could need, so nested fan-out (lists, then each list's archives) cannot
//! deadlock.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tracing::debug;

/// Status events kept for a slow subscriber before the oldest are dropped
const STATUS_BACKLOG: usize = 256;

/// Errors produced by the queue itself
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("work queue is shutting down")]
    ShuttingDown,
}

/// What one busy worker slot is processing
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub slot: usize,
    pub job: String,
}

/// Snapshot of queue activity, emitted on every slot change.
///
/// Delivered over a broadcast channel: a subscriber that falls behind loses
/// the oldest snapshots instead of blocking workers.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    /// Number of items currently executing
    pub busy: usize,
    /// Per-slot description of in-flight work
    pub workers: Vec<WorkerStatus>,
}

/// Fixed-budget parallel executor with an ordered map primitive.
#[derive(Clone)]
pub struct WorkQueue {
    max_workers: usize,
    shared: Arc<QueueShared>,
}

struct QueueShared {
    busy: AtomicUsize,
    in_flight: AtomicUsize,
    next_slot: AtomicUsize,
    slots: Mutex<BTreeMap<usize, String>>,
    status_tx: broadcast::Sender<QueueStatus>,
    shutting_down: AtomicBool,
    drained: Notify,
}

impl QueueShared {
    fn begin(self: &Arc<Self>, job: String) -> SlotGuard {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().unwrap().insert(slot, job);
        self.busy.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.emit_status();
        SlotGuard {
            shared: Arc::clone(self),
            slot,
        }
    }

    fn finish(&self, slot: usize) {
        self.slots.lock().unwrap().remove(&slot);
        self.busy.fetch_sub(1, Ordering::SeqCst);
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        self.emit_status();
        if remaining == 0 {
            self.drained.notify_waiters();
        }
    }

    fn emit_status(&self) {
        let workers = self
            .slots
            .lock()
            .unwrap()
            .iter()
            .map(|(&slot, job)| WorkerStatus {
                slot,
                job: job.clone(),
            })
            .collect();
        let status = QueueStatus {
            busy: self.busy.load(Ordering::SeqCst),
            workers,
        };
        // No subscribers is fine; lagging subscribers drop the oldest events
        let _ = self.status_tx.send(status);
    }
}

/// Releases the slot even when the item future is dropped mid-flight
struct SlotGuard {
    shared: Arc<QueueShared>,
    slot: usize,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.shared.finish(self.slot);
    }
}

fn host_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl WorkQueue {
    /// Create a queue with the given worker budget; 0 means host-derived.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = if max_workers == 0 {
            host_worker_count()
        } else {
            max_workers
        };
        let (status_tx, _) = broadcast::channel(STATUS_BACKLOG);
        debug!(max_workers, "work queue created");
        Self {
            max_workers,
            shared: Arc::new(QueueShared {
                busy: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                next_slot: AtomicUsize::new(0),
                slots: Mutex::new(BTreeMap::new()),
                status_tx,
                shutting_down: AtomicBool::new(false),
                drained: Notify::new(),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Subscribe to status snapshots. Multiple subscribers are allowed.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Apply `f` to every item with bounded concurrency, preserving order.
    ///
    /// Results are returned in input order regardless of completion order.
    /// The first error aborts the remaining items and is returned as-is;
    /// callers that want partial-failure tolerance should make `f` return a
    /// status value instead of an error. Item starts are refused once
    /// shutdown has begun.
    pub async fn parallel_map<T, R, E, F, Fut>(
        &self,
        label: &str,
        items: Vec<T>,
        f: F,
    ) -> Result<Vec<R>, E>
    where
        T: Send,
        R: Send,
        E: From<QueueError> + Send,
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<R, E>> + Send,
    {
        let total = items.len();
        let shared = &self.shared;
        let f = &f;
        stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| async move {
                if shared.shutting_down.load(Ordering::SeqCst) {
                    return Err(E::from(QueueError::ShuttingDown));
                }
                let _slot = shared.begin(format!("{label} [{}/{}]", index + 1, total));
                f(item).await
            })
            .buffered(self.max_workers)
            .try_collect()
            .await
    }

    /// Stop accepting new work and wait for in-flight items to finish.
    ///
    /// Idempotent; safe to call concurrently or from a scoped-resource
    /// release path at the end of a pass.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        loop {
            let drained = self.shared.drained.notified();
            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            drained.await;
        }
        debug!("work queue drained");
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn results_preserve_input_order() {
        let queue = WorkQueue::new(4);
        // Later items finish first; output must still follow input order
        let items = vec![40u64, 30, 20, 10];
        let results: Vec<u64> = queue
            .parallel_map("stagger", items, |delay| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, QueueError>(delay * 2)
            })
            .await
            .unwrap();
        assert_eq!(results, vec![80, 60, 40, 20]);
    }

    #[tokio::test]
    async fn first_error_aborts_the_map() {
        #[derive(Debug, PartialEq)]
        enum MapError {
            Queue(QueueError),
            Boom(usize),
        }
        impl From<QueueError> for MapError {
            fn from(err: QueueError) -> Self {
                MapError::Queue(err)
            }
        }

        let queue = WorkQueue::new(2);
        let result: Result<Vec<usize>, MapError> = queue
            .parallel_map("failing", (0..16).collect(), |n| async move {
                if n == 3 {
                    Err(MapError::Boom(n))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap_err(), MapError::Boom(3));
    }

    #[tokio::test]
    async fn nested_maps_do_not_deadlock() {
        let queue = WorkQueue::new(2);
        let outer = queue.clone();
        let results: Vec<usize> = queue
            .parallel_map("outer", (0..4).collect(), |n| {
                let inner = outer.clone();
                async move {
                    let inner_sums: Vec<usize> = inner
                        .parallel_map("inner", (0..4).collect(), |m| async move {
                            Ok::<_, QueueError>(m)
                        })
                        .await?;
                    Ok::<_, QueueError>(n * 100 + inner_sums.iter().sum::<usize>())
                }
            })
            .await
            .unwrap();
        assert_eq!(results, vec![6, 106, 206, 306]);
    }

    #[tokio::test]
    async fn status_stream_reports_busy_workers() {
        let queue = WorkQueue::new(2);
        let mut status_rx = queue.subscribe();

        let _: Vec<()> = queue
            .parallel_map("observed", (0..6).collect::<Vec<usize>>(), |_| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, QueueError>(())
            })
            .await
            .unwrap();

        let mut peak = 0;
        let mut last = None;
        while let Ok(status) = status_rx.try_recv() {
            assert!(status.busy <= queue.max_workers());
            assert_eq!(status.busy, status.workers.len());
            peak = peak.max(status.busy);
            last = Some(status);
        }
        assert!(peak >= 1);
        assert_eq!(last.unwrap().busy, 0);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work_and_is_idempotent() {
        let queue = WorkQueue::new(2);
        queue.shutdown().await;
        queue.shutdown().await;

        let result: Result<Vec<usize>, QueueError> = queue
            .parallel_map("late", vec![1, 2, 3], |n| async move { Ok(n) })
            .await;
        assert_eq!(result.unwrap_err(), QueueError::ShuttingDown);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_work() {
        let queue = WorkQueue::new(2);
        let worker = queue.clone();
        let map = tokio::spawn(async move {
            worker
                .parallel_map("slow", vec![1u64, 2], |n| async move {
                    tokio::time::sleep(Duration::from_millis(20 * n)).await;
                    Ok::<_, QueueError>(n)
                })
                .await
        });
        // Give the map a moment to start before asking for shutdown
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.shutdown().await;
        assert_eq!(queue.shared.in_flight.load(Ordering::SeqCst), 0);
        let results = map.await.unwrap().unwrap();
        assert_eq!(results, vec![1, 2]);
    }
}
