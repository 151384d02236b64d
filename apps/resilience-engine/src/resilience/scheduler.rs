//! Priority request scheduler on top of the rate limiter.
//!
//! Each API gets its own queue and a dedicated worker task, started on the
//! first submission. The worker pops the highest-priority request (FIFO
//! among equal priorities) and waits for rate-limit capacity. Once capacity
//! is granted, a higher-priority request that arrived during the wait takes
//! the slot instead. The chosen request runs and its outcome is recorded. A failed request is re-queued until it has been
//! executed `max_attempts` times, then dropped and reported.
//!
//! ```text
//! submit() ──mpsc──► worker(api) ──► BinaryHeap<(priority, seq)>
//!                        │
//!                        ├── RateLimiter::acquire(api)
//!                        ├── run operation
//!                        └── watch::Sender<QueueStatus>, oneshot outcome
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::rate_limiter::RateLimiter;
use crate::error::{CallResult, ResilienceError};
use crate::observability;

/// Re-invocable request body.
pub type ScheduledOperation = Arc<dyn Fn() -> BoxFuture<'static, CallResult<Value>> + Send + Sync>;

/// Scheduler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Executions before a failing request is dropped (default: 3).
    pub max_attempts: u32,
    /// Pending requests included in a status snapshot (default: 10).
    pub status_preview: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            status_preview: 10,
        }
    }
}

/// Final outcome of a scheduled request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// The request succeeded.
    Completed {
        /// Returned value.
        value: Value,
        /// Executions including the successful one.
        attempts: u32,
    },
    /// The request failed on its last allowed attempt.
    Dropped {
        /// Last failure.
        error: ResilienceError,
        /// Executions made.
        attempts: u32,
    },
    /// The scheduler shut down before the request completed.
    Cancelled,
}

/// Handle returned by [`RequestScheduler::submit`].
#[derive(Debug)]
pub struct RequestHandle {
    /// Request identifier.
    pub id: String,
    outcome: oneshot::Receiver<RequestOutcome>,
}

impl RequestHandle {
    /// Wait for the final outcome.
    pub async fn outcome(self) -> RequestOutcome {
        self.outcome.await.unwrap_or(RequestOutcome::Cancelled)
    }
}

/// Pending request as shown in a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Request identifier.
    pub id: String,
    /// Operation name.
    pub operation: String,
    /// Priority (higher runs first).
    pub priority: i32,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Executions so far.
    pub attempts: u32,
}

/// Snapshot of one API queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// API name.
    pub api_name: String,
    /// Requests waiting, excluding the one being processed.
    pub queue_length: usize,
    /// Whether a request is currently being processed.
    pub processing: bool,
    /// Head of the queue in execution order.
    pub pending: Vec<PendingRequest>,
}

/// A queued request.
struct ScheduledRequest {
    id: String,
    operation: String,
    priority: i32,
    created_at: DateTime<Utc>,
    attempts: u32,
    max_attempts: u32,
    run: ScheduledOperation,
    reply: oneshot::Sender<RequestOutcome>,
}

/// Heap entry: higher priority first, then lower sequence number.
struct QueueEntry {
    priority: i32,
    seq: Reverse<u64>,
    request: ScheduledRequest,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct Worker {
    submit: mpsc::UnboundedSender<ScheduledRequest>,
    status: watch::Receiver<QueueStatus>,
}

/// Per-API priority scheduler.
pub struct RequestScheduler {
    limiter: Arc<RateLimiter>,
    config: SchedulerConfig,
    workers: Mutex<HashMap<String, Worker>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("config", &self.config)
            .field("apis", &self.workers.lock().keys().cloned().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RequestScheduler {
    /// Create a scheduler that stops when `shutdown` is cancelled.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, config: SchedulerConfig, shutdown: CancellationToken) -> Self {
        Self {
            limiter,
            config,
            workers: Mutex::new(HashMap::new()),
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Queue `op` for `api` with `priority` (higher runs first).
    ///
    /// Must be called within a tokio runtime. After shutdown the request is
    /// answered with [`RequestOutcome::Cancelled`].
    pub fn submit<F, Fut>(&self, api: &str, operation: &str, priority: i32, op: F) -> RequestHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<Value>> + Send + 'static,
    {
        let run: ScheduledOperation = Arc::new(move || Box::pin(op()));
        let (reply, outcome) = oneshot::channel();
        let id = format!("{api}_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

        let request = ScheduledRequest {
            id: id.clone(),
            operation: operation.to_string(),
            priority,
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: self.config.max_attempts,
            run,
            reply,
        };

        if self.shutdown.is_cancelled() {
            let _ = request.reply.send(RequestOutcome::Cancelled);
            return RequestHandle { id, outcome };
        }

        let mut workers = self.workers.lock();
        let worker = workers
            .entry(api.to_string())
            .or_insert_with(|| self.spawn_worker(api));
        if let Err(mpsc::error::SendError(request)) = worker.submit.send(request) {
            let _ = request.reply.send(RequestOutcome::Cancelled);
        }
        drop(workers);

        tracing::info!(api = api, id = %id, operation = operation, priority = priority, "Request scheduled");
        RequestHandle { id, outcome }
    }

    fn spawn_worker(&self, api: &str) -> Worker {
        let (submit, inbox) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(QueueStatus {
            api_name: api.to_string(),
            ..QueueStatus::default()
        });

        let worker = QueueWorker {
            api: api.to_string(),
            limiter: Arc::clone(&self.limiter),
            preview: self.config.status_preview,
            inbox,
            heap: BinaryHeap::new(),
            next_seq: 0,
            status: status_tx,
            shutdown: self.shutdown.clone(),
        };
        self.tracker.spawn(worker.run());
        tracing::debug!(api = api, "Scheduler worker started");

        Worker { submit, status }
    }

    /// Current status of the queue for `api`.
    #[must_use]
    pub fn queue_status(&self, api: &str) -> QueueStatus {
        self.workers.lock().get(api).map_or_else(
            || QueueStatus {
                api_name: api.to_string(),
                ..QueueStatus::default()
            },
            |worker| worker.status.borrow().clone(),
        )
    }

    /// Subscribe to status updates for `api`, if its worker exists.
    #[must_use]
    pub fn watch_status(&self, api: &str) -> Option<watch::Receiver<QueueStatus>> {
        self.workers.lock().get(api).map(|worker| worker.status.clone())
    }

    /// Stop all workers and wait for them to exit.
    ///
    /// Requests still queued are answered with [`RequestOutcome::Cancelled`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Request scheduler stopped");
    }
}

/// Worker state owned by the per-API task.
struct QueueWorker {
    api: String,
    limiter: Arc<RateLimiter>,
    preview: usize,
    inbox: mpsc::UnboundedReceiver<ScheduledRequest>,
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    status: watch::Sender<QueueStatus>,
    shutdown: CancellationToken,
}

impl QueueWorker {
    async fn run(mut self) {
        loop {
            self.drain_inbox();

            let Some(entry) = self.heap.pop() else {
                self.publish(false);
                tokio::select! {
                    () = self.shutdown.cancelled() => break,
                    received = self.inbox.recv() => match received {
                        Some(request) => self.enqueue(request),
                        None => break,
                    },
                }
                continue;
            };

            self.publish(true);

            let acquired = tokio::select! {
                () = self.shutdown.cancelled() => false,
                _ = self.limiter.acquire(&self.api) => true,
            };
            if !acquired {
                self.heap.push(entry);
                break;
            }

            // Requests that arrived during the wait compete for this slot
            self.drain_inbox();
            let waited_id = entry.request.id.clone();
            self.heap.push(entry);
            let Some(next) = self.heap.pop() else {
                continue;
            };
            if next.request.id != waited_id {
                tracing::debug!(api = %self.api, id = %next.request.id, preempted = %waited_id, "Higher priority request takes the slot");
                self.publish(true);
            }

            self.execute(next.request).await;
        }

        self.cancel_remaining();
        tracing::debug!(api = %self.api, "Scheduler worker stopped");
    }

    async fn execute(&mut self, mut request: ScheduledRequest) {
        request.attempts += 1;
        let result = (request.run)().await;
        self.limiter.record_outcome(&self.api, result.is_ok());

        match result {
            Ok(value) => {
                tracing::debug!(api = %self.api, id = %request.id, attempts = request.attempts, "Request completed");
                let _ = request.reply.send(RequestOutcome::Completed {
                    value,
                    attempts: request.attempts,
                });
            }
            Err(error) if request.attempts >= request.max_attempts => {
                tracing::error!(
                    api = %self.api,
                    id = %request.id,
                    attempts = request.attempts,
                    error = %error,
                    "Request dropped after final attempt"
                );
                observability::record_scheduler_drop(&self.api);
                let _ = request.reply.send(RequestOutcome::Dropped {
                    error,
                    attempts: request.attempts,
                });
            }
            Err(error) => {
                tracing::warn!(
                    api = %self.api,
                    id = %request.id,
                    attempts = request.attempts,
                    max_attempts = request.max_attempts,
                    error = %error,
                    "Request failed, re-queued"
                );
                self.enqueue(request);
            }
        }
    }

    fn drain_inbox(&mut self) {
        while let Ok(request) = self.inbox.try_recv() {
            self.enqueue(request);
        }
    }

    fn enqueue(&mut self, request: ScheduledRequest) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            priority: request.priority,
            seq: Reverse(seq),
            request,
        });
    }

    fn publish(&self, processing: bool) {
        let mut ordered: Vec<&QueueEntry> = self.heap.iter().collect();
        ordered.sort_by(|a, b| b.cmp(a));
        let pending = ordered
            .iter()
            .take(self.preview)
            .map(|entry| PendingRequest {
                id: entry.request.id.clone(),
                operation: entry.request.operation.clone(),
                priority: entry.request.priority,
                created_at: entry.request.created_at,
                attempts: entry.request.attempts,
            })
            .collect();

        observability::update_scheduler_queue(&self.api, self.heap.len());
        self.status.send_replace(QueueStatus {
            api_name: self.api.clone(),
            queue_length: self.heap.len(),
            processing,
            pending,
        });
    }

    fn cancel_remaining(&mut self) {
        self.inbox.close();
        self.drain_inbox();
        let cancelled = self.heap.len();
        for entry in self.heap.drain() {
            let _ = entry.request.reply.send(RequestOutcome::Cancelled);
        }
        if cancelled > 0 {
            tracing::info!(api = %self.api, cancelled = cancelled, "Queued requests cancelled");
        }
        self.publish(false);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::resilience::WindowLimits;

    fn scheduler(per_minute: u32) -> (RequestScheduler, Arc<RateLimiter>) {
        let limiter = Arc::new(RateLimiter::new());
        limiter.set_limits("api", WindowLimits::new(per_minute, 1000, 10_000));
        let scheduler = RequestScheduler::new(
            Arc::clone(&limiter),
            SchedulerConfig::default(),
            CancellationToken::new(),
        );
        (scheduler, limiter)
    }

    #[tokio::test]
    async fn test_completes_request() {
        let (scheduler, limiter) = scheduler(60);
        let handle = scheduler.submit("api", "ping", 1, || async { Ok(json!("pong")) });
        assert_eq!(
            handle.outcome().await,
            RequestOutcome::Completed {
                value: json!("pong"),
                attempts: 1
            }
        );
        assert_eq!(limiter.get_api_stats("api").total_requests, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropped_after_max_attempts() {
        let (scheduler, _) = scheduler(60);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let handle = scheduler.submit("api", "always_fails", 1, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Err(ResilienceError::api("down"))
            }
        });

        let outcome = handle.outcome().await;
        assert!(matches!(outcome, RequestOutcome::Dropped { attempts: 3, .. }));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (scheduler, _) = scheduler(60);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let handle = scheduler.submit("api", "flaky", 1, move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                    Err(ResilienceError::api("blip"))
                } else {
                    Ok(json!(1))
                }
            }
        });

        assert!(matches!(
            handle.outcome().await,
            RequestOutcome::Completed { attempts: 2, .. }
        ));
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_with_fifo_ties() {
        // One slot per minute so every request after the first queues up
        let (scheduler, _) = scheduler(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (name, priority) in [("first", 1), ("low", 0), ("high_a", 5), ("high_b", 5), ("mid", 3)] {
            let order = Arc::clone(&order);
            handles.push(scheduler.submit("api", name, priority, move || {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push(name);
                    Ok(Value::Null)
                }
            }));
        }
        for handle in handles {
            assert!(matches!(handle.outcome().await, RequestOutcome::Completed { .. }));
        }

        // The first request may start before the rest are queued
        let order = order.lock().clone();
        let rest: Vec<_> = order.iter().filter(|n| **n != "first").copied().collect();
        assert_eq!(rest, vec!["high_a", "high_b", "mid", "low"]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_high_priority_takes_waiting_slot() {
        let (scheduler, limiter) = scheduler(1);
        assert!(limiter.try_acquire("api").allowed);
        let order = Arc::new(Mutex::new(Vec::new()));

        let submit = |name: &'static str, priority: i32| {
            let order = Arc::clone(&order);
            scheduler.submit("api", name, priority, move || {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push(name);
                    Ok(Value::Null)
                }
            })
        };

        let low = submit("low", 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scheduler.queue_status("api").processing);
        let high = submit("high", 5);

        assert!(matches!(high.outcome().await, RequestOutcome::Completed { .. }));
        assert!(matches!(low.outcome().await, RequestOutcome::Completed { .. }));
        assert_eq!(*order.lock(), vec!["high", "low"]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_queued() {
        let (scheduler, limiter) = scheduler(1);
        // Exhaust the minute window so the worker blocks on capacity
        assert!(limiter.try_acquire("api").allowed);

        let first = scheduler.submit("api", "blocked", 1, || async { Ok(Value::Null) });
        let second = scheduler.submit("api", "queued", 1, || async { Ok(Value::Null) });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = scheduler.queue_status("api");
        assert!(status.processing);
        assert_eq!(status.queue_length, 1);
        assert_eq!(status.pending[0].operation, "queued");

        scheduler.shutdown().await;
        assert_eq!(first.outcome().await, RequestOutcome::Cancelled);
        assert_eq!(second.outcome().await, RequestOutcome::Cancelled);

        let late = scheduler.submit("api", "late", 1, || async { Ok(Value::Null) });
        assert_eq!(late.outcome().await, RequestOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_api_status_is_empty() {
        let (scheduler, _) = scheduler(60);
        let status = scheduler.queue_status("nothing");
        assert_eq!(status.api_name, "nothing");
        assert_eq!(status.queue_length, 0);
        assert!(!status.processing);
        assert!(scheduler.watch_status("nothing").is_none());
    }
}
