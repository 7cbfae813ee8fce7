//! In-process scheduled job queue: "run X at time T".
//!
//! Jobs are volatile. Each job type gets its own bounded channel, so a type
//! nobody is processing can fill up without blocking any other type. Due jobs
//! are enqueued immediately with a non-blocking send (a full channel is
//! reported to the caller); future jobs arm a timer task tracked by job id.
//! Handlers run once; failures are logged and never retried.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use chrono::Utc;
use scoreline_core::Job;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("invalid job: {0}")]
    Validation(String),
    #[error("queue for job type {job_type} is full")]
    QueueFull { job_type: String },
    #[error("job {0} is already scheduled")]
    Duplicate(String),
    #[error("job queue is shut down")]
    ShutDown,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Adapts a closure returning a boxed future into a [`JobHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(Job) -> HandlerFuture + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> HandlerFuture + Send + Sync + 'static,
{
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        (self.0)(job).await
    }
}

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<Job>>>;

struct TypeChannel {
    tx: mpsc::Sender<Job>,
    rx: SharedReceiver,
}

struct QueueInner {
    capacity: usize,
    channels: Mutex<HashMap<String, TypeChannel>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: CancellationToken,
    active_loops: watch::Sender<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueueInner {
    fn channel(&self, job_type: &str) -> (mpsc::Sender<Job>, SharedReceiver) {
        let mut channels = lock(&self.channels);
        let entry = channels.entry(job_type.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.capacity);
            TypeChannel {
                tx,
                rx: Arc::new(AsyncMutex::new(rx)),
            }
        });
        (entry.tx.clone(), Arc::clone(&entry.rx))
    }
}

/// Decrements the running-loop count when a `process` loop exits.
struct LoopGuard<'a>(&'a watch::Sender<usize>);

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl JobQueue {
    /// `capacity` bounds each job type's channel.
    pub fn new(capacity: usize) -> Self {
        let (active_loops, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(QueueInner {
                capacity: capacity.max(1),
                channels: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                active_loops,
            }),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Timers armed for future jobs that have not fired yet.
    pub fn pending_timers(&self) -> usize {
        lock(&self.inner.timers).len()
    }

    /// Jobs of `job_type` enqueued and not yet picked up.
    pub fn queued(&self, job_type: &str) -> usize {
        lock(&self.inner.channels)
            .get(job_type)
            .map(|c| c.tx.max_capacity() - c.tx.capacity())
            .unwrap_or(0)
    }

    pub fn schedule(&self, job: Job) -> Result<(), QueueError> {
        if job.id.trim().is_empty() {
            return Err(QueueError::Validation("job id is empty".into()));
        }
        if job.job_type.trim().is_empty() {
            return Err(QueueError::Validation("job type is empty".into()));
        }
        if self.is_shut_down() {
            return Err(QueueError::ShutDown);
        }

        let now = Utc::now();
        let (tx, _) = self.inner.channel(&job.job_type);

        if job.is_due(now) {
            return tx.try_send(job).map_err(|err| match err {
                mpsc::error::TrySendError::Full(job) => QueueError::QueueFull {
                    job_type: job.job_type,
                },
                mpsc::error::TrySendError::Closed(_) => QueueError::ShutDown,
            });
        }

        let delay = (job.scheduled_for - now).to_std().unwrap_or_default();
        let mut timers = lock(&self.inner.timers);
        // shutdown drains under this lock; a timer inserted after it would leak
        if self.inner.shutdown.is_cancelled() {
            return Err(QueueError::ShutDown);
        }
        if timers.contains_key(&job.id) {
            return Err(QueueError::Duplicate(job.id));
        }
        debug!(job_id = %job.id, job_type = %job.job_type, ?delay, "arming job timer");

        let id = job.id.clone();
        let shutdown = self.inner.shutdown.clone();
        let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(inner) = weak.upgrade() {
                lock(&inner.timers).remove(&job.id);
            }
            let job_id = job.id.clone();
            tokio::select! {
                _ = shutdown.cancelled() => debug!(%job_id, "queue shut down before delivery; job dropped"),
                sent = tx.send(job) => {
                    if sent.is_err() {
                        warn!(%job_id, "job channel closed; job dropped");
                    }
                }
            }
        });
        timers.insert(id, handle);
        Ok(())
    }

    /// Dispatches jobs of `job_type` to `handler` until `cancel` fires or the
    /// queue shuts down. Several loops may serve the same type.
    pub async fn process(
        &self,
        cancel: CancellationToken,
        job_type: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), QueueError> {
        if job_type.trim().is_empty() {
            return Err(QueueError::Validation("job type is empty".into()));
        }
        if self.is_shut_down() {
            return Err(QueueError::ShutDown);
        }

        let (_, rx) = self.inner.channel(job_type);
        self.inner.active_loops.send_modify(|n| *n += 1);
        let _guard = LoopGuard(&self.inner.active_loops);
        let shutdown = self.inner.shutdown.clone();
        info!(job_type, "job processor started");

        loop {
            let next = {
                let mut rx = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    guard = rx.lock() => guard,
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    job = rx.recv() => job,
                }
            };
            let Some(job) = next else {
                break;
            };

            let job_id = job.id.clone();
            let handler = Arc::clone(&handler);
            // a panicking handler must not take the loop down
            match tokio::spawn(async move { handler.handle(job).await }).await {
                Ok(Ok(())) => debug!(%job_id, job_type, "job handled"),
                Ok(Err(err)) => error!(%job_id, job_type, error = %format!("{err:#}"), "job handler failed"),
                Err(join_err) => error!(%job_id, job_type, error = %join_err, "job handler panicked"),
            }
        }

        info!(job_type, "job processor stopped");
        Ok(())
    }

    /// Cancels every pending timer, closes all channels and waits for running
    /// `process` loops to exit. Unfired jobs are dropped.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let timers: Vec<JoinHandle<()>> = lock(&self.inner.timers).drain().map(|(_, h)| h).collect();
        let dropped = timers.len();
        for handle in timers {
            handle.abort();
        }
        lock(&self.inner.channels).clear();

        let mut active = self.inner.active_loops.subscribe();
        let _ = active.wait_for(|n| *n == 0).await;
        info!(dropped_timers = dropped, "job queue shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn job_in(job_type: &str, delay: chrono::Duration) -> Job {
        Job::new(job_type, Vec::new(), Utc::now() + delay)
    }

    fn counting_handler(count: Arc<AtomicUsize>) -> Arc<dyn JobHandler> {
        handler_fn(move |_job| {
            let count = Arc::clone(&count);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            })
        })
    }

    #[tokio::test]
    async fn rejects_jobs_without_id_or_type() {
        let queue = JobQueue::new(4);
        let mut job = job_in("rating.generate", chrono::Duration::zero());
        job.id = String::new();
        assert!(matches!(queue.schedule(job), Err(QueueError::Validation(_))));

        let job = job_in(" ", chrono::Duration::zero());
        assert!(matches!(queue.schedule(job), Err(QueueError::Validation(_))));
    }

    #[tokio::test]
    async fn full_channel_is_reported_to_the_caller() {
        let queue = JobQueue::new(2);
        queue.schedule(job_in("a", chrono::Duration::zero())).unwrap();
        queue.schedule(job_in("a", chrono::Duration::zero())).unwrap();
        let err = queue.schedule(job_in("a", chrono::Duration::zero())).unwrap_err();
        assert_eq!(err, QueueError::QueueFull { job_type: "a".into() });
        assert_eq!(queue.queued("a"), 2);

        // other types have their own capacity
        queue.schedule(job_in("b", chrono::Duration::zero())).unwrap();
    }

    #[tokio::test]
    async fn future_job_is_not_delivered_early() {
        let queue = JobQueue::new(4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |_job| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(Instant::now());
                anyhow::Ok(())
            })
        });

        let cancel = CancellationToken::new();
        let worker = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.process(cancel, "timed", handler).await })
        };

        let started = Instant::now();
        queue
            .schedule(job_in("timed", chrono::Duration::milliseconds(500)))
            .unwrap();
        assert_eq!(queue.pending_timers(), 1);

        let delivered_at = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("job delivered within window")
            .expect("handler ran");
        let elapsed = delivered_at.duration_since(started);
        assert!(elapsed >= Duration::from_millis(450), "delivered after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(800), "delivered after {elapsed:?}");
        assert_eq!(queue.pending_timers(), 0);

        cancel.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_drops_unfired_jobs_and_releases_timers() {
        let queue = JobQueue::new(4);
        let delivered = Arc::new(AtomicUsize::new(0));
        let worker = {
            let queue = queue.clone();
            let handler = counting_handler(Arc::clone(&delivered));
            tokio::spawn(async move { queue.process(CancellationToken::new(), "later", handler).await })
        };

        for _ in 0..3 {
            queue
                .schedule(job_in("later", chrono::Duration::milliseconds(200)))
                .unwrap();
        }
        assert_eq!(queue.pending_timers(), 3);

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown().await;
        assert_eq!(queue.pending_timers(), 0);
        worker.await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(
            queue.schedule(job_in("later", chrono::Duration::zero())),
            Err(QueueError::ShutDown)
        );
    }

    #[tokio::test]
    async fn unprocessed_types_do_not_starve_other_processors() {
        let queue = JobQueue::new(8);
        for _ in 0..8 {
            queue.schedule(job_in("orphan", chrono::Duration::zero())).unwrap();
        }
        queue.schedule(job_in("wanted", chrono::Duration::zero())).unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let worker = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            let handler = counting_handler(Arc::clone(&delivered));
            tokio::spawn(async move { queue.process(cancel, "wanted", handler).await })
        };

        let deadline = Instant::now() + Duration::from_secs(2);
        while delivered.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(queue.queued("orphan"), 8);

        cancel.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handler_errors_are_not_retried() {
        let queue = JobQueue::new(4);
        let attempts = Arc::new(AtomicUsize::new(0));
        let handler = {
            let attempts = Arc::clone(&attempts);
            handler_fn(move |_job| {
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("analysis backend unavailable"))
                })
            })
        };
        queue.schedule(job_in("flaky", chrono::Duration::zero())).unwrap();

        let cancel = CancellationToken::new();
        let worker = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.process(cancel, "flaky", handler).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(queue.queued("flaky"), 0);

        cancel.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn processors_sharing_a_type_handle_each_job_once() {
        let queue = JobQueue::new(64);
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let handled_by = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);

        let mut workers = Vec::new();
        for slot in 0..2 {
            let queue = queue.clone();
            let seen = Arc::clone(&seen);
            let handled_by = Arc::clone(&handled_by);
            let handler = handler_fn(move |job| {
                let seen = Arc::clone(&seen);
                let handled_by = Arc::clone(&handled_by);
                Box::pin(async move {
                    lock(&seen).push(job.id);
                    handled_by[slot].fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    anyhow::Ok(())
                })
            });
            workers.push(tokio::spawn(async move {
                queue.process(CancellationToken::new(), "shared", handler).await
            }));
        }

        let mut ids = Vec::new();
        for _ in 0..20 {
            let job = job_in("shared", chrono::Duration::zero());
            ids.push(job.id.clone());
            queue.schedule(job).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(3);
        while lock(&seen).len() < ids.len() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut handled = lock(&seen).clone();
        handled.sort();
        ids.sort();
        assert_eq!(handled, ids);
        let total: usize = handled_by.iter().map(|n| n.load(Ordering::SeqCst)).sum();
        assert_eq!(total, 20);

        tokio::time::timeout(Duration::from_secs(2), queue.shutdown())
            .await
            .expect("shutdown waits for both loops");
        for worker in workers {
            worker.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn schedule_racing_shutdown_leaves_no_timer_behind() {
        for _ in 0..50 {
            let queue = JobQueue::new(16);
            let schedulers: Vec<_> = (0..4)
                .map(|_| {
                    let queue = queue.clone();
                    tokio::spawn(async move {
                        for _ in 0..8 {
                            let _ = queue.schedule(job_in("later", chrono::Duration::seconds(60)));
                            tokio::task::yield_now().await;
                        }
                    })
                })
                .collect();
            tokio::task::yield_now().await;
            queue.shutdown().await;
            for scheduler in schedulers {
                scheduler.await.unwrap();
            }
            assert_eq!(queue.pending_timers(), 0);
        }
    }
}
