//! Long-running mode: periodic latest sync and rating pass on the cron
//! scheduler, plus the processor for deferred rating jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Components;
use crate::latest::LatestSync;
use crate::queue::{JobQueue, QueueError};
use crate::ratings::{RatingBackfill, RatingJobHandler, RATING_JOB_TYPE};

pub struct BackgroundService {
    sport: String,
    latest: LatestSync,
    ratings: RatingBackfill,
    queue: JobQueue,
    latest_every: Duration,
    ratings_every: Duration,
    cancel: CancellationToken,
    scheduler: Option<JobScheduler>,
    processor: Option<JoinHandle<Result<(), QueueError>>>,
}

impl BackgroundService {
    pub fn new(components: &Components) -> Self {
        Self {
            sport: components.config.sport.clone(),
            latest: components.latest_sync(),
            ratings: components.ratings(),
            queue: components.queue.clone(),
            latest_every: components.config.latest_sync_every,
            ratings_every: components.config.rating_fill_every,
            cancel: CancellationToken::new(),
            scheduler: None,
            processor: None,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let handler = Arc::new(RatingJobHandler::new(self.ratings.clone()));
        let processor = {
            let queue = self.queue.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { queue.process(cancel, RATING_JOB_TYPE, handler).await })
        };
        self.processor = Some(processor);

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let latest = self.latest.clone();
        let sport = self.sport.clone();
        let job = repeated(self.latest_every, self.cancel.clone(), "latest-sync", move || {
            let latest = latest.clone();
            let sport = sport.clone();
            async move {
                match latest.run_once(&sport).await {
                    Ok(Some(result)) if result.error.is_some() => {
                        warn!(sport = %sport, period = %result.label(), error = ?result.error, "latest sync tick failed")
                    }
                    Ok(Some(result)) => info!(sport = %sport, period = %result.label(), added = result.added_count, "latest sync tick"),
                    Ok(None) => {}
                    Err(err) => error!(sport = %sport, error = %format!("{err:#}"), "latest sync tick failed"),
                }
            }
        })?;
        sched.add(job).await.context("adding latest sync job")?;

        let ratings = self.ratings.clone();
        let sport = self.sport.clone();
        let job = repeated(self.ratings_every, self.cancel.clone(), "rating-pass", move || {
            let ratings = ratings.clone();
            let sport = sport.clone();
            async move {
                if let Err(err) = ratings.fill_missing(&sport).await {
                    error!(sport = %sport, error = %format!("{err:#}"), "rating pass tick failed");
                }
            }
        })?;
        sched.add(job).await.context("adding rating pass job")?;

        sched.start().await.context("starting scheduler")?;
        info!(
            sport = %self.sport,
            latest_every = ?self.latest_every,
            ratings_every = ?self.ratings_every,
            "background service started"
        );
        self.scheduler = Some(sched);
        Ok(())
    }

    /// Stops the scheduler, the job processor and every pending job timer.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(mut sched) = self.scheduler.take() {
            sched.shutdown().await.context("stopping scheduler")?;
        }
        self.queue.shutdown().await;
        if let Some(processor) = self.processor.take() {
            match processor.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "rating processor exited with error"),
                Err(err) => error!(error = %err, "rating processor task failed"),
            }
        }
        info!("background service stopped");
        Ok(())
    }
}

/// A repeated cron job that skips a tick while the previous one still runs
/// and does nothing once `cancel` fires.
fn repeated<F, Fut>(every: Duration, cancel: CancellationToken, name: &'static str, tick: F) -> Result<CronJob>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let tick = Arc::new(tick);
    let busy = Arc::new(Mutex::new(()));
    CronJob::new_repeated_async(every, move |_uuid, _sched| {
        let tick = Arc::clone(&tick);
        let busy = Arc::clone(&busy);
        let cancel = cancel.clone();
        Box::pin(async move {
            if cancel.is_cancelled() {
                return;
            }
            let Ok(_running) = busy.try_lock() else {
                debug!(job = name, "previous tick still running; skipping");
                return;
            };
            tokio::select! {
                _ = cancel.cancelled() => debug!(job = name, "tick interrupted by shutdown"),
                _ = (*tick)() => {}
            }
        })
    })
    .with_context(|| format!("creating {name} job"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;

    #[tokio::test]
    async fn starts_and_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig {
            fixtures_dir: dir.path().to_path_buf(),
            latest_sync_every: Duration::from_secs(3600),
            rating_fill_every: Duration::from_secs(3600),
            ..SyncConfig::default()
        };
        let components = Components::build(config).await.unwrap();
        let mut service = BackgroundService::new(&components);

        service.start().await.unwrap();
        assert!(service.is_running());
        service.shutdown().await.unwrap();
        assert!(!service.is_running());
        assert!(components.queue.is_shut_down());
        assert_eq!(components.queue.pending_timers(), 0);
    }
}
