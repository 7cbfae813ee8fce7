//! Season backfill: walk every period of a season, fetch what is missing and
//! save it, within an optional global work limit.

use std::sync::Arc;
use std::time::Duration;

use scoreline_adapters::DataSource;
use scoreline_core::{periods, Competition, Period};
use scoreline_storage::Repository;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fetcher::{FetchMode, PeriodFetcher};
use crate::queue::{JobQueue, QueueError};
use crate::ratings::rating_job;
use crate::report::{BackfillResult, PeriodResult, SKIP_ALREADY_POPULATED, SKIP_NO_COMPETITIONS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillOptions {
    /// Ingest runs skip periods that already hold stored competitions.
    /// Update runs ignore this.
    #[serde(default)]
    pub skip_populated: bool,
}

#[derive(Clone)]
struct RatingFollowUp {
    queue: JobQueue,
    delay: Duration,
}

/// Fetch-then-save for a single period; shared by the season backfill and
/// the latest-period sync.
#[derive(Clone)]
pub struct PeriodIngestor {
    fetcher: PeriodFetcher,
    repository: Arc<dyn Repository>,
    follow_up: Option<RatingFollowUp>,
}

impl PeriodIngestor {
    pub fn new(source: Arc<dyn DataSource>, repository: Arc<dyn Repository>) -> Self {
        Self {
            fetcher: PeriodFetcher::new(source, Arc::clone(&repository)),
            repository,
            follow_up: None,
        }
    }

    /// Schedules a deferred rating job for every saved competition that is final.
    pub fn with_rating_jobs(mut self, queue: JobQueue, delay: Duration) -> Self {
        self.follow_up = Some(RatingFollowUp { queue, delay });
        self
    }

    /// Never fails: every problem ends up in the returned [`PeriodResult`].
    pub async fn ingest(
        &self,
        sport: &str,
        period: &Period,
        limit: usize,
        mode: FetchMode,
        skip_populated: bool,
    ) -> PeriodResult {
        let mut result = PeriodResult::new(period);

        if skip_populated && mode == FetchMode::Ingest {
            match self.repository.find_by_period(sport, period).await {
                Ok(existing) if !existing.is_empty() => {
                    result.existing_count = existing.len();
                    result.skip(SKIP_ALREADY_POPULATED);
                    debug!(sport, %period, existing = existing.len(), "period already populated");
                    return result;
                }
                Ok(_) => {}
                Err(err) => {
                    result.error = Some(format!("loading stored competitions: {err:#}"));
                    return result;
                }
            }
        }

        let fetch = match self.fetcher.fetch_period(sport, period, limit, mode).await {
            Ok(fetch) => fetch,
            Err(err) => {
                warn!(sport, %period, error = %err, "period fetch failed");
                result.error = Some(err.to_string());
                return result;
            }
        };
        result.existing_count = fetch.existing_count;
        result.fetched_count = fetch.fetched_count;

        if fetch.competitions.is_empty() {
            result.skip(SKIP_NO_COMPETITIONS);
            return result;
        }

        for competition in &fetch.competitions {
            if let Err(err) = self.repository.save_competition(competition).await {
                error!(
                    sport,
                    %period,
                    external_id = %competition.external_id,
                    error = %format!("{err:#}"),
                    "saving competition failed; abandoning period"
                );
                result.error = Some(format!("saving {}: {err:#}", competition.external_id));
                break;
            }
            result.added_count += 1;
            self.schedule_rating(competition);
        }

        info!(
            sport,
            %period,
            ?mode,
            existing = result.existing_count,
            fetched = result.fetched_count,
            saved = result.added_count,
            "period ingested"
        );
        result
    }

    fn schedule_rating(&self, competition: &Competition) {
        let Some(follow_up) = &self.follow_up else {
            return;
        };
        if !competition.is_final() {
            return;
        }
        let job = match rating_job(competition, follow_up.delay) {
            Ok(job) => job,
            Err(err) => {
                warn!(competition_id = %competition.id, error = %format!("{err:#}"), "building rating job failed");
                return;
            }
        };
        match follow_up.queue.schedule(job) {
            Ok(()) => debug!(competition_id = %competition.id, "rating job scheduled"),
            Err(err @ (QueueError::QueueFull { .. } | QueueError::ShutDown)) => warn!(
                competition_id = %competition.id,
                error = %err,
                "rating job not scheduled; left for the rating pass"
            ),
            Err(err) => warn!(competition_id = %competition.id, error = %err, "rating job rejected"),
        }
    }
}

pub struct Backfill {
    ingestor: PeriodIngestor,
    options: BackfillOptions,
    cancel: CancellationToken,
}

impl Backfill {
    pub fn new(ingestor: PeriodIngestor) -> Self {
        Self {
            ingestor,
            options: BackfillOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: BackfillOptions) -> Self {
        self.options = options;
        self
    }

    /// Checked between periods; a cancelled run returns its partial report.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ingests every period of `season` that is missing competitions.
    /// `limit` caps the competitions added across the whole run (0 = unbounded).
    pub async fn run(&self, sport: &str, season: &str, limit: usize) -> BackfillResult {
        self.run_mode(sport, season, limit, FetchMode::Ingest).await
    }

    /// Re-fetches every period and patches the stored records.
    pub async fn run_update(&self, sport: &str, season: &str, limit: usize) -> BackfillResult {
        self.run_mode(sport, season, limit, FetchMode::Update).await
    }

    async fn run_mode(&self, sport: &str, season: &str, limit: usize, mode: FetchMode) -> BackfillResult {
        let mut report = BackfillResult::new(season, limit);
        let all = periods(sport, season);
        info!(sport, season, limit, ?mode, periods = all.len(), "backfill started");

        for period in &all {
            if self.cancel.is_cancelled() {
                warn!(sport, season, %period, "backfill cancelled");
                report.cancelled = true;
                break;
            }

            let result = self
                .ingestor
                .ingest(
                    sport,
                    period,
                    report.remaining(),
                    mode,
                    self.options.skip_populated,
                )
                .await;
            report.record(result);

            if report.limit_hit() {
                report.limit_reached = true;
                info!(sport, season, %period, limit, "backfill limit reached");
                break;
            }
        }

        info!(sport, summary = %report.summary_line(), "backfill finished");
        report
    }
}
