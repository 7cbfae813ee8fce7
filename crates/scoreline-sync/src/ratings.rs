//! Rating backfill: fill in missing analysis for stored competitions, either
//! as a periodic pass over stored periods or one competition at a time from
//! the job queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use scoreline_adapters::AnalysisService;
use scoreline_core::{Competition, Job, Period};
use scoreline_storage::Repository;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::queue::JobHandler;

pub const RATING_JOB_TYPE: &str = "rating.generate";

/// Default wait between ingesting a finished game and rating it.
pub const DEFAULT_RATING_DELAY: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingJobPayload {
    pub competition_id: Uuid,
}

/// Builds a `rating.generate` job for `competition`, due after `delay`.
pub fn rating_job(competition: &Competition, delay: Duration) -> Result<Job> {
    let payload = serde_json::to_vec(&RatingJobPayload {
        competition_id: competition.id,
    })
    .context("encoding rating job payload")?;
    let delay = chrono::Duration::from_std(delay).context("rating delay out of range")?;
    Ok(Job::new(RATING_JOB_TYPE, payload, Utc::now() + delay))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FillSummary {
    /// Competitions for which a rating was requested.
    pub processed: usize,
    /// Ratings actually stored.
    pub updated: usize,
}

impl FillSummary {
    fn absorb(&mut self, other: FillSummary) {
        self.processed += other.processed;
        self.updated += other.updated;
    }
}

#[derive(Clone)]
pub struct RatingBackfill {
    repository: Arc<dyn Repository>,
    analysis: Arc<dyn AnalysisService>,
    recent_periods: Option<usize>,
}

impl RatingBackfill {
    pub fn new(repository: Arc<dyn Repository>, analysis: Arc<dyn AnalysisService>) -> Self {
        Self {
            repository,
            analysis,
            recent_periods: None,
        }
    }

    /// Restricts [`fill_missing`](Self::fill_missing) to the `k` most recent stored periods.
    pub fn with_recent_periods(mut self, k: Option<usize>) -> Self {
        self.recent_periods = k;
        self
    }

    pub fn rating_type(&self) -> &str {
        self.analysis.rating_type()
    }

    pub async fn fill_missing(&self, sport: &str) -> Result<FillSummary> {
        let mut periods = self
            .repository
            .available_periods(sport)
            .await
            .with_context(|| format!("listing stored periods for {sport}"))?;
        periods.sort_by(|a, b| b.recency_cmp(a));
        if let Some(k) = self.recent_periods {
            periods.truncate(k);
        }
        Ok(self.fill_periods(sport, &periods).await)
    }

    /// A period that cannot be loaded is logged and skipped.
    pub async fn fill_periods(&self, sport: &str, periods: &[Period]) -> FillSummary {
        let mut summary = FillSummary::default();
        for period in periods {
            match self.fill_period(sport, period).await {
                Ok(s) => summary.absorb(s),
                Err(err) => warn!(sport, %period, error = %format!("{err:#}"), "rating pass skipped period"),
            }
        }
        info!(
            sport,
            periods = periods.len(),
            processed = summary.processed,
            updated = summary.updated,
            rating_type = self.rating_type(),
            "rating pass finished"
        );
        summary
    }

    async fn fill_period(&self, sport: &str, period: &Period) -> Result<FillSummary> {
        let competitions = self
            .repository
            .find_by_period(sport, period)
            .await
            .with_context(|| format!("loading {period}"))?;

        let mut summary = FillSummary::default();
        for competition in &competitions {
            match self.needs_rating(competition).await {
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) => {
                    warn!(competition_id = %competition.id, error = %format!("{err:#}"), "rating lookup failed");
                    continue;
                }
            }
            summary.processed += 1;
            match self.rate(competition).await {
                Ok(true) => summary.updated += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    competition_id = %competition.id,
                    matchup = %competition.matchup(),
                    error = %format!("{err:#}"),
                    "rating generation failed"
                ),
            }
        }
        Ok(summary)
    }

    async fn needs_rating(&self, competition: &Competition) -> Result<bool> {
        let existing = self
            .repository
            .load_rating(competition.id, self.rating_type())
            .await?;
        Ok(existing.is_none())
    }

    /// Produces and stores a rating. Returns `false` when the analysis had
    /// nothing to say (empty rating, not stored).
    pub async fn rate(&self, competition: &Competition) -> Result<bool> {
        let rating = self
            .analysis
            .produce(competition)
            .await
            .with_context(|| format!("analysing {}", competition.matchup()))?;
        if rating.is_empty() {
            debug!(competition_id = %competition.id, "analysis returned an empty rating");
            return Ok(false);
        }
        self.repository
            .save_rating(&rating)
            .await
            .with_context(|| format!("saving rating for {}", competition.id))?;
        Ok(true)
    }
}

/// Queue handler for [`RATING_JOB_TYPE`].
pub struct RatingJobHandler {
    ratings: RatingBackfill,
}

impl RatingJobHandler {
    pub fn new(ratings: RatingBackfill) -> Self {
        Self { ratings }
    }
}

#[async_trait]
impl JobHandler for RatingJobHandler {
    async fn handle(&self, job: Job) -> Result<()> {
        let payload: RatingJobPayload =
            serde_json::from_slice(&job.payload).context("decoding rating job payload")?;
        let competition = self
            .ratings
            .repository
            .find_by_id(payload.competition_id)
            .await?
            .with_context(|| format!("competition {} not found", payload.competition_id))?;

        if !self.ratings.needs_rating(&competition).await? {
            debug!(job_id = %job.id, competition_id = %competition.id, "already rated");
            return Ok(());
        }
        let stored = self.ratings.rate(&competition).await?;
        info!(job_id = %job.id, matchup = %competition.matchup(), stored, "rating job done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{final_game, FailingAnalysis};
    use scoreline_adapters::HeuristicAnalysis;
    use scoreline_core::PeriodType;
    use scoreline_storage::MemoryRepository;

    async fn seeded() -> Arc<MemoryRepository> {
        let repo = Arc::new(MemoryRepository::new());
        for week in 1..=3 {
            let period = Period::new("2024", week.to_string(), PeriodType::Regular);
            for n in 0..2 {
                let game = final_game(&format!("w{week}g{n}"), &period, 27, 24);
                repo.save_competition(&game).await.unwrap();
            }
        }
        repo
    }

    #[tokio::test]
    async fn fills_only_missing_ratings() {
        let repo = seeded().await;
        let ratings = RatingBackfill::new(repo.clone(), Arc::new(HeuristicAnalysis::new()));

        let first = ratings.fill_missing("nfl").await.unwrap();
        assert_eq!(first, FillSummary { processed: 6, updated: 6 });

        let second = ratings.fill_missing("nfl").await.unwrap();
        assert_eq!(second, FillSummary::default());
    }

    #[tokio::test]
    async fn recent_periods_limits_the_pass() {
        let repo = seeded().await;
        let ratings = RatingBackfill::new(repo.clone(), Arc::new(HeuristicAnalysis::new()))
            .with_recent_periods(Some(1));

        let summary = ratings.fill_missing("nfl").await.unwrap();
        assert_eq!(summary.updated, 2);

        let week3 = repo
            .find_by_period("nfl", &Period::new("2024", "3", PeriodType::Regular))
            .await
            .unwrap();
        assert!(week3.iter().all(|c| c.rating.is_some()));
        let week1 = repo
            .find_by_period("nfl", &Period::new("2024", "1", PeriodType::Regular))
            .await
            .unwrap();
        assert!(week1.iter().all(|c| c.rating.is_none()));
    }

    #[tokio::test]
    async fn analysis_failures_are_skipped() {
        let repo = seeded().await;
        let ratings = RatingBackfill::new(repo, Arc::new(FailingAnalysis));
        let summary = ratings.fill_missing("nfl").await.unwrap();
        assert_eq!(summary, FillSummary { processed: 6, updated: 0 });
    }

    #[tokio::test]
    async fn job_handler_rates_the_named_competition() {
        let repo = seeded().await;
        let ratings = RatingBackfill::new(repo.clone(), Arc::new(HeuristicAnalysis::new()));
        let period = Period::new("2024", "2", PeriodType::Regular);
        let target = repo.find_by_period("nfl", &period).await.unwrap().remove(0);

        let job = rating_job(&target, Duration::ZERO).unwrap();
        assert_eq!(job.job_type, RATING_JOB_TYPE);
        RatingJobHandler::new(ratings).handle(job).await.unwrap();

        let stored = repo.find_by_id(target.id).await.unwrap().unwrap();
        assert_eq!(stored.rating.map(|r| r.value).as_deref(), Some("A+"));
    }

    #[tokio::test]
    async fn job_handler_fails_for_unknown_competition() {
        let ratings = RatingBackfill::new(Arc::new(MemoryRepository::new()), Arc::new(HeuristicAnalysis::new()));
        let payload = serde_json::to_vec(&RatingJobPayload { competition_id: Uuid::new_v4() }).unwrap();
        let job = Job::new(RATING_JOB_TYPE, payload, Utc::now());
        assert!(RatingJobHandler::new(ratings).handle(job).await.is_err());
    }
}
