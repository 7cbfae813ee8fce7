use std::sync::Arc;

use anyhow::{Context, Result};
use scoreline_adapters::DataSource;
use tracing::info;

use crate::backfill::PeriodIngestor;
use crate::fetcher::FetchMode;
use crate::ratings::RatingBackfill;
use crate::report::PeriodResult;

/// Incremental sync of whatever period the provider currently considers latest.
#[derive(Clone)]
pub struct LatestSync {
    source: Arc<dyn DataSource>,
    ingestor: PeriodIngestor,
    ratings: Option<RatingBackfill>,
}

impl LatestSync {
    pub fn new(source: Arc<dyn DataSource>, ingestor: PeriodIngestor) -> Self {
        Self {
            source,
            ingestor,
            ratings: None,
        }
    }

    /// Runs the rating pass over the synced period after a clean ingest.
    pub fn with_ratings(mut self, ratings: RatingBackfill) -> Self {
        self.ratings = Some(ratings);
        self
    }

    /// `Ok(None)` when the provider reports no current period.
    pub async fn run_once(&self, sport: &str) -> Result<Option<PeriodResult>> {
        let Some(period) = self
            .source
            .latest_period(sport)
            .await
            .with_context(|| format!("resolving latest period for {sport}"))?
        else {
            info!(sport, "provider reports no current period");
            return Ok(None);
        };

        let result = self
            .ingestor
            .ingest(sport, &period, 0, FetchMode::Ingest, false)
            .await;

        if result.error.is_none() {
            if let Some(ratings) = &self.ratings {
                ratings.fill_periods(sport, std::slice::from_ref(&period)).await;
            }
        }
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{final_game, game, MockSource};
    use scoreline_adapters::HeuristicAnalysis;
    use scoreline_core::{Period, PeriodType};
    use scoreline_storage::{MemoryRepository, Repository};

    #[tokio::test]
    async fn syncs_latest_period_and_rates_it() {
        let week = Period::new("2024", "7", PeriodType::Regular);
        let source: Arc<MockSource> = Arc::new(
            MockSource::default()
                .with_latest(&week)
                .with_listing(&week, vec![final_game("g1", &week, 30, 27), game("g2", &week)]),
        );
        let repo = Arc::new(MemoryRepository::new());
        let ratings = RatingBackfill::new(repo.clone(), Arc::new(HeuristicAnalysis::new()));
        let sync = LatestSync::new(source.clone(), PeriodIngestor::new(source.clone(), repo.clone()))
            .with_ratings(ratings);

        let result = sync.run_once("nfl").await.unwrap().unwrap();
        assert_eq!(result.added_count, 2);

        let stored = repo.find_by_period("nfl", &week).await.unwrap();
        let rated: Vec<_> = stored.iter().filter(|c| c.rating.is_some()).collect();
        assert_eq!(rated.len(), 1);
        assert_eq!(rated[0].external_id, "g1");

        let again = sync.run_once("nfl").await.unwrap().unwrap();
        assert_eq!(again.added_count, 0);
        assert!(again.skipped);
    }

    #[tokio::test]
    async fn no_latest_period_is_not_an_error() {
        let source = Arc::new(MockSource::default());
        let sync = LatestSync::new(
            source.clone(),
            PeriodIngestor::new(source, Arc::new(MemoryRepository::new())),
        );
        assert!(sync.run_once("nfl").await.unwrap().is_none());
    }
}
