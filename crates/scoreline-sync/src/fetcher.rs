//! Dedup-aware fetch of one period.

use std::collections::HashSet;
use std::sync::Arc;

use scoreline_adapters::{DataSource, SourceError};
use scoreline_core::{Competition, Period};
use scoreline_storage::Repository;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Return only remote items not yet stored.
    #[default]
    Ingest,
    /// Return every remote item with refreshed details, to patch stored records.
    Update,
}

#[derive(Debug, Error)]
pub enum PeriodFetchError {
    #[error("loading stored competitions: {0:#}")]
    Repository(anyhow::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone)]
pub struct PeriodFetch {
    pub existing_count: usize,
    pub fetched_count: usize,
    pub competitions: Vec<Competition>,
}

#[derive(Clone)]
pub struct PeriodFetcher {
    source: Arc<dyn DataSource>,
    repository: Arc<dyn Repository>,
}

impl PeriodFetcher {
    pub fn new(source: Arc<dyn DataSource>, repository: Arc<dyn Repository>) -> Self {
        Self { source, repository }
    }

    /// Fetches one period. `limit == 0` is unbounded.
    ///
    /// In [`FetchMode::Ingest`] the result never contains an `external_id`
    /// already stored for the period, nor the same id twice. Any data-source
    /// or repository read failure aborts the call with no partial result; a
    /// failed detail fetch only leaves that item without details.
    pub async fn fetch_period(
        &self,
        sport: &str,
        period: &Period,
        limit: usize,
        mode: FetchMode,
    ) -> Result<PeriodFetch, PeriodFetchError> {
        let existing = self
            .repository
            .find_by_period(sport, period)
            .await
            .map_err(PeriodFetchError::Repository)?;
        let remote = self.source.competitions(sport, period).await?;
        let fetched_count = remote.len();

        let mut seen: HashSet<String> = match mode {
            FetchMode::Ingest => existing.iter().map(|c| c.external_id.clone()).collect(),
            FetchMode::Update => HashSet::new(),
        };

        let mut kept = Vec::new();
        for competition in remote {
            if limit > 0 && kept.len() >= limit {
                break;
            }
            if !seen.insert(competition.external_id.clone()) {
                continue;
            }
            kept.push(competition);
        }

        debug!(
            sport,
            %period,
            ?mode,
            existing = existing.len(),
            fetched = fetched_count,
            kept = kept.len(),
            "period diff computed"
        );

        for competition in &mut kept {
            self.attach_details(sport, competition).await;
        }

        Ok(PeriodFetch {
            existing_count: existing.len(),
            fetched_count,
            competitions: kept,
        })
    }

    async fn attach_details(&self, sport: &str, competition: &mut Competition) {
        match self.source.competition_details(sport, &competition.external_id).await {
            Ok(Some(details)) => competition.details = Some(details),
            Ok(None) => debug!(sport, external_id = %competition.external_id, "no details available"),
            Err(err) => warn!(
                sport,
                external_id = %competition.external_id,
                error = %err,
                "detail fetch failed; keeping competition without details"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{game, MockSource};
    use scoreline_core::PeriodType;
    use scoreline_storage::MemoryRepository;

    fn week1() -> Period {
        Period::new("2024", "1", PeriodType::Regular)
    }

    #[tokio::test]
    async fn ingest_returns_only_unseen_items_in_order() {
        let repo = Arc::new(MemoryRepository::new());
        repo.save_competition(&game("b", &week1())).await.unwrap();
        let listing = ["a", "b", "c", "a", "d"].iter().map(|id| game(id, &week1())).collect();
        let source = MockSource::default().with_listing(&week1(), listing);
        let fetcher = PeriodFetcher::new(Arc::new(source), repo);

        let fetch = fetcher
            .fetch_period("nfl", &week1(), 0, FetchMode::Ingest)
            .await
            .unwrap();

        let ids: Vec<_> = fetch.competitions.iter().map(|c| c.external_id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "d"]);
        assert_eq!(fetch.existing_count, 1);
        assert_eq!(fetch.fetched_count, 5);
        assert!(fetch.competitions.iter().all(|c| c.details.is_some()));
    }

    #[tokio::test]
    async fn limit_caps_kept_items() {
        let listing = (0..6).map(|i| game(&i.to_string(), &week1())).collect();
        let source = MockSource::default().with_listing(&week1(), listing);
        let fetcher = PeriodFetcher::new(Arc::new(source), Arc::new(MemoryRepository::new()));

        let fetch = fetcher
            .fetch_period("nfl", &week1(), 2, FetchMode::Ingest)
            .await
            .unwrap();
        assert_eq!(fetch.competitions.len(), 2);
        assert_eq!(fetch.fetched_count, 6);
    }

    #[tokio::test]
    async fn update_mode_returns_stored_items_too() {
        let repo = Arc::new(MemoryRepository::new());
        repo.save_competition(&game("a", &week1())).await.unwrap();
        let source = MockSource::default()
            .with_listing(&week1(), vec![game("a", &week1()), game("b", &week1())]);
        let fetcher = PeriodFetcher::new(Arc::new(source), repo);

        let fetch = fetcher
            .fetch_period("nfl", &week1(), 0, FetchMode::Update)
            .await
            .unwrap();
        assert_eq!(fetch.competitions.len(), 2);
    }

    #[tokio::test]
    async fn source_failure_aborts_without_partial_result() {
        let source = MockSource::default().with_failure(&week1(), "timeout");
        let fetcher = PeriodFetcher::new(Arc::new(source), Arc::new(MemoryRepository::new()));

        let err = fetcher
            .fetch_period("nfl", &week1(), 0, FetchMode::Ingest)
            .await
            .unwrap_err();
        assert!(matches!(err, PeriodFetchError::Source(SourceError::Transport(_))));
    }
}
