use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use scoreline_core::{Competition, CompetitionDetails, Period};
use scoreline_storage::{ArtifactStore, FetchError, HttpFetcher, PayloadKind};
use tracing::{debug, warn};

use crate::{parse_payload, DataSource, ScoreboardPayload, SourceError};

/// Provider client over a JSON scoreboard API:
///
/// * `GET {base}/{sport}/scoreboard` for the current period
/// * `GET {base}/{sport}/scoreboard?season=..&period=..&period_type=..`
/// * `GET {base}/{sport}/competitions/{external_id}` for details
///
/// Throttling, concurrency caps and transport retries come from the shared
/// [`HttpFetcher`]. Raw bodies are archived when an [`ArtifactStore`] is set.
pub struct HttpDataSource {
    base_url: String,
    http: Arc<HttpFetcher>,
    archive: Option<ArtifactStore>,
}

impl HttpDataSource {
    pub fn new(base_url: impl Into<String>, http: Arc<HttpFetcher>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: ArtifactStore) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn latest_url(&self, sport: &str) -> String {
        format!("{}/{sport}/scoreboard", self.base_url)
    }

    pub fn period_url(&self, sport: &str, period: &Period) -> String {
        format!(
            "{}/{sport}/scoreboard?season={}&period={}&period_type={}",
            self.base_url, period.season, period.period, period.period_type
        )
    }

    pub fn details_url(&self, sport: &str, external_id: &str) -> String {
        format!("{}/{sport}/competitions/{external_id}", self.base_url)
    }

    async fn get(&self, sport: &str, kind: PayloadKind, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self.http.fetch_bytes(sport, url).await.map_err(map_fetch_error)?;
        if let Some(archive) = &self.archive {
            if let Err(err) = archive.archive(Utc::now(), sport, kind, &response.body).await {
                warn!(sport, %kind, error = %format!("{err:#}"), "failed to archive raw payload");
            }
        }
        Ok(response.body)
    }
}

fn map_fetch_error(err: FetchError) -> SourceError {
    if err.is_not_found() {
        SourceError::NotFound(err.to_string())
    } else if err.is_rate_limited() {
        SourceError::RateLimited {
            retry_after: err.retry_after(),
        }
    } else {
        SourceError::Transport(err.to_string())
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn latest_period(&self, sport: &str) -> Result<Option<Period>, SourceError> {
        let url = self.latest_url(sport);
        let body = match self.get(sport, PayloadKind::Latest, &url).await {
            Ok(body) => body,
            Err(SourceError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let scoreboard: ScoreboardPayload = parse_payload(&body, &url)?;
        Ok(Some(scoreboard.period()))
    }

    async fn competitions(&self, sport: &str, period: &Period) -> Result<Vec<Competition>, SourceError> {
        let url = self.period_url(sport, period);
        let body = self.get(sport, PayloadKind::Scoreboard, &url).await?;
        let scoreboard: ScoreboardPayload = parse_payload(&body, &url)?;
        if scoreboard.period() != *period {
            debug!(sport, requested = %period, served = %scoreboard.period(), "provider served a different period");
        }
        Ok(scoreboard
            .events
            .iter()
            .map(|event| event.to_competition(sport, period))
            .collect())
    }

    async fn competition_details(
        &self,
        sport: &str,
        external_id: &str,
    ) -> Result<Option<CompetitionDetails>, SourceError> {
        let url = self.details_url(sport, external_id);
        match self.get(sport, PayloadKind::Details, &url).await {
            Ok(body) => parse_payload(&body, &url).map(Some),
            Err(SourceError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
