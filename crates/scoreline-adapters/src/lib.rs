//! Provider contracts and data-source adapters for Scoreline.
//!
//! The ingestion engine only talks to [`DataSource`] and [`AnalysisService`];
//! concrete providers live behind them. Fixture and HTTP sources share the
//! scoreboard JSON shape defined here.

mod analysis;
mod fixture;
mod http;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scoreline_core::{Competition, CompetitionDetails, CompetitionStatus, HomeAway, Period, PeriodType, Rating, Team};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use analysis::{HeuristicAnalysis, EXCITEMENT_RATING};
pub use fixture::FixtureDataSource;
pub use http::HttpDataSource;
pub use retry::RetryingDataSource;

pub const CRATE_NAME: &str = "scoreline-adapters";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
    #[error("unparseable provider payload: {0}")]
    Parse(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transport(_) | SourceError::RateLimited { .. })
    }
}

/// Remote provider of competitions. No retry contract is implied; wrap in
/// [`RetryingDataSource`] to add one.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The provider's current period, if it reports one.
    async fn latest_period(&self, sport: &str) -> Result<Option<Period>, SourceError>;

    async fn competitions(&self, sport: &str, period: &Period) -> Result<Vec<Competition>, SourceError>;

    async fn competition_details(
        &self,
        sport: &str,
        external_id: &str,
    ) -> Result<Option<CompetitionDetails>, SourceError>;
}

#[async_trait]
impl<T: DataSource + ?Sized> DataSource for Arc<T> {
    async fn latest_period(&self, sport: &str) -> Result<Option<Period>, SourceError> {
        (**self).latest_period(sport).await
    }

    async fn competitions(&self, sport: &str, period: &Period) -> Result<Vec<Competition>, SourceError> {
        (**self).competitions(sport, period).await
    }

    async fn competition_details(
        &self,
        sport: &str,
        external_id: &str,
    ) -> Result<Option<CompetitionDetails>, SourceError> {
        (**self).competition_details(sport, external_id).await
    }
}

/// Produces a derived rating for a competition.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    fn rating_type(&self) -> &str;

    /// May return a rating with an empty value when nothing can be said yet;
    /// callers do not store those.
    async fn produce(&self, competition: &Competition) -> anyhow::Result<Rating>;
}

/// Scoreboard document for one period, as served by providers and fixtures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreboardPayload {
    pub season: String,
    pub period: String,
    pub period_type: PeriodType,
    #[serde(default)]
    pub events: Vec<EventPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub id: String,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub competitors: Vec<CompetitorPayload>,
    #[serde(default)]
    pub details: Option<CompetitionDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorPayload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub abbreviation: String,
    pub home_away: HomeAway,
    #[serde(default)]
    pub score: Option<ScoreValue>,
}

/// Providers send scores as numbers or numeric strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreValue {
    Number(u32),
    Text(String),
}

impl ScoreValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ScoreValue::Number(n) => Some(*n),
            ScoreValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl ScoreboardPayload {
    pub fn period(&self) -> Period {
        Period::new(self.season.clone(), self.period.clone(), self.period_type)
    }
}

impl EventPayload {
    pub fn to_competition(&self, sport: &str, period: &Period) -> Competition {
        let mut competition = Competition::new(sport, &self.id, period);
        competition.start_time = self.start_time;
        competition.status = CompetitionStatus::parse_lenient(&self.status);
        competition.teams = self
            .competitors
            .iter()
            .map(|c| Team {
                external_id: c.id.clone(),
                name: c.name.clone(),
                abbreviation: if c.abbreviation.is_empty() {
                    c.name.clone()
                } else {
                    c.abbreviation.clone()
                },
                home_away: c.home_away,
                score: c.score.as_ref().and_then(ScoreValue::as_u32),
            })
            .collect();
        competition
    }
}

pub(crate) fn parse_payload<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, SourceError> {
    serde_json::from_slice(bytes).map_err(|e| SourceError::Parse(format!("{what}: {e}")))
}
