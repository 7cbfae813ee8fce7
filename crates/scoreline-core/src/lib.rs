//! Core domain model for Scoreline: periods, competitions, ratings and deferred jobs.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod periods;

pub use periods::{periods, MODELED_SPORT, PLAYOFF_PERIODS, REGULAR_PERIODS};

pub const CRATE_NAME: &str = "scoreline-core";

/// Namespace for local competition ids derived from `(sport, external_id)`.
const COMPETITION_NAMESPACE: Uuid = Uuid::from_u128(0x5c0e_11fe_2d6a_4b7e_9a51_c0de_0000_0001);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Preseason,
    Regular,
    Playoff,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Preseason => "preseason",
            PeriodType::Regular => "regular",
            PeriodType::Playoff => "playoff",
        }
    }

    /// Position within a season, earliest first.
    fn rank(&self) -> u8 {
        match self {
            PeriodType::Preseason => 0,
            PeriodType::Regular => 1,
            PeriodType::Playoff => 2,
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preseason" | "pre" => Ok(PeriodType::Preseason),
            "regular" | "reg" => Ok(PeriodType::Regular),
            "playoff" | "playoffs" | "post" | "postseason" => Ok(PeriodType::Playoff),
            other => Err(format!("unknown period type: {other}")),
        }
    }
}

/// One time partition of a season, e.g. regular-season week 3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub season: String,
    pub period: String,
    pub period_type: PeriodType,
}

impl Period {
    pub fn new(season: impl Into<String>, period: impl Into<String>, period_type: PeriodType) -> Self {
        Self {
            season: season.into(),
            period: period.into(),
            period_type,
        }
    }

    /// Compares two periods by recency: season, then preseason < regular < playoff,
    /// then the numeric period (non-numeric periods sort after numeric ones).
    pub fn recency_cmp(&self, other: &Period) -> Ordering {
        self.season
            .cmp(&other.season)
            .then(self.period_type.rank().cmp(&other.period_type.rank()))
            .then_with(|| match (self.period_number(), other.period_number()) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => self.period.cmp(&other.period),
            })
    }

    pub fn period_number(&self) -> Option<u32> {
        self.period.trim().parse().ok()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.season, self.period_type, self.period)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatus {
    Scheduled,
    InProgress,
    Final,
    Postponed,
    Canceled,
    #[default]
    Unknown,
}

impl CompetitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompetitionStatus::Scheduled => "scheduled",
            CompetitionStatus::InProgress => "in_progress",
            CompetitionStatus::Final => "final",
            CompetitionStatus::Postponed => "postponed",
            CompetitionStatus::Canceled => "canceled",
            CompetitionStatus::Unknown => "unknown",
        }
    }

    /// Lenient parse of provider status strings; unrecognised values map to `Unknown`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "scheduled" | "pre" | "status_scheduled" => CompetitionStatus::Scheduled,
            "in_progress" | "in" | "live" | "status_in_progress" => CompetitionStatus::InProgress,
            "final" | "post" | "status_final" | "completed" => CompetitionStatus::Final,
            "postponed" | "status_postponed" => CompetitionStatus::Postponed,
            "canceled" | "cancelled" | "status_canceled" => CompetitionStatus::Canceled,
            _ => CompetitionStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeAway {
    Home,
    Away,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub external_id: String,
    pub name: String,
    pub abbreviation: String,
    pub home_away: HomeAway,
    pub score: Option<u32>,
}

/// Secondary payload fetched per competition after the scoreboard listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompetitionDetails {
    pub venue: Option<String>,
    pub attendance: Option<u32>,
    pub headline: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub broadcasts: Vec<String>,
}

/// Derived analysis value attached to a competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub competition_id: Uuid,
    pub rating_type: String,
    pub value: String,
    pub rationale: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl Rating {
    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub id: Uuid,
    pub external_id: String,
    pub sport: String,
    pub season: String,
    pub period: String,
    pub period_type: PeriodType,
    pub start_time: Option<DateTime<Utc>>,
    pub status: CompetitionStatus,
    pub teams: Vec<Team>,
    pub details: Option<CompetitionDetails>,
    pub rating: Option<Rating>,
}

impl Competition {
    /// Builds a competition with its local id derived from `(sport, external_id)`.
    pub fn new(sport: &str, external_id: &str, period: &Period) -> Self {
        Self {
            id: competition_id(sport, external_id),
            external_id: external_id.to_string(),
            sport: sport.to_string(),
            season: period.season.clone(),
            period: period.period.clone(),
            period_type: period.period_type,
            start_time: None,
            status: CompetitionStatus::Unknown,
            teams: Vec::new(),
            details: None,
            rating: None,
        }
    }

    pub fn period_key(&self) -> Period {
        Period::new(self.season.clone(), self.period.clone(), self.period_type)
    }

    pub fn home(&self) -> Option<&Team> {
        self.teams.iter().find(|t| t.home_away == HomeAway::Home)
    }

    pub fn away(&self) -> Option<&Team> {
        self.teams.iter().find(|t| t.home_away == HomeAway::Away)
    }

    pub fn is_final(&self) -> bool {
        self.status == CompetitionStatus::Final
    }

    /// Short "AWY @ HOM" label for logs.
    pub fn matchup(&self) -> String {
        match (self.away(), self.home()) {
            (Some(away), Some(home)) => format!("{} @ {}", away.abbreviation, home.abbreviation),
            _ => self.external_id.clone(),
        }
    }
}

/// Stable local id for a remote competition.
pub fn competition_id(sport: &str, external_id: &str) -> Uuid {
    Uuid::new_v5(&COMPETITION_NAMESPACE, format!("{sport}:{external_id}").as_bytes())
}

/// Unit of deferred work owned by the in-process job queue until dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Vec<u8>,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: impl Into<String>, payload: Vec<u8>, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            payload,
            scheduled_for,
            created_at: Utc::now(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for <= now
    }
}
