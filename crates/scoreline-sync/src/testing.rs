//! In-memory fakes shared by the unit tests of this crate.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use scoreline_adapters::{AnalysisService, DataSource, SourceError};
use scoreline_core::{
    Competition, CompetitionDetails, CompetitionStatus, HomeAway, Period, Rating, Team,
};
use scoreline_storage::{MemoryRepository, Repository};
use uuid::Uuid;

pub(crate) fn game(external_id: &str, period: &Period) -> Competition {
    let mut c = Competition::new("nfl", external_id, period);
    c.status = CompetitionStatus::Scheduled;
    c.teams = vec![
        team("KC", HomeAway::Home, None),
        team("BUF", HomeAway::Away, None),
    ];
    c
}

pub(crate) fn final_game(external_id: &str, period: &Period, home: u32, away: u32) -> Competition {
    let mut c = game(external_id, period);
    c.status = CompetitionStatus::Final;
    c.teams = vec![
        team("KC", HomeAway::Home, Some(home)),
        team("BUF", HomeAway::Away, Some(away)),
    ];
    c
}

fn team(abbreviation: &str, home_away: HomeAway, score: Option<u32>) -> Team {
    Team {
        external_id: abbreviation.to_lowercase(),
        name: abbreviation.to_string(),
        abbreviation: abbreviation.to_string(),
        home_away,
        score,
    }
}

/// Scripted data source: periods map to a listing or a transport failure.
#[derive(Default)]
pub(crate) struct MockSource {
    latest: Mutex<Option<Period>>,
    listings: Mutex<HashMap<Period, Result<Vec<Competition>, String>>>,
    broken_details: Mutex<HashSet<String>>,
    pub(crate) listing_calls: AtomicUsize,
}

impl MockSource {
    pub(crate) fn with_listing(self, period: &Period, competitions: Vec<Competition>) -> Self {
        self.listings
            .lock()
            .unwrap()
            .insert(period.clone(), Ok(competitions));
        self
    }

    pub(crate) fn with_failure(self, period: &Period, message: &str) -> Self {
        self.listings
            .lock()
            .unwrap()
            .insert(period.clone(), Err(message.to_string()));
        self
    }

    pub(crate) fn with_broken_details(self, external_id: &str) -> Self {
        self.broken_details
            .lock()
            .unwrap()
            .insert(external_id.to_string());
        self
    }

    pub(crate) fn with_latest(self, period: &Period) -> Self {
        *self.latest.lock().unwrap() = Some(period.clone());
        self
    }
}

#[async_trait]
impl DataSource for MockSource {
    async fn latest_period(&self, _sport: &str) -> Result<Option<Period>, SourceError> {
        Ok(self.latest.lock().unwrap().clone())
    }

    async fn competitions(&self, _sport: &str, period: &Period) -> Result<Vec<Competition>, SourceError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        match self.listings.lock().unwrap().get(period) {
            Some(Ok(list)) => Ok(list.clone()),
            Some(Err(message)) => Err(SourceError::Transport(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    async fn competition_details(
        &self,
        _sport: &str,
        external_id: &str,
    ) -> Result<Option<CompetitionDetails>, SourceError> {
        if self.broken_details.lock().unwrap().contains(external_id) {
            return Err(SourceError::Parse(format!("details for {external_id}")));
        }
        Ok(Some(CompetitionDetails {
            venue: Some("Arrowhead Stadium".into()),
            headline: Some(format!("recap {external_id}")),
            ..CompetitionDetails::default()
        }))
    }
}

pub(crate) struct FailingAnalysis;

#[async_trait]
impl AnalysisService for FailingAnalysis {
    fn rating_type(&self) -> &str {
        "excitement"
    }

    async fn produce(&self, _competition: &Competition) -> anyhow::Result<Rating> {
        anyhow::bail!("model unavailable")
    }
}

/// Memory repository that refuses chosen writes and period reads.
#[derive(Default)]
pub(crate) struct FailingRepository {
    pub(crate) inner: MemoryRepository,
    rejected_saves: Mutex<HashSet<String>>,
    unreadable: Mutex<HashSet<Period>>,
}

impl FailingRepository {
    /// Saving `external_id` fails every time.
    pub(crate) fn reject_save(self, external_id: &str) -> Self {
        self.rejected_saves
            .lock()
            .unwrap()
            .insert(external_id.to_string());
        self
    }

    pub(crate) fn unreadable_period(self, period: &Period) -> Self {
        self.unreadable.lock().unwrap().insert(period.clone());
        self
    }
}

#[async_trait]
impl Repository for FailingRepository {
    async fn find_by_period(&self, sport: &str, period: &Period) -> anyhow::Result<Vec<Competition>> {
        if self.unreadable.lock().unwrap().contains(period) {
            anyhow::bail!("connection pool exhausted");
        }
        self.inner.find_by_period(sport, period).await
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Competition>> {
        self.inner.find_by_id(id).await
    }

    async fn save_competition(&self, competition: &Competition) -> anyhow::Result<()> {
        if self.rejected_saves.lock().unwrap().contains(&competition.external_id) {
            anyhow::bail!("unique violation on {}", competition.external_id);
        }
        self.inner.save_competition(competition).await
    }

    async fn available_periods(&self, sport: &str) -> anyhow::Result<Vec<Period>> {
        self.inner.available_periods(sport).await
    }

    async fn load_rating(&self, competition_id: Uuid, rating_type: &str) -> anyhow::Result<Option<Rating>> {
        self.inner.load_rating(competition_id, rating_type).await
    }

    async fn save_rating(&self, rating: &Rating) -> anyhow::Result<()> {
        self.inner.save_rating(rating).await
    }
}
