use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use scoreline_core::{Competition, Period, Rating};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Repository;

/// Process-local repository, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    // keyed by local id, which is derived from (sport, external_id)
    competitions: BTreeMap<Uuid, Competition>,
    ratings: HashMap<(Uuid, String), Rating>,
    save_calls: usize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.competitions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of `save_competition` calls, including ones that updated an existing row.
    pub async fn save_calls(&self) -> usize {
        self.state.read().await.save_calls
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find_by_period(&self, sport: &str, period: &Period) -> anyhow::Result<Vec<Competition>> {
        let state = self.state.read().await;
        Ok(state
            .competitions
            .values()
            .filter(|c| {
                c.sport == sport
                    && c.season == period.season
                    && c.period == period.period
                    && c.period_type == period.period_type
            })
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Competition>> {
        Ok(self.state.read().await.competitions.get(&id).cloned())
    }

    async fn save_competition(&self, competition: &Competition) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        state.save_calls += 1;
        let mut incoming = competition.clone();
        if let Some(existing) = state.competitions.get(&competition.id) {
            // upsert keeps whatever the incoming record does not carry
            if incoming.details.is_none() {
                incoming.details = existing.details.clone();
            }
            if incoming.rating.is_none() {
                incoming.rating = existing.rating.clone();
            }
            if incoming.start_time.is_none() {
                incoming.start_time = existing.start_time;
            }
        }
        state.competitions.insert(competition.id, incoming);
        Ok(())
    }

    async fn available_periods(&self, sport: &str) -> anyhow::Result<Vec<Period>> {
        let state = self.state.read().await;
        let mut periods: Vec<Period> = Vec::new();
        for competition in state.competitions.values().filter(|c| c.sport == sport) {
            let key = competition.period_key();
            if !periods.contains(&key) {
                periods.push(key);
            }
        }
        periods.sort_by(|a, b| a.recency_cmp(b));
        Ok(periods)
    }

    async fn load_rating(&self, competition_id: Uuid, rating_type: &str) -> anyhow::Result<Option<Rating>> {
        let state = self.state.read().await;
        Ok(state
            .ratings
            .get(&(competition_id, rating_type.to_string()))
            .cloned())
    }

    async fn save_rating(&self, rating: &Rating) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        state
            .ratings
            .insert((rating.competition_id, rating.rating_type.clone()), rating.clone());
        if let Some(competition) = state.competitions.get_mut(&rating.competition_id) {
            competition.rating = Some(rating.clone());
        }
        Ok(())
    }
}
