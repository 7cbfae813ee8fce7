//! Persistence for Scoreline: the competition repository contract and its
//! in-memory and Postgres implementations, immutable raw-payload storage, and
//! the rate-limited HTTP fetch utilities used by provider clients.

mod artifacts;
mod http;
mod memory;
mod postgres;

use async_trait::async_trait;
use scoreline_core::{Competition, Period, Rating};
use uuid::Uuid;

pub use artifacts::{ArtifactStore, PayloadKind, StoredArtifact};
pub use http::{BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, RequestPacer};
pub use memory::MemoryRepository;
pub use postgres::PgRepository;

pub const CRATE_NAME: &str = "scoreline-storage";

/// Storage contract consumed by the ingestion engine.
///
/// `save_competition` must be an idempotent upsert keyed by
/// `(sport, external_id)`: concurrent ingestion paths may both decide an item
/// is new, and the second write has to land on the first row.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_by_period(&self, sport: &str, period: &Period) -> anyhow::Result<Vec<Competition>>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Competition>>;

    async fn save_competition(&self, competition: &Competition) -> anyhow::Result<()>;

    /// Periods that currently hold at least one stored competition.
    async fn available_periods(&self, sport: &str) -> anyhow::Result<Vec<Period>>;

    async fn load_rating(&self, competition_id: Uuid, rating_type: &str) -> anyhow::Result<Option<Rating>>;

    async fn save_rating(&self, rating: &Rating) -> anyhow::Result<()>;
}
