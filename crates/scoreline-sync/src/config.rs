use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scoreline_adapters::{
    AnalysisService, DataSource, FixtureDataSource, HeuristicAnalysis, HttpDataSource,
    RetryingDataSource,
};
use scoreline_storage::{
    ArtifactStore, BackoffPolicy, HttpClientConfig, HttpFetcher, MemoryRepository, PgRepository,
    Repository,
};
use tracing::{info, warn};

use crate::backfill::PeriodIngestor;
use crate::latest::LatestSync;
use crate::queue::{JobQueue, DEFAULT_QUEUE_CAPACITY};
use crate::ratings::{RatingBackfill, DEFAULT_RATING_DELAY};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub sport: String,
    pub provider_url: Option<String>,
    pub fixtures_dir: PathBuf,
    pub artifacts_dir: Option<PathBuf>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Minimum spacing between provider requests, in milliseconds.
    pub http_min_interval_ms: Option<u64>,
    pub latest_sync_every: Duration,
    pub rating_fill_every: Duration,
    pub rating_recent_periods: Option<usize>,
    pub rating_delay: Duration,
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            sport: "nfl".to_string(),
            provider_url: None,
            fixtures_dir: PathBuf::from("./fixtures"),
            artifacts_dir: None,
            user_agent: "scoreline-bot/0.1".to_string(),
            http_timeout_secs: 20,
            http_min_interval_ms: None,
            latest_sync_every: Duration::from_secs(3600),
            rating_fill_every: Duration::from_secs(1800),
            rating_recent_periods: None,
            rating_delay: DEFAULT_RATING_DELAY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_string("DATABASE_URL"),
            sport: env_string("SCORELINE_SPORT").unwrap_or(defaults.sport),
            provider_url: env_string("SCORELINE_PROVIDER_URL"),
            fixtures_dir: env_string("SCORELINE_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.fixtures_dir),
            artifacts_dir: env_string("ARTIFACTS_DIR").map(PathBuf::from),
            user_agent: env_string("SCORELINE_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("SCORELINE_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            http_min_interval_ms: env_parse("SCORELINE_HTTP_MIN_INTERVAL_MS"),
            latest_sync_every: env_parse("SCORELINE_LATEST_SYNC_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.latest_sync_every),
            rating_fill_every: env_parse("SCORELINE_RATING_FILL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rating_fill_every),
            rating_recent_periods: env_parse("SCORELINE_RATING_RECENT_PERIODS"),
            rating_delay: env_parse("SCORELINE_RATING_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rating_delay),
            queue_capacity: env_parse("SCORELINE_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
        }
    }

    fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            // retries happen one layer up, in RetryingDataSource
            backoff: BackoffPolicy::none(),
            min_interval: self
                .http_min_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            ..HttpClientConfig::default()
        }
    }
}

/// The wired-up collaborators every command needs.
#[derive(Clone)]
pub struct Components {
    pub config: SyncConfig,
    pub repository: Arc<dyn Repository>,
    pub source: Arc<dyn DataSource>,
    pub analysis: Arc<dyn AnalysisService>,
    pub queue: JobQueue,
    /// Present when the repository is Postgres-backed.
    pub postgres: Option<PgRepository>,
}

impl Components {
    pub async fn build(config: SyncConfig) -> Result<Self> {
        let (repository, postgres): (Arc<dyn Repository>, Option<PgRepository>) =
            match &config.database_url {
                Some(url) => {
                    let pg = PgRepository::connect(url).await?;
                    info!("using postgres repository");
                    (Arc::new(pg.clone()), Some(pg))
                }
                None => {
                    warn!("DATABASE_URL not set; using in-memory repository");
                    (Arc::new(MemoryRepository::new()), None)
                }
            };

        let source: Arc<dyn DataSource> = match &config.provider_url {
            Some(base_url) => {
                let http = Arc::new(
                    HttpFetcher::new(config.http_config()).context("building provider http client")?,
                );
                let mut provider = HttpDataSource::new(base_url.clone(), http);
                if let Some(dir) = &config.artifacts_dir {
                    provider = provider.with_archive(ArtifactStore::new(dir.clone()));
                }
                info!(base_url = %base_url, "using http data source");
                Arc::new(RetryingDataSource::new(provider, BackoffPolicy::default()))
            }
            None => {
                info!(dir = %config.fixtures_dir.display(), "using fixture data source");
                Arc::new(RetryingDataSource::new(
                    FixtureDataSource::new(config.fixtures_dir.clone()),
                    BackoffPolicy::default(),
                ))
            }
        };

        Ok(Self {
            queue: JobQueue::new(config.queue_capacity),
            analysis: Arc::new(HeuristicAnalysis::new()),
            repository,
            source,
            postgres,
            config,
        })
    }

    /// Ingestor that queues deferred ratings for final games.
    pub fn ingestor(&self) -> PeriodIngestor {
        PeriodIngestor::new(Arc::clone(&self.source), Arc::clone(&self.repository))
            .with_rating_jobs(self.queue.clone(), self.config.rating_delay)
    }

    pub fn ratings(&self) -> RatingBackfill {
        RatingBackfill::new(Arc::clone(&self.repository), Arc::clone(&self.analysis))
            .with_recent_periods(self.config.rating_recent_periods)
    }

    pub fn latest_sync(&self) -> LatestSync {
        LatestSync::new(Arc::clone(&self.source), self.ingestor()).with_ratings(self.ratings())
    }
}
