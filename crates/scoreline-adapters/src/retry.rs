use std::future::Future;

use async_trait::async_trait;
use scoreline_core::{Competition, CompetitionDetails, Period};
use scoreline_storage::BackoffPolicy;
use tracing::warn;

use crate::{DataSource, SourceError};

/// Retries retryable [`SourceError`]s of any data source according to an
/// injected [`BackoffPolicy`]. A provider `retry_after` hint wins over the
/// policy delay when it is longer (still capped by `max_delay`).
pub struct RetryingDataSource<D> {
    inner: D,
    policy: BackoffPolicy,
}

impl<D: DataSource> RetryingDataSource<D> {
    pub fn new(inner: D, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    async fn with_retries<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, SourceError>> + Send,
        T: Send,
    {
        let mut attempt = 0usize;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    let mut delay = self.policy.delay_for_attempt(attempt);
                    if let SourceError::RateLimited {
                        retry_after: Some(hint),
                    } = &err
                    {
                        delay = delay.max((*hint).min(self.policy.max_delay));
                    }
                    warn!(op, attempt, ?delay, error = %err, "data source call failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<D: DataSource> DataSource for RetryingDataSource<D> {
    async fn latest_period(&self, sport: &str) -> Result<Option<Period>, SourceError> {
        self.with_retries("latest_period", || self.inner.latest_period(sport))
            .await
    }

    async fn competitions(&self, sport: &str, period: &Period) -> Result<Vec<Competition>, SourceError> {
        self.with_retries("competitions", || self.inner.competitions(sport, period))
            .await
    }

    async fn competition_details(
        &self,
        sport: &str,
        external_id: &str,
    ) -> Result<Option<CompetitionDetails>, SourceError> {
        self.with_retries("competition_details", || {
            self.inner.competition_details(sport, external_id)
        })
        .await
    }
}
