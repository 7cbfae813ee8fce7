//! Provider HTTP access: one shared client, concurrency caps per provider,
//! request pacing and bounded retries on throttling and server errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

/// Exponential backoff: `base * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_provider_concurrency: usize,
    pub backoff: BackoffPolicy,
    /// Minimum spacing between request starts; `None` sends as fast as the caps allow.
    pub min_interval: Option<Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 8,
            per_provider_concurrency: 2,
            backoff: BackoffPolicy::default(),
            min_interval: None,
        }
    }
}

/// Hands out request start slots at most once per `interval`.
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub async fn wait_turn(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus {
        status: u16,
        url: String,
        retry_after: Option<Duration>,
    },
    #[error("fetcher is shut down")]
    Closed,
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
            FetchError::Closed => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// Provider-supplied wait, from a `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Throttling, 5xx, timeouts and connection failures.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Request(err) => err.is_timeout() || err.is_connect(),
            FetchError::Closed => false,
        }
    }
}

/// Shared provider client.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global: Semaphore,
    per_provider_limit: usize,
    per_provider: StdMutex<HashMap<String, Arc<Semaphore>>>,
    pacer: Option<RequestPacer>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build().context("building provider http client")?,
            global: Semaphore::new(config.global_concurrency.max(1)),
            per_provider_limit: config.per_provider_concurrency.max(1),
            per_provider: StdMutex::new(HashMap::new()),
            pacer: config.min_interval.map(RequestPacer::new),
            backoff: config.backoff,
        })
    }

    fn provider_slots(&self, provider: &str) -> Arc<Semaphore> {
        let mut slots = self
            .per_provider
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_provider_limit))),
        )
    }

    /// GETs `url` on behalf of `provider` (the sport key for scoreboard APIs).
    pub async fn fetch_bytes(&self, provider: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let _global = self.global.acquire().await.map_err(|_| FetchError::Closed)?;
        let slots = self.provider_slots(provider);
        let _slot = slots.acquire().await.map_err(|_| FetchError::Closed)?;

        let mut attempt = 0usize;
        loop {
            if let Some(pacer) = &self.pacer {
                pacer.wait_turn().await;
            }
            let outcome = self
                .get_once(url)
                .instrument(info_span!("http_fetch", provider, url, attempt))
                .await;

            match outcome {
                Err(err) if err.is_transient() && attempt < self.backoff.max_retries => {
                    let mut delay = self.backoff.delay_for_attempt(attempt);
                    if let Some(hint) = err.retry_after() {
                        delay = delay.max(hint.min(self.backoff.max_delay));
                    }
                    debug!(provider, url, attempt, ?delay, error = %err, "transient fetch failure; backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn get_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
                retry_after: retry_after(&resp),
            });
        }
        let body = resp.bytes().await?.to_vec();
        debug!(%status, bytes = body.len(), "fetched");
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    let raw = resp.headers().get(RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}
