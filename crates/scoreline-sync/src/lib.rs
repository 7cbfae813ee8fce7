//! Ingestion engine: dedup-aware period fetch, season backfill, latest-period
//! sync, rating backfill, the in-process scheduled job queue and the
//! background service that ties them together.

mod backfill;
mod config;
mod fetcher;
mod latest;
mod queue;
mod ratings;
mod report;
mod service;

#[cfg(test)]
mod testing;

pub use backfill::{Backfill, BackfillOptions, PeriodIngestor};
pub use config::{Components, SyncConfig};
pub use fetcher::{FetchMode, PeriodFetch, PeriodFetchError, PeriodFetcher};
pub use latest::LatestSync;
pub use queue::{handler_fn, HandlerFuture, JobHandler, JobQueue, QueueError, DEFAULT_QUEUE_CAPACITY};
pub use ratings::{
    rating_job, FillSummary, RatingBackfill, RatingJobHandler, RatingJobPayload,
    DEFAULT_RATING_DELAY, RATING_JOB_TYPE,
};
pub use report::{BackfillResult, PeriodResult, SKIP_ALREADY_POPULATED, SKIP_NO_COMPETITIONS};
pub use service::BackgroundService;

pub const CRATE_NAME: &str = "scoreline-sync";
