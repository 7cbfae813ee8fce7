use scoreline_core::{Period, PeriodType};
use serde::{Deserialize, Serialize};

pub const SKIP_NO_COMPETITIONS: &str = "no competitions found";
pub const SKIP_ALREADY_POPULATED: &str = "already populated";

/// Outcome of one period within a run. Built fresh per run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodResult {
    pub period: String,
    pub period_type: PeriodType,
    pub existing_count: usize,
    pub fetched_count: usize,
    pub added_count: usize,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PeriodResult {
    pub fn new(period: &Period) -> Self {
        Self {
            period: period.period.clone(),
            period_type: period.period_type,
            existing_count: 0,
            fetched_count: 0,
            added_count: 0,
            skipped: false,
            skip_reason: None,
            error: None,
        }
    }

    pub fn skip(&mut self, reason: &str) {
        self.skipped = true;
        self.skip_reason = Some(reason.to_string());
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.period_type, self.period)
    }
}

/// Aggregate report of one backfill run, also the `--json` output of the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillResult {
    pub season: String,
    /// 0 means unbounded.
    pub limit: usize,
    pub limit_reached: bool,
    pub periods_processed: usize,
    pub competitions_added: usize,
    /// One entry per failed period.
    pub errors: Vec<String>,
    pub period_results: Vec<PeriodResult>,
    #[serde(default)]
    pub cancelled: bool,
}

impl BackfillResult {
    pub fn new(season: &str, limit: usize) -> Self {
        Self {
            season: season.to_string(),
            limit,
            limit_reached: false,
            periods_processed: 0,
            competitions_added: 0,
            errors: Vec::new(),
            period_results: Vec::new(),
            cancelled: false,
        }
    }

    /// Folds one period into the totals.
    pub fn record(&mut self, result: PeriodResult) {
        self.periods_processed += 1;
        self.competitions_added += result.added_count;
        if let Some(error) = &result.error {
            self.errors.push(format!("{}: {}", result.label(), error));
        }
        self.period_results.push(result);
    }

    /// Remaining budget for the next period; 0 means unbounded.
    pub fn remaining(&self) -> usize {
        if self.limit == 0 {
            0
        } else {
            self.limit.saturating_sub(self.competitions_added)
        }
    }

    pub fn limit_hit(&self) -> bool {
        self.limit > 0 && self.competitions_added >= self.limit
    }

    /// Callers exit non-zero on this; `limit_reached` alone is not a failure.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "season {}: {} periods processed, {} competitions added, {} errors{}{}",
            self.season,
            self.periods_processed,
            self.competitions_added,
            self.errors.len(),
            if self.limit_reached { ", limit reached" } else { "" },
            if self.cancelled { ", cancelled" } else { "" },
        )
    }
}
