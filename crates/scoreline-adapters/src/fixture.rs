use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scoreline_core::{Competition, CompetitionDetails, Period};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{parse_payload, DataSource, ScoreboardPayload, SourceError};

/// Reads scoreboards from a fixture tree:
///
/// ```text
/// <root>/<sport>/latest.json
/// <root>/<sport>/<season>/<period_type>-<period>.json
/// <root>/<sport>/details/<external_id>.json
/// ```
///
/// A missing period file means the provider has no competitions for it.
/// Details come from the detail file or, failing that, from the `details`
/// object inlined in a scoreboard event seen earlier.
#[derive(Debug)]
pub struct FixtureDataSource {
    root: PathBuf,
    inline_details: Mutex<HashMap<(String, String), CompetitionDetails>>,
}

impl FixtureDataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inline_details: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scoreboard_path(&self, sport: &str, period: &Period) -> PathBuf {
        self.root
            .join(sport)
            .join(&period.season)
            .join(format!("{}-{}.json", period.period_type, period.period))
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, SourceError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SourceError::Transport(format!("reading {}: {err}", path.display()))),
        }
    }

    async fn read_scoreboard(&self, path: &Path) -> Result<Option<ScoreboardPayload>, SourceError> {
        let Some(bytes) = Self::read_optional(path).await? else {
            return Ok(None);
        };
        let label = path.display().to_string();
        parse_payload(&bytes, &label).map(Some)
    }
}

#[async_trait]
impl DataSource for FixtureDataSource {
    async fn latest_period(&self, sport: &str) -> Result<Option<Period>, SourceError> {
        let path = self.root.join(sport).join("latest.json");
        Ok(self.read_scoreboard(&path).await?.map(|s| s.period()))
    }

    async fn competitions(&self, sport: &str, period: &Period) -> Result<Vec<Competition>, SourceError> {
        let path = self.scoreboard_path(sport, period);
        let Some(scoreboard) = self.read_scoreboard(&path).await? else {
            debug!(sport, %period, path = %path.display(), "no fixture for period");
            return Ok(Vec::new());
        };

        let mut inline = self.inline_details.lock().await;
        for event in &scoreboard.events {
            if let Some(details) = &event.details {
                inline.insert((sport.to_string(), event.id.clone()), details.clone());
            }
        }
        drop(inline);

        // the file is authoritative for which period it describes
        Ok(scoreboard
            .events
            .iter()
            .map(|event| event.to_competition(sport, period))
            .collect())
    }

    async fn competition_details(
        &self,
        sport: &str,
        external_id: &str,
    ) -> Result<Option<CompetitionDetails>, SourceError> {
        let path = self
            .root
            .join(sport)
            .join("details")
            .join(format!("{external_id}.json"));
        if let Some(bytes) = Self::read_optional(&path).await? {
            return parse_payload(&bytes, &path.display().to_string()).map(Some);
        }
        let inline = self.inline_details.lock().await;
        Ok(inline.get(&(sport.to_string(), external_id.to_string())).cloned())
    }
}
