use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Which provider document a raw payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Scoreboard,
    Latest,
    Details,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Scoreboard => "scoreboard",
            PayloadKind::Latest => "latest",
            PayloadKind::Details => "details",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub sha256: String,
    pub path: PathBuf,
    pub bytes: usize,
    /// The same payload was already archived that day.
    pub reused: bool,
}

/// Write-once archive of raw provider JSON:
/// `<root>/<yyyymmdd>/<sport>/<kind>/<sha256>.json`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn path_for(&self, fetched_at: DateTime<Utc>, sport: &str, kind: PayloadKind, sha256: &str) -> PathBuf {
        self.root
            .join(fetched_at.format("%Y%m%d").to_string())
            .join(sport)
            .join(kind.as_str())
            .join(format!("{sha256}.json"))
    }

    pub async fn archive(
        &self,
        fetched_at: DateTime<Utc>,
        sport: &str,
        kind: PayloadKind,
        body: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let sha256 = Self::sha256_hex(body);
        let path = self.path_for(fetched_at, sport, kind, &sha256);
        let mut stored = StoredArtifact {
            sha256,
            path,
            bytes: body.len(),
            reused: false,
        };

        if fs::try_exists(&stored.path).await.unwrap_or(false) {
            stored.reused = true;
            return Ok(stored);
        }

        let dir = stored
            .path
            .parent()
            .with_context(|| format!("{} has no parent directory", stored.path.display()))?;
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        // readers never observe a half-written payload
        let staging = dir.join(format!(".{}.partial", Uuid::new_v4()));
        fs::write(&staging, body)
            .await
            .with_context(|| format!("writing {}", staging.display()))?;
        if let Err(err) = fs::rename(&staging, &stored.path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err).with_context(|| format!("publishing {}", stored.path.display()));
        }

        debug!(sport, %kind, path = %stored.path.display(), bytes = stored.bytes, "raw payload archived");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        assert_eq!(
            ArtifactStore::sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn same_payload_same_day_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let fetched_at = DateTime::parse_from_rfc3339("2024-09-08T17:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let body = br#"{"events":[]}"#;

        let first = store.archive(fetched_at, "nfl", PayloadKind::Scoreboard, body).await.unwrap();
        let second = store.archive(fetched_at, "nfl", PayloadKind::Scoreboard, body).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.path, second.path);
        assert!(first.path.starts_with(dir.path().join("20240908/nfl/scoreboard")));
        assert_eq!(std::fs::read(&first.path).unwrap(), body);

        let other = store.archive(fetched_at, "nfl", PayloadKind::Details, body).await.unwrap();
        assert_ne!(other.path, first.path);
    }
}
