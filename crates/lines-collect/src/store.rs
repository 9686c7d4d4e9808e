//! File-backed snapshot store.
//!
//! One JSON document per snapshot key: week snapshots live under
//! `{base}/{league}/{kind}/{season}/weeks/{week}.json`, season rollups at
//! `{base}/{league}/{kind}/{season}.json`. Saves are atomic (temp file in
//! the target directory, then rename) so a crashed run never leaves a
//! half-written snapshot behind.

use std::fs;
use std::path::{Path, PathBuf};

use lines_common::{DataKind, Observation};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Address of one stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub league: String,
    pub kind: DataKind,
    pub season: u16,
    /// `None` addresses the season rollup.
    pub week: Option<u8>,
}

impl SnapshotKey {
    pub fn week(league: &str, kind: DataKind, season: u16, week: u8) -> Self {
        Self {
            league: league.to_string(),
            kind,
            season,
            week: Some(week),
        }
    }

    pub fn season(league: &str, kind: DataKind, season: u16) -> Self {
        Self {
            league: league.to_string(),
            kind,
            season,
            week: None,
        }
    }

    fn path(&self, base: &Path) -> PathBuf {
        let kind_dir = base.join(&self.league).join(self.kind.as_str());
        match self.week {
            Some(week) => kind_dir
                .join(self.season.to_string())
                .join("weeks")
                .join(format!("{}.json", week)),
            None => kind_dir.join(format!("{}.json", self.season)),
        }
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.week {
            Some(week) => write!(
                f,
                "{}/{}/{} week {}",
                self.league, self.kind, self.season, week
            ),
            None => write!(f, "{}/{}/{} season", self.league, self.kind, self.season),
        }
    }
}

/// Loads and saves observation collections keyed by `SnapshotKey`.
pub struct SnapshotStore {
    base_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Loads a snapshot. A missing file is an empty snapshot, not an error.
    pub fn load(&self, key: &SnapshotKey) -> Result<Vec<Observation>, StoreError> {
        let path = key.path(&self.base_dir);
        if !path.exists() {
            debug!("No stored snapshot for {}", key);
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)?;
        let observations: Vec<Observation> = serde_json::from_str(&content)?;
        debug!("Loaded {} rows for {}", observations.len(), key);
        Ok(observations)
    }

    /// Saves a snapshot atomically, creating parent directories as needed.
    pub fn save(&self, key: &SnapshotKey, observations: &[Observation]) -> Result<(), StoreError> {
        let path = key.path(&self.base_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(observations)?;
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &path)?;

        info!("Saved {} rows for {}", observations.len(), key);
        Ok(())
    }
}
