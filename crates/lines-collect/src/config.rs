//! Configuration for lines-collect.
//!
//! Supports loading from TOML file with CLI argument overrides. The provider
//! access token is never stored in the file; only the environment variable
//! name is, and the value is resolved at load time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use lines_common::{DataKind, KeySpec, Period};
use lines_engine::{EngineConfig, DEFAULT_OPEN_BOOK_ID, DEFAULT_OPEN_FALLBACK_PRIORITY};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::feed::{default_bet_type_overrides, FeedConfig};

/// Environment variable the provider token is read from by default.
const DEFAULT_TOKEN_ENV: &str = "ACTION_NETWORK_ACCESS_TOKEN";

/// Top-level configuration for lines-collect.
#[derive(Debug, Clone)]
pub struct CollectConfig {
    pub league: String,
    pub kinds: Vec<DataKind>,
    pub start_season: u16,
    pub end_season: u16,
    /// Canonical week currently in progress for `end_season`. `None` means
    /// every season is treated as completed.
    pub current_week: Option<u8>,
    pub store_dir: PathBuf,
    pub log_level: String,
    /// Abort the whole run on a week fetch failure instead of skipping it.
    pub abort_on_week_error: bool,
    /// Polite randomized sleep between week pulls.
    pub sleep_min: Duration,
    pub sleep_max: Duration,
    pub open_book_id: u32,
    pub fallback_priority: Vec<u32>,
    pub feed: FeedConfig,
}

impl Default for CollectConfig {
    fn default() -> Self {
        let season = season_for(Utc::now());
        Self {
            league: "nfl".to_string(),
            kinds: vec![DataKind::GameLines, DataKind::PlayerProps],
            start_season: 2020,
            end_season: season,
            current_week: None,
            store_dir: PathBuf::from("data/lines"),
            log_level: "info".to_string(),
            abort_on_week_error: false,
            sleep_min: Duration::from_millis(500),
            sleep_max: Duration::from_millis(4500),
            open_book_id: DEFAULT_OPEN_BOOK_ID,
            fallback_priority: DEFAULT_OPEN_FALLBACK_PRIORITY.to_vec(),
            feed: FeedConfig::default(),
        }
    }
}

impl CollectConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(
        &mut self,
        kinds: Option<Vec<String>>,
        store_dir: Option<PathBuf>,
        season: Option<u16>,
        current_week: Option<u8>,
    ) {
        if let Some(kind_strs) = kinds {
            let parsed: Vec<DataKind> = kind_strs
                .iter()
                .filter_map(|s| match s.parse() {
                    Ok(kind) => Some(kind),
                    Err(e) => {
                        warn!("{}", e);
                        None
                    }
                })
                .collect();
            if !parsed.is_empty() {
                self.kinds = parsed;
            }
        }

        if let Some(dir) = store_dir {
            self.store_dir = dir;
        }

        // A single-season override pins both ends of the range.
        if let Some(season) = season {
            self.start_season = season;
            self.end_season = season;
        }

        if let Some(week) = current_week {
            self.current_week = Some(week);
        }
    }

    /// Engine configuration for one data kind, with this config's
    /// opening-book settings applied.
    pub fn engine_config(&self, kind: DataKind) -> EngineConfig {
        let key_spec = match kind {
            DataKind::GameLines => KeySpec::game_lines(),
            DataKind::PlayerProps => KeySpec::player_props(),
        };
        EngineConfig {
            open_book_id: self.open_book_id,
            fallback_priority: self.fallback_priority.clone(),
            key_spec,
        }
    }
}

/// Season a given instant falls in; seasons roll over in August.
pub fn season_for(now: DateTime<Utc>) -> u16 {
    let year = now.year() as u16;
    if now.month() >= 8 {
        year
    } else {
        year - 1
    }
}

/// TOML file structure for deserialization.
#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    engine: EngineToml,
    #[serde(default)]
    feed: FeedToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    league: String,
    kinds: Vec<String>,
    start_season: u16,
    end_season: Option<u16>,
    current_week: Option<u8>,
    store_dir: String,
    log_level: String,
    abort_on_week_error: bool,
    sleep_min_ms: u64,
    sleep_max_ms: u64,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            league: "nfl".to_string(),
            kinds: vec!["game_lines".to_string(), "player_props".to_string()],
            start_season: 2020,
            end_season: None,
            current_week: None,
            store_dir: "data/lines".to_string(),
            log_level: "info".to_string(),
            abort_on_week_error: false,
            sleep_min_ms: 500,
            sleep_max_ms: 4500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EngineToml {
    open_book_id: u32,
    fallback_priority: Vec<u32>,
}

impl Default for EngineToml {
    fn default() -> Self {
        Self {
            open_book_id: DEFAULT_OPEN_BOOK_ID,
            fallback_priority: DEFAULT_OPEN_FALLBACK_PRIORITY.to_vec(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FeedToml {
    base_url: String,
    token_env: String,
    state_code: String,
    book_ids: Vec<u32>,
    periods: Vec<String>,
    timeout_secs: u64,
    max_retries: u32,
    base_backoff_ms: u64,
    max_backoff_secs: u64,
    /// Extra bet-type renames, merged over the built-in ones.
    bet_type_overrides: BTreeMap<String, String>,
}

impl Default for FeedToml {
    fn default() -> Self {
        let defaults = FeedConfig::default();
        Self {
            base_url: defaults.base_url,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            state_code: defaults.state_code,
            book_ids: defaults.book_ids,
            periods: Period::ALL.iter().map(|p| p.to_string()).collect(),
            timeout_secs: 20,
            max_retries: 5,
            base_backoff_ms: 500,
            max_backoff_secs: 8,
            bet_type_overrides: BTreeMap::new(),
        }
    }
}

impl From<TomlConfig> for CollectConfig {
    fn from(toml: TomlConfig) -> Self {
        let kinds: Vec<DataKind> = toml
            .general
            .kinds
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();

        let periods: Vec<Period> = toml
            .feed
            .periods
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();

        let mut bet_type_overrides = default_bet_type_overrides();
        bet_type_overrides.extend(toml.feed.bet_type_overrides);

        let end_season = toml
            .general
            .end_season
            .unwrap_or_else(|| season_for(Utc::now()));

        Self {
            league: toml.general.league.clone(),
            kinds,
            start_season: toml.general.start_season,
            end_season,
            current_week: toml.general.current_week,
            store_dir: PathBuf::from(toml.general.store_dir),
            log_level: toml.general.log_level,
            abort_on_week_error: toml.general.abort_on_week_error,
            sleep_min: Duration::from_millis(toml.general.sleep_min_ms),
            sleep_max: Duration::from_millis(toml.general.sleep_max_ms),
            open_book_id: toml.engine.open_book_id,
            fallback_priority: toml.engine.fallback_priority,
            feed: FeedConfig {
                base_url: toml.feed.base_url,
                league: toml.general.league,
                access_token: std::env::var(&toml.feed.token_env).ok(),
                state_code: toml.feed.state_code,
                book_ids: toml.feed.book_ids,
                periods,
                timeout: Duration::from_secs(toml.feed.timeout_secs),
                max_retries: toml.feed.max_retries,
                base_backoff: Duration::from_millis(toml.feed.base_backoff_ms),
                max_backoff: Duration::from_secs(toml.feed.max_backoff_secs),
                bet_type_overrides,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lines_common::KeyField;

    #[test]
    fn test_default_config() {
        let config = CollectConfig::default();
        assert_eq!(config.league, "nfl");
        assert_eq!(config.kinds.len(), 2);
        assert_eq!(config.open_book_id, 30);
        assert_eq!(config.fallback_priority, vec![15, 68, 69, 79]);
        assert!(config.current_week.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [general]
            league = "nfl"
            kinds = ["game_lines"]
            start_season = 2021
            end_season = 2023
            current_week = 7
            store_dir = "/var/lines"
            log_level = "debug"
            sleep_min_ms = 100
            sleep_max_ms = 200

            [engine]
            open_book_id = 30
            fallback_priority = [68, 69]

            [feed]
            base_url = "http://localhost:9000/web/v2"
            max_retries = 2

            [feed.bet_type_overrides]
            core_bet_type_99_custom = "custom"
        "#;

        let config = CollectConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.kinds, vec![DataKind::GameLines]);
        assert_eq!(config.start_season, 2021);
        assert_eq!(config.end_season, 2023);
        assert_eq!(config.current_week, Some(7));
        assert_eq!(config.store_dir, PathBuf::from("/var/lines"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.sleep_min, Duration::from_millis(100));
        assert_eq!(config.fallback_priority, vec![68, 69]);
        assert_eq!(config.feed.base_url, "http://localhost:9000/web/v2");
        assert_eq!(config.feed.max_retries, 2);
        // Built-in renames survive a custom override table.
        assert_eq!(
            config.feed.bet_type_overrides["core_bet_type_99_custom"],
            "custom"
        );
        assert_eq!(
            config.feed.bet_type_overrides["core_bet_type_65_interceptions"],
            "passing_interceptions"
        );
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = CollectConfig::default();
        config.apply_overrides(
            Some(vec!["props".to_string()]),
            Some(PathBuf::from("/tmp/lines")),
            Some(2022),
            Some(11),
        );

        assert_eq!(config.kinds, vec![DataKind::PlayerProps]);
        assert_eq!(config.store_dir, PathBuf::from("/tmp/lines"));
        assert_eq!(config.start_season, 2022);
        assert_eq!(config.end_season, 2022);
        assert_eq!(config.current_week, Some(11));
    }

    #[test]
    fn test_engine_config_per_kind() {
        let config = CollectConfig::default();

        let games = config.engine_config(DataKind::GameLines);
        assert_eq!(games.open_book_id, 30);
        assert!(games.key_spec.fields.contains(&KeyField::BookId));

        let props = config.engine_config(DataKind::PlayerProps);
        assert!(props
            .key_spec
            .fields
            .contains(&KeyField::Extra("join_name".to_string())));
    }

    #[test]
    fn test_season_rollover_in_august() {
        let july = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let august = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        assert_eq!(season_for(july), 2023);
        assert_eq!(season_for(august), 2024);
    }
}
