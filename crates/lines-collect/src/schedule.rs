//! Schedule driver.
//!
//! Decides which (season, canonical week) pairs need refreshing and runs the
//! read-merge-write cycle per week, then the season rollup. Weeks are
//! processed sequentially so each snapshot's read-merge-write stays a single
//! critical section.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use lines_common::{DataKind, Observation};
use lines_engine::{
    final_week, provider_week, reconcile, season_rollup, tag_canonical_week, EngineConfig,
    ProviderWeek,
};
use tracing::{debug, info, warn};

use crate::config::CollectConfig;
use crate::feed::{FeedError, MarketFeed};
use crate::store::{SnapshotKey, SnapshotStore};

/// Statistics from one collection run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub weeks_pulled: usize,
    pub weeks_skipped: usize,
    pub weeks_empty: usize,
    pub weeks_failed: usize,
    pub rows_saved: usize,
    pub errors: Vec<(String, String)>,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Collection Run Statistics:")?;
        writeln!(f, "  Weeks pulled: {}", self.weeks_pulled)?;
        writeln!(f, "  Weeks skipped: {}", self.weeks_skipped)?;
        writeln!(f, "  Weeks empty: {}", self.weeks_empty)?;
        writeln!(f, "  Weeks failed: {}", self.weeks_failed)?;
        writeln!(f, "  Rows saved: {}", self.rows_saved)?;
        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for (scope, err) in &self.errors {
                writeln!(f, "    {}: {}", scope, err)?;
            }
        }
        Ok(())
    }
}

/// Runs the collection schedule over the configured kinds and seasons.
pub struct ScheduleDriver {
    feed: MarketFeed,
    store: SnapshotStore,
    config: CollectConfig,
}

impl ScheduleDriver {
    pub fn new(config: CollectConfig) -> Result<Self, FeedError> {
        let feed = MarketFeed::new(config.feed.clone())?;
        let store = SnapshotStore::new(config.store_dir.clone());
        Ok(Self {
            feed,
            store,
            config,
        })
    }

    /// Runs every configured (kind, season) pair.
    pub async fn run(&self) -> Result<RunStats> {
        let mut stats = RunStats::default();

        for kind in self.config.kinds.clone() {
            for season in self.config.start_season..=self.config.end_season {
                // Only the newest season can be in progress.
                let current_week = if season == self.config.end_season {
                    self.config.current_week
                } else {
                    None
                };
                self.run_season(kind, season, current_week, &mut stats)
                    .await?;
            }
        }

        Ok(stats)
    }

    /// One season's cycle: plan weeks, pull and reconcile each, roll up.
    async fn run_season(
        &self,
        kind: DataKind,
        season: u16,
        current_week: Option<u8>,
        stats: &mut RunStats,
    ) -> Result<()> {
        let engine = self.config.engine_config(kind);
        let season_key = SnapshotKey::season(&self.config.league, kind, season);
        let mut season_rows = self
            .store
            .load(&season_key)
            .with_context(|| format!("loading season snapshot {}", season_key))?;

        let weeks = plan_weeks(season, max_stored_week(&season_rows), current_week);
        info!(
            "{} season {}: refreshing weeks {}..={}",
            kind,
            season,
            weeks.first().copied().unwrap_or(0),
            weeks.last().copied().unwrap_or(0)
        );

        // An in-progress season may have speculative rows for weeks beyond
        // the re-pull window; drop them before rolling up.
        if let Some(current) = current_week {
            let cutoff = current.saturating_add(1).min(final_week(season));
            prune_beyond_week(&mut season_rows, cutoff);
        }

        let mut weekly_outputs = Vec::new();
        for week in weeks {
            let Some(pw) = provider_week(season, week) else {
                debug!("Season {} week {} is not addressable, skipping", season, week);
                stats.weeks_skipped += 1;
                continue;
            };

            self.polite_sleep().await;

            let mut fetched = match self.fetch(kind, season, pw).await {
                Ok(rows) => rows,
                Err(e) if !self.config.abort_on_week_error => {
                    warn!("Skipping {} season {} week {}: {}", kind, season, week, e);
                    stats.weeks_failed += 1;
                    stats
                        .errors
                        .push((format!("{} {} week {}", kind, season, week), e.to_string()));
                    continue;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!(
                        "fetching {} season {} week {}",
                        kind, season, week
                    )));
                }
            };
            tag_canonical_week(&mut fetched, week);

            let week_key = SnapshotKey::week(&self.config.league, kind, season, week);
            let existing = self
                .store
                .load(&week_key)
                .with_context(|| format!("loading week snapshot {}", week_key))?;
            let Some(merged) = merge_week(&engine, &existing, &fetched) else {
                info!("{}: provider has no rows yet, snapshot left as is", week_key);
                stats.weeks_empty += 1;
                continue;
            };

            info!(
                "{}: {} fetched, {} stored, {} after reconcile",
                week_key,
                fetched.len(),
                existing.len(),
                merged.len()
            );
            log_book_counts(&merged);

            self.store
                .save(&week_key, &merged)
                .with_context(|| format!("saving week snapshot {}", week_key))?;
            stats.weeks_pulled += 1;
            stats.rows_saved += merged.len();
            weekly_outputs.push(merged);
        }

        if !weekly_outputs.is_empty() {
            let rolled = season_rollup(&engine, &season_rows, &weekly_outputs);
            info!("{}: {} rows after rollup", season_key, rolled.len());
            self.store
                .save(&season_key, &rolled)
                .with_context(|| format!("saving season snapshot {}", season_key))?;
            stats.rows_saved += rolled.len();
        }

        Ok(())
    }

    async fn fetch(
        &self,
        kind: DataKind,
        season: u16,
        week: ProviderWeek,
    ) -> Result<Vec<Observation>, FeedError> {
        match kind {
            DataKind::GameLines => self.feed.fetch_game_lines(season, week).await,
            DataKind::PlayerProps => self.feed.fetch_player_props(season, week).await,
        }
    }

    /// Randomized sleep between week pulls to stay polite to the provider.
    async fn polite_sleep(&self) {
        let min = self.config.sleep_min;
        let max = self.config.sleep_max;
        let duration = if max > min {
            use rand::Rng;
            let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
            Duration::from_millis(millis)
        } else {
            min
        };
        debug!("Sleeping {:?} before next pull", duration);
        tokio::time::sleep(duration).await;
    }
}

/// Canonical weeks to refresh for one season. Completed seasons resume from
/// the last stored week through the final week. An in-progress season with
/// stored rows re-pulls a one-week trailing window around the current week;
/// with nothing stored yet it backfills from week 1 through current + 1.
pub fn plan_weeks(season: u16, resume_from: Option<u8>, current_week: Option<u8>) -> Vec<u8> {
    let last = final_week(season);
    match current_week {
        Some(current) => {
            let start = match resume_from {
                Some(_) => current.saturating_sub(1).max(1),
                None => 1,
            };
            let end = current.saturating_add(1).min(last);
            (start..=end).collect()
        }
        None => (resume_from.unwrap_or(1).max(1)..=last).collect(),
    }
}

/// Greatest canonical week present in a stored season snapshot, `None` when
/// nothing is stored. The week is re-pulled on resume in case its last pull
/// was partial.
pub fn max_stored_week(rows: &[Observation]) -> Option<u8> {
    rows.iter().map(|o| o.week).max()
}

/// Merges a fresh pull into a stored week snapshot. An empty pull means the
/// provider has nothing for the week yet; `None` tells the caller to leave
/// the stored snapshot untouched instead of rewriting it from itself.
pub fn merge_week(
    engine: &EngineConfig,
    existing: &[Observation],
    fetched: &[Observation],
) -> Option<Vec<Observation>> {
    if fetched.is_empty() {
        return None;
    }
    Some(reconcile(engine, existing, fetched))
}

/// Drops rows for weeks beyond `cutoff`.
pub fn prune_beyond_week(rows: &mut Vec<Observation>, cutoff: u8) {
    let before = rows.len();
    rows.retain(|o| o.week <= cutoff);
    if rows.len() != before {
        info!(
            "Pruned {} stored rows beyond week {}",
            before - rows.len(),
            cutoff
        );
    }
}

/// Per-book row counts after a save, mirroring what operators eyeball to
/// spot a book that stopped quoting.
fn log_book_counts(observations: &[Observation]) {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for obs in observations {
        *counts.entry(obs.book_id).or_default() += 1;
    }
    info!("Rows per book: {:?}", counts);
}
