//! Snapshot reconciliation.
//!
//! Merges a previously stored snapshot with a fresh pull. The step order is
//! load-bearing: synthesis runs on the fresh pull only (stored rows must not
//! re-derive opens from other stale rows), passthrough columns are unioned
//! before reduction, and the concatenation puts incoming last so equal or
//! missing timestamps resolve in favor of the fresh pull.

use std::collections::BTreeSet;

use lines_common::Observation;
use serde_json::Value;
use tracing::debug;

use crate::config::EngineConfig;
use crate::reduce::keep_latest;
use crate::synth::ensure_open_lines;

/// Merges `existing` (stored snapshot) with `incoming` (fresh pull) into a
/// deduplicated, open-backfilled collection.
pub fn reconcile(
    cfg: &EngineConfig,
    existing: &[Observation],
    incoming: &[Observation],
) -> Vec<Observation> {
    let incoming = ensure_open_lines(cfg, incoming);

    let mut combined = Vec::with_capacity(existing.len() + incoming.len());
    combined.extend_from_slice(existing);
    combined.extend(incoming);

    align_extra_columns(&mut combined);

    let out = keep_latest(cfg, &combined);
    debug!(
        existing = existing.len(),
        merged = out.len(),
        "reconciled snapshot"
    );
    out
}

/// Recomputes a season snapshot from freshly reconciled week snapshots.
///
/// The weekly outputs are concatenated and reduced once before reconciling
/// against the stored season snapshot, guarding against duplicates across
/// weeks pulled in the same run. Season snapshots are derived views; they
/// are never authored independently of the weeks.
pub fn season_rollup(
    cfg: &EngineConfig,
    existing_season: &[Observation],
    weekly: &[Vec<Observation>],
) -> Vec<Observation> {
    let batch: Vec<Observation> = weekly.iter().flatten().cloned().collect();
    let batch = keep_latest(cfg, &batch);
    reconcile(cfg, existing_season, &batch)
}

/// Unions passthrough columns across the collection: every row ends up
/// carrying the same `extra` key set, with absent values null-filled. Keeps
/// snapshots written by older pulls mergeable with pulls that grew columns.
fn align_extra_columns(observations: &mut [Observation]) {
    let all_keys: BTreeSet<String> = observations
        .iter()
        .flat_map(|o| o.extra.keys().cloned())
        .collect();
    if all_keys.is_empty() {
        return;
    }

    for obs in observations.iter_mut() {
        for key in &all_keys {
            obs.extra.entry(key.clone()).or_insert(Value::Null);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lines_common::{Market, Period, Side};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn obs(book_id: u32, value: &str, ts_secs: i64) -> Observation {
        Observation {
            market: Market::Spread,
            event_id: 7,
            period: Period::Event,
            side: Some(Side::Home),
            subject_id: 3,
            season: 2023,
            week: 5,
            book_id,
            value: Some(value.parse().unwrap()),
            odds: Some(-110),
            extra: BTreeMap::new(),
            last_updated: Some(Utc.timestamp_opt(ts_secs, 0).unwrap()),
            open_inferred: false,
            open_source_book_id: None,
        }
    }

    fn cfg() -> EngineConfig {
        EngineConfig::game_lines()
    }

    #[test]
    fn test_fresh_pull_supersedes_and_open_is_synthesized() {
        // Stored week snapshot: book 68 at -3.5 (T1). Fresh pull: book 68
        // at -3 (T2 > T1), no book 30. Expect one book-68 row at -3 and one
        // synthesized book-30 row copied from it.
        let existing = vec![obs(68, "-3.5", 100)];
        let incoming = vec![obs(68, "-3", 200)];

        let out = reconcile(&cfg(), &existing, &incoming);
        assert_eq!(out.len(), 2);

        let dk = out.iter().find(|o| o.book_id == 68).unwrap();
        assert_eq!(dk.value, Some(dec!(-3)));
        assert!(!dk.open_inferred);

        let open = out.iter().find(|o| o.book_id == 30).unwrap();
        assert_eq!(open.value, Some(dec!(-3)));
        assert!(open.open_inferred);
        assert_eq!(open.open_source_book_id, Some(68));
    }

    #[test]
    fn test_idempotent() {
        let existing = vec![obs(68, "-3.5", 100), obs(15, "-3", 150)];
        let incoming = vec![obs(68, "-3", 200)];

        let once = reconcile(&cfg(), &existing, &incoming);
        let twice = reconcile(&cfg(), &once, &incoming);

        let mut a = once.clone();
        let mut b = twice;
        let key = |o: &Observation| (o.book_id, o.last_updated);
        a.sort_by_key(key);
        b.sort_by_key(key);
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_duplicate_full_keys() {
        let existing = vec![obs(68, "-3.5", 100), obs(69, "-3", 100)];
        let incoming = vec![obs(68, "-3", 200), obs(69, "-2.5", 200), obs(15, "-3", 200)];

        let out = reconcile(&cfg(), &existing, &incoming);
        let spec = &cfg().key_spec;
        let keys: Vec<_> = out.iter().map(|o| spec.full_key(o)).collect();
        let unique: std::collections::HashSet<_> = keys.iter().cloned().collect();
        assert_eq!(keys.len(), unique.len());
    }

    #[test]
    fn test_stale_existing_rows_never_seed_synthesis() {
        // Only the stored side has a fallback book; the fresh pull has an
        // unrelated non-fallback book. No open line may be derived from the
        // stored row.
        let existing = vec![obs(68, "-3.5", 100)];
        let incoming = vec![obs(99, "-7", 200)];

        let out = reconcile(&cfg(), &existing, &incoming);
        assert!(out.iter().all(|o| o.book_id != 30));
    }

    #[test]
    fn test_extra_columns_unioned_with_null_fill() {
        let mut existing_row = obs(68, "-3.5", 100);
        existing_row
            .extra
            .insert("tickets_percent".to_string(), Value::from(55));
        let mut incoming_row = obs(69, "-3", 200);
        incoming_row
            .extra
            .insert("money_percent".to_string(), Value::from(40));

        let out = reconcile(&cfg(), &[existing_row], &[incoming_row]);
        for row in &out {
            assert!(row.extra.contains_key("tickets_percent"));
            assert!(row.extra.contains_key("money_percent"));
        }
        let fd = out.iter().find(|o| o.book_id == 69).unwrap();
        assert_eq!(fd.extra["tickets_percent"], Value::Null);
    }

    #[test]
    fn test_empty_existing_snapshot() {
        let incoming = vec![obs(15, "-3", 200)];
        let out = reconcile(&cfg(), &[], &incoming);
        // Consensus row plus the open synthesized from it.
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_season_rollup_dedupes_across_weeks() {
        // The same full key pulled twice in one run (should not happen for
        // distinct weeks, but the rollup re-reduces regardless).
        let week_a = vec![obs(68, "-3.5", 100)];
        let week_b = vec![obs(68, "-3", 200)];

        let out = season_rollup(&cfg(), &[], &[week_a, week_b]);
        let dk: Vec<_> = out.iter().filter(|o| o.book_id == 68).collect();
        assert_eq!(dk.len(), 1);
        assert_eq!(dk[0].value, Some(dec!(-3)));
    }

    #[test]
    fn test_season_rollup_against_prior_season() {
        let prior = vec![obs(68, "-6", 50)];
        let mut other_week = obs(68, "-3", 200);
        other_week.week = 6;

        let out = season_rollup(&cfg(), &prior, &[vec![other_week]]);
        // Different weeks are different full keys: both survive, plus the
        // synthesized open for the fresh week.
        assert_eq!(out.iter().filter(|o| o.book_id == 68).count(), 2);
    }
}
