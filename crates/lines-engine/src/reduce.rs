//! Retention reduction: last write wins per full key.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use lines_common::Observation;
use tracing::debug;

use crate::config::EngineConfig;

/// Collapses the input to at most one observation per full key: the one with
/// the greatest `last_updated`. Rows without a timestamp sort as the epoch,
/// so any explicit timestamp beats them. Ties keep the row appearing later
/// in the input (stable sort, last occurrence wins), which is what lets the
/// reconciler order existing-then-incoming and have fresh pulls win.
pub fn keep_latest(cfg: &EngineConfig, observations: &[Observation]) -> Vec<Observation> {
    if observations.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&Observation> = observations.iter().collect();
    sorted.sort_by_key(|o| o.last_updated.unwrap_or(DateTime::<Utc>::UNIX_EPOCH));

    let mut last_position = HashMap::new();
    for (pos, obs) in sorted.iter().enumerate() {
        last_position.insert(cfg.key_spec.full_key(obs), pos);
    }

    let retained: HashSet<usize> = last_position.into_values().collect();
    let out: Vec<Observation> = sorted
        .into_iter()
        .enumerate()
        .filter(|(pos, _)| retained.contains(pos))
        .map(|(_, obs)| obs.clone())
        .collect();

    debug!(input = observations.len(), retained = out.len(), "reduced");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lines_common::{Market, Period, Side};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn obs(book_id: u32, value: &str, ts_secs: Option<i64>) -> Observation {
        Observation {
            market: Market::Total,
            event_id: 42,
            period: Period::Event,
            side: Some(Side::Over),
            subject_id: 0,
            season: 2023,
            week: 7,
            book_id,
            value: Some(value.parse().unwrap()),
            odds: Some(-105),
            extra: BTreeMap::new(),
            last_updated: ts_secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            open_inferred: false,
            open_source_book_id: None,
        }
    }

    fn cfg() -> EngineConfig {
        EngineConfig::game_lines()
    }

    #[test]
    fn test_freshest_wins_regardless_of_order() {
        let newer = obs(68, "47.5", Some(200));
        let older = obs(68, "47", Some(100));

        let a = keep_latest(&cfg(), &[older.clone(), newer.clone()]);
        let b = keep_latest(&cfg(), &[newer.clone(), older]);

        assert_eq!(a.len(), 1);
        assert_eq!(a[0].value, Some(dec!(47.5)));
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].value, Some(dec!(47.5)));
    }

    #[test]
    fn test_missing_timestamp_is_oldest() {
        let stamped = obs(68, "47", Some(1));
        let unstamped = obs(68, "48", None);

        let out = keep_latest(&cfg(), &[stamped, unstamped]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, Some(dec!(47)));
    }

    #[test]
    fn test_equal_timestamps_keep_later_input_row() {
        let first = obs(68, "47", Some(100));
        let second = obs(68, "48", Some(100));

        let out = keep_latest(&cfg(), &[first, second]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, Some(dec!(48)));
    }

    #[test]
    fn test_distinct_books_both_retained() {
        let dk = obs(68, "47", Some(100));
        let fd = obs(69, "47.5", Some(100));

        let out = keep_latest(&cfg(), &[dk, fd]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(keep_latest(&cfg(), &[]).is_empty());
    }
}
