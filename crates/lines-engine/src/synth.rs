//! Opening-line synthesis.
//!
//! The provider only carries an explicit opening book (id 30) for some
//! lines. For every market group that has at least one quote but no opening
//! book, the synthesizer clones the best fallback book's quote and tags it
//! as inferred, so downstream consumers can always join against an opening
//! line.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lines_common::{GroupKey, Observation};
use tracing::debug;

use crate::config::EngineConfig;

/// Per-group synthesis state, accumulated in one pass over the input.
struct GroupState<'a> {
    has_open: bool,
    /// Best candidate per book: latest `last_updated`, input order breaking
    /// ties. Multiple rows per (group, book) only occur on un-reduced fresh
    /// pulls, which is exactly what this function is fed.
    best_by_book: HashMap<u32, (DateTime<Utc>, usize, &'a Observation)>,
}

/// Returns the input plus one synthesized opening-book observation for every
/// group that lacked one and has a fallback candidate. Groups with no
/// candidate are left without an opening line; that is not an error. The
/// input is not mutated and the output is deterministic for a fixed
/// priority list.
pub fn ensure_open_lines(cfg: &EngineConfig, observations: &[Observation]) -> Vec<Observation> {
    if observations.is_empty() {
        return Vec::new();
    }

    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, GroupState> = HashMap::new();

    for (idx, obs) in observations.iter().enumerate() {
        let key = cfg.key_spec.group_key(obs);
        let state = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            GroupState {
                has_open: false,
                best_by_book: HashMap::new(),
            }
        });

        if obs.book_id == cfg.open_book_id {
            state.has_open = true;
            continue;
        }

        let stamp = obs.last_updated.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        match state.best_by_book.get(&obs.book_id) {
            Some((best_stamp, best_idx, _)) if (stamp, idx) <= (*best_stamp, *best_idx) => {}
            _ => {
                state.best_by_book.insert(obs.book_id, (stamp, idx, obs));
            }
        }
    }

    let mut out = observations.to_vec();
    let mut synthesized = 0usize;

    for key in &order {
        let state = &groups[key];
        if state.has_open {
            continue;
        }

        for book_id in &cfg.fallback_priority {
            if let Some((_, _, source)) = state.best_by_book.get(book_id) {
                let mut open = (*source).clone();
                open.book_id = cfg.open_book_id;
                open.open_inferred = true;
                open.open_source_book_id = Some(source.book_id);
                out.push(open);
                synthesized += 1;
                break;
            }
        }
    }

    debug!(
        groups = order.len(),
        synthesized, "opening-line synthesis complete"
    );

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
            market: Market::Spread,
            event_id: 100,
            period: Period::Event,
            side: Some(Side::Home),
            subject_id: 5,
            season: 2023,
            week: 3,
            book_id,
            value: Some(value.parse().unwrap()),
            odds: Some(-110),
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
    fn test_synthesizes_from_first_fallback_present() {
        // No consensus (15); DK (68) is next in priority.
        let input = vec![obs(68, "-3.5", Some(100)), obs(79, "-3", Some(200))];
        let out = ensure_open_lines(&cfg(), &input);

        assert_eq!(out.len(), 3);
        let open = out.iter().find(|o| o.book_id == 30).unwrap();
        assert!(open.open_inferred);
        assert_eq!(open.open_source_book_id, Some(68));
        assert_eq!(open.value, Some(dec!(-3.5)));
    }

    #[test]
    fn test_native_open_is_not_duplicated() {
        let input = vec![obs(30, "-3", Some(100)), obs(68, "-3.5", Some(200))];
        let out = ensure_open_lines(&cfg(), &input);

        assert_eq!(out.len(), 2);
        let opens: Vec<_> = out.iter().filter(|o| o.book_id == 30).collect();
        assert_eq!(opens.len(), 1);
        assert!(!opens[0].open_inferred);
        assert_eq!(opens[0].open_source_book_id, None);
    }

    #[test]
    fn test_multiple_rows_for_fallback_book_pick_latest() {
        // Un-reduced fresh pull: two DK rows for the same group.
        let input = vec![obs(68, "-3.5", Some(100)), obs(68, "-4", Some(300))];
        let out = ensure_open_lines(&cfg(), &input);

        let open = out.iter().find(|o| o.book_id == 30).unwrap();
        assert_eq!(open.value, Some(dec!(-4)));
    }

    #[test]
    fn test_missing_timestamp_loses_to_explicit() {
        let input = vec![obs(68, "-4", Some(100)), obs(68, "-3.5", None)];
        let out = ensure_open_lines(&cfg(), &input);

        let open = out.iter().find(|o| o.book_id == 30).unwrap();
        assert_eq!(open.value, Some(dec!(-4)));
    }

    #[test]
    fn test_group_without_fallback_candidate_is_left_alone() {
        // Book 99 is not in the fallback priority list.
        let input = vec![obs(99, "-7", Some(100))];
        let out = ensure_open_lines(&cfg(), &input);

        assert_eq!(out.len(), 1);
        assert!(out.iter().all(|o| o.book_id != 30));
    }

    #[test]
    fn test_input_not_mutated_and_deterministic() {
        let input = vec![obs(68, "-3.5", Some(100))];
        let first = ensure_open_lines(&cfg(), &input);
        let second = ensure_open_lines(&cfg(), &input);

        assert_eq!(input.len(), 1);
        assert!(!input[0].open_inferred);
        assert_eq!(first, second);
    }

    #[test]
    fn test_groups_are_independent() {
        let mut away = obs(68, "3.5", Some(100));
        away.side = Some(Side::Away);
        let input = vec![obs(30, "-3.5", Some(100)), away];
        let out = ensure_open_lines(&cfg(), &input);

        // Home group already had an open; away group gets a synthesized one.
        assert_eq!(out.len(), 3);
        let inferred: Vec<_> = out.iter().filter(|o| o.open_inferred).collect();
        assert_eq!(inferred.len(), 1);
        assert_eq!(inferred[0].side, Some(Side::Away));
    }

    #[test]
    fn test_empty_input() {
        assert!(ensure_open_lines(&cfg(), &[]).is_empty());
    }
}
