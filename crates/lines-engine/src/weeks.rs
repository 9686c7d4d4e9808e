//! Canonical week <-> provider addressing.
//!
//! Snapshots are keyed by a canonical season-long week number (1..=21, or
//! 1..=22 from the 17-game era onward). The provider instead addresses pulls
//! by (season segment, segment-local week), restarting at 1 for the
//! post-season. This module is the pure mapping between the two, including
//! the one structural hole: seasons through 2022 have no addressable
//! canonical week 22.

use std::ops::RangeInclusive;

use lines_common::Observation;
use serde::{Deserialize, Serialize};

/// First season with an 18-week regular-season schedule.
const EXPANDED_SCHEDULE_SEASON: u16 = 2021;

/// Last season whose playoff addressing lacks canonical week 22.
const LEGACY_PLAYOFF_SEASON: u16 = 2022;

/// Provider season segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonSegment {
    Regular,
    Post,
}

impl SeasonSegment {
    /// Query-parameter value the provider expects.
    pub fn api_str(&self) -> &'static str {
        match self {
            SeasonSegment::Regular => "reg",
            SeasonSegment::Post => "post",
        }
    }
}

impl std::fmt::Display for SeasonSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.api_str())
    }
}

/// Provider-side address of one week of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderWeek {
    pub segment: SeasonSegment,
    /// Segment-local week (post-season restarts at 1).
    pub week: u8,
}

/// Number of regular-season weeks in a season.
pub fn season_shift(season: u16) -> u8 {
    if season >= EXPANDED_SCHEDULE_SEASON {
        18
    } else {
        17
    }
}

/// Final canonical week of a season.
pub fn final_week(season: u16) -> u8 {
    if season >= EXPANDED_SCHEDULE_SEASON {
        22
    } else {
        21
    }
}

/// Canonical week numbers a season spans.
pub fn canonical_weeks(season: u16) -> RangeInclusive<u8> {
    1..=final_week(season)
}

/// Maps a canonical week to the provider's (segment, segment-week) address.
///
/// Returns `None` for weeks the provider cannot address: anything outside
/// the season's canonical range, and canonical week 22 for seasons through
/// 2022 (the pre-expansion playoff format). Callers must skip those weeks
/// before invoking the feed adapter.
pub fn provider_week(season: u16, canonical_week: u8) -> Option<ProviderWeek> {
    if canonical_week == 0 || canonical_week > final_week(season) {
        return None;
    }

    let shift = season_shift(season);
    if canonical_week <= shift {
        return Some(ProviderWeek {
            segment: SeasonSegment::Regular,
            week: canonical_week,
        });
    }

    if season <= LEGACY_PLAYOFF_SEASON && canonical_week == 22 {
        return None;
    }

    Some(ProviderWeek {
        segment: SeasonSegment::Post,
        week: canonical_week - shift,
    })
}

/// Stamps the canonical week onto a fetched batch before storage, so every
/// pull of the same (season, segment, segment-week) keys identically.
pub fn tag_canonical_week(observations: &mut [Observation], canonical_week: u8) {
    for obs in observations.iter_mut() {
        obs.week = canonical_week;
    }
}
