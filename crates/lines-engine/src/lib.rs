//! Line reconciliation engine.
//!
//! Pure, synchronous core of the pipeline:
//! - `synth`: backfill a missing opening-book observation per market group
//! - `reduce`: keep only the freshest observation per full key
//! - `reconcile`: merge a stored snapshot with a fresh pull (week and season)
//! - `weeks`: canonical week <-> provider (segment, segment-week) mapping

pub mod config;
pub mod reconcile;
pub mod reduce;
pub mod synth;
pub mod weeks;

pub use config::{EngineConfig, DEFAULT_OPEN_BOOK_ID, DEFAULT_OPEN_FALLBACK_PRIORITY};
pub use reconcile::{reconcile, season_rollup};
pub use reduce::keep_latest;
pub use synth::ensure_open_lines;
pub use weeks::{
    canonical_weeks, final_week, provider_week, season_shift, tag_canonical_week, ProviderWeek,
    SeasonSegment,
};
