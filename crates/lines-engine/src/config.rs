//! Engine configuration.
//!
//! One `EngineConfig` per data kind: game lines and player props share the
//! same reconciliation logic but differ in key fields, so both are driven by
//! external configuration rather than duplicated code paths.

use lines_common::{DataKind, KeySpec};
use serde::{Deserialize, Serialize};

/// Book id the provider uses for the opening line.
pub const DEFAULT_OPEN_BOOK_ID: u32 = 30;

/// Books to synthesize a missing opening line from, best first:
/// consensus, then DraftKings, FanDuel, bet365.
pub const DEFAULT_OPEN_FALLBACK_PRIORITY: [u32; 4] = [15, 68, 69, 79];

/// Configuration for one data kind's reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Book id designated as the opening line.
    pub open_book_id: u32,
    /// Priority-ordered fallback books for opening-line synthesis.
    pub fallback_priority: Vec<u32>,
    /// Full-key field list (includes `book_id`).
    pub key_spec: KeySpec,
}

impl EngineConfig {
    /// Stock configuration for a data kind.
    pub fn for_kind(kind: DataKind) -> Self {
        let key_spec = match kind {
            DataKind::GameLines => KeySpec::game_lines(),
            DataKind::PlayerProps => KeySpec::player_props(),
        };
        Self {
            open_book_id: DEFAULT_OPEN_BOOK_ID,
            fallback_priority: DEFAULT_OPEN_FALLBACK_PRIORITY.to_vec(),
            key_spec,
        }
    }

    pub fn game_lines() -> Self {
        Self::for_kind(DataKind::GameLines)
    }

    pub fn player_props() -> Self {
        Self::for_kind(DataKind::PlayerProps)
    }
}
