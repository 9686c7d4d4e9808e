//! Shared types for the NFL betting-line pipeline.
//!
//! This crate contains:
//! - The flat `Observation` record every component exchanges
//! - Market/period/side enums matching the provider's string vocabulary
//! - Composite-key machinery (`KeySpec`, `GroupKey`, `FullKey`)

pub mod keys;
pub mod types;

pub use keys::{FullKey, GroupKey, KeyField, KeySpec, KeyValue};
pub use types::*;
