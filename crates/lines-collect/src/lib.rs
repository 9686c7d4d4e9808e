//! Lines-collect: betting-line snapshot collector.
//!
//! Pulls game lines and player props from the provider week by week,
//! reconciles each pull against the stored snapshots and maintains the
//! derived season rollups.

pub mod config;
pub mod feed;
pub mod schedule;
pub mod store;
