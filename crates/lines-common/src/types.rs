//! Core record types for the line pipeline.
//!
//! CRITICAL: line values use `rust_decimal::Decimal`.
//! NEVER use f64 for quoted prices.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keys::{KeyField, KeyValue};

/// The two data families the pipeline maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    GameLines,
    PlayerProps,
}

impl DataKind {
    /// Directory/collection name used by the snapshot store.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::GameLines => "game_lines",
            DataKind::PlayerProps => "player_props",
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "game_lines" | "games" | "lines" => Ok(DataKind::GameLines),
            "player_props" | "props" => Ok(DataKind::PlayerProps),
            _ => Err(format!("Unknown data kind: {}", s)),
        }
    }
}

/// What is being quoted: a game market or a player-prop bet type.
///
/// The provider uses `moneyline`/`spread`/`total` for game markets and a
/// free-form bet-type name (e.g. `passing_yards`) for props, so the prop
/// variant carries the name through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Market {
    Moneyline,
    Spread,
    Total,
    Prop(String),
}

impl Market {
    pub fn as_str(&self) -> &str {
        match self {
            Market::Moneyline => "moneyline",
            Market::Spread => "spread",
            Market::Total => "total",
            Market::Prop(name) => name,
        }
    }
}

impl From<String> for Market {
    fn from(s: String) -> Self {
        match s.as_str() {
            "moneyline" => Market::Moneyline,
            "spread" => Market::Spread,
            "total" => Market::Total,
            _ => Market::Prop(s),
        }
    }
}

impl From<Market> for String {
    fn from(m: Market) -> Self {
        m.as_str().to_string()
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scoring period a quote applies to. Strings match the provider's
/// period keys exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// Full game.
    Event,
    FirstHalf,
    SecondHalf,
    FirstQuarter,
    SecondQuarter,
    ThirdQuarter,
    FourthQuarter,
}

impl Period {
    /// All periods the provider quotes, in request order.
    pub const ALL: [Period; 7] = [
        Period::Event,
        Period::FirstHalf,
        Period::SecondHalf,
        Period::FirstQuarter,
        Period::SecondQuarter,
        Period::ThirdQuarter,
        Period::FourthQuarter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Event => "event",
            Period::FirstHalf => "firsthalf",
            Period::SecondHalf => "secondhalf",
            Period::FirstQuarter => "firstquarter",
            Period::SecondQuarter => "secondquarter",
            Period::ThirdQuarter => "thirdquarter",
            Period::FourthQuarter => "fourthquarter",
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown period: {}", s))
    }
}

/// Which side of the market the quote is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
    Over,
    Under,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
            Side::Over => "over",
            Side::Under => "under",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "home" => Ok(Side::Home),
            "away" => Ok(Side::Away),
            "over" => Ok(Side::Over),
            "under" => Ok(Side::Under),
            _ => Err(format!("Unknown side: {}", s)),
        }
    }
}

/// One quoted market outcome at one point in time.
///
/// Observations are never mutated after creation: a fresher quote for the
/// same full key is a new record that supersedes the old one during
/// reduction. Payload columns the engine does not interpret ride along in
/// `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    // Identity (group key, book-independent)
    pub market: Market,
    pub event_id: u64,
    pub period: Period,
    #[serde(default)]
    pub side: Option<Side>,
    /// Team id for game lines, player id for props; 0 when not applicable.
    #[serde(default)]
    pub subject_id: i64,
    pub season: u16,
    /// Canonical season-long week (1..=21/22), not the provider's
    /// segment-local week.
    pub week: u8,

    // Book dimension
    pub book_id: u32,

    // Payload
    #[serde(default)]
    pub value: Option<Decimal>,
    #[serde(default)]
    pub odds: Option<i64>,
    /// Provider-specific passthrough columns (betting splits, coefficient
    /// scores, prop join columns). Opaque to the engine.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,

    // Provenance
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// True only when this row was synthesized as an opening line.
    #[serde(default)]
    pub open_inferred: bool,
    /// Book the synthesized opening line was copied from.
    #[serde(default)]
    pub open_source_book_id: Option<u32>,
}

impl Observation {
    /// Projects one key field out of this observation.
    pub fn key_value(&self, field: &KeyField) -> KeyValue {
        match field {
            KeyField::Market => KeyValue::Text(self.market.as_str().to_string()),
            KeyField::EventId => KeyValue::Int(self.event_id as i64),
            KeyField::BookId => KeyValue::Int(self.book_id as i64),
            KeyField::Period => KeyValue::Text(self.period.as_str().to_string()),
            KeyField::Side => match self.side {
                Some(side) => KeyValue::Text(side.as_str().to_string()),
                None => KeyValue::Null,
            },
            KeyField::SubjectId => KeyValue::Int(self.subject_id),
            KeyField::Season => KeyValue::Int(self.season as i64),
            KeyField::Week => KeyValue::Int(self.week as i64),
            KeyField::Extra(name) => KeyValue::from_json(self.extra.get(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_string_round_trip() {
        assert_eq!(Market::from("moneyline".to_string()), Market::Moneyline);
        assert_eq!(Market::from("total".to_string()), Market::Total);
        assert_eq!(
            Market::from("passing_yards".to_string()),
            Market::Prop("passing_yards".to_string())
        );
        assert_eq!(Market::Spread.as_str(), "spread");
    }

    #[test]
    fn test_period_provider_strings() {
        assert_eq!(Period::Event.as_str(), "event");
        assert_eq!(Period::FirstHalf.as_str(), "firsthalf");
        assert_eq!("thirdquarter".parse::<Period>(), Ok(Period::ThirdQuarter));
        assert!("overtime".parse::<Period>().is_err());
    }

    #[test]
    fn test_data_kind_parse() {
        assert_eq!("props".parse::<DataKind>(), Ok(DataKind::PlayerProps));
        assert_eq!("game_lines".parse::<DataKind>(), Ok(DataKind::GameLines));
        assert!("futures".parse::<DataKind>().is_err());
    }

    #[test]
    fn test_observation_json_round_trip() {
        let obs = Observation {
            market: Market::Spread,
            event_id: 12345,
            period: Period::Event,
            side: Some(Side::Home),
            subject_id: 7,
            season: 2023,
            week: 4,
            book_id: 68,
            value: Some(dec!(-3.5)),
            odds: Some(-110),
            extra: BTreeMap::from([(
                "tickets_percent".to_string(),
                Value::from(61),
            )]),
            last_updated: None,
            open_inferred: false,
            open_source_book_id: None,
        };

        let json = serde_json::to_string(&obs).unwrap();
        let back: Observation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, obs);
        assert_eq!(back.market, Market::Spread);
        assert_eq!(back.value, Some(dec!(-3.5)));
    }
}
