//! Composite-key machinery.
//!
//! Retention and synthesis both address observations by composite keys: the
//! *group key* identifies a market line independent of which book quoted it,
//! and the *full key* appends the book id. Which fields participate differs
//! between game lines and player props, so the field list is configuration
//! (`KeySpec`), not code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Observation;

/// One addressable key field. Anything that is not a typed column of
/// `Observation` names a passthrough column in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeyField {
    Market,
    EventId,
    BookId,
    Period,
    Side,
    SubjectId,
    Season,
    Week,
    Extra(String),
}

impl KeyField {
    pub fn as_str(&self) -> &str {
        match self {
            KeyField::Market => "market",
            KeyField::EventId => "event_id",
            KeyField::BookId => "book_id",
            KeyField::Period => "period",
            KeyField::Side => "side",
            KeyField::SubjectId => "subject_id",
            KeyField::Season => "season",
            KeyField::Week => "week",
            KeyField::Extra(name) => name,
        }
    }
}

impl From<String> for KeyField {
    fn from(s: String) -> Self {
        match s.as_str() {
            "market" => KeyField::Market,
            "event_id" => KeyField::EventId,
            "book_id" => KeyField::BookId,
            "period" => KeyField::Period,
            "side" => KeyField::Side,
            "subject_id" => KeyField::SubjectId,
            "season" => KeyField::Season,
            "week" => KeyField::Week,
            _ => KeyField::Extra(s),
        }
    }
}

impl From<KeyField> for String {
    fn from(f: KeyField) -> Self {
        f.as_str().to_string()
    }
}

impl std::fmt::Display for KeyField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single key component. Passthrough columns collapse to a canonical
/// scalar so equality and hashing are well defined; a missing column is
/// `Null`, and `Null == Null` (rows missing the same column still group
/// together).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Int(i64),
    Text(String),
    Null,
}

impl KeyValue {
    /// Canonicalizes a passthrough JSON value into a key component.
    pub fn from_json(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => KeyValue::Null,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(i) => KeyValue::Int(i),
                None => KeyValue::Text(n.to_string()),
            },
            Some(Value::String(s)) => KeyValue::Text(s.clone()),
            Some(Value::Bool(b)) => KeyValue::Text(b.to_string()),
            Some(other) => KeyValue::Text(other.to_string()),
        }
    }
}

/// Book-independent composite key for one market line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(pub Vec<KeyValue>);

/// Group key plus book id: the unit of retention uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FullKey {
    pub group: GroupKey,
    pub book_id: u32,
}

/// Ordered full-key field list for one data kind. Must contain `book_id`;
/// the group key is derived by skipping it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub fields: Vec<KeyField>,
}

impl KeySpec {
    pub fn new(fields: Vec<KeyField>) -> Self {
        Self { fields }
    }

    /// Full-key field list for game lines (moneyline/spread/total).
    pub fn game_lines() -> Self {
        Self::new(vec![
            KeyField::Market,
            KeyField::EventId,
            KeyField::BookId,
            KeyField::Period,
            KeyField::Side,
            KeyField::SubjectId,
            KeyField::Season,
            KeyField::Week,
        ])
    }

    /// Full-key field list for player props. Props are additionally keyed
    /// by the provider's player join columns so the same bet type on two
    /// players never collapses.
    pub fn player_props() -> Self {
        Self::new(vec![
            KeyField::Market,
            KeyField::EventId,
            KeyField::BookId,
            KeyField::Extra("join_name".to_string()),
            KeyField::Extra("position".to_string()),
            KeyField::Extra("position_group".to_string()),
            KeyField::Extra("line_type".to_string()),
            KeyField::Period,
            KeyField::Side,
            KeyField::Extra("team".to_string()),
            KeyField::SubjectId,
            KeyField::Season,
            KeyField::Week,
        ])
    }

    /// Derives the book-independent group key.
    pub fn group_key(&self, obs: &Observation) -> GroupKey {
        let parts = self
            .fields
            .iter()
            .filter(|f| **f != KeyField::BookId)
            .map(|f| obs.key_value(f))
            .collect();
        GroupKey(parts)
    }

    /// Derives the full key (group key + book id).
    pub fn full_key(&self, obs: &Observation) -> FullKey {
        FullKey {
            group: self.group_key(obs),
            book_id: obs.book_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Market, Period, Side};
    use std::collections::BTreeMap;

    fn obs(book_id: u32, side: Side) -> Observation {
        Observation {
            market: Market::Spread,
            event_id: 1,
            period: Period::Event,
            side: Some(side),
            subject_id: 10,
            season: 2023,
            week: 1,
            book_id,
            value: None,
            odds: None,
            extra: BTreeMap::new(),
            last_updated: None,
            open_inferred: false,
            open_source_book_id: None,
        }
    }

    #[test]
    fn test_key_field_from_string() {
        assert_eq!(KeyField::from("market".to_string()), KeyField::Market);
        assert_eq!(KeyField::from("book_id".to_string()), KeyField::BookId);
        assert_eq!(
            KeyField::from("join_name".to_string()),
            KeyField::Extra("join_name".to_string())
        );
    }

    #[test]
    fn test_group_key_ignores_book() {
        let spec = KeySpec::game_lines();
        let a = obs(15, Side::Home);
        let b = obs(68, Side::Home);
        assert_eq!(spec.group_key(&a), spec.group_key(&b));
        assert_ne!(spec.full_key(&a), spec.full_key(&b));
    }

    #[test]
    fn test_group_key_separates_sides() {
        let spec = KeySpec::game_lines();
        let home = obs(15, Side::Home);
        let away = obs(15, Side::Away);
        assert_ne!(spec.group_key(&home), spec.group_key(&away));
    }

    #[test]
    fn test_missing_extra_columns_group_together() {
        let spec = KeySpec::player_props();
        let a = obs(15, Side::Over);
        let b = obs(68, Side::Over);
        // Neither row carries join columns; both project to Null and the
        // group keys still match.
        assert_eq!(spec.group_key(&a), spec.group_key(&b));
    }

    #[test]
    fn test_key_value_from_json() {
        assert_eq!(
            KeyValue::from_json(Some(&serde_json::json!(42))),
            KeyValue::Int(42)
        );
        assert_eq!(
            KeyValue::from_json(Some(&serde_json::json!("qb"))),
            KeyValue::Text("qb".to_string())
        );
        assert_eq!(KeyValue::from_json(None), KeyValue::Null);
        assert_eq!(
            KeyValue::from_json(Some(&serde_json::Value::Null)),
            KeyValue::Null
        );
    }
}
