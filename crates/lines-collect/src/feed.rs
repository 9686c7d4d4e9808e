//! Market feed adapter for the provider's scoreboard and props endpoints.
//!
//! Game lines come from one scoreboard GET per (season, segment, week); the
//! response nests outcomes as book -> period -> market type -> offer list.
//! Player props need a games listing call first, then one props GET per
//! game, each market carrying `lines: {book_id: [offers]}`. Both paths
//! flatten into `Observation` records; the whole pull is stamped with one
//! fetch timestamp because the provider does not timestamp outcomes.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lines_common::{Market, Observation, Period};
use lines_engine::ProviderWeek;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Pick type used for the lightweight games listing before a props pull.
/// Any always-offered prop works; this one is quoted for every game.
const LISTING_PICK_TYPE: &str = "core_bet_type_62_anytime_touchdown_scorer";

/// Errors from the feed adapter.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("retries exhausted after {attempts} attempts: {url}")]
    RetriesExhausted { url: String, attempts: u32 },
}

/// Configuration for the feed adapter.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Provider API root, without a trailing slash.
    pub base_url: String,
    /// League path segment (e.g. "nfl").
    pub league: String,
    /// Sent as the `access_token` header when present.
    pub access_token: Option<String>,
    /// State code the props endpoint requires.
    pub state_code: String,
    /// Books to request; props offers from other books are dropped.
    pub book_ids: Vec<u32>,
    /// Periods to request for game lines.
    pub periods: Vec<Period>,
    /// Request timeout.
    pub timeout: Duration,
    /// Attempts before a request is given up.
    pub max_retries: u32,
    /// Initial backoff duration.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Prop bet-type keys whose mapped name differs from the stripped
    /// provider key. Merged over the built-in renames.
    pub bet_type_overrides: BTreeMap<String, String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.actionnetwork.com/web/v2".to_string(),
            league: "nfl".to_string(),
            access_token: None,
            state_code: "NJ".to_string(),
            book_ids: vec![15, 30, 68, 69, 79],
            periods: Period::ALL.to_vec(),
            timeout: Duration::from_secs(20),
            max_retries: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            bet_type_overrides: default_bet_type_overrides(),
        }
    }
}

/// Provider keys whose historical column name differs from the stripped key.
pub fn default_bet_type_overrides() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "core_bet_type_65_interceptions".to_string(),
            "passing_interceptions".to_string(),
        ),
        (
            "core_bet_type_10_pass_completions".to_string(),
            "completions".to_string(),
        ),
        (
            "core_bet_type_30_passing_attempts".to_string(),
            "attempts".to_string(),
        ),
    ])
}

/// Maps a provider prop key (`core_bet_type_<ids>_<name>`) to the flat
/// bet-type name. Overrides win; otherwise the numeric prefix is stripped
/// (milestone families carry two numeric ids). Unrecognized keys pass
/// through unchanged.
pub fn map_bet_type(key: &str, overrides: &BTreeMap<String, String>) -> String {
    if let Some(mapped) = overrides.get(key) {
        return mapped.clone();
    }
    let Some(rest) = key.strip_prefix("core_bet_type_") else {
        return key.to_string();
    };
    let Some(rest) = strip_leading_id(rest) else {
        return key.to_string();
    };
    let rest = strip_leading_id(rest).unwrap_or(rest);
    if rest.is_empty() {
        key.to_string()
    } else {
        rest.to_string()
    }
}

/// Strips one `<digits>_` run off the front, if present.
fn strip_leading_id(s: &str) -> Option<&str> {
    let end = s.find(|c: char| !c.is_ascii_digit())?;
    if end == 0 || !s[end..].starts_with('_') {
        return None;
    }
    Some(&s[end + 1..])
}

/// Roster-style join name from a player abbreviation: lowercase, punctuation
/// and spaces dropped, a dot after the first initial ("J. Allen" ->
/// "j.allen").
fn join_name(abbr: &str) -> String {
    let cleaned: String = abbr
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect();
    match cleaned.char_indices().nth(1) {
        Some((i, _)) => format!("{}.{}", &cleaned[..i], &cleaned[i..]),
        None => cleaned,
    }
}

/// Folds a listed position into the coarser roster position group the join
/// columns use (backs fold into RB, secondary into DB, and so on).
fn position_group(position: &str) -> &str {
    match position {
        "HB" | "FB" | "RB" => "RB",
        "OT" | "OG" | "G" | "T" | "C" | "OL" => "OL",
        "DE" | "DT" | "NT" | "DL" => "DL",
        "ILB" | "OLB" | "MLB" | "LB" => "LB",
        "CB" | "S" | "FS" | "SS" | "DB" => "DB",
        other => other,
    }
}

/// Truncates an error body for logging without splitting a multibyte
/// character; slicing at a raw byte index would panic mid-character.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Exponential backoff with full jitter: `min(max, base * 2^attempt)` scaled
/// by a uniform random factor in [0, 1).
fn jittered_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let capped = max.min(base * 2u32.saturating_pow(attempt.min(16)));
    capped.mul_f64(rand::random::<f64>())
}

/// HTTP client for the provider.
pub struct MarketFeed {
    http_client: Client,
    config: FeedConfig,
}

impl MarketFeed {
    pub fn new(config: FeedConfig) -> Result<Self, FeedError> {
        let http_client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http_client,
            config,
        })
    }

    /// Fetches all game-line observations for one provider week.
    pub async fn fetch_game_lines(
        &self,
        season: u16,
        week: ProviderWeek,
    ) -> Result<Vec<Observation>, FeedError> {
        let url = format!("{}/scoreboard/{}", self.config.base_url, self.config.league);
        let params = [
            ("week", week.week.to_string()),
            ("season", season.to_string()),
            ("seasonType", week.segment.api_str().to_string()),
            ("bookIds", join_csv(&self.config.book_ids)),
            ("periods", join_csv(&self.config.periods)),
        ];

        let body = self.get_with_retry(&url, &params).await?;
        let payload: ScoreboardResponse = serde_json::from_str(&body)
            .map_err(|e| FeedError::InvalidResponse(format!("scoreboard JSON: {}", e)))?;

        let pulled_at = Utc::now();
        let observations = parse_game_lines(&payload.games, season, week.week, pulled_at);
        debug!(
            games = payload.games.len(),
            observations = observations.len(),
            "fetched game lines"
        );
        Ok(observations)
    }

    /// Fetches all player-prop observations for one provider week: a games
    /// listing call, then one props call per game.
    pub async fn fetch_player_props(
        &self,
        season: u16,
        week: ProviderWeek,
    ) -> Result<Vec<Observation>, FeedError> {
        let games = self.fetch_game_listing(season, week).await?;
        let pulled_at = Utc::now();

        let mut out = Vec::new();
        for game in &games {
            let url = format!("{}/games/{}/props", self.config.base_url, game.id);
            let params = [
                ("stateCode", self.config.state_code.clone()),
                ("bookIds", join_csv(&self.config.book_ids)),
            ];
            let body = self.get_with_retry(&url, &params).await?;
            let payload: PropsResponse = serde_json::from_str(&body).map_err(|e| {
                FeedError::InvalidResponse(format!("props JSON for game {}: {}", game.id, e))
            })?;

            out.extend(parse_game_props(
                game,
                &payload,
                season,
                week.week,
                pulled_at,
                &self.config.book_ids,
                &self.config.bet_type_overrides,
            ));
        }

        debug!(
            games = games.len(),
            observations = out.len(),
            "fetched player props"
        );
        Ok(out)
    }

    /// Lightweight listing of the week's games (ids and team abbreviations).
    async fn fetch_game_listing(
        &self,
        season: u16,
        week: ProviderWeek,
    ) -> Result<Vec<ListedGame>, FeedError> {
        let url = format!(
            "{}/scoreboard/{}/markets",
            self.config.base_url, self.config.league
        );
        let params = [
            ("week", week.week.to_string()),
            ("season", season.to_string()),
            ("seasonType", week.segment.api_str().to_string()),
            ("bookIds", join_csv(&self.config.book_ids)),
            ("customPickTypes", LISTING_PICK_TYPE.to_string()),
        ];

        let body = self.get_with_retry(&url, &params).await?;
        let payload: ListingResponse = serde_json::from_str(&body)
            .map_err(|e| FeedError::InvalidResponse(format!("games listing JSON: {}", e)))?;
        Ok(payload.games)
    }

    /// GET with exponential backoff and full jitter. Honors `Retry-After`
    /// on 429/5xx; other client errors fail immediately.
    async fn get_with_retry(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<String, FeedError> {
        for attempt in 0..self.config.max_retries {
            let mut request = self
                .http_client
                .get(url)
                .query(params)
                .header("Accept", "application/json");
            if let Some(ref token) = self.config.access_token {
                request = request.header("access_token", token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.text().await?);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let sleep = retry_after(&response).unwrap_or_else(|| {
                            jittered_backoff(
                                self.config.base_backoff,
                                self.config.max_backoff,
                                attempt,
                            )
                        });
                        warn!(
                            "HTTP {} from {}, backing off {:?} (attempt {}/{})",
                            status,
                            url,
                            sleep,
                            attempt + 1,
                            self.config.max_retries
                        );
                        tokio::time::sleep(sleep).await;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(FeedError::InvalidResponse(format!(
                        "HTTP {}: {}",
                        status,
                        truncate_utf8(&body, 200)
                    )));
                }
                Err(e) if attempt + 1 < self.config.max_retries => {
                    let sleep = jittered_backoff(
                        self.config.base_backoff,
                        self.config.max_backoff,
                        attempt,
                    );
                    warn!(
                        "Request failed: {} (attempt {}/{}), retrying in {:?}",
                        e,
                        attempt + 1,
                        self.config.max_retries,
                        sleep
                    );
                    tokio::time::sleep(sleep).await;
                }
                Err(e) => return Err(FeedError::Http(e)),
            }
        }

        Err(FeedError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.config.max_retries,
        })
    }
}

fn join_csv<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses a `Retry-After` header as seconds.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
}

/// Scoreboard response for game lines.
#[derive(Debug, Deserialize)]
struct ScoreboardResponse {
    #[serde(default)]
    games: Vec<ApiGame>,
}

#[derive(Debug, Deserialize)]
struct ApiGame {
    id: u64,
    #[serde(default)]
    season: Option<u16>,
    #[serde(default)]
    week: Option<u8>,
    #[serde(default)]
    num_bets: Option<i64>,
    #[serde(default)]
    teams: Vec<ApiTeam>,
    /// book id -> period -> market type -> offer list. Kept as raw JSON
    /// because partially quoted books omit arbitrary levels.
    #[serde(default)]
    markets: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ApiTeam {
    id: i64,
    #[serde(default)]
    abbr: Option<String>,
}

/// One quoted outcome, shared by the scoreboard and props payloads.
#[derive(Debug, Deserialize)]
struct ApiOutcome {
    #[serde(default)]
    event_id: Option<u64>,
    #[serde(default, rename = "type")]
    market_type: Option<String>,
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    value: Option<Decimal>,
    #[serde(default)]
    odds: Option<i64>,
    #[serde(default)]
    team_id: Option<i64>,
    #[serde(default)]
    player_id: Option<i64>,
    #[serde(default)]
    odds_coefficient_score: Option<Value>,
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    line_status: Option<Value>,
    #[serde(default)]
    bet_info: Option<BetInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct BetInfo {
    #[serde(default)]
    tickets: BetSplit,
    #[serde(default)]
    money: BetSplit,
}

#[derive(Debug, Default, Deserialize)]
struct BetSplit {
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    percent: Option<Value>,
}

/// Games listing response (props path).
#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    games: Vec<ListedGame>,
}

#[derive(Debug, Deserialize)]
struct ListedGame {
    id: u64,
    #[serde(default)]
    num_bets: Option<i64>,
    #[serde(default)]
    home_team: Option<ApiTeam>,
    #[serde(default)]
    away_team: Option<ApiTeam>,
}

/// Per-game props response.
#[derive(Debug, Deserialize)]
struct PropsResponse {
    /// Dict keyed by player id, or a plain list in older payloads.
    #[serde(default)]
    players: Value,
    #[serde(default)]
    player_props: serde_json::Map<String, Value>,
    #[serde(default)]
    game_props: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ApiPlayer {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    player_id: Option<i64>,
    #[serde(default)]
    abbr: Option<String>,
    #[serde(default)]
    display_text: Option<String>,
    #[serde(default)]
    team_id: Option<i64>,
}

/// Flattens a scoreboard payload into observations.
fn parse_game_lines(
    games: &[ApiGame],
    season: u16,
    week: u8,
    pulled_at: DateTime<Utc>,
) -> Vec<Observation> {
    let mut out = Vec::new();

    for game in games {
        let id_to_abbr: HashMap<i64, &str> = game
            .teams
            .iter()
            .filter_map(|t| t.abbr.as_deref().map(|a| (t.id, a)))
            .collect();

        for (book_key, book_blob) in &game.markets {
            let Ok(book_id) = book_key.parse::<u32>() else {
                continue;
            };
            let Some(period_map) = book_blob.as_object() else {
                continue;
            };

            for (period_key, period_blob) in period_map {
                let Ok(period) = period_key.parse::<Period>() else {
                    continue;
                };
                let Some(market_map) = period_blob.as_object() else {
                    continue;
                };

                for (market_key, offers) in market_map {
                    let Some(offers) = offers.as_array() else {
                        continue;
                    };
                    for offer in offers {
                        let outcome: ApiOutcome = match serde_json::from_value(offer.clone()) {
                            Ok(o) => o,
                            Err(e) => {
                                warn!("Skipping malformed outcome for game {}: {}", game.id, e);
                                continue;
                            }
                        };
                        out.push(outcome_to_observation(
                            game, &outcome, book_id, period, market_key, &id_to_abbr, season,
                            week, pulled_at,
                        ));
                    }
                }
            }
        }
    }

    out
}

#[allow(clippy::too_many_arguments)]
fn outcome_to_observation(
    game: &ApiGame,
    outcome: &ApiOutcome,
    book_id: u32,
    period: Period,
    market_key: &str,
    id_to_abbr: &HashMap<i64, &str>,
    season: u16,
    week: u8,
    pulled_at: DateTime<Utc>,
) -> Observation {
    let market = Market::from(
        outcome
            .market_type
            .clone()
            .unwrap_or_else(|| market_key.to_string()),
    );
    // Prefer the offer's explicit period over the block it was nested under.
    let period = outcome
        .period
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or(period);
    let team_id = outcome.team_id.unwrap_or(0);

    let mut extra = BTreeMap::new();
    if let Some(abbr) = id_to_abbr.get(&team_id) {
        extra.insert("team".to_string(), Value::from(*abbr));
    }
    if let Some(bets) = game.num_bets {
        extra.insert("total_bets_on_event".to_string(), Value::from(bets));
    }
    insert_outcome_extras(&mut extra, outcome);

    Observation {
        market,
        event_id: outcome.event_id.unwrap_or(game.id),
        period,
        side: outcome.side.as_deref().and_then(|s| s.parse().ok()),
        subject_id: team_id,
        season: game.season.unwrap_or(season),
        week: game.week.unwrap_or(week),
        book_id,
        value: outcome.value,
        odds: outcome.odds,
        extra,
        last_updated: Some(pulled_at),
        open_inferred: false,
        open_source_book_id: None,
    }
}

/// Passthrough columns common to game lines and props.
fn insert_outcome_extras(extra: &mut BTreeMap<String, Value>, outcome: &ApiOutcome) {
    if let Some(score) = &outcome.odds_coefficient_score {
        extra.insert("odds_coefficient_score".to_string(), score.clone());
    }
    if let Some(live) = outcome.is_live {
        extra.insert("is_live".to_string(), Value::from(live));
    }
    if let Some(status) = &outcome.line_status {
        extra.insert("line_status".to_string(), status.clone());
    }
    if let Some(info) = &outcome.bet_info {
        for (name, split) in [("tickets", &info.tickets), ("money", &info.money)] {
            if let Some(v) = &split.value {
                extra.insert(format!("{}_value", name), v.clone());
            }
            if let Some(p) = &split.percent {
                extra.insert(format!("{}_percent", name), p.clone());
            }
        }
    }
}

/// Flattens one game's props payload into observations. Offers from books
/// outside `book_ids` are dropped.
fn parse_game_props(
    game: &ListedGame,
    payload: &PropsResponse,
    season: u16,
    week: u8,
    pulled_at: DateTime<Utc>,
    book_ids: &[u32],
    overrides: &BTreeMap<String, String>,
) -> Vec<Observation> {
    let players = index_players(&payload.players);
    let id_to_abbr: HashMap<i64, &str> = [game.home_team.as_ref(), game.away_team.as_ref()]
        .into_iter()
        .flatten()
        .filter_map(|t| t.abbr.as_deref().map(|a| (t.id, a)))
        .collect();

    let mut out = Vec::new();
    for blob in [&payload.player_props, &payload.game_props] {
        for (bet_key, markets) in blob {
            let Some(markets) = markets.as_array() else {
                continue;
            };
            let bet_type = map_bet_type(bet_key, overrides);

            for market in markets {
                let line_type = market.get("line_type").cloned().unwrap_or(Value::Null);
                let Some(lines) = market.get("lines").and_then(|l| l.as_object()) else {
                    continue;
                };

                for (book_key, offers) in lines {
                    let Ok(book_id) = book_key.parse::<u32>() else {
                        continue;
                    };
                    if !book_ids.contains(&book_id) {
                        continue;
                    }
                    let Some(offers) = offers.as_array() else {
                        continue;
                    };

                    for offer in offers {
                        let outcome: ApiOutcome = match serde_json::from_value(offer.clone()) {
                            Ok(o) => o,
                            Err(e) => {
                                warn!("Skipping malformed prop offer for game {}: {}", game.id, e);
                                continue;
                            }
                        };
                        out.push(prop_to_observation(
                            game, &outcome, book_id, &bet_type, &line_type, &players,
                            &id_to_abbr, season, week, pulled_at,
                        ));
                    }
                }
            }
        }
    }

    out
}

#[allow(clippy::too_many_arguments)]
fn prop_to_observation(
    game: &ListedGame,
    outcome: &ApiOutcome,
    book_id: u32,
    bet_type: &str,
    line_type: &Value,
    players: &HashMap<i64, ApiPlayer>,
    id_to_abbr: &HashMap<i64, &str>,
    season: u16,
    week: u8,
    pulled_at: DateTime<Utc>,
) -> Observation {
    let player_id = outcome.player_id.unwrap_or(0);

    let mut extra = BTreeMap::new();
    extra.insert("line_type".to_string(), line_type.clone());
    if let Some(bets) = game.num_bets {
        extra.insert("total_bets_on_event".to_string(), Value::from(bets));
    }

    if let Some(player) = players.get(&player_id) {
        if let Some(abbr) = &player.abbr {
            extra.insert("join_name".to_string(), Value::from(join_name(abbr)));
        }
        // display_text reads "Josh Allen - QB".
        if let Some(pos) = player
            .display_text
            .as_deref()
            .and_then(|t| t.split_once("- "))
            .map(|(_, pos)| pos.trim())
        {
            extra.insert("position".to_string(), Value::from(pos));
            extra.insert(
                "position_group".to_string(),
                Value::from(position_group(pos)),
            );
        }
        let team = player
            .team_id
            .and_then(|tid| id_to_abbr.get(&tid).copied())
            // Free agents carry team id 0 in the payload.
            .unwrap_or("FA");
        extra.insert("team".to_string(), Value::from(team));
    }
    insert_outcome_extras(&mut extra, outcome);

    Observation {
        market: Market::Prop(bet_type.to_string()),
        event_id: outcome.event_id.unwrap_or(game.id),
        period: outcome
            .period
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(Period::Event),
        side: outcome.side.as_deref().and_then(|s| s.parse().ok()),
        subject_id: player_id,
        season,
        week,
        book_id,
        value: outcome.value,
        odds: outcome.odds,
        extra,
        last_updated: Some(pulled_at),
        open_inferred: false,
        open_source_book_id: None,
    }
}

/// Indexes the players blob (dict keyed by id, or plain list) by player id.
fn index_players(players: &Value) -> HashMap<i64, ApiPlayer> {
    let parsed: Vec<ApiPlayer> = match players {
        Value::Object(map) => map
            .values()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        _ => Vec::new(),
    };

    parsed
        .into_iter()
        .filter_map(|p| p.player_id.or(p.id).map(|id| (id, p)))
        .collect()
}
