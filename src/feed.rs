//! External feed handling: fetch the scoreboard for one (season, period) and
//! normalize its events into [`IncomingEvent`] descriptors.
//!
//! The feed is untrusted and partial by design: missing keys become nulls,
//! unknown keys are ignored, and an unrecognized state token never fails the
//! batch — it just carries no state, so the merge cannot regress anything.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, FEED_SEASON_TYPE, FEED_TIMEOUT_SECS};
use crate::error::Result;
use crate::types::{EventState, IncomingEvent};

/// Why a single feed record was rejected. Rejections are counted and reported,
/// never raised — one junk row must not abort a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// home or away name missing/empty.
    MissingNames,
    /// scheduled_time present but unparseable.
    BadTimestamp(String),
}

#[derive(Debug, Default)]
pub struct FeedStats {
    pub total: usize,
    pub parsed: usize,
    pub rejected_missing_names: usize,
    pub rejected_bad_timestamp: usize,
    /// Sample of state tokens we did not recognize (kept for operator logs).
    pub unknown_state_samples: Vec<String>,
}

// ---------------------------------------------------------------------------
// Descriptor parsing
// ---------------------------------------------------------------------------

/// Parses one flat event descriptor:
/// `{home_name, away_name, scheduled_time, state, home_score, away_score,
///   favorite_name, spread_points}` — every key optional, extras ignored.
pub fn parse_event_descriptor(
    v: &Value,
    stats: &mut FeedStats,
) -> std::result::Result<IncomingEvent, Rejection> {
    let home_name = str_field(v, "home_name");
    let away_name = str_field(v, "away_name");
    if home_name.trim().is_empty() || away_name.trim().is_empty() {
        return Err(Rejection::MissingNames);
    }

    let scheduled_time = match v.get("scheduled_time").and_then(|t| t.as_str()) {
        Some(raw) => match parse_feed_time(raw) {
            Some(ts) => Some(ts),
            None => return Err(Rejection::BadTimestamp(raw.to_string())),
        },
        None => None,
    };

    let state = match v.get("state").and_then(|s| s.as_str()) {
        Some(token) => {
            let parsed = EventState::from_feed_token(token);
            if parsed.is_none() {
                debug!(token, "unrecognized feed state token");
                if stats.unknown_state_samples.len() < 10 {
                    stats.unknown_state_samples.push(token.to_string());
                }
            }
            parsed
        }
        None => None,
    };

    // Spread magnitude is normalized to non-negative; the favorite side
    // carries the sign. The source mixes sign conventions, so the stored
    // value's own sign is never meaningful.
    let spread_points = v
        .get("spread_points")
        .and_then(number_field)
        .map(f64::abs);

    Ok(IncomingEvent {
        external_id: v
            .get("external_id")
            .and_then(|x| x.as_str())
            .map(|s| s.to_string()),
        home_name,
        away_name,
        scheduled_time,
        state,
        home_score: v.get("home_score").and_then(int_field),
        away_score: v.get("away_score").and_then(int_field),
        favorite_name: v
            .get("favorite_name")
            .and_then(|x| x.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        spread_points,
    })
}

/// Parses a batch of flat descriptors, accumulating rejection counts.
pub fn parse_event_batch(items: &[Value]) -> (Vec<IncomingEvent>, FeedStats) {
    let mut stats = FeedStats { total: items.len(), ..FeedStats::default() };
    let mut events = Vec::with_capacity(items.len());

    for item in items {
        match parse_event_descriptor(item, &mut stats) {
            Ok(ev) => {
                stats.parsed += 1;
                events.push(ev);
            }
            Err(Rejection::MissingNames) => stats.rejected_missing_names += 1,
            Err(Rejection::BadTimestamp(raw)) => {
                debug!(raw, "skipping record with unparseable timestamp");
                stats.rejected_bad_timestamp += 1;
            }
        }
    }

    (events, stats)
}

// ---------------------------------------------------------------------------
// Scoreboard client
// ---------------------------------------------------------------------------

pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
}

impl FeedClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FEED_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, base_url: cfg.feed_url.clone() })
    }

    /// Fetches the scoreboard for one (season, period) and normalizes each
    /// event to a flat descriptor. An empty result is not an error — early in
    /// the cycle the feed legitimately has nothing yet.
    pub async fn fetch_period(
        &self,
        season_year: i32,
        period_number: u32,
    ) -> Result<(Vec<IncomingEvent>, FeedStats)> {
        let url = format!(
            "{}?week={}&year={}&seasontype={}",
            self.base_url, period_number, season_year, FEED_SEASON_TYPE
        );

        let resp: Value = self.client.get(&url).send().await?.json().await?;
        let raw_events = resp
            .get("events")
            .and_then(|e| e.as_array())
            .cloned()
            .unwrap_or_default();

        let descriptors: Vec<Value> = raw_events.iter().map(normalize_scoreboard_event).collect();
        let (events, stats) = parse_event_batch(&descriptors);

        if events.is_empty() {
            warn!(season_year, period_number, "feed returned no usable events");
        }
        Ok((events, stats))
    }
}

/// Flattens one scoreboard event (competitions/competitors/odds shape) into
/// the descriptor shape `parse_event_descriptor` accepts.
fn normalize_scoreboard_event(ev: &Value) -> Value {
    let comp = ev
        .get("competitions")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .cloned()
        .unwrap_or(Value::Null);

    let mut home = &Value::Null;
    let mut away = &Value::Null;
    if let Some(competitors) = comp.get("competitors").and_then(|c| c.as_array()) {
        for c in competitors {
            match c.get("homeAway").and_then(|s| s.as_str()) {
                Some("home") => home = c,
                Some("away") => away = c,
                _ => {}
            }
        }
    }

    let team_name = |side: &Value| -> Value {
        side.get("team")
            .and_then(|t| t.get("displayName").or_else(|| t.get("name")))
            .cloned()
            .unwrap_or(Value::Null)
    };
    let score = |side: &Value| -> Value {
        side.get("score")
            .and_then(int_field)
            .map(Value::from)
            .unwrap_or(Value::Null)
    };

    // Odds come as a display string like "PIT -5.5"; match the token against
    // both team blocks so the stored favorite is a display name when possible.
    let (favorite, spread) = comp
        .get("odds")
        .or_else(|| ev.get("odds"))
        .and_then(|o| o.as_array())
        .and_then(|a| a.first())
        .and_then(|o| o.get("details"))
        .and_then(|d| d.as_str())
        .and_then(parse_spread_details)
        .map(|(token, points)| {
            let name = resolve_favorite_token(&token, home, away).unwrap_or(token);
            (Value::from(name), Value::from(points))
        })
        .unwrap_or((Value::Null, Value::Null));

    serde_json::json!({
        "external_id": ev.get("id").cloned().unwrap_or(Value::Null),
        "home_name": team_name(home),
        "away_name": team_name(away),
        "scheduled_time": comp.get("date").or_else(|| ev.get("date")).cloned().unwrap_or(Value::Null),
        "state": comp
            .get("status")
            .and_then(|s| s.get("type"))
            .and_then(|t| t.get("state"))
            .cloned()
            .unwrap_or(Value::Null),
        "home_score": score(home),
        "away_score": score(away),
        "favorite_name": favorite,
        "spread_points": spread,
    })
}

/// `"PIT -5.5"` → `("PIT", 5.5)`. The trailing token must parse as a number;
/// everything before it is the favorite token. Magnitude only — sign is
/// inferred from which side is favored, not stored.
pub fn parse_spread_details(details: &str) -> Option<(String, f64)> {
    let details = details.trim();
    let (name_part, num_part) = details.rsplit_once(char::is_whitespace)?;
    let points: f64 = num_part.parse().ok()?;
    let name = name_part.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), points.abs()))
}

/// Matches a favorite token ("PIT") against a competitor's abbreviation or
/// display name and returns the display name on a hit. A miss keeps the raw
/// token; grading degrades to straight-up for names it cannot place.
fn resolve_favorite_token(token: &str, home: &Value, away: &Value) -> Option<String> {
    let token_lower = token.trim().to_lowercase();
    for side in [home, away] {
        let Some(team) = side.get("team") else {
            continue;
        };
        let display = team
            .get("displayName")
            .or_else(|| team.get("name"))
            .and_then(|n| n.as_str());
        let abbrev = team.get("abbreviation").and_then(|a| a.as_str());
        let hit = abbrev.map(|a| a.to_lowercase() == token_lower).unwrap_or(false)
            || display.map(|d| d.to_lowercase() == token_lower).unwrap_or(false);
        if hit {
            return display.map(|d| d.to_string());
        }
    }
    None
}

/// Feed timestamps arrive as RFC 3339 or the minute-precision `2025-09-07T17:00Z`.
pub fn parse_feed_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let stripped = raw.strip_suffix('Z').unwrap_or(raw);
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Integers may arrive as numbers or as numeric strings.
fn int_field(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn number_field(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}
