use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Periods ("weeks")
// ---------------------------------------------------------------------------

/// Identifies one scheduling cycle within a season. `period_number` may exceed
/// the regular-season range to represent post-season rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodKey {
    pub season_year: i32,
    pub period_number: u32,
}

impl PeriodKey {
    pub fn new(season_year: i32, period_number: u32) -> Self {
        Self { season_year, period_number }
    }
}

impl std::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-W{}", self.season_year, self.period_number)
    }
}

#[derive(Debug, Clone)]
pub struct Period {
    pub id: i64,
    pub season_year: i32,
    pub period_number: u32,
    pub pick_deadline: Option<DateTime<Utc>>,
    pub reminder_sent: bool,
}

impl Period {
    pub fn key(&self) -> PeriodKey {
        PeriodKey::new(self.season_year, self.period_number)
    }
}

// ---------------------------------------------------------------------------
// Events ("games")
// ---------------------------------------------------------------------------

/// Lifecycle state of an event. Ordered: transitions only move forward, a
/// merge never downgrades `Final` back to `Live`/`Scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Scheduled,
    Live,
    Final,
}

impl EventState {
    /// Numeric rank used by the guarded merge UPDATE: scheduled=0, live=1, final=2.
    pub fn rank(self) -> i64 {
        match self {
            EventState::Scheduled => 0,
            EventState::Live => 1,
            EventState::Final => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventState::Scheduled => "scheduled",
            EventState::Live => "live",
            EventState::Final => "final",
        }
    }

    /// Parses the stored column value. Unknown text is treated as scheduled
    /// so a damaged row never blocks reads.
    pub fn from_column(s: &str) -> Self {
        match s {
            "live" => EventState::Live,
            "final" => EventState::Final,
            _ => EventState::Scheduled,
        }
    }

    /// Maps a feed state token (`pre`/`in`/`post`) to an event state.
    /// Unrecognized tokens return None — the merge must not regress stored
    /// state on the strength of a token it does not understand.
    pub fn from_feed_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "pre" | "scheduled" => Some(EventState::Scheduled),
            "in" | "live" | "in_progress" => Some(EventState::Live),
            "post" | "final" => Some(EventState::Final),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stored contest within a period. Team names are free-form display names,
/// not normalized codes; the merge key is the case-insensitive (home, away)
/// pair, never `external_id` alone.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub id: i64,
    pub period_id: i64,
    pub external_id: Option<String>,
    pub home_name: String,
    pub away_name: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub state: EventState,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub favorite_name: Option<String>,
    /// Non-negative magnitude; which side lays the points is carried by
    /// `favorite_name`, never by the sign of this value.
    pub spread_points: Option<f64>,
    pub winner_straight_up: Option<String>,
}

impl EventRecord {
    /// Case-insensitive, whitespace-trimmed merge key within a period.
    pub fn match_key(&self) -> (String, String) {
        normalize_pair(&self.home_name, &self.away_name)
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn normalize_pair(home: &str, away: &str) -> (String, String) {
    (normalize_name(home), normalize_name(away))
}

// ---------------------------------------------------------------------------
// Incoming feed records
// ---------------------------------------------------------------------------

/// One event descriptor as parsed from the external feed. All fields except
/// the team names are optional — partial data is normal and merged per-field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub external_id: Option<String>,
    pub home_name: String,
    pub away_name: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub state: Option<EventState>,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub favorite_name: Option<String>,
    pub spread_points: Option<f64>,
}

impl IncomingEvent {
    pub fn match_key(&self) -> (String, String) {
        normalize_pair(&self.home_name, &self.away_name)
    }

    /// True when both team names are present — the minimum a record needs to
    /// participate in matching at all.
    pub fn has_names(&self) -> bool {
        !self.home_name.trim().is_empty() && !self.away_name.trim().is_empty()
    }

    /// Scores are taken both-or-nothing; a record carrying only one side is
    /// treated as carrying none.
    pub fn paired_scores(&self) -> Option<(i64, i64)> {
        match (self.home_score, self.away_score) {
            (Some(h), Some(a)) => Some((h, a)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconcile summary
// ---------------------------------------------------------------------------

/// Outcome counts for one reconciliation run. Reported to the caller so
/// operators can spot silent data-quality drift — a feed renaming a team shows
/// up here as unmatched counts, not as a guess.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileSummary {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    /// Incoming records missing a team name — skipped, never raised.
    pub skipped: u32,
    /// Incoming records whose (home, away) key collided with more than one
    /// stored event after normalization. Reported, never fuzzy-matched.
    pub unmatched_incoming: Vec<String>,
    /// Stored events this batch said nothing about.
    pub unmatched_existing: Vec<String>,
}

// ---------------------------------------------------------------------------
// Picks and participants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: i64,
    pub name: String,
}

/// A participant's winner choice for one event. Written by the external
/// picking interface; read-only to the reconciler and grader.
#[derive(Debug, Clone)]
pub struct Pick {
    pub participant_id: i64,
    pub event_id: i64,
    pub selected_name: String,
}

// ---------------------------------------------------------------------------
// Grading
// ---------------------------------------------------------------------------

/// Derived outcome for one event under a grading mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingResult {
    /// The named side won (straight-up, or covered the spread).
    Side(String),
    /// Exact equality after spread adjustment — no side covers.
    Push,
    /// Not gradeable: event not final, scores missing, or a spreadless tie.
    Undetermined,
}

impl GradingResult {
    pub fn side(&self) -> Option<&str> {
        match self {
            GradingResult::Side(name) => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for GradingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GradingResult::Side(name) => write!(f, "{name}"),
            GradingResult::Push => write!(f, "PUSH"),
            GradingResult::Undetermined => write!(f, "UNDETERMINED"),
        }
    }
}

/// Which rule a tally applies to each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TallyMode {
    StraightUp,
    Ats,
}

impl std::fmt::Display for TallyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TallyMode::StraightUp => write!(f, "straight_up"),
            TallyMode::Ats => write!(f, "ats"),
        }
    }
}

/// One ranked row in a standings tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub participant_id: i64,
    pub name: String,
    pub correct_count: u32,
}
