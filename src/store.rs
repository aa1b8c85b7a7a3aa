//! SQLite persistence for periods, events, participants, and picks.
//!
//! Reads hydrate the domain types in `types`; the reconciler owns its own
//! merge SQL and runs it inside a transaction on this pool. The core never
//! deletes events — removal is an administrative operation outside it.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::period::PeriodEvents;
use crate::types::{EventRecord, EventState, Participant, Period, PeriodKey, Pick};

#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- periods ------------------------------------------------------------

    /// Creates the period row if absent and returns its id. Safe to call
    /// repeatedly; the (season_year, period_number) pair is unique.
    pub async fn ensure_period(&self, key: PeriodKey) -> Result<i64> {
        sqlx::query(
            "INSERT INTO periods (season_year, period_number) VALUES (?1, ?2)
             ON CONFLICT (season_year, period_number) DO NOTHING",
        )
        .bind(key.season_year)
        .bind(key.period_number as i64)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM periods WHERE season_year = ?1 AND period_number = ?2",
        )
        .bind(key.season_year)
        .bind(key.period_number as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn find_period(&self, key: PeriodKey) -> Result<Option<Period>> {
        let row = sqlx::query(
            "SELECT id, season_year, period_number, pick_deadline, reminder_sent
             FROM periods WHERE season_year = ?1 AND period_number = ?2",
        )
        .bind(key.season_year)
        .bind(key.period_number as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| period_from_row(&r)).transpose()
    }

    /// Flag set by the notification layer once a reminder went out; the only
    /// mutation a period accepts after its games begin.
    pub async fn set_reminder_sent(&self, period_id: i64, sent: bool) -> Result<()> {
        sqlx::query("UPDATE periods SET reminder_sent = ?1 WHERE id = ?2")
            .bind(i64::from(sent))
            .bind(period_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- events -------------------------------------------------------------

    pub async fn events_for_period(&self, period_id: i64) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(
            "SELECT id, period_id, external_id, home_name, away_name, scheduled_time,
                    state, home_score, away_score, favorite_name, spread_points,
                    winner_straight_up
             FROM events WHERE period_id = ?1 ORDER BY id",
        )
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    /// All periods of a season with their events, for the period resolver.
    pub async fn season_snapshot(&self, season_year: i32) -> Result<Vec<PeriodEvents>> {
        let period_rows = sqlx::query(
            "SELECT id, season_year, period_number, pick_deadline, reminder_sent
             FROM periods WHERE season_year = ?1 ORDER BY period_number",
        )
        .bind(season_year)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = Vec::with_capacity(period_rows.len());
        for row in &period_rows {
            let period = period_from_row(row)?;
            let events = self.events_for_period(period.id).await?;
            snapshot.push(PeriodEvents { period, events });
        }
        Ok(snapshot)
    }

    /// Union of final-gradeable events across a contiguous period range, for
    /// season-to-date tallies.
    pub async fn events_for_period_range(
        &self,
        season_year: i32,
        from_period: u32,
        to_period: u32,
    ) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(
            "SELECT e.id, e.period_id, e.external_id, e.home_name, e.away_name,
                    e.scheduled_time, e.state, e.home_score, e.away_score,
                    e.favorite_name, e.spread_points, e.winner_straight_up
             FROM events e
             JOIN periods p ON p.id = e.period_id
             WHERE p.season_year = ?1 AND p.period_number >= ?2 AND p.period_number <= ?3
             ORDER BY e.id",
        )
        .bind(season_year)
        .bind(from_period as i64)
        .bind(to_period as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    // -- participants and picks ---------------------------------------------

    pub async fn roster(&self) -> Result<Vec<Participant>> {
        let rows = sqlx::query("SELECT id, name FROM participants ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| Participant { id: r.get("id"), name: r.get("name") })
            .collect())
    }

    /// Roster entry point for the external picking interface; the sync daemon
    /// itself only reads the roster.
    #[allow(dead_code)]
    pub async fn add_participant(&self, name: &str) -> Result<i64> {
        sqlx::query("INSERT INTO participants (name) VALUES (?1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM participants WHERE name = ?1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// At most one pick per (participant, event); a later pick overwrites.
    /// Written by the picking interface — the reconciler never touches picks.
    #[allow(dead_code)]
    pub async fn upsert_pick(
        &self,
        participant_id: i64,
        event_id: i64,
        selected_name: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO picks (participant_id, event_id, selected_name)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (participant_id, event_id)
             DO UPDATE SET selected_name = excluded.selected_name",
        )
        .bind(participant_id)
        .bind(event_id)
        .bind(selected_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn picks_for_period(&self, period_id: i64) -> Result<Vec<Pick>> {
        let rows = sqlx::query(
            "SELECT p.participant_id, p.event_id, p.selected_name
             FROM picks p
             JOIN events e ON e.id = p.event_id
             WHERE e.period_id = ?1",
        )
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(pick_from_row).collect())
    }

    pub async fn picks_for_period_range(
        &self,
        season_year: i32,
        from_period: u32,
        to_period: u32,
    ) -> Result<Vec<Pick>> {
        let rows = sqlx::query(
            "SELECT pk.participant_id, pk.event_id, pk.selected_name
             FROM picks pk
             JOIN events e ON e.id = pk.event_id
             JOIN periods p ON p.id = e.period_id
             WHERE p.season_year = ?1 AND p.period_number >= ?2 AND p.period_number <= ?3",
        )
        .bind(season_year)
        .bind(from_period as i64)
        .bind(to_period as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(pick_from_row).collect())
    }
}

// ---------------------------------------------------------------------------
// Row hydration
// ---------------------------------------------------------------------------

pub(crate) fn event_from_row(row: &SqliteRow) -> Result<EventRecord> {
    let state_text: String = row.try_get("state")?;
    Ok(EventRecord {
        id: row.try_get("id")?,
        period_id: row.try_get("period_id")?,
        external_id: row.try_get("external_id")?,
        home_name: row.try_get("home_name")?,
        away_name: row.try_get("away_name")?,
        scheduled_time: row.try_get::<Option<DateTime<Utc>>, _>("scheduled_time")?,
        state: EventState::from_column(&state_text),
        home_score: row.try_get("home_score")?,
        away_score: row.try_get("away_score")?,
        favorite_name: row.try_get("favorite_name")?,
        spread_points: row.try_get("spread_points")?,
        winner_straight_up: row.try_get("winner_straight_up")?,
    })
}

fn period_from_row(row: &SqliteRow) -> Result<Period> {
    let period_number: i64 = row.try_get("period_number")?;
    let reminder_sent: i64 = row.try_get("reminder_sent")?;
    Ok(Period {
        id: row.try_get("id")?,
        season_year: row.try_get("season_year")?,
        period_number: period_number as u32,
        pick_deadline: row.try_get::<Option<DateTime<Utc>>, _>("pick_deadline")?,
        reminder_sent: reminder_sent != 0,
    })
}

fn pick_from_row(row: &SqliteRow) -> Pick {
    Pick {
        participant_id: row.get("participant_id"),
        event_id: row.get("event_id"),
        selected_name: row.get("selected_name"),
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    pool
}
