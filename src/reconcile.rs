//! Idempotent merge of fetched feed events into the stored schedule.
//!
//! One run is one transaction: a persistence failure partway leaves no
//! partial view, and because every per-field rule is convergent the safe
//! response to a failed run is simply retrying it later. The merge UPDATE is
//! expressed with COALESCE/CASE precedence so the invariants also hold if two
//! runs for the same period ever overlap.

use std::collections::HashMap;

use sqlx::{Sqlite, Transaction};
use tracing::{info, warn};

use crate::error::Result;
use crate::grading::straight_up_winner;
use crate::store::{event_from_row, EventStore};
use crate::types::{
    EventRecord, EventState, IncomingEvent, PeriodKey, ReconcileSummary,
};

pub struct Reconciler {
    store: EventStore,
}

impl Reconciler {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    /// Merges a batch of incoming events into the period's stored events.
    ///
    /// Matching is case-insensitive trimmed (home, away) within the period;
    /// zero matches create a new event, ambiguous matches are reported and
    /// never guessed. The period row itself is created implicitly on the
    /// first import. Running the same batch twice reports `updated == 0` the
    /// second time and leaves the store unchanged.
    pub async fn reconcile(
        &self,
        key: PeriodKey,
        incoming: &[IncomingEvent],
    ) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let mut tx = self.store.pool().begin().await?;

        let period_id = ensure_period_tx(&mut tx, key).await?;
        let mut existing = load_events_tx(&mut tx, period_id).await?;

        // Keys held by more than one stored row cannot be matched safely.
        let mut key_counts: HashMap<(String, String), u32> = HashMap::new();
        for ev in existing.values() {
            *key_counts.entry(ev.match_key()).or_default() += 1;
        }
        let ambiguous: Vec<(String, String)> = key_counts
            .iter()
            .filter(|(_, &n)| n > 1)
            .map(|(k, _)| k.clone())
            .collect();

        let mut by_key: HashMap<(String, String), i64> = existing
            .values()
            .filter(|ev| !ambiguous.contains(&ev.match_key()))
            .map(|ev| (ev.match_key(), ev.id))
            .collect();
        let mut touched_keys: Vec<(String, String)> = Vec::new();

        for inc in incoming {
            if !inc.has_names() {
                summary.skipped += 1;
                continue;
            }
            let match_key = inc.match_key();

            if ambiguous.contains(&match_key) {
                warn!(
                    period = %key,
                    matchup = %matchup_label(&inc.away_name, &inc.home_name),
                    "incoming event matches multiple stored rows; not guessing"
                );
                summary
                    .unmatched_incoming
                    .push(matchup_label(&inc.away_name, &inc.home_name));
                continue;
            }

            match by_key.get(&match_key).copied() {
                Some(event_id) => {
                    let current = &existing[&event_id];
                    let merged = apply_merge(current, inc);
                    if merged == *current {
                        summary.unchanged += 1;
                    } else {
                        persist_merge_tx(&mut tx, inc, &merged).await?;
                        summary.updated += 1;
                    }
                    touched_keys.push(match_key);
                    existing.insert(event_id, merged);
                }
                None => {
                    let created = insert_event_tx(&mut tx, period_id, inc).await?;
                    summary.created += 1;
                    by_key.insert(match_key.clone(), created.id);
                    touched_keys.push(match_key);
                    existing.insert(created.id, created);
                }
            }
        }

        for ev in existing.values() {
            if !touched_keys.contains(&ev.match_key()) {
                summary
                    .unmatched_existing
                    .push(matchup_label(&ev.away_name, &ev.home_name));
            }
        }
        summary.unmatched_existing.sort();

        tx.commit().await?;

        info!(
            period = %key,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            unmatched_incoming = summary.unmatched_incoming.len(),
            unmatched_existing = summary.unmatched_existing.len(),
            "reconcile complete"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Merge policy (pure)
// ---------------------------------------------------------------------------

/// Applies the per-field merge rules and returns the post-merge record:
///
/// - `external_id`: filled once, then kept.
/// - `scheduled_time`: latest non-null wins, never cleared.
/// - `state`: monotonically furthest of existing/incoming.
/// - scores: taken both-or-nothing.
/// - favorite/spread: independently overwritten by non-null values only, so a
///   fetch reporting one of the pair never clears the other.
/// - `winner_straight_up`: recomputed from merged scores once final; whatever
///   winner the feed itself claims is never consulted.
pub fn apply_merge(existing: &EventRecord, incoming: &IncomingEvent) -> EventRecord {
    let mut merged = existing.clone();

    if merged.external_id.is_none() {
        merged.external_id = incoming.external_id.clone();
    }
    if let Some(ts) = incoming.scheduled_time {
        merged.scheduled_time = Some(ts);
    }
    if let Some(state) = incoming.state {
        merged.state = merged.state.max(state);
    }
    if let Some((home, away)) = incoming.paired_scores() {
        merged.home_score = Some(home);
        merged.away_score = Some(away);
    }
    if let Some(favorite) = &incoming.favorite_name {
        merged.favorite_name = Some(favorite.clone());
    }
    if let Some(spread) = incoming.spread_points {
        merged.spread_points = Some(spread);
    }
    if merged.state == EventState::Final {
        merged.winner_straight_up = straight_up_winner(&merged);
    }
    merged
}

fn matchup_label(away: &str, home: &str) -> String {
    format!("{away} @ {home}")
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

async fn ensure_period_tx(tx: &mut Transaction<'_, Sqlite>, key: PeriodKey) -> Result<i64> {
    sqlx::query(
        "INSERT INTO periods (season_year, period_number) VALUES (?1, ?2)
         ON CONFLICT (season_year, period_number) DO NOTHING",
    )
    .bind(key.season_year)
    .bind(key.period_number as i64)
    .execute(&mut **tx)
    .await?;

    let id: i64 =
        sqlx::query_scalar("SELECT id FROM periods WHERE season_year = ?1 AND period_number = ?2")
            .bind(key.season_year)
            .bind(key.period_number as i64)
            .fetch_one(&mut **tx)
            .await?;
    Ok(id)
}

async fn load_events_tx(
    tx: &mut Transaction<'_, Sqlite>,
    period_id: i64,
) -> Result<HashMap<i64, EventRecord>> {
    let rows = sqlx::query(
        "SELECT id, period_id, external_id, home_name, away_name, scheduled_time,
                state, home_score, away_score, favorite_name, spread_points,
                winner_straight_up
         FROM events WHERE period_id = ?1",
    )
    .bind(period_id)
    .fetch_all(&mut **tx)
    .await?;

    let mut map = HashMap::with_capacity(rows.len());
    for row in &rows {
        let ev = event_from_row(row)?;
        map.insert(ev.id, ev);
    }
    Ok(map)
}

/// Single guarded UPDATE: incoming values are bound raw and the statement
/// itself enforces field precedence (COALESCE, both-or-nothing scores, state
/// rank comparison), so the row converges correctly even if another run
/// touched it between our read and this write.
async fn persist_merge_tx(
    tx: &mut Transaction<'_, Sqlite>,
    incoming: &IncomingEvent,
    merged: &EventRecord,
) -> Result<()> {
    let state_text = incoming.state.map(|s| s.as_str());
    let state_rank = incoming.state.map(|s| s.rank()).unwrap_or(-1);
    let (home_score, away_score) = match incoming.paired_scores() {
        Some((h, a)) => (Some(h), Some(a)),
        None => (None, None),
    };

    sqlx::query(
        "UPDATE events SET
            external_id    = COALESCE(external_id, ?1),
            scheduled_time = COALESCE(?2, scheduled_time),
            state = CASE
                WHEN ?3 > (CASE state WHEN 'live' THEN 1 WHEN 'final' THEN 2 ELSE 0 END)
                THEN ?4 ELSE state END,
            home_score = CASE WHEN ?5 IS NOT NULL AND ?6 IS NOT NULL
                              THEN ?5 ELSE home_score END,
            away_score = CASE WHEN ?5 IS NOT NULL AND ?6 IS NOT NULL
                              THEN ?6 ELSE away_score END,
            favorite_name = COALESCE(?7, favorite_name),
            spread_points = COALESCE(?8, spread_points)
         WHERE id = ?9",
    )
    .bind(&incoming.external_id)
    .bind(incoming.scheduled_time)
    .bind(state_rank)
    .bind(state_text)
    .bind(home_score)
    .bind(away_score)
    .bind(&incoming.favorite_name)
    .bind(incoming.spread_points)
    .bind(merged.id)
    .execute(&mut **tx)
    .await?;

    // Winner is derived, never fed: recompute from the merged row, and only
    // stamp it while the row really is final.
    sqlx::query(
        "UPDATE events SET winner_straight_up = ?1 WHERE id = ?2 AND state = 'final'",
    )
    .bind(&merged.winner_straight_up)
    .bind(merged.id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_event_tx(
    tx: &mut Transaction<'_, Sqlite>,
    period_id: i64,
    incoming: &IncomingEvent,
) -> Result<EventRecord> {
    let state = incoming.state.unwrap_or(EventState::Scheduled);
    let (home_score, away_score) = match incoming.paired_scores() {
        Some((h, a)) => (Some(h), Some(a)),
        None => (None, None),
    };

    let result = sqlx::query(
        "INSERT INTO events
            (period_id, external_id, home_name, away_name, scheduled_time,
             state, home_score, away_score, favorite_name, spread_points)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(period_id)
    .bind(&incoming.external_id)
    .bind(incoming.home_name.trim())
    .bind(incoming.away_name.trim())
    .bind(incoming.scheduled_time)
    .bind(state.as_str())
    .bind(home_score)
    .bind(away_score)
    .bind(&incoming.favorite_name)
    .bind(incoming.spread_points)
    .execute(&mut **tx)
    .await?;

    let mut record = EventRecord {
        id: result.last_insert_rowid(),
        period_id,
        external_id: incoming.external_id.clone(),
        home_name: incoming.home_name.trim().to_string(),
        away_name: incoming.away_name.trim().to_string(),
        scheduled_time: incoming.scheduled_time,
        state,
        home_score,
        away_score,
        favorite_name: incoming.favorite_name.clone(),
        spread_points: incoming.spread_points,
        winner_straight_up: None,
    };

    if record.state == EventState::Final {
        record.winner_straight_up = straight_up_winner(&record);
        sqlx::query("UPDATE events SET winner_straight_up = ?1 WHERE id = ?2")
            .bind(&record.winner_straight_up)
            .bind(record.id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_pool;
    use chrono::{TimeZone, Utc};

    fn incoming(home: &str, away: &str) -> IncomingEvent {
        IncomingEvent {
            home_name: home.to_string(),
            away_name: away.to_string(),
            ..IncomingEvent::default()
        }
    }

    fn final_incoming(home: &str, away: &str, hs: i64, a_s: i64) -> IncomingEvent {
        IncomingEvent {
            state: Some(EventState::Final),
            home_score: Some(hs),
            away_score: Some(a_s),
            ..incoming(home, away)
        }
    }

    async fn reconciler() -> Reconciler {
        Reconciler::new(EventStore::new(test_pool().await))
    }

    fn key() -> PeriodKey {
        PeriodKey::new(2025, 1)
    }

    // -- merge policy (pure) ------------------------------------------------

    fn stored(home: &str, away: &str) -> EventRecord {
        EventRecord {
            id: 1,
            period_id: 1,
            external_id: None,
            home_name: home.to_string(),
            away_name: away.to_string(),
            scheduled_time: None,
            state: EventState::Scheduled,
            home_score: None,
            away_score: None,
            favorite_name: None,
            spread_points: None,
            winner_straight_up: None,
        }
    }

    #[test]
    fn merge_never_downgrades_final() {
        let mut current = stored("Steelers", "Ravens");
        current.state = EventState::Final;
        current.home_score = Some(24);
        current.away_score = Some(20);
        current.winner_straight_up = Some("Steelers".to_string());

        let mut stale = incoming("Steelers", "Ravens");
        stale.state = Some(EventState::Scheduled);

        let merged = apply_merge(&current, &stale);
        assert_eq!(merged.state, EventState::Final);
        assert_eq!(merged.home_score, Some(24));
        assert_eq!(merged.winner_straight_up, Some("Steelers".to_string()));
    }

    #[test]
    fn merge_rejects_partial_scores_as_a_unit() {
        let mut current = stored("Steelers", "Ravens");
        current.home_score = Some(10);
        current.away_score = Some(7);

        let mut partial = incoming("Steelers", "Ravens");
        partial.home_score = Some(17);

        let merged = apply_merge(&current, &partial);
        assert_eq!(merged.home_score, Some(10));
        assert_eq!(merged.away_score, Some(7));
    }

    #[test]
    fn merge_never_clears_scheduled_time() {
        let kickoff = Utc.with_ymd_and_hms(2025, 9, 7, 17, 0, 0).unwrap();
        let mut current = stored("Steelers", "Ravens");
        current.scheduled_time = Some(kickoff);

        let merged = apply_merge(&current, &incoming("Steelers", "Ravens"));
        assert_eq!(merged.scheduled_time, Some(kickoff));

        // A moved game refreshes the time.
        let moved = kickoff + chrono::Duration::hours(4);
        let mut update = incoming("Steelers", "Ravens");
        update.scheduled_time = Some(moved);
        assert_eq!(apply_merge(&current, &update).scheduled_time, Some(moved));
    }

    #[test]
    fn merge_keeps_spread_when_fetch_reports_only_half_the_pair() {
        let mut current = stored("Steelers", "Ravens");
        current.favorite_name = Some("Steelers".to_string());
        current.spread_points = Some(3.5);

        let mut half = incoming("Steelers", "Ravens");
        half.favorite_name = Some("Steelers".to_string());

        let merged = apply_merge(&current, &half);
        assert_eq!(merged.spread_points, Some(3.5));
        assert_eq!(merged.favorite_name, Some("Steelers".to_string()));
    }

    #[test]
    fn merge_recomputes_winner_when_final() {
        let current = stored("Steelers", "Ravens");
        let merged = apply_merge(&current, &final_incoming("Steelers", "Ravens", 20, 24));
        assert_eq!(merged.winner_straight_up, Some("Ravens".to_string()));

        // A final tie has no straight-up winner.
        let tied = apply_merge(&current, &final_incoming("Steelers", "Ravens", 21, 21));
        assert_eq!(tied.winner_straight_up, None);
    }

    // -- full runs against sqlite -------------------------------------------

    #[tokio::test]
    async fn first_run_creates_period_and_events() {
        let rec = reconciler().await;
        let batch = vec![
            incoming("Steelers", "Ravens"),
            incoming("Bills", "Jets"),
        ];
        let summary = rec.reconcile(key(), &batch).await.unwrap();
        assert_eq!(summary.created, 2);
        assert_eq!(summary.updated, 0);

        // Period was created implicitly.
        let period = rec.store.find_period(key()).await.unwrap().unwrap();
        let events = rec.store.events_for_period(period.id).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn second_identical_run_changes_nothing() {
        let rec = reconciler().await;
        let batch = vec![
            final_incoming("Steelers", "Ravens", 24, 20),
            incoming("Bills", "Jets"),
        ];
        rec.reconcile(key(), &batch).await.unwrap();

        let period = rec.store.find_period(key()).await.unwrap().unwrap();
        let before = rec.store.events_for_period(period.id).await.unwrap();

        let summary = rec.reconcile(key(), &batch).await.unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.unchanged, 2);

        let after = rec.store.events_for_period(period.id).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn stale_state_never_regresses_stored_final() {
        let rec = reconciler().await;
        rec.reconcile(key(), &[final_incoming("Steelers", "Ravens", 24, 20)])
            .await
            .unwrap();

        // Stale fetch: game shown as pre-kick with no scores.
        let mut stale = incoming("Steelers", "Ravens");
        stale.state = Some(EventState::Scheduled);
        rec.reconcile(key(), &[stale]).await.unwrap();

        let period = rec.store.find_period(key()).await.unwrap().unwrap();
        let events = rec.store.events_for_period(period.id).await.unwrap();
        assert_eq!(events[0].state, EventState::Final);
        assert_eq!(events[0].home_score, Some(24));
        assert_eq!(events[0].away_score, Some(20));
        assert_eq!(events[0].winner_straight_up, Some("Steelers".to_string()));
    }

    #[tokio::test]
    async fn partial_scores_never_persist() {
        let rec = reconciler().await;
        rec.reconcile(key(), &[incoming("Steelers", "Ravens")]).await.unwrap();

        let mut partial = incoming("Steelers", "Ravens");
        partial.home_score = Some(14);
        rec.reconcile(key(), &[partial]).await.unwrap();

        let period = rec.store.find_period(key()).await.unwrap().unwrap();
        let events = rec.store.events_for_period(period.id).await.unwrap();
        assert_eq!(events[0].home_score, None);
        assert_eq!(events[0].away_score, None);
    }

    #[tokio::test]
    async fn matching_is_case_insensitive_and_trimmed() {
        let rec = reconciler().await;
        rec.reconcile(key(), &[incoming("Steelers", "Ravens")]).await.unwrap();

        let summary = rec
            .reconcile(key(), &[incoming("  STEELERS ", "ravens")])
            .await
            .unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.unchanged, 1);
    }

    #[tokio::test]
    async fn nameless_records_are_skipped_not_fatal() {
        let rec = reconciler().await;
        let batch = vec![incoming("", "Ravens"), incoming("Bills", "Jets")];
        let summary = rec.reconcile(key(), &batch).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.created, 1);
    }

    #[tokio::test]
    async fn ambiguous_match_is_reported_never_guessed() {
        let rec = reconciler().await;
        let period_id = rec.store.ensure_period(key()).await.unwrap();
        for _ in 0..2 {
            sqlx::query(
                "INSERT INTO events (period_id, home_name, away_name)
                 VALUES (?1, 'Steelers', 'Ravens')",
            )
            .bind(period_id)
            .execute(rec.store.pool())
            .await
            .unwrap();
        }

        let summary = rec
            .reconcile(key(), &[final_incoming("Steelers", "Ravens", 24, 20)])
            .await
            .unwrap();
        assert_eq!(summary.unmatched_incoming, vec!["Ravens @ Steelers".to_string()]);
        assert_eq!(summary.updated, 0);

        // Neither duplicate row was touched.
        let events = rec.store.events_for_period(period_id).await.unwrap();
        assert!(events.iter().all(|e| e.home_score.is_none()));
    }

    #[tokio::test]
    async fn stored_events_absent_from_batch_are_reported() {
        let rec = reconciler().await;
        rec.reconcile(
            key(),
            &[incoming("Steelers", "Ravens"), incoming("Bills", "Jets")],
        )
        .await
        .unwrap();

        let summary = rec.reconcile(key(), &[incoming("Bills", "Jets")]).await.unwrap();
        assert_eq!(summary.unmatched_existing, vec!["Ravens @ Steelers".to_string()]);
    }

    #[tokio::test]
    async fn spread_survives_a_scores_only_fetch() {
        let rec = reconciler().await;
        let mut with_spread = incoming("Steelers", "Ravens");
        with_spread.favorite_name = Some("Steelers".to_string());
        with_spread.spread_points = Some(3.5);
        rec.reconcile(key(), &[with_spread]).await.unwrap();

        // Later fetch has scores but no odds block at all.
        rec.reconcile(key(), &[final_incoming("Steelers", "Ravens", 24, 20)])
            .await
            .unwrap();

        let period = rec.store.find_period(key()).await.unwrap().unwrap();
        let events = rec.store.events_for_period(period.id).await.unwrap();
        assert_eq!(events[0].favorite_name, Some("Steelers".to_string()));
        assert_eq!(events[0].spread_points, Some(3.5));
        assert_eq!(events[0].state, EventState::Final);
    }

    #[tokio::test]
    async fn external_id_fills_once_then_sticks() {
        let rec = reconciler().await;
        rec.reconcile(key(), &[incoming("Steelers", "Ravens")]).await.unwrap();

        let mut tagged = incoming("Steelers", "Ravens");
        tagged.external_id = Some("401547417".to_string());
        rec.reconcile(key(), &[tagged]).await.unwrap();

        let mut retagged = incoming("Steelers", "Ravens");
        retagged.external_id = Some("different".to_string());
        rec.reconcile(key(), &[retagged]).await.unwrap();

        let period = rec.store.find_period(key()).await.unwrap().unwrap();
        let events = rec.store.events_for_period(period.id).await.unwrap();
        assert_eq!(events[0].external_id, Some("401547417".to_string()));
    }

    #[tokio::test]
    async fn separate_periods_do_not_interfere() {
        let rec = reconciler().await;
        rec.reconcile(key(), &[incoming("Steelers", "Ravens")]).await.unwrap();
        let summary = rec
            .reconcile(PeriodKey::new(2025, 2), &[incoming("Steelers", "Ravens")])
            .await
            .unwrap();
        // Same matchup in a different period is a new event, not a match.
        assert_eq!(summary.created, 1);
    }
}
