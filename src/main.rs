mod config;
mod error;
mod feed;
mod grading;
mod period;
mod reconcile;
mod standings;
mod store;
mod types;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;
use crate::feed::FeedClient;
use crate::period::{find_last_completed, find_upcoming, next_import_target, PeriodEvents};
use crate::reconcile::Reconciler;
use crate::standings::tally;
use crate::store::EventStore;
use crate::types::{PeriodKey, TallyMode};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    let store = EventStore::new(pool);
    let reconciler = Reconciler::new(store.clone());
    let feed = FeedClient::new(&cfg)?;

    info!(
        season = cfg.season_year,
        interval_secs = cfg.sync_interval_secs,
        "sync loop starting"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.sync_interval_secs));
    loop {
        interval.tick().await;
        if let Err(e) = run_cycle(&cfg, &store, &reconciler, &feed).await {
            // Merges are idempotent; a failed run is safe to retry on the
            // next tick rather than unwound here.
            error!("sync cycle failed: {e}");
        }
    }
}

/// One cron-style pass: decide which periods are stale, fetch and reconcile
/// each, then log standings for the last completed period.
async fn run_cycle(
    cfg: &Config,
    store: &EventStore,
    reconciler: &Reconciler,
    feed: &FeedClient,
) -> Result<()> {
    let now = Utc::now();
    let snapshot = store.season_snapshot(cfg.season_year).await?;

    let mut targets: Vec<u32> = Vec::new();

    // Periods already underway: events exist, kickoff passed, not all final.
    for pe in &snapshot {
        let started = pe.first_kickoff().map(|k| k <= now).unwrap_or(false);
        if started && !pe.is_completed() {
            targets.push(pe.period.period_number);
        }
    }

    // The next period to import (provable upcoming, or the documented
    // last-completed + 1 fallback).
    let import_target = next_import_target(&snapshot, now);
    if !targets.contains(&import_target) {
        targets.push(import_target);
    }
    targets.sort_unstable();

    for period_number in targets {
        let key = PeriodKey::new(cfg.season_year, period_number);
        let (events, stats) = feed.fetch_period(cfg.season_year, period_number).await?;
        if stats.rejected_missing_names > 0 || stats.rejected_bad_timestamp > 0 {
            warn!(
                period = %key,
                rejected_missing_names = stats.rejected_missing_names,
                rejected_bad_timestamp = stats.rejected_bad_timestamp,
                unknown_states = ?stats.unknown_state_samples,
                "feed returned records that could not be used"
            );
        }
        if events.is_empty() {
            continue;
        }
        reconciler.reconcile(key, &events).await?;
    }

    let refreshed = store.season_snapshot(cfg.season_year).await?;
    remind_if_kickoff_near(store, &refreshed).await?;

    if let Some(completed) = find_last_completed(&refreshed) {
        log_period_standings(store, PeriodKey::new(cfg.season_year, completed.period_number))
            .await?;
        log_season_standings(store, cfg.season_year, completed.period_number).await?;
    }

    Ok(())
}

/// When the upcoming period kicks off within a day, log the roster members
/// with no pick on file and flip the reminder flag so this fires once. The
/// actual delivery channel is an external collaborator; this side only records
/// the state.
async fn remind_if_kickoff_near(store: &EventStore, snapshot: &[PeriodEvents]) -> Result<()> {
    let now = Utc::now();
    let Some(upcoming) = find_upcoming(snapshot, now) else {
        return Ok(());
    };
    if upcoming.reminder_sent {
        return Ok(());
    }
    let Some(pe) = snapshot.iter().find(|pe| pe.period.id == upcoming.id) else {
        return Ok(());
    };
    let Some(kickoff) = pe.first_kickoff() else {
        return Ok(());
    };
    if kickoff - now > ChronoDuration::hours(24) {
        return Ok(());
    }

    let roster = store.roster().await?;
    let picks = store.picks_for_period(upcoming.id).await?;
    let missing: Vec<&str> = roster
        .iter()
        .filter(|p| !picks.iter().any(|pk| pk.participant_id == p.id))
        .map(|p| p.name.as_str())
        .collect();

    info!(
        period = %upcoming.key(),
        kickoff = %kickoff,
        missing_picks = ?missing,
        "pick deadline approaching"
    );
    store.set_reminder_sent(upcoming.id, true).await?;
    Ok(())
}

async fn log_period_standings(store: &EventStore, key: PeriodKey) -> Result<()> {
    let Some(period) = store.find_period(key).await? else {
        return Ok(());
    };
    let roster = store.roster().await?;
    let events = store.events_for_period(period.id).await?;
    let picks = store.picks_for_period(period.id).await?;

    for mode in [TallyMode::StraightUp, TallyMode::Ats] {
        let standings = tally(&roster, &picks, &events, mode);
        let line = standings
            .iter()
            .map(|s| format!("{}={}", s.name, s.correct_count))
            .collect::<Vec<_>>()
            .join(" | ");
        info!(period = %key, %mode, "period standings: {line}");
    }
    Ok(())
}

/// Season-to-date tally over every period up to and including the last
/// completed one. Same math as the weekly tally, just a wider row union.
async fn log_season_standings(
    store: &EventStore,
    season_year: i32,
    through_period: u32,
) -> Result<()> {
    let roster = store.roster().await?;
    let events = store.events_for_period_range(season_year, 1, through_period).await?;
    let picks = store.picks_for_period_range(season_year, 1, through_period).await?;

    for mode in [TallyMode::StraightUp, TallyMode::Ats] {
        let standings = tally(&roster, &picks, &events, mode);
        let line = standings
            .iter()
            .map(|s| format!("{}={}", s.name, s.correct_count))
            .collect::<Vec<_>>()
            .join(" | ");
        info!(season = season_year, through_period, %mode, "season standings: {line}");
    }
    Ok(())
}
