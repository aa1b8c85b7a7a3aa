//! Period ("week") resolution: which period is upcoming, which was the last
//! one fully completed, and which one the next import run should target.
//!
//! Pure over an in-memory season snapshot — the store supplies the rows, the
//! caller supplies `now`.

use chrono::{DateTime, Utc};

use crate::types::{EventRecord, EventState, Period};

/// One period together with its events, as loaded for a season.
#[derive(Debug, Clone)]
pub struct PeriodEvents {
    pub period: Period,
    pub events: Vec<EventRecord>,
}

impl PeriodEvents {
    /// Earliest known kickoff across the period's events. None when every
    /// scheduled_time is still null.
    pub fn first_kickoff(&self) -> Option<DateTime<Utc>> {
        self.events.iter().filter_map(|e| e.scheduled_time).min()
    }

    /// A period with zero events is never "completed".
    pub fn is_completed(&self) -> bool {
        !self.events.is_empty() && self.events.iter().all(|e| e.state == EventState::Final)
    }
}

/// Lowest-numbered period with at least one event and a provable future
/// kickoff: the earliest non-null scheduled_time must be strictly after `now`.
/// A period whose kickoffs are all null never qualifies — "upcoming" is not
/// claimed without evidence.
///
/// Only periods past the last completed one are considered, so this stays
/// consistent with [`find_last_completed`]: if this returns period N, no
/// period >= N is reported as completed.
pub fn find_upcoming<'a>(periods: &'a [PeriodEvents], now: DateTime<Utc>) -> Option<&'a Period> {
    let floor = find_last_completed(periods)
        .map(|p| p.period_number)
        .unwrap_or(0);

    let mut candidates: Vec<&PeriodEvents> = periods
        .iter()
        .filter(|pe| pe.period.period_number > floor)
        .collect();
    candidates.sort_by_key(|pe| pe.period.period_number);

    candidates
        .into_iter()
        .find(|pe| {
            !pe.events.is_empty() && pe.first_kickoff().map(|kick| kick > now).unwrap_or(false)
        })
        .map(|pe| &pe.period)
}

/// Highest-numbered period where every event is final.
pub fn find_last_completed(periods: &[PeriodEvents]) -> Option<&Period> {
    periods
        .iter()
        .filter(|pe| pe.is_completed())
        .max_by_key(|pe| pe.period.period_number)
        .map(|pe| &pe.period)
}

/// Which period number the next import run should fetch.
///
/// Prefers the provable upcoming period. When no period can demonstrate a
/// future kickoff (schedule not yet confirmed), falls back to the increment
/// heuristic: last completed + 1. This fallback is deliberate and visible to
/// callers rather than a silent guess inside the resolver.
pub fn next_import_target(periods: &[PeriodEvents], now: DateTime<Utc>) -> u32 {
    if let Some(period) = find_upcoming(periods, now) {
        return period.period_number;
    }
    find_last_completed(periods)
        .map(|p| p.period_number + 1)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn period(id: i64, number: u32) -> Period {
        Period {
            id,
            season_year: 2025,
            period_number: number,
            pick_deadline: None,
            reminder_sent: false,
        }
    }

    fn event(id: i64, period_id: i64, state: EventState, kickoff: Option<DateTime<Utc>>) -> EventRecord {
        EventRecord {
            id,
            period_id,
            external_id: None,
            home_name: format!("Home{id}"),
            away_name: format!("Away{id}"),
            scheduled_time: kickoff,
            state,
            home_score: None,
            away_score: None,
            favorite_name: None,
            spread_points: None,
            winner_straight_up: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn completed_then_future_period_is_consistent() {
        let season = vec![
            PeriodEvents {
                period: period(1, 1),
                events: vec![event(1, 1, EventState::Final, Some(now() - Duration::days(5)))],
            },
            PeriodEvents {
                period: period(2, 2),
                events: vec![event(2, 2, EventState::Scheduled, Some(now() + Duration::days(2)))],
            },
        ];

        assert_eq!(find_last_completed(&season).unwrap().period_number, 1);
        assert_eq!(find_upcoming(&season, now()).unwrap().period_number, 2);
    }

    #[test]
    fn all_null_kickoffs_never_qualify_as_upcoming() {
        let season = vec![
            PeriodEvents {
                period: period(1, 1),
                events: vec![event(1, 1, EventState::Final, Some(now() - Duration::days(5)))],
            },
            PeriodEvents {
                period: period(2, 2),
                events: vec![event(2, 2, EventState::Scheduled, None)],
            },
        ];

        assert!(find_upcoming(&season, now()).is_none());
        // Fallback target is the documented increment heuristic.
        assert_eq!(next_import_target(&season, now()), 2);
    }

    #[test]
    fn zero_event_period_is_never_completed() {
        let season = vec![PeriodEvents { period: period(1, 1), events: vec![] }];
        assert!(find_last_completed(&season).is_none());
        assert!(find_upcoming(&season, now()).is_none());
        assert_eq!(next_import_target(&season, now()), 1);
    }

    #[test]
    fn past_kickoff_is_not_upcoming() {
        let season = vec![PeriodEvents {
            period: period(1, 1),
            events: vec![event(1, 1, EventState::Scheduled, Some(now() - Duration::hours(1)))],
        }];
        assert!(find_upcoming(&season, now()).is_none());
    }

    #[test]
    fn earliest_kickoff_decides_even_with_later_games() {
        // One game already kicked off, one in the future: earliest is past → not upcoming.
        let season = vec![PeriodEvents {
            period: period(1, 1),
            events: vec![
                event(1, 1, EventState::Live, Some(now() - Duration::hours(2))),
                event(2, 1, EventState::Scheduled, Some(now() + Duration::days(1))),
            ],
        }];
        assert!(find_upcoming(&season, now()).is_none());
    }

    #[test]
    fn upcoming_skips_periods_at_or_below_last_completed() {
        // Period 2 fully final but period 1 claims a future kickoff: the
        // resolver must not report upcoming=1 alongside last_completed=2.
        let season = vec![
            PeriodEvents {
                period: period(1, 1),
                events: vec![event(1, 1, EventState::Scheduled, Some(now() + Duration::days(3)))],
            },
            PeriodEvents {
                period: period(2, 2),
                events: vec![event(2, 2, EventState::Final, Some(now() - Duration::days(1)))],
            },
        ];
        assert_eq!(find_last_completed(&season).unwrap().period_number, 2);
        assert!(find_upcoming(&season, now()).is_none());
        assert_eq!(next_import_target(&season, now()), 3);
    }

    #[test]
    fn incomplete_period_is_not_completed() {
        let season = vec![PeriodEvents {
            period: period(1, 1),
            events: vec![
                event(1, 1, EventState::Final, None),
                event(2, 1, EventState::Live, None),
            ],
        }];
        assert!(find_last_completed(&season).is_none());
    }
}
