//! Against-the-spread and straight-up grading.
//!
//! Pure functions: same event in, same result out, no error paths. Anything
//! that cannot be graded — not final, missing scores, a spreadless tie —
//! comes back as `Undetermined`, which downstream tallying counts for no one.

use crate::types::{normalize_name, EventRecord, EventState, GradingResult};

/// Grades one event under the requested rule set.
///
/// With a usable favorite + spread pair, margin = favorite's score minus the
/// underdog's score minus the spread: positive means the favorite covered,
/// negative means the underdog did, exactly zero is a push. The spread is a
/// non-negative magnitude; the favorite side carries the sign.
///
/// A favorite name that matches neither team is treated as "no usable spread"
/// and degrades to the straight-up rule — a malformed feed value must never
/// crash grading for the whole period.
pub fn grade(event: &EventRecord) -> GradingResult {
    if event.state != EventState::Final {
        return GradingResult::Undetermined;
    }
    let (Some(home_score), Some(away_score)) = (event.home_score, event.away_score) else {
        return GradingResult::Undetermined;
    };

    if let (Some(favorite), Some(spread)) = (&event.favorite_name, event.spread_points) {
        let fav = normalize_name(favorite);
        let (fav_score, dog_score, fav_name, dog_name) =
            if fav == normalize_name(&event.home_name) {
                (home_score, away_score, &event.home_name, &event.away_name)
            } else if fav == normalize_name(&event.away_name) {
                (away_score, home_score, &event.away_name, &event.home_name)
            } else {
                // Favorite matches neither side — fall through to straight-up.
                return grade_straight_up(event);
            };

        let margin = (fav_score - dog_score) as f64 - spread;
        return if margin > 0.0 {
            GradingResult::Side(fav_name.clone())
        } else if margin < 0.0 {
            GradingResult::Side(dog_name.clone())
        } else {
            GradingResult::Push
        };
    }

    grade_straight_up(event)
}

/// Straight-up rule only: higher score wins. A tie has no ATS meaning without
/// a spread, so equal scores are `Undetermined`, not `Push`.
pub fn grade_straight_up(event: &EventRecord) -> GradingResult {
    if event.state != EventState::Final {
        return GradingResult::Undetermined;
    }
    match (event.home_score, event.away_score) {
        (Some(h), Some(a)) if h > a => GradingResult::Side(event.home_name.clone()),
        (Some(h), Some(a)) if a > h => GradingResult::Side(event.away_name.clone()),
        _ => GradingResult::Undetermined,
    }
}

/// Straight-up winner name for persisting on a final event, or None for a tie
/// or missing scores. The feed's own "winner" field is never trusted directly.
pub fn straight_up_winner(event: &EventRecord) -> Option<String> {
    match grade_straight_up(event) {
        GradingResult::Side(name) => Some(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventState;

    fn final_event(home_score: i64, away_score: i64) -> EventRecord {
        EventRecord {
            id: 1,
            period_id: 1,
            external_id: None,
            home_name: "Steelers".to_string(),
            away_name: "Ravens".to_string(),
            scheduled_time: None,
            state: EventState::Final,
            home_score: Some(home_score),
            away_score: Some(away_score),
            favorite_name: None,
            spread_points: None,
            winner_straight_up: None,
        }
    }

    fn with_spread(mut ev: EventRecord, favorite: &str, spread: f64) -> EventRecord {
        ev.favorite_name = Some(favorite.to_string());
        ev.spread_points = Some(spread);
        ev
    }

    #[test]
    fn home_favorite_covers_half_point() {
        // 24-20, home -3.5 → margin 0.5 → home covers
        let ev = with_spread(final_event(24, 20), "Steelers", 3.5);
        assert_eq!(grade(&ev), GradingResult::Side("Steelers".to_string()));
    }

    #[test]
    fn home_favorite_misses_by_half_point_is_not_push() {
        // 24-20, home -4.5 → margin -0.5 → underdog covers, never a push
        let ev = with_spread(final_event(24, 20), "Steelers", 4.5);
        assert_eq!(grade(&ev), GradingResult::Side("Ravens".to_string()));
    }

    #[test]
    fn exact_margin_is_push() {
        // 24-20, home -4.0 → margin 0 → push
        let ev = with_spread(final_event(24, 20), "Steelers", 4.0);
        assert_eq!(grade(&ev), GradingResult::Push);
    }

    #[test]
    fn away_favorite_side_inference() {
        // 20-24 with away favored by 3 → away wins by 4, covers
        let ev = with_spread(final_event(20, 24), "Ravens", 3.0);
        assert_eq!(grade(&ev), GradingResult::Side("Ravens".to_string()));
    }

    #[test]
    fn favorite_name_is_case_insensitive() {
        let ev = with_spread(final_event(24, 20), "  steelers ", 3.5);
        assert_eq!(grade(&ev), GradingResult::Side("Steelers".to_string()));
    }

    #[test]
    fn unknown_favorite_degrades_to_straight_up() {
        // "PIT" matches neither display name → straight-up rule, no error
        let ev = with_spread(final_event(24, 20), "PIT", 3.5);
        assert_eq!(grade(&ev), GradingResult::Side("Steelers".to_string()));
    }

    #[test]
    fn spread_without_favorite_is_straight_up() {
        let mut ev = final_event(24, 20);
        ev.spread_points = Some(3.5);
        assert_eq!(grade(&ev), GradingResult::Side("Steelers".to_string()));
    }

    #[test]
    fn tie_without_spread_is_undetermined_not_push() {
        let ev = final_event(21, 21);
        assert_eq!(grade(&ev), GradingResult::Undetermined);
    }

    #[test]
    fn non_final_event_is_undetermined() {
        let mut ev = with_spread(final_event(24, 20), "Steelers", 3.5);
        ev.state = EventState::Live;
        assert_eq!(grade(&ev), GradingResult::Undetermined);
    }

    #[test]
    fn missing_scores_are_undetermined() {
        let mut ev = with_spread(final_event(24, 20), "Steelers", 3.5);
        ev.away_score = None;
        assert_eq!(grade(&ev), GradingResult::Undetermined);
    }

    #[test]
    fn grading_is_deterministic() {
        let ev = with_spread(final_event(24, 20), "Steelers", 3.5);
        assert_eq!(grade(&ev), grade(&ev));
    }

    #[test]
    fn straight_up_winner_for_persistence() {
        assert_eq!(straight_up_winner(&final_event(24, 20)), Some("Steelers".to_string()));
        assert_eq!(straight_up_winner(&final_event(20, 24)), Some("Ravens".to_string()));
        assert_eq!(straight_up_winner(&final_event(21, 21)), None);
    }
}
