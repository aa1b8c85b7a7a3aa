//! Standings tallies over picks and graded events.
//!
//! Pure and range-agnostic: the caller supplies one period's rows or a
//! season-to-date union, the math is identical. Ordering is deterministic
//! (count desc, then name asc) so downstream announcement text is
//! byte-reproducible for a given input.

use std::collections::HashMap;

use crate::grading::{grade, grade_straight_up};
use crate::types::{
    normalize_name, EventRecord, GradingResult, Participant, Pick, Standing, TallyMode,
};

/// Counts correct picks per participant under the requested mode.
///
/// A pick is correct iff its event grades to a side (not push, not
/// undetermined) and the selected name equals that side case-insensitively.
/// Every roster member appears in the output, including those with zero
/// eligible picks, so the full group is always rankable.
pub fn tally(
    roster: &[Participant],
    picks: &[Pick],
    events: &[EventRecord],
    mode: TallyMode,
) -> Vec<Standing> {
    let results: HashMap<i64, GradingResult> = events
        .iter()
        .map(|ev| {
            let result = match mode {
                TallyMode::StraightUp => grade_straight_up(ev),
                TallyMode::Ats => grade(ev),
            };
            (ev.id, result)
        })
        .collect();

    let mut counts: HashMap<i64, u32> = HashMap::new();
    for pick in picks {
        let Some(result) = results.get(&pick.event_id) else {
            continue;
        };
        // Push/undetermined count for no one.
        let Some(winner) = result.side() else {
            continue;
        };
        if normalize_name(&pick.selected_name) == normalize_name(winner) {
            *counts.entry(pick.participant_id).or_default() += 1;
        }
    }

    let mut standings: Vec<Standing> = roster
        .iter()
        .map(|p| Standing {
            participant_id: p.id,
            name: p.name.clone(),
            correct_count: counts.get(&p.id).copied().unwrap_or(0),
        })
        .collect();

    standings.sort_by(|a, b| {
        b.correct_count
            .cmp(&a.correct_count)
            .then_with(|| a.name.cmp(&b.name))
    });
    standings
}
