//! Folding probe observations into a status history.

use chrono::{DateTime, Utc};

use crate::db::{Observation, StatusPeriod};

/// Default number of periods retained per target.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Merge an observation into `history` and return the updated history.
///
/// An open last period with the same `(status, status_code)` simply continues.
/// Anything else closes the open period at `now` and opens a new one chained to
/// the previous period's end, so the history stays gap-free even when a tick
/// runs late. At most `limit` periods are kept, oldest dropped first.
pub fn merge(
    history: Vec<StatusPeriod>,
    observation: &Observation,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<StatusPeriod> {
    let (mut history, _) = repair(history);
    apply(&mut history, observation, now);
    trim(&mut history, limit);
    history
}

fn apply(history: &mut Vec<StatusPeriod>, observation: &Observation, now: DateTime<Utc>) {
    let Some(last) = history.last_mut() else {
        history.push(StatusPeriod::open(*observation, now));
        return;
    };

    if last.is_open() && last.matches(observation) {
        return;
    }

    if last.is_open() && now <= last.from {
        // Closing at `now` would leave a zero-width period behind.
        let dropped = last.from;
        history.pop();
        match history.last_mut() {
            Some(prev) if prev.matches(observation) && prev.to == Some(dropped) => {
                prev.to = None;
            }
            _ => history.push(StatusPeriod::open(*observation, dropped)),
        }
    } else {
        let from = *last.to.get_or_insert(now);
        history.push(StatusPeriod::open(*observation, from));
    }
}

/// Drop the oldest periods until at most `limit` remain.
pub fn trim(history: &mut Vec<StatusPeriod>, limit: usize) {
    let limit = limit.max(1);
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}

/// Restore the history invariants on corrupted data.
///
/// Periods are ordered by `from`, every non-terminal period is chained to its
/// successor, and periods left with no width are removed. Returns the history
/// together with the number of fixes applied.
pub fn repair(mut history: Vec<StatusPeriod>) -> (Vec<StatusPeriod>, usize) {
    let mut fixes = 0;

    if !history.windows(2).all(|w| w[0].from <= w[1].from) {
        history.sort_by_key(|p| p.from);
        fixes += 1;
    }

    for i in 1..history.len() {
        let next_from = history[i].from;
        let prev = &mut history[i - 1];
        if prev.to != Some(next_from) {
            prev.to = Some(next_from);
            fixes += 1;
        }
    }

    let before = history.len();
    history.retain(|p| p.to.map_or(true, |to| p.from < to));
    fixes += before - history.len();

    if fixes > 0 {
        tracing::warn!("History: repaired {} inconsistencies", fixes);
    }

    (history, fixes)
}

/// Whether `history` satisfies ordering, contiguity, non-zero width and the
/// single-open-period rule.
pub fn is_consistent(history: &[StatusPeriod]) -> bool {
    let chained = history
        .windows(2)
        .all(|w| w[0].to == Some(w[1].from));
    let widths = history
        .iter()
        .all(|p| p.to.map_or(true, |to| p.from < to));
    chained && widths
}
