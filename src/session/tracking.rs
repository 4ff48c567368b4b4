use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::core::time::unix_millis;
use crate::schemas::submission::{QuestionTimeReport, TimeSession};

/// Per-question focus time. Telemetry only: nothing here feeds scoring.
#[derive(Debug, Clone, Default)]
pub(crate) struct TimeTracker {
    open: Option<(usize, OffsetDateTime)>,
    entries: BTreeMap<usize, QuestionTimeReport>,
}

/// A closed focus session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FocusDelta {
    pub(crate) index: usize,
    pub(crate) seconds: u64,
}

impl TimeTracker {
    pub(crate) fn new(restored: BTreeMap<usize, QuestionTimeReport>) -> Self {
        Self { open: None, entries: restored }
    }

    /// Focuses `index`, closing whatever question was focused before.
    pub(crate) fn focus(&mut self, index: usize, now: OffsetDateTime) -> Option<FocusDelta> {
        if matches!(self.open, Some((current, _)) if current == index) {
            return None;
        }
        let closed = self.pause(now);
        self.open = Some((index, now));
        closed
    }

    /// Closes the open session, if any, without focusing anything else.
    pub(crate) fn pause(&mut self, now: OffsetDateTime) -> Option<FocusDelta> {
        let (index, started) = self.open.take()?;
        let seconds = (now - started).whole_seconds().max(0) as u64;
        let entry = self.entries.entry(index).or_default();
        entry.total_time += seconds;
        entry.sessions.push(TimeSession {
            start: unix_millis(started),
            end: unix_millis(now),
            duration: seconds,
        });
        Some(FocusDelta { index, seconds })
    }

    /// Reopens the last paused question, used when the session regains focus.
    pub(crate) fn resume(&mut self, index: usize, now: OffsetDateTime) {
        if self.open.is_none() {
            self.open = Some((index, now));
        }
    }

    pub(crate) fn snapshot(&self) -> &BTreeMap<usize, QuestionTimeReport> {
        &self.entries
    }

    pub(crate) fn tracked_seconds(&self, index: usize) -> u64 {
        self.entries.get(&index).map(|entry| entry.total_time).unwrap_or(0)
    }
}

/// Spreads elapsed time that no focus session accounts for evenly over visited
/// questions with no tracked time. The remainder goes to the lowest indices.
/// Results are flagged `estimated`.
pub(crate) fn distribute_unaccounted(
    tracked: &BTreeMap<usize, QuestionTimeReport>,
    visited: &[usize],
    total_elapsed_seconds: u64,
) -> BTreeMap<usize, QuestionTimeReport> {
    let mut report = tracked.clone();
    let accounted: u64 = tracked.values().map(|entry| entry.total_time).sum();
    let unaccounted = total_elapsed_seconds.saturating_sub(accounted);

    let mut untracked: Vec<usize> = visited
        .iter()
        .copied()
        .filter(|index| tracked.get(index).map_or(true, |entry| entry.total_time == 0))
        .collect();
    untracked.sort_unstable();
    untracked.dedup();

    if unaccounted == 0 || untracked.is_empty() {
        return report;
    }

    let share = unaccounted / untracked.len() as u64;
    let remainder = unaccounted % untracked.len() as u64;
    for (position, index) in untracked.into_iter().enumerate() {
        let extra = u64::from((position as u64) < remainder);
        let entry = report.entry(index).or_default();
        entry.total_time = share + extra;
        entry.estimated = true;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    #[test]
    fn focus_switch_closes_previous_session() {
        let start = datetime!(2025-03-01 10:00:00 UTC);
        let mut tracker = TimeTracker::default();

        assert_eq!(tracker.focus(0, start), None);
        let delta = tracker.focus(1, start + Duration::seconds(42));
        assert_eq!(delta, Some(FocusDelta { index: 0, seconds: 42 }));
        assert_eq!(tracker.tracked_seconds(0), 42);
        assert_eq!(tracker.pause(start + Duration::seconds(50)), Some(FocusDelta { index: 1, seconds: 8 }));

        let sessions = &tracker.snapshot()[&0].sessions;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].end - sessions[0].start, 42_000);
    }

    #[test]
    fn refocusing_same_question_is_ignored() {
        let start = datetime!(2025-03-01 10:00:00 UTC);
        let mut tracker = TimeTracker::default();
        tracker.focus(2, start);
        assert_eq!(tracker.focus(2, start + Duration::seconds(5)), None);
        assert_eq!(
            tracker.pause(start + Duration::seconds(9)),
            Some(FocusDelta { index: 2, seconds: 9 })
        );
    }

    #[test]
    fn pause_and_resume_accumulate() {
        let start = datetime!(2025-03-01 10:00:00 UTC);
        let mut tracker = TimeTracker::default();
        tracker.focus(0, start);
        tracker.pause(start + Duration::seconds(10));
        tracker.resume(0, start + Duration::seconds(100));
        tracker.pause(start + Duration::seconds(105));
        assert_eq!(tracker.tracked_seconds(0), 15);
        assert_eq!(tracker.snapshot()[&0].sessions.len(), 2);
        assert_eq!(tracker.pause(start + Duration::seconds(200)), None);
    }

    #[test]
    fn unaccounted_time_is_spread_over_untracked_visits() {
        let mut tracked = BTreeMap::new();
        tracked.insert(0, QuestionTimeReport { total_time: 30, ..Default::default() });

        let report = distribute_unaccounted(&tracked, &[0, 1, 2, 3], 130);

        assert_eq!(report[&0].total_time, 30);
        assert!(!report[&0].estimated);
        assert_eq!(report[&1].total_time, 34);
        assert_eq!(report[&2].total_time, 33);
        assert_eq!(report[&3].total_time, 33);
        assert!(report[&3].estimated);
    }

    #[test]
    fn nothing_to_spread_leaves_report_untouched() {
        let mut tracked = BTreeMap::new();
        tracked.insert(0, QuestionTimeReport { total_time: 300, ..Default::default() });
        assert_eq!(distribute_unaccounted(&tracked, &[0, 1], 200), tracked);
        assert_eq!(distribute_unaccounted(&tracked, &[0], 900), tracked);
    }
}
