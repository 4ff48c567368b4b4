use std::collections::BTreeMap;

use time::{Duration, OffsetDateTime};

use crate::schemas::answer::{AnswerMap, AnswerState};
use crate::schemas::test::{Question, Subject};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SubjectProgress {
    pub(crate) total: usize,
    pub(crate) answered: usize,
    pub(crate) marked: usize,
    pub(crate) visited: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PaletteSummary {
    pub(crate) by_subject: BTreeMap<Subject, Vec<usize>>,
    pub(crate) progress: BTreeMap<Subject, SubjectProgress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PaletteStatus {
    NotVisited,
    NotAnswered,
    Answered,
    MarkedForReview,
    AnsweredAndMarked,
}

impl PaletteStatus {
    pub(crate) fn of(answer: Option<&AnswerState>) -> Self {
        let Some(answer) = answer else {
            return Self::NotVisited;
        };
        match (answer.is_answered(), answer.is_marked()) {
            (true, true) => Self::AnsweredAndMarked,
            (true, false) => Self::Answered,
            (false, true) => Self::MarkedForReview,
            (false, false) if answer.is_visited() => Self::NotAnswered,
            (false, false) => Self::NotVisited,
        }
    }

    pub(crate) fn symbol(self) -> char {
        match self {
            Self::NotVisited => ' ',
            Self::NotAnswered => 'x',
            Self::Answered => '+',
            Self::MarkedForReview => '?',
            Self::AnsweredAndMarked => '*',
        }
    }
}

/// Groups question indices by subject and counts progress per subject.
pub(crate) fn summarize(questions: &[Question], answers: &AnswerMap) -> PaletteSummary {
    let mut summary = PaletteSummary::default();

    for (index, question) in questions.iter().enumerate() {
        let subject = question.subject();
        summary.by_subject.entry(subject).or_default().push(index);

        let progress = summary.progress.entry(subject).or_default();
        progress.total += 1;
        if let Some(answer) = answers.get(&index) {
            progress.answered += usize::from(answer.is_answered());
            progress.marked += usize::from(answer.is_marked());
            progress.visited += usize::from(answer.is_visited());
        }
    }

    summary
}

/// Keeps the visible subject tab in step with the current question, except
/// shortly after the student picked a tab by hand.
#[derive(Debug, Clone)]
pub(crate) struct SubjectRouter {
    active: Subject,
    manual_selected_at: Option<OffsetDateTime>,
    suppression: Duration,
}

impl SubjectRouter {
    pub(crate) fn new(initial: Subject, suppression: Duration) -> Self {
        Self { active: initial, manual_selected_at: None, suppression }
    }

    pub(crate) fn active(&self) -> Subject {
        self.active
    }

    pub(crate) fn select(&mut self, subject: Subject, now: OffsetDateTime) {
        self.active = subject;
        self.manual_selected_at = Some(now);
    }

    /// Switches to `subject` unless a manual pick is still inside the
    /// suppression window. Returns whether the active tab changed.
    pub(crate) fn follow(&mut self, subject: Subject, now: OffsetDateTime) -> bool {
        if self.manual_selected_at.is_some_and(|at| now - at < self.suppression) {
            return false;
        }
        if subject == self.active {
            return false;
        }
        self.active = subject;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::answer::AnswerPatch;
    use serde_json::json;
    use time::macros::datetime;

    fn questions() -> Vec<Question> {
        serde_json::from_value(json!([
            { "id": "p1", "subject": "Physics" },
            { "id": "c1", "tags": ["Chemistry"] },
            { "id": "m1", "topic": "Integral Calculus" },
            { "id": "p2", "topic": "Rotational Mechanics" },
            { "id": "c2", "subject": "chem" }
        ]))
        .expect("questions")
    }

    #[test]
    fn groups_and_counts_per_subject() {
        let mut answers = AnswerMap::new();
        answers.entry(0).or_default().apply(AnswerPatch::select(1), 1);
        answers.entry(4).or_default().apply(AnswerPatch::review(true), 1);
        answers.entry(3).or_default().apply(AnswerPatch::visited(), 1);

        let summary = summarize(&questions(), &answers);

        assert_eq!(summary.by_subject[&Subject::Physics], vec![0, 3]);
        assert_eq!(summary.by_subject[&Subject::Chemistry], vec![1, 4]);
        assert_eq!(summary.by_subject[&Subject::Mathematics], vec![2]);
        assert_eq!(
            summary.progress[&Subject::Physics],
            SubjectProgress { total: 2, answered: 1, marked: 0, visited: 1 }
        );
        assert_eq!(summary.progress[&Subject::Chemistry].marked, 1);
        assert_eq!(summary.progress[&Subject::Chemistry].answered, 0);
    }

    #[test]
    fn palette_status_legend() {
        let mut state = AnswerState::default();
        assert_eq!(PaletteStatus::of(None), PaletteStatus::NotVisited);
        state.apply(AnswerPatch::visited(), 1);
        assert_eq!(PaletteStatus::of(Some(&state)), PaletteStatus::NotAnswered);
        state.apply(AnswerPatch::review(true), 2);
        assert_eq!(PaletteStatus::of(Some(&state)), PaletteStatus::MarkedForReview);
        state.apply(AnswerPatch::numerical("4"), 3);
        assert_eq!(PaletteStatus::of(Some(&state)), PaletteStatus::AnsweredAndMarked);
        state.apply(AnswerPatch::review(false), 4);
        assert_eq!(PaletteStatus::of(Some(&state)), PaletteStatus::Answered);
    }

    #[test]
    fn follows_current_question_subject() {
        let now = datetime!(2025-03-01 10:00:00 UTC);
        let mut router = SubjectRouter::new(Subject::Physics, Duration::seconds(10));
        assert!(router.follow(Subject::Chemistry, now));
        assert_eq!(router.active(), Subject::Chemistry);
        assert!(!router.follow(Subject::Chemistry, now));
    }

    #[test]
    fn manual_pick_suppresses_auto_switch_for_ten_seconds() {
        let now = datetime!(2025-03-01 10:00:00 UTC);
        let mut router = SubjectRouter::new(Subject::Mathematics, Duration::seconds(10));
        router.select(Subject::Physics, now);

        assert!(!router.follow(Subject::Chemistry, now + Duration::seconds(5)));
        assert_eq!(router.active(), Subject::Physics);

        assert!(router.follow(Subject::Chemistry, now + Duration::seconds(11)));
        assert_eq!(router.active(), Subject::Chemistry);
    }
}
