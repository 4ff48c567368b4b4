use crate::schemas::answer::{AnswerMap, AnswerPatch, AnswerState};

/// In-memory answer map for the running attempt.
///
/// Every successful mutation bumps `revision`; the machine compares it with the
/// last revision the backend acknowledged to size the sync queue.
#[derive(Debug, Clone, Default)]
pub(crate) struct AnswerStore {
    answers: AnswerMap,
    revision: u64,
}

impl AnswerStore {
    pub(crate) fn new(initial: AnswerMap) -> Self {
        Self { answers: initial, revision: 0 }
    }

    /// Merges `patch` into the entry for `index`, creating it if needed.
    pub(crate) fn record(&mut self, index: usize, patch: AnswerPatch, timestamp: i64) -> &AnswerState {
        self.revision += 1;
        let entry = self.answers.entry(index).or_default();
        entry.apply(patch, timestamp);
        entry
    }

    /// Removes the entry for `index`. Returns whether anything was removed.
    pub(crate) fn clear(&mut self, index: usize) -> bool {
        let removed = self.answers.remove(&index).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Sets `visited` without touching other fields. Returns whether it changed.
    pub(crate) fn mark_visited(&mut self, index: usize, timestamp: i64) -> bool {
        if self.answers.get(&index).is_some_and(AnswerState::is_visited) {
            return false;
        }
        self.record(index, AnswerPatch::visited(), timestamp);
        true
    }

    /// Flips `markedForReview`; returns the new value.
    pub(crate) fn toggle_review(&mut self, index: usize, timestamp: i64) -> bool {
        let marked = !self.answers.get(&index).is_some_and(AnswerState::is_marked);
        self.record(index, AnswerPatch::review(marked), timestamp);
        marked
    }

    pub(crate) fn get(&self, index: usize) -> Option<&AnswerState> {
        self.answers.get(&index)
    }

    pub(crate) fn snapshot(&self) -> &AnswerMap {
        &self.answers
    }

    pub(crate) fn answered_count(&self) -> usize {
        self.answers.values().filter(|state| state.is_answered()).count()
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn visited_indices(&self) -> Vec<usize> {
        self.answers.iter().filter(|(_, state)| state.is_visited()).map(|(index, _)| *index).collect()
    }
}
