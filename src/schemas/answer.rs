use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Answers keyed by question index. serde_json writes the keys as strings.
pub(crate) type AnswerMap = BTreeMap<usize, AnswerState>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnswerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) selected_answer: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) numerical_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) marked_for_review: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) visited: Option<bool>,
    #[serde(default)]
    pub(crate) timestamp: i64,
}

/// Fields to merge into an [`AnswerState`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AnswerPatch {
    pub(crate) selected_answer: Option<usize>,
    pub(crate) numerical_answer: Option<String>,
    pub(crate) marked_for_review: Option<bool>,
    pub(crate) visited: Option<bool>,
}

impl AnswerPatch {
    pub(crate) fn select(option: usize) -> Self {
        Self { selected_answer: Some(option), ..Self::default() }
    }

    pub(crate) fn numerical(value: impl Into<String>) -> Self {
        Self { numerical_answer: Some(value.into()), ..Self::default() }
    }

    pub(crate) fn review(marked: bool) -> Self {
        Self { marked_for_review: Some(marked), ..Self::default() }
    }

    pub(crate) fn visited() -> Self {
        Self { visited: Some(true), ..Self::default() }
    }
}

impl AnswerState {
    /// Merges `patch` into this entry. The selected option and the numerical
    /// value are mutually exclusive: whichever was written last survives.
    /// Blank numerical input clears the numerical value.
    pub(crate) fn apply(&mut self, patch: AnswerPatch, timestamp: i64) {
        if let Some(option) = patch.selected_answer {
            self.selected_answer = Some(option);
            self.numerical_answer = None;
        }

        if let Some(value) = patch.numerical_answer {
            let trimmed = value.trim();
            self.numerical_answer =
                if trimmed.is_empty() { None } else { Some(trimmed.to_string()) };
            self.selected_answer = None;
        }

        if let Some(marked) = patch.marked_for_review {
            self.marked_for_review = Some(marked);
        }

        if let Some(visited) = patch.visited {
            self.visited = Some(visited);
        }

        self.timestamp = timestamp;
    }

    pub(crate) fn is_answered(&self) -> bool {
        self.selected_answer.is_some()
            || self.numerical_answer.as_deref().is_some_and(|value| !value.trim().is_empty())
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.marked_for_review.unwrap_or(false)
    }

    pub(crate) fn is_visited(&self) -> bool {
        self.visited.unwrap_or(false)
    }
}
