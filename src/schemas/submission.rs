use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::schemas::answer::AnswerMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum TrackAction {
    View,
    Answer,
    Clear,
    Mark,
    NavigateAway,
}

impl TrackAction {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Answer => "answer",
            Self::Clear => "clear",
            Self::Mark => "mark",
            Self::NavigateAway => "navigate-away",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrackTimeRequest {
    pub(crate) question_index: usize,
    pub(crate) action: TrackAction,
    /// Seconds spent on the question since it was last focused.
    pub(crate) time_spent: u64,
    pub(crate) timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HeartbeatRequest {
    pub(crate) timestamp: i64,
    pub(crate) current_question: usize,
    pub(crate) answered_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AutoSaveRequest {
    pub(crate) answers: AnswerMap,
    pub(crate) question_time_tracking: BTreeMap<usize, QuestionTimeReport>,
    pub(crate) timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimeSession {
    pub(crate) start: i64,
    pub(crate) end: i64,
    /// Seconds.
    pub(crate) duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuestionTimeReport {
    pub(crate) total_time: u64,
    #[serde(default)]
    pub(crate) sessions: Vec<TimeSession>,
    /// Set when `total_time` came from spreading unaccounted time rather than
    /// from observed focus.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) estimated: bool,
}

/// Body of both `/submit` and `/auto-submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitPayload {
    pub(crate) answers: AnswerMap,
    /// Whole seconds between attempt start and submission, capped at the test duration.
    pub(crate) time_spent: u64,
    pub(crate) question_time_tracking: BTreeMap<usize, QuestionTimeReport>,
    pub(crate) is_auto_submit: bool,
    pub(crate) reason: String,
    pub(crate) client_submission_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitResponse {
    #[serde(default)]
    pub(crate) message: Option<String>,
    /// Display only; backends send numbers, strings such as "152/300", or objects.
    #[serde(default)]
    pub(crate) score: Option<Value>,
}
