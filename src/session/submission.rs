use std::collections::BTreeMap;

use uuid::Uuid;

use crate::schemas::answer::AnswerMap;
use crate::schemas::submission::{QuestionTimeReport, SubmitPayload};
use crate::session::guard::DisconnectReason;
use crate::session::tracking::distribute_unaccounted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitReason {
    Manual,
    TimerExpired,
    Disconnect(DisconnectReason),
}

impl SubmitReason {
    pub(crate) fn is_auto(self) -> bool {
        !matches!(self, Self::Manual)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::TimerExpired => "time-expired",
            Self::Disconnect(reason) => reason.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitEndpoint {
    Submit,
    AutoSubmit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transport {
    /// Awaited request; the outcome is fed back to the session.
    Standard,
    /// Fire-and-forget beacon, falling back to a keep-alive request when the
    /// beacon is refused.
    Beacon,
}

impl Transport {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Beacon => "beacon",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubmitOutcome {
    /// The backend answered with success.
    Acknowledged,
    /// Handed to a beacon; no acknowledgement will ever arrive.
    Dispatched,
    Failed(String),
}

#[derive(Debug, Clone)]
pub(crate) struct SubmissionPlan {
    pub(crate) reason: SubmitReason,
    pub(crate) endpoint: SubmitEndpoint,
    pub(crate) transport: Transport,
    pub(crate) payload: SubmitPayload,
}

/// Stable `clientSubmissionId` for an attempt. Every retry, beacon and
/// post-resume submit of the same attempt carries it.
pub(crate) fn submission_id_for(attempt_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("elevate-cbt:attempt:{attempt_id}").as_bytes())
}

/// Packages the final state of an attempt and picks how to deliver it.
pub(crate) fn plan(
    reason: SubmitReason,
    submission_id: Uuid,
    answers: &AnswerMap,
    tracked: &BTreeMap<usize, QuestionTimeReport>,
    visited: &[usize],
    elapsed_seconds: u64,
) -> SubmissionPlan {
    let (endpoint, transport) = match reason {
        SubmitReason::Manual | SubmitReason::TimerExpired => {
            (SubmitEndpoint::Submit, Transport::Standard)
        }
        SubmitReason::Disconnect(disconnect) if disconnect.page_is_closing() => {
            (SubmitEndpoint::AutoSubmit, Transport::Beacon)
        }
        SubmitReason::Disconnect(_) => (SubmitEndpoint::AutoSubmit, Transport::Standard),
    };

    let payload = SubmitPayload {
        answers: answers.clone(),
        time_spent: elapsed_seconds,
        question_time_tracking: distribute_unaccounted(tracked, visited, elapsed_seconds),
        is_auto_submit: reason.is_auto(),
        reason: reason.as_str().to_string(),
        client_submission_id: submission_id,
    };

    SubmissionPlan { reason, endpoint, transport, payload }
}
