use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::schemas::answer::AnswerMap;
use crate::schemas::test::Test;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum AttemptStatus {
    #[serde(rename = "in-progress", alias = "in_progress", alias = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "submitted", alias = "SUBMITTED", alias = "completed")]
    Submitted,
    #[serde(rename = "auto-submitted", alias = "auto_submitted", alias = "AUTO_SUBMITTED")]
    AutoSubmitted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Attempt {
    #[serde(alias = "_id")]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) student: Option<String>,
    #[serde(default)]
    pub(crate) test_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) start_time: OffsetDateTime,
    pub(crate) status: AttemptStatus,
    #[serde(default)]
    pub(crate) auto_save_data: Option<Value>,
}

/// `GET /api/test-attempts/{id}` body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AttemptDetail {
    pub(crate) attempt: Attempt,
    #[serde(default)]
    pub(crate) test: Option<Test>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateAttemptRequest<'a> {
    pub(crate) test_id: &'a str,
}

impl Attempt {
    pub(crate) fn is_in_progress(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }

    /// The server's last auto-saved answers. Accepts `{answers: {..}}` or a bare
    /// map; anything else is logged and treated as empty.
    pub(crate) fn saved_answers(&self) -> AnswerMap {
        let Some(data) = self.auto_save_data.as_ref() else {
            return AnswerMap::new();
        };
        if data.is_null() {
            return AnswerMap::new();
        }

        let candidate = data.get("answers").unwrap_or(data);
        match serde_json::from_value::<AnswerMap>(candidate.clone()) {
            Ok(answers) => answers,
            Err(err) => {
                tracing::warn!(attempt_id = %self.id, error = %err, "Ignoring unreadable autoSaveData");
                AnswerMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attempt(auto_save: Value) -> Attempt {
        serde_json::from_value(json!({
            "_id": "a1",
            "startTime": "2025-03-01T10:00:00Z",
            "status": "in-progress",
            "autoSaveData": auto_save
        }))
        .expect("attempt")
    }

    #[test]
    fn wrapped_snapshot_is_read() {
        let attempt = attempt(json!({ "answers": { "1": { "numericalAnswer": "5" } } }));
        let answers = attempt.saved_answers();
        assert_eq!(answers[&1].numerical_answer.as_deref(), Some("5"));
        assert!(attempt.is_in_progress());
    }

    #[test]
    fn bare_snapshot_is_read() {
        let attempt = attempt(json!({ "0": { "selectedAnswer": 1 } }));
        assert_eq!(attempt.saved_answers()[&0].selected_answer, Some(1));
    }

    #[test]
    fn unreadable_snapshot_is_empty() {
        assert!(attempt(json!(["nope"])).saved_answers().is_empty());
        assert!(attempt(Value::Null).saved_answers().is_empty());
    }

    #[test]
    fn status_accepts_variants() {
        let status: AttemptStatus = serde_json::from_value(json!("auto_submitted")).expect("status");
        assert_eq!(status, AttemptStatus::AutoSubmitted);
        assert_eq!(serde_json::to_value(AttemptStatus::InProgress).unwrap(), json!("in-progress"));
    }
}
