use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::schemas::answer::AnswerMap;
use crate::schemas::attempt::Attempt;
use crate::schemas::submission::QuestionTimeReport;
use crate::schemas::test::Test;
use crate::services::backend::BackendClient;
use crate::services::local_store::LocalStore;
use crate::session::errors::SessionError;
use crate::session::timer::remaining_seconds;

#[derive(Debug, Clone)]
pub(crate) struct BootstrapRequest {
    pub(crate) test_id: String,
    /// Skip resumption and always start a fresh attempt.
    pub(crate) force_new: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct BootstrappedSession {
    pub(crate) test: Test,
    pub(crate) attempt: Attempt,
    pub(crate) initial_answers: AnswerMap,
    pub(crate) time_tracking: BTreeMap<usize, QuestionTimeReport>,
    pub(crate) remaining_seconds: u64,
    pub(crate) resumed: bool,
}

/// Server snapshot overlaid with the local cache. Local entries win per
/// question; the server only fills questions the cache does not have.
pub(crate) fn merge_answers(local: AnswerMap, server: AnswerMap) -> AnswerMap {
    let mut merged = server;
    merged.extend(local);
    merged
}

/// Resumes the saved in-progress attempt for the test, or starts a new one.
pub(crate) async fn bootstrap(
    backend: &BackendClient,
    store: &LocalStore,
    request: &BootstrapRequest,
    now: OffsetDateTime,
) -> Result<BootstrappedSession, SessionError> {
    let test_id = request.test_id.as_str();

    if request.force_new {
        tracing::info!(test_id, "Fresh attempt requested; discarding cached session");
        forget_cached_session(store, test_id);
    } else if let Some(attempt_id) = store.saved_attempt_id(test_id) {
        match resume(backend, store, request, &attempt_id, now).await {
            Ok(Some(session)) => return Ok(session),
            Ok(None) => forget_cached_session(store, test_id),
            Err(err) => return Err(err),
        }
    }

    let test = backend.fetch_test(test_id).await.map_err(SessionError::from_load)?;
    let attempt = backend.create_attempt(test_id).await.map_err(SessionError::from_load)?;
    if let Err(err) = store.save_attempt_id(test_id, &attempt.id) {
        tracing::warn!(test_id, attempt_id = %attempt.id, error = %err, "Failed to cache attempt id");
    }

    let remaining = remaining_seconds(test.duration, attempt.start_time, now);
    tracing::info!(
        test_id,
        attempt_id = %attempt.id,
        remaining_seconds = remaining,
        "Started new attempt"
    );

    Ok(BootstrappedSession {
        initial_answers: attempt.saved_answers(),
        time_tracking: BTreeMap::new(),
        remaining_seconds: remaining,
        resumed: false,
        test,
        attempt,
    })
}

/// `Ok(None)` means the saved attempt is gone or finished and a new one should
/// be created.
async fn resume(
    backend: &BackendClient,
    store: &LocalStore,
    request: &BootstrapRequest,
    attempt_id: &str,
    now: OffsetDateTime,
) -> Result<Option<BootstrappedSession>, SessionError> {
    let detail = match backend.fetch_attempt(attempt_id).await {
        Ok(detail) => detail,
        Err(err) if err.is_not_found() => {
            tracing::info!(attempt_id, "Saved attempt no longer exists");
            return Ok(None);
        }
        Err(err) => return Err(SessionError::from_load(err)),
    };

    let attempt = detail.attempt;
    if !attempt.is_in_progress() {
        tracing::info!(attempt_id, status = ?attempt.status, "Saved attempt is already closed");
        return Ok(None);
    }

    let test = match detail.test {
        Some(test) => test,
        None => {
            let test_id = attempt.test_id.as_deref().unwrap_or(&request.test_id);
            backend.fetch_test(test_id).await.map_err(SessionError::from_load)?
        }
    };

    let local = store.load_answers(&request.test_id);
    let local_count = local.len();
    let initial_answers = merge_answers(local, attempt.saved_answers());
    let remaining = remaining_seconds(test.duration, attempt.start_time, now);

    tracing::info!(
        attempt_id,
        local_answers = local_count,
        merged_answers = initial_answers.len(),
        remaining_seconds = remaining,
        "Resumed attempt"
    );

    Ok(Some(BootstrappedSession {
        time_tracking: store.load_time_tracking(&request.test_id),
        initial_answers,
        remaining_seconds: remaining,
        resumed: true,
        test,
        attempt,
    }))
}

fn forget_cached_session(store: &LocalStore, test_id: &str) {
    if let Err(err) = store.clear_session(test_id) {
        tracing::warn!(test_id, error = %err, "Failed to clear cached session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::answer::{AnswerPatch, AnswerState};
    use crate::test_support::{self, FakeBackend};
    use serde_json::json;
    use time::Duration;

    fn state(patch: AnswerPatch) -> AnswerState {
        let mut state = AnswerState::default();
        state.apply(patch, 0);
        state
    }

    #[test]
    fn local_answers_win_and_server_fills_gaps() {
        let local = AnswerMap::from([(0, state(AnswerPatch::select(2)))]);
        let server = AnswerMap::from([
            (0, state(AnswerPatch::select(1))),
            (1, state(AnswerPatch::numerical("5"))),
        ]);

        let merged = merge_answers(local, server);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[&0].selected_answer, Some(2));
        assert_eq!(merged[&1].numerical_answer.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn creates_and_caches_a_new_attempt() {
        let fake = FakeBackend::start().await;
        let now = time::OffsetDateTime::now_utc();
        fake.set_test(test_support::sample_test("t1", 60));
        fake.set_new_attempt(test_support::attempt_json("a-new", "t1", now, "in-progress", None));
        let ctx = test_support::client_context(&fake);

        let request = BootstrapRequest { test_id: "t1".to_string(), force_new: false };
        let session = bootstrap(&ctx.backend, &ctx.store, &request, now).await.expect("bootstrap");

        assert!(!session.resumed);
        assert_eq!(session.attempt.id, "a-new");
        assert_eq!(session.remaining_seconds, 3600);
        assert_eq!(ctx.store.saved_attempt_id("t1").as_deref(), Some("a-new"));

        let created = fake.requests_to("/api/test-attempts");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].body["testId"], "t1");
        assert_eq!(created[0].auth.as_deref(), Some("Bearer test-token"));
    }

    #[tokio::test]
    async fn resumes_in_progress_attempt_with_merged_answers() {
        let fake = FakeBackend::start().await;
        let now = time::OffsetDateTime::now_utc();
        let started = now - Duration::minutes(10);
        fake.insert_attempt(
            "a1",
            json!({
                "attempt": test_support::attempt_json(
                    "a1",
                    "t1",
                    started,
                    "in-progress",
                    Some(json!({ "answers": {
                        "0": { "selectedAnswer": 1 },
                        "1": { "numericalAnswer": "5" }
                    } })),
                ),
                "test": test_support::sample_test("t1", 60),
            }),
        );
        let ctx = test_support::client_context(&fake);
        ctx.store.save_attempt_id("t1", "a1").expect("cache id");
        ctx.store
            .save_answers("t1", &AnswerMap::from([(0, state(AnswerPatch::select(2)))]))
            .expect("cache answers");

        let request = BootstrapRequest { test_id: "t1".to_string(), force_new: false };
        let session = bootstrap(&ctx.backend, &ctx.store, &request, now).await.expect("bootstrap");

        assert!(session.resumed);
        assert!(session.remaining_seconds.abs_diff(50 * 60) <= 1);
        assert_eq!(session.initial_answers[&0].selected_answer, Some(2));
        assert_eq!(session.initial_answers[&1].numerical_answer.as_deref(), Some("5"));
        assert!(fake.requests_to("/api/test-attempts").is_empty());
    }

    #[tokio::test]
    async fn closed_attempt_starts_over_with_a_clean_cache() {
        let fake = FakeBackend::start().await;
        let now = time::OffsetDateTime::now_utc();
        fake.set_test(test_support::sample_test("t1", 60));
        fake.insert_attempt(
            "old",
            json!({ "attempt": test_support::attempt_json("old", "t1", now, "submitted", None) }),
        );
        fake.set_new_attempt(test_support::attempt_json("fresh", "t1", now, "in-progress", None));
        let ctx = test_support::client_context(&fake);
        ctx.store.save_attempt_id("t1", "old").expect("cache id");
        ctx.store
            .save_answers("t1", &AnswerMap::from([(3, state(AnswerPatch::select(0)))]))
            .expect("cache answers");

        let request = BootstrapRequest { test_id: "t1".to_string(), force_new: false };
        let session = bootstrap(&ctx.backend, &ctx.store, &request, now).await.expect("bootstrap");

        assert_eq!(session.attempt.id, "fresh");
        assert!(session.initial_answers.is_empty());
        assert!(ctx.store.load_answers("t1").is_empty());
        assert_eq!(ctx.store.saved_attempt_id("t1").as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn missing_saved_attempt_falls_through_to_create() {
        let fake = FakeBackend::start().await;
        let now = time::OffsetDateTime::now_utc();
        fake.set_test(test_support::sample_test("t1", 30));
        fake.set_new_attempt(test_support::attempt_json("fresh", "t1", now, "in-progress", None));
        let ctx = test_support::client_context(&fake);
        ctx.store.save_attempt_id("t1", "gone").expect("cache id");

        let request = BootstrapRequest { test_id: "t1".to_string(), force_new: false };
        let session = bootstrap(&ctx.backend, &ctx.store, &request, now).await.expect("bootstrap");
        assert_eq!(session.attempt.id, "fresh");
    }

    #[tokio::test]
    async fn force_new_skips_resumption() {
        let fake = FakeBackend::start().await;
        let now = time::OffsetDateTime::now_utc();
        fake.set_test(test_support::sample_test("t1", 60));
        fake.set_new_attempt(test_support::attempt_json("fresh", "t1", now, "in-progress", None));
        let ctx = test_support::client_context(&fake);
        ctx.store.save_attempt_id("t1", "a1").expect("cache id");

        let request = BootstrapRequest { test_id: "t1".to_string(), force_new: true };
        let session = bootstrap(&ctx.backend, &ctx.store, &request, now).await.expect("bootstrap");

        assert_eq!(session.attempt.id, "fresh");
        assert!(fake.requests_to("/api/test-attempts/a1").is_empty());
    }

    #[tokio::test]
    async fn rejected_token_is_auth_required() {
        let fake = FakeBackend::start().await;
        fake.reject_auth();
        let ctx = test_support::client_context(&fake);

        let request = BootstrapRequest { test_id: "t1".to_string(), force_new: false };
        let err = bootstrap(&ctx.backend, &ctx.store, &request, time::OffsetDateTime::now_utc())
            .await
            .expect_err("auth");
        assert!(matches!(err, SessionError::AuthRequired));
    }

    #[tokio::test]
    async fn unknown_test_is_a_load_failure() {
        let fake = FakeBackend::start().await;
        let ctx = test_support::client_context(&fake);

        let request = BootstrapRequest { test_id: "missing".to_string(), force_new: false };
        let err = bootstrap(&ctx.backend, &ctx.store, &request, time::OffsetDateTime::now_utc())
            .await
            .expect_err("load failure");
        assert!(matches!(err, SessionError::LoadFailure(_)));
    }
}
