use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    Json, Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::core::config::Settings;
use crate::core::state::AppState;
use crate::services::backend::BackendClient;
use crate::services::local_store::LocalStore;

pub(crate) const TEST_TOKEN: &str = "test-token";

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) auth: Option<String>,
    pub(crate) body: Value,
}

#[derive(Default)]
struct FakeState {
    tests: HashMap<String, Value>,
    attempts: HashMap<String, Value>,
    new_attempt: Option<Value>,
    reject_auth: bool,
    fail_auto_save: bool,
    fail_submit: bool,
    submit_response: Option<Value>,
    requests: Vec<RecordedRequest>,
}

/// In-process stand-in for the exam backend. Records every request it sees.
#[derive(Clone)]
pub(crate) struct FakeBackend {
    base_url: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub(crate) async fn start() -> Self {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind fake backend");
        let addr = listener.local_addr().expect("fake backend addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { base_url: format!("http://{addr}"), state }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn set_test(&self, test: Value) {
        let id = test["_id"].as_str().or_else(|| test["id"].as_str()).expect("test id").to_string();
        self.serve_test_at(&id, test);
    }

    /// Serves `test` at `GET /api/tests/{path_id}` whatever id its body carries.
    pub(crate) fn serve_test_at(&self, path_id: &str, test: Value) {
        self.lock().tests.insert(path_id.to_string(), test);
    }

    /// `detail` is the whole `GET /api/test-attempts/{id}` body.
    pub(crate) fn insert_attempt(&self, id: &str, detail: Value) {
        self.lock().attempts.insert(id.to_string(), detail);
    }

    pub(crate) fn set_new_attempt(&self, attempt: Value) {
        self.lock().new_attempt = Some(attempt);
    }

    pub(crate) fn reject_auth(&self) {
        self.lock().reject_auth = true;
    }

    pub(crate) fn fail_auto_save(&self, fail: bool) {
        self.lock().fail_auto_save = fail;
    }

    pub(crate) fn fail_submit(&self, fail: bool) {
        self.lock().fail_submit = fail;
    }

    /// Body returned by a successful `/submit`.
    pub(crate) fn set_submit_response(&self, body: Value) {
        self.lock().submit_response = Some(body);
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|request| request.path == path).collect()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake backend state")
    }
}

async fn handle(
    State(state): State<Arc<Mutex<FakeState>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let path = uri.path().to_string();
    let mut state = state.lock().expect("fake backend state");
    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        auth: headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    if state.reject_auth {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Token expired" })));
    }

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let found = |value: Option<&Value>, missing: &str| match value {
        Some(value) => (StatusCode::OK, Json(value.clone())),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": missing }))),
    };

    match (method.as_str(), segments.as_slice()) {
        ("GET", ["api", "tests", id]) => found(state.tests.get(*id), "Test not found"),
        ("POST", ["api", "test-attempts"]) => found(state.new_attempt.as_ref(), "Test not found"),
        ("GET", ["api", "test-attempts", id]) => found(state.attempts.get(*id), "Attempt not found"),
        ("POST", ["api", "test-attempts", _, "auto-save"]) if state.fail_auto_save => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "message": "Try again later" })))
        }
        ("POST", ["api", "test-attempts", _, "submit"]) if state.fail_submit => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": "Submission failed" })))
        }
        ("POST", ["api", "test-attempts", _, "submit"]) => {
            let body = state
                .submit_response
                .clone()
                .unwrap_or_else(|| json!({ "message": "Test submitted successfully", "score": 12.0 }));
            (StatusCode::OK, Json(body))
        }
        ("POST", ["api", "test-attempts", _, "track-time" | "heartbeat" | "auto-save" | "auto-submit"]) => {
            (StatusCode::OK, Json(json!({ "success": true })))
        }
        _ => (StatusCode::NOT_FOUND, Json(json!({ "message": "Not found" }))),
    }
}

/// Client-side wiring pointed at a [`FakeBackend`], with a throwaway store.
pub(crate) struct ClientContext {
    pub(crate) settings: Settings,
    pub(crate) backend: BackendClient,
    pub(crate) store: LocalStore,
    _dir: TempDir,
}

impl ClientContext {
    pub(crate) fn app_state(&self) -> AppState {
        AppState::new(self.settings.clone(), self.store.clone())
    }
}

pub(crate) fn client_context(fake: &FakeBackend) -> ClientContext {
    let dir = tempfile::tempdir().expect("temp dir");
    let settings = Settings::for_tests(fake.base_url(), dir.path().to_path_buf());
    let store = LocalStore::open(dir.path()).expect("local store");
    store.set_token(TEST_TOKEN).expect("token");
    let backend = BackendClient::from_settings(&settings, TEST_TOKEN.to_string()).expect("client");

    ClientContext { settings, backend, store, _dir: dir }
}

/// Four questions: Physics MCQ, Physics numerical, Chemistry MCQ by tag,
/// Mathematics MCQ by topic.
pub(crate) fn sample_test(id: &str, duration_minutes: u32) -> Value {
    json!({
        "_id": id,
        "title": "JEE Main Mock 1",
        "duration": duration_minutes,
        "questions": [
            {
                "_id": "q1",
                "text": "A body starts from rest with uniform acceleration 2 m/s^2. Its speed after 5 s is",
                "subject": "Physics",
                "questionType": "mcq",
                "options": ["5 m/s", "10 m/s", "15 m/s", "20 m/s"],
                "correctAnswer": 1,
                "marks": { "positive": 4, "negative": -1 }
            },
            {
                "_id": "q2",
                "text": "Focal length in cm of a mirror with radius of curvature 30 cm",
                "subject": "Physics",
                "type": "numerical",
                "marks": { "positive": 4, "negative": 0 }
            },
            {
                "_id": "q3",
                "text": "Hybridisation of carbon in methane",
                "tags": ["Chemistry", "bonding"],
                "options": ["sp", "sp2", "sp3", "dsp2"]
            },
            {
                "_id": "q4",
                "text": "Derivative of sin x",
                "topic": "Differential Calculus",
                "options": ["cos x", "-cos x", "sin x", "tan x"]
            }
        ]
    })
}

pub(crate) fn attempt_json(
    id: &str,
    test_id: &str,
    start_time: OffsetDateTime,
    status: &str,
    auto_save_data: Option<Value>,
) -> Value {
    json!({
        "_id": id,
        "student": "student-1",
        "testId": test_id,
        "startTime": start_time.format(&Rfc3339).expect("rfc3339"),
        "status": status,
        "autoSaveData": auto_save_data,
    })
}
