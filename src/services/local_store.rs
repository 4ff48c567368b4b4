use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::schemas::answer::AnswerMap;
use crate::schemas::submission::QuestionTimeReport;

const TOKEN_KEY: &str = "token";

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("local store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("local store entry {path} is not valid json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable key/value storage for one device, one JSON file per key.
///
/// This is the session's equivalent of browser local storage: the bearer token,
/// the attempt id to resume, and the cached answers live here between runs.
#[derive(Debug, Clone)]
pub(crate) struct LocalStore {
    base_dir: PathBuf,
}

impl LocalStore {
    pub(crate) fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .map_err(|source| StoreError::Io { path: base_dir.clone(), source })?;
        Ok(Self { base_dir })
    }

    pub(crate) fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub(crate) fn token(&self) -> Option<String> {
        match self.read::<String>(TOKEN_KEY) {
            Ok(token) => token.filter(|value| !value.trim().is_empty()),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read stored token");
                None
            }
        }
    }

    pub(crate) fn set_token(&self, token: &str) -> Result<(), StoreError> {
        self.write(TOKEN_KEY, &token)
    }

    pub(crate) fn saved_attempt_id(&self, test_id: &str) -> Option<String> {
        match self.read::<String>(&attempt_key(test_id)) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(test_id, error = %err, "Failed to read saved attempt id");
                None
            }
        }
    }

    pub(crate) fn save_attempt_id(&self, test_id: &str, attempt_id: &str) -> Result<(), StoreError> {
        self.write(&attempt_key(test_id), &attempt_id)
    }

    /// Cached answers for a test; unreadable caches come back empty.
    pub(crate) fn load_answers(&self, test_id: &str) -> AnswerMap {
        match self.read::<AnswerMap>(&answers_key(test_id)) {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(test_id, error = %err, "Discarding unreadable cached answers");
                AnswerMap::new()
            }
        }
    }

    pub(crate) fn save_answers(&self, test_id: &str, answers: &AnswerMap) -> Result<(), StoreError> {
        self.write(&answers_key(test_id), answers)
    }

    pub(crate) fn load_time_tracking(&self, test_id: &str) -> BTreeMap<usize, QuestionTimeReport> {
        match self.read(&tracking_key(test_id)) {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(test_id, error = %err, "Discarding unreadable time tracking");
                BTreeMap::new()
            }
        }
    }

    pub(crate) fn save_time_tracking(
        &self,
        test_id: &str,
        tracking: &BTreeMap<usize, QuestionTimeReport>,
    ) -> Result<(), StoreError> {
        self.write(&tracking_key(test_id), tracking)
    }

    /// Drops the attempt id, answers and time tracking cached for `test_id`.
    pub(crate) fn clear_session(&self, test_id: &str) -> Result<(), StoreError> {
        self.remove(&attempt_key(test_id))?;
        self.remove(&answers_key(test_id))?;
        self.remove(&tracking_key(test_id))
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_key(key)))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let path = self.file_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        serde_json::from_str(&content).map(Some).map_err(|source| StoreError::Json { path, source })
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<(), StoreError> {
        let path = self.file_path(key);
        let tmp_path = path.with_extension("tmp");

        let json = serde_json::to_vec(data)
            .map_err(|source| StoreError::Json { path: path.clone(), source })?;
        let io_err = |source| StoreError::Io { path: tmp_path.clone(), source };
        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.file_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

fn attempt_key(test_id: &str) -> String {
    format!("attempt_{test_id}")
}

fn answers_key(test_id: &str) -> String {
    format!("answers_{test_id}")
}

fn tracking_key(test_id: &str) -> String {
    format!("time_tracking_{test_id}")
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::answer::{AnswerPatch, AnswerState};

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalStore::open(dir.path().join("store")).expect("store");
        (dir, store)
    }

    #[test]
    fn answers_survive_reopen() {
        let (dir, store) = store();
        let mut state = AnswerState::default();
        state.apply(AnswerPatch::select(3), 10);
        let answers = AnswerMap::from([(4, state)]);
        store.save_answers("test-1", &answers).expect("save");

        let reopened = LocalStore::open(dir.path().join("store")).expect("reopen");
        assert_eq!(reopened.load_answers("test-1"), answers);
        assert!(reopened.load_answers("other").is_empty());
    }

    #[test]
    fn clear_session_removes_every_key_and_tolerates_missing_files() {
        let (_dir, store) = store();
        store.save_attempt_id("t", "attempt-9").expect("attempt");
        store.save_answers("t", &AnswerMap::new()).expect("answers");

        store.clear_session("t").expect("clear");
        store.clear_session("t").expect("clear twice");

        assert_eq!(store.saved_attempt_id("t"), None);
        assert!(store.load_answers("t").is_empty());
    }

    #[test]
    fn corrupt_cache_reads_as_empty() {
        let (_dir, store) = store();
        fs::write(store.base_dir().join("answers_t.json"), "{not json").expect("write");
        assert!(store.load_answers("t").is_empty());
    }

    #[test]
    fn keys_are_sanitized() {
        let (_dir, store) = store();
        store.save_attempt_id("../escape/me", "a1").expect("save");
        assert_eq!(store.saved_attempt_id("../escape/me").as_deref(), Some("a1"));
        assert!(store.base_dir().join("attempt____escape_me.json").exists());
    }

    #[test]
    fn blank_token_is_absent() {
        let (_dir, store) = store();
        assert_eq!(store.token(), None);
        store.set_token("  ").expect("blank");
        assert_eq!(store.token(), None);
        store.set_token("abc").expect("token");
        assert_eq!(store.token().as_deref(), Some("abc"));
    }
}
