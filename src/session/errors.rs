use thiserror::Error;

use crate::services::backend::BackendError;

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    /// No token, or the backend rejected it. The student must log in again.
    #[error("authentication required")]
    AuthRequired,
    /// The test or attempt could not be loaded.
    #[error("failed to load test session: {0}")]
    LoadFailure(String),
    /// A background auto-save did not reach the backend.
    #[error("auto-save failed: {0}")]
    SyncFailure(String),
    /// The final submission was not acknowledged.
    #[error("submission failed: {0}")]
    SubmissionFailure(String),
}

impl SessionError {
    /// Maps a backend error raised while loading a session.
    pub(crate) fn from_load(err: BackendError) -> Self {
        if err.is_auth() {
            Self::AuthRequired
        } else {
            Self::LoadFailure(err.to_string())
        }
    }
}
