use std::time::Duration;

use anyhow::Context;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::core::config::Settings;
use crate::schemas::attempt::{Attempt, AttemptDetail, CreateAttemptRequest};
use crate::schemas::submission::{
    AutoSaveRequest, HeartbeatRequest, SubmitPayload, SubmitResponse, TrackTimeRequest,
};
use crate::schemas::test::Test;

#[derive(Debug, Error)]
pub(crate) enum BackendError {
    #[error("authentication required (status {0})")]
    Unauthorized(StatusCode),
    #[error("backend returned {status}: {detail}")]
    Status { status: StatusCode, detail: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    pub(crate) fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

/// HTTP client for the exam backend. Every call carries the student's bearer token.
#[derive(Debug, Clone)]
pub(crate) struct BackendClient {
    client: Client,
    base_url: String,
    token: String,
    beacon_max_bytes: usize,
    unload_timeout: Duration,
}

impl BackendClient {
    pub(crate) fn from_settings(settings: &Settings, token: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.api().connect_timeout_seconds))
            .timeout(Duration::from_secs(settings.api().request_timeout_seconds))
            .build()
            .context("Failed to build backend HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.api().base_url.as_str().to_string(),
            token,
            beacon_max_bytes: settings.session().beacon_max_bytes,
            unload_timeout: settings.session().unload_grace(),
        })
    }

    pub(crate) async fn fetch_test(&self, test_id: &str) -> Result<Test, BackendError> {
        let url = self.endpoint(&["api", "tests", test_id])?;
        let response = self.client.get(url).bearer_auth(&self.token).send().await?;
        read_json(response).await
    }

    pub(crate) async fn create_attempt(&self, test_id: &str) -> Result<Attempt, BackendError> {
        let url = self.endpoint(&["api", "test-attempts"])?;
        let response = self.post_json(url, &CreateAttemptRequest { test_id }).await?;
        read_json(response).await
    }

    pub(crate) async fn fetch_attempt(&self, attempt_id: &str) -> Result<AttemptDetail, BackendError> {
        let url = self.endpoint(&["api", "test-attempts", attempt_id])?;
        let response = self.client.get(url).bearer_auth(&self.token).send().await?;
        read_json(response).await
    }

    pub(crate) async fn track_time(
        &self,
        attempt_id: &str,
        request: &TrackTimeRequest,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&["api", "test-attempts", attempt_id, "track-time"])?;
        let response = self.post_json(url, request).await?;
        check_status(response).await.map(drop)
    }

    pub(crate) async fn heartbeat(
        &self,
        attempt_id: &str,
        request: &HeartbeatRequest,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&["api", "test-attempts", attempt_id, "heartbeat"])?;
        let response = self.post_json(url, request).await?;
        check_status(response).await.map(drop)
    }

    pub(crate) async fn auto_save(
        &self,
        attempt_id: &str,
        request: &AutoSaveRequest,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&["api", "test-attempts", attempt_id, "auto-save"])?;
        let response = self.post_json(url, request).await?;
        check_status(response).await.map(drop)
    }

    pub(crate) async fn submit(
        &self,
        attempt_id: &str,
        payload: &SubmitPayload,
    ) -> Result<SubmitResponse, BackendError> {
        let url = self.endpoint(&["api", "test-attempts", attempt_id, "submit"])?;
        let response = self.post_json(url, payload).await?;
        let response = check_status(response).await?;
        // Past this point the attempt is accepted; the body is informational.
        let raw = match response.text().await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(attempt_id, error = %err, "Failed to read submit response body");
                return Ok(SubmitResponse::default());
            }
        };
        if raw.trim().is_empty() {
            return Ok(SubmitResponse::default());
        }
        Ok(serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(attempt_id, error = %err, "Unrecognised submit response body");
            SubmitResponse::default()
        }))
    }

    /// Page-alive auto submission to `/auto-submit`, awaited like a normal request.
    pub(crate) async fn auto_submit(
        &self,
        attempt_id: &str,
        payload: &SubmitPayload,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&["api", "test-attempts", attempt_id, "auto-submit"])?;
        let response = self.post_json(url, payload).await?;
        check_status(response).await.map(drop)
    }

    /// Keep-alive fallback used while the process is going away: same endpoint as
    /// [`Self::auto_submit`] but bounded by the unload grace period.
    pub(crate) async fn auto_submit_keepalive(
        &self,
        attempt_id: &str,
        payload: &SubmitPayload,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&["api", "test-attempts", attempt_id, "auto-submit"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONNECTION, "keep-alive")
            .timeout(self.unload_timeout)
            .json(payload)
            .send()
            .await?;
        check_status(response).await.map(drop)
    }

    /// Fire-and-forget delivery to `/auto-submit`. Returns `None` when the beacon
    /// is refused (payload over the size ceiling or unserializable), in which case
    /// the caller falls back to [`Self::auto_submit_keepalive`].
    pub(crate) fn send_beacon(
        &self,
        attempt_id: &str,
        payload: &SubmitPayload,
    ) -> Option<JoinHandle<()>> {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(attempt_id, error = %err, "Failed to encode beacon payload");
                return None;
            }
        };
        if body.len() > self.beacon_max_bytes {
            tracing::warn!(
                attempt_id,
                size = body.len(),
                limit = self.beacon_max_bytes,
                "Beacon payload too large"
            );
            return None;
        }
        let url = match self.endpoint(&["api", "test-attempts", attempt_id, "auto-submit"]) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(attempt_id, error = %err, "Failed to build beacon url");
                return None;
            }
        };

        let request = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.unload_timeout)
            .body(body);
        let attempt_id = attempt_id.to_string();

        Some(tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(attempt_id = %attempt_id, "Beacon delivered");
                }
                Ok(response) => {
                    tracing::warn!(attempt_id = %attempt_id, status = %response.status(), "Beacon rejected");
                }
                Err(err) => tracing::warn!(attempt_id = %attempt_id, error = %err, "Beacon failed"),
            }
        }))
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<Response, BackendError> {
        Ok(self.client.post(url).bearer_auth(&self.token).json(body).send().await?)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|err| BackendError::InvalidUrl(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(BackendError::Unauthorized(status));
    }

    let raw = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&raw)
        .map(|parsed| extract_error_message(&parsed))
        .unwrap_or_else(|_| if raw.is_empty() { status.to_string() } else { raw });
    Err(BackendError::Status { status, detail })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let response = check_status(response).await?;
    let raw = response.text().await?;
    serde_json::from_str(&raw).map_err(|err| BackendError::Decode(format!("{err}: {raw}")))
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let joined = items
                .iter()
                .filter_map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| item.get("message").and_then(Value::as_str))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}
