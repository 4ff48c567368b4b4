use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) api: ApiSettings,
    pub(super) storage: StorageSettings,
    pub(super) session: SessionSettings,
    pub(super) routes: RouteSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub(crate) base_url: ApiBaseUrl,
    pub(crate) request_timeout_seconds: u64,
    pub(crate) connect_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct StorageSettings {
    pub(crate) dir: PathBuf,
    pub(crate) token_override: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub(crate) auto_save_debounce_ms: u64,
    pub(crate) heartbeat_interval_seconds: u64,
    pub(crate) hidden_submit_after_seconds: u64,
    pub(crate) subject_switch_suppression_seconds: u64,
    pub(crate) unload_grace_ms: u64,
    pub(crate) beacon_max_bytes: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct RouteSettings {
    pub(crate) login: String,
    pub(crate) test_list: String,
    pub(crate) results: String,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Backend origin without a trailing slash.
#[derive(Debug, Clone)]
pub(crate) struct ApiBaseUrl(pub(super) String);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid api base url: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl ApiBaseUrl {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        let trimmed = value.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidBaseUrl(value));
        }
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(value));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn is_https(&self) -> bool {
        self.0.starts_with("https://")
    }
}

impl SessionSettings {
    pub(crate) fn auto_save_debounce(&self) -> Duration {
        Duration::from_millis(self.auto_save_debounce_ms)
    }

    pub(crate) fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub(crate) fn hidden_submit_after(&self) -> time::Duration {
        time::Duration::seconds(self.hidden_submit_after_seconds as i64)
    }

    pub(crate) fn subject_switch_suppression(&self) -> time::Duration {
        time::Duration::seconds(self.subject_switch_suppression_seconds as i64)
    }

    pub(crate) fn unload_grace(&self) -> Duration {
        Duration::from_millis(self.unload_grace_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_save_debounce_ms: 2_000,
            heartbeat_interval_seconds: 30,
            hidden_submit_after_seconds: 30,
            subject_switch_suppression_seconds: 10,
            unload_grace_ms: 1_500,
            beacon_max_bytes: 64 * 1024,
        }
    }
}

impl RouteSettings {
    /// Results route with the `{attemptId}` placeholder filled in.
    pub(crate) fn results_for(&self, attempt_id: &str) -> String {
        self.results.replace("{attemptId}", attempt_id)
    }
}
