use std::path::PathBuf;

use super::parsing::{
    default_storage_dir, env_optional, env_or_default, normalize_route, parse_bool,
    parse_environment, parse_positive_u64, parse_u64, parse_usize,
};
use super::types::{
    ApiBaseUrl, ApiSettings, ConfigError, RouteSettings, RuntimeSettings, SessionSettings,
    Settings, StorageSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("ELEVATE_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("ELEVATE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let base_url = ApiBaseUrl::parse(env_or_default(
            "ELEVATE_API_BASE_URL",
            "http://localhost:5000",
        ))?;
        let request_timeout_seconds = parse_positive_u64(
            "ELEVATE_REQUEST_TIMEOUT_SECONDS",
            env_or_default("ELEVATE_REQUEST_TIMEOUT_SECONDS", "15"),
        )?;
        let connect_timeout_seconds = parse_positive_u64(
            "ELEVATE_CONNECT_TIMEOUT_SECONDS",
            env_or_default("ELEVATE_CONNECT_TIMEOUT_SECONDS", "5"),
        )?;

        let storage_dir =
            env_optional("ELEVATE_STORAGE_DIR").map(PathBuf::from).unwrap_or_else(default_storage_dir);
        let token_override = env_optional("ELEVATE_TOKEN");

        let auto_save_debounce_ms = parse_positive_u64(
            "ELEVATE_AUTO_SAVE_DEBOUNCE_MS",
            env_or_default("ELEVATE_AUTO_SAVE_DEBOUNCE_MS", "2000"),
        )?;
        let heartbeat_interval_seconds = parse_positive_u64(
            "ELEVATE_HEARTBEAT_INTERVAL_SECONDS",
            env_or_default("ELEVATE_HEARTBEAT_INTERVAL_SECONDS", "30"),
        )?;
        let hidden_submit_after_seconds = parse_positive_u64(
            "ELEVATE_HIDDEN_SUBMIT_AFTER_SECONDS",
            env_or_default("ELEVATE_HIDDEN_SUBMIT_AFTER_SECONDS", "30"),
        )?;
        let subject_switch_suppression_seconds = parse_u64(
            "ELEVATE_SUBJECT_SWITCH_SUPPRESSION_SECONDS",
            env_or_default("ELEVATE_SUBJECT_SWITCH_SUPPRESSION_SECONDS", "10"),
        )?;
        let unload_grace_ms = parse_u64(
            "ELEVATE_UNLOAD_GRACE_MS",
            env_or_default("ELEVATE_UNLOAD_GRACE_MS", "1500"),
        )?;
        let beacon_max_bytes = parse_usize(
            "ELEVATE_BEACON_MAX_BYTES",
            env_or_default("ELEVATE_BEACON_MAX_BYTES", "65536"),
        )?;

        let login = normalize_route("ELEVATE_LOGIN_ROUTE", env_or_default("ELEVATE_LOGIN_ROUTE", "/login"))?;
        let test_list = normalize_route(
            "ELEVATE_TEST_LIST_ROUTE",
            env_or_default("ELEVATE_TEST_LIST_ROUTE", "/tests"),
        )?;
        let results = normalize_route(
            "ELEVATE_RESULTS_ROUTE",
            env_or_default("ELEVATE_RESULTS_ROUTE", "/results/{attemptId}"),
        )?;

        let log_level = env_or_default("ELEVATE_LOG_LEVEL", "info");
        let json = env_optional("ELEVATE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { base_url, request_timeout_seconds, connect_timeout_seconds },
            storage: StorageSettings { dir: storage_dir, token_override },
            session: SessionSettings {
                auto_save_debounce_ms,
                heartbeat_interval_seconds,
                hidden_submit_after_seconds,
                subject_switch_suppression_seconds,
                unload_grace_ms,
                beacon_max_bytes,
            },
            routes: RouteSettings { login, test_list, results },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn session(&self) -> &SessionSettings {
        &self.session
    }

    pub(crate) fn routes(&self) -> &RouteSettings {
        &self.routes
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.routes.results.contains("{attemptId}") {
            return Err(ConfigError::InvalidValue {
                field: "ELEVATE_RESULTS_ROUTE",
                value: self.routes.results.clone(),
            });
        }

        if self.session.beacon_max_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ELEVATE_BEACON_MAX_BYTES",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if !self.api.base_url.is_https() {
            return Err(ConfigError::InvalidBaseUrl(self.api.base_url.as_str().to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
impl Settings {
    /// Settings pointing at a local fake backend and a scratch storage dir.
    pub(crate) fn for_tests(base_url: &str, storage_dir: PathBuf) -> Self {
        Self {
            runtime: RuntimeSettings {
                environment: super::types::Environment::Test,
                strict_config: false,
            },
            api: ApiSettings {
                base_url: ApiBaseUrl(base_url.trim_end_matches('/').to_string()),
                request_timeout_seconds: 5,
                connect_timeout_seconds: 2,
            },
            storage: StorageSettings { dir: storage_dir, token_override: None },
            session: SessionSettings { auto_save_debounce_ms: 50, ..SessionSettings::default() },
            routes: RouteSettings {
                login: "/login".to_string(),
                test_list: "/tests".to_string(),
                results: "/results/{attemptId}".to_string(),
            },
            telemetry: TelemetrySettings {
                log_level: "debug".to_string(),
                json: false,
                prometheus_enabled: false,
            },
        }
    }

    pub(crate) fn session_mut(&mut self) -> &mut SessionSettings {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::ApiBaseUrl;

    #[test]
    fn base_url_trims_trailing_slash() {
        let url = ApiBaseUrl::parse("https://api.example.com/".to_string()).expect("url");
        assert_eq!(url.as_str(), "https://api.example.com");
        assert!(url.is_https());
    }

    #[test]
    fn base_url_requires_scheme() {
        assert!(ApiBaseUrl::parse("api.example.com".to_string()).is_err());
        assert!(ApiBaseUrl::parse("  ".to_string()).is_err());
    }
}
