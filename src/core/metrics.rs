use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn record_submission(reason: &'static str, transport: &'static str) {
    metrics::counter!("cbt_submissions_total", "reason" => reason, "transport" => transport)
        .increment(1);
}

pub(crate) fn record_autosave_failure() {
    metrics::counter!("cbt_autosave_failures_total").increment(1);
}

pub(crate) fn record_guard_suppressed(kind: &'static str) {
    metrics::counter!("cbt_guard_suppressed_total", "kind" => kind).increment(1);
}

pub(crate) fn record_disconnect_signal(reason: &'static str) {
    metrics::counter!("cbt_disconnect_signals_total", "reason" => reason).increment(1);
}
