pub(crate) mod console;
pub(crate) mod core;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod session;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use tokio::sync::mpsc;

use crate::console::{ConsoleObserver, LaunchArgs};
use crate::core::{config::Settings, state::AppState, telemetry};
use crate::services::local_store::LocalStore;
use crate::session::bootstrap::BootstrapRequest;
use crate::tasks::runtime::{self, SessionOutcome};

const INPUT_BUFFER: usize = 64;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let args = LaunchArgs::from_env()?;
    let store = LocalStore::open(settings.storage().dir.clone())
        .context("Failed to open local session store")?;
    if let Some(token) = settings.storage().token_override.as_deref() {
        store.set_token(token).context("Failed to store auth token")?;
    }

    tracing::info!(
        test_id = %args.test_id,
        force_new = args.force_new,
        api = %settings.api().base_url.as_str(),
        storage = %store.base_dir().display(),
        environment = %settings.runtime().environment.as_str(),
        "Starting exam session"
    );

    let state = AppState::new(settings, store);
    let (events_tx, events_rx) = mpsc::channel(INPUT_BUFFER);
    let reader = console::spawn_stdin_reader(events_tx);
    let mut observer = ConsoleObserver::default();

    let report = runtime::run_session(
        state,
        BootstrapRequest { test_id: args.test_id, force_new: args.force_new },
        events_rx,
        &mut observer,
        core::shutdown::shutdown_signal(),
    )
    .await?;
    reader.abort();

    tracing::info!(
        attempt_id = report.attempt_id.as_deref().unwrap_or("-"),
        outcome = ?report.outcome,
        redirect = report.redirect.as_deref().unwrap_or("-"),
        "Exam session ended"
    );
    if let Some(rendered) = core::metrics::render() {
        tracing::info!(metrics = %rendered, "Session metrics");
    }

    match report.outcome {
        SessionOutcome::AuthRequired => Err(anyhow::anyhow!("authentication required")),
        SessionOutcome::LoadFailed(message) => Err(anyhow::anyhow!("failed to load test: {message}")),
        SessionOutcome::Submitted { .. } | SessionOutcome::Closed => Ok(()),
    }
}
