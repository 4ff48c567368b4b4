use std::future::Future;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep_until, timeout_at, Duration, Instant, MissedTickBehavior};

use crate::core::config::Settings;
use crate::core::metrics;
use crate::core::state::AppState;
use crate::core::time::now_utc;
use crate::services::backend::BackendClient;
use crate::services::local_store::LocalStore;
use crate::session::bootstrap::{bootstrap, BootstrapRequest};
use crate::session::errors::SessionError;
use crate::session::guard::BrowserEvent;
use crate::session::machine::{
    Effect, Notice, Redirect, SessionController, SessionEvent, SessionPhase,
};
use crate::session::submission::{SubmissionPlan, SubmitEndpoint, SubmitOutcome, SubmitReason, Transport};

/// Front-end hooks. Called from the session loop; keep them quick.
pub(crate) trait SessionObserver {
    fn on_started(&mut self, controller: &SessionController, now: OffsetDateTime);
    fn on_input(&mut self, controller: &SessionController, now: OffsetDateTime);
    fn on_tick(&mut self, _controller: &SessionController, _now: OffsetDateTime) {}
    fn on_notice(&mut self, notice: &Notice);
    fn on_redirect(&mut self, path: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionOutcome {
    Submitted { acknowledged: bool },
    /// The page went away with no submission recorded.
    Closed,
    AuthRequired,
    LoadFailed(String),
}

#[derive(Debug, Clone)]
pub(crate) struct SessionReport {
    pub(crate) attempt_id: Option<String>,
    pub(crate) outcome: SessionOutcome,
    pub(crate) redirect: Option<String>,
}

/// Bootstraps a session and drives it until it is submitted or the page closes.
///
/// `input` carries front-end events; its closing counts as `unload`. `shutdown`
/// resolving counts as `beforeunload`.
pub(crate) async fn run_session<O, S>(
    state: AppState,
    request: BootstrapRequest,
    input: mpsc::Receiver<SessionEvent>,
    observer: &mut O,
    shutdown: S,
) -> anyhow::Result<SessionReport>
where
    O: SessionObserver,
    S: Future<Output = ()>,
{
    let settings = state.settings();
    let Some(token) = state.store().token() else {
        tracing::warn!(test_id = %request.test_id, "No auth token stored");
        return Ok(early_exit(settings, observer, SessionOutcome::AuthRequired, Redirect::Login));
    };
    let backend = BackendClient::from_settings(settings, token)?;

    let session = match bootstrap(&backend, state.store(), &request, now_utc()).await {
        Ok(session) => session,
        Err(SessionError::AuthRequired) => {
            tracing::warn!(test_id = %request.test_id, "Backend rejected the auth token");
            return Ok(early_exit(settings, observer, SessionOutcome::AuthRequired, Redirect::Login));
        }
        Err(err) => {
            tracing::error!(test_id = %request.test_id, error = %err, "Failed to load test session");
            observer.on_notice(&Notice::LoadFailed(err.to_string()));
            let outcome = SessionOutcome::LoadFailed(err.to_string());
            return Ok(early_exit(settings, observer, outcome, Redirect::TestList));
        }
    };

    tracing::info!(
        attempt_id = %session.attempt.id,
        resumed = session.resumed,
        remaining_seconds = session.remaining_seconds,
        answers = session.initial_answers.len(),
        "Session ready"
    );

    let now = now_utc();
    let (controller, effects) = SessionController::start(session, settings.session(), now);
    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
    let mut driver = Driver {
        cache_key: request.test_id.clone(),
        settings: settings.clone(),
        backend,
        store: state.store().clone(),
        controller,
        feedback: feedback_tx,
        autosave_at: None,
        timers_running: true,
        beacons: Vec::new(),
        acknowledged: false,
        redirect: None,
    };
    observer.on_started(&driver.controller, now);
    driver.apply(effects, observer).await;

    driver.run(input, feedback_rx, observer, shutdown).await;
    Ok(driver.finish().await)
}

fn early_exit<O: SessionObserver>(
    settings: &Settings,
    observer: &mut O,
    outcome: SessionOutcome,
    redirect: Redirect,
) -> SessionReport {
    let path = redirect.path(settings.routes());
    observer.on_redirect(&path);
    SessionReport { attempt_id: None, outcome, redirect: Some(path) }
}

struct Driver {
    /// The requested test id; the bootstrapper reads the local cache under it.
    cache_key: String,
    settings: Settings,
    backend: BackendClient,
    store: LocalStore,
    controller: SessionController,
    feedback: mpsc::UnboundedSender<SessionEvent>,
    autosave_at: Option<Instant>,
    timers_running: bool,
    beacons: Vec<JoinHandle<()>>,
    acknowledged: bool,
    redirect: Option<String>,
}

impl Driver {
    async fn run<O, S>(
        &mut self,
        mut input: mpsc::Receiver<SessionEvent>,
        mut feedback: mpsc::UnboundedReceiver<SessionEvent>,
        observer: &mut O,
        shutdown: S,
    ) where
        O: SessionObserver,
        S: Future<Output = ()>,
    {
        let unload_grace = self.settings.session().unload_grace();
        let heartbeat_every = self.settings.session().heartbeat_interval();
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        let mut shutdown_seen = false;
        let mut input_open = true;
        let mut closing_deadline: Option<Instant> = None;

        loop {
            let (event, from_input) = tokio::select! {
                _ = ticker.tick(), if self.timers_running => (SessionEvent::Tick, false),
                _ = heartbeat.tick(), if self.timers_running => (SessionEvent::HeartbeatDue, false),
                _ = sleep_until(self.autosave_at.unwrap_or_else(Instant::now)), if self.autosave_at.is_some() => {
                    self.autosave_at = None;
                    (SessionEvent::AutoSaveDue, false)
                }
                Some(event) = feedback.recv() => (event, false),
                event = input.recv(), if input_open => match event {
                    Some(event) => (event, true),
                    None => {
                        input_open = false;
                        closing_deadline.get_or_insert(Instant::now() + unload_grace);
                        (SessionEvent::Browser(BrowserEvent::Unload), false)
                    }
                },
                _ = &mut shutdown, if !shutdown_seen => {
                    shutdown_seen = true;
                    closing_deadline.get_or_insert(Instant::now() + unload_grace);
                    (SessionEvent::Browser(BrowserEvent::BeforeUnload), false)
                }
                _ = sleep_until(closing_deadline.unwrap_or_else(Instant::now)), if closing_deadline.is_some() => {
                    tracing::warn!(
                        attempt_id = self.controller.attempt_id(),
                        "Closing before the submission was confirmed"
                    );
                    break;
                }
            };

            self.dispatch(event, from_input, observer).await;

            match self.controller.phase() {
                SessionPhase::Submitted => break,
                SessionPhase::Active if closing_deadline.is_some() => break,
                _ => {}
            }
        }
    }

    async fn dispatch<O: SessionObserver>(&mut self, event: SessionEvent, from_input: bool, observer: &mut O) {
        let is_tick = matches!(event, SessionEvent::Tick);
        if matches!(event, SessionEvent::SubmitFinished(SubmitOutcome::Acknowledged)) {
            self.acknowledged = true;
        }

        let now = now_utc();
        let effects = self.controller.handle(event, now);
        self.apply(effects, observer).await;

        if from_input {
            observer.on_input(&self.controller, now);
        } else if is_tick {
            observer.on_tick(&self.controller, now);
        }
    }

    async fn apply<O: SessionObserver>(&mut self, effects: Vec<Effect>, observer: &mut O) {
        let test_id = self.cache_key.clone();
        for effect in effects {
            match effect {
                Effect::PersistAnswers(answers) => {
                    if let Err(err) = self.store.save_answers(&test_id, &answers) {
                        tracing::warn!(test_id, error = %err, "Failed to cache answers locally");
                    }
                }
                Effect::PersistTracking(tracking) => {
                    if let Err(err) = self.store.save_time_tracking(&test_id, &tracking) {
                        tracing::warn!(test_id, error = %err, "Failed to cache time tracking locally");
                    }
                }
                Effect::ScheduleAutoSave => {
                    if self.timers_running {
                        self.autosave_at = Some(Instant::now() + self.settings.session().auto_save_debounce());
                    }
                }
                Effect::AutoSave { revision, request } => {
                    let backend = self.backend.clone();
                    let attempt_id = self.controller.attempt_id().to_string();
                    let feedback = self.feedback.clone();
                    tokio::spawn(async move {
                        let error = match backend.auto_save(&attempt_id, &request).await {
                            Ok(()) => None,
                            Err(err) => {
                                metrics::record_autosave_failure();
                                Some(err.to_string())
                            }
                        };
                        let _ = feedback.send(SessionEvent::AutoSaveFinished { revision, error });
                    });
                }
                Effect::TrackTime(request) => {
                    let backend = self.backend.clone();
                    let attempt_id = self.controller.attempt_id().to_string();
                    tokio::spawn(async move {
                        if let Err(err) = backend.track_time(&attempt_id, &request).await {
                            tracing::debug!(
                                attempt_id = %attempt_id,
                                question_index = request.question_index,
                                action = request.action.as_str(),
                                error = %err,
                                "Time tracking ping failed"
                            );
                        }
                    });
                }
                Effect::Heartbeat(request) => {
                    let backend = self.backend.clone();
                    let attempt_id = self.controller.attempt_id().to_string();
                    tokio::spawn(async move {
                        if let Err(err) = backend.heartbeat(&attempt_id, &request).await {
                            tracing::debug!(attempt_id = %attempt_id, error = %err, "Heartbeat failed");
                        }
                    });
                }
                Effect::Submit(plan) => self.submit(plan).await,
                Effect::Veto(kind) => metrics::record_guard_suppressed(kind.as_str()),
                Effect::StopTimers => {
                    self.timers_running = false;
                    self.autosave_at = None;
                }
                Effect::ClearLocal => {
                    if let Err(err) = self.store.clear_session(&test_id) {
                        tracing::warn!(test_id, error = %err, "Failed to clear local session");
                    }
                }
                Effect::Redirect(redirect) => {
                    let path = redirect.path(self.settings.routes());
                    observer.on_redirect(&path);
                    self.redirect = Some(path);
                }
                Effect::Notify(notice) => observer.on_notice(&notice),
            }
        }
    }

    async fn submit(&mut self, plan: SubmissionPlan) {
        let attempt_id = self.controller.attempt_id().to_string();
        if let SubmitReason::Disconnect(reason) = plan.reason {
            metrics::record_disconnect_signal(reason.as_str());
        }
        metrics::record_submission(plan.reason.as_str(), plan.transport.as_str());

        if plan.transport == Transport::Beacon {
            let outcome = match self.backend.send_beacon(&attempt_id, &plan.payload) {
                Some(handle) => {
                    self.beacons.push(handle);
                    SubmitOutcome::Dispatched
                }
                None => {
                    tracing::info!(attempt_id = %attempt_id, "Beacon refused; falling back to keep-alive request");
                    match self.backend.auto_submit_keepalive(&attempt_id, &plan.payload).await {
                        Ok(()) => SubmitOutcome::Acknowledged,
                        Err(err) => SubmitOutcome::Failed(err.to_string()),
                    }
                }
            };
            let _ = self.feedback.send(SessionEvent::SubmitFinished(outcome));
            return;
        }

        let backend = self.backend.clone();
        let feedback = self.feedback.clone();
        tokio::spawn(async move {
            let result = match plan.endpoint {
                SubmitEndpoint::Submit => backend.submit(&attempt_id, &plan.payload).await.map(|response| {
                    tracing::info!(
                        attempt_id = %attempt_id,
                        score = ?response.score,
                        message = ?response.message,
                        "Backend accepted submission"
                    );
                }),
                SubmitEndpoint::AutoSubmit => backend.auto_submit(&attempt_id, &plan.payload).await,
            };
            let outcome = match result {
                Ok(()) => SubmitOutcome::Acknowledged,
                Err(err) => SubmitOutcome::Failed(err.to_string()),
            };
            let _ = feedback.send(SessionEvent::SubmitFinished(outcome));
        });
    }

    async fn finish(self) -> SessionReport {
        let deadline = Instant::now() + self.settings.session().unload_grace();
        for handle in self.beacons {
            match timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "Beacon task failed"),
                Err(_) => tracing::warn!("Beacon still in flight at exit"),
            }
        }

        let outcome = match self.controller.phase() {
            SessionPhase::Submitted => SessionOutcome::Submitted { acknowledged: self.acknowledged },
            _ => SessionOutcome::Closed,
        };
        let stats = self.controller.guard_stats();
        tracing::info!(
            attempt_id = self.controller.attempt_id(),
            outcome = ?outcome,
            sync_queue = self.controller.sync_queue(),
            tab_switches = stats.tab_switches,
            blocked_context_menus = stats.blocked_context_menus,
            "Session finished"
        );

        SessionReport {
            attempt_id: Some(self.controller.attempt_id().to_string()),
            outcome,
            redirect: self.redirect,
        }
    }
}
