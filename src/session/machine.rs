use std::collections::BTreeMap;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::config::{RouteSettings, SessionSettings};
use crate::core::time::unix_millis;
use crate::schemas::answer::{AnswerMap, AnswerPatch, AnswerState};
use crate::schemas::submission::{
    AutoSaveRequest, HeartbeatRequest, QuestionTimeReport, TrackAction, TrackTimeRequest,
};
use crate::schemas::test::{Question, Subject, Test};
use crate::session::answers::AnswerStore;
use crate::session::bootstrap::BootstrappedSession;
use crate::session::errors::SessionError;
use crate::session::guard::{BrowserEvent, GuardStats, GuardVerdict, NavigationGuard, SuppressKind};
use crate::session::palette::{self, PaletteStatus, PaletteSummary, SubjectRouter};
use crate::session::submission::{self, SubmissionPlan, SubmitOutcome, SubmitReason};
use crate::session::timer::{Countdown, TimerTick};
use crate::session::tracking::TimeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NavTarget {
    Next,
    Previous,
    Index(usize),
}

/// Everything that can happen to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    Navigate(NavTarget),
    SelectOption(usize),
    EnterNumerical(String),
    ToggleReview,
    ClearAnswer,
    SelectSubject(Subject),
    Tick,
    HeartbeatDue,
    AutoSaveDue,
    AutoSaveFinished { revision: u64, error: Option<String> },
    Browser(BrowserEvent),
    SubmitRequested,
    SubmitFinished(SubmitOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Redirect {
    Login,
    TestList,
    Results(String),
}

impl Redirect {
    pub(crate) fn path(&self, routes: &RouteSettings) -> String {
        match self {
            Self::Login => routes.login.clone(),
            Self::TestList => routes.test_list.clone(),
            Self::Results(attempt_id) => routes.results_for(attempt_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notice {
    LoadFailed(String),
    AutoSubmitting(SubmitReason),
    Submitted,
    SubmissionFailed(String),
    Rejected(&'static str),
}

/// Side effects requested by the machine. The runtime executes them.
#[derive(Debug, Clone)]
pub(crate) enum Effect {
    PersistAnswers(AnswerMap),
    PersistTracking(BTreeMap<usize, QuestionTimeReport>),
    /// Restart the auto-save debounce window.
    ScheduleAutoSave,
    AutoSave { revision: u64, request: AutoSaveRequest },
    TrackTime(TrackTimeRequest),
    Heartbeat(HeartbeatRequest),
    Submit(SubmissionPlan),
    Veto(SuppressKind),
    StopTimers,
    ClearLocal,
    Redirect(Redirect),
    Notify(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionPhase {
    Active,
    Submitting(SubmitReason),
    Submitted,
}

/// Read-only snapshot for front ends.
#[derive(Debug)]
pub(crate) struct SessionView<'a> {
    pub(crate) title: &'a str,
    pub(crate) index: usize,
    pub(crate) total: usize,
    pub(crate) question: Option<&'a Question>,
    pub(crate) answer: Option<&'a AnswerState>,
    pub(crate) status: PaletteStatus,
    pub(crate) subject: Subject,
    pub(crate) remaining_seconds: u64,
    /// Closed focus time only; the open session is not counted yet.
    pub(crate) seconds_on_question: u64,
    pub(crate) sync_queue: u64,
    pub(crate) sync_failing: bool,
    pub(crate) phase: SessionPhase,
}

/// The session controller: the only owner of session state. Inputs arrive as
/// [`SessionEvent`]s and leave as [`Effect`]s.
#[derive(Debug)]
pub(crate) struct SessionController {
    test: Test,
    attempt_id: String,
    submission_id: Uuid,
    answers: AnswerStore,
    countdown: Countdown,
    guard: NavigationGuard,
    router: SubjectRouter,
    tracker: TimeTracker,
    current: usize,
    phase: SessionPhase,
    synced_revision: u64,
    sync_in_flight: Option<u64>,
    sync_error: Option<String>,
    initial_sync_pending: bool,
}

impl SessionController {
    pub(crate) fn start(
        session: BootstrappedSession,
        settings: &SessionSettings,
        now: OffsetDateTime,
    ) -> (Self, Vec<Effect>) {
        let BootstrappedSession { test, attempt, initial_answers, time_tracking, .. } = session;
        let initial_subject = test.question(0).map(Question::subject).unwrap_or_default();
        let initial_sync_pending = !initial_answers.is_empty();

        let mut controller = Self {
            countdown: Countdown::new(test.duration, attempt.start_time),
            guard: NavigationGuard::new(settings.hidden_submit_after()),
            router: SubjectRouter::new(initial_subject, settings.subject_switch_suppression()),
            tracker: TimeTracker::new(time_tracking),
            answers: AnswerStore::new(initial_answers),
            submission_id: submission::submission_id_for(&attempt.id),
            attempt_id: attempt.id,
            current: 0,
            phase: SessionPhase::Active,
            synced_revision: 0,
            sync_in_flight: None,
            sync_error: None,
            initial_sync_pending,
            test,
        };

        let mut effects = Vec::new();
        if controller.test.questions.is_empty() {
            tracing::warn!(attempt_id = %controller.attempt_id, "Test has no questions");
            return (controller, effects);
        }

        controller.tracker.focus(0, now);
        effects.push(controller.track(0, TrackAction::View, 0, now));
        if controller.answers.mark_visited(0, unix_millis(now)) || initial_sync_pending {
            controller.persist_and_schedule(&mut effects);
        }
        (controller, effects)
    }

    pub(crate) fn handle(&mut self, event: SessionEvent, now: OffsetDateTime) -> Vec<Effect> {
        match event {
            SessionEvent::Navigate(target) => self.navigate(target, now),
            SessionEvent::SelectOption(option) => self.select_option(option, now),
            SessionEvent::EnterNumerical(value) => self.enter_numerical(value, now),
            SessionEvent::ToggleReview => self.toggle_review(now),
            SessionEvent::ClearAnswer => self.clear_answer(now),
            SessionEvent::SelectSubject(subject) => {
                if self.phase != SessionPhase::Submitted {
                    self.router.select(subject, now);
                }
                Vec::new()
            }
            SessionEvent::Tick => self.tick(now),
            SessionEvent::HeartbeatDue => self.heartbeat(now),
            SessionEvent::AutoSaveDue => self.auto_save(now),
            SessionEvent::AutoSaveFinished { revision, error } => {
                self.auto_save_finished(revision, error)
            }
            SessionEvent::Browser(event) => self.browser(event, now),
            SessionEvent::SubmitRequested => self.begin_submission(SubmitReason::Manual, now),
            SessionEvent::SubmitFinished(outcome) => self.submit_finished(outcome, now),
        }
    }

    pub(crate) fn view(&self, now: OffsetDateTime) -> SessionView<'_> {
        let answer = self.answers.get(self.current);
        SessionView {
            title: &self.test.title,
            index: self.current,
            total: self.test.questions.len(),
            question: self.test.question(self.current),
            answer,
            status: PaletteStatus::of(answer),
            subject: self.router.active(),
            remaining_seconds: self.countdown.remaining(now),
            seconds_on_question: self.tracker.tracked_seconds(self.current),
            sync_queue: self.sync_queue(),
            sync_failing: self.sync_error.is_some(),
            phase: self.phase,
        }
    }

    pub(crate) fn palette(&self) -> PaletteSummary {
        palette::summarize(&self.test.questions, self.answers.snapshot())
    }

    pub(crate) fn status_of(&self, index: usize) -> PaletteStatus {
        PaletteStatus::of(self.answers.get(index))
    }

    /// Answer revisions not yet acknowledged by the backend.
    pub(crate) fn sync_queue(&self) -> u64 {
        self.answers.revision().saturating_sub(self.synced_revision)
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn remaining(&self, now: OffsetDateTime) -> u64 {
        self.countdown.remaining(now)
    }

    pub(crate) fn guard_stats(&self) -> GuardStats {
        self.guard.stats()
    }

    pub(crate) fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    fn can_mutate(&self, now: OffsetDateTime) -> bool {
        self.phase == SessionPhase::Active && !self.countdown.is_expired(now)
    }

    fn navigate(&mut self, target: NavTarget, now: OffsetDateTime) -> Vec<Effect> {
        if self.phase == SessionPhase::Submitted {
            return Vec::new();
        }
        let total = self.test.questions.len();
        let index = match target {
            NavTarget::Next => self.current + 1,
            NavTarget::Previous => match self.current.checked_sub(1) {
                Some(index) => index,
                None => return Vec::new(),
            },
            NavTarget::Index(index) => index,
        };
        if index >= total || index == self.current {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if let Some(delta) = self.tracker.focus(index, now) {
            effects.push(self.track(delta.index, TrackAction::NavigateAway, delta.seconds, now));
            effects.push(Effect::PersistTracking(self.tracker.snapshot().clone()));
        }
        self.current = index;
        effects.push(self.track(index, TrackAction::View, 0, now));

        if let Some(subject) = self.test.question(index).map(Question::subject) {
            if self.router.follow(subject, now) {
                tracing::debug!(question_index = index, subject = %subject, "Switched subject tab");
            }
        }

        let visited = self.can_mutate(now) && self.answers.mark_visited(index, unix_millis(now));
        if visited {
            self.persist_and_schedule(&mut effects);
        } else if self.sync_error.is_some() && self.sync_in_flight.is_none() {
            effects.push(Effect::ScheduleAutoSave);
        }
        effects
    }

    fn select_option(&mut self, option: usize, now: OffsetDateTime) -> Vec<Effect> {
        let Some(question) = self.mutable_question(now) else {
            return Vec::new();
        };
        if question.is_numerical() {
            return vec![Effect::Notify(Notice::Rejected("numerical question takes a value"))];
        }
        if option >= question.options.len() {
            return vec![Effect::Notify(Notice::Rejected("no such option"))];
        }
        self.record(AnswerPatch::select(option), TrackAction::Answer, now)
    }

    fn enter_numerical(&mut self, value: String, now: OffsetDateTime) -> Vec<Effect> {
        let Some(question) = self.mutable_question(now) else {
            return Vec::new();
        };
        if !question.is_numerical() {
            return vec![Effect::Notify(Notice::Rejected("choose an option for this question"))];
        }
        let value = value.trim().to_string();
        if !value.is_empty() && value.parse::<f64>().is_err() {
            return vec![Effect::Notify(Notice::Rejected("not a number"))];
        }
        self.record(AnswerPatch::numerical(value), TrackAction::Answer, now)
    }

    fn toggle_review(&mut self, now: OffsetDateTime) -> Vec<Effect> {
        if self.mutable_question(now).is_none() {
            return Vec::new();
        }
        let marked = self.answers.toggle_review(self.current, unix_millis(now));
        tracing::debug!(question_index = self.current, marked, "Toggled review mark");

        let mut effects = vec![self.track(self.current, TrackAction::Mark, 0, now)];
        self.persist_and_schedule(&mut effects);
        effects
    }

    fn clear_answer(&mut self, now: OffsetDateTime) -> Vec<Effect> {
        if self.mutable_question(now).is_none() {
            return Vec::new();
        }
        let has_content = self
            .answers
            .get(self.current)
            .is_some_and(|state| state.is_answered() || state.is_marked());
        if !has_content || !self.answers.clear(self.current) {
            return Vec::new();
        }
        // The student is still looking at the question.
        self.answers.mark_visited(self.current, unix_millis(now));

        let mut effects = vec![self.track(self.current, TrackAction::Clear, 0, now)];
        self.persist_and_schedule(&mut effects);
        effects
    }

    fn mutable_question(&self, now: OffsetDateTime) -> Option<&Question> {
        if !self.can_mutate(now) {
            tracing::debug!(phase = ?self.phase, "Ignoring answer change outside an active session");
            return None;
        }
        self.test.question(self.current)
    }

    fn record(&mut self, patch: AnswerPatch, action: TrackAction, now: OffsetDateTime) -> Vec<Effect> {
        self.answers.record(self.current, patch, unix_millis(now));
        let mut effects = vec![self.track(self.current, action, 0, now)];
        self.persist_and_schedule(&mut effects);
        effects
    }

    fn persist_and_schedule(&self, effects: &mut Vec<Effect>) {
        effects.push(Effect::PersistAnswers(self.answers.snapshot().clone()));
        effects.push(Effect::ScheduleAutoSave);
    }

    fn track(&self, index: usize, action: TrackAction, seconds: u64, now: OffsetDateTime) -> Effect {
        Effect::TrackTime(TrackTimeRequest {
            question_index: index,
            action,
            time_spent: seconds,
            timestamp: unix_millis(now),
        })
    }

    fn tick(&mut self, now: OffsetDateTime) -> Vec<Effect> {
        if self.phase == SessionPhase::Submitted {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if self.countdown.tick(now) == TimerTick::Expired {
            tracing::info!(attempt_id = %self.attempt_id, "Time is up");
            effects.extend(self.begin_submission(SubmitReason::TimerExpired, now));
        }
        if let Some(reason) = self.guard.poll(now) {
            effects.extend(self.begin_submission(SubmitReason::Disconnect(reason), now));
        }
        effects
    }

    fn heartbeat(&self, now: OffsetDateTime) -> Vec<Effect> {
        if self.phase != SessionPhase::Active {
            return Vec::new();
        }
        vec![Effect::Heartbeat(HeartbeatRequest {
            timestamp: unix_millis(now),
            current_question: self.current,
            answered_count: self.answers.answered_count(),
        })]
    }

    fn auto_save(&mut self, now: OffsetDateTime) -> Vec<Effect> {
        if self.phase != SessionPhase::Active || self.sync_in_flight.is_some() {
            return Vec::new();
        }
        let revision = self.answers.revision();
        if revision == self.synced_revision && !self.initial_sync_pending {
            return Vec::new();
        }

        self.sync_in_flight = Some(revision);
        vec![Effect::AutoSave {
            revision,
            request: AutoSaveRequest {
                answers: self.answers.snapshot().clone(),
                question_time_tracking: self.tracker.snapshot().clone(),
                timestamp: unix_millis(now),
            },
        }]
    }

    fn auto_save_finished(&mut self, revision: u64, error: Option<String>) -> Vec<Effect> {
        self.sync_in_flight = None;
        if self.phase == SessionPhase::Submitted {
            return Vec::new();
        }

        match error {
            None => {
                self.synced_revision = self.synced_revision.max(revision);
                self.initial_sync_pending = false;
                self.sync_error = None;
                if self.sync_queue() > 0 {
                    return vec![Effect::ScheduleAutoSave];
                }
            }
            Some(message) => {
                let err = SessionError::SyncFailure(message.clone());
                tracing::warn!(
                    attempt_id = %self.attempt_id,
                    queued = self.sync_queue(),
                    error = %err,
                    "Auto-save did not reach the backend"
                );
                self.sync_error = Some(message);
            }
        }
        Vec::new()
    }

    fn browser(&mut self, event: BrowserEvent, now: OffsetDateTime) -> Vec<Effect> {
        if self.phase == SessionPhase::Submitted {
            return Vec::new();
        }

        let mut effects = Vec::new();
        match event {
            BrowserEvent::VisibilityHidden | BrowserEvent::WindowBlur => {
                if let Some(delta) = self.tracker.pause(now) {
                    effects.push(self.track(delta.index, TrackAction::NavigateAway, delta.seconds, now));
                    effects.push(Effect::PersistTracking(self.tracker.snapshot().clone()));
                }
            }
            BrowserEvent::VisibilityVisible | BrowserEvent::WindowFocus => {
                if self.phase == SessionPhase::Active && !self.test.questions.is_empty() {
                    self.tracker.resume(self.current, now);
                }
            }
            _ => {}
        }

        match self.guard.inspect(&event, now) {
            GuardVerdict::Allow => {}
            GuardVerdict::Suppress(kind) => {
                tracing::debug!(kind = kind.as_str(), "Suppressed page event");
                effects.push(Effect::Veto(kind));
            }
            GuardVerdict::Disconnect(reason) => {
                tracing::info!(attempt_id = %self.attempt_id, reason = reason.as_str(), "Disconnect signal");
                effects.extend(self.begin_submission(SubmitReason::Disconnect(reason), now));
            }
        }
        effects
    }

    fn begin_submission(&mut self, reason: SubmitReason, now: OffsetDateTime) -> Vec<Effect> {
        if self.phase != SessionPhase::Active {
            tracing::debug!(reason = reason.as_str(), phase = ?self.phase, "Submission already underway");
            return Vec::new();
        }
        if reason.is_auto() && !self.guard.try_latch() {
            tracing::debug!(reason = reason.as_str(), "Auto-submit latch already taken");
            return Vec::new();
        }

        self.tracker.pause(now);
        let plan = submission::plan(
            reason,
            self.submission_id,
            self.answers.snapshot(),
            self.tracker.snapshot(),
            &self.answers.visited_indices(),
            self.countdown.elapsed(now),
        );
        self.phase = SessionPhase::Submitting(reason);

        let stats = self.guard.stats();
        tracing::info!(
            attempt_id = %self.attempt_id,
            reason = reason.as_str(),
            transport = plan.transport.as_str(),
            answered = self.answers.answered_count(),
            tab_switches = stats.tab_switches,
            suppressed_shortcuts = stats.suppressed_shortcuts,
            vetoed_navigations = stats.vetoed_navigations,
            "Submitting attempt"
        );

        let mut effects = vec![Effect::PersistTracking(self.tracker.snapshot().clone())];
        if reason.is_auto() {
            effects.push(Effect::Notify(Notice::AutoSubmitting(reason)));
        }
        effects.push(Effect::Submit(plan));
        effects
    }

    fn submit_finished(&mut self, outcome: SubmitOutcome, now: OffsetDateTime) -> Vec<Effect> {
        let SessionPhase::Submitting(reason) = self.phase else {
            tracing::debug!(outcome = ?outcome, "Ignoring stale submission outcome");
            return Vec::new();
        };

        match outcome {
            SubmitOutcome::Acknowledged => {
                self.finish();
                tracing::info!(attempt_id = %self.attempt_id, reason = reason.as_str(), "Submission acknowledged");
                vec![
                    Effect::StopTimers,
                    Effect::ClearLocal,
                    Effect::Notify(Notice::Submitted),
                    Effect::Redirect(Redirect::Results(self.attempt_id.clone())),
                ]
            }
            SubmitOutcome::Dispatched => {
                self.finish();
                tracing::info!(attempt_id = %self.attempt_id, reason = reason.as_str(), "Submission dispatched without acknowledgement");
                vec![Effect::StopTimers]
            }
            SubmitOutcome::Failed(message) => {
                self.phase = SessionPhase::Active;
                if !self.test.questions.is_empty() {
                    self.tracker.resume(self.current, now);
                }
                let err = SessionError::SubmissionFailure(message.clone());
                if reason.is_auto() {
                    tracing::warn!(attempt_id = %self.attempt_id, reason = reason.as_str(), error = %err, "Auto-submit failed");
                    self.guard.release_latch();
                    // Expiry seen while this submission was in flight was swallowed.
                    if reason != SubmitReason::TimerExpired && self.countdown.is_expired(now) {
                        return self.begin_submission(SubmitReason::TimerExpired, now);
                    }
                    Vec::new()
                } else {
                    tracing::warn!(attempt_id = %self.attempt_id, error = %err, "Manual submit failed");
                    vec![Effect::Notify(Notice::SubmissionFailed(message))]
                }
            }
        }
    }

    fn finish(&mut self) {
        self.phase = SessionPhase::Submitted;
        self.countdown.stop();
        self.guard.disarm();
    }
}
