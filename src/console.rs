use std::env;

use anyhow::{anyhow, Result};
use clap::Parser;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::time::format_clock;
use crate::schemas::test::Subject;
use crate::session::guard::{BrowserEvent, KeyCombo};
use crate::session::machine::{NavTarget, Notice, SessionController, SessionEvent, SessionPhase};
use crate::session::submission::SubmitReason;
use crate::tasks::runtime::SessionObserver;

const HELP: &str = "\
commands:
  n | next | save      next question
  p | prev             previous question
  g N                  go to question N
  a X                  choose option X (letter or number)
  v VALUE              enter a numerical answer (blank clears it)
  m | mark             toggle mark for review
  c | clear            clear the answer
  s SUBJECT            switch subject tab
  submit               submit the test
  hide | show | blur | focus | back | menu | select | key COMBO
                       simulate page events
  q | quit             close the session";

#[derive(Debug, Parser)]
#[command(name = "elevate-cbt", version, about = "JEE Elevate computer-based test session")]
struct Cli {
    #[arg(value_name = "TEST_ID", help = "Test to open (falls back to ELEVATE_TEST_ID)")]
    test: Option<String>,

    #[arg(long = "test", value_name = "TEST_ID", conflicts_with = "test", help = "Test to open")]
    test_flag: Option<String>,

    #[arg(long, help = "Start a fresh attempt instead of resuming the saved one")]
    new: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LaunchArgs {
    pub(crate) test_id: String,
    pub(crate) force_new: bool,
}

impl LaunchArgs {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_cli(Cli::parse(), env::var("ELEVATE_TEST_ID").ok())
    }

    fn from_cli(cli: Cli, fallback_test: Option<String>) -> Result<Self> {
        let test_id = cli
            .test_flag
            .or(cli.test)
            .or(fallback_test)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("missing test id (pass it as an argument or set ELEVATE_TEST_ID)"))?;
        Ok(Self { test_id, force_new: cli.new })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Event(SessionEvent),
    Help,
}

/// Parses one console line. `Ok(None)` for blank input.
pub(crate) fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let event = match head.to_ascii_lowercase().as_str() {
        "n" | "next" | "save" => SessionEvent::Navigate(NavTarget::Next),
        "p" | "prev" | "previous" => SessionEvent::Navigate(NavTarget::Previous),
        "g" | "goto" => match rest.parse::<usize>() {
            Ok(number) if number > 0 => SessionEvent::Navigate(NavTarget::Index(number - 1)),
            _ => return Err(format!("usage: g N (got '{rest}')")),
        },
        "a" | "answer" => SessionEvent::SelectOption(parse_option(rest)?),
        "v" | "value" => SessionEvent::EnterNumerical(rest.to_string()),
        "m" | "mark" => SessionEvent::ToggleReview,
        "c" | "clear" => SessionEvent::ClearAnswer,
        "s" | "subject" => match Subject::parse(rest) {
            Some(subject) => SessionEvent::SelectSubject(subject),
            None => return Err(format!("unknown subject '{rest}'")),
        },
        "submit" => SessionEvent::SubmitRequested,
        "hide" => SessionEvent::Browser(BrowserEvent::VisibilityHidden),
        "show" => SessionEvent::Browser(BrowserEvent::VisibilityVisible),
        "blur" => SessionEvent::Browser(BrowserEvent::WindowBlur),
        "focus" => SessionEvent::Browser(BrowserEvent::WindowFocus),
        "back" => SessionEvent::Browser(BrowserEvent::PopState),
        "menu" => SessionEvent::Browser(BrowserEvent::ContextMenu),
        "select" => SessionEvent::Browser(BrowserEvent::SelectStart { in_input: false }),
        "key" => match KeyCombo::parse(rest) {
            Some(combo) => SessionEvent::Browser(BrowserEvent::KeyDown(combo)),
            None => return Err("usage: key ctrl+r".to_string()),
        },
        "q" | "quit" | "exit" => SessionEvent::Browser(BrowserEvent::BeforeUnload),
        "h" | "help" | "?" => return Ok(Some(Command::Help)),
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(Some(Command::Event(event)))
}

fn parse_option(value: &str) -> Result<usize, String> {
    let value = value.trim();
    let mut chars = value.chars();
    if let (Some(letter), None) = (chars.next(), chars.next()) {
        if letter.is_ascii_alphabetic() {
            return Ok(usize::from(letter.to_ascii_lowercase() as u8 - b'a'));
        }
    }
    match value.parse::<usize>() {
        Ok(number) if number > 0 => Ok(number - 1),
        _ => Err(format!("usage: a X (got '{value}')")),
    }
}

/// Reads commands from stdin until EOF. Dropping the sender closes the session
/// input, which the runtime reads as the page unloading.
pub(crate) fn spawn_stdin_reader(events: mpsc::Sender<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(Command::Event(event))) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(Command::Help)) => println!("{HELP}"),
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                },
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to read console input");
                    break;
                }
            }
        }
    })
}

/// Prints the exam to stdout.
#[derive(Debug, Default)]
pub(crate) struct ConsoleObserver {
    warned_at: Option<u64>,
}

const TIME_WARNINGS: [u64; 2] = [300, 60];

impl ConsoleObserver {
    fn render(&self, controller: &SessionController, now: OffsetDateTime) {
        let view = controller.view(now);
        let sync = match (view.sync_queue, view.sync_failing) {
            (0, _) => String::from("saved"),
            (queued, true) => format!("{queued} unsaved, retrying"),
            (queued, false) => format!("{queued} unsaved"),
        };
        println!();
        println!(
            "[Q {}/{}] {} | {} left | {}s on question | {}",
            view.index + 1,
            view.total,
            view.subject,
            format_clock(view.remaining_seconds),
            view.seconds_on_question,
            sync
        );

        if let Some(question) = view.question {
            println!("{}", question.text);
            let answer = view.answer;
            if question.is_numerical() {
                let value = answer.and_then(|state| state.numerical_answer.as_deref()).unwrap_or("-");
                println!("  value: {value}");
            } else {
                let selected = answer.and_then(|state| state.selected_answer);
                for (index, option) in question.options.iter().enumerate() {
                    let marker = if selected == Some(index) { '>' } else { ' ' };
                    let letter = char::from(b'a' + (index % 26) as u8);
                    println!(" {marker}{letter}) {option}");
                }
            }
        }

        let palette = controller.palette();
        for (subject, indices) in &palette.by_subject {
            let cells: String = indices
                .iter()
                .map(|&index| {
                    let symbol = controller.status_of(index).symbol();
                    if index == view.index {
                        format!("<{symbol}>")
                    } else {
                        format!("[{symbol}]")
                    }
                })
                .collect();
            let progress = palette.progress.get(subject).copied().unwrap_or_default();
            println!("  {:<12} {cells} {}/{}", subject.as_str(), progress.answered, progress.total);
        }
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_started(&mut self, controller: &SessionController, now: OffsetDateTime) {
        let view = controller.view(now);
        println!("{} ({} questions)", view.title, view.total);
        println!("Type 'help' for commands.");
        self.render(controller, now);
    }

    fn on_input(&mut self, controller: &SessionController, now: OffsetDateTime) {
        if controller.phase() == SessionPhase::Submitted {
            return;
        }
        self.render(controller, now);
    }

    fn on_tick(&mut self, controller: &SessionController, now: OffsetDateTime) {
        let remaining = controller.remaining(now);
        if remaining == 0 {
            return;
        }
        let due = TIME_WARNINGS.into_iter().filter(|threshold| remaining <= *threshold).min();
        if let Some(threshold) = due {
            if self.warned_at.map_or(true, |last| threshold < last) {
                self.warned_at = Some(threshold);
                println!("!! {} remaining", format_clock(remaining));
            }
        }
    }

    fn on_notice(&mut self, notice: &Notice) {
        match notice {
            Notice::LoadFailed(message) => println!("Could not load the test: {message}"),
            Notice::AutoSubmitting(SubmitReason::TimerExpired) => {
                println!("Time is up. Submitting your answers.")
            }
            Notice::AutoSubmitting(reason) => println!("Submitting automatically ({}).", reason.as_str()),
            Notice::Submitted => println!("Test submitted."),
            Notice::SubmissionFailed(message) => {
                println!("Submission failed: {message}. Your answers are kept; type 'submit' to retry.")
            }
            Notice::Rejected(message) => println!("{message}"),
        }
    }

    fn on_redirect(&mut self, path: &str) {
        println!("-> {path}");
    }
}
