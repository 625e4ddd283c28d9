//! The run aggregate.
//!
//! A [`Run`] owns everything a self-correcting session mutates: the run
//! state machine, the attempt ledger and the notification log. The only way
//! to change it from the stream is [`Run::apply`], one event at a time.
//!
//! ## Transition table
//!
//! | Event        | Attempt effect                          | Run effect                                   |
//! |--------------|-----------------------------------------|----------------------------------------------|
//! | start        |                                         | info notification                            |
//! | generating   | upsert, phase → generating              |                                              |
//! | generated    | sql, raw sql, phase → generated         | becomes the displayed query                  |
//! | executing    | phase → executing                       |                                              |
//! | success      | outcome success, result attached        | → succeeded, success notification            |
//! | error        | outcome failure, error text, prompt     | error notification when `is_final`           |
//! | final_error  |                                         | error notification, stays running            |
//! | fatal_error  |                                         | → failed, critical notification              |
//! | stream_end   |                                         | → succeeded/failed unless already terminal   |
//!
//! Once the run is terminal every later event is discarded.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::event::StreamEvent;
use crate::ledger::AttemptLedger;
use crate::state_machine::{AttemptPhase, RunState, RunStateMachine, TransitionRecord};

/// Backend generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local HuggingFace model on the backend host.
    #[default]
    Local,
    /// AWS Bedrock (Claude).
    Bedrock,
    /// Google GenAI (Gemini).
    Genai,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Bedrock => write!(f, "bedrock"),
            Self::Genai => write!(f, "genai"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "bedrock" => Ok(Self::Bedrock),
            "genai" | "gemini" => Ok(Self::Genai),
            other => Err(format!(
                "unknown provider '{other}' (expected local, bedrock or genai)"
            )),
        }
    }
}

/// Parameters of one auto-execute run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Natural-language question.
    pub query: String,
    pub provider: Provider,
    /// Overrides the provider's default model.
    pub model_id: Option<String>,
    /// Retry budget, enforced by the backend.
    pub max_retries: u32,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            provider: Provider::default(),
            model_id: None,
            max_retries: 5,
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A user-facing message raised by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// What `apply` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The run changed.
    Applied,
    /// Stale or duplicate event; nothing changed.
    Ignored,
    /// The run is not accepting events (idle or terminal).
    Discarded,
}

/// One self-correcting generate+execute session.
#[derive(Debug, Clone)]
pub struct Run {
    request: RunRequest,
    machine: RunStateMachine,
    ledger: AttemptLedger,
    notifications: Vec<Notification>,
    /// Attempt whose `generated` event last updated the displayed query.
    last_generated: Option<u32>,
    /// Budget announced by the backend's `start` event.
    announced_budget: Option<u32>,
}

impl Run {
    /// A new run in `Idle`.
    pub fn new(request: RunRequest) -> Self {
        Self {
            request,
            machine: RunStateMachine::new(),
            ledger: AttemptLedger::new(),
            notifications: Vec::new(),
            last_generated: None,
            announced_budget: None,
        }
    }

    /// A new run already in `Running`.
    pub fn started(request: RunRequest) -> Self {
        let mut run = Self::new(request);
        run.begin();
        run
    }

    /// Apply `events` in order to a freshly started run.
    pub fn replay<'a, I>(request: RunRequest, events: I) -> Self
    where
        I: IntoIterator<Item = &'a StreamEvent>,
    {
        let mut run = Self::started(request);
        for event in events {
            run.apply(event);
        }
        run
    }

    /// `Idle → Running`. Returns `false` if the run was not idle.
    pub fn begin(&mut self) -> bool {
        self.machine.advance(RunState::Running, Some("stream opened")).is_ok()
    }

    /// Single mutation entry point for stream events.
    pub fn apply(&mut self, event: &StreamEvent) -> ApplyOutcome {
        if self.machine.current() != RunState::Running {
            debug!(event = %event, state = %self.machine.current(), "Discarding event");
            return ApplyOutcome::Discarded;
        }

        let changed = match event {
            StreamEvent::Start {
                message,
                max_retries,
            } => {
                let budget_changed = max_retries.is_some() && self.announced_budget != *max_retries;
                if budget_changed {
                    self.announced_budget = *max_retries;
                }
                let message = message.as_deref().unwrap_or("Auto-execution started");
                self.notify(Severity::Info, message) | budget_changed
            }

            StreamEvent::Generating { attempt, status } => self
                .ledger
                .upsert(*attempt, |a| a.merge_generating(status.as_deref())),

            StreamEvent::Generated {
                attempt,
                sql,
                raw_sql,
                status,
            } => {
                let mut advanced = false;
                let changed = self.ledger.upsert(*attempt, |a| {
                    let before = a.phase;
                    let changed = a.merge_generated(sql.as_deref(), raw_sql.as_deref(), status.as_deref());
                    advanced = before != a.phase && a.phase == AttemptPhase::Generated;
                    changed
                });
                if advanced {
                    self.last_generated = Some(*attempt);
                }
                changed
            }

            StreamEvent::Executing {
                attempt,
                sql,
                status,
            } => self
                .ledger
                .upsert(*attempt, |a| a.merge_executing(sql.as_deref(), status.as_deref())),

            StreamEvent::Success {
                attempt,
                sql,
                status,
                result,
            } => {
                let mut succeeded = false;
                let changed = self.ledger.upsert(*attempt, |a| {
                    let before = a.phase;
                    let changed = a.merge_success(sql.as_deref(), status.as_deref(), result);
                    succeeded = before != a.phase && a.phase == AttemptPhase::Success;
                    changed
                });
                if succeeded {
                    self.transition(
                        RunState::Succeeded,
                        &format!("attempt {attempt} succeeded"),
                    );
                    info!(attempt, rows = result.row_count, "Run succeeded");
                    self.notify(
                        Severity::Success,
                        &format!(
                            "Succeeded after {attempt} attempt(s), {} row(s) returned",
                            result.row_count
                        ),
                    );
                } else if !changed {
                    warn!(attempt, "Ignoring success for an attempt that already finished");
                }
                changed
            }

            StreamEvent::Error {
                attempt,
                sql,
                error,
                prompt,
                is_final,
            } => {
                let mut failed = false;
                let changed = self.ledger.upsert(*attempt, |a| {
                    let before = a.phase;
                    let changed = a.merge_error(sql.as_deref(), error, prompt.as_deref());
                    failed = before != a.phase;
                    changed
                });
                if failed {
                    debug!(attempt, is_final, error = %error, "Attempt failed");
                    if *is_final {
                        self.notify(Severity::Error, &format!("Execution failed: {error}"));
                    }
                }
                changed
            }

            // Informational only: the backend follows it with [DONE].
            StreamEvent::FinalError { message } => self.notify(Severity::Error, message),

            StreamEvent::FatalError { message } => {
                self.transition(RunState::Failed, message);
                self.notify(Severity::Critical, &format!("Fatal error: {message}"));
                true
            }

            StreamEvent::StreamEnd => {
                self.finalize();
                true
            }
        };

        if changed {
            self.machine.record_event();
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Ignored
        }
    }

    /// Cancel a non-terminal run. Returns `false` if it had already ended.
    pub fn cancel(&mut self) -> bool {
        if self.machine.cancel().is_err() {
            return false;
        }
        info!(attempts = self.ledger.len(), "Run cancelled");
        self.notify(Severity::Warning, "Auto-execution aborted");
        true
    }

    /// Mark the run failed because the connection broke. The ledger is kept.
    pub fn fail_transport(&mut self, reason: &str) -> bool {
        if self.machine.fail(reason).is_err() {
            return false;
        }
        warn!(reason, "Run failed on transport error");
        self.notify(Severity::Error, &format!("Auto-execution failed: {reason}"));
        true
    }

    fn finalize(&mut self) {
        if self.machine.is_terminal() {
            return;
        }
        if let Some(attempt) = self.ledger.successful().map(|a| a.number) {
            self.transition(RunState::Succeeded, &format!("attempt {attempt} succeeded"));
            return;
        }

        let reason = match self.ledger.latest() {
            Some(a) if a.is_finished() => format!("stream ended after {} failed attempt(s)", self.ledger.failures()),
            Some(a) => format!("stream ended during attempt {} ({})", a.number, a.phase),
            None => "stream ended before any attempt".to_string(),
        };
        self.transition(RunState::Failed, &reason);

        // A final_error / is_final notification already told the user.
        let already_reported = self
            .latest_notification()
            .is_some_and(|n| n.severity >= Severity::Error);
        if !already_reported {
            self.notify(Severity::Error, &format!("Auto-execution failed: {reason}"));
        }
    }

    fn transition(&mut self, to: RunState, reason: &str) {
        if let Err(e) = self.machine.advance(to, Some(reason)) {
            warn!(error = %e, "Rejected run transition");
        }
    }

    /// Push a notification unless it repeats the latest one.
    fn notify(&mut self, severity: Severity, message: &str) -> bool {
        let repeat = self
            .latest_notification()
            .is_some_and(|n| n.severity == severity && n.message == message);
        if repeat {
            return false;
        }
        self.notifications.push(Notification {
            severity,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        true
    }

    pub fn request(&self) -> &RunRequest {
        &self.request
    }

    pub fn status(&self) -> RunState {
        self.machine.current()
    }

    pub fn is_terminal(&self) -> bool {
        self.machine.is_terminal()
    }

    pub fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn latest_notification(&self) -> Option<&Notification> {
        self.notifications.last()
    }

    pub fn last_generated(&self) -> Option<u32> {
        self.last_generated
    }

    pub fn announced_budget(&self) -> Option<u32> {
        self.announced_budget
    }

    /// Events that changed the run.
    pub fn events_applied(&self) -> usize {
        self.machine.events_applied()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        self.machine.transitions()
    }

    pub fn summary(&self) -> String {
        self.machine.summary()
    }
}
