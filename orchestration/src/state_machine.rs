//! Run and attempt state machines with legal transition guards.
//!
//! Two levels:
//! 1. [`AttemptPhase`]: one generate/execute cycle, monotonic, never regresses.
//! 2. [`RunState`]: the whole self-correcting session, driven by
//!    [`RunStateMachine::advance`], which validates every edge and keeps an
//!    auditable transition log.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Phase of a single attempt.
///
/// ```text
/// Pending → Generating → Generated → Executing → Success
///                                              ↘ Failure
/// ```
///
/// Any non-terminal phase may jump forward (an `error` can arrive while still
/// generating); no phase may move backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    Pending,
    Generating,
    Generated,
    Executing,
    Success,
    Failure,
}

impl AttemptPhase {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Generating => 1,
            Self::Generated => 2,
            Self::Executing => 3,
            Self::Success | Self::Failure => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Whether moving to `next` is forward progress.
    pub fn can_advance_to(self, next: AttemptPhase) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Generating => write!(f, "generating"),
            Self::Generated => write!(f, "generated"),
            Self::Executing => write!(f, "executing"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Run-level state.
///
/// Every run starts at `Idle` and ends at `Succeeded`, `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, request not yet answered.
    Idle,
    /// Consuming the event stream.
    Running,
    /// An attempt succeeded. Terminal.
    Succeeded,
    /// Fatal signal, transport failure, or stream ended without success. Terminal.
    Failed,
    /// Cancelled by the caller. Terminal.
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Legal run transitions:
/// ```text
/// Idle    → Running | Failed | Cancelled
/// Running → Succeeded | Failed | Cancelled
/// ```
fn is_legal_transition(from: RunState, to: RunState) -> bool {
    use RunState::*;

    if from.is_terminal() {
        return false;
    }
    if matches!(to, Failed | Cancelled) {
        return true;
    }

    matches!((from, to), (Idle, Running) | (Running, Succeeded))
}

/// A single recorded run transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RunState,
    pub to: RunState,
    /// Events applied to the run before this transition.
    pub events_applied: usize,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal run transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Run-level state machine.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    current: RunState,
    events_applied: usize,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            current: RunState::Idle,
            events_applied: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RunState {
        self.current
    }

    pub fn events_applied(&self) -> usize {
        self.events_applied
    }

    /// Count one event that changed the run.
    pub fn record_event(&mut self) {
        self.events_applied += 1;
    }

    /// Advance to `to`, or `Err(IllegalTransition)` if the edge does not exist.
    pub fn advance(&mut self, to: RunState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            events_applied: self.events_applied,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            events = self.events_applied,
            "Run transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(RunState::Failed, Some(reason))
    }

    pub fn cancel(&mut self) -> Result<(), IllegalTransition> {
        self.advance(RunState::Cancelled, Some("cancelled by caller"))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line history, e.g. `idle → failed (12ms, 2 transitions) [running → failed]`.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            RunState::Idle,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !states.is_empty() {
            out.push_str(&format!(" [{}]", states.join(" → ")));
        }
        out
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
