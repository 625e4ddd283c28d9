//! Streaming retry orchestration for a self-correcting text-to-SQL backend.
//!
//! The backend generates SQL from natural language, executes it, and on
//! failure retries with the error fed back into the prompt. Progress arrives
//! as a `data: <json>` event stream. This crate turns that stream into an
//! ordered, auditable history of attempts.
//!
//! # Components
//!
//! - [`decoder`]: byte chunks → [`Frame`]s (`data:` lines, `[DONE]` sentinel)
//! - [`ledger`]: ordered attempt records with merge/upsert semantics
//! - [`state_machine`]: attempt phases and run states with legal-transition guards
//! - [`run`]: the [`Run`] aggregate, single mutation entry point [`Run::apply`]
//! - [`presentation`]: pure projection of a run into a [`RunView`]
//! - [`session`]: the cancellable decode loop that feeds a shared run
//!
//! # Flow
//!
//! ```text
//! bytes ──▶ FrameDecoder ──▶ StreamEvent ──▶ Run::apply ──▶ AttemptLedger
//!                                               │
//!                                               ▼
//!                                     presentation::project ──▶ RunView
//! ```
//!
//! Nothing here performs I/O; the HTTP side lives in the `sqlpilot` crate.

pub mod decoder;
pub mod event;
pub mod ledger;
pub mod presentation;
pub mod run;
pub mod session;
pub mod state_machine;

pub use decoder::{Frame, FrameDecoder, FrameError, FrameReader};
pub use event::{ResultSet, Row, StreamEvent};
pub use ledger::{Attempt, AttemptLedger, AttemptOutcome};
pub use presentation::{project, AttemptView, RunView};
pub use run::{ApplyOutcome, Notification, Provider, Run, RunRequest, Severity};
pub use session::{consume, ConsumeReport, SessionEnd, TransportError};
pub use state_machine::{AttemptPhase, IllegalTransition, RunState, RunStateMachine, TransitionRecord};
