//! Pure projection of a [`Run`] into what a UI shows.
//!
//! `project` holds no state of its own; calling it twice on the same run gives
//! the same view.

use serde::Serialize;

use crate::event::ResultSet;
use crate::ledger::{Attempt, AttemptOutcome};
use crate::run::{Notification, Run};
use crate::state_machine::{AttemptPhase, RunState};

/// One row of the attempt history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptView {
    pub number: u32,
    pub phase: AttemptPhase,
    pub outcome: AttemptOutcome,
    pub sql: Option<String>,
    pub raw_sql: Option<String>,
    pub error: Option<String>,
    pub prompt: Option<String>,
    pub status: Option<String>,
    pub row_count: Option<usize>,
}

impl From<&Attempt> for AttemptView {
    fn from(a: &Attempt) -> Self {
        Self {
            number: a.number,
            phase: a.phase,
            outcome: a.outcome,
            sql: a.sql.clone(),
            raw_sql: a.raw_sql.clone(),
            error: a.error.clone(),
            prompt: a.prompt.clone(),
            status: a.status.clone(),
            row_count: a.result.as_ref().map(|r| r.row_count),
        }
    }
}

/// Everything the UI renders for a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunView {
    pub status: RunState,
    pub attempts: Vec<AttemptView>,
    /// The successful attempt's SQL, else the SQL of the latest `generated`
    /// event as it was generated.
    pub current_query: Option<String>,
    pub current_result: Option<ResultSet>,
    pub notification: Option<Notification>,
}

pub fn project(run: &Run) -> RunView {
    let ledger = run.ledger();
    let success = ledger.successful();

    let current_query = match success {
        Some(a) => a.sql.clone(),
        None => run
            .last_generated()
            .and_then(|n| ledger.get(n))
            .and_then(|a| a.generated_sql.clone()),
    };

    RunView {
        status: run.status(),
        attempts: ledger.iter().map(AttemptView::from).collect(),
        current_query,
        current_result: success.and_then(|a| a.result.clone()),
        notification: run.latest_notification().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StreamEvent;
    use crate::run::RunRequest;

    #[test]
    fn test_empty_run_projection() {
        let view = project(&Run::started(RunRequest::new("q")));
        assert_eq!(view.status, RunState::Running);
        assert!(view.attempts.is_empty());
        assert!(view.current_query.is_none());
        assert!(view.current_result.is_none());
        assert!(view.notification.is_none());
    }

    #[test]
    fn test_generated_query_shown_before_success() {
        let run = Run::replay(
            RunRequest::new("q"),
            &[
                StreamEvent::Generating {
                    attempt: 1,
                    status: Some("generating".into()),
                },
                StreamEvent::Generated {
                    attempt: 1,
                    sql: Some("SELECT broken".into()),
                    raw_sql: None,
                    status: None,
                },
                StreamEvent::Error {
                    attempt: 1,
                    sql: Some("SELECT broken".into()),
                    error: "syntax error".into(),
                    prompt: None,
                    is_final: false,
                },
            ],
        );
        let view = project(&run);
        assert_eq!(view.current_query.as_deref(), Some("SELECT broken"));
        assert!(view.current_result.is_none());
        assert_eq!(view.attempts[0].error.as_deref(), Some("syntax error"));
    }

    #[test]
    fn test_later_phases_do_not_change_generated_query() {
        let run = Run::replay(
            RunRequest::new("q"),
            &[
                StreamEvent::Generating {
                    attempt: 1,
                    status: None,
                },
                StreamEvent::Generated {
                    attempt: 1,
                    sql: Some("SELECT a".into()),
                    raw_sql: None,
                    status: None,
                },
                StreamEvent::Executing {
                    attempt: 1,
                    sql: Some("SELECT a /* normalized */".into()),
                    status: None,
                },
                StreamEvent::Error {
                    attempt: 1,
                    sql: Some("SELECT b".into()),
                    error: "unknown column a".into(),
                    prompt: None,
                    is_final: false,
                },
            ],
        );
        let view = project(&run);
        assert_eq!(view.current_query.as_deref(), Some("SELECT a"));
        assert_eq!(view.attempts[0].sql.as_deref(), Some("SELECT b"));
    }

    #[test]
    fn test_projection_is_stable() {
        let run = Run::replay(
            RunRequest::new("q"),
            &[StreamEvent::Generating {
                attempt: 1,
                status: None,
            }],
        );
        assert_eq!(project(&run), project(&run));
    }
}
