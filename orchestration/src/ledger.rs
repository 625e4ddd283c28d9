//! Attempt ledger: ordered attempt records keyed by attempt number.
//!
//! Order is the order of first appearance and is never renumbered. A repeated
//! attempt number merges into the existing record.
//!
//! Each `merge_*` method reports whether it changed the record. A merge that
//! would move the phase backward leaves the phase alone and only fills fields
//! that are still unset, which makes replaying a stale or duplicate event
//! harmless.

use serde::{Deserialize, Serialize};

use crate::event::ResultSet;
use crate::state_machine::AttemptPhase;

/// Outcome of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Success,
    Failure,
}

/// One generate+execute cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub number: u32,
    pub phase: AttemptPhase,
    pub outcome: AttemptOutcome,
    /// Cleaned query text, as last reported by any phase.
    pub sql: Option<String>,
    /// Query text from the `generated` event. Later phases never change it.
    #[serde(default)]
    pub generated_sql: Option<String>,
    /// Model output before cleanup. Set once.
    pub raw_sql: Option<String>,
    pub error: Option<String>,
    /// Prompt the backend sent to the model for this attempt.
    pub prompt: Option<String>,
    /// Last human-readable status label from the backend.
    pub status: Option<String>,
    /// Present only when `outcome == Success`.
    pub result: Option<ResultSet>,
}

impl Attempt {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            phase: AttemptPhase::Pending,
            outcome: AttemptOutcome::Pending,
            sql: None,
            generated_sql: None,
            raw_sql: None,
            error: None,
            prompt: None,
            status: None,
            result: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    fn advance(&mut self, to: AttemptPhase) -> bool {
        if self.phase.can_advance_to(to) {
            self.phase = to;
            true
        } else {
            false
        }
    }

    pub fn merge_generating(&mut self, status: Option<&str>) -> bool {
        let advanced = self.advance(AttemptPhase::Generating);
        // Progress labels (token counts) keep arriving while generating.
        if self.phase == AttemptPhase::Generating {
            return replace(&mut self.status, status) || advanced;
        }
        advanced
    }

    pub fn merge_generated(
        &mut self,
        sql: Option<&str>,
        raw_sql: Option<&str>,
        status: Option<&str>,
    ) -> bool {
        let mut changed = fill(&mut self.raw_sql, raw_sql);
        if self.advance(AttemptPhase::Generated) {
            replace(&mut self.sql, sql);
            replace(&mut self.generated_sql, sql);
            replace(&mut self.status, status);
            return true;
        }
        changed |= fill(&mut self.sql, sql);
        changed |= fill(&mut self.generated_sql, sql);
        changed
    }

    pub fn merge_executing(&mut self, sql: Option<&str>, status: Option<&str>) -> bool {
        if self.advance(AttemptPhase::Executing) {
            replace(&mut self.sql, sql);
            replace(&mut self.status, status);
            return true;
        }
        fill(&mut self.sql, sql)
    }

    pub fn merge_success(
        &mut self,
        sql: Option<&str>,
        status: Option<&str>,
        result: &ResultSet,
    ) -> bool {
        if self.advance(AttemptPhase::Success) {
            self.outcome = AttemptOutcome::Success;
            self.error = None;
            self.result = Some(result.clone());
            replace(&mut self.sql, sql);
            replace(&mut self.status, status);
            return true;
        }
        fill(&mut self.sql, sql)
    }

    pub fn merge_error(&mut self, sql: Option<&str>, error: &str, prompt: Option<&str>) -> bool {
        if self.advance(AttemptPhase::Failure) {
            self.outcome = AttemptOutcome::Failure;
            self.error = Some(error.to_string());
            replace(&mut self.sql, sql);
            replace(&mut self.prompt, prompt);
            return true;
        }
        let mut changed = fill(&mut self.sql, sql);
        changed |= fill(&mut self.prompt, prompt);
        if self.outcome == AttemptOutcome::Failure {
            changed |= fill(&mut self.error, Some(error));
        }
        changed
    }
}

/// Overwrite `slot` when the event carries a value.
fn replace(slot: &mut Option<String>, value: Option<&str>) -> bool {
    match value {
        Some(v) if slot.as_deref() != Some(v) => {
            *slot = Some(v.to_string());
            true
        }
        _ => false,
    }
}

/// Set `slot` only if it is still unset.
fn fill(slot: &mut Option<String>, value: Option<&str>) -> bool {
    match (slot.as_ref(), value) {
        (None, Some(v)) => {
            *slot = Some(v.to_string());
            true
        }
        _ => false,
    }
}

/// Ordered collection of attempts for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptLedger {
    entries: Vec<Attempt>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate `number`, inserting a fresh record if absent, then apply `merge`.
    ///
    /// Returns `true` if the ledger changed.
    pub fn upsert<F>(&mut self, number: u32, merge: F) -> bool
    where
        F: FnOnce(&mut Attempt) -> bool,
    {
        match self.entries.iter().position(|a| a.number == number) {
            Some(idx) => merge(&mut self.entries[idx]),
            None => {
                let mut attempt = Attempt::new(number);
                merge(&mut attempt);
                self.entries.push(attempt);
                true
            }
        }
    }

    pub fn get(&self, number: u32) -> Option<&Attempt> {
        self.entries.iter().find(|a| a.number == number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attempt> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recently inserted attempt.
    pub fn latest(&self) -> Option<&Attempt> {
        self.entries.last()
    }

    /// The successful attempt, if any.
    pub fn successful(&self) -> Option<&Attempt> {
        self.entries
            .iter()
            .find(|a| a.outcome == AttemptOutcome::Success)
    }

    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Failure)
            .count()
    }
}
