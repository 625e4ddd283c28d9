//! Terminal rendering of a [`RunView`].
//!
//! Everything here is a pure function of its input, except [`Progress`], which
//! remembers which attempt phases it has already reported.

use std::collections::HashMap;
use std::fmt::Write as _;

use orchestration::{AttemptPhase, AttemptView, ResultSet, RunView, Severity};
use serde_json::Value;

pub fn phase_glyph(phase: AttemptPhase) -> &'static str {
    match phase {
        AttemptPhase::Pending => "·",
        AttemptPhase::Generating => "…",
        AttemptPhase::Generated => "✎",
        AttemptPhase::Executing => "▶",
        AttemptPhase::Success => "✓",
        AttemptPhase::Failure => "✗",
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Success => "ok",
        Severity::Warning => "warning",
        Severity::Error => "error",
        Severity::Critical => "critical",
    }
}

/// One line per attempt: glyph, number, phase, then SQL or error.
pub fn attempt_line(attempt: &AttemptView) -> String {
    let mut line = format!(
        "[{}] attempt {} {:<10}",
        phase_glyph(attempt.phase),
        attempt.number,
        attempt.phase.to_string()
    );
    let detail = match attempt.phase {
        AttemptPhase::Failure => attempt.error.as_deref(),
        AttemptPhase::Generating | AttemptPhase::Pending => attempt.status.as_deref(),
        _ => attempt.sql.as_deref(),
    };
    if let Some(detail) = detail {
        line.push(' ');
        line.push_str(&single_line(detail));
    }
    if let Some(rows) = attempt.row_count {
        let _ = write!(line, " ({rows} row(s))");
    }
    line.trim_end().to_string()
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// JSON scalar as table text. Null prints as `NULL`, strings without quotes.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Aligned text table of at most `max_rows` rows.
pub fn result_table(result: &ResultSet, max_rows: usize) -> String {
    if result.columns.is_empty() {
        return format!("({} row(s))\n", result.row_count);
    }

    let shown = &result.rows[..result.rows.len().min(max_rows)];
    let cells: Vec<Vec<String>> = shown
        .iter()
        .map(|row| {
            result
                .columns
                .iter()
                .map(|c| row.get(c).map(format_value).unwrap_or_else(|| "NULL".into()))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &result.columns, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", rule.join("-+-"));
    for row in &cells {
        push_row(&mut out, row, &widths);
    }

    let hidden = result.row_count.saturating_sub(shown.len());
    if hidden > 0 {
        let _ = writeln!(out, "... {hidden} more row(s)");
    }
    let _ = writeln!(out, "({} row(s))", result.row_count);
    out
}

fn push_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, w)| {
            let pad = w.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(pad))
        })
        .collect();
    let _ = writeln!(out, "{}", padded.join(" | ").trim_end());
}

/// Full textual view: status, attempt history, SQL, result, notification.
pub fn render_view(view: &RunView, max_rows: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Status: {}", view.status);

    if !view.attempts.is_empty() {
        out.push('\n');
        for attempt in &view.attempts {
            let _ = writeln!(out, "{}", attempt_line(attempt));
        }
    }

    if let Some(sql) = &view.current_query {
        let _ = writeln!(out, "\nSQL:\n{}", sql.trim());
    }

    if let Some(result) = &view.current_result {
        out.push('\n');
        out.push_str(&result_table(result, max_rows));
    }

    if let Some(note) = &view.notification {
        let _ = writeln!(out, "\n[{}] {}", severity_label(note.severity), note.message);
    }
    out
}

/// Tracks reported attempt phases so live output prints each change once.
#[derive(Debug, Default)]
pub struct Progress {
    seen: HashMap<u32, AttemptPhase>,
    notifications: usize,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines for attempts whose phase changed since the last call.
    pub fn update(&mut self, view: &RunView) -> Vec<String> {
        let mut lines = Vec::new();
        for attempt in &view.attempts {
            if self.seen.get(&attempt.number) != Some(&attempt.phase) {
                self.seen.insert(attempt.number, attempt.phase);
                lines.push(attempt_line(attempt));
            }
        }
        lines
    }

    /// Like [`update`](Self::update), plus the latest notification when the
    /// run has produced a new one.
    pub fn update_with_notifications(&mut self, view: &RunView, total: usize) -> Vec<String> {
        let mut lines = self.update(view);
        if total > self.notifications {
            self.notifications = total;
            if let Some(note) = &view.notification {
                lines.push(format!("[{}] {}", severity_label(note.severity), note.message));
            }
        }
        lines
    }
}
