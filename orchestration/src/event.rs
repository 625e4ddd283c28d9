//! Event types carried by the auto-execute stream.
//!
//! Each `data:` frame holds one JSON object tagged by `type`. The set is
//! closed: anything that does not deserialize into [`StreamEvent`] is a
//! malformed frame and is dropped by the decoder.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One result row, keyed by column name. Values are nullable JSON scalars.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Tabular output of a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ResultSetWire")]
pub struct ResultSet {
    /// Column names in select-list order.
    pub columns: Vec<String>,
    /// Rows in the order the database returned them.
    pub rows: Vec<Row>,
    /// Row count as reported by the backend.
    pub row_count: usize,
}

#[derive(Deserialize)]
struct ResultSetWire {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    row_count: Option<usize>,
}

impl From<ResultSetWire> for ResultSet {
    fn from(wire: ResultSetWire) -> Self {
        let row_count = wire.row_count.unwrap_or(wire.rows.len());
        Self {
            columns: wire.columns,
            rows: wire.rows,
            row_count,
        }
    }
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

/// All events a run can observe.
///
/// `StreamEnd` never appears on the wire; the decode loop synthesizes it when
/// the `[DONE]` sentinel arrives or the body closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The backend accepted the request and is about to begin.
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Retry budget the backend will enforce.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_retries: Option<u32>,
    },

    /// Generation for an attempt started, or reported token progress.
    Generating {
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    /// Generation finished; `sql` is the cleaned query, `raw_sql` the model output.
    Generated {
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_sql: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    /// The cleaned query was sent to the database.
    Executing {
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    /// The attempt executed successfully.
    Success {
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        result: ResultSet,
    },

    /// Generation or execution failed for an attempt.
    Error {
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
        #[serde(default)]
        error: String,
        /// Prompt that was sent to the model, for debugging.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        /// Set when the backend has no budget left after this attempt.
        #[serde(default)]
        is_final: bool,
    },

    /// The retry budget is exhausted.
    FinalError {
        #[serde(default)]
        message: String,
    },

    /// The backend hit an unrecoverable error outside any attempt.
    FatalError {
        #[serde(default)]
        message: String,
    },

    /// End of stream.
    #[serde(skip)]
    StreamEnd,
}

impl StreamEvent {
    /// Wire name of the event (`"generating"`, `"final_error"`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Generating { .. } => "generating",
            Self::Generated { .. } => "generated",
            Self::Executing { .. } => "executing",
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
            Self::FinalError { .. } => "final_error",
            Self::FatalError { .. } => "fatal_error",
            Self::StreamEnd => "stream_end",
        }
    }

    /// Attempt number for attempt-scoped events.
    pub fn attempt(&self) -> Option<u32> {
        match self {
            Self::Generating { attempt, .. }
            | Self::Generated { attempt, .. }
            | Self::Executing { attempt, .. }
            | Self::Success { attempt, .. }
            | Self::Error { attempt, .. } => Some(*attempt),
            Self::Start { .. } | Self::FinalError { .. } | Self::FatalError { .. } | Self::StreamEnd => {
                None
            }
        }
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.attempt() {
            Some(n) => write!(f, "{}#{}", self.kind(), n),
            None => write!(f, "{}", self.kind()),
        }
    }
}
