//! sqlpilot: command-line client for a self-correcting text-to-SQL backend.
//!
//! The backend generates SQL from a question, executes it, and on failure
//! feeds the error back into generation until it succeeds or the retry budget
//! runs out, streaming progress as `data:` frames. This crate opens that
//! stream, hands it to [`orchestration`] for decoding and state tracking, and
//! renders the result.

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod render;

pub use client::{BackendClient, Health, ProviderInfo};
pub use config::ClientConfig;
pub use controller::{RunController, RunHandle};
pub use error::ClientError;
