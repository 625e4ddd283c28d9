//! sqlpilot command-line entry point.
//!
//! # Usage
//!
//! ```bash
//! # Generate, execute and self-correct in one streaming run
//! sqlpilot run "total unpaid bills per vendor" --provider bedrock
//!
//! # One-shot calls
//! sqlpilot generate "vendors added this month"
//! sqlpilot execute "SELECT COUNT(*) FROM bills"
//! sqlpilot providers
//!
//! # Point at another backend
//! SQLPILOT_API_BASE=http://10.0.0.5:8001 sqlpilot health
//! ```

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestration::{project, Provider, RunRequest, RunState};
use sqlpilot::render::{self, Progress};
use sqlpilot::{BackendClient, ClientConfig, RunController};
use tracing::{debug, warn};

/// Exit code for a run stopped with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;
/// How often the live progress lines are refreshed.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Backend base URL (overrides SQLPILOT_API_BASE)
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Print JSON instead of tables
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Debug-level logging on stderr (RUST_LOG still wins when set)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and execute with automatic retries, streaming progress
    Run {
        query: String,
        /// local, bedrock or genai (overrides SQLPILOT_PROVIDER)
        #[arg(long)]
        provider: Option<Provider>,
        /// Model id passed through to the provider
        #[arg(long)]
        model: Option<String>,
        /// Retry budget (overrides SQLPILOT_MAX_RETRIES)
        #[arg(long)]
        max_retries: Option<u32>,
        /// Rows shown before the table is truncated
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// Generate SQL without executing it
    Generate {
        query: String,
        #[arg(long)]
        provider: Option<Provider>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Execute SQL as-is
    Execute {
        sql: String,
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// List the backend's generation providers
    Providers,
    /// Check backend health
    Health,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ClientConfig::from_env().context("Invalid SQLPILOT_* environment")?;
    if let Some(base) = cli.api_base {
        config.api_base = base.trim_end_matches('/').to_string();
    }

    match cli.command {
        Command::Run {
            query,
            provider,
            model,
            max_retries,
            max_rows,
        } => {
            if let Some(p) = provider {
                config.provider = p;
            }
            if model.is_some() {
                config.model_id = model;
            }
            if let Some(n) = max_retries {
                config.max_retries = n;
            }
            if let Some(n) = max_rows {
                config.max_display_rows = n;
            }
            let request = config.run_request(query);
            let client = BackendClient::new(config).context("Failed to build backend client")?;
            run_query(client, request, cli.json).await
        }
        Command::Generate {
            query,
            provider,
            model,
        } => {
            let provider = provider.unwrap_or(config.provider);
            let model = model.or_else(|| config.model_id.clone());
            let client = BackendClient::new(config).context("Failed to build backend client")?;
            let sql = client
                .generate(&query, provider, model.as_deref())
                .await
                .context("SQL generation failed")?;
            if cli.json {
                println!("{}", serde_json::json!({ "sql": sql }));
            } else {
                println!("{sql}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Execute { sql, max_rows } => {
            let max_rows = max_rows.unwrap_or(config.max_display_rows);
            let client = BackendClient::new(config).context("Failed to build backend client")?;
            let result = client.execute(&sql).await.context("SQL execution failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", render::result_table(&result, max_rows));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Providers => {
            let client = BackendClient::new(config).context("Failed to build backend client")?;
            let providers = client.providers().await.context("Failed to list providers")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&providers)?);
            } else {
                for p in providers {
                    let availability = if p.available { "available" } else { "unavailable" };
                    println!(
                        "{:<8} {:<28} {:<12} default model: {}",
                        p.id, p.name, availability, p.default_model
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let client = BackendClient::new(config).context("Failed to build backend client")?;
            let health = client.health().await.context("Health check failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                match health.version {
                    Some(v) => println!("{} (version {v})", health.status),
                    None => println!("{}", health.status),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Stream one run to completion, printing attempt changes to stderr and the
/// final view to stdout. Ctrl-C cancels the run.
async fn run_query(client: BackendClient, request: RunRequest, json: bool) -> Result<ExitCode> {
    let max_rows = client.config().max_display_rows;
    let mut controller = RunController::new(client);
    let handle = controller.start(request).await;

    let mut progress = Progress::new();
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c, if !handle.is_cancelled() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                eprintln!("Cancelling...");
                handle.cancel();
            }
            _ = ticker.tick() => {}
        }

        let snapshot = handle.snapshot();
        if !json {
            let view = project(&snapshot);
            for line in progress.update_with_notifications(&view, snapshot.notifications().len()) {
                eprintln!("{line}");
            }
        }
        if snapshot.is_terminal() {
            break;
        }
    }

    let run = controller
        .wait()
        .await
        .context("Run ended without a final state")?;
    debug!(summary = %run.summary(), "Run complete");

    let view = project(&run);
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", render::render_view(&view, max_rows));
    }

    Ok(match run.status() {
        RunState::Succeeded => ExitCode::SUCCESS,
        RunState::Cancelled => ExitCode::from(EXIT_CANCELLED),
        _ => ExitCode::FAILURE,
    })
}
