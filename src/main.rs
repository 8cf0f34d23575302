//! Lookout - orchestrator for local vision workers
//!
//! Drives the registration, single-subject authentication, multi-subject
//! authentication and crowd counting workers from the command line.
//!
//! ## Usage
//!
//! ```bash
//! # Register a face, watching progress until the capture finishes
//! lookout start registration --subject-id ada@example.com --display-name Ada
//!
//! # Start crowd counting and return immediately
//! lookout start crowd-count --no-watch
//!
//! # Inspect and stop workers
//! lookout status multi-auth
//! lookout stop multi-auth
//! lookout force-stop crowd-count
//!
//! # With verbose logging and a custom config
//! lookout -v --config ./lookout.yaml status
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lookout_core::config::OrchestratorConfig;
use lookout_core::{ActionPhase, LogGuard, WorkerKind, init_logging};
use lookout_orchestrator::{ActionSnapshot, FrameReport, Orchestrator};
use lookout_worker::SubjectIdentity;
use serde_json::json;
use tracing::{error, info};

/// Orchestrator for long-lived local vision worker services
#[derive(Parser, Debug)]
#[command(name = "lookout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.lookout/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Configuration file (defaults to ~/.lookout/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List worker kinds and their addresses
    Kinds,

    /// Start an action and watch it until it finishes
    Start {
        kind: WorkerKind,

        /// Subject to register or authenticate
        #[arg(long)]
        subject_id: Option<String>,

        /// Name shown for the subject
        #[arg(long)]
        display_name: Option<String>,

        /// Print the initial snapshot and exit without watching
        #[arg(long)]
        no_watch: bool,
    },

    /// Show normalised worker status as JSON (every worker when omitted)
    Status { kind: Option<WorkerKind> },

    /// Show metadata of the worker's current frame as JSON
    Frame { kind: WorkerKind },

    /// Ask a worker to stop its current run
    Stop { kind: WorkerKind },

    /// Stop a worker and terminate its process
    ForceStop { kind: WorkerKind },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("lookout error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> lookout_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config =
        OrchestratorConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Kinds => {
            for kind in WorkerKind::all() {
                let worker = config.worker(kind);
                println!("{:<14} {:<36} {}", kind.as_str(), kind.display_name(), worker.base_url());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Start {
            kind,
            subject_id,
            display_name,
            no_watch,
        } => {
            let orchestrator = Orchestrator::new(&config);
            start(&orchestrator, kind, subject_id, display_name, no_watch).await
        }
        Command::Status { kind } => {
            let orchestrator = Orchestrator::new(&config);
            let value = match kind {
                Some(kind) => serde_json::to_value(orchestrator.worker_status(kind).await?)?,
                None => serde_json::to_value(orchestrator.all_worker_status().await)?,
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Frame { kind } => {
            let orchestrator = Orchestrator::new(&config);
            let result = orchestrator.manager(kind)?.fetch_frame().await;
            if !result.ok {
                anyhow::bail!("{} is unreachable: {}", kind.display_name(), result.message());
            }
            let frame = FrameReport::parse(&result.payload);
            let summary = json!({
                "kind": kind,
                "active": frame.active,
                "frame_bytes": frame.frame.as_ref().map_or(0, String::len),
                "session_id": frame.session_id,
                "current_count": frame.current_count,
                "max_count": frame.max_count,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop { kind } => {
            let orchestrator = Orchestrator::new(&config);
            let report = orchestrator.manager(kind)?.stop().await;
            if report.acknowledged {
                println!("{}: {}", kind, report.message);
            } else {
                println!("{}: stop not acknowledged ({})", kind, report.message);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ForceStop { kind } => {
            let orchestrator = Orchestrator::new(&config);
            match orchestrator.force_stop(kind).await {
                Ok(outcome) => {
                    println!("{}: {}", kind, outcome);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!(worker = %kind, error = %e, "force stop failed");
                    eprintln!("{}: {}", kind, e.user_message());
                    Ok(ExitCode::from(1))
                }
            }
        }
    }
}

async fn start(
    orchestrator: &Orchestrator,
    kind: WorkerKind,
    subject_id: Option<String>,
    display_name: Option<String>,
    no_watch: bool,
) -> anyhow::Result<ExitCode> {
    let subject = subject_id.map(|id| {
        let name = display_name.unwrap_or_else(|| id.clone());
        SubjectIdentity::new(id, name)
    });

    let snapshot = match (kind, subject) {
        (WorkerKind::Registration, Some(subject)) => orchestrator.start_registration(subject).await?,
        (WorkerKind::SingleAuth, Some(subject)) => orchestrator.start_single_auth(subject).await?,
        (kind, subject) => {
            let payload = subject.map(serde_json::to_value).transpose()?;
            orchestrator.start(kind, payload).await?
        }
    };
    info!(worker = %kind, phase = %snapshot.phase, "action started");

    if no_watch || snapshot.is_terminal() {
        print_snapshot(&snapshot);
        return Ok(ExitCode::from(exit_status(&snapshot)));
    }

    let done = watch(orchestrator, kind, snapshot).await;
    print_snapshot(&done);
    Ok(ExitCode::from(exit_status(&done)))
}

/// Print phase changes and status lines until the action is terminal.
/// The first Ctrl-C requests a graceful stop.
async fn watch(orchestrator: &Orchestrator, kind: WorkerKind, initial: ActionSnapshot) -> ActionSnapshot {
    let Some(mut phases) = orchestrator.subscribe(kind) else {
        return initial;
    };
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_line = String::new();
    eprintln!("{}: {}", kind, initial.phase);

    loop {
        tokio::select! {
            changed = phases.changed() => {
                if changed.is_err() {
                    return orchestrator.snapshot(kind);
                }
                let phase = *phases.borrow_and_update();
                eprintln!("{}: {}", kind, phase);
                if phase.is_terminal() {
                    return orchestrator.snapshot(kind);
                }
            }
            _ = ticker.tick() => {
                let line = status_line(&orchestrator.snapshot(kind));
                if line != last_line {
                    eprintln!("  {}", line);
                    last_line = line;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{}: stopping...", kind);
                return match orchestrator.stop(kind).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        error!(worker = %kind, error = %e, "stop failed");
                        orchestrator.snapshot(kind)
                    }
                };
            }
        }
    }
}

fn status_line(snapshot: &ActionSnapshot) -> String {
    let mut line = format!("{} {:>3.0}%", snapshot.status, snapshot.progress * 100.0);
    if !snapshot.message.is_empty() {
        line.push_str(&format!(" {}", snapshot.message));
    }
    if !snapshot.recognized.is_empty() {
        line.push_str(&format!(" ({} recognised)", snapshot.recognized.len()));
    }
    if let Some(count) = snapshot.current_count {
        line.push_str(&format!(" count={count}"));
        if let Some(max) = snapshot.max_count {
            line.push_str(&format!(" max={max}"));
        }
    }
    line
}

fn print_snapshot(snapshot: &ActionSnapshot) {
    match serde_json::to_string_pretty(snapshot) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to encode snapshot: {}", e),
    }
}

/// 1 for a failed action, 0 for completed or stopped.
fn exit_status(snapshot: &ActionSnapshot) -> u8 {
    u8::from(snapshot.phase == ActionPhase::Failed)
}
