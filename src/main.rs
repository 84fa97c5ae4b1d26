//! Photo Relay - photo upload pipeline
//!
//! `serve` runs the relay in front of the media store; `upload` sends local
//! photos through a running relay.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use photo_relay::config::{Config, LoggingConfig};
use photo_relay::server::RelayServer;
use photo_relay::telemetry;
use photo_relay::upload::batch::{BatchOptions, TransferMode};
use photo_relay::upload::client::{TransferClient, TransferClientConfig};
use photo_relay::upload::normalize::NormalizeOptions;
use photo_relay::upload::session::{
    ContinueAfterFailureDecision, DecisionPolicy, Outcome, PartialValidationDecision, Rejection,
    SessionController, SessionOptions, Strategy,
};
use photo_relay::upload::{UploadCandidate, UploadResult};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Photo Relay - validate, downscale and relay photos to a media store
#[derive(Parser, Debug)]
#[command(name = "photo-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "relay.yaml")]
        config: PathBuf,
    },
    /// Upload photos through a relay
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Relay upload endpoint
    #[arg(long)]
    relay_url: String,

    /// Files per batch
    #[arg(long, default_value_t = 5)]
    batch_size: usize,

    /// Pause between batches, in milliseconds
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,

    /// One relay call per file, or one per batch
    #[arg(long, value_enum, default_value_t = ModeArg::PerFile)]
    mode: ModeArg,

    /// Send files strictly one at a time
    #[arg(long)]
    sequential: bool,

    /// Send original bytes without downscaling
    #[arg(long)]
    no_normalize: bool,

    /// Answer yes to every prompt
    #[arg(short, long)]
    yes: bool,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout_seconds: u64,

    /// Photos to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    PerFile,
    PerBatch,
}

impl From<ModeArg> for TransferMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::PerFile => TransferMode::PerFile,
            ModeArg::PerBatch => TransferMode::PerBatch,
        }
    }
}

/// Asks on the terminal, or proceeds silently with `--yes`
struct StdinPolicy {
    assume_yes: bool,
}

impl StdinPolicy {
    async fn confirm(&self, question: String) -> bool {
        if self.assume_yes {
            return true;
        }
        let answer = tokio::task::spawn_blocking(move || {
            eprint!("{} [y/N] ", question);
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl DecisionPolicy for StdinPolicy {
    async fn on_partial_validation(&self, rejected: &[Rejection], accepted: usize) -> PartialValidationDecision {
        for rejection in rejected {
            eprintln!("  {}: {}", rejection.name, rejection.reason);
        }
        let question = format!(
            "{} file(s) cannot be uploaded. Upload the other {}?",
            rejected.len(),
            accepted
        );
        if self.confirm(question).await {
            PartialValidationDecision::Proceed
        } else {
            PartialValidationDecision::Abort
        }
    }

    async fn on_transfer_failure(&self, failed: &UploadResult, remaining: usize) -> ContinueAfterFailureDecision {
        let reason = failed.error().map(ToString::to_string).unwrap_or_default();
        let question = format!(
            "Upload of {} failed ({}). Continue with the remaining {}?",
            failed.source_name, reason, remaining
        );
        if self.confirm(question).await {
            ContinueAfterFailureDecision::Continue
        } else {
            ContinueAfterFailureDecision::Abort
        }
    }
}

/// Command-line logging flags layered over a base config
struct LogFlags {
    level: Option<String>,
    json: bool,
}

impl LogFlags {
    fn apply(&self, base: LoggingConfig) -> LoggingConfig {
        LoggingConfig {
            level: self.level.clone().unwrap_or(base.level),
            json: self.json || base.json,
        }
    }
}

async fn serve(config_path: PathBuf, flags: LogFlags) -> anyhow::Result<()> {
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    config.logging = flags.apply(config.logging);
    telemetry::init_subscriber(&config.logging)?;

    info!("Starting Photo Relay v{}", photo_relay::VERSION);
    info!("Loaded configuration from {:?}", config_path);

    let server = RelayServer::new(config).await?;
    server.run().await?;
    Ok(())
}

async fn read_candidates(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadCandidate>> {
    let mut candidates = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_guess::from_path(path).first_or_octet_stream();
        candidates.push(UploadCandidate::new(name, mime_type.essence_str(), bytes));
    }
    Ok(candidates)
}

async fn upload(args: UploadArgs, flags: LogFlags) -> anyhow::Result<()> {
    telemetry::init_subscriber(&flags.apply(LoggingConfig::default()))?;

    let candidates = read_candidates(&args.files).await?;

    let client_config = TransferClientConfig {
        timeout: Duration::from_secs(args.timeout_seconds),
        ..TransferClientConfig::new(args.relay_url)
    };
    let transfer = Arc::new(TransferClient::new(client_config)?);

    let strategy = if args.sequential {
        Strategy::Sequential
    } else {
        Strategy::Batched(BatchOptions {
            batch_size: args.batch_size,
            inter_batch_delay: Duration::from_millis(args.delay_ms),
            mode: args.mode.into(),
        })
    };
    let options = SessionOptions {
        strategy,
        normalize: (!args.no_normalize).then(NormalizeOptions::default),
        ..SessionOptions::default()
    };

    let mut controller = SessionController::new(transfer, StdinPolicy { assume_yes: args.yes }, options);

    let mut progress = controller.subscribe();
    let progress_task = tokio::spawn(async move {
        let mut last = None;
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            if snapshot.total_files > 0 && last != Some(snapshot.completed) {
                last = Some(snapshot.completed);
                info!(
                    completed = snapshot.completed,
                    total = snapshot.total_files,
                    percentage = snapshot.percentage(),
                    "Upload progress"
                );
            }
        }
    });

    let cancel = controller.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight uploads");
            cancel.cancel();
        }
    });

    let report = controller.run_session(candidates).await;
    drop(controller);
    let _ = progress_task.await;

    for result in &report.results {
        match (&result.outcome, result.is_skipped()) {
            (Ok(url), _) => println!("{}\t{}", result.source_name, url),
            (Err(_), true) => println!("{}\tnot sent", result.source_name),
            (Err(e), false) => println!("{}\tfailed: {}", result.source_name, e),
        }
    }
    for rejection in &report.rejected {
        println!("{}\trejected: {}", rejection.name, rejection.reason);
    }
    println!("{}", report.summary());

    match report.outcome {
        Outcome::FullSuccess { .. } | Outcome::PartialSuccess { .. } => Ok(()),
        _ => anyhow::bail!(report.summary()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let flags = LogFlags {
        level: cli.log_level,
        json: cli.json_logs,
    };

    match cli.command {
        Command::Serve { config } => serve(config, flags).await,
        Command::Upload(args) => upload(args, flags).await,
    }
}
