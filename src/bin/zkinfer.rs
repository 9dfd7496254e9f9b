use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use zkinfer::hash::Blake2sXof;
use zkinfer::ledger::{LedgerError, OutcomeLedger, UserId};
use zkinfer::model::{Image, BUILTIN_INPUT_SHAPE};
use zkinfer::pipeline::{Orchestrator, ProofHandle};
use zkinfer::PipelineConfig;

#[derive(Parser)]
#[command(author, version, about = "Verifiable image classification with sampled proofs")]
struct Cli {
    /// Pipeline configuration; built-in defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify synthetic images for one user and print the resulting statistics
    Run {
        #[arg(short, long, default_value_t = 1)]
        user: u64,
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: usize,
        /// Proof threshold applied to the user before the run
        #[arg(short, long)]
        threshold: Option<i64>,
        #[arg(short, long, default_value = "resnet18")]
        model: String,
        /// Wait per request in blocking mode, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Submit every request first and poll the proofs afterwards
        #[arg(long, default_value_t = false)]
        poll: bool,
    },
    /// Print the statistics of a user
    Stats {
        #[arg(short, long)]
        user: u64,
    },
    /// Set the proof threshold of a user, creating the account if needed
    SetThreshold {
        #[arg(short, long)]
        user: u64,
        #[arg(short, long)]
        threshold: i64,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Run {
            user,
            requests,
            threshold,
            model,
            timeout_ms,
            poll,
        } => run(config, UserId(user), requests, threshold, &model, timeout_ms, poll)?,
        Commands::Stats { user } => {
            let ledger = OutcomeLedger::from_config(&config)?;
            print_json(&ledger.read_stats(UserId(user))?)?;
        }
        Commands::SetThreshold { user, threshold } => {
            let ledger = OutcomeLedger::from_config(&config)?;
            ensure_account(&ledger, UserId(user))?;
            let applied = ledger.set_threshold(UserId(user), threshold)?;
            info!(user, threshold = applied.get(), "threshold updated");
        }
        Commands::DefaultConfig => {
            print!("{}", toml::to_string_pretty(&PipelineConfig::default())?);
        }
    }

    Ok(())
}

fn run(
    config: PipelineConfig,
    user: UserId,
    requests: usize,
    threshold: Option<i64>,
    model: &str,
    timeout_ms: Option<u64>,
    poll: bool,
) -> Result<()> {
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.workers.proof_timeout());
    let orchestrator = Orchestrator::new(config)?;
    let ledger = orchestrator.ledger();
    ensure_account(ledger, user)?;
    if let Some(threshold) = threshold {
        ledger.set_threshold(user, threshold)?;
    }

    let mut pending: Vec<ProofHandle> = Vec::new();
    for index in 0..requests {
        let image = synthetic_image(user, index)?;
        if poll {
            let submission = orchestrator.submit(user, model, &image)?;
            info!(
                request = %submission.request_id(),
                class = submission.inference.classification.class_id,
                "classified"
            );
            pending.push(submission.proof);
        } else {
            let response = orchestrator.classify(user, model, &image, timeout)?;
            info!(
                request = %response.request_id,
                class = response.classification.class_id,
                probability = response.classification.probability,
                proof = %response.proof,
                "classified"
            );
        }
    }
    for handle in pending {
        let status = handle.wait_timeout(timeout);
        info!(request = %handle.request_id(), proof = %status, "proof settled");
    }

    if !orchestrator.shutdown() {
        return Err(anyhow!("proving pool did not drain within {timeout:?}"));
    }
    print_json(&orchestrator.stats(user)?)?;
    print_json(&ledger.verification_stats(user))
}

fn ensure_account(ledger: &OutcomeLedger, user: UserId) -> Result<()> {
    match ledger.create_account(user) {
        Ok(_) | Err(LedgerError::DuplicateUser { .. }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Deterministic pseudo-random image for `(user, index)`.
fn synthetic_image(user: UserId, index: usize) -> Result<Image> {
    let seed = format!("zkinfer/cli/image/{user}/{index}");
    let mut xof = Blake2sXof::new(seed.as_bytes());
    let mut pixels = vec![0u8; BUILTIN_INPUT_SHAPE.len()];
    xof.squeeze(&mut pixels);
    Ok(Image::from_rgb8(
        BUILTIN_INPUT_SHAPE.width,
        BUILTIN_INPUT_SHAPE.height,
        pixels,
    )?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
