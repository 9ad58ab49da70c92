use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use vitals_risk_agent::assembler::BatchOutcome;
use vitals_risk_agent::config::Config;
use vitals_risk_agent::engine::{self, Command, Engine};
use vitals_risk_agent::source;
use vitals_risk_agent::types::Strategy;

#[derive(Parser, Debug)]
#[command(name = "vitals-risk-agent", about = "Real-time physiological risk scoring agent")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/vitals-risk-agent/config.toml")]
    config: String,

    /// Validate config and exit
    #[arg(long)]
    check: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,

    /// Override the initial scoring strategy
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Cluster model file, watched for changes
    #[arg(long)]
    model: Option<String>,

    /// JSON-lines batch file to tail
    #[arg(long)]
    input: Option<String>,
}

#[tokio::main(worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("vitals-risk-agent {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = Config::load(&cli.config)?;
    if let Some(strategy) = cli.strategy {
        config.strategy.initial = strategy;
    }

    if cli.check {
        println!("Configuration is valid.");
        return Ok(());
    }

    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %config.agent.hostname,
        subject = %config.agent.subject_id,
        strategy = %config.strategy.initial,
        "Starting vitals risk agent"
    );

    if let Err(e) = run(config, cli.input.as_deref(), cli.model.as_deref()).await {
        error!(error = %e, "Agent terminated with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.agent.log_level));

    // stdout carries the score feed
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn run(config: Config, input: Option<&str>, model: Option<&str>) -> Result<()> {
    let sources = source::create_sources(&config, input, model)?;
    if sources.is_empty() {
        tracing::warn!("No batch source configured, nothing will be scored");
    }

    let capacity = config.source.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::channel::<Command>(capacity);
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<BatchOutcome>(capacity);

    let handles: Vec<_> = sources
        .into_iter()
        .map(|s| source::spawn_source(s, cmd_tx.clone()))
        .collect();
    drop(cmd_tx);

    let engine = Engine::new(&config);
    let worker = tokio::spawn(engine::run_worker(engine, cmd_rx, out_tx));

    // Display feed: one ScoreRecord per line
    let printer = tokio::spawn(async move {
        let stdout = std::io::stdout();
        while let Some(outcome) = out_rx.recv().await {
            let mut out = stdout.lock();
            for record in &outcome.records {
                match serde_json::to_string(record) {
                    Ok(line) => {
                        if writeln!(out, "{line}").is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to serialize score record"),
                }
            }
            let _ = out.flush();
        }
    });

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, exiting");

    // stop future polls; queued commands still drain through the worker
    for handle in handles {
        handle.abort();
    }
    let engine = worker.await.context("Worker task panicked")?;
    let _ = printer.await;
    info!(
        subject = %engine.subject_id(),
        history = engine.history().len(),
        "Worker stopped"
    );

    Ok(())
}
