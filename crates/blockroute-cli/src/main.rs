//! CLI entry point for blockroute.
//!
//! The `blockroute` binary validates flow documents and replays event
//! streams through the trigger resolution engine:
//!
//! - `blockroute check <flow>` compiles a flow and prints an index summary.
//! - `blockroute run <flow>` reads JSON-lines events from stdin and prints
//!   one JSON outcome per event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blockroute_core::Event;
use blockroute_engine::{Coordinator, EngineConfig, ReindexReport, ResolvedOutcome, load_flow_file};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// blockroute: trigger resolution for chatbot flows.
#[derive(Parser)]
#[command(
    name = "blockroute",
    version,
    about = "blockroute: trigger resolution for chatbot flows",
    long_about = "Validates chatbot flow documents and resolves user events to the block \
                  that should run next."
)]
struct Cli {
    /// Engine configuration file (TOML or JSON). `BLOCKROUTE_*` variables
    /// override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a flow document and print its index summary.
    Check {
        /// Flow document (`.json` or `.toml`).
        flow: PathBuf,
    },

    /// Resolve JSON-lines events read from stdin against a flow.
    Run {
        /// Flow document (`.json` or `.toml`).
        flow: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Check { flow } => cmd_check(config, &flow).await,
        Commands::Run { flow } => cmd_run(config, &flow).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => EngineConfig::from_env().context("invalid BLOCKROUTE_* environment"),
    }
}

/// Compile the flow at `path` into a fresh coordinator.
async fn prepare(config: EngineConfig, path: &Path) -> Result<(Coordinator, ReindexReport)> {
    let def = load_flow_file(path)
        .await
        .with_context(|| format!("failed to read flow {}", path.display()))?;

    let coordinator = Coordinator::new(config);
    let report = coordinator
        .reindex(&def)
        .with_context(|| format!("flow {} is invalid", path.display()))?;
    info!(
        flow_id = %report.flow_id,
        blocks = report.indexed_blocks,
        "flow indexed"
    );
    Ok((coordinator, report))
}

// ---------------------------------------------------------------------------
// Subcommand: check
// ---------------------------------------------------------------------------

async fn cmd_check(config: EngineConfig, path: &Path) -> Result<()> {
    let (coordinator, report) = prepare(config, path).await?;
    let snapshot = coordinator.index().snapshot();
    let untriggered = &report.compile.untriggered_blocks;

    println!();
    println!("  Flow:             {}", report.flow_id);
    println!("  Blocks:           {}", report.indexed_blocks + untriggered.len());
    println!("  Indexed:          {}", report.indexed_blocks);
    println!("  Dropped triggers: {}", report.compile.dropped_triggers.len());
    for dropped in &report.compile.dropped_triggers {
        println!(
            "    - {}#{}: {}",
            dropped.block_id, dropped.trigger_index, dropped.reason
        );
    }
    if !untriggered.is_empty() {
        println!("  Never matched:    {}", untriggered.join(", "));
    }
    let states = snapshot.states();
    if states.is_empty() {
        println!("  States:           (all blocks are state-independent)");
    } else {
        println!("  States:           {}", states.join(", "));
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

/// One line of `run` input.
#[derive(Debug, Deserialize)]
struct InputLine {
    conversation: String,
    #[serde(flatten)]
    event: Event,
}

/// One line of `run` output.
#[derive(Debug, Serialize)]
struct OutputLine {
    line: usize,
    conversation: String,
    #[serde(flatten)]
    outcome: ResolvedOutcome,
}

fn parse_input_line(text: &str) -> Result<InputLine> {
    serde_json::from_str(text).context("malformed event")
}

fn forward_output(out_tx: &mpsc::UnboundedSender<OutputLine>, output: OutputLine) -> Result<()> {
    out_tx.send(output).context("output writer stopped")
}

async fn cmd_run(config: EngineConfig, path: &Path) -> Result<()> {
    let (coordinator, _) = prepare(config, path).await?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutputLine>();
    let printer = tokio::spawn(async move {
        while let Some(output) = out_rx.recv().await {
            match serde_json::to_string(&output) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(line = output.line, error = %e, "failed to encode outcome"),
            }
        }
    });

    // One worker per conversation keeps each conversation's events in input
    // order; conversations run concurrently.
    let mut workers: HashMap<String, mpsc::UnboundedSender<(usize, Event)>> = HashMap::new();
    let mut handles = Vec::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    while let Some(text) = lines.next_line().await.context("failed to read stdin")? {
        line_no += 1;
        if text.trim().is_empty() {
            continue;
        }
        let input = match parse_input_line(&text) {
            Ok(input) => input,
            Err(e) => {
                warn!(line = line_no, error = %format!("{e:#}"), "skipping input line");
                continue;
            }
        };

        let sender = workers.entry(input.conversation.clone()).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Event)>();
            let coordinator = coordinator.clone();
            let out_tx = out_tx.clone();
            let conversation = input.conversation.clone();
            handles.push(tokio::spawn(async move {
                while let Some((line, event)) = rx.recv().await {
                    let outcome = coordinator.handle(&conversation, event).await;
                    let output = OutputLine {
                        line,
                        conversation: conversation.clone(),
                        outcome,
                    };
                    if let Err(e) = forward_output(&out_tx, output) {
                        warn!(line, conversation = %conversation, error = %e, "dropping outcome");
                    }
                }
            }));
            tx
        });
        sender
            .send((line_no, input.event))
            .context("conversation worker stopped")?;
    }

    drop(workers);
    for handle in handles {
        handle.await.context("conversation worker panicked")?;
    }
    drop(out_tx);
    printer.await.context("output writer panicked")?;

    info!(
        conversations = coordinator.conversation_count(),
        "{}",
        coordinator.stats()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr; stdout carries command output.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
