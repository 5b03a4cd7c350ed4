//! OrbitGuard CLI
//!
//! The `orbitguard` command drives the decision loop offline.
//!
//! ## Commands
//!
//! - `replay`: Run recorded telemetry triggers through the loop on replayed time
//! - `check-config`: Load and validate a configuration file
//! - `default-config`: Print the default configuration as TOML

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use orbitguard_core::audit::{dispatch_outcomes, read_jsonl};
use orbitguard_core::telemetry::level_for_verbosity;
use orbitguard_core::{
    init_tracing, Clock, DecisionLoop, DecisionStatus, JsonlAuditSink, LatencySummary,
    ManualClock, MetricsSnapshot, OrbitGuardConfig, RuntimeContext, TelemetryTrigger,
};

#[derive(Parser)]
#[command(name = "orbitguard")]
#[command(author = "OrbitGuard Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Adaptive anomaly memory and corrective-action loop", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL file of telemetry triggers through the decision loop
    Replay {
        /// Trigger file, one JSON object per line
        triggers: PathBuf,

        /// Configuration file (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Append sealed decisions to this JSONL audit file
        #[arg(long)]
        audit: Option<PathBuf>,

        /// Rehydrate dispatch outcomes and cooldowns from an earlier audit file
        #[arg(long)]
        restore: Option<PathBuf>,

        /// Write latency measurements to this CSV file
        #[arg(long)]
        latency_csv: Option<PathBuf>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file (TOML)
        path: PathBuf,
    },

    /// Print the default configuration as TOML
    DefaultConfig,
}

/// Options for one replay run.
#[derive(Debug, Clone, Default)]
struct ReplayOptions {
    triggers: PathBuf,
    config: Option<PathBuf>,
    audit: Option<PathBuf>,
    restore: Option<PathBuf>,
    latency_csv: Option<PathBuf>,
}

/// What a replay did, printed as JSON on stdout.
#[derive(Debug, Serialize)]
struct ReplaySummary {
    triggers: usize,
    outcomes: BTreeMap<String, u64>,
    restored_outcomes: usize,
    store_len: usize,
    pinned: usize,
    reasoning_degraded: bool,
    metrics: MetricsSnapshot,
    latency: LatencySummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for_verbosity(cli.verbose));

    match cli.command {
        Commands::Replay {
            triggers,
            config,
            audit,
            restore,
            latency_csv,
        } => {
            let summary = cmd_replay(ReplayOptions {
                triggers,
                config,
                audit,
                restore,
                latency_csv,
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::CheckConfig { path } => cmd_check_config(&path),
        Commands::DefaultConfig => {
            print!("{}", OrbitGuardConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<OrbitGuardConfig> {
    match path {
        Some(p) => OrbitGuardConfig::from_path(p)
            .with_context(|| format!("Failed to load configuration from {:?}", p)),
        None => Ok(OrbitGuardConfig::default()),
    }
}

fn read_triggers(path: &Path) -> Result<Vec<TelemetryTrigger>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trigger file {:?}", path))?;
    let mut triggers = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let trigger: TelemetryTrigger = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid trigger", path.display(), idx + 1))?;
        triggers.push(trigger);
    }
    Ok(triggers)
}

/// Seed idempotency outcomes and cooldown windows from an audit trail.
fn restore_from_audit(ctx: &RuntimeContext, path: &Path) -> Result<usize> {
    let decisions =
        read_jsonl(path).with_context(|| format!("Failed to read audit trail {:?}", path))?;
    let restored = ctx
        .orchestrator()
        .restore_outcomes(dispatch_outcomes(&decisions));

    let mut last_dispatch: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
    for decision in &decisions {
        let (Some(action), Some(at)) = (
            decision.chosen_action.as_ref(),
            decision.entered_at(DecisionStatus::Dispatched),
        ) else {
            continue;
        };
        let slot = last_dispatch.entry(action.action_type.as_str()).or_insert(at);
        if at > *slot {
            *slot = at;
        }
    }
    for (action_type, at) in last_dispatch {
        if let Err(err) = ctx.orchestrator().restore_cooldown(action_type, at) {
            tracing::warn!(action_type = %action_type, error = %err, "cooldown not restored");
        }
    }
    info!(
        event = "replay.restored",
        decisions = decisions.len(),
        outcomes = restored
    );
    Ok(restored)
}

async fn cmd_replay(opts: ReplayOptions) -> Result<ReplaySummary> {
    let config = load_config(opts.config.as_deref())?;
    let triggers = read_triggers(&opts.triggers)?;

    // Replayed time: the clock follows trigger timestamps and never runs backwards.
    let start = triggers
        .first()
        .map(|t| t.timestamp)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let clock = ManualClock::new(start);

    let mut builder = RuntimeContext::builder(config).clock(Arc::new(clock.clone()));
    if let Some(path) = &opts.audit {
        let sink = JsonlAuditSink::open(path)
            .with_context(|| format!("Failed to open audit file {:?}", path))?;
        builder = builder.audit_sink(Arc::new(sink));
    }
    let ctx = builder.build().context("Failed to build runtime context")?;

    let restored_outcomes = match &opts.restore {
        Some(path) => restore_from_audit(&ctx, path)?,
        None => 0,
    };

    ctx.init()?;
    let mut looper = DecisionLoop::new(ctx.clone());
    let mut outcomes: BTreeMap<String, u64> = BTreeMap::new();
    for trigger in &triggers {
        if trigger.timestamp > clock.now() {
            clock.set(trigger.timestamp);
        }
        let outcome = looper.tick(trigger.clone()).await;
        *outcomes.entry(outcome.label().to_string()).or_insert(0) += 1;
    }
    ctx.shutdown();

    let latency = ctx.latency().lock();
    if let Some(path) = &opts.latency_csv {
        let rows = latency
            .export_csv(path)
            .with_context(|| format!("Failed to write latency CSV {:?}", path))?;
        info!(event = "replay.latency_exported", rows = rows);
    }

    let store = ctx.store().read();
    let summary = ReplaySummary {
        triggers: triggers.len(),
        outcomes,
        restored_outcomes,
        store_len: store.len(),
        pinned: store.pinned_count(),
        reasoning_degraded: looper.is_reasoning_degraded(),
        metrics: ctx.metrics().snapshot(),
        latency: latency.summary(),
    };
    Ok(summary)
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", path))?;
    println!(
        "Configuration OK: {} workflows, phase {}, capacity {}",
        config.orchestrator.workflows.len(),
        config.mission.phase,
        config.store.max_capacity
    );
    Ok(())
}
