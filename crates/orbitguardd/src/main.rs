//! OrbitGuard daemon.
//!
//! Reads telemetry triggers as JSON lines on stdin and runs one decision
//! cycle per trigger on system time. Counters are flushed on a fixed
//! interval and at shutdown (EOF or Ctrl-C).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use orbitguard_core::telemetry::level_for_verbosity;
use orbitguard_core::{
    init_tracing, DecisionLoop, JsonlAuditSink, OrbitGuardConfig, RuntimeContext,
    TelemetryTrigger, TickOutcome,
};

#[derive(Parser)]
#[command(name = "orbitguardd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run the OrbitGuard decision loop over telemetry read from stdin")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "ORBITGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Append sealed decisions to this JSONL audit file
    #[arg(long, env = "ORBITGUARD_AUDIT")]
    audit: Option<PathBuf>,

    /// Seconds between metric flushes
    #[arg(long, default_value = "60")]
    flush_secs: u64,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // The daemon logs routine cycle events by default.
    init_tracing(args.json, level_for_verbosity(args.verbose.saturating_add(1)));

    let config = match &args.config {
        Some(path) => OrbitGuardConfig::from_path(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => OrbitGuardConfig::default(),
    };

    let mut builder = RuntimeContext::builder(config);
    if let Some(path) = &args.audit {
        let sink = JsonlAuditSink::open(path)
            .with_context(|| format!("Failed to open audit file {:?}", path))?;
        builder = builder.audit_sink(Arc::new(sink));
    }
    let ctx = builder.build().context("Failed to build runtime context")?;
    ctx.init()?;

    let mut looper = DecisionLoop::new(ctx.clone());
    let lines = BufReader::new(tokio::io::stdin()).lines();
    let result = run(&mut looper, lines, Duration::from_secs(args.flush_secs.max(1))).await;

    ctx.shutdown();
    tracing::info!(event = "daemon.stopped", ticks = looper.ticks());
    result
}

/// Tick on every trigger line until EOF or Ctrl-C.
async fn run<R>(
    looper: &mut DecisionLoop,
    mut lines: tokio::io::Lines<R>,
    flush_every: Duration,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut flush = tokio::time::interval(flush_every);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    flush.tick().await;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    tracing::info!(event = "daemon.eof");
                    return Ok(());
                };
                handle_line(looper, &line).await;
            }
            _ = flush.tick() => {
                looper.context().metrics().flush();
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(event = "daemon.interrupted");
                return Ok(());
            }
        }
    }
}

async fn handle_line(looper: &mut DecisionLoop, line: &str) -> Option<TickOutcome> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<TelemetryTrigger>(line) {
        Ok(trigger) => Some(looper.tick(trigger).await),
        Err(err) => {
            tracing::warn!(event = "daemon.bad_line", error = %err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbitguard_core::ManualClock;

    fn looper() -> DecisionLoop {
        let ctx = RuntimeContext::builder(OrbitGuardConfig::default())
            .clock(Arc::new(ManualClock::at_epoch()))
            .build()
            .unwrap();
        ctx.init().unwrap();
        DecisionLoop::new(ctx)
    }

    #[tokio::test]
    async fn test_bad_lines_are_skipped() {
        let mut l = looper();
        assert!(handle_line(&mut l, "   ").await.is_none());
        assert!(handle_line(&mut l, "{not json").await.is_none());
        assert_eq!(l.ticks(), 0);
    }

    #[tokio::test]
    async fn test_run_until_eof() {
        let mut l = looper();
        let input = format!(
            "{}\n\n{}\n",
            serde_json::json!({
                "timestamp": "1970-01-01T00:00:00Z",
                "anomaly_score": 0.9,
                "anomaly_type": "power_dip",
                "embedding": vec![0.1f32; 16],
            }),
            serde_json::json!({
                "timestamp": "1970-01-01T00:00:00Z",
                "anomaly_score": 0.05,
                "anomaly_type": "power_dip",
                "embedding": vec![0.1f32; 16],
            }),
        );
        let lines = BufReader::new(input.as_bytes()).lines();
        run(&mut l, lines, Duration::from_secs(60)).await.unwrap();

        assert_eq!(l.ticks(), 2);
        assert_eq!(l.context().store().len(), 1);
        assert_eq!(l.context().metrics().snapshot().completions, 1);
    }
}
