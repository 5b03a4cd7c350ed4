//! Append-only audit trail of sealed decisions.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::domain::{Decision, DecisionId, DispatchOutcome};

/// Errors produced by audit sinks.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("decision {0} must be sealed before it is audited")]
    Unsealed(DecisionId),

    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{}:{line}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}

/// Receives every terminal decision exactly once.
pub trait AuditSink: Send + Sync {
    fn append(&self, decision: &Decision) -> Result<(), AuditError>;
}

fn ensure_sealed(decision: &Decision) -> Result<(), AuditError> {
    if decision.is_sealed() {
        Ok(())
    } else {
        Err(AuditError::Unsealed(decision.decision_id))
    }
}

/// Keeps audited decisions in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    decisions: Mutex<Vec<Decision>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions.lock().clone()
    }

    pub fn last(&self) -> Option<Decision> {
        self.decisions.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.decisions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, decision: &Decision) -> Result<(), AuditError> {
        ensure_sealed(decision)?;
        self.decisions.lock().push(decision.clone());
        Ok(())
    }
}

/// Writes one sealed decision per line to a JSONL file.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlAuditSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, decision: &Decision) -> Result<(), AuditError> {
        ensure_sealed(decision)?;
        let line = serde_json::to_string(decision)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Read back an audit trail written by [`JsonlAuditSink`].
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<Decision>, AuditError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut decisions = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let decision = serde_json::from_str(&line).map_err(|source| AuditError::Corrupt {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        decisions.push(decision);
    }
    Ok(decisions)
}

/// Terminal dispatch outcomes recorded in an audit trail, for rehydrating
/// the orchestrator's idempotency cache after a restart.
pub fn dispatch_outcomes(decisions: &[Decision]) -> Vec<(DecisionId, DispatchOutcome)> {
    decisions
        .iter()
        .filter_map(|d| {
            d.dispatch_outcome
                .as_ref()
                .filter(|o| o.is_terminal())
                .map(|o| (d.decision_id, o.clone()))
        })
        .collect()
}
