use std::fmt;

use migrator_core::{ErrorClass, ThreadId};

/// A failure after the retry policy gave up, carrying the class that stopped it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s) ({class}): {message}")]
pub struct ClassifiedError {
    pub operation: String,
    pub class: ErrorClass,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] ClassifiedError),
}

impl ExecError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Converting,
    Submitting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Fetching => "fetching",
            Stage::Converting => "converting",
            Stage::Submitting => "submitting",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed { children: usize, skipped_children: usize },
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    Stage { unit_id: ThreadId, stage: Stage },
    UnitFinished { unit_id: ThreadId, outcome: UnitOutcome },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Units returned by the source before filtering.
    pub discovered: usize,
    /// Units skipped because the ledger already had them completed.
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub failed_ids: Vec<ThreadId>,
    /// Ledger totals after the run, including earlier runs.
    pub completed_total: usize,
    pub failed_total: usize,
    pub operations: u64,
    pub rate_limit_hits: u64,
}
