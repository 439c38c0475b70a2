use std::fmt;

use thiserror::Error;

/// Convenience result type for cleaning operations.
pub type CleanResult<T> = Result<T, CleanError>;

/// Pipeline phase, used to give fatal errors enough context to reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Configuration checks before any partition is dispatched.
    Validate,
    /// Worker phase 1: partial statistics and fingerprints.
    LocalStats,
    /// Coordinator: consolidation of partial statistics.
    Aggregate,
    /// Worker phase 2: applying the global decision.
    Apply,
    /// Coordinator: concatenation of cleaned partitions.
    Recombine,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::LocalStats => "local-stats",
            Self::Aggregate => "aggregate",
            Self::Apply => "apply",
            Self::Recombine => "recombine",
        };
        f.write_str(name)
    }
}

/// Error type returned by the cleaning pipeline and its loaders.
///
/// Every variant is fatal to the run. Non-fatal conditions (unparsable cells, statistics
/// without data) are reported through [`crate::worker::DataIssue`] and
/// [`crate::aggregator::AggregationWarning`] instead.
#[derive(Debug, Error)]
pub enum CleanError {
    /// Invalid rule configuration, surfaced before any partition is dispatched.
    #[error("config error on column '{column}': {message}")]
    Config { column: String, message: String },

    /// A worker failed; the whole run is aborted.
    #[error("worker error in partition {partition} during {phase}: {message}")]
    Worker {
        partition: usize,
        phase: Phase,
        message: String,
    },

    /// A coordinator buffer received a duplicate or incomplete set of submissions.
    #[error("protocol error during {phase}: {message}")]
    Protocol { phase: Phase, message: String },

    /// The worker thread pool could not be built.
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Rule file could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CleanError {
    pub(crate) fn config(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            column: column.into(),
            message: message.into(),
        }
    }

    pub(crate) fn worker(partition: usize, phase: Phase, message: impl Into<String>) -> Self {
        Self::Worker {
            partition,
            phase,
            message: message.into(),
        }
    }
}
