use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::aggregator::AggregationWarning;
use crate::error::Phase;

/// Progress events emitted by the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted { rows: usize, partitions: usize },
    PhaseStarted { phase: Phase },
    PhaseFinished { phase: Phase, elapsed: Duration },
    StatsSubmitted { partition: usize, rows: usize, fingerprints: usize },
    DecisionBroadcast {
        duplicates: usize,
        imputed_columns: usize,
        bounded_columns: usize,
    },
    PartitionCleaned {
        partition: usize,
        input_rows: usize,
        output_rows: usize,
    },
    Warning { warning: AggregationWarning },
    RunFinished {
        elapsed: Duration,
        metrics: PipelineMetricsSnapshot,
    },
}

/// Observer hook for pipeline events.
///
/// Called synchronously from the coordinator thread as results arrive; implementations
/// must return quickly.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Forwards pipeline events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { rows, partitions } => {
                info!(rows, partitions, "cleaning run started");
            }
            PipelineEvent::PhaseStarted { phase } => info!(%phase, "phase started"),
            PipelineEvent::PhaseFinished { phase, elapsed } => {
                info!(%phase, ?elapsed, "phase finished");
            }
            PipelineEvent::StatsSubmitted {
                partition,
                rows,
                fingerprints,
            } => debug!(partition, rows, fingerprints, "partial stats received"),
            PipelineEvent::DecisionBroadcast {
                duplicates,
                imputed_columns,
                bounded_columns,
            } => info!(
                duplicates,
                imputed_columns, bounded_columns, "global decision broadcast"
            ),
            PipelineEvent::PartitionCleaned {
                partition,
                input_rows,
                output_rows,
            } => debug!(partition, input_rows, output_rows, "cleaned partition received"),
            PipelineEvent::Warning { warning } => debug!(%warning, "warning reported"),
            PipelineEvent::RunFinished { elapsed, metrics } => {
                info!(?elapsed, %metrics, "cleaning run finished");
            }
        }
    }
}

/// Real-time counters for a pipeline run.
///
/// The pipeline updates these during execution; callers can snapshot them at any time.
pub struct PipelineMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    rows_in: AtomicU64,
    rows_out: AtomicU64,
    duplicates_dropped: AtomicU64,
    partitions_started: AtomicU64,
    partitions_finished: AtomicU64,

    active_workers: AtomicUsize,
    max_active_workers: AtomicUsize,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            rows_in: AtomicU64::new(0),
            rows_out: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            partitions_started: AtomicU64::new(0),
            partitions_finished: AtomicU64::new(0),
            active_workers: AtomicUsize::new(0),
            max_active_workers: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self, rows_in: usize) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);

        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.rows_in.store(rows_in as u64, Ordering::SeqCst);
        self.rows_out.store(0, Ordering::SeqCst);
        self.duplicates_dropped.store(0, Ordering::SeqCst);
        self.partitions_started.store(0, Ordering::SeqCst);
        self.partitions_finished.store(0, Ordering::SeqCst);
        self.active_workers.store(0, Ordering::SeqCst);
        self.max_active_workers.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration, rows_out: usize) {
        self.rows_out.store(rows_out as u64, Ordering::SeqCst);
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_worker_start(&self) {
        let _ = self.partitions_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_workers, now);
    }

    pub fn on_worker_end(&self) {
        let _ = self.partitions_finished.fetch_add(1, Ordering::SeqCst);
        let _ = self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_duplicates_dropped(&self, n: usize) {
        let _ = self.duplicates_dropped.fetch_add(n as u64, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        PipelineMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed,
            rows_in: self.rows_in.load(Ordering::SeqCst),
            rows_out: self.rows_out.load(Ordering::SeqCst),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::SeqCst),
            partitions_started: self.partitions_started.load(Ordering::SeqCst),
            partitions_finished: self.partitions_finished.load(Ordering::SeqCst),
            max_active_workers: self.max_active_workers.load(Ordering::SeqCst),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    loop {
        let cur = dst.load(Ordering::SeqCst);
        if now <= cur {
            break;
        }
        if dst
            .compare_exchange(cur, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break;
        }
    }
}

/// Immutable snapshot of [`PipelineMetrics`].
///
/// `partitions_started`/`partitions_finished` count worker tasks across both phases, so a
/// completed run with `n` partitions reports `2 * n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub rows_in: u64,
    pub rows_out: u64,
    pub duplicates_dropped: u64,
    pub partitions_started: u64,
    pub partitions_finished: u64,
    pub max_active_workers: usize,
}

impl fmt::Display for PipelineMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, rows={}->{}, duplicates_dropped={}, worker_tasks={}/{}, \
             max_active_workers={}, elapsed={:?}",
            self.run_id,
            self.rows_in,
            self.rows_out,
            self.duplicates_dropped,
            self.partitions_finished,
            self.partitions_started,
            self.max_active_workers,
            self.elapsed
        )
    }
}
