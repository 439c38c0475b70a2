//! Coordinator for the two-phase cleaning run.
//!
//! A run moves through fixed barriers:
//!
//! 1. validate the rules and options (nothing is dispatched on failure)
//! 2. every worker submits [`PartialStats`] for its partition
//! 3. the coordinator consolidates them into one [`GlobalDecision`]
//! 4. every worker applies that same decision to its partition
//! 5. cleaned partitions are concatenated in ascending partition order
//!
//! Workers talk to the coordinator only through channels; the coordinator alone owns the
//! buffers the messages land in.

mod inbox;
pub mod observer;
mod report;

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

use crate::aggregator::{consolidate, GlobalDecision};
use crate::error::{CleanError, CleanResult, Phase};
use crate::rules::{Dictionaries, RuleConfig};
use crate::types::{DataType, Partition, Row, Schema, Table};
use crate::worker::{CleanedPartition, DuplicateDetection, Fingerprinter, PartialStats, Worker};

use inbox::Inbox;

pub use observer::{
    PipelineEvent, PipelineMetrics, PipelineMetricsSnapshot, PipelineObserver, TracingObserver,
};
pub use report::CleaningReport;

/// Configuration for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Number of partitions, one worker each.
    pub worker_count: usize,
    /// Size of the worker thread pool.
    ///
    /// If `None`, uses `worker_count` threads.
    pub num_threads: Option<usize>,
    /// Columns left out of duplicate fingerprints (e.g. a record id).
    pub identity_columns: Vec<String>,
    pub duplicates: DuplicateDetection,
}

impl PipelineOptions {
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_identity_column(mut self, column: impl Into<String>) -> Self {
        self.identity_columns.push(column.into());
        self
    }

    pub fn with_duplicates(mut self, duplicates: DuplicateDetection) -> Self {
        self.duplicates = duplicates;
        self
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            worker_count: n,
            num_threads: None,
            identity_columns: Vec::new(),
            duplicates: DuplicateDetection::default(),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanOutput {
    pub table: Table,
    pub report: CleaningReport,
}

/// Partitioned cleaning pipeline over an in-memory [`Table`].
pub struct Pipeline {
    pool: ThreadPool,
    opts: PipelineOptions,
    observer: Option<Arc<dyn PipelineObserver>>,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Create a pipeline with the given options.
    ///
    /// # Errors
    ///
    /// [`CleanError::Config`] if `worker_count == 0` or `num_threads == Some(0)`;
    /// [`CleanError::ThreadPool`] if the pool cannot be built.
    pub fn new(opts: PipelineOptions) -> CleanResult<Self> {
        if opts.worker_count == 0 {
            return Err(CleanError::config("worker_count", "must be at least 1"));
        }
        if opts.num_threads == Some(0) {
            return Err(CleanError::config("num_threads", "must be at least 1 when set"));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(opts.num_threads.unwrap_or(opts.worker_count))
            .thread_name(|i| format!("cleanstream-worker-{i}"))
            .build()?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    /// Attach an observer for pipeline events.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time run metrics.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Clean `table` with `rules`.
    ///
    /// The output is the same for every `worker_count`. Any fatal error aborts the whole
    /// run and no table is returned; when several workers fail, the error from the lowest
    /// partition id wins.
    ///
    /// # Errors
    ///
    /// [`CleanError::Config`] before dispatch for invalid rules or identity columns,
    /// [`CleanError::Worker`] from either worker phase, and [`CleanError::Protocol`] if a
    /// barrier is reached with a missing or repeated submission.
    pub fn run(
        &self,
        table: &Table,
        rules: &RuleConfig,
        dictionaries: &Dictionaries,
    ) -> CleanResult<CleanOutput> {
        self.pool.install(|| self.run_impl(table, rules, dictionaries))
    }

    fn run_impl(
        &self,
        table: &Table,
        rules: &RuleConfig,
        dictionaries: &Dictionaries,
    ) -> CleanResult<CleanOutput> {
        let start = Instant::now();
        let input_rows = table.row_count();
        self.metrics.begin_run(input_rows);
        let schema = &table.schema;

        let fingerprinter = self.in_phase(Phase::Validate, || {
            rules.validate(schema, dictionaries)?;
            Fingerprinter::new(schema, &self.opts.identity_columns, self.opts.duplicates)
        })?;

        let workers: Vec<Worker> = partition_table(table, self.opts.worker_count)
            .into_iter()
            .map(Worker::new)
            .collect();
        let partitions = workers.len();
        self.emit(PipelineEvent::RunStarted {
            rows: input_rows,
            partitions,
        });

        let stats = self.in_phase(Phase::LocalStats, || {
            self.gather_stats(&workers, schema, rules, &fingerprinter)
        })?;

        let consolidation = self.in_phase(Phase::Aggregate, || Ok(consolidate(stats, rules)))?;
        for warning in &consolidation.warnings {
            warn!("{warning}");
            self.emit(PipelineEvent::Warning {
                warning: warning.clone(),
            });
        }
        let decision = consolidation.decision;
        self.emit(PipelineEvent::DecisionBroadcast {
            duplicates: decision.duplicates.len(),
            imputed_columns: decision.imputation.len(),
            bounded_columns: decision.bounds.len(),
        });

        let cleaned = self.in_phase(Phase::Apply, || {
            self.apply_decision(workers, schema, rules, dictionaries, &decision)
        })?;

        let (rows, totals) = self.in_phase(Phase::Recombine, || recombine(cleaned))?;
        let table = Table::from_rows(output_schema(schema, &decision), rows);

        let elapsed = start.elapsed();
        self.metrics.end_run(elapsed, table.row_count());
        self.emit(PipelineEvent::RunFinished {
            elapsed,
            metrics: self.metrics.snapshot(),
        });

        let report = CleaningReport {
            input_rows,
            output_rows: table.row_count(),
            partitions,
            missing: consolidation.missing,
            duplicates_removed: totals.duplicates_dropped,
            rejected_rows: totals.rejected,
            changes: totals.changes,
            decision,
            data_issues: consolidation.data_issues,
            warnings: consolidation.warnings,
            elapsed,
        };
        Ok(CleanOutput { table, report })
    }

    fn gather_stats(
        &self,
        workers: &[Worker],
        schema: &Schema,
        rules: &RuleConfig,
        fingerprinter: &Fingerprinter,
    ) -> CleanResult<Vec<PartialStats>> {
        let (tx, rx) = mpsc::channel();
        workers.par_iter().for_each_with(tx, |tx, worker| {
            self.metrics.on_worker_start();
            let result = worker.local_stats(schema, rules, fingerprinter);
            self.metrics.on_worker_end();
            // The receiver outlives every sender.
            let _ = tx.send((worker.id(), result));
        });

        let mut inbox = Inbox::new(workers.len(), Phase::LocalStats);
        for (partition, result) in rx {
            if let Ok(stats) = &result {
                self.emit(PipelineEvent::StatsSubmitted {
                    partition,
                    rows: stats.rows,
                    fingerprints: stats.fingerprints.len(),
                });
            }
            inbox.submit(partition, result)?;
        }
        inbox.into_complete()?.into_iter().collect()
    }

    fn apply_decision(
        &self,
        workers: Vec<Worker>,
        schema: &Schema,
        rules: &RuleConfig,
        dictionaries: &Dictionaries,
        decision: &GlobalDecision,
    ) -> CleanResult<Vec<CleanedPartition>> {
        let partitions = workers.len();
        let (tx, rx) = mpsc::channel();
        workers.into_par_iter().for_each_with(tx, |tx, worker| {
            self.metrics.on_worker_start();
            let id = worker.id();
            let result = worker.apply(schema, rules, dictionaries, decision);
            self.metrics.on_worker_end();
            let _ = tx.send((id, result));
        });

        let mut inbox = Inbox::new(partitions, Phase::Apply);
        for (partition, result) in rx {
            if let Ok(cleaned) = &result {
                self.metrics.on_duplicates_dropped(cleaned.duplicates_dropped);
                self.emit(PipelineEvent::PartitionCleaned {
                    partition,
                    input_rows: cleaned.input_rows,
                    output_rows: cleaned.partition.len(),
                });
            }
            inbox.submit(partition, result)?;
        }
        inbox.into_complete()?.into_iter().collect()
    }

    fn in_phase<T>(&self, phase: Phase, f: impl FnOnce() -> CleanResult<T>) -> CleanResult<T> {
        self.emit(PipelineEvent::PhaseStarted { phase });
        let start = Instant::now();
        let out = f()?;
        self.emit(PipelineEvent::PhaseFinished {
            phase,
            elapsed: start.elapsed(),
        });
        Ok(out)
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(o) = &self.observer {
            o.on_event(&event);
        }
    }
}

/// Clean `table` with `worker_count` workers and default options.
///
/// ```
/// use cleanstream::rules::{Dictionaries, RuleConfig, RuleSpec, ImputeStrategy};
/// use cleanstream::types::{DataType, Field, Schema, Table, Value};
///
/// let schema = Schema::new(vec![Field::new("age", DataType::Int64)]);
/// let table = Table::new(
///     schema,
///     vec![vec![Value::Int64(20)], vec![Value::Null], vec![Value::Int64(40)]],
/// );
/// let rules = RuleConfig::new().with_rule(
///     "age",
///     RuleSpec::MissingImpute {
///         strategy: ImputeStrategy::Mean,
///     },
/// );
///
/// let cleaned = cleanstream::clean(&table, &rules, &Dictionaries::new(), 2).unwrap();
/// assert_eq!(cleaned.value(1, "age"), Some(&Value::Float64(30.0)));
/// ```
///
/// # Errors
///
/// See [`Pipeline::run`]; `worker_count == 0` is a [`CleanError::Config`].
pub fn clean(
    table: &Table,
    rules: &RuleConfig,
    dictionaries: &Dictionaries,
    worker_count: usize,
) -> CleanResult<Table> {
    let opts = PipelineOptions::default().with_workers(worker_count);
    Ok(Pipeline::new(opts)?.run(table, rules, dictionaries)?.table)
}

/// Split `table` into `count` contiguous partitions.
///
/// Every partition gets `len / count` rows and the last one also takes the remainder, so
/// leading partitions may be empty when `count > len`.
pub fn partition_table(table: &Table, count: usize) -> Vec<Partition> {
    if count == 0 {
        return Vec::new();
    }
    let len = table.rows.len();
    let chunk = len / count;
    (0..count)
        .map(|id| {
            let start = id * chunk;
            let end = if id + 1 == count { len } else { start + chunk };
            Partition::new(id, table.rows[start..end].to_vec())
        })
        .collect()
}

#[derive(Debug, Default)]
struct Totals {
    duplicates_dropped: usize,
    rejected: usize,
    changes: BTreeMap<String, usize>,
}

fn recombine(cleaned: Vec<CleanedPartition>) -> CleanResult<(Vec<Row>, Totals)> {
    let mut totals = Totals::default();
    let mut rows: Vec<Row> = Vec::with_capacity(cleaned.iter().map(|c| c.partition.len()).sum());
    for part in cleaned {
        totals.duplicates_dropped += part.duplicates_dropped;
        totals.rejected += part.rejected;
        for (column, n) in part.changes {
            *totals.changes.entry(column).or_default() += n;
        }
        for row in part.partition.rows {
            if let Some(last) = rows.last() {
                if last.index >= row.index {
                    return Err(CleanError::Protocol {
                        phase: Phase::Recombine,
                        message: format!(
                            "row {} from partition {} follows row {}",
                            row.index, part.partition.id, last.index
                        ),
                    });
                }
            }
            rows.push(row);
        }
    }
    debug!(rows = rows.len(), "partitions recombined");
    Ok((rows, totals))
}

/// Columns that received a numeric decision come out as `Float64`.
fn output_schema(schema: &Schema, decision: &GlobalDecision) -> Schema {
    decision
        .imputation
        .keys()
        .chain(decision.bounds.keys())
        .fold(schema.clone(), |schema, column| {
            schema.with_field_type(column, DataType::Float64)
        })
}
