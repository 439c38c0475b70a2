//! Worker: owns one [`Partition`] for the duration of a run.
//!
//! Phase 1 ([`Worker::local_stats`]) produces the worker's [`PartialStats`]. Phase 2
//! ([`Worker::apply`]) consumes the worker and returns its cleaned rows, using only the
//! broadcast [`GlobalDecision`] for anything dataset-wide.

use std::collections::BTreeMap;

use tracing::debug;
use xxhash_rust::xxh3::Xxh3;

use crate::aggregator::GlobalDecision;
use crate::error::{CleanError, CleanResult, Phase};
use crate::rules::{apply_rule, Dictionaries, RuleConfig};
use crate::types::{Partition, Schema, Value};

/// How rows are judged identical for duplicate removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateDetection {
    /// Group by fingerprint, then split each group by full equality of the fingerprinted
    /// cells. Hash collisions never drop a distinct row.
    #[default]
    Exact,
    /// Group by fingerprint only. Cheaper to ship, but a collision drops a distinct row.
    Fingerprint,
}

/// Exact sum of `f64` values.
///
/// Keeps the running total as non-overlapping partials and rounds once in
/// [`ExactSum::value`], so the result does not depend on the order values are added or on
/// how they were split before merging. Non-finite inputs are summed separately.
#[derive(Debug, Clone, Default)]
pub struct ExactSum {
    partials: Vec<f64>,
    special: f64,
}

impl ExactSum {
    /// Add one value.
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            self.special += value;
            return;
        }
        let mut x = value;
        let mut kept = 0;
        for j in 0..self.partials.len() {
            let mut y = self.partials[j];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            let lo = y - (hi - x);
            if lo != 0.0 {
                self.partials[kept] = lo;
                kept += 1;
            }
            x = hi;
        }
        self.partials.truncate(kept);
        self.partials.push(x);
    }

    /// Fold every partial of `other` into this sum.
    pub fn merge(&mut self, other: &Self) {
        for &p in &other.partials {
            self.add(p);
        }
        self.special += other.special;
    }

    /// The sum, correctly rounded.
    pub fn value(&self) -> f64 {
        if self.special != 0.0 {
            return self.special;
        }
        let Some((&top, rest)) = self.partials.split_last() else {
            return 0.0;
        };
        let mut hi = top;
        let mut lo = 0.0;
        let mut n = rest.len();
        while n > 0 {
            let x = hi;
            n -= 1;
            let y = rest[n];
            hi = x + y;
            lo = y - (hi - x);
            if lo != 0.0 {
                break;
            }
        }
        // Round half to even across the remaining partials.
        if n > 0 && ((lo < 0.0 && rest[n - 1] < 0.0) || (lo > 0.0 && rest[n - 1] > 0.0)) {
            let y = lo * 2.0;
            let x = hi + y;
            if y == x - hi {
                hi = x;
            }
        }
        hi
    }
}

impl From<f64> for ExactSum {
    fn from(value: f64) -> Self {
        let mut sum = Self::default();
        sum.add(value);
        sum
    }
}

impl PartialEq for ExactSum {
    fn eq(&self, other: &Self) -> bool {
        self.value().to_bits() == other.value().to_bits()
    }
}

/// Running sum/count for one statistic column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImputeAccumulator {
    /// Missing or non-numeric cells.
    pub missing: usize,
    /// Sum of numeric cells.
    pub sum: ExactSum,
    /// Number of numeric cells.
    pub count: usize,
}

impl ImputeAccumulator {
    /// Count one numeric cell.
    pub fn push(&mut self, value: f64) {
        self.sum.add(value);
        self.count += 1;
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &Self) {
        self.missing += other.missing;
        self.sum.merge(&other.sum);
        self.count += other.count;
    }

    /// Arithmetic mean, or `None` if nothing was counted.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum.value() / self.count as f64)
    }
}

/// One row's entry in a fingerprint bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintEntry {
    /// Global row index.
    pub index: usize,
    /// Fingerprinted cells; empty under [`DuplicateDetection::Fingerprint`].
    pub key: Vec<Value>,
}

/// A non-numeric cell found in a numeric column that feeds a statistic.
///
/// The cell is treated as missing; the run continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIssue {
    /// Global row index.
    pub index: usize,
    /// Column name.
    pub column: String,
    /// The offending cell, as text.
    pub raw: String,
}

/// A worker's contribution to the global decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialStats {
    /// Partition that produced these stats.
    pub partition: usize,
    /// Rows examined.
    pub rows: usize,
    /// Running sum/count/missing per statistic column.
    pub accumulators: BTreeMap<String, ImputeAccumulator>,
    /// Every numeric value, verbatim, for columns needing order statistics.
    pub samples: BTreeMap<String, Vec<f64>>,
    /// Fingerprint -> rows sharing it.
    pub fingerprints: BTreeMap<u64, Vec<FingerprintEntry>>,
    /// Non-numeric cells found in numeric statistic columns.
    pub data_issues: Vec<DataIssue>,
}

/// Computes row fingerprints over every column except the identity columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprinter {
    columns: Vec<usize>,
    mode: DuplicateDetection,
}

impl Fingerprinter {
    /// Fingerprint every column of `schema` except `excluded`.
    ///
    /// # Errors
    ///
    /// [`CleanError::Config`] if an excluded column is not in the schema.
    pub fn new(
        schema: &Schema,
        excluded: &[String],
        mode: DuplicateDetection,
    ) -> CleanResult<Self> {
        for name in excluded {
            if schema.index_of(name).is_none() {
                return Err(CleanError::config(
                    name,
                    "identity column not found in table",
                ));
            }
        }
        let columns = schema
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !excluded.contains(&f.name))
            .map(|(i, _)| i)
            .collect();
        Ok(Self { columns, mode })
    }

    /// Indices of the fingerprinted columns.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// 64-bit xxh3 fingerprint of the fingerprinted cells of `values`.
    pub fn fingerprint(&self, values: &[Value]) -> u64 {
        let mut hasher = Xxh3::new();
        for value in self.columns.iter().filter_map(|&i| values.get(i)) {
            hash_value(&mut hasher, value);
        }
        hasher.digest()
    }

    /// Equality key shipped alongside the fingerprint.
    pub fn key(&self, values: &[Value]) -> Vec<Value> {
        match self.mode {
            DuplicateDetection::Exact => self
                .columns
                .iter()
                .filter_map(|&i| values.get(i).cloned())
                .collect(),
            DuplicateDetection::Fingerprint => Vec::new(),
        }
    }
}

fn hash_value(hasher: &mut Xxh3, value: &Value) {
    match value {
        Value::Null => hasher.update(&[0]),
        Value::Int64(v) => {
            hasher.update(&[1]);
            hasher.update(&v.to_le_bytes());
        }
        Value::Float64(v) => {
            hasher.update(&[2]);
            hasher.update(&v.to_bits().to_le_bytes());
        }
        Value::Bool(v) => hasher.update(&[3, u8::from(*v)]),
        Value::Utf8(s) => {
            hasher.update(&[4]);
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
    }
}

/// A worker's phase 2 output.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedPartition {
    /// Surviving rows, original global indices and relative order preserved.
    pub partition: Partition,
    /// Rows received.
    pub input_rows: usize,
    /// Rows dropped because the decision marked them duplicate.
    pub duplicates_dropped: usize,
    /// Rows dropped by validation.
    pub rejected: usize,
    /// Changed cells per column.
    pub changes: BTreeMap<String, usize>,
}

/// Owner of one partition.
#[derive(Debug)]
pub struct Worker {
    partition: Partition,
}

impl Worker {
    /// Take ownership of a partition.
    pub fn new(partition: Partition) -> Self {
        Self { partition }
    }

    /// Id of the owned partition.
    pub fn id(&self) -> usize {
        self.partition.id
    }

    /// Phase 1: partial statistics and fingerprints for the owned partition.
    ///
    /// # Errors
    ///
    /// [`CleanError::Worker`] if a row does not match the schema width.
    pub fn local_stats(
        &self,
        schema: &Schema,
        rules: &RuleConfig,
        fingerprinter: &Fingerprinter,
    ) -> CleanResult<PartialStats> {
        self.check_arity(schema, Phase::LocalStats)?;

        let mut stats = PartialStats {
            partition: self.id(),
            rows: self.partition.len(),
            ..PartialStats::default()
        };

        // column -> (index, needs samples); one pass per column even if several rules use it.
        let mut columns: BTreeMap<&str, (usize, bool)> = BTreeMap::new();
        for rule in rules.rules().iter().filter(|r| r.spec.needs_statistics()) {
            if let Some(idx) = schema.index_of(&rule.column) {
                let entry = columns.entry(rule.column.as_str()).or_insert((idx, false));
                entry.1 |= rule.spec.needs_samples();
            }
        }

        for (column, (idx, needs_samples)) in columns {
            let numeric_column = schema.fields[idx].data_type.is_numeric();
            let mut acc = ImputeAccumulator::default();
            let mut samples = Vec::new();
            for row in &self.partition.rows {
                let value = &row.values[idx];
                match value.as_f64() {
                    Some(v) => {
                        acc.push(v);
                        if needs_samples {
                            samples.push(v);
                        }
                    }
                    None => {
                        acc.missing += 1;
                        if numeric_column && matches!(value, Value::Utf8(_) | Value::Bool(_)) {
                            stats.data_issues.push(DataIssue {
                                index: row.index,
                                column: column.to_string(),
                                raw: value.to_string(),
                            });
                        }
                    }
                }
            }
            stats.accumulators.insert(column.to_string(), acc);
            if needs_samples {
                stats.samples.insert(column.to_string(), samples);
            }
        }

        for row in &self.partition.rows {
            stats
                .fingerprints
                .entry(fingerprinter.fingerprint(&row.values))
                .or_default()
                .push(FingerprintEntry {
                    index: row.index,
                    key: fingerprinter.key(&row.values),
                });
        }

        debug!(
            partition = self.id(),
            rows = stats.rows,
            fingerprints = stats.fingerprints.len(),
            data_issues = stats.data_issues.len(),
            "local stats computed"
        );
        Ok(stats)
    }

    /// Phase 2: drop duplicates, then run every rule in configuration order.
    ///
    /// # Errors
    ///
    /// [`CleanError::Worker`] if a row does not match the schema width;
    /// [`CleanError::Config`] if a rule names an unknown dictionary.
    pub fn apply(
        self,
        schema: &Schema,
        rules: &RuleConfig,
        dictionaries: &Dictionaries,
        decision: &GlobalDecision,
    ) -> CleanResult<CleanedPartition> {
        self.check_arity(schema, Phase::Apply)?;

        let mut partition = self.partition;
        let input_rows = partition.len();
        partition.rows.retain(|row| !decision.is_duplicate(row.index));
        let duplicates_dropped = input_rows - partition.len();

        let mut rejected = 0;
        let mut changes: BTreeMap<String, usize> = BTreeMap::new();
        for rule in rules.rules() {
            let Some(idx) = schema.index_of(&rule.column) else {
                continue;
            };
            let values = partition
                .rows
                .iter_mut()
                .map(|row| std::mem::replace(&mut row.values[idx], Value::Null))
                .collect();
            let outcome = apply_rule(&rule.column, values, &rule.spec, decision, dictionaries)?;
            for (row, value) in partition.rows.iter_mut().zip(outcome.values) {
                row.values[idx] = value;
            }
            if !outcome.rejected.is_empty() {
                let mut pos = 0;
                partition.rows.retain(|_| {
                    let keep = outcome.rejected.binary_search(&pos).is_err();
                    pos += 1;
                    keep
                });
                rejected += outcome.rejected.len();
            }
            *changes.entry(rule.column.clone()).or_default() += outcome.changed;
        }

        debug!(
            partition = partition.id,
            input_rows,
            output_rows = partition.len(),
            duplicates_dropped,
            rejected,
            "partition cleaned"
        );
        Ok(CleanedPartition {
            partition,
            input_rows,
            duplicates_dropped,
            rejected,
            changes,
        })
    }

    fn check_arity(&self, schema: &Schema, phase: Phase) -> CleanResult<()> {
        let expected = schema.len();
        match self.partition.rows.iter().find(|r| r.values.len() != expected) {
            Some(row) => Err(CleanError::worker(
                self.id(),
                phase,
                format!(
                    "row {} has {} values but the schema has {} fields",
                    row.index,
                    row.values.len(),
                    expected
                ),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::{DuplicateDetection, ExactSum, Fingerprinter, ImputeAccumulator, Worker};
    use crate::aggregator::{Bounds, GlobalDecision};
    use crate::error::{CleanError, Phase};
    use crate::rules::{Dictionaries, ImputeStrategy, InvalidPolicy, RuleConfig, RuleSpec, StringOp};
    use crate::types::{DataType, Field, Partition, Row, Schema, Value};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("age", DataType::Int64),
            Field::new("email", DataType::Utf8),
            Field::new("salary", DataType::Float64),
        ])
    }

    fn row(index: usize, id: i64, age: Value, email: &str, salary: f64) -> Row {
        Row::new(
            index,
            vec![
                Value::Int64(id),
                age,
                Value::Utf8(email.to_string()),
                Value::Float64(salary),
            ],
        )
    }

    fn partition() -> Partition {
        Partition::new(
            3,
            vec![
                row(10, 1, Value::Null, "a@b.com", 10.0),
                row(11, 2, Value::Int64(30), "a@b.com", 20.0),
                row(12, 3, Value::Utf8("n/a".to_string()), "bad", 30.0),
                row(13, 4, Value::Null, "a@b.com", 10.0),
            ],
        )
    }

    fn rules() -> RuleConfig {
        RuleConfig::new()
            .with_rule(
                "age",
                RuleSpec::MissingImpute {
                    strategy: ImputeStrategy::Mean,
                },
            )
            .with_rule("salary", RuleSpec::OutlierCapping { multiplier: 1.5 })
            .with_rule(
                "email",
                RuleSpec::StringNormalize {
                    operations: vec![StringOp::Lowercase],
                    validation: true,
                    on_invalid: InvalidPolicy::DropRow,
                },
            )
    }

    fn fingerprinter() -> Fingerprinter {
        Fingerprinter::new(&schema(), &["id".to_string()], DuplicateDetection::Exact).unwrap()
    }

    #[test]
    fn local_stats_accumulates_and_records_data_issues() {
        let worker = Worker::new(partition());
        let stats = worker.local_stats(&schema(), &rules(), &fingerprinter()).unwrap();

        assert_eq!(stats.partition, 3);
        assert_eq!(stats.rows, 4);
        let age = &stats.accumulators["age"];
        assert_eq!((age.missing, age.count, age.sum.value()), (3, 1, 30.0));
        assert!(!stats.samples.contains_key("age"));
        assert_eq!(stats.samples["salary"], vec![10.0, 20.0, 30.0, 10.0]);
        assert_eq!(stats.data_issues.len(), 1);
        assert_eq!(stats.data_issues[0].index, 12);
        assert_eq!(stats.data_issues[0].raw, "n/a");
    }

    #[test]
    fn exact_sum_does_not_lose_small_terms() {
        let mut sum = ExactSum::default();
        for v in [1e16, 1.0, -1e16] {
            sum.add(v);
        }
        assert_eq!(sum.value(), 1.0);

        let mut tenths = ExactSum::default();
        for _ in 0..10 {
            tenths.add(0.1);
        }
        assert_eq!(tenths.value(), 1.0);
        assert_eq!(ExactSum::default().value(), 0.0);
    }

    #[test]
    fn exact_sum_ignores_how_values_were_split() {
        let values: Vec<f64> = (0..40_i32)
            .map(|i| f64::from(i * 7919 % 1000) * 0.37 + 1e7 / f64::from(i + 3))
            .collect();
        let mut whole = ImputeAccumulator::default();
        values.iter().for_each(|&v| whole.push(v));

        for chunk in 1..=12 {
            let mut merged = ImputeAccumulator::default();
            for part in values.chunks(chunk).rev() {
                let mut acc = ImputeAccumulator::default();
                part.iter().for_each(|&v| acc.push(v));
                merged.merge(&acc);
            }
            assert_eq!(
                merged.mean().map(f64::to_bits),
                whole.mean().map(f64::to_bits),
                "chunk={chunk}"
            );
        }
    }

    #[test]
    fn exact_sum_keeps_infinities_apart() {
        let mut sum = ExactSum::from(f64::INFINITY);
        sum.add(1.0);
        assert_eq!(sum.value(), f64::INFINITY);
        sum.add(f64::NEG_INFINITY);
        assert!(sum.value().is_nan());
    }

    #[test]
    fn fingerprint_ignores_identity_column() {
        let worker = Worker::new(partition());
        let stats = worker.local_stats(&schema(), &rules(), &fingerprinter()).unwrap();

        let shared: Vec<Vec<usize>> = stats
            .fingerprints
            .values()
            .filter(|entries| entries.len() > 1)
            .map(|entries| entries.iter().map(|e| e.index).collect())
            .collect();
        assert_eq!(shared, vec![vec![10, 13]]);
    }

    #[test]
    fn fingerprint_only_mode_ships_empty_keys() {
        let fp = Fingerprinter::new(&schema(), &[], DuplicateDetection::Fingerprint).unwrap();
        assert!(fp.key(&partition().rows[0].values).is_empty());
        assert_eq!(fp.columns(), &[0, 1, 2, 3]);
    }

    #[test]
    fn unknown_identity_column_is_config_error() {
        let err = Fingerprinter::new(&schema(), &["nope".to_string()], DuplicateDetection::Exact)
            .unwrap_err();
        assert!(matches!(err, CleanError::Config { .. }));
    }

    #[test]
    fn apply_drops_duplicates_and_rejected_rows_in_order() {
        let decision = GlobalDecision {
            imputation: BTreeMap::from([("age".to_string(), 30.0)]),
            duplicates: BTreeSet::from([13]),
            bounds: BTreeMap::from([(
                "salary".to_string(),
                Bounds {
                    lower: 12.0,
                    upper: 25.0,
                },
            )]),
        };
        let out = Worker::new(partition())
            .apply(&schema(), &rules(), &Dictionaries::new(), &decision)
            .unwrap();

        assert_eq!(out.input_rows, 4);
        assert_eq!(out.duplicates_dropped, 1);
        assert_eq!(out.rejected, 1);
        assert_eq!(out.partition.indices(), vec![10, 11]);
        assert_eq!(out.partition.rows[0].values[1], Value::Float64(30.0));
        assert_eq!(out.partition.rows[0].values[3], Value::Float64(12.0));
        assert_eq!(out.partition.rows[1].values[3], Value::Float64(20.0));
        assert_eq!(out.changes["age"], 2);
        assert_eq!(out.changes["salary"], 2);
    }

    #[test]
    fn arity_mismatch_is_worker_error_with_context() {
        let bad = Partition::new(5, vec![Row::new(40, vec![Value::Int64(1)])]);
        let err = Worker::new(bad)
            .local_stats(&schema(), &rules(), &fingerprinter())
            .unwrap_err();
        match err {
            CleanError::Worker {
                partition, phase, ..
            } => {
                assert_eq!(partition, 5);
                assert_eq!(phase, Phase::LocalStats);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
