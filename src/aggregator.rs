//! Consolidation of per-worker [`PartialStats`] into one dataset-wide [`GlobalDecision`].
//!
//! [`consolidate`] is deterministic and independent of how the table was partitioned:
//!
//! - partial sums are combined in ascending partition order;
//! - gathered samples are sorted before any order statistic is taken;
//! - duplicate groups keep the member with the smallest global index, whatever order the
//!   workers reported in.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::rules::{ImputeStrategy, RuleConfig, RuleSpec};
use crate::worker::{DataIssue, FingerprintEntry, ImputeAccumulator, PartialStats};

/// Inclusive outlier bounds for one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Lower fence, `Q1 - k*IQR`.
    pub lower: f64,
    /// Upper fence, `Q3 + k*IQR`.
    pub upper: f64,
}

impl Bounds {
    /// IQR fence from the first and third quartiles.
    pub fn iqr_fence(q1: f64, q3: f64, multiplier: f64) -> Self {
        let iqr = q3 - q1;
        Self {
            lower: q1 - multiplier * iqr,
            upper: q3 + multiplier * iqr,
        }
    }

    /// Clamp `v` into `[lower, upper]`.
    pub fn clamp(&self, v: f64) -> f64 {
        if v < self.lower {
            self.lower
        } else if v > self.upper {
            self.upper
        } else {
            v
        }
    }

    /// Whether `v` lies inside the bounds.
    pub fn contains(&self, v: f64) -> bool {
        v >= self.lower && v <= self.upper
    }
}

/// Dataset-wide facts every worker applies identically.
///
/// Built once per run by [`consolidate`] and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalDecision {
    /// Imputation value per `missing_impute` column.
    pub imputation: BTreeMap<String, f64>,
    /// Global row indices to drop as duplicates.
    pub duplicates: BTreeSet<usize>,
    /// Outlier bounds per `outlier_capping` column.
    pub bounds: BTreeMap<String, Bounds>,
}

impl GlobalDecision {
    /// Imputation value for `column`, if one could be computed.
    pub fn imputation_value(&self, column: &str) -> Option<f64> {
        self.imputation.get(column).copied()
    }

    /// Outlier bounds for `column`, if they could be computed.
    pub fn bounds(&self, column: &str) -> Option<Bounds> {
        self.bounds.get(column).copied()
    }

    /// Whether the row with this global index is a duplicate to drop.
    pub fn is_duplicate(&self, index: usize) -> bool {
        self.duplicates.contains(&index)
    }
}

/// A statistic that could not be computed; the affected rule becomes a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationWarning {
    /// No numeric value was present anywhere in the column.
    NoValues { column: String, rule: &'static str },
}

impl fmt::Display for AggregationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoValues { column, rule } => write!(
                f,
                "no numeric values in column '{column}'; {rule} skipped for this run"
            ),
        }
    }
}

/// Everything the coordinator learns from one consolidation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Consolidation {
    /// Decision to broadcast.
    pub decision: GlobalDecision,
    /// Missing (or non-numeric) cell count per statistic column.
    pub missing: BTreeMap<String, usize>,
    /// All data issues reported by workers, by ascending global index.
    pub data_issues: Vec<DataIssue>,
    /// Statistics that degraded to a no-op.
    pub warnings: Vec<AggregationWarning>,
}

/// Combine every worker's partial statistics into a [`Consolidation`].
///
/// `rules` decides which statistic each column needs (mean, median, IQR fence).
pub fn consolidate(mut stats: Vec<PartialStats>, rules: &RuleConfig) -> Consolidation {
    stats.sort_by_key(|s| s.partition);

    let mut accumulators: BTreeMap<String, ImputeAccumulator> = BTreeMap::new();
    let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut buckets: BTreeMap<u64, Vec<FingerprintEntry>> = BTreeMap::new();
    let mut data_issues = Vec::new();

    for partial in stats {
        for (column, acc) in partial.accumulators {
            accumulators.entry(column).or_default().merge(&acc);
        }
        for (column, values) in partial.samples {
            samples.entry(column).or_default().extend(values);
        }
        for (fingerprint, entries) in partial.fingerprints {
            buckets.entry(fingerprint).or_default().extend(entries);
        }
        data_issues.extend(partial.data_issues);
    }
    data_issues.sort_by_key(|issue| issue.index);
    for values in samples.values_mut() {
        values.sort_by(f64::total_cmp);
    }

    let mut decision = GlobalDecision {
        duplicates: duplicate_indices(buckets),
        ..GlobalDecision::default()
    };
    let mut warnings = Vec::new();

    for rule in rules.rules() {
        let column = rule.column.as_str();
        let column_samples = samples.get(column).map(Vec::as_slice).unwrap_or_default();
        match &rule.spec {
            RuleSpec::MissingImpute { strategy } => {
                let value = match strategy {
                    ImputeStrategy::Mean => {
                        accumulators.get(column).and_then(ImputeAccumulator::mean)
                    }
                    ImputeStrategy::Median => percentile(column_samples, 0.5),
                };
                match value {
                    Some(v) => {
                        decision.imputation.insert(column.to_string(), v);
                    }
                    None => warnings.push(AggregationWarning::NoValues {
                        column: column.to_string(),
                        rule: rule.spec.kind(),
                    }),
                }
            }
            RuleSpec::OutlierCapping { multiplier } => {
                match (percentile(column_samples, 0.25), percentile(column_samples, 0.75)) {
                    (Some(q1), Some(q3)) => {
                        decision
                            .bounds
                            .insert(column.to_string(), Bounds::iqr_fence(q1, q3, *multiplier));
                    }
                    _ => warnings.push(AggregationWarning::NoValues {
                        column: column.to_string(),
                        rule: rule.spec.kind(),
                    }),
                }
            }
            RuleSpec::StringNormalize { .. } | RuleSpec::DictionaryReplace { .. } => {}
        }
    }

    let missing = accumulators
        .into_iter()
        .map(|(column, acc)| (column, acc.missing))
        .collect();

    Consolidation {
        decision,
        missing,
        data_issues,
        warnings,
    }
}

/// Every index except the smallest of each group of identical rows.
///
/// Entries sharing a fingerprint are split into equality classes by their key; with
/// fingerprint-only detection the keys are empty and the whole bucket is one class.
fn duplicate_indices(buckets: BTreeMap<u64, Vec<FingerprintEntry>>) -> BTreeSet<usize> {
    let mut duplicates = BTreeSet::new();
    for (_, mut entries) in buckets {
        if entries.len() < 2 {
            continue;
        }
        entries.sort_by_key(|e| e.index);
        let mut survivors: Vec<&FingerprintEntry> = Vec::new();
        for entry in &entries {
            if survivors.iter().any(|kept| kept.key == entry.key) {
                duplicates.insert(entry.index);
            } else {
                survivors.push(entry);
            }
        }
    }
    duplicates
}

/// Percentile `q` (in `[0, 1]`) of ascending `sorted` values, interpolating linearly between
/// the two nearest order statistics. `None` for an empty slice.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = q.clamp(0.0, 1.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let lo_value = *sorted.get(lo)?;
    let hi_value = *sorted.get(hi)?;
    Some(lo_value + (rank - lo as f64) * (hi_value - lo_value))
}
