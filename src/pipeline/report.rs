use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::aggregator::{AggregationWarning, GlobalDecision};
use crate::worker::DataIssue;

/// Summary of one cleaning run.
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningReport {
    pub input_rows: usize,
    pub output_rows: usize,
    pub partitions: usize,
    /// Missing (or unparsable) cells per column with a statistic rule.
    pub missing: BTreeMap<String, usize>,
    pub duplicates_removed: usize,
    /// Rows dropped by email validation.
    pub rejected_rows: usize,
    /// Cells rewritten per column, summed over all rules on that column.
    pub changes: BTreeMap<String, usize>,
    /// The decision every partition applied.
    pub decision: GlobalDecision,
    pub data_issues: Vec<DataIssue>,
    pub warnings: Vec<AggregationWarning>,
    pub elapsed: Duration,
}

impl CleaningReport {
    /// Total missing cells across statistic columns.
    pub fn total_missing(&self) -> usize {
        self.missing.values().sum()
    }
}

impl fmt::Display for CleaningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rows: {} -> {} ({} partitions)",
            self.input_rows, self.output_rows, self.partitions
        )?;
        writeln!(f, "missing values: {}", self.total_missing())?;
        for (column, n) in &self.missing {
            writeln!(f, "  {column}: {n}")?;
        }
        writeln!(f, "duplicates removed: {}", self.duplicates_removed)?;
        writeln!(f, "rows rejected by validation: {}", self.rejected_rows)?;
        if !self.changes.is_empty() {
            writeln!(f, "changed cells:")?;
            for (column, n) in &self.changes {
                writeln!(f, "  {column}: {n}")?;
            }
        }
        for (column, value) in &self.decision.imputation {
            writeln!(f, "imputed {column} with {value}")?;
        }
        for (column, b) in &self.decision.bounds {
            writeln!(f, "capped {column} to [{}, {}]", b.lower, b.upper)?;
        }
        if !self.data_issues.is_empty() {
            writeln!(f, "unparsable cells: {}", self.data_issues.len())?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        write!(f, "completed in {:.2?}", self.elapsed)
    }
}
