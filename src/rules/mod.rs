//! Declarative cleaning rules.
//!
//! A [`RuleConfig`] is an ordered list of [`ColumnRule`]s, each pairing a column name with a
//! [`RuleSpec`]. The rule kinds form a closed set; [`engine::apply_rule`] has one handler per
//! variant.
//!
//! Rules are read-only inputs: the pipeline validates them once with [`RuleConfig::validate`]
//! before dispatching any partition, then shares them with every worker.
//!
//! ```rust
//! use cleanstream::rules::{ImputeStrategy, RuleConfig, RuleSpec, StringOp, InvalidPolicy};
//!
//! let rules = RuleConfig::new()
//!     .with_rule("age", RuleSpec::MissingImpute { strategy: ImputeStrategy::Mean })
//!     .with_rule(
//!         "email",
//!         RuleSpec::StringNormalize {
//!             operations: vec![StringOp::Trim, StringOp::Lowercase],
//!             validation: true,
//!             on_invalid: InvalidPolicy::Blank,
//!         },
//!     )
//!     .with_rule("salary", RuleSpec::OutlierCapping { multiplier: 1.5 });
//! assert_eq!(rules.len(), 3);
//! ```

pub mod engine;

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{CleanError, CleanResult};
use crate::types::Schema;

pub use engine::{apply_rule, is_email_column, is_valid_email, ColumnOutcome, VariantLookup};

/// Default IQR fence multiplier `k`.
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

/// How `missing_impute` derives its dataset-wide value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImputeStrategy {
    /// Sum of present values divided by their count, from per-worker running sums.
    #[default]
    Mean,
    /// 50th percentile of all present values, from gathered order statistics.
    Median,
}

/// A single string operation, applied in the listed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    /// Unicode lowercase.
    Lowercase,
    /// Strip leading/trailing whitespace.
    Trim,
}

/// What happens to a row whose value fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidPolicy {
    /// Drop the whole row.
    #[default]
    DropRow,
    /// Keep the row and set the failing cell to [`crate::types::Value::Null`].
    Blank,
}

/// One declarative cleaning rule.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSpec {
    /// Replace missing entries with the global imputation value.
    MissingImpute { strategy: ImputeStrategy },
    /// Apply string operations in order, optionally validating email-like columns.
    StringNormalize {
        operations: Vec<StringOp>,
        validation: bool,
        on_invalid: InvalidPolicy,
    },
    /// Rewrite known variant spellings to their canonical form using a named dictionary.
    DictionaryReplace { dictionary: String },
    /// Clamp values into the global IQR fence `[Q1 - k*IQR, Q3 + k*IQR]`.
    OutlierCapping { multiplier: f64 },
}

impl RuleSpec {
    /// Rule kind name as it appears in rule files.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingImpute { .. } => "missing_impute",
            Self::StringNormalize { .. } => "string_normalize",
            Self::DictionaryReplace { .. } => "dictionary_replace",
            Self::OutlierCapping { .. } => "outlier_capping",
        }
    }

    /// Whether the aggregator must compute a dataset-wide statistic for this rule.
    pub fn needs_statistics(&self) -> bool {
        matches!(self, Self::MissingImpute { .. } | Self::OutlierCapping { .. })
    }

    /// Whether workers must ship every present value (order statistics).
    pub fn needs_samples(&self) -> bool {
        matches!(
            self,
            Self::MissingImpute {
                strategy: ImputeStrategy::Median
            } | Self::OutlierCapping { .. }
        )
    }
}

/// A rule bound to a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRule {
    /// Target column.
    pub column: String,
    /// Rule to apply.
    pub spec: RuleSpec,
}

/// Ordered rule list. Rules run in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleConfig {
    rules: Vec<ColumnRule>,
}

impl RuleConfig {
    /// Create an empty rule list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule (builder style).
    pub fn with_rule(mut self, column: impl Into<String>, spec: RuleSpec) -> Self {
        self.push(column, spec);
        self
    }

    /// Append a rule.
    pub fn push(&mut self, column: impl Into<String>, spec: RuleSpec) {
        self.rules.push(ColumnRule {
            column: column.into(),
            spec,
        });
    }

    /// Rules in application order.
    pub fn rules(&self) -> &[ColumnRule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check the rules against a table schema.
    ///
    /// Rules on absent columns are skipped with a warning, unless the rule needs a dataset-wide
    /// statistic; that case is a fatal [`CleanError::Config`], as are unknown dictionaries,
    /// ambiguous dictionary variants and malformed multipliers.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found, in rule order.
    pub fn validate(&self, schema: &Schema, dictionaries: &Dictionaries) -> CleanResult<()> {
        for rule in &self.rules {
            let present = schema.index_of(&rule.column).is_some();
            if !present {
                if rule.spec.needs_statistics() {
                    return Err(CleanError::config(
                        &rule.column,
                        format!(
                            "column not found in table but required by {}",
                            rule.spec.kind()
                        ),
                    ));
                }
                warn!(
                    column = %rule.column,
                    kind = rule.spec.kind(),
                    "column not found in table; rule skipped"
                );
            }

            match &rule.spec {
                RuleSpec::DictionaryReplace { dictionary } => {
                    // Building the lookup also rejects ambiguous variants.
                    let _ = dictionaries.lookup(&rule.column, dictionary)?;
                }
                RuleSpec::OutlierCapping { multiplier } => {
                    if !multiplier.is_finite() || *multiplier < 0.0 {
                        return Err(CleanError::config(
                            &rule.column,
                            format!("outlier multiplier must be finite and >= 0, got {multiplier}"),
                        ));
                    }
                }
                RuleSpec::MissingImpute { .. } | RuleSpec::StringNormalize { .. } => {}
            }
        }
        Ok(())
    }
}

/// Canonical value -> known variant spellings.
pub type Dictionary = BTreeMap<String, Vec<String>>;

/// Named dictionaries referenced by `dictionary_replace` rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionaries {
    entries: BTreeMap<String, Dictionary>,
}

impl Dictionaries {
    /// Create an empty dictionary set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dictionary (builder style).
    pub fn with_dictionary(mut self, name: impl Into<String>, dictionary: Dictionary) -> Self {
        self.insert(name, dictionary);
        self
    }

    /// Add or replace a dictionary.
    pub fn insert(&mut self, name: impl Into<String>, dictionary: Dictionary) {
        self.entries.insert(name.into(), dictionary);
    }

    /// Get a dictionary by name.
    pub fn get(&self, name: &str) -> Option<&Dictionary> {
        self.entries.get(name)
    }

    /// Number of dictionaries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no dictionaries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the variant -> canonical lookup for the dictionary used on `column`.
    ///
    /// # Errors
    ///
    /// [`CleanError::Config`] if `name` is unknown or a variant maps to two canonical values.
    pub fn lookup(&self, column: &str, name: &str) -> CleanResult<VariantLookup> {
        let dictionary = self.get(name).ok_or_else(|| {
            CleanError::config(column, format!("unknown dictionary '{name}'"))
        })?;
        VariantLookup::build(dictionary).map_err(|message| {
            CleanError::config(column, format!("dictionary '{name}': {message}"))
        })
    }
}
