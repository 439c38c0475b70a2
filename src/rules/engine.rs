//! Rule engine: applies one [`RuleSpec`] to the values of one column of one partition.
//!
//! Handlers are pure. Dataset-wide inputs (imputation values, outlier bounds) come from the
//! [`GlobalDecision`]; a handler whose decision entry is absent leaves the column untouched.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::aggregator::{Bounds, GlobalDecision};
use crate::error::CleanResult;
use crate::types::Value;

use super::{Dictionaries, Dictionary, InvalidPolicy, RuleSpec, StringOp};

static EMAIL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$").expect("Invalid regex: email")
});

/// Result of applying a rule to one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnOutcome {
    /// New column values, same length and order as the input.
    pub values: Vec<Value>,
    /// Positions (within the input) of rows that must be dropped.
    pub rejected: Vec<usize>,
    /// Number of cells whose value changed.
    pub changed: usize,
}

impl ColumnOutcome {
    fn unchanged(values: Vec<Value>) -> Self {
        Self {
            values,
            rejected: Vec::new(),
            changed: 0,
        }
    }
}

/// Apply `spec` to `values`, the cells of `column` within one partition.
///
/// # Errors
///
/// [`crate::CleanError::Config`] if a `dictionary_replace` rule names an unknown or ambiguous
/// dictionary. [`RuleConfig::validate`](super::RuleConfig::validate) rejects those before
/// dispatch, so a validated run never hits this.
pub fn apply_rule(
    column: &str,
    values: Vec<Value>,
    spec: &RuleSpec,
    decision: &GlobalDecision,
    dictionaries: &Dictionaries,
) -> CleanResult<ColumnOutcome> {
    let outcome = match spec {
        RuleSpec::MissingImpute { .. } => impute(values, decision.imputation_value(column)),
        RuleSpec::StringNormalize {
            operations,
            validation,
            on_invalid,
        } => {
            let validate = *validation && is_email_column(column);
            normalize(values, operations, validate, *on_invalid)
        }
        RuleSpec::DictionaryReplace { dictionary } => {
            let lookup = dictionaries.lookup(column, dictionary)?;
            replace(values, &lookup)
        }
        RuleSpec::OutlierCapping { .. } => cap(values, decision.bounds(column)),
    };
    Ok(outcome)
}

fn impute(mut values: Vec<Value>, fill: Option<f64>) -> ColumnOutcome {
    let Some(fill) = fill else {
        return ColumnOutcome::unchanged(values);
    };
    let mut changed = 0;
    for value in &mut values {
        *value = match value.as_f64() {
            Some(v) => Value::Float64(v),
            None => {
                changed += 1;
                Value::Float64(fill)
            }
        };
    }
    ColumnOutcome {
        values,
        rejected: Vec::new(),
        changed,
    }
}

fn cap(mut values: Vec<Value>, bounds: Option<Bounds>) -> ColumnOutcome {
    let Some(bounds) = bounds else {
        return ColumnOutcome::unchanged(values);
    };
    let mut changed = 0;
    for value in &mut values {
        let next = match value.as_f64() {
            Some(v) => {
                let clamped = bounds.clamp(v);
                if clamped != v {
                    changed += 1;
                }
                Value::Float64(clamped)
            }
            // Non-numeric cells in a capped column count as missing.
            None => {
                if !value.is_null() {
                    changed += 1;
                }
                Value::Null
            }
        };
        *value = next;
    }
    ColumnOutcome {
        values,
        rejected: Vec::new(),
        changed,
    }
}

fn normalize(
    mut values: Vec<Value>,
    operations: &[StringOp],
    validate: bool,
    on_invalid: InvalidPolicy,
) -> ColumnOutcome {
    let mut rejected = Vec::new();
    let mut changed = 0;
    for (pos, value) in values.iter_mut().enumerate() {
        let Some(current) = value.as_str() else {
            continue;
        };
        let mut next = current.to_string();
        for op in operations {
            next = match op {
                StringOp::Lowercase => next.to_lowercase(),
                StringOp::Trim => next.trim().to_string(),
            };
        }
        if validate && !is_valid_email(&next) {
            match on_invalid {
                InvalidPolicy::DropRow => rejected.push(pos),
                InvalidPolicy::Blank => {
                    *value = Value::Null;
                    changed += 1;
                    continue;
                }
            }
        }
        if value.as_str() != Some(next.as_str()) {
            *value = Value::Utf8(next);
            changed += 1;
        }
    }
    ColumnOutcome {
        values,
        rejected,
        changed,
    }
}

fn replace(mut values: Vec<Value>, lookup: &VariantLookup) -> ColumnOutcome {
    let mut changed = 0;
    for value in &mut values {
        let Some(current) = value.as_str() else {
            continue;
        };
        if let Some(canonical) = lookup.resolve(current) {
            if canonical != current {
                *value = Value::Utf8(canonical.to_string());
                changed += 1;
            }
        }
    }
    ColumnOutcome {
        values,
        rejected: Vec::new(),
        changed,
    }
}

/// Case-insensitive, whitespace-trimmed variant -> canonical lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantLookup {
    map: HashMap<String, String>,
}

impl VariantLookup {
    /// Build a lookup from a dictionary. Each canonical value also maps to itself.
    ///
    /// # Errors
    ///
    /// Returns a message if one spelling maps to two different canonical values.
    pub fn build(dictionary: &Dictionary) -> Result<Self, String> {
        let mut map: HashMap<String, String> = HashMap::new();
        for (canonical, variants) in dictionary {
            for spelling in std::iter::once(canonical).chain(variants) {
                let key = normalize_key(spelling);
                match map.get(&key) {
                    Some(existing) if existing != canonical => {
                        return Err(format!(
                            "variant '{spelling}' maps to both '{existing}' and '{canonical}'"
                        ));
                    }
                    Some(_) => {}
                    None => {
                        map.insert(key, canonical.clone());
                    }
                }
            }
        }
        Ok(Self { map })
    }

    /// Canonical form of `value`, if it is a known spelling.
    pub fn resolve(&self, value: &str) -> Option<&str> {
        self.map.get(&normalize_key(value)).map(String::as_str)
    }

    /// Number of known spellings.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if no spellings are known.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Conservative email-shape check (`local@domain.tld`).
pub fn is_valid_email(s: &str) -> bool {
    EMAIL_SHAPE.is_match(s)
}

/// Whether a column holds email-like values and is subject to validation.
pub fn is_email_column(column: &str) -> bool {
    column.to_ascii_lowercase().contains("email")
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::{apply_rule, is_valid_email, VariantLookup};
    use crate::aggregator::{Bounds, GlobalDecision};
    use crate::rules::{Dictionaries, Dictionary, ImputeStrategy, InvalidPolicy, RuleSpec, StringOp};
    use crate::types::Value;

    fn utf8(s: &str) -> Value {
        Value::Utf8(s.to_string())
    }

    fn decision() -> GlobalDecision {
        GlobalDecision {
            imputation: BTreeMap::from([("age".to_string(), 30.0)]),
            duplicates: BTreeSet::new(),
            bounds: BTreeMap::from([(
                "salary".to_string(),
                Bounds {
                    lower: 0.0,
                    upper: 100.0,
                },
            )]),
        }
    }

    fn countries() -> Dictionaries {
        let mut dict = Dictionary::new();
        dict.insert("Guatemala".to_string(), vec!["GT".to_string(), "Gutemala".to_string()]);
        dict.insert("Mexico".to_string(), vec!["MX".to_string(), "Mejico".to_string()]);
        Dictionaries::new().with_dictionary("country_mapping", dict)
    }

    #[test]
    fn impute_fills_missing_and_non_numeric() {
        let spec = RuleSpec::MissingImpute {
            strategy: ImputeStrategy::Mean,
        };
        let out = apply_rule(
            "age",
            vec![Value::Null, Value::Int64(40), utf8("forty")],
            &spec,
            &decision(),
            &Dictionaries::new(),
        )
        .unwrap();
        assert_eq!(
            out.values,
            vec![Value::Float64(30.0), Value::Float64(40.0), Value::Float64(30.0)]
        );
        assert_eq!(out.changed, 2);
    }

    #[test]
    fn impute_without_decision_is_noop() {
        let spec = RuleSpec::MissingImpute {
            strategy: ImputeStrategy::Mean,
        };
        let values = vec![Value::Null, Value::Int64(1)];
        let out =
            apply_rule("other", values.clone(), &spec, &decision(), &Dictionaries::new()).unwrap();
        assert_eq!(out.values, values);
        assert_eq!(out.changed, 0);
    }

    #[test]
    fn cap_clamps_into_bounds() {
        let spec = RuleSpec::OutlierCapping { multiplier: 1.5 };
        let out = apply_rule(
            "salary",
            vec![Value::Float64(-5.0), Value::Int64(50), Value::Float64(1e6), Value::Null],
            &spec,
            &decision(),
            &Dictionaries::new(),
        )
        .unwrap();
        assert_eq!(
            out.values,
            vec![
                Value::Float64(0.0),
                Value::Float64(50.0),
                Value::Float64(100.0),
                Value::Null
            ]
        );
        assert_eq!(out.changed, 2);
    }

    #[test]
    fn normalize_applies_operations_in_order() {
        let spec = RuleSpec::StringNormalize {
            operations: vec![StringOp::Lowercase, StringOp::Trim],
            validation: false,
            on_invalid: InvalidPolicy::DropRow,
        };
        let out = apply_rule(
            "name",
            vec![utf8("  Carlos Ruiz  "), utf8("ana"), Value::Null],
            &spec,
            &decision(),
            &Dictionaries::new(),
        )
        .unwrap();
        assert_eq!(out.values, vec![utf8("carlos ruiz"), utf8("ana"), Value::Null]);
        assert_eq!(out.changed, 1);
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn invalid_email_is_rejected_under_drop_policy() {
        let spec = RuleSpec::StringNormalize {
            operations: vec![StringOp::Lowercase],
            validation: true,
            on_invalid: InvalidPolicy::DropRow,
        };
        let out = apply_rule(
            "email",
            vec![utf8("MARIA@YAHOO.COM"), utf8("pedro@"), Value::Null],
            &spec,
            &decision(),
            &Dictionaries::new(),
        )
        .unwrap();
        assert_eq!(out.rejected, vec![1]);
        assert_eq!(out.values[0], utf8("maria@yahoo.com"));
    }

    #[test]
    fn invalid_email_is_blanked_under_blank_policy() {
        let spec = RuleSpec::StringNormalize {
            operations: vec![],
            validation: true,
            on_invalid: InvalidPolicy::Blank,
        };
        let out = apply_rule(
            "email",
            vec![utf8("juan@gmail.com"), utf8("invalido-email")],
            &spec,
            &decision(),
            &Dictionaries::new(),
        )
        .unwrap();
        assert!(out.rejected.is_empty());
        assert_eq!(out.values, vec![utf8("juan@gmail.com"), Value::Null]);
    }

    #[test]
    fn validation_ignored_on_non_email_column() {
        let spec = RuleSpec::StringNormalize {
            operations: vec![],
            validation: true,
            on_invalid: InvalidPolicy::DropRow,
        };
        let values = vec![utf8("not an email")];
        let out = apply_rule("name", values, &spec, &decision(), &Dictionaries::new()).unwrap();
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn dictionary_replace_is_case_insensitive_and_trimmed() {
        let spec = RuleSpec::DictionaryReplace {
            dictionary: "country_mapping".to_string(),
        };
        let out = apply_rule(
            "country",
            vec![utf8(" gt "), utf8("guatemala"), utf8("Mexico"), utf8("Peru"), Value::Null],
            &spec,
            &decision(),
            &countries(),
        )
        .unwrap();
        assert_eq!(
            out.values,
            vec![
                utf8("Guatemala"),
                utf8("Guatemala"),
                utf8("Mexico"),
                utf8("Peru"),
                Value::Null
            ]
        );
        assert_eq!(out.changed, 2);
    }

    #[test]
    fn ambiguous_variant_is_rejected() {
        let mut dict = Dictionary::new();
        dict.insert("A".to_string(), vec!["x".to_string()]);
        dict.insert("B".to_string(), vec!["X ".to_string()]);
        let err = VariantLookup::build(&dict).unwrap_err();
        assert!(err.contains("maps to both"));
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("ana@hotmail.com"));
        assert!(is_valid_email("first.last+tag@sub-domain.example.org"));
        assert!(!is_valid_email("pedro@"));
        assert!(!is_valid_email("invalido-email"));
        assert!(!is_valid_email("a b@c.com"));
    }
}
