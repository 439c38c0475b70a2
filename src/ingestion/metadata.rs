//! Rule file loading.
//!
//! The rule file is a JSON object with two sections:
//!
//! ```json
//! {
//!   "cleaning_config": {
//!     "age":     { "type": "missing_impute", "strategy": "mean" },
//!     "email":   { "type": "string_normalize", "operation": ["strip", "lower"], "validation": true },
//!     "country": { "type": "dictionary_replace", "dictionary_name": "countries" },
//!     "salary":  { "type": "outlier_capping", "method": "iqr_fence", "cap_value": 1.5 }
//!   },
//!   "dictionaries": { "countries": { "Mexico": ["mx", "méxico"] } }
//! }
//! ```
//!
//! Rules keep the order they appear in `cleaning_config`. Unknown rule types are skipped with
//! a warning; malformed parameters of a known type are a [`CleanError::Config`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::error::{CleanError, CleanResult};
use crate::rules::{
    Dictionaries, Dictionary, ImputeStrategy, InvalidPolicy, RuleConfig, RuleSpec, StringOp,
    DEFAULT_IQR_MULTIPLIER,
};

/// Rules and dictionaries loaded from a rule file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub rules: RuleConfig,
    pub dictionaries: Dictionaries,
}

#[derive(Debug, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    cleaning_config: Map<String, JsonValue>,
    #[serde(default)]
    dictionaries: BTreeMap<String, Dictionary>,
}

#[derive(Debug, Deserialize)]
struct ImputeParams {
    strategy: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct StringParams {
    operation: Option<OneOrMany>,
    #[serde(default)]
    validation: bool,
    on_invalid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DictionaryParams {
    dictionary_name: String,
}

#[derive(Debug, Deserialize)]
struct CappingParams {
    method: Option<String>,
    cap_value: Option<f64>,
}

/// Load a rule file from disk.
pub fn load_metadata_from_path(path: impl AsRef<Path>) -> CleanResult<Metadata> {
    let text = fs::read_to_string(path)?;
    load_metadata_from_str(&text)
}

/// Parse a rule file from an in-memory string.
pub fn load_metadata_from_str(input: &str) -> CleanResult<Metadata> {
    let file: MetadataFile = serde_json::from_str(input)?;

    let mut rules = RuleConfig::new();
    for (column, descriptor) in file.cleaning_config {
        let Some(kind) = descriptor.get("type").and_then(JsonValue::as_str) else {
            warn!(column = %column, "rule without a type; skipped");
            continue;
        };
        match parse_rule(&column, kind, &descriptor)? {
            Some(spec) => rules.push(column, spec),
            None => warn!(column = %column, kind, "unknown rule type; skipped"),
        }
    }

    let mut dictionaries = Dictionaries::new();
    for (name, dictionary) in file.dictionaries {
        dictionaries.insert(name, dictionary);
    }

    debug!(
        rules = rules.len(),
        dictionaries = dictionaries.len(),
        "rule file loaded"
    );
    Ok(Metadata { rules, dictionaries })
}

fn parse_rule(column: &str, kind: &str, descriptor: &JsonValue) -> CleanResult<Option<RuleSpec>> {
    let spec = match kind {
        "missing_impute" => {
            let p: ImputeParams = params(column, descriptor)?;
            let strategy = match p.strategy.as_deref() {
                None | Some("mean") => ImputeStrategy::Mean,
                Some("median") => ImputeStrategy::Median,
                Some(other) => {
                    return Err(CleanError::config(
                        column,
                        format!("unknown imputation strategy '{other}'"),
                    ));
                }
            };
            RuleSpec::MissingImpute { strategy }
        }
        "string_normalize" | "string_transform" => {
            let p: StringParams = params(column, descriptor)?;
            let names = match p.operation {
                None => Vec::new(),
                Some(OneOrMany::One(op)) => vec![op],
                Some(OneOrMany::Many(ops)) => ops,
            };
            let operations = names
                .iter()
                .map(|name| match name.as_str() {
                    "lower" | "lowercase" => Ok(StringOp::Lowercase),
                    "strip" | "trim" => Ok(StringOp::Trim),
                    other => Err(CleanError::config(
                        column,
                        format!("unknown string operation '{other}'"),
                    )),
                })
                .collect::<CleanResult<Vec<_>>>()?;
            let on_invalid = match p.on_invalid.as_deref() {
                None | Some("drop") => InvalidPolicy::DropRow,
                Some("blank") => InvalidPolicy::Blank,
                Some(other) => {
                    return Err(CleanError::config(
                        column,
                        format!("unknown on_invalid policy '{other}'"),
                    ));
                }
            };
            RuleSpec::StringNormalize {
                operations,
                validation: p.validation,
                on_invalid,
            }
        }
        "dictionary_replace" => {
            let p: DictionaryParams = params(column, descriptor)?;
            RuleSpec::DictionaryReplace {
                dictionary: p.dictionary_name,
            }
        }
        "outlier_capping" => {
            let p: CappingParams = params(column, descriptor)?;
            if let Some(method) = p.method.as_deref() {
                if method != "iqr_fence" {
                    return Err(CleanError::config(
                        column,
                        format!("unsupported outlier method '{method}'"),
                    ));
                }
            }
            RuleSpec::OutlierCapping {
                multiplier: p.cap_value.unwrap_or(DEFAULT_IQR_MULTIPLIER),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(spec))
}

fn params<T: for<'de> Deserialize<'de>>(column: &str, descriptor: &JsonValue) -> CleanResult<T> {
    T::deserialize(descriptor).map_err(|e| CleanError::config(column, e.to_string()))
}
