//! `cleanstream` cleans an in-memory [`types::Table`] in parallel while producing the same
//! result for any number of workers.
//!
//! A run splits the table into contiguous partitions, one per worker, and goes through two
//! worker phases separated by a coordinator step:
//!
//! 1. each worker computes partial statistics for its partition (missing counts, sums,
//!    sampled values, row fingerprints)
//! 2. the coordinator consolidates them into a single [`aggregator::GlobalDecision`]
//!    (imputation values, duplicate row indices, outlier bounds)
//! 3. each worker applies that decision to its partition with the [`rules`] engine
//!
//! Cleaned partitions are concatenated back in global row order.
//!
//! ## Rule kinds
//!
//! - `missing_impute`: fill missing numeric cells with the dataset mean (or median)
//! - `string_normalize` / `string_transform`: ordered trim/lowercase, optional email check
//! - `dictionary_replace`: map known variant spellings to a canonical value
//! - `outlier_capping`: clamp to the IQR fence `[Q1 - k*IQR, Q3 + k*IQR]`
//!
//! Rows that are exact copies of an earlier row (ignoring identity columns such as an id) are
//! dropped; the row with the smallest global index survives.
//!
//! ## Quick example
//!
//! ```rust
//! use cleanstream::pipeline::{Pipeline, PipelineOptions};
//! use cleanstream::rules::{Dictionaries, ImputeStrategy, RuleConfig, RuleSpec};
//! use cleanstream::types::{DataType, Field, Schema, Table, Value};
//!
//! # fn main() -> Result<(), cleanstream::CleanError> {
//! let schema = Schema::new(vec![
//!     Field::new("id", DataType::Int64),
//!     Field::new("age", DataType::Int64),
//! ]);
//! let table = Table::new(
//!     schema,
//!     vec![
//!         vec![Value::Int64(1), Value::Null],
//!         vec![Value::Int64(2), Value::Int64(30)],
//!         vec![Value::Int64(3), Value::Null],
//!     ],
//! );
//! let rules = RuleConfig::new()
//!     .with_rule("age", RuleSpec::MissingImpute { strategy: ImputeStrategy::Mean });
//!
//! let pipeline = Pipeline::new(
//!     PipelineOptions::default()
//!         .with_workers(2)
//!         .with_identity_column("id"),
//! )?;
//! let out = pipeline.run(&table, &rules, &Dictionaries::new())?;
//!
//! // Rows 0 and 2 only differ by id, so row 2 is a duplicate.
//! assert_eq!(out.table.indices(), vec![0, 1]);
//! assert_eq!(out.table.value(0, "age"), Some(&Value::Float64(30.0)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: the coordinator, options, observer hooks and run report
//! - [`worker`]: per-partition phase 1 and phase 2
//! - [`aggregator`]: consolidation of partial statistics
//! - [`rules`]: rule configuration and the per-column rule engine
//! - [`ingestion`]: CSV and rule-file loaders, CSV writer
//! - [`types`]: schema, values, tables and partitions
//! - [`error`]: error types

pub mod aggregator;
pub mod error;
pub mod ingestion;
pub mod pipeline;
pub mod rules;
pub mod types;
pub mod worker;

pub use error::{CleanError, CleanResult};
pub use pipeline::{clean, CleanOutput, Pipeline, PipelineOptions};
