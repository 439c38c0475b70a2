//! Loaders for the inputs a cleaning run consumes and the writer for its output.
//!
//! - [`csv`]: CSV file to [`crate::types::Table`] (schema inferred or given), and back
//! - [`metadata`]: JSON rule file to [`crate::rules::RuleConfig`] plus
//!   [`crate::rules::Dictionaries`]

pub mod csv;
pub mod metadata;

pub use self::csv::{read_csv_from_path, read_csv_with_schema, write_csv_to_path};
pub use self::metadata::{load_metadata_from_path, load_metadata_from_str, Metadata};
