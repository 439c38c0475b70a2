//! Core data model shared by every pipeline stage.
//!
//! A [`Table`] is an ordered list of [`Row`]s. Each row carries a stable *global row index*
//! assigned once when the table is built; partitioning, cleaning and recombination never
//! renumber it. The aggregator uses that index to tell every worker exactly which rows to drop.

use std::fmt;

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
}

impl DataType {
    /// Returns `true` for [`DataType::Int64`] and [`DataType::Float64`].
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields describing the shape of every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns the field with the given name, if present.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns a copy of this schema with `name` retyped to `data_type`.
    ///
    /// Unknown names leave the schema unchanged.
    pub fn with_field_type(&self, name: &str, data_type: DataType) -> Self {
        let mut out = self.clone();
        if let Some(field) = out.fields.iter_mut().find(|f| f.name == name) {
            field.data_type = data_type;
        }
        out
    }
}

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value.
    ///
    /// `Int64` and non-NaN `Float64` values are numeric; everything else (including `NaN`)
    /// is not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    /// String view of a [`Value::Utf8`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Utf8(s) => f.write_str(s),
        }
    }
}

/// One row of a [`Table`] together with its global row index.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Global row index, assigned once at load time.
    pub index: usize,
    /// Cells in schema order.
    pub values: Vec<Value>,
}

impl Row {
    /// Create a row.
    pub fn new(index: usize, values: Vec<Value>) -> Self {
        Self { index, values }
    }
}

/// In-memory tabular dataset.
///
/// Rows are kept in ascending global-index order.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row storage.
    pub rows: Vec<Row>,
}

impl Table {
    /// Create a table from raw rows, assigning global indices `0..n` in order.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(index, values)| Row::new(index, values))
            .collect();
        Self { schema, rows }
    }

    /// Create a table from rows that already carry their global indices.
    pub fn from_rows(schema: Schema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Global indices of all rows, in storage order.
    pub fn indices(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.index).collect()
    }

    /// Look up a row by its global index.
    pub fn row_by_index(&self, index: usize) -> Option<&Row> {
        self.rows
            .binary_search_by_key(&index, |r| r.index)
            .ok()
            .and_then(|pos| self.rows.get(pos))
    }

    /// Look up a cell by global row index and column name.
    pub fn value(&self, index: usize, column: &str) -> Option<&Value> {
        let col = self.schema.index_of(column)?;
        self.row_by_index(index)?.values.get(col)
    }

    /// All cells of one column, in row order.
    pub fn column(&self, column: &str) -> Option<Vec<&Value>> {
        let col = self.schema.index_of(column)?;
        Some(self.rows.iter().filter_map(|r| r.values.get(col)).collect())
    }
}

/// A contiguous, non-overlapping slice of a [`Table`] owned by one worker for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Partition id; ascending ids cover ascending global indices.
    pub id: usize,
    /// Member rows, in ascending global-index order.
    pub rows: Vec<Row>,
}

impl Partition {
    /// Create a partition.
    pub fn new(id: usize, rows: Vec<Row>) -> Self {
        Self { id, rows }
    }

    /// Number of member rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the partition holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Global indices of the member rows.
    pub fn indices(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.index).collect()
    }
}
