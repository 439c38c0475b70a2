//! CSV loading and writing.

use std::io::{self, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{CleanError, CleanResult};
use crate::types::{DataType, Field, Schema, Table, Value};

/// Load a CSV file into a [`Table`], inferring the schema.
///
/// Rules:
///
/// - CSV must have headers; every header becomes a column, in file order.
/// - Empty (or whitespace-only) cells are [`Value::Null`].
/// - A column is numeric if most of its non-empty cells parse as numbers, and `Int64` if all
///   of those are integers. Cells that do not parse in a numeric column stay
///   [`Value::Utf8`] so the cleaning run can report them.
pub fn read_csv_from_path(path: impl AsRef<Path>) -> CleanResult<Table> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    read_csv_from_reader(&mut rdr)
}

/// Load CSV data from an existing CSV reader, inferring the schema.
pub fn read_csv_from_reader<R: Read>(rdr: &mut csv::Reader<R>) -> CleanResult<Table> {
    let headers = rdr.headers()?.clone();
    let records = rdr
        .records()
        .collect::<Result<Vec<csv::StringRecord>, _>>()?;

    let fields = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let column = records.iter().map(|r| r.get(idx).unwrap_or(""));
            Field::new(name, infer_type(column))
        })
        .collect();
    let schema = Schema::new(fields);
    debug!(columns = schema.len(), rows = records.len(), "csv schema inferred");

    Ok(build_table(schema, &records, Some))
}

/// Load a CSV file with a known schema.
///
/// Headers must contain all schema fields (order can differ); extra headers are ignored.
/// Cells that do not parse as the field type are kept as [`Value::Utf8`].
pub fn read_csv_with_schema(path: impl AsRef<Path>, schema: &Schema) -> CleanResult<Table> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    read_csv_with_schema_from_reader(&mut rdr, schema)
}

/// Load CSV data from an existing CSV reader with a known schema.
pub fn read_csv_with_schema_from_reader<R: Read>(
    rdr: &mut csv::Reader<R>,
    schema: &Schema,
) -> CleanResult<Table> {
    let headers = rdr.headers()?.clone();

    // Map schema fields -> CSV column indexes (allows re-ordered CSV columns).
    let mut col_idxs = Vec::with_capacity(schema.len());
    for field in &schema.fields {
        match headers.iter().position(|h| h == field.name) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(CleanError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "missing required column '{}'. headers={:?}",
                        field.name,
                        headers.iter().collect::<Vec<_>>()
                    ),
                )));
            }
        }
    }

    let records = rdr
        .records()
        .collect::<Result<Vec<csv::StringRecord>, _>>()?;
    Ok(build_table(schema.clone(), &records, |idx| col_idxs.get(idx).copied()))
}

/// Write `table` as CSV to a file, header first, rows in table order.
pub fn write_csv_to_path(table: &Table, path: impl AsRef<Path>) -> CleanResult<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    write_csv_to_writer(table, &mut wtr)
}

/// Write `table` through an existing CSV writer and flush it.
///
/// [`Value::Null`] is written as an empty field. A blank [`Value::Utf8`] (empty or
/// whitespace-only) is written as-is, so reading the file back yields `Null` for it.
pub fn write_csv_to_writer<W: Write>(table: &Table, wtr: &mut csv::Writer<W>) -> CleanResult<()> {
    wtr.write_record(table.schema.field_names())?;
    for row in &table.rows {
        wtr.write_record(row.values.iter().map(Value::to_string))?;
    }
    wtr.flush()?;
    Ok(())
}

fn build_table(
    schema: Schema,
    records: &[csv::StringRecord],
    csv_index: impl Fn(usize) -> Option<usize>,
) -> Table {
    let rows = records
        .iter()
        .map(|record| {
            schema
                .fields
                .iter()
                .enumerate()
                .map(|(idx, field)| {
                    let raw = csv_index(idx).and_then(|i| record.get(i)).unwrap_or("");
                    parse_cell(field.data_type, raw)
                })
                .collect()
        })
        .collect();
    Table::new(schema, rows)
}

fn infer_type<'a>(cells: impl Iterator<Item = &'a str>) -> DataType {
    let mut non_empty = 0usize;
    let mut numeric = 0usize;
    let mut integral = true;
    for cell in cells.map(str::trim).filter(|c| !c.is_empty()) {
        non_empty += 1;
        if cell.parse::<i64>().is_ok() {
            numeric += 1;
        } else if cell.parse::<f64>().is_ok() {
            numeric += 1;
            integral = false;
        }
    }

    if non_empty == 0 || numeric * 2 <= non_empty {
        DataType::Utf8
    } else if integral {
        DataType::Int64
    } else {
        DataType::Float64
    }
}

fn parse_cell(data_type: DataType, raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }

    let parsed = match data_type {
        DataType::Utf8 => None,
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .ok()
            .or_else(|| trimmed.parse::<f64>().ok().map(Value::Float64)),
        DataType::Float64 => trimmed.parse::<f64>().ok().map(Value::Float64),
        DataType::Bool => parse_bool(trimmed).map(Value::Bool),
    };
    parsed.unwrap_or_else(|| Value::Utf8(raw.to_owned()))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &str) -> csv::Reader<&[u8]> {
        csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(data.as_bytes())
    }

    #[test]
    fn infers_numeric_columns_by_majority() {
        let data = "id,age,salary,name\n1,30,10.5,a\n2,,20,b\n3,n/a,30,c\n4,40,x,d\n";
        let table = read_csv_from_reader(&mut reader(data)).unwrap();

        let types: Vec<DataType> = table.schema.fields.iter().map(|f| f.data_type).collect();
        assert_eq!(
            types,
            vec![DataType::Int64, DataType::Int64, DataType::Float64, DataType::Utf8]
        );
        assert_eq!(table.value(1, "age"), Some(&Value::Null));
        assert_eq!(table.value(2, "age"), Some(&Value::Utf8("n/a".to_string())));
        assert_eq!(table.value(3, "salary"), Some(&Value::Utf8("x".to_string())));
        assert_eq!(table.value(0, "salary"), Some(&Value::Float64(10.5)));
    }

    #[test]
    fn string_cells_keep_surrounding_whitespace() {
        let table = read_csv_from_reader(&mut reader("name\n\"  Ana  \"\n")).unwrap();
        assert_eq!(table.value(0, "name"), Some(&Value::Utf8("  Ana  ".to_string())));
    }

    #[test]
    fn explicit_schema_reorders_and_keeps_bad_cells() {
        let schema = Schema::new(vec![
            Field::new("b", DataType::Float64),
            Field::new("a", DataType::Bool),
        ]);
        let mut rdr = reader("a,b\nyes,1.5\nmaybe,oops\n");
        let table = read_csv_with_schema_from_reader(&mut rdr, &schema).unwrap();
        assert_eq!(table.rows[0].values, vec![Value::Float64(1.5), Value::Bool(true)]);
        assert_eq!(
            table.rows[1].values,
            vec![Value::Utf8("oops".to_string()), Value::Utf8("maybe".to_string())]
        );
    }

    #[test]
    fn missing_schema_column_is_an_error() {
        let schema = Schema::new(vec![Field::new("c", DataType::Utf8)]);
        let err = read_csv_with_schema_from_reader(&mut reader("a,b\n1,2\n"), &schema).unwrap_err();
        assert!(err.to_string().contains("missing required column 'c'"));
    }

    #[test]
    fn writes_header_and_empty_nulls() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("age", DataType::Float64),
        ]);
        let table = Table::new(
            schema,
            vec![
                vec![Value::Int64(1), Value::Float64(30.0)],
                vec![Value::Int64(2), Value::Null],
            ],
        );
        let mut wtr = csv::Writer::from_writer(Vec::new());
        write_csv_to_writer(&table, &mut wtr).unwrap();
        let text = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
        assert_eq!(text, "id,age\n1,30\n2,\n");
    }

    #[test]
    fn blank_text_reads_back_as_null() {
        let schema = Schema::new(vec![Field::new("note", DataType::Utf8)]);
        let table = Table::new(
            schema.clone(),
            vec![
                vec![Value::Utf8(String::new())],
                vec![Value::Utf8("  ".to_string())],
                vec![Value::Utf8(" x ".to_string())],
            ],
        );
        let mut wtr = csv::Writer::from_writer(Vec::new());
        write_csv_to_writer(&table, &mut wtr).unwrap();
        let bytes = wtr.into_inner().unwrap();

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes.as_slice());
        let back = read_csv_with_schema_from_reader(&mut rdr, &schema).unwrap();
        assert_eq!(back.value(0, "note"), Some(&Value::Null));
        assert_eq!(back.value(1, "note"), Some(&Value::Null));
        assert_eq!(back.value(2, "note"), Some(&Value::Utf8(" x ".to_string())));
    }
}
