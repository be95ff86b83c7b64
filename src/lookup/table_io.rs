//! Table I/O for identifier lists and lookup results
//!
//! Identifier lists come from CSV (header row, comma-delimited) or JSON
//! (array of objects). Results are written as CSV.

use crate::error::{RegistryError, Result};
use crate::lookup::resolver::LookupResult;
use csv::{ReaderBuilder, WriterBuilder};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;

/// Header of the results table
pub const RESULT_COLUMNS: [&str; 5] = ["Documento Input", "RUC Validado", "Razon Social", "Estado", "Condicion"];

const OUTPUT_SUFFIX: &str = "_PROCESADO";

fn column_matches(header: &str, column: &str) -> bool {
    header.trim().eq_ignore_ascii_case(column.trim())
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Read the identifier column of a CSV or JSON table.
///
/// CSV cells are returned as strings so leading zeros survive; JSON values
/// keep their type. Rows without the column yield `Null`.
pub fn read_identifier_column(path: &Path, column: &str) -> Result<Vec<Value>> {
    let values = if is_json(path) {
        read_json_column(path, column)?
    } else {
        read_csv_column(path, column)?
    };
    info!("Read {} identifiers from {}", values.len(), path.display());
    Ok(values)
}

fn read_csv_column(path: &Path, column: &str) -> Result<Vec<Value>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| RegistryError::Input(format!("Failed to open {}: {}", path.display(), e)))?;

    let index = reader
        .headers()?
        .iter()
        .position(|h| column_matches(h.trim_start_matches('\u{feff}'), column))
        .ok_or_else(|| RegistryError::Input(format!("Column '{}' not found in {}", column, path.display())))?;

    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        values.push(match record.get(index) {
            Some(cell) => Value::String(cell.to_string()),
            None => Value::Null,
        });
    }
    Ok(values)
}

fn read_json_column(path: &Path, column: &str) -> Result<Vec<Value>> {
    let file = File::open(path)
        .map_err(|e| RegistryError::Input(format!("Failed to open {}: {}", path.display(), e)))?;
    let document: Value = serde_json::from_reader(BufReader::new(file))?;

    let rows = match document {
        Value::Array(rows) => rows,
        _ => {
            return Err(RegistryError::Input(format!(
                "{} must hold an array of objects",
                path.display()
            )))
        }
    };

    let mut seen_column = false;
    let mut values = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        let Value::Object(mut fields) = row else {
            return Err(RegistryError::Input(format!("Row {} of {} is not an object", i, path.display())));
        };
        let key = fields.keys().find(|k| column_matches(k, column)).cloned();
        match key.and_then(|k| fields.remove(&k)) {
            Some(value) => {
                seen_column = true;
                values.push(value);
            }
            None => values.push(Value::Null),
        }
    }

    if !values.is_empty() && !seen_column {
        return Err(RegistryError::Input(format!("Column '{}' not found in {}", column, path.display())));
    }
    Ok(values)
}

/// `<stem>_PROCESADO.csv` next to `input`
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resultado".to_string());
    input.with_file_name(format!("{}{}.csv", stem, OUTPUT_SUFFIX))
}

/// Write results as CSV, header first, one row per result
pub fn write_results(path: &Path, results: &[LookupResult]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(RESULT_COLUMNS)?;
    for result in results {
        writer.serialize(result.to_row())?;
    }
    writer.flush()?;
    info!("Wrote {} results to {}", results.len(), path.display());
    Ok(())
}
