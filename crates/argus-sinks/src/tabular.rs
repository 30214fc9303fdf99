//! Tabular export: flattens a result payload into delimited text.
//!
//! Arrays become repeated rows tagged by their source key. Cells that a
//! spreadsheet would interpret as a formula are neutralized.

use std::io::Write;

use serde_json::Value;

use argus_core::result::ScrapingResult;

use crate::SinkError;

/// One flattened row: the source key and one stringified value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub field: String,
    pub value: String,
}

/// Flatten the result data: scalars yield one row, arrays one row per
/// element (tagged by the source key), nulls one empty row.
pub fn flatten_rows(result: &ScrapingResult) -> Vec<Row> {
    let mut rows = Vec::new();
    for (field, value) in &result.data {
        match value {
            Value::Array(items) => {
                for item in items {
                    rows.push(Row {
                        field: field.clone(),
                        value: cell_text(item),
                    });
                }
            }
            other => rows.push(Row {
                field: field.clone(),
                value: cell_text(other),
            }),
        }
    }
    rows
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Neutralize spreadsheet formula injection: cells beginning with `=`, `+`,
/// `-`, `@`, or a control character get a leading apostrophe.
pub fn sanitize_cell(cell: &str) -> String {
    match cell.chars().next() {
        Some(c) if matches!(c, '=' | '+' | '-' | '@') || c.is_control() => format!("'{cell}"),
        _ => cell.to_string(),
    }
}

/// Write the flattened result as CSV with a `field,value` header.
pub fn write_csv<W: Write>(result: &ScrapingResult, writer: W) -> Result<(), SinkError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["field", "value"])?;
    for row in flatten_rows(result) {
        csv.write_record([sanitize_cell(&row.field), sanitize_cell(&row.value)])?;
    }
    csv.flush()?;
    Ok(())
}

/// Convenience: render the CSV into a string.
pub fn to_csv_string(result: &ScrapingResult) -> Result<String, SinkError> {
    let mut buffer = Vec::new();
    write_csv(result, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| SinkError::Format(e.to_string()))
}
