//! JSON to table flattening and CSV export
//!
//! Objects are flattened with nested keys joined by `.`. A list of
//! scalars becomes a single `Column_A` column. Mixed lists are rejected.

use super::json::cell_text;
use crate::error::{Result, SdkError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

/// Column name used when flattening a list of scalars
pub const SCALAR_COLUMN: &str = "Column_A";

/// Flat rows with a shared header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Column names in first-seen order
    pub headers: Vec<String>,
    /// Cells, one inner vector per row, aligned with `headers`
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.headers.iter().position(|h| h == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    fn from_records(records: Vec<Vec<(String, Value)>>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for record in &records {
            for (key, _) in record {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
        let rows = records
            .into_iter()
            .map(|record| {
                let mut row = vec![Value::Null; headers.len()];
                for (key, value) in record {
                    if let Some(idx) = headers.iter().position(|h| *h == key) {
                        row[idx] = value;
                    }
                }
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Write the table as CSV to any writer
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        if !self.headers.is_empty() {
            csv.write_record(&self.headers)?;
        }
        for row in &self.rows {
            csv.write_record(row.iter().map(cell_text))?;
        }
        csv.flush().map_err(|e| SdkError::Csv(e.to_string()))?;
        Ok(())
    }

    /// Write the table to a CSV file
    pub fn to_csv_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|e| SdkError::io(path, e))?;
        self.write_csv(file)?;
        info!(path = %path.display(), rows = self.len(), "exported CSV");
        Ok(())
    }

    /// Render as aligned plain text columns
    pub fn render_text(&self) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(cell_text).collect())
            .collect();
        let widths: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                cells
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(h.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let line = |values: &[String]| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut out = line(&self.headers);
        for row in &cells {
            out.push('\n');
            out.push_str(&line(row));
        }
        out
    }
}

fn flatten_object(prefix: Option<&str>, object: &Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in object {
        let name = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_object(Some(&name), inner, out),
            other => out.push((name, other.clone())),
        }
    }
}

/// Flatten a JSON document into a [`Table`]
pub fn flatten(data: &Value) -> Result<Table> {
    match data {
        Value::Object(object) => {
            let mut record = Vec::new();
            flatten_object(None, object, &mut record);
            Ok(Table::from_records(vec![record]))
        }
        Value::Array(items) => {
            let objects = items.iter().filter(|v| v.is_object()).count();
            if objects == items.len() {
                let records = items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|object| {
                        let mut record = Vec::new();
                        flatten_object(None, object, &mut record);
                        record
                    })
                    .collect();
                Ok(Table::from_records(records))
            } else if objects == 0 {
                Ok(Table {
                    headers: vec![SCALAR_COLUMN.to_string()],
                    rows: items.iter().map(|v| vec![v.clone()]).collect(),
                })
            } else {
                Err(SdkError::invalid(
                    "cannot flatten a list that mixes objects and scalar values",
                ))
            }
        }
        _ => Err(SdkError::invalid(
            "only an object or a list can be flattened into rows",
        )),
    }
}

/// Serialize typed rows and flatten them
pub fn to_table<T: Serialize>(rows: &[T]) -> Result<Table> {
    flatten(&serde_json::to_value(rows)?)
}

/// Export typed rows to a CSV file
pub fn export_to_csv<T: Serialize>(rows: &[T], path: impl AsRef<Path>) -> Result<()> {
    to_table(rows)?.to_csv_file(path)
}
