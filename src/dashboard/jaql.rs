//! Column references inside dashboard definitions
//!
//! Dashboards reference model columns through JAQL `dim` strings such as
//! `[Commerce.Date (Calendar)]`. These helpers pull every such reference
//! out of an exported dashboard: dashboard filters (plain and multi-level)
//! and widget panel items (plain and formula contexts).

use crate::utils::ValueExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Placeholder column name for a dim without a `.` separator
pub const UNKNOWN_COLUMN: &str = "Unknown Column";

const CALENDAR_SUFFIX: &str = " (Calendar)";

/// Where a column reference was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimSource {
    /// Dashboard-level filter
    Filter,
    /// Widget panel item
    Widget,
}

/// One column reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimRef {
    pub source: DimSource,
    pub widget_id: Option<String>,
    pub table: String,
    pub column: String,
}

/// Split `[Table.Column]` into table and column.
///
/// Brackets are trimmed and the split happens on the first `.`. Without a
/// `.` the column is [`UNKNOWN_COLUMN`].
pub fn parse_dim(dim: &str) -> (String, String) {
    let stripped = dim.trim_matches(|c| c == '[' || c == ']');
    match stripped.split_once('.') {
        Some((table, column)) => (table.to_string(), column.to_string()),
        None => (stripped.to_string(), UNKNOWN_COLUMN.to_string()),
    }
}

/// Drop the ` (Calendar)` suffix date dims carry
pub fn normalize_column(column: &str) -> &str {
    match column.strip_suffix(CALENDAR_SUFFIX) {
        Some(base) => base.trim(),
        None => column,
    }
}

fn dim_ref(source: DimSource, widget_id: Option<&str>, dim: &str) -> DimRef {
    let (table, column) = parse_dim(dim);
    DimRef {
        source,
        widget_id: widget_id.map(str::to_string),
        table,
        column,
    }
}

/// Every column reference in an exported dashboard
pub fn collect_dims(dashboard: &Value) -> Vec<DimRef> {
    let mut refs = Vec::new();

    for filter in dashboard.array_field("filters") {
        if let Some(levels) = filter.get("levels").and_then(Value::as_array) {
            for level in levels {
                if let Some(dim) = level.str_field("dim") {
                    refs.push(dim_ref(DimSource::Filter, None, dim));
                }
            }
        } else if let Some(dim) = filter.get("jaql").and_then(|j| j.str_field("dim")) {
            refs.push(dim_ref(DimSource::Filter, None, dim));
        }
    }

    for widget in dashboard.array_field("widgets") {
        let widget_id = widget.str_field("oid");
        let panels = widget
            .pointer("/metadata/panels")
            .map(Value::as_list)
            .unwrap_or(&[]);
        for panel in panels {
            for item in panel.array_field("items") {
                let Some(jaql) = item.get("jaql") else {
                    continue;
                };
                match jaql.get("context").and_then(Value::as_object) {
                    // Formula items reference their columns through the context map
                    Some(context) => {
                        for value in context.values() {
                            if let Some(dim) = value.str_field("dim") {
                                refs.push(dim_ref(DimSource::Widget, widget_id, dim));
                            }
                        }
                    }
                    None => {
                        if let Some(dim) = jaql.str_field("dim").filter(|d| !d.is_empty()) {
                            refs.push(dim_ref(DimSource::Widget, widget_id, dim));
                        }
                    }
                }
            }
        }
    }

    refs
}

/// Distinct `(table, column)` pairs, calendar suffix removed
pub fn used_columns(refs: &[DimRef]) -> HashSet<(String, String)> {
    refs.iter()
        .map(|r| (r.table.clone(), normalize_column(&r.column).to_string()))
        .collect()
}

/// First reference of each distinct column, in discovery order
pub fn distinct_refs(refs: Vec<DimRef>) -> Vec<DimRef> {
    let mut seen = HashSet::new();
    refs.into_iter()
        .filter(|r| seen.insert((r.table.clone(), normalize_column(&r.column).to_string())))
        .collect()
}
