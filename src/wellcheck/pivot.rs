//! Pivot widgets carrying more fields than a threshold

use super::Wellcheck;
use crate::error::Result;
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Field threshold used when none is given
pub const DEFAULT_MAX_PIVOT_FIELDS: usize = 20;

/// A pivot widget over the field threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PivotFieldRow {
    pub dashboard_id: String,
    pub dashboard_title: String,
    pub widget_id: String,
    pub field_count: usize,
}

/// Number of panel items on a widget
pub fn widget_field_count(widget: &Value) -> usize {
    widget
        .get("metadata")
        .map(|metadata| {
            metadata
                .array_field("panels")
                .iter()
                .map(|panel| panel.array_field("items").len())
                .sum()
        })
        .unwrap_or(0)
}

/// Pivot widgets of one dashboard definition with more than `max_fields` fields
pub fn pivot_fields(definition: &Value, fallback_title: &str, max_fields: usize) -> Vec<PivotFieldRow> {
    let title = definition.string_or("title", fallback_title);
    let Some(oid) = definition.str_field("oid") else {
        warn!(dashboard = %title, "dashboard definition has no OID");
        return Vec::new();
    };
    let widgets = definition.array_field("widgets");
    if widgets.is_empty() {
        warn!(dashboard = %title, oid, "dashboard has no widgets");
        return Vec::new();
    }

    let pivots: Vec<&Value> = widgets
        .iter()
        .filter(|w| w.str_field("type").unwrap_or("").contains("pivot"))
        .collect();
    if pivots.is_empty() {
        info!(dashboard = %title, oid, "no pivot widgets");
        return Vec::new();
    }

    pivots
        .into_iter()
        .filter_map(|widget| {
            let field_count = widget_field_count(widget);
            (field_count > max_fields).then(|| PivotFieldRow {
                dashboard_id: oid.to_string(),
                dashboard_title: title.clone(),
                widget_id: widget.string_or("oid", ""),
                field_count,
            })
        })
        .collect()
}

impl Wellcheck {
    /// Pivot widgets with more than `max_fields` fields across their panels
    pub async fn check_pivot_widget_fields(&self, refs: &[String], max_fields: usize) -> Result<Vec<PivotFieldRow>> {
        let loaded = self.load_dashboards(refs).await?;
        let rows: Vec<PivotFieldRow> = loaded
            .iter()
            .flat_map(|(title, definition)| pivot_fields(definition, title, max_fields))
            .collect();
        info!(
            dashboards = loaded.len(),
            max_fields,
            over_threshold = rows.len(),
            "pivot field check complete"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::wellcheck::fixtures::{register, SALES_OID};
    use serde_json::json;
    use std::sync::Arc;

    fn pivot(oid: &str, fields: usize) -> Value {
        let items: Vec<Value> = (0..fields).map(|i| json!({"field": format!("F{}", i)})).collect();
        json!({"oid": oid, "type": "pivot2", "metadata": {"panels": [{"items": items}]}})
    }

    #[test]
    fn test_widget_field_count_sums_panels() {
        let widget = json!({"metadata": {"panels": [
            {"items": [{}, {}]},
            {"items": [{}]},
            {"title": "filters"}
        ]}});
        assert_eq!(widget_field_count(&widget), 3);
        assert_eq!(widget_field_count(&json!({"oid": "w"})), 0);
    }

    #[tokio::test]
    async fn test_pivot_over_threshold_reported() {
        let mock = Arc::new(MockTransport::new());
        register(
            &mock,
            json!({
                "oid": SALES_OID,
                "title": "Pivot Field Dashboard",
                "widgets": [
                    pivot("W1", 21),
                    pivot("W3", 20),
                    {"oid": "W2", "type": "indicator", "metadata": {"panels": [{"items": [{"field": "X"}]}]}}
                ]
            }),
        );
        let rows = Wellcheck::new(mock.clone())
            .check_pivot_widget_fields(&[SALES_OID.to_string()], DEFAULT_MAX_PIVOT_FIELDS)
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![PivotFieldRow {
                dashboard_id: SALES_OID.to_string(),
                dashboard_title: "Pivot Field Dashboard".to_string(),
                widget_id: "W1".to_string(),
                field_count: 21,
            }]
        );
    }

    #[tokio::test]
    async fn test_threshold_is_configurable() {
        let mock = Arc::new(MockTransport::new());
        register(&mock, json!({"oid": SALES_OID, "title": "Sales", "widgets": [pivot("W1", 6)]}));
        let check = Wellcheck::new(mock.clone());
        let refs = [SALES_OID.to_string()];
        assert_eq!(check.check_pivot_widget_fields(&refs, 5).await.unwrap().len(), 1);
        assert!(check.check_pivot_widget_fields(&refs, 6).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_pivot_widgets() {
        let mock = Arc::new(MockTransport::new());
        register(
            &mock,
            json!({"oid": SALES_OID, "title": "No Pivot Dashboard", "widgets": [
                {"oid": "W1", "type": "chart", "metadata": {"panels": [{"items": [{"field": "A"}]}]}}
            ]}),
        );
        let rows = Wellcheck::new(mock.clone())
            .check_pivot_widget_fields(&[SALES_OID.to_string()], DEFAULT_MAX_PIVOT_FIELDS)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
