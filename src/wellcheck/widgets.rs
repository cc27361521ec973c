//! Widget counts per dashboard

use super::Wellcheck;
use crate::error::Result;
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetCountRow {
    pub dashboard_id: String,
    pub dashboard_title: String,
    pub widget_count: usize,
}

/// Widget count of one dashboard definition, `None` when it has no widgets
pub fn count_widgets(definition: &Value, fallback_title: &str) -> Option<WidgetCountRow> {
    let widgets = definition.array_field("widgets");
    if widgets.is_empty() {
        warn!(dashboard = %fallback_title, "no widgets found");
        return None;
    }
    Some(WidgetCountRow {
        dashboard_id: definition.string_or("oid", ""),
        dashboard_title: definition.string_or("title", fallback_title),
        widget_count: widgets.len(),
    })
}

impl Wellcheck {
    /// Number of widgets on each dashboard. Dashboards without widgets are left out.
    pub async fn check_dashboard_widget_counts(&self, refs: &[String]) -> Result<Vec<WidgetCountRow>> {
        let rows: Vec<WidgetCountRow> = self
            .load_dashboards(refs)
            .await?
            .iter()
            .filter_map(|(title, definition)| count_widgets(definition, title))
            .collect();
        info!(
            dashboards = rows.len(),
            widgets = rows.iter().map(|r| r.widget_count).sum::<usize>(),
            "widget count check complete"
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

    #[tokio::test]
    async fn test_widget_counts() {
        let mock = Arc::new(MockTransport::new());
        register(
            &mock,
            json!({"oid": SALES_OID, "title": "Sales", "widgets": [{"oid": "w1"}, {"oid": "w2"}, {"oid": "w3"}]}),
        );
        let rows = Wellcheck::new(mock.clone())
            .check_dashboard_widget_counts(&[SALES_OID.to_string()])
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![WidgetCountRow {
                dashboard_id: SALES_OID.to_string(),
                dashboard_title: "Sales".to_string(),
                widget_count: 3,
            }]
        );
    }

    #[tokio::test]
    async fn test_empty_dashboard_left_out() {
        let mock = Arc::new(MockTransport::new());
        register(&mock, json!({"oid": SALES_OID, "title": "Sales", "widgets": []}));
        let rows = Wellcheck::new(mock.clone())
            .check_dashboard_widget_counts(&[SALES_OID.to_string()])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
