//! Data model columns and their use across dashboards

use super::AccessManagement;
use crate::client::{path_segment, with_query};
use crate::dashboard::{collect_dims, used_columns, Dashboards};
use crate::datamodel::datamodel_oid;
use crate::error::Result;
use crate::utils::ValueExt;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, warn};

/// One column of a data model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRow {
    pub datamodel_id: String,
    pub datamodel_name: String,
    pub table: String,
    pub column: String,
}

/// A column and whether any dashboard on the model references it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnUsageRow {
    #[serde(flatten)]
    pub column: ColumnRow,
    pub used: bool,
}

impl AccessManagement {
    /// Every column of every table in a data model
    pub async fn get_datamodel_columns(&self, datamodel_name: &str) -> Result<Vec<ColumnRow>> {
        let api = self.api();
        let datamodel_id = datamodel_oid(api, datamodel_name).await?;
        let datasets_url = format!("/api/v2/datamodels/{}/schema/datasets", path_segment(&datamodel_id));
        let datasets = api.get_json(&datasets_url).await?;
        let dataset_ids: Vec<&str> = datasets
            .as_list()
            .iter()
            .filter_map(|d| d.str_field("oid"))
            .collect();
        if dataset_ids.is_empty() {
            warn!(datamodel = datamodel_name, "data model has no datasets");
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        let mut table_count = 0;
        for dataset_id in &dataset_ids {
            let tables_url = format!("{}/{}/tables", datasets_url, path_segment(dataset_id));
            let tables = match api.get_json(&tables_url).await {
                Ok(tables) => tables,
                Err(e) => {
                    error!(dataset = dataset_id, error = %e, "failed to fetch tables");
                    continue;
                }
            };
            for table in tables.as_list() {
                let Some(table_name) = table.str_field("name") else {
                    warn!(dataset = dataset_id, "skipping table without a name");
                    continue;
                };
                table_count += 1;
                for column in table.array_field("columns") {
                    if let Some(column_name) = column.str_field("name") {
                        rows.push(ColumnRow {
                            datamodel_id: datamodel_id.clone(),
                            datamodel_name: datamodel_name.to_string(),
                            table: table_name.to_string(),
                            column: column_name.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            datamodel = datamodel_name,
            datasets = dataset_ids.len(),
            tables = table_count,
            columns = rows.len(),
            "collected data model columns"
        );
        Ok(rows)
    }

    /// Every column of a data model, flagged with whether a dashboard uses it.
    ///
    /// Usage covers dashboard filters (plain and multi-level) and widget
    /// panel items, formula contexts included.
    pub async fn get_unused_columns(&self, datamodel_name: &str) -> Result<Vec<ColumnUsageRow>> {
        let columns = self.get_datamodel_columns(datamodel_name).await?;
        if columns.is_empty() {
            warn!(datamodel = datamodel_name, "no columns found");
            return Ok(Vec::new());
        }

        let listing = with_query(
            "/api/v1/dashboards/admin?dashboardType=owner",
            &[("datasourceTitle", datamodel_name)],
        );
        let linked = self.api().get_json(&listing).await?;
        let mut seen = HashSet::new();
        let dashboard_ids: Vec<&str> = linked
            .as_list()
            .iter()
            .filter_map(|d| d.str_field("oid"))
            .filter(|id| seen.insert(*id))
            .collect();
        info!(datamodel = datamodel_name, dashboards = dashboard_ids.len(), "dashboards on data model");

        let dashboards = Dashboards::new(self.api.clone());
        let mut used = HashSet::new();
        for dashboard_id in dashboard_ids {
            match dashboards.export_dashboard(dashboard_id).await {
                Ok(exported) => used.extend(used_columns(&collect_dims(&exported))),
                Err(e) => error!(dashboard = dashboard_id, error = %e, "failed to export dashboard"),
            }
        }

        let rows: Vec<ColumnUsageRow> = columns
            .into_iter()
            .map(|column| {
                let is_used = used.contains(&(column.table.clone(), column.column.clone()));
                ColumnUsageRow { column, used: is_used }
            })
            .collect();
        let used_count = rows.iter().filter(|r| r.used).count();
        info!(
            datamodel = datamodel_name,
            used = used_count,
            unused = rows.len() - used_count,
            "column usage computed"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use serde_json::json;
    use std::sync::Arc;

    fn model(mock: &MockTransport) {
        mock.respond(
            HttpMethod::Get,
            "/api/v2/datamodels/schema?title=Commerce",
            200,
            json!({"oid": "dm1", "title": "Commerce"}),
        );
        mock.respond(
            HttpMethod::Get,
            "/api/v2/datamodels/dm1/schema/datasets",
            200,
            json!([{"oid": "ds1"}]),
        );
        mock.respond(
            HttpMethod::Get,
            "/api/v2/datamodels/dm1/schema/datasets/ds1/tables",
            200,
            json!([
                {"name": "Orders", "columns": [{"name": "Date"}, {"name": "Amount"}, {"name": "Notes"}]},
                {"columns": [{"name": "Orphan"}]}
            ]),
        );
    }

    #[tokio::test]
    async fn test_get_datamodel_columns() {
        let mock = Arc::new(MockTransport::new());
        model(&mock);
        let access = AccessManagement::new(mock.clone());
        let columns = access.get_datamodel_columns("Commerce").await.unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].datamodel_id, "dm1");
        assert_eq!(columns[2].column, "Notes");
    }

    #[tokio::test]
    async fn test_get_unused_columns() {
        let mock = Arc::new(MockTransport::new());
        model(&mock);
        mock.respond(
            HttpMethod::Get,
            "/api/v1/dashboards/admin?dashboardType=owner&datasourceTitle=Commerce",
            200,
            json!([{"oid": "d1"}, {"oid": "d1"}]),
        );
        mock.respond(
            HttpMethod::Get,
            "/api/v1/dashboards/export?dashboardIds=d1&adminAccess=true",
            200,
            json!([{
                "title": "Sales",
                "filters": [{"jaql": {"dim": "[Orders.Date (Calendar)]"}}],
                "widgets": [{"oid": "w1", "metadata": {"panels": [{"items": [
                    {"jaql": {"formula": "SUM([a])", "context": {"[a]": {"dim": "[Orders.Amount]"}}}}
                ]}]}}]
            }]),
        );
        let access = AccessManagement::new(mock.clone());
        let usage = access.get_unused_columns("Commerce").await.unwrap();
        let flags: Vec<(&str, bool)> = usage.iter().map(|r| (r.column.column.as_str(), r.used)).collect();
        assert_eq!(flags, vec![("Date", true), ("Amount", true), ("Notes", false)]);
        assert_eq!(mock.count(HttpMethod::Get, "/api/v1/dashboards/export"), 1);

        let value = serde_json::to_value(&usage[2]).unwrap();
        assert_eq!(value["table"], "Orders");
        assert_eq!(value["used"], false);
    }
}
