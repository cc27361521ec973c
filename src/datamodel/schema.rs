//! Column listing and SQL access to a data model

use super::{fetch_datamodel, Datamodels};
use crate::client::{path_segment, with_query};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Label of the trailing row of [`Datamodels::get_row_count`]
pub const TOTAL_ROW_LABEL: &str = "total_row_count";

/// Name of a schema column type code
pub fn column_type_name(code: Option<i64>) -> &'static str {
    match code {
        Some(4) => "DateTime",
        Some(40) => "Double",
        Some(8) => "Integer",
        Some(0) => "BigInt",
        Some(18) => "Text",
        Some(5) => "Decimal",
        Some(6) => "Float",
        Some(13) => "Real",
        _ => "Unknown Type",
    }
}

/// One column of a data model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaColumnRow {
    pub datamodel_name: String,
    pub datamodel_type: String,
    pub dataset_name: String,
    pub table_name: String,
    pub column_name: String,
    pub column_type: String,
}

/// Row count of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowCountRow {
    pub table_name: String,
    pub row_count: i64,
}

impl Datamodels {
    /// Every column of every table with its type name
    pub async fn get_model_schema(&self, title: &str) -> Result<Vec<SchemaColumnRow>> {
        let model = fetch_datamodel(self.api(), title).await?;
        let datamodel_name = model.string_or("title", title);
        let datamodel_type = model.string_or("type", "");

        let mut rows = Vec::new();
        let mut table_count = 0;
        for dataset in model.array_field("datasets") {
            let dataset_name = dataset.string_or("name", "Unknown Dataset");
            let tables = dataset.get("schema").map(|s| s.array_field("tables")).unwrap_or(&[]);
            for table in tables {
                table_count += 1;
                let table_name = table.string_or("name", "Unknown Table");
                for column in table.array_field("columns") {
                    rows.push(SchemaColumnRow {
                        datamodel_name: datamodel_name.clone(),
                        datamodel_type: datamodel_type.clone(),
                        dataset_name: dataset_name.clone(),
                        table_name: table_name.clone(),
                        column_name: column.string_or("name", "Unknown Column"),
                        column_type: column_type_name(column.get("type").and_then(Value::as_i64)).to_string(),
                    });
                }
            }
        }

        info!(datamodel = %datamodel_name, tables = table_count, columns = rows.len(), "resolved model schema");
        Ok(rows)
    }

    /// Run SQL against a data model; defaults to `SELECT * FROM <table>`.
    /// Rows come back as header-keyed maps in column order.
    pub async fn get_data(
        &self,
        datamodel_name: &str,
        table_name: &str,
        query: Option<&str>,
    ) -> Result<Vec<Map<String, Value>>> {
        if datamodel_name.is_empty() || table_name.is_empty() {
            return Err(SdkError::invalid("data model name and table name are required"));
        }
        let default_query = format!("SELECT * FROM {}", table_name);
        let sql = query.unwrap_or(&default_query);
        let endpoint = with_query(
            &format!("/api/datasources/{}/sql", path_segment(datamodel_name)),
            &[("query", sql)],
        );

        let raw = self.api().get_json(&endpoint).await?;
        let headers: Vec<String> = raw
            .array_field("headers")
            .iter()
            .map(crate::utils::cell_text)
            .collect();
        let values = raw.array_field("values");
        if headers.is_empty() || values.is_empty() {
            warn!(datamodel = datamodel_name, table = table_name, "empty data received");
            return Ok(Vec::new());
        }

        let rows: Vec<Map<String, Value>> = values
            .iter()
            .map(|row| headers.iter().cloned().zip(row.as_list().iter().cloned()).collect())
            .collect();
        info!(datamodel = datamodel_name, table = table_name, rows = rows.len(), "retrieved data");
        Ok(rows)
    }

    /// Row count of every table, followed by a `total_row_count` row.
    /// Tables whose count cannot be read are skipped with a warning.
    pub async fn get_row_count(&self, title: &str) -> Result<Vec<RowCountRow>> {
        if title.is_empty() {
            return Err(SdkError::invalid("data model name is required"));
        }
        let model = fetch_datamodel(self.api(), title).await?;
        let tables: Vec<&str> = model
            .array_field("datasets")
            .iter()
            .flat_map(|d| d.get("schema").map(|s| s.array_field("tables")).unwrap_or(&[]))
            .filter_map(|t| t.str_field("name"))
            .collect();

        let mut counts = Vec::with_capacity(tables.len() + 1);
        let mut total = 0;
        for table in tables {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            let rows = match self.get_data(title, table, Some(&sql)).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(table, error = %e, "row count query failed, skipping");
                    continue;
                }
            };
            let count = match rows.as_slice() {
                [row] => row
                    .get("Column")
                    .or_else(|| row.values().next())
                    .and_then(Value::as_i64),
                _ => None,
            };
            match count {
                Some(count) => {
                    total += count;
                    counts.push(RowCountRow {
                        table_name: table.to_string(),
                        row_count: count,
                    });
                }
                None => warn!(table, "unexpected row count result, skipping"),
            }
        }

        counts.push(RowCountRow {
            table_name: TOTAL_ROW_LABEL.to_string(),
            row_count: total,
        });
        info!(datamodel = title, total, "collected row counts");
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use crate::datamodel::fixtures::commerce_schema;
    use serde_json::json;
    use std::sync::Arc;

    fn mock_with_schema() -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        mock.respond(HttpMethod::Get, "/api/v2/datamodels/schema?title=Commerce", 200, commerce_schema());
        mock
    }

    #[tokio::test]
    async fn test_get_model_schema() {
        let mock = mock_with_schema();
        let rows = Datamodels::new(mock.clone()).get_model_schema("Commerce").await.unwrap();
        let types: Vec<&str> = rows.iter().map(|r| r.column_type.as_str()).collect();
        assert_eq!(types, vec!["DateTime", "Decimal", "Unknown Type", "Text"]);
        assert_eq!(rows[3].table_name, "Customers");
        assert_eq!(rows[0].dataset_name, "Main");
    }

    #[tokio::test]
    async fn test_get_data() {
        let mock = mock_with_schema();
        mock.respond(
            HttpMethod::Get,
            "/api/datasources/Commerce/sql?query=SELECT * FROM Orders",
            200,
            json!({"headers": ["Region", "Amount"], "values": [["US", 10], ["CA", 4]]}),
        );
        let models = Datamodels::new(mock.clone());
        let rows = models.get_data("Commerce", "Orders", None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["Region"], "CA");
        assert_eq!(rows[0].keys().cloned().collect::<Vec<_>>(), vec!["Region", "Amount"]);

        assert!(models.get_data("", "Orders", None).await.is_err());
    }

    #[tokio::test]
    async fn test_get_row_count() {
        let mock = mock_with_schema();
        mock.respond(
            HttpMethod::Get,
            "/api/datasources/Commerce/sql?query=SELECT COUNT(*) FROM Orders",
            200,
            json!({"headers": ["Column"], "values": [[120]]}),
        );
        mock.respond(
            HttpMethod::Get,
            "/api/datasources/Commerce/sql?query=SELECT COUNT(*) FROM Customers",
            200,
            json!({"headers": ["Column"], "values": [[30]]}),
        );

        let counts = Datamodels::new(mock.clone()).get_row_count("Commerce").await.unwrap();
        assert_eq!(
            counts,
            vec![
                RowCountRow { table_name: "Orders".to_string(), row_count: 120 },
                RowCountRow { table_name: "Customers".to_string(), row_count: 30 },
                RowCountRow { table_name: TOTAL_ROW_LABEL.to_string(), row_count: 150 },
            ]
        );
    }
}
