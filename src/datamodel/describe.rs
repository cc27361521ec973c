//! Structural description of a data model

use super::{fetch_datamodel, DatamodelType, Datamodels};
use crate::error::Result;
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// A table as listed in a description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub table_name: String,
    pub table_type: String,
}

/// A dataset and its tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetInfo {
    pub dataset_id: Option<String>,
    pub dataset_name: String,
    pub provider: String,
    pub connection_name: String,
    pub tables: Vec<TableInfo>,
}

/// Nested description of one data model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatamodelDescription {
    pub name: String,
    pub id: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub datamodel_last_build_publish: Option<String>,
    pub datamodel_last_updated: String,
    pub datasets: Vec<DatasetInfo>,
}

/// One table of a data model with its dataset and model context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatamodelTableRow {
    pub datamodel_name: String,
    pub datamodel_id: String,
    pub datamodel_type: String,
    pub datamodel_last_build_publish: Option<String>,
    pub datamodel_last_updated: String,
    pub dataset_id: Option<String>,
    pub dataset_name: String,
    pub provider: String,
    pub connection_name: String,
    pub table_name: String,
    pub table_type: String,
}

impl DatamodelDescription {
    /// Read a schema document
    pub fn from_schema(model: &Value) -> Self {
        let model_type = model.string_or("type", "");
        // extract models report their last build, live ones their last publish
        let stamp_key = match DatamodelType::parse(&model_type) {
            Some(DatamodelType::Extract) => "lastBuildTime",
            _ => "lastPublishTime",
        };

        let datasets = model
            .array_field("datasets")
            .iter()
            .map(|dataset| {
                let connection = dataset.get("connection").filter(|c| c.is_object());
                let table_type = dataset.string_or("type", "Unknown Type");
                let tables = dataset
                    .get("schema")
                    .map(|s| s.array_field("tables"))
                    .unwrap_or(&[])
                    .iter()
                    .map(|t| TableInfo {
                        table_name: t.string_or("name", "Unknown Table"),
                        table_type: table_type.clone(),
                    })
                    .collect();
                DatasetInfo {
                    dataset_id: dataset.str_field("oid").map(str::to_string),
                    dataset_name: dataset.string_or("name", "Unknown Dataset"),
                    provider: connection
                        .map(|c| c.string_or("provider", "Unknown Provider"))
                        .unwrap_or_else(|| "Unknown Provider".to_string()),
                    connection_name: connection
                        .map(|c| c.string_or("name", "Unknown Connection"))
                        .unwrap_or_else(|| "Unknown Connection".to_string()),
                    tables,
                }
            })
            .collect();

        Self {
            name: model.string_or("title", ""),
            id: model.string_or("oid", ""),
            model_type,
            datamodel_last_build_publish: model.str_field(stamp_key).map(str::to_string),
            datamodel_last_updated: model.string_or("lastUpdated", ""),
            datasets,
        }
    }

    /// One row per table
    pub fn rows(&self) -> Vec<DatamodelTableRow> {
        self.datasets
            .iter()
            .flat_map(|dataset| {
                dataset.tables.iter().map(move |table| DatamodelTableRow {
                    datamodel_name: self.name.clone(),
                    datamodel_id: self.id.clone(),
                    datamodel_type: self.model_type.clone(),
                    datamodel_last_build_publish: self.datamodel_last_build_publish.clone(),
                    datamodel_last_updated: self.datamodel_last_updated.clone(),
                    dataset_id: dataset.dataset_id.clone(),
                    dataset_name: dataset.dataset_name.clone(),
                    provider: dataset.provider.clone(),
                    connection_name: dataset.connection_name.clone(),
                    table_name: table.table_name.clone(),
                    table_type: table.table_type.clone(),
                })
            })
            .collect()
    }
}

impl Datamodels {
    /// Nested description: datasets, connections and tables
    pub async fn describe_datamodel_raw(&self, title: &str) -> Result<DatamodelDescription> {
        let model = fetch_datamodel(self.api(), title).await?;
        let description = DatamodelDescription::from_schema(&model);
        info!(datamodel = title, datasets = description.datasets.len(), "described data model");
        Ok(description)
    }

    /// Flat description, one row per table
    pub async fn describe_datamodel(&self, title: &str) -> Result<Vec<DatamodelTableRow>> {
        let rows = self.describe_datamodel_raw(title).await?.rows();
        info!(datamodel = title, rows = rows.len(), "flattened data model");
        Ok(rows)
    }
}
