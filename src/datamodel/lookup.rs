//! Data model and connection lookups

use super::{DatamodelType, Datamodels};
use crate::client::{path_segment, with_query, ApiTransport};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const ECM_ENDPOINT: &str = "/api/v2/ecm/";

const ELASTICUBES_METADATA: &str = "query elasticubesMetadata($tenantFilter: String, $isViewMode: Boolean) { \
elasticubesMetadata(tenantFilter: $tenantFilter, isViewMode: $isViewMode) { oid title type status sizeInMb } }";

/// Schema document of a data model by title
pub async fn fetch_datamodel(api: &dyn ApiTransport, title: &str) -> Result<Value> {
    let endpoint = with_query("/api/v2/datamodels/schema", &[("title", title)]);
    let found = api.get_json(&endpoint).await.map_err(|e| match e.status() {
        Some(404) => SdkError::not_found(format!("data model '{}'", title)),
        _ => e,
    })?;

    let model = match found {
        Value::Object(map) if !map.is_empty() => Value::Object(map),
        Value::Array(items) => items
            .into_iter()
            .find(|m| m.str_field("oid").is_some())
            .ok_or_else(|| SdkError::not_found(format!("data model '{}'", title)))?,
        _ => return Err(SdkError::not_found(format!("data model '{}'", title))),
    };
    debug!(title, oid = model.str_field("oid").unwrap_or_default(), "fetched data model");
    Ok(model)
}

/// OID of a data model by title
pub async fn datamodel_oid(api: &dyn ApiTransport, title: &str) -> Result<String> {
    let model = fetch_datamodel(api, title).await?;
    model
        .str_field("oid")
        .map(str::to_string)
        .ok_or_else(|| SdkError::not_found(format!("data model '{}' has no oid", title)))
}

/// Type of a fetched schema document
pub fn model_type(model: &Value) -> Result<DatamodelType> {
    let raw = model.str_field("type").unwrap_or_default();
    DatamodelType::parse(raw).ok_or_else(|| {
        SdkError::invalid(format!(
            "unsupported data model type '{}' for '{}'",
            raw,
            model.str_field("title").unwrap_or_default()
        ))
    })
}

/// Entry of the elasticube metadata listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatamodelSummary {
    pub oid: String,
    pub title: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub status: String,
    #[serde(rename = "sizeInMb")]
    pub size_in_mb: Option<f64>,
}

impl DatamodelSummary {
    fn from_metadata(entry: &Value) -> Self {
        let statuses: Vec<&str> = match entry.get("status") {
            Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(single)) => vec![single.as_str()],
            _ => Vec::new(),
        };
        let status = if statuses.contains(&"building") {
            "building"
        } else {
            statuses.first().copied().unwrap_or("unknown")
        };
        Self {
            oid: entry.string_or("oid", ""),
            title: entry.string_or("title", ""),
            model_type: entry.string_or("type", ""),
            status: status.to_string(),
            size_in_mb: entry
                .get("sizeInMb")
                .and_then(Value::as_f64)
                .map(|size| (size * 100.0).round() / 100.0),
        }
    }
}

impl Datamodels {
    /// Full schema document of one data model
    pub async fn get_datamodel(&self, title: &str) -> Result<Value> {
        fetch_datamodel(self.api(), title).await
    }

    /// Every data model with build status and size, from the ECM metadata query
    pub async fn get_all_datamodels(&self) -> Result<Vec<DatamodelSummary>> {
        let body = json!({ "query": ELASTICUBES_METADATA });
        let data = self.api().post_json(ECM_ENDPOINT, &body).await?;
        let entries = data
            .pointer("/data/elasticubesMetadata")
            .or_else(|| data.pointer("/data/data/elasticubesMetadata"))
            .and_then(Value::as_array)
            .ok_or_else(|| SdkError::unexpected(ECM_ENDPOINT, "missing elasticubesMetadata"))?;

        let models: Vec<DatamodelSummary> = entries.iter().map(DatamodelSummary::from_metadata).collect();
        info!(count = models.len(), "listed data models");
        Ok(models)
    }

    /// Connections matching a name. At least one match is required.
    pub async fn get_connection(&self, name: &str) -> Result<Vec<Value>> {
        let endpoint = with_query("/api/v2/connections", &[("name", name)]);
        let found = self.api().get_json(&endpoint).await?;
        let connections = found.as_list().to_vec();
        if connections.is_empty() {
            return Err(SdkError::not_found(format!("connection '{}'", name)));
        }
        debug!(name, matches = connections.len(), "found connection");
        Ok(connections)
    }

    /// Column layout of a source table as the connection sees it
    pub async fn get_table_schema(
        &self,
        connection_name: &str,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Value> {
        let connections = self.get_connection(connection_name).await?;
        let connection = &connections[0];
        let connection_id = connection
            .str_field("oid")
            .ok_or_else(|| SdkError::unexpected("/api/v2/connections", "connection without oid"))?;

        let endpoint = format!("/api/v1/connection/{}/table_schema_details", path_segment(connection_id));
        let body = json!({
            "provider": connection.get("provider").cloned().unwrap_or(Value::Null),
            "connectionData": {
                "connection": {"Database": database},
                "schema": schema,
                "table": table
            }
        });
        let details = self
            .api()
            .post_json(&endpoint, &body)
            .await
            .map_err(|e| e.with_context(format!("table schema of {}.{}.{}", database, schema, table)))?;
        debug!(table, columns = details.array_field("columns").len(), "fetched table schema");
        Ok(details)
    }
}
