//! Creating connections, data models, datasets and tables, and deploying them

use super::{fetch_datamodel, model_type, DatamodelType, Datamodels};
use crate::client::{path_segment, ApiResponse};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

fn default_true() -> bool {
    true
}

fn default_sampling_level() -> String {
    "2".to_string()
}

/// Amazon Athena connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AthenaConnection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub region: String,
    pub s3_output_location: String,
    pub aws_access_key: String,
    pub aws_secret_key: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub additional_parameters: String,
}

/// Databricks connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabricksConnection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub connection_string: String,
    pub token: String,
    #[serde(default)]
    pub use_dynamic_schema: bool,
    #[serde(default)]
    pub schema: String,
}

/// Google BigQuery connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BigQueryConnection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub service_account_key_path: String,
    #[serde(default = "default_true")]
    pub use_service_account: bool,
    #[serde(default)]
    pub use_proxy_server: bool,
    #[serde(default)]
    pub use_dynamic_schema: bool,
    #[serde(default = "default_sampling_level")]
    pub record_field_flattening_level: String,
    #[serde(default)]
    pub unnest_arrays: bool,
    #[serde(default)]
    pub allow_large_results: bool,
    #[serde(default)]
    pub use_storage_api: bool,
    #[serde(default)]
    pub additional_parameters: String,
    #[serde(default)]
    pub database: String,
}

/// Amazon Redshift connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RedshiftConnection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub server: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub default_database: String,
    #[serde(default)]
    pub additional_parameters: String,
}

/// A connection to create, tagged by datasource type.
///
/// Deserializes from a map with a `type` key of `ATHENA`, `DATABRICKS`,
/// `BIGQUERY` or `REDSHIFT` plus the provider's settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ConnectionSpec {
    Athena(AthenaConnection),
    Databricks(DatabricksConnection),
    BigQuery(BigQueryConnection),
    Redshift(RedshiftConnection),
}

impl ConnectionSpec {
    /// Build from a datasource type name (any case) and a settings map
    pub fn from_params(datasource_type: &str, params: &Value) -> Result<Self> {
        let kind = datasource_type.to_uppercase();
        if !["ATHENA", "DATABRICKS", "BIGQUERY", "REDSHIFT"].contains(&kind.as_str()) {
            return Err(SdkError::invalid(format!(
                "unsupported datasource type: {}",
                datasource_type
            )));
        }
        let mut tagged = params.as_object().cloned().unwrap_or_default();
        tagged.insert("type".to_string(), Value::String(kind.clone()));
        serde_json::from_value(Value::Object(tagged)).map_err(|e| {
            SdkError::invalid(format!("missing or invalid {} connection parameter: {}", kind, e))
        })
    }

    /// Connection name
    pub fn name(&self) -> &str {
        match self {
            Self::Athena(c) => &c.name,
            Self::Databricks(c) => &c.name,
            Self::BigQuery(c) => &c.name,
            Self::Redshift(c) => &c.name,
        }
    }
}

/// Request body for `POST /api/v2/connections`
pub fn connection_payload(spec: &ConnectionSpec) -> Value {
    let (provider, description, parameters) = match spec {
        ConnectionSpec::Athena(c) => (
            "athena",
            &c.description,
            json!({
                "Basic": true,
                "AwsRegion": c.region,
                "S3OutputLocation": c.s3_output_location,
                "userName": c.aws_access_key,
                "password": c.aws_secret_key,
                "UseDynamicSchema": false,
                "SchemaName": c.schema,
                "AdditionalParameters": c.additional_parameters,
                "advance": false,
                "EC2Instance": false
            }),
        ),
        ConnectionSpec::Databricks(c) => (
            "Databricks",
            &c.description,
            json!({
                "connectionString": c.connection_string,
                "password": c.token,
                "UseDynamicSchema": c.use_dynamic_schema,
                "Schema": c.schema
            }),
        ),
        ConnectionSpec::BigQuery(c) => (
            "GoogleBigQuery",
            &c.description,
            json!({
                "googleAccount": false,
                "serviceAccount": c.use_service_account,
                "serviceAccountKeyPath": c.service_account_key_path,
                "UseProxyServer": c.use_proxy_server,
                "UseDynamicSchema": c.use_dynamic_schema,
                "samplingLevel": c.record_field_flattening_level,
                "unnestArrays": c.unnest_arrays,
                "allowLargeResults": c.allow_large_results,
                "useStorageApi": c.use_storage_api,
                "AdditionalParameters": c.additional_parameters,
                "DB": c.database
            }),
        ),
        ConnectionSpec::Redshift(c) => (
            "RedShift",
            &c.description,
            json!({
                "Server": c.server,
                "UserName": c.username,
                "Password": c.password,
                "DefaultDatabase": c.default_database,
                "UseDynamicSchema": false,
                "EncryptConnection": false,
                "AdditionalParameters": c.additional_parameters
            }),
        ),
    };
    json!({
        "enabled": true,
        "createdByUser": true,
        "provider": provider,
        "name": spec.name(),
        "description": description,
        "parameters": parameters,
        "supportedModelTypes": ["LIVE", "EXTRACT"]
    })
}

/// How an extract table is refreshed on build
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BuildBehavior {
    /// Full reload
    Replace,
    /// Reload only changed rows
    ReplaceChanges,
    /// Append every build
    Append,
    /// Append rows newer than the last stored value of a column
    Increment { column_name: String },
    /// Any other mode; built as a full reload
    #[serde(other)]
    Unknown,
}

impl BuildBehavior {
    /// `buildBehavior` object for the table PATCH. `table` is the created table,
    /// used to resolve the increment column to its OID.
    pub fn payload(&self, table: &Value) -> Result<Value> {
        let simple = |kind: &str| json!({"type": kind, "accumulativeConfig": null});
        Ok(match self {
            Self::Replace => simple("sync"),
            Self::ReplaceChanges => simple("ignoreIfExists"),
            Self::Append => simple("accumulativeSync"),
            Self::Increment { column_name } => {
                let column_id = table
                    .array_field("columns")
                    .iter()
                    .find(|c| c.str_field("name") == Some(column_name.as_str()))
                    .and_then(|c| c.str_field("oid"))
                    .ok_or_else(|| {
                        SdkError::invalid(format!(
                            "column '{}' not found in table '{}'",
                            column_name,
                            table.str_field("name").unwrap_or_default()
                        ))
                    })?;
                json!({
                    "type": "accumulativeSync",
                    "accumulativeConfig": {
                        "column": column_id,
                        "type": "lastStored",
                        "lastDays": null,
                        "keepOnlyDays": null
                    }
                })
            }
            Self::Unknown => {
                warn!("unknown build mode, defaulting to replace");
                simple("sync")
            }
        })
    }
}

/// A table to create inside a dataset
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TableSpec {
    pub table_name: String,
    #[serde(default, alias = "database_name")]
    pub database: Option<String>,
    #[serde(default, alias = "schema_name")]
    pub schema: Option<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub import_query: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, alias = "build_behavior_config")]
    pub build_behavior: Option<BuildBehavior>,
}

impl TableSpec {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, database: impl Into<String>, schema: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self.schema = Some(schema.into());
        self
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self
    }

    pub fn with_import_query(mut self, query: impl Into<String>) -> Self {
        self.import_query = Some(query.into());
        self
    }

    pub fn with_build_behavior(mut self, behavior: BuildBehavior) -> Self {
        self.build_behavior = Some(behavior);
        self
    }
}

/// Everything [`Datamodels::setup_datamodel`] creates in one go
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatamodelSetup {
    pub title: String,
    pub model_type: DatamodelType,
    pub connection_name: String,
    pub database: String,
    pub schema: String,
    #[serde(default)]
    pub dataset_name: Option<String>,
    pub tables: Vec<TableSpec>,
}

/// Ids produced by a setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupResult {
    pub datamodel_id: String,
    pub dataset_id: String,
    pub tables: Vec<String>,
}

/// Build kind for extract deployments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    /// Only schema changes
    SchemaChanges,
    /// Per-table build behaviour
    ByTable,
    /// Rebuild everything
    #[default]
    Full,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaChanges => "schema_changes",
            Self::ByTable => "by_table",
            Self::Full => "full",
        }
    }
}

/// Options for [`Datamodels::deploy_datamodel`]. Live models ignore all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    pub build_type: BuildType,
    /// 0 means no limit
    pub row_limit: u64,
    /// `latest` or `running`
    pub schema_origin: String,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            build_type: BuildType::Full,
            row_limit: 0,
            schema_origin: "latest".to_string(),
        }
    }
}

impl DeployOptions {
    pub fn with_build_type(mut self, build_type: BuildType) -> Self {
        self.build_type = build_type;
        self
    }

    pub fn with_row_limit(mut self, row_limit: u64) -> Self {
        self.row_limit = row_limit;
        self
    }

    pub fn with_schema_origin(mut self, origin: impl Into<String>) -> Self {
        self.schema_origin = origin.into();
        self
    }
}

/// Error from a creation endpoint, preferring the server's `detail` text
fn creation_error(endpoint: &str, response: &ApiResponse) -> SdkError {
    let detail = response
        .value()
        .ok()
        .and_then(|v| v.str_field("detail").map(str::to_string))
        .unwrap_or_else(|| response.text().to_string());
    SdkError::http(endpoint, response.status, detail)
}

/// Column entry of a table payload from a source column description
fn table_column(column: &Value) -> Value {
    let name = column.string_or("columnName", "UnknownColumn");
    let number = |key: &str| column.get(key).cloned().unwrap_or(json!(0));
    json!({
        "id": name,
        "name": name,
        "type": number("dbType"),
        "size": number("size"),
        "precision": number("precision"),
        "scale": number("scale"),
        "hidden": false,
        "indexed": true,
        "isUpsertBy": false,
        "description": null,
        "expression": null,
        "import": null,
        "isCustom": null
    })
}

/// Where a new table's data comes from
struct TableSource {
    dataset_id: String,
    database: String,
    schema: String,
    connection_name: String,
}

impl Datamodels {
    /// Create an empty data model and return its OID
    pub async fn create_datamodel(&self, title: &str, kind: DatamodelType) -> Result<String> {
        let endpoint = "/api/v2/datamodels";
        let body = json!({"title": title, "type": kind.as_str()});
        let created = self.api().post_json(endpoint, &body).await?;
        let oid = created
            .str_field("oid")
            .ok_or_else(|| SdkError::unexpected(endpoint, "created data model has no oid"))?;
        info!(title, oid, kind = %kind, "data model created");
        Ok(oid.to_string())
    }

    /// Create a connection
    pub async fn create_connection(&self, spec: &ConnectionSpec) -> Result<Value> {
        let endpoint = "/api/v2/connections";
        let response = self.api().post(endpoint, &connection_payload(spec)).await?;
        if response.status != 201 {
            error!(name = spec.name(), status = response.status, "failed to create connection");
            return Err(response.to_error(endpoint));
        }
        let created = response.value()?;
        info!(name = created.str_field("name").unwrap_or("Unknown"), "connection created");
        Ok(created)
    }

    /// Create a dataset on an existing connection. The dataset is named after
    /// the schema unless a name is given.
    pub async fn create_dataset(
        &self,
        datamodel_name: &str,
        connection_name: &str,
        database: &str,
        schema: &str,
        dataset_name: Option<&str>,
    ) -> Result<Value> {
        let model = fetch_datamodel(self.api(), datamodel_name).await?;
        let datamodel_id = model
            .str_field("oid")
            .ok_or_else(|| SdkError::not_found(format!("data model '{}' has no oid", datamodel_name)))?;
        let dataset_type = model
            .str_field("type")
            .ok_or_else(|| SdkError::invalid(format!("data model '{}' has no type", datamodel_name)))?;

        let connections = self.get_connection(connection_name).await?;
        let connection_id = connections[0].string_or("oid", "");
        let name = dataset_name.unwrap_or(schema);

        let endpoint = format!("/api/v2/datamodels/{}/schema/datasets", path_segment(datamodel_id));
        let body = json!({
            "name": name,
            "type": dataset_type,
            "connection": {"oid": connection_id},
            "database": database,
            "schemaName": schema
        });
        let response = self.api().post(&endpoint, &body).await?;
        if response.status != 201 {
            let err = creation_error(&endpoint, &response);
            error!(dataset = name, datamodel = datamodel_name, error = %err, "failed to create dataset");
            return Err(err);
        }
        let dataset = response.value()?;
        info!(
            dataset = name,
            datamodel = datamodel_name,
            oid = dataset.str_field("oid").unwrap_or_default(),
            "dataset created"
        );
        Ok(dataset)
    }

    async fn table_source(&self, model: &Value, datamodel_id: &str, table: &TableSpec) -> Result<TableSource> {
        let title = model.str_field("title").unwrap_or(datamodel_id);
        let (dataset_id, dataset) = match &table.dataset_id {
            Some(dataset_id) => {
                let endpoint = format!(
                    "/api/v2/datamodels/{}/schema/datasets/{}",
                    path_segment(datamodel_id),
                    path_segment(dataset_id)
                );
                let dataset = self.api().get_json(&endpoint).await?;
                (dataset_id.clone(), dataset)
            }
            None => {
                let datasets = model.array_field("datasets");
                if datasets.len() > 1 {
                    return Err(SdkError::invalid(format!(
                        "multiple datasets found in data model '{}'; provide a dataset id",
                        title
                    )));
                }
                let dataset = datasets
                    .first()
                    .cloned()
                    .ok_or_else(|| SdkError::invalid(format!("data model '{}' has no dataset", title)))?;
                let dataset_id = dataset
                    .str_field("oid")
                    .ok_or_else(|| SdkError::invalid(format!("no dataset id found in data model '{}'", title)))?
                    .to_string();
                (dataset_id, dataset)
            }
        };

        let pick = |given: &Option<String>, key: &str, what: &str| {
            given
                .clone()
                .or_else(|| dataset.str_field(key).map(str::to_string))
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    SdkError::invalid(format!("no {} found for table '{}'", what, table.table_name))
                })
        };
        let database = pick(&table.database, "database", "database name")?;
        let schema = pick(&table.schema, "schemaName", "schema name")?;
        let connection_name = dataset
            .get("connection")
            .and_then(|c| c.str_field("name"))
            .map(str::to_string)
            .ok_or_else(|| SdkError::invalid(format!("no connection name found in data model '{}'", title)))?;

        Ok(TableSource {
            dataset_id,
            database,
            schema,
            connection_name,
        })
    }

    /// Create a table from a source table's schema. Extract models with a build
    /// behaviour get a follow-up PATCH; the patched table is returned then.
    pub async fn create_table(&self, datamodel_name: &str, table: &TableSpec) -> Result<Value> {
        let model = fetch_datamodel(self.api(), datamodel_name).await?;
        let datamodel_id = model.string_or("oid", "");
        let kind = model_type(&model)?;
        let source = self.table_source(&model, &datamodel_id, table).await?;

        let table_schema = self
            .get_table_schema(&source.connection_name, &source.database, &source.schema, &table.table_name)
            .await?;
        let columns: Vec<Value> = table_schema.array_field("columns").iter().map(table_column).collect();

        let body = json!({
            "id": table.table_name,
            "name": table.table_name,
            "columns": columns,
            "hidden": false,
            "buildBehavior": {"type": "sync", "accumulativeConfig": null},
            "configOptions": table.import_query.as_ref().map(|q| json!({"importQuery": q})),
            "description": table.description,
            "tags": table.tags,
            "expression": null,
            "type": "base"
        });
        let endpoint = format!(
            "/api/v2/datamodels/{}/schema/datasets/{}/tables",
            path_segment(&datamodel_id),
            path_segment(&source.dataset_id)
        );
        let created = self.api().post(&endpoint, &body).await?.expect_status(&endpoint, &[201])?.value()?;
        let table_id = created.string_or("oid", "");
        info!(table = %table.table_name, datamodel = datamodel_name, oid = %table_id, "table created");

        let behavior = match (&table.build_behavior, kind) {
            (Some(behavior), DatamodelType::Extract) => behavior,
            _ => return Ok(created),
        };
        let patch = json!({ "buildBehavior": behavior.payload(&created)? });
        let table_url = format!("{}/{}", endpoint, path_segment(&table_id));
        let patched = self
            .api()
            .patch(&table_url, &patch)
            .await?
            .expect_status(&table_url, &[200])
            .map_err(|e| e.with_context(format!("build behaviour of table '{}'", table.table_name)))?
            .value()?;
        info!(table = %table.table_name, "table build behaviour updated");
        Ok(patched)
    }

    /// Create a data model, one dataset and its tables
    pub async fn setup_datamodel(&self, setup: &DatamodelSetup) -> Result<SetupResult> {
        if setup.tables.is_empty() {
            return Err(SdkError::invalid("no table definitions provided"));
        }
        let datamodel_id = self.create_datamodel(&setup.title, setup.model_type).await?;
        let dataset = self
            .create_dataset(
                &setup.title,
                &setup.connection_name,
                &setup.database,
                &setup.schema,
                setup.dataset_name.as_deref(),
            )
            .await?;
        let dataset_id = dataset.string_or("oid", "");

        let mut tables = Vec::with_capacity(setup.tables.len());
        for spec in &setup.tables {
            let mut spec = spec.clone();
            spec.dataset_id = Some(dataset_id.clone());
            spec.database.get_or_insert_with(|| setup.database.clone());
            spec.schema.get_or_insert_with(|| setup.schema.clone());
            self.create_table(&setup.title, &spec)
                .await
                .map_err(|e| e.with_context(format!("table '{}' in '{}'", spec.table_name, setup.title)))?;
            tables.push(spec.table_name);
        }

        info!(datamodel = %setup.title, tables = ?tables, "data model set up");
        Ok(SetupResult {
            datamodel_id,
            dataset_id,
            tables,
        })
    }

    /// Build an extract model or publish a live one
    pub async fn deploy_datamodel(&self, title: &str, options: &DeployOptions) -> Result<Value> {
        let model = fetch_datamodel(self.api(), title).await?;
        let datamodel_id = model.string_or("oid", "");
        let body = match model_type(&model)? {
            DatamodelType::Extract => json!({
                "datamodelId": datamodel_id,
                "buildType": options.build_type.as_str(),
                "rowLimit": options.row_limit,
                "schemaOrigin": options.schema_origin
            }),
            DatamodelType::Live => json!({
                "datamodelId": datamodel_id,
                "buildType": "publish"
            }),
        };

        let endpoint = "/api/v2/builds";
        let result = self
            .api()
            .post(endpoint, &body)
            .await?
            .expect_status(endpoint, &[201])?
            .value()?;
        info!(datamodel = title, "deployment started");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use std::sync::Arc;

    #[test]
    fn test_connection_payloads() {
        let spec = ConnectionSpec::from_params(
            "redshift",
            &json!({"name": "Warehouse", "server": "rs:5439", "username": "u", "password": "p"}),
        )
        .unwrap();
        let payload = connection_payload(&spec);
        assert_eq!(payload["provider"], "RedShift");
        assert_eq!(payload["parameters"]["Server"], "rs:5439");
        assert_eq!(payload["parameters"]["EncryptConnection"], false);
        assert_eq!(payload["supportedModelTypes"], json!(["LIVE", "EXTRACT"]));

        let bq = ConnectionSpec::from_params(
            "BigQuery",
            &json!({"name": "BQ", "service_account_key_path": "/k.json"}),
        )
        .unwrap();
        let payload = connection_payload(&bq);
        assert_eq!(payload["provider"], "GoogleBigQuery");
        assert_eq!(payload["parameters"]["serviceAccount"], true);
        assert_eq!(payload["parameters"]["samplingLevel"], "2");

        assert!(ConnectionSpec::from_params("oracle", &json!({"name": "x"})).is_err());
        assert!(ConnectionSpec::from_params("athena", &json!({"name": "x"})).is_err());
    }

    #[test]
    fn test_build_behavior_payloads() {
        let table = json!({"name": "Orders", "columns": [{"name": "Updated", "oid": "c7"}]});
        let parse = |v: Value| serde_json::from_value::<BuildBehavior>(v).unwrap();

        assert_eq!(parse(json!({"mode": "replace"})).payload(&table).unwrap()["type"], "sync");
        assert_eq!(
            parse(json!({"mode": "replace_changes"})).payload(&table).unwrap()["type"],
            "ignoreIfExists"
        );
        assert_eq!(parse(json!({"mode": "weird"})), BuildBehavior::Unknown);

        let inc = parse(json!({"mode": "increment", "column_name": "Updated"}))
            .payload(&table)
            .unwrap();
        assert_eq!(inc["type"], "accumulativeSync");
        assert_eq!(inc["accumulativeConfig"]["column"], "c7");
        assert_eq!(inc["accumulativeConfig"]["type"], "lastStored");

        let missing = BuildBehavior::Increment {
            column_name: "Nope".to_string(),
        };
        assert!(missing.payload(&table).is_err());
    }

    fn source_mocks(mock: &MockTransport, schema_doc: Value) {
        mock.respond(HttpMethod::Get, "/api/v2/datamodels/schema?title=Shop", 200, schema_doc);
        mock.respond(
            HttpMethod::Get,
            "/api/v2/connections?name=Warehouse",
            200,
            json!([{"oid": "c1", "provider": "RedShift"}]),
        );
        mock.respond(
            HttpMethod::Post,
            "/api/v1/connection/c1/table_schema_details",
            200,
            json!({"columns": [{"columnName": "id", "dbType": 8, "size": 4}, {"columnName": "updated", "dbType": 4}]}),
        );
    }

    #[tokio::test]
    async fn test_create_table_with_increment() {
        let mock = Arc::new(MockTransport::new());
        source_mocks(
            &mock,
            json!({"oid": "dm1", "title": "Shop", "type": "extract", "datasets": [
                {"oid": "ds1", "database": "shop", "schemaName": "public", "connection": {"name": "Warehouse"}}
            ]}),
        );
        mock.respond(
            HttpMethod::Post,
            "/api/v2/datamodels/dm1/schema/datasets/ds1/tables",
            201,
            json!({"oid": "t1", "name": "orders", "columns": [{"name": "updated", "oid": "c2"}]}),
        );
        mock.respond(
            HttpMethod::Patch,
            "/api/v2/datamodels/dm1/schema/datasets/ds1/tables/t1",
            200,
            json!({"oid": "t1", "patched": true}),
        );

        let spec = TableSpec::new("orders")
            .with_import_query("SELECT * FROM orders")
            .with_build_behavior(BuildBehavior::Increment {
                column_name: "updated".to_string(),
            });
        let result = Datamodels::new(mock.clone()).create_table("Shop", &spec).await.unwrap();
        assert_eq!(result["patched"], true);

        let calls = mock.calls();
        let create = calls.iter().find(|c| c.endpoint.ends_with("/tables")).unwrap();
        let body = create.body.clone().unwrap();
        assert_eq!(body["columns"][0]["id"], "id");
        assert_eq!(body["columns"][0]["type"], 8);
        assert_eq!(body["columns"][1]["precision"], 0);
        assert_eq!(body["configOptions"]["importQuery"], "SELECT * FROM orders");

        let patch = calls.iter().find(|c| c.method == HttpMethod::Patch).unwrap();
        assert_eq!(patch.body.clone().unwrap()["buildBehavior"]["accumulativeConfig"]["column"], "c2");
    }

    #[tokio::test]
    async fn test_create_table_needs_single_dataset() {
        let mock = Arc::new(MockTransport::new());
        source_mocks(
            &mock,
            json!({"oid": "dm1", "title": "Shop", "type": "live", "datasets": [{"oid": "a"}, {"oid": "b"}]}),
        );
        let result = Datamodels::new(mock.clone())
            .create_table("Shop", &TableSpec::new("orders"))
            .await;
        assert!(matches!(result, Err(SdkError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_setup_and_deploy() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(HttpMethod::Post, "/api/v2/datamodels", 201, json!({"oid": "dm1"}));
        source_mocks(
            &mock,
            json!({"oid": "dm1", "title": "Shop", "type": "live", "datasets": []}),
        );
        mock.respond(
            HttpMethod::Post,
            "/api/v2/datamodels/dm1/schema/datasets",
            201,
            json!({"oid": "ds9"}),
        );
        mock.respond(
            HttpMethod::Get,
            "/api/v2/datamodels/dm1/schema/datasets/ds9",
            200,
            json!({"oid": "ds9", "connection": {"name": "Warehouse"}}),
        );
        mock.respond(
            HttpMethod::Post,
            "/api/v2/datamodels/dm1/schema/datasets/ds9/tables",
            201,
            json!({"oid": "t1"}),
        );
        mock.respond(HttpMethod::Post, "/api/v2/builds", 201, json!({"oid": "b1"}));

        let models = Datamodels::new(mock.clone());
        let setup = DatamodelSetup {
            title: "Shop".to_string(),
            model_type: DatamodelType::Live,
            connection_name: "Warehouse".to_string(),
            database: "shop".to_string(),
            schema: "public".to_string(),
            dataset_name: None,
            tables: vec![TableSpec::new("orders"), TableSpec::new("customers")],
        };
        let result = models.setup_datamodel(&setup).await.unwrap();
        assert_eq!(result.dataset_id, "ds9");
        assert_eq!(result.tables, vec!["orders", "customers"]);

        let dataset_call = mock
            .calls()
            .into_iter()
            .find(|c| c.endpoint == "/api/v2/datamodels/dm1/schema/datasets" && c.method == HttpMethod::Post)
            .unwrap();
        assert_eq!(dataset_call.body.unwrap()["name"], "public");

        models.deploy_datamodel("Shop", &DeployOptions::default()).await.unwrap();
        let build = mock.calls().into_iter().find(|c| c.endpoint == "/api/v2/builds").unwrap();
        assert_eq!(build.body.unwrap(), json!({"datamodelId": "dm1", "buildType": "publish"}));
    }

    #[tokio::test]
    async fn test_create_dataset_error_detail() {
        let mock = Arc::new(MockTransport::new());
        source_mocks(&mock, json!({"oid": "dm1", "title": "Shop", "type": "extract"}));
        mock.respond(
            HttpMethod::Post,
            "/api/v2/datamodels/dm1/schema/datasets",
            400,
            json!({"detail": "schema missing"}),
        );
        let err = Datamodels::new(mock.clone())
            .create_dataset("Shop", "Warehouse", "shop", "public", None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("schema missing"));
    }
}
