//! Data model checks: custom tables, island tables, row security datatypes,
//! import queries and many-to-many relationships

use super::{LoadedDatamodel, Wellcheck};
use crate::client::{path_segment, with_query, ApiTransport};
use crate::datamodel::DatamodelType;
use crate::error::Result;
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// A custom (SQL) table and whether its expression uses `union`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomTableRow {
    pub data_model: String,
    pub table: String,
    pub has_union: bool,
}

/// A table no relationship touches
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IslandTableRow {
    pub datamodel: String,
    pub datamodel_oid: String,
    pub table: String,
    pub table_oid: String,
    #[serde(rename = "type")]
    pub table_type: String,
}

/// A column used by a data security rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RlsDatatypeRow {
    pub datamodel: String,
    pub table: String,
    pub column: String,
    pub datatype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportQueryRow {
    pub data_model: String,
    pub table: String,
    pub has_import_query: bool,
}

/// One column pair of a relationship and whether both sides repeat keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipRow {
    pub data_model: String,
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
    pub is_m2m: bool,
}

/// Every table of every dataset in a schema document
fn schema_tables(schema: &Value) -> impl Iterator<Item = &Value> {
    schema
        .array_field("datasets")
        .iter()
        .flat_map(|dataset| dataset.get("schema").map(|s| s.array_field("tables")).unwrap_or_default())
}

pub(super) fn custom_tables(model: &LoadedDatamodel) -> (Vec<CustomTableRow>, usize) {
    let mut rows = Vec::new();
    let mut scanned = 0;
    let Some(datasets) = model.schema.get("datasets").and_then(Value::as_array) else {
        warn!(datamodel = %model.title, "schema has no datasets");
        return (rows, scanned);
    };
    for dataset in datasets {
        let dataset_id = dataset.string_or("oid", "");
        let Some(tables) = dataset.get("schema").and_then(|s| s.get("tables")).and_then(Value::as_array) else {
            warn!(datamodel = %model.title, dataset = %dataset_id, "dataset has no tables");
            continue;
        };
        if tables.is_empty() {
            warn!(datamodel = %model.title, dataset = %dataset_id, "dataset has an empty table list");
        }
        scanned += tables.len();
        for table in tables.iter().filter(|t| t.str_field("type") == Some("custom")) {
            let name = table.string_or("name", "");
            let expression = table.get("expression").and_then(|e| e.str_field("expression"));
            if expression.is_none() {
                warn!(datamodel = %model.title, table = %name, "custom table has no expression");
            }
            rows.push(CustomTableRow {
                data_model: model.title.clone(),
                table: name,
                has_union: expression.map(|sql| sql.to_lowercase().contains("union")).unwrap_or(false),
            });
        }
    }
    (rows, scanned)
}

pub(super) fn island_tables(model: &LoadedDatamodel) -> Vec<IslandTableRow> {
    let related: HashSet<&str> = model
        .schema
        .array_field("relations")
        .iter()
        .flat_map(|relation| relation.array_field("columns"))
        .filter_map(|column| column.str_field("table"))
        .collect();

    schema_tables(&model.schema)
        .filter_map(|table| {
            let Some(oid) = table.str_field("oid") else {
                warn!(datamodel = %model.title, table = %table.string_or("name", ""), "table has no OID");
                return None;
            };
            (!related.contains(oid)).then(|| IslandTableRow {
                datamodel: model.title.clone(),
                datamodel_oid: model.oid.clone(),
                table: table.string_or("name", ""),
                table_oid: oid.to_string(),
                table_type: table.string_or("type", ""),
            })
        })
        .collect()
}

pub(super) fn import_queries(model: &LoadedDatamodel) -> Vec<ImportQueryRow> {
    schema_tables(&model.schema)
        .map(|table| {
            let name = table.string_or("name", "Unknown");
            let has_import_query = match table.get("configOptions") {
                Some(Value::Object(options)) => options.contains_key("importQuery"),
                _ => {
                    warn!(datamodel = %model.title, table = %name, "table has no config options");
                    false
                }
            };
            ImportQueryRow {
                data_model: model.title.clone(),
                table: name,
                has_import_query,
            }
        })
        .collect()
}

/// Data security endpoint for a schema, `None` when the type has none
fn datasecurity_endpoint(model: &LoadedDatamodel) -> Option<String> {
    let raw_type = model.schema.str_field("type").unwrap_or_default();
    match DatamodelType::parse(raw_type) {
        Some(DatamodelType::Extract) => {
            let Some(server) = model.schema.str_field("server") else {
                warn!(datamodel = %model.title, "extract data model has no server");
                return None;
            };
            Some(format!(
                "/api/elasticubes/{}/{}/datasecurity",
                path_segment(server),
                path_segment(&model.title)
            ))
        }
        Some(DatamodelType::Live) => Some(format!(
            "/api/v1/elasticubes/live/{}/datasecurity",
            path_segment(&model.title)
        )),
        None => {
            warn!(datamodel = %model.title, model_type = raw_type, "no data security for this data model type");
            None
        }
    }
}

/// Relationship columns of one side, as names rather than OIDs
struct RelationSide {
    table: String,
    column: String,
}

/// Table details cached per (dataset, table) for one data model
type TableCache = HashMap<(String, String), Option<Value>>;

/// Rows of a CSV answer, header excluded
fn csv_data_rows(text: &str) -> usize {
    text.lines().filter(|line| !line.trim().is_empty()).count().saturating_sub(1)
}

/// SQL counting key values that occur more than once
pub fn duplicate_key_query(table: &str, column: &str, alias: &str) -> String {
    format!(
        "select [{column}], count([{column}]) as {alias} from [{table}] group by [{column}] having count([{column}]) > 1"
    )
}

impl Wellcheck {
    async fn relation_side(
        &self,
        model: &LoadedDatamodel,
        column: &Value,
        cache: &mut TableCache,
    ) -> Option<RelationSide> {
        let (Some(dataset), Some(table), Some(column_id)) =
            (column.str_field("dataset"), column.str_field("table"), column.str_field("column"))
        else {
            warn!(datamodel = %model.title, "relationship column is missing dataset, table or column");
            return None;
        };
        let key = (dataset.to_string(), table.to_string());
        if !cache.contains_key(&key) {
            let endpoint = format!(
                "/api/v2/datamodels/{}/schema/datasets/{}/tables/{}",
                path_segment(&model.oid),
                path_segment(dataset),
                path_segment(table)
            );
            let details = match self.api().get_json(&endpoint).await {
                Ok(details) => Some(details),
                Err(e) => {
                    warn!(datamodel = %model.title, dataset, table, error = %e, "could not fetch table details");
                    None
                }
            };
            cache.insert(key.clone(), details);
        }
        let details = cache.get(&key)?.as_ref()?;

        let column_name = match details
            .array_field("columns")
            .iter()
            .find(|c| c.str_field("oid") == Some(column_id))
            .and_then(|c| c.str_field("name"))
        {
            Some(name) => name.to_string(),
            None => {
                warn!(datamodel = %model.title, table, column = column_id, "column not found, using its OID");
                column_id.to_string()
            }
        };
        Some(RelationSide {
            table: details.string_or("name", table),
            column: column_name,
        })
    }

    async fn duplicate_keys(&self, model: &LoadedDatamodel, side: &RelationSide, alias: &str) -> usize {
        let query = duplicate_key_query(&side.table, &side.column, alias);
        let endpoint = with_query(
            &format!("/api/datasources/{}/sql", path_segment(&model.title)),
            &[("query", query.as_str()), ("format", "csv")],
        );
        match self.api().get(&endpoint).await {
            Ok(response) if response.status == 200 => csv_data_rows(response.text()),
            Ok(response) => {
                warn!(datamodel = %model.title, table = %side.table, status = response.status, "key count query failed");
                0
            }
            Err(e) => {
                warn!(datamodel = %model.title, table = %side.table, error = %e, "key count query failed");
                0
            }
        }
    }

    pub(super) async fn rls_datatypes(&self, model: &LoadedDatamodel) -> Vec<RlsDatatypeRow> {
        let Some(endpoint) = datasecurity_endpoint(model) else {
            return Vec::new();
        };
        let rules = match self.api().get_json(&endpoint).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(datamodel = %model.title, error = %e, "could not fetch data security");
                return Vec::new();
            }
        };
        if rules.as_list().is_empty() {
            warn!(datamodel = %model.title, "no data security rules");
            return Vec::new();
        }

        let mut seen = HashSet::new();
        rules
            .as_list()
            .iter()
            .map(|rule| RlsDatatypeRow {
                datamodel: model.title.clone(),
                table: rule.string_or("table", ""),
                column: rule.string_or("column", ""),
                datatype: rule.string_or("datatype", ""),
            })
            .filter(|row| seen.insert(row.clone()))
            .collect()
    }

    pub(super) async fn relationships(&self, model: &LoadedDatamodel) -> Vec<RelationshipRow> {
        let endpoint = format!("/api/v2/datamodels/{}/schema/relations", path_segment(&model.oid));
        let relations = match self.api().get_json(&endpoint).await {
            Ok(Value::Array(relations)) => relations,
            Ok(_) => {
                warn!(datamodel = %model.title, "relations answer is not a list");
                return Vec::new();
            }
            Err(e) => {
                warn!(datamodel = %model.title, error = %e, "could not fetch relations");
                return Vec::new();
            }
        };

        let mut cache = TableCache::new();
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for relation in &relations {
            let columns = relation.array_field("columns");
            for (i, left) in columns.iter().enumerate() {
                for right in &columns[i + 1..] {
                    let Some(left_side) = self.relation_side(model, left, &mut cache).await else {
                        continue;
                    };
                    let Some(right_side) = self.relation_side(model, right, &mut cache).await else {
                        continue;
                    };
                    let key = (
                        left_side.table.clone(),
                        left_side.column.clone(),
                        right_side.table.clone(),
                        right_side.column.clone(),
                    );
                    if !seen.insert(key) {
                        continue;
                    }

                    let left_keys = self.duplicate_keys(model, &left_side, "key_count1").await;
                    let right_keys = self.duplicate_keys(model, &right_side, "key_count2").await;
                    let is_m2m = left_keys > 1 && right_keys > 1;
                    info!(
                        datamodel = %model.title,
                        left = %format!("{}.{}", left_side.table, left_side.column),
                        right = %format!("{}.{}", right_side.table, right_side.column),
                        is_m2m,
                        "checked relationship"
                    );
                    rows.push(RelationshipRow {
                        data_model: model.title.clone(),
                        left_table: left_side.table,
                        left_column: left_side.column,
                        right_table: right_side.table,
                        right_column: right_side.column,
                        is_m2m,
                    });
                }
            }
        }
        rows
    }

    /// Custom tables of each data model, flagging `union` in their SQL
    pub async fn check_datamodel_custom_tables(&self, refs: &[String]) -> Result<Vec<CustomTableRow>> {
        let models = self.load_datamodels(refs).await?;
        let mut rows = Vec::new();
        let mut tables = 0;
        for model in &models {
            let (found, scanned) = custom_tables(model);
            rows.extend(found);
            tables += scanned;
        }
        info!(
            datamodels = models.len(),
            tables,
            custom_tables = rows.len(),
            with_union = rows.iter().filter(|r| r.has_union).count(),
            "custom table check complete"
        );
        Ok(rows)
    }

    /// Tables that no relationship references
    pub async fn check_datamodel_island_tables(&self, refs: &[String]) -> Result<Vec<IslandTableRow>> {
        let models = self.load_datamodels(refs).await?;
        let rows: Vec<IslandTableRow> = models.iter().flat_map(island_tables).collect();
        info!(datamodels = models.len(), island_tables = rows.len(), "island table check complete");
        Ok(rows)
    }

    /// Distinct columns used by data security rules, with their datatype
    pub async fn check_datamodel_rls_datatypes(&self, refs: &[String]) -> Result<Vec<RlsDatatypeRow>> {
        let models = self.load_datamodels(refs).await?;
        let mut rows = Vec::new();
        for model in &models {
            rows.extend(self.rls_datatypes(model).await);
        }
        info!(
            datamodels = models.len(),
            rules = rows.len(),
            non_numeric = rows.iter().filter(|r| r.datatype != "numeric").count(),
            "data security datatype check complete"
        );
        Ok(rows)
    }

    /// Every table with whether it defines an import query
    pub async fn check_datamodel_import_queries(&self, refs: &[String]) -> Result<Vec<ImportQueryRow>> {
        let models = self.load_datamodels(refs).await?;
        let rows: Vec<ImportQueryRow> = models.iter().flat_map(import_queries).collect();
        info!(
            datamodels = models.len(),
            tables = rows.len(),
            with_import_query = rows.iter().filter(|r| r.has_import_query).count(),
            "import query check complete"
        );
        Ok(rows)
    }

    /// Relationship column pairs where both sides hold repeated key values.
    ///
    /// Each side is checked with a grouped count query against the model's
    /// SQL endpoint. A failed query counts as no repeated keys.
    pub async fn check_datamodel_m2m_relationships(&self, refs: &[String]) -> Result<Vec<RelationshipRow>> {
        let models = self.load_datamodels(refs).await?;
        let mut rows = Vec::new();
        for model in &models {
            rows.extend(self.relationships(model).await);
        }
        info!(
            datamodels = models.len(),
            relationships = rows.len(),
            many_to_many = rows.iter().filter(|r| r.is_m2m).count(),
            "many-to-many check complete"
        );
        Ok(rows)
    }
}
