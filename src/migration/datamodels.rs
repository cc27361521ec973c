//! Data model migration through the schema export/import endpoints

use super::shares::PrincipalMaps;
use super::{BatchPlan, DatamodelSelection, MigrationSummary, Migrator, Selection};
use super::{DATAMODEL_PAUSE, DEFAULT_BATCH_SIZE};
use crate::client::{path_segment, with_query, ApiResponse};
use crate::config::{DatamodelAction, Dependency};
use crate::datamodel::DatamodelType;
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

const EXPORT_ENDPOINT: &str = "/api/v2/datamodel-exports/schema";
const IMPORT_ENDPOINT: &str = "/api/v2/datamodel-imports/schema";
const LISTING_ENDPOINT: &str = "/api/v2/datamodels/schema?fields=oid,title";

/// Error title the import endpoint uses for a title clash with another OID
const ALREADY_EXISTS: &str = "ElasticubeAlreadyExists";

/// Knobs for [`Migrator::migrate_datamodels`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatamodelMigrationOptions {
    /// Export dependencies; empty means all of them
    pub dependencies: Vec<Dependency>,
    /// Provider name to target connection OID
    pub provider_connections: HashMap<String, String>,
    pub shares: bool,
    pub action: Option<DatamodelAction>,
    /// Title for [`DatamodelAction::Duplicate`]; defaults to `<title> (Duplicate)`
    pub new_title: Option<String>,
    pub batch: BatchPlan,
}

impl Default for DatamodelMigrationOptions {
    fn default() -> Self {
        Self {
            dependencies: Vec::new(),
            provider_connections: HashMap::new(),
            shares: false,
            action: None,
            new_title: None,
            batch: BatchPlan::new(DEFAULT_BATCH_SIZE, DATAMODEL_PAUSE),
        }
    }
}

impl DatamodelMigrationOptions {
    pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_provider_connections(mut self, connections: HashMap<String, String>) -> Self {
        self.provider_connections = connections;
        self
    }

    pub fn with_shares(mut self, shares: bool) -> Self {
        self.shares = shares;
        self
    }

    pub fn with_action(mut self, action: Option<DatamodelAction>, new_title: Option<String>) -> Self {
        self.action = action;
        self.new_title = new_title;
        self
    }

    pub fn with_batch(mut self, batch: BatchPlan) -> Self {
        self.batch = batch;
        self
    }

    /// Comma-separated dependency ids for the export endpoint
    pub fn dependency_ids(&self) -> String {
        let chosen: &[Dependency] = if self.dependencies.is_empty() {
            &Dependency::ALL
        } else {
            &self.dependencies
        };
        let mut ids: Vec<&str> = Vec::new();
        for id in chosen.iter().flat_map(|d| d.api_ids().iter().copied()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.join(",")
    }
}

/// Data model migration outcome plus share totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatamodelMigrationReport {
    #[serde(flatten)]
    pub summary: MigrationSummary,
    pub shares_migrated: usize,
    pub shares_failed: usize,
}

impl DatamodelMigrationReport {
    pub fn merge(&mut self, other: DatamodelMigrationReport) {
        self.summary.merge(other.summary);
        self.shares_migrated += other.shares_migrated;
        self.shares_failed += other.shares_failed;
    }
}

/// Point every dataset at a mapped target connection, or blank out the
/// source connection parameters when its provider is not mapped
pub fn rewrite_connections(model: &mut Value, provider_connections: &HashMap<String, String>) {
    let Some(datasets) = model.get_mut("datasets").and_then(Value::as_array_mut) else {
        return;
    };
    for dataset in datasets {
        let Some(connection) = dataset.get_mut("connection").filter(|c| c.is_object()) else {
            continue;
        };
        let provider = connection.str_field("provider").map(str::to_string);
        match provider.as_deref().and_then(|p| provider_connections.get(p).map(|oid| (p, oid))) {
            Some((provider, oid)) => {
                *connection = json!({ "oid": oid, "provider": provider });
            }
            None => {
                if let Some(parameters) = connection.get_mut("parameters") {
                    *parameters = Value::String(String::new());
                }
            }
        }
    }
}

/// A model that made it to the target
struct Imported {
    oid: String,
    title: String,
    kind: Option<DatamodelType>,
    source_title: String,
    source_oid: String,
}

fn detail(response: &ApiResponse) -> String {
    response
        .value()
        .ok()
        .and_then(|v| v.str_field("detail").map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string())
}

fn is_already_exists(response: &ApiResponse) -> bool {
    response.status == 400
        && response
            .value()
            .ok()
            .and_then(|v| v.str_field("title").map(|t| t == ALREADY_EXISTS))
            .unwrap_or(false)
}

impl Migrator {
    async fn export_datamodel(&self, oid: &str, dependencies: &str) -> Result<Value> {
        let endpoint = with_query(
            EXPORT_ENDPOINT,
            &[
                ("datamodelId", oid),
                ("type", "schema-latest"),
                ("dependenciesIdsToInclude", dependencies),
            ],
        );
        self.source().get_json(&endpoint).await
    }

    /// Migrate the selected data models one at a time.
    ///
    /// Export failures and unknown titles are reported as failed. With
    /// `shares` set, permissions of every imported model are copied too.
    pub async fn migrate_datamodels(
        &self,
        selection: &DatamodelSelection,
        options: &DatamodelMigrationOptions,
    ) -> Result<DatamodelMigrationReport> {
        let dependencies = options.dependency_ids();
        let mut report = DatamodelMigrationReport::default();
        let mut exported = Vec::new();

        let targets: Vec<(String, String)> = match selection {
            Selection::Ids(ids) => ids.iter().map(|id| (id.clone(), id.clone())).collect(),
            Selection::Names(names) => {
                let listing = self
                    .source()
                    .get_json(LISTING_ENDPOINT)
                    .await
                    .map_err(|e| e.with_context("listing source data models"))?;
                let mut found = Vec::new();
                for name in names {
                    let matches: Vec<&Value> = listing
                        .as_list()
                        .iter()
                        .filter(|m| m.str_field("title") == Some(name.as_str()))
                        .collect();
                    if matches.is_empty() {
                        report.summary.fail(name.as_str(), "not found in the source environment");
                    }
                    found.extend(matches.iter().map(|m| (m.string_or("oid", ""), name.clone())));
                }
                found
            }
        };

        for (oid, label) in &targets {
            match self.export_datamodel(oid, &dependencies).await {
                Ok(model) => {
                    info!(datamodel = %model.string_or("title", label), "exported data model");
                    exported.push(model);
                }
                Err(e) => {
                    error!(datamodel = %label, error = %e, "export failed");
                    report.summary.fail(label.as_str(), format!("export failed: {}", e));
                }
            }
        }

        if exported.is_empty() {
            warn!("no data models exported, nothing to import");
            return Ok(report);
        }

        let mut imported = Vec::new();
        for mut model in exported {
            rewrite_connections(&mut model, &options.provider_connections);
            let title = model.string_or("title", "Untitled");
            match self.import_datamodel(&model, options).await {
                Ok(done) => {
                    info!(datamodel = %title, "data model migrated");
                    report.summary.succeed(title);
                    imported.push(done);
                }
                Err(reason) => {
                    error!(datamodel = %title, %reason, "data model import failed");
                    report.summary.fail(title, reason);
                }
            }
        }

        if options.shares && !imported.is_empty() {
            match PrincipalMaps::load(self, true).await {
                Ok(principals) => {
                    for model in &imported {
                        match self.migrate_datamodel_shares(model, &principals).await {
                            Ok(count) => report.shares_migrated += count,
                            Err(e) => {
                                error!(datamodel = %model.title, error = %e, "share migration failed");
                                report.shares_failed += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "could not map users and groups, shares not migrated");
                    report.shares_failed += imported.len();
                }
            }
        }

        info!(
            summary = %report.summary,
            shares_migrated = report.shares_migrated,
            shares_failed = report.shares_failed,
            "data model migration finished"
        );
        Ok(report)
    }

    /// Import one exported model. `Err` carries the failure reason.
    async fn import_datamodel(&self, model: &Value, options: &DatamodelMigrationOptions) -> std::result::Result<Imported, String> {
        let source_oid = model.string_or("oid", "");
        let source_title = model.string_or("title", "Untitled");
        let (endpoint, title) = match options.action {
            Some(DatamodelAction::Overwrite) => (
                with_query(IMPORT_ENDPOINT, &[("datamodelId", source_oid.as_str())]),
                source_title.clone(),
            ),
            Some(DatamodelAction::Duplicate) => {
                let new_title = options
                    .new_title
                    .clone()
                    .unwrap_or_else(|| format!("{} (Duplicate)", source_title));
                (with_query(IMPORT_ENDPOINT, &[("newTitle", new_title.as_str())]), new_title)
            }
            None => (IMPORT_ENDPOINT.to_string(), source_title.clone()),
        };

        let mut response = self
            .target()
            .post(&endpoint, model)
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if response.status == 404 && options.action == Some(DatamodelAction::Overwrite) {
            warn!(datamodel = %source_title, "not found on target for overwrite, importing as new");
            response = self
                .target()
                .post(IMPORT_ENDPOINT, model)
                .await
                .map_err(|e| format!("request failed: {}", e))?;
            if is_already_exists(&response) {
                return Err(format!(
                    "Datamodel '{}' already exists on the target with a different ID. Consider using action='duplicate' with a new title, or delete the existing model manually.",
                    source_title
                ));
            }
        }

        if response.status != 201 {
            return Err(detail(&response));
        }

        let created = response.value().unwrap_or(Value::Null);
        Ok(Imported {
            oid: created.str_field("oid").map(str::to_string).unwrap_or_else(|| source_oid.clone()),
            title: created.string_or("title", &title),
            kind: model.str_field("type").and_then(DatamodelType::parse),
            source_title,
            source_oid,
        })
    }

    /// Copy the permissions of one imported model. Returns the share count.
    async fn migrate_datamodel_shares(&self, model: &Imported, principals: &PrincipalMaps) -> Result<usize> {
        let kind = model
            .kind
            .ok_or_else(|| SdkError::invalid(format!("data model '{}' has an unknown type", model.title)))?;

        let source_shares = match kind {
            DatamodelType::Extract => {
                let endpoint = format!("/api/elasticubes/localhost/{}/permissions", path_segment(&model.source_title));
                self.source().get_json(&endpoint).await?.array_field("shares").to_vec()
            }
            DatamodelType::Live => {
                let endpoint = format!("/api/v1/elasticubes/live/{}/permissions", path_segment(&model.source_oid));
                self.source().get_json(&endpoint).await?.as_list().to_vec()
            }
        };

        let new_shares: Vec<Value> = source_shares
            .iter()
            .filter_map(|share| {
                let party = share.str_field("partyId")?;
                let kind = share.str_field("type")?;
                let mapping = match kind {
                    "user" => &principals.users,
                    "group" => &principals.groups,
                    _ => return None,
                };
                let Some(target_party) = mapping.target_id(party) else {
                    debug!(kind, party, "share principal missing on target");
                    return None;
                };
                Some(json!({
                    "partyId": target_party,
                    "type": kind,
                    "permission": share.string_or("permission", "a"),
                }))
            })
            .collect();

        if new_shares.is_empty() {
            warn!(datamodel = %model.title, "no mappable shares to migrate");
            return Ok(0);
        }
        let body = Value::Array(new_shares);
        let count = body.as_list().len();

        match kind {
            DatamodelType::Extract => {
                let endpoint = format!("/api/elasticubes/localhost/{}/permissions", path_segment(&model.title));
                self.target()
                    .put(&endpoint, &body)
                    .await?
                    .expect_status(&endpoint, &[200, 201])?;
            }
            DatamodelType::Live => {
                info!(datamodel = %model.title, "publishing live model before updating shares");
                self.target()
                    .post("/api/v2/builds", &json!({ "datamodelId": model.oid, "buildType": "publish" }))
                    .await?
                    .expect_status("/api/v2/builds", &[201])?;
                let endpoint = format!("/api/v1/elasticubes/live/{}/permissions", path_segment(&model.oid));
                self.target()
                    .patch(&endpoint, &body)
                    .await?
                    .expect_status(&endpoint, &[200, 201])?;
            }
        }
        info!(datamodel = %model.title, shares = count, "data model shares migrated");
        Ok(count)
    }

    /// Migrate every source data model in batches, pausing between batches
    pub async fn migrate_all_datamodels(&self, options: &DatamodelMigrationOptions) -> Result<DatamodelMigrationReport> {
        let listing = self
            .source()
            .get_json(LISTING_ENDPOINT)
            .await
            .map_err(|e| e.with_context("listing source data models"))?;
        let ids: Vec<String> = listing
            .as_list()
            .iter()
            .filter_map(|m| m.str_field("oid"))
            .map(str::to_string)
            .collect();

        let plan = options.batch;
        let batches = plan.batch_count(ids.len());
        info!(datamodels = ids.len(), batches, "migrating all data models");

        let mut report = DatamodelMigrationReport::default();
        for (index, batch) in plan.batches(&ids).enumerate() {
            info!(batch = index + 1, of = batches, size = batch.len(), "processing data model batch");
            match self.migrate_datamodels(&Selection::Ids(batch.to_vec()), options).await {
                Ok(result) => report.merge(result),
                Err(e) => {
                    error!(batch = index + 1, error = %e, "data model batch failed");
                    report.summary.fail_all(batch.iter().cloned(), &e.to_string());
                }
            }
            plan.pause_after(index, ids.len()).await;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use std::sync::Arc;
    use std::time::Duration;

    const ALL_DEPS: &str = "dataContext,scopeConfiguration,formulaManagement,drillHierarchies,perspectives";

    fn export_endpoint(oid: &str) -> String {
        format!(
            "{}?datamodelId={}&type=schema-latest&dependenciesIdsToInclude={}",
            EXPORT_ENDPOINT, oid, ALL_DEPS
        )
    }

    fn model(oid: &str, title: &str, kind: &str) -> Value {
        json!({
            "oid": oid,
            "title": title,
            "type": kind,
            "datasets": [
                {"name": "main", "connection": {"provider": "RedShift", "parameters": {"password": "x"}}},
                {"name": "side", "connection": {"provider": "Snowflake", "parameters": {"user": "y"}}}
            ]
        })
    }

    fn setup() -> (Arc<MockTransport>, Arc<MockTransport>, Migrator) {
        let source = Arc::new(MockTransport::new());
        let target = Arc::new(MockTransport::new());
        source.respond(HttpMethod::Get, &export_endpoint("m1"), 200, model("m1", "Sales", "extract"));
        source.respond(HttpMethod::Get, &export_endpoint("m2"), 200, model("m2", "Live", "live"));
        let migrator = Migrator::new(source.clone(), target.clone());
        (source, target, migrator)
    }

    fn quick() -> DatamodelMigrationOptions {
        DatamodelMigrationOptions::default().with_batch(BatchPlan::new(DEFAULT_BATCH_SIZE, Duration::ZERO))
    }

    #[test]
    fn test_dependency_ids() {
        assert_eq!(DatamodelMigrationOptions::default().dependency_ids(), ALL_DEPS);
        let options = DatamodelMigrationOptions::default().with_dependencies(vec![Dependency::Formulas, Dependency::Formulas]);
        assert_eq!(options.dependency_ids(), "formulaManagement");
    }

    #[test]
    fn test_rewrite_connections() {
        let mut exported = model("m1", "Sales", "extract");
        let map = HashMap::from([("Snowflake".to_string(), "conn-9".to_string())]);
        rewrite_connections(&mut exported, &map);
        assert_eq!(exported["datasets"][0]["connection"]["parameters"], "");
        assert_eq!(exported["datasets"][1]["connection"], json!({"oid": "conn-9", "provider": "Snowflake"}));
    }

    #[tokio::test]
    async fn test_import_by_ids() {
        let (_, target, migrator) = setup();
        target.respond(HttpMethod::Post, IMPORT_ENDPOINT, 201, json!({"oid": "m1", "title": "Sales"}));

        let selection = Selection::Ids(vec!["m1".into(), "gone".into()]);
        let report = migrator.migrate_datamodels(&selection, &quick()).await.unwrap();
        assert_eq!(report.summary.succeeded, vec!["Sales"]);
        assert_eq!(report.summary.failed[0].name, "gone");

        let sent = target.calls()[0].body.clone().unwrap();
        assert_eq!(sent["datasets"][0]["connection"]["parameters"], "");
    }

    #[tokio::test]
    async fn test_overwrite_falls_back_and_reports_clash() {
        let (_, target, migrator) = setup();
        target.respond(HttpMethod::Post, "/api/v2/datamodel-imports/schema?datamodelId=m1", 404, json!({}));
        target.respond(
            HttpMethod::Post,
            IMPORT_ENDPOINT,
            400,
            json!({"title": "ElasticubeAlreadyExists", "detail": "exists"}),
        );

        let options = quick().with_action(Some(DatamodelAction::Overwrite), None);
        let report = migrator
            .migrate_datamodels(&Selection::Ids(vec!["m1".into()]), &options)
            .await
            .unwrap();
        assert!(report.summary.failed[0].reason.contains("already exists on the target with a different ID"));
        assert_eq!(target.count(HttpMethod::Post, IMPORT_ENDPOINT), 2);
    }

    #[tokio::test]
    async fn test_duplicate_uses_default_title() {
        let (_, target, migrator) = setup();
        target.respond(
            HttpMethod::Post,
            "/api/v2/datamodel-imports/schema?newTitle=Sales (Duplicate)",
            201,
            json!({}),
        );
        target.respond(HttpMethod::Post, IMPORT_ENDPOINT, 500, json!({"detail": "boom"}));

        let options = quick().with_action(Some(DatamodelAction::Duplicate), None);
        let report = migrator
            .migrate_datamodels(&Selection::Ids(vec!["m1".into()]), &options)
            .await
            .unwrap();
        assert_eq!(report.summary.succeeded, vec!["Sales"]);
    }

    #[tokio::test]
    async fn test_unknown_name_and_import_detail() {
        let (source, target, migrator) = setup();
        source.respond(
            HttpMethod::Get,
            LISTING_ENDPOINT,
            200,
            json!([{"oid": "m1", "title": "Sales"}, {"oid": "m2", "title": "Live"}]),
        );
        target.respond(HttpMethod::Post, IMPORT_ENDPOINT, 422, json!({"detail": "bad schema"}));

        let selection = Selection::Names(vec!["Sales".into(), "Missing".into()]);
        let report = migrator.migrate_datamodels(&selection, &quick()).await.unwrap();
        let reasons: Vec<(&str, &str)> = report
            .summary
            .failed
            .iter()
            .map(|f| (f.name.as_str(), f.reason.as_str()))
            .collect();
        assert_eq!(
            reasons,
            vec![("Missing", "not found in the source environment"), ("Sales", "bad schema")]
        );
    }

    #[tokio::test]
    async fn test_shares_for_extract_and_live() {
        let (source, target, migrator) = setup();
        crate::migration::shares::tests::principals(&source, &target);
        target.respond_with(HttpMethod::Post, IMPORT_ENDPOINT, |body: Option<&Value>| {
            let body = body.cloned().unwrap_or(Value::Null);
            Ok(ApiResponse::new(201, json!({"oid": body["oid"], "title": body["title"]}).to_string()))
        });
        source.respond(
            HttpMethod::Get,
            "/api/elasticubes/localhost/Sales/permissions",
            200,
            json!({"shares": [
                {"partyId": "su1", "type": "user", "permission": "w"},
                {"partyId": "su2", "type": "user"},
                {"partyId": "sg1", "type": "group"}
            ]}),
        );
        source.respond(
            HttpMethod::Get,
            "/api/v1/elasticubes/live/m2/permissions",
            200,
            json!([{"partyId": "su1", "type": "user"}]),
        );
        target.respond(HttpMethod::Put, "/api/elasticubes/localhost/Sales/permissions", 200, json!({}));
        target.respond(HttpMethod::Post, "/api/v2/builds", 201, json!({}));
        target.respond(HttpMethod::Patch, "/api/v1/elasticubes/live/m2/permissions", 200, json!({}));

        let options = quick().with_shares(true);
        let report = migrator
            .migrate_datamodels(&Selection::Ids(vec!["m1".into(), "m2".into()]), &options)
            .await
            .unwrap();
        assert_eq!(report.summary.succeeded.len(), 2);
        assert_eq!(report.shares_migrated, 3);
        assert_eq!(report.shares_failed, 0);

        let put = target.calls().into_iter().find(|c| c.method == HttpMethod::Put).unwrap();
        assert_eq!(
            put.body.unwrap(),
            json!([
                {"partyId": "tu1", "type": "user", "permission": "w"},
                {"partyId": "tg1", "type": "group", "permission": "a"}
            ])
        );
    }

    #[tokio::test]
    async fn test_migrate_all_datamodels() {
        let (source, target, migrator) = setup();
        source.respond(
            HttpMethod::Get,
            LISTING_ENDPOINT,
            200,
            json!([{"oid": "m1", "title": "Sales"}, {"oid": "m2", "title": "Live"}]),
        );
        target.respond(HttpMethod::Post, IMPORT_ENDPOINT, 201, json!({}));

        let options = quick().with_batch(BatchPlan::new(1, Duration::ZERO));
        let report = migrator.migrate_all_datamodels(&options).await.unwrap();
        assert_eq!(report.summary.succeeded, vec!["Sales", "Live"]);
        assert_eq!(source.count(HttpMethod::Get, EXPORT_ENDPOINT), 2);
    }
}
