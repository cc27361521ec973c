//! Dashboard migration through the bulk import endpoint
//!
//! A batch goes to the target in one request. When that request fails as a
//! whole, each dashboard is resubmitted on its own with `action=skip` so
//! one bad dashboard cannot sink the rest of the batch.

use super::{BatchPlan, DashboardSelection, FailedItem, ItemOutcome, MigrationSummary, Migrator, Selection};
use super::{DASHBOARD_PAUSE, DEFAULT_BATCH_SIZE};
use crate::client::path_segment;
use crate::config::ImportAction;
use crate::dashboard::search_all;
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Knobs for [`Migrator::migrate_dashboards`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardMigrationOptions {
    /// Conflict policy sent to the import endpoint; `None` lets the server decide
    pub action: Option<ImportAction>,
    pub republish: bool,
    pub migrate_share: bool,
    /// Requires `migrate_share`
    pub change_ownership: bool,
    pub batch: BatchPlan,
}

impl Default for DashboardMigrationOptions {
    fn default() -> Self {
        Self {
            action: None,
            republish: false,
            migrate_share: false,
            change_ownership: false,
            batch: BatchPlan::new(DEFAULT_BATCH_SIZE, DASHBOARD_PAUSE),
        }
    }
}

impl DashboardMigrationOptions {
    pub fn with_action(mut self, action: Option<ImportAction>) -> Self {
        self.action = action;
        self
    }

    pub fn with_republish(mut self, republish: bool) -> Self {
        self.republish = republish;
        self
    }

    pub fn with_shares(mut self, migrate_share: bool, change_ownership: bool) -> Self {
        self.migrate_share = migrate_share;
        self.change_ownership = change_ownership;
        self
    }

    pub fn with_batch(mut self, batch: BatchPlan) -> Self {
        self.batch = batch;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.change_ownership && !self.migrate_share {
            return Err(SdkError::invalid("change_ownership requires migrate_share"));
        }
        Ok(())
    }

    /// Shares follow only dashboards that were created fresh
    fn shares_apply(&self) -> bool {
        self.migrate_share && !matches!(self.action, Some(ImportAction::Duplicate | ImportAction::Overwrite))
    }
}

/// Bulk import endpoint for a republish flag and conflict policy
pub fn import_endpoint(republish: bool, action: Option<ImportAction>) -> String {
    let mut endpoint = format!("/api/v1/dashboards/import/bulk?republish={}", republish);
    if let Some(action) = action {
        endpoint.push_str("&action=");
        endpoint.push_str(action.as_str());
    }
    endpoint
}

/// Decoded answer of the bulk import endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkImportResult {
    /// `(target oid, title)` of created dashboards
    pub succeeded: Vec<(String, String)>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedItem>,
}

impl BulkImportResult {
    /// Read the `succeded` / `skipped` / `failed` sections.
    /// `failed` groups errors by category.
    pub fn parse(body: &Value) -> Self {
        let succeeded_section = body.get("succeded").or_else(|| body.get("succeeded"));
        let succeeded = succeeded_section
            .map(Value::as_list)
            .unwrap_or(&[])
            .iter()
            .map(|d| (d.string_or("oid", ""), d.string_or("title", "")))
            .collect();

        let skipped = body
            .get("skipped")
            .map(Value::as_list)
            .unwrap_or(&[])
            .iter()
            .filter_map(|d| d.str_field("title").or_else(|| d.as_str()).map(str::to_string))
            .collect();

        let mut failed = Vec::new();
        if let Some(categories) = body.get("failed").and_then(Value::as_object) {
            for (category, errors) in categories {
                for item in errors.as_list() {
                    let message = item
                        .get("error")
                        .and_then(|e| e.str_field("message"))
                        .unwrap_or(category.as_str());
                    failed.push(FailedItem {
                        name: item.string_or("title", ""),
                        reason: message.to_string(),
                    });
                }
            }
        }

        Self {
            succeeded,
            skipped,
            failed,
        }
    }

    /// Summary over `titles`, one entry per batch item.
    ///
    /// Each reported title consumes one matching batch item, so a title
    /// that appears twice in the batch needs two reports. Reports for
    /// titles with no item left are logged and dropped. Items nobody
    /// reported are failed.
    pub fn into_summary(self, titles: &[String]) -> MigrationSummary {
        let mut pending: HashMap<&str, usize> = HashMap::new();
        for title in titles {
            *pending.entry(title.as_str()).or_default() += 1;
        }

        let reports = self
            .succeeded
            .into_iter()
            .map(|(_, title)| (title, ItemOutcome::Succeeded))
            .chain(self.skipped.into_iter().map(|title| (title, ItemOutcome::Skipped)))
            .chain(
                self.failed
                    .into_iter()
                    .map(|item| (item.name, ItemOutcome::Failed(item.reason))),
            );

        let mut summary = MigrationSummary::new();
        for (title, outcome) in reports {
            match pending.get_mut(title.as_str()) {
                Some(left) if *left > 0 => *left -= 1,
                _ => {
                    warn!(dashboard = %title, outcome = ?outcome, "bulk import reported a dashboard that is not in the batch");
                    continue;
                }
            }
            match &outcome {
                ItemOutcome::Skipped => info!(dashboard = %title, "dashboard skipped by target"),
                ItemOutcome::Failed(reason) => warn!(dashboard = %title, reason = %reason, "dashboard import failed"),
                ItemOutcome::Succeeded => {}
            }
            summary.record(title, outcome);
        }

        for title in titles {
            if let Some(left) = pending.get_mut(title.as_str()) {
                if *left > 0 {
                    *left -= 1;
                    summary.fail(title.as_str(), "not reported by the bulk import");
                }
            }
        }
        summary
    }
}

fn title_of(dashboard: &Value) -> String {
    dashboard
        .str_field("title")
        .or_else(|| dashboard.str_field("oid"))
        .unwrap_or("untitled")
        .to_string()
}

impl Migrator {
    /// Full export of a source dashboard, widgets included
    async fn export_source_dashboard(&self, dashboard_id: &str) -> Result<Value> {
        let endpoint = format!("/api/dashboards/{}/export?adminAccess=true", path_segment(dashboard_id));
        self.source().get_json(&endpoint).await
    }

    /// Migrate the selected dashboards in a single bulk import.
    ///
    /// Export failures and titles missing on the source are reported as
    /// failed. Shares are copied afterwards when requested and the action
    /// neither duplicates nor overwrites.
    pub async fn migrate_dashboards(
        &self,
        selection: &DashboardSelection,
        options: &DashboardMigrationOptions,
    ) -> Result<MigrationSummary> {
        options.validate()?;
        let mut summary = MigrationSummary::new();
        let mut exported = Vec::new();

        match selection {
            Selection::Ids(ids) => {
                for id in ids {
                    match self.export_source_dashboard(id).await {
                        Ok(dashboard) => exported.push(dashboard),
                        Err(e) => {
                            error!(dashboard_id = %id, error = %e, "export failed");
                            summary.fail(id.as_str(), format!("export failed: {}", e));
                        }
                    }
                }
            }
            Selection::Names(names) => {
                let listing = search_all(self.source()).await?;
                for name in names {
                    let matches: Vec<&Value> = listing
                        .iter()
                        .filter(|d| d.str_field("title") == Some(name.as_str()))
                        .collect();
                    if matches.is_empty() {
                        summary.fail(name.as_str(), "not found in the source environment");
                        continue;
                    }
                    for listed in matches {
                        let oid = listed.string_or("oid", "");
                        match self.export_source_dashboard(&oid).await {
                            Ok(dashboard) => exported.push(dashboard),
                            Err(e) => {
                                error!(dashboard = %name, oid = %oid, error = %e, "export failed");
                                summary.fail(name.as_str(), format!("export failed: {}", e));
                            }
                        }
                    }
                }
            }
        }

        if exported.is_empty() {
            warn!("no dashboards exported, nothing to import");
            return Ok(summary);
        }

        info!(count = exported.len(), "importing dashboards");
        let (imported, created) = self.import_dashboards(&exported, options).await;
        summary.merge(imported);

        if options.shares_apply() {
            self.migrate_shares_after_import(&exported, &created, options.change_ownership)
                .await;
        } else if options.migrate_share {
            info!("shares are not migrated for duplicate or overwrite imports");
        }

        info!(%summary, "dashboard migration finished");
        Ok(summary)
    }

    /// Bulk import with per-dashboard salvage. Also returns `(oid, title)`
    /// of every dashboard created on the target.
    async fn import_dashboards(
        &self,
        dashboards: &[Value],
        options: &DashboardMigrationOptions,
    ) -> (MigrationSummary, Vec<(String, String)>) {
        let endpoint = import_endpoint(options.republish, options.action);
        let titles: Vec<String> = dashboards.iter().map(title_of).collect();

        let failure = match self.target().post(&endpoint, &Value::Array(dashboards.to_vec())).await {
            Ok(resp) if resp.status == 201 => {
                let result = BulkImportResult::parse(&resp.value().unwrap_or(Value::Null));
                let created = result.succeeded.clone();
                return (result.into_summary(&titles), created);
            }
            Ok(resp) => resp.to_error(&endpoint).to_string(),
            Err(e) => e.to_string(),
        };

        warn!(count = dashboards.len(), error = %failure, "bulk import failed, importing one by one with action=skip");
        self.salvage(dashboards, options.republish).await
    }

    async fn salvage(&self, dashboards: &[Value], republish: bool) -> (MigrationSummary, Vec<(String, String)>) {
        let endpoint = import_endpoint(republish, Some(ImportAction::Skip));
        let mut summary = MigrationSummary::new();
        let mut created = Vec::new();

        for dashboard in dashboards {
            let title = title_of(dashboard);
            let body = Value::Array(vec![dashboard.clone()]);
            match self.target().post(&endpoint, &body).await {
                Ok(resp) if resp.status == 201 => {
                    let result = BulkImportResult::parse(&resp.value().unwrap_or(Value::Null));
                    created.extend(result.succeeded.iter().cloned());
                    summary.merge(result.into_summary(std::slice::from_ref(&title)));
                }
                Ok(resp) => summary.fail(title, resp.to_error(&endpoint).to_string()),
                Err(e) => summary.fail(title, e.to_string()),
            }
        }
        info!(%summary, "salvage finished");
        (summary, created)
    }

    async fn migrate_shares_after_import(&self, exported: &[Value], created: &[(String, String)], change_ownership: bool) {
        let mut source_ids = Vec::new();
        let mut target_ids = Vec::new();
        let mut unclaimed: Vec<&(String, String)> = created.iter().collect();
        for dashboard in exported {
            let source_oid = dashboard.string_or("oid", "");
            let title = title_of(dashboard);
            let Some(position) = unclaimed.iter().position(|(_, t)| *t == title) else {
                continue;
            };
            let (target_oid, _) = unclaimed.remove(position);
            if *target_oid != source_oid {
                warn!(dashboard = %title, source_oid = %source_oid, target_oid = %target_oid, "dashboard OID changed on import");
            }
            source_ids.push(source_oid);
            target_ids.push(target_oid.clone());
        }

        if source_ids.is_empty() {
            info!("no newly created dashboards to share");
            return;
        }
        match self.migrate_dashboard_shares(&source_ids, &target_ids, change_ownership).await {
            Ok(report) => info!(
                dashboards = report.total_dashboards,
                succeeded = report.shares_succeeded,
                failed = report.shares_failed,
                unmapped = report.shares_unmapped,
                "dashboard shares migrated"
            ),
            Err(e) => error!(error = %e, "dashboard share migration failed"),
        }
    }

    /// Migrate every source dashboard in batches, pausing between batches
    pub async fn migrate_all_dashboards(&self, options: &DashboardMigrationOptions) -> Result<MigrationSummary> {
        options.validate()?;
        let listing = search_all(self.source()).await?;
        let ids: Vec<String> = listing
            .iter()
            .filter_map(|d| d.str_field("oid"))
            .filter(|oid| !oid.is_empty())
            .map(str::to_string)
            .collect();

        let plan = options.batch;
        let batches = plan.batch_count(ids.len());
        info!(dashboards = ids.len(), batches, "migrating all dashboards");

        let mut summary = MigrationSummary::new();
        for (index, batch) in plan.batches(&ids).enumerate() {
            info!(batch = index + 1, of = batches, size = batch.len(), "processing dashboard batch");
            match self.migrate_dashboards(&Selection::Ids(batch.to_vec()), options).await {
                Ok(result) => summary.merge(result),
                Err(e) => {
                    error!(batch = index + 1, error = %e, "dashboard batch failed");
                    summary.fail_all(batch.iter().cloned(), &e.to_string());
                }
            }
            plan.pause_after(index, ids.len()).await;
        }
        Ok(summary)
    }
}
