//! Dashboard share and ownership migration
//!
//! Source shares are re-pointed at target principals through email (users)
//! and name (groups). Shares the target dashboard already carries are kept
//! and never duplicated.

use super::{IdMapping, Migrator};
use crate::access::{list_groups, list_users};
use crate::client::{path_segment, ApiResponse, ApiTransport};
use crate::dashboard::{change_dashboard_owner, restore_payload, ShareKind};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Rule kept by the previous owner after an ownership change
const PREVIOUS_OWNER_RULE: &str = "edit";

/// How the shares of one dashboard pair went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    Migrated,
    Skipped,
    Failed,
}

/// Outcome for one source/target dashboard pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardShareResult {
    pub source_id: String,
    pub target_id: String,
    pub shares_added: usize,
    pub owner_changed: bool,
    pub status: ShareStatus,
    pub reason: Option<String>,
}

/// Totals over a share migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShareMigrationReport {
    pub total_dashboards: usize,
    pub shares_succeeded: usize,
    pub shares_failed: usize,
    /// Source shares whose user or group has no match on the target
    pub shares_unmapped: usize,
    pub dashboards: Vec<DashboardShareResult>,
}

impl ShareMigrationReport {
    /// Pairs whose shares could not be written
    pub fn failed_dashboards(&self) -> impl Iterator<Item = &DashboardShareResult> {
        self.dashboards.iter().filter(|d| d.status == ShareStatus::Failed)
    }

    fn record(&mut self, source_id: &str, target_id: &str, status: ShareStatus, reason: Option<String>) {
        self.dashboards.push(DashboardShareResult {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            shares_added: 0,
            owner_changed: false,
            status,
            reason,
        });
    }
}

/// Source-to-target principal mappings
pub(crate) struct PrincipalMaps {
    pub users: IdMapping,
    pub groups: IdMapping,
}

impl PrincipalMaps {
    /// Build from the user and group listings of both sides.
    /// `exclude_groups` drops built-in groups from the group mapping.
    pub(crate) async fn load(migrator: &Migrator, exclude_groups: bool) -> Result<Self> {
        let source_users = list_users(migrator.source())
            .await
            .map_err(|e| e.with_context("listing source users"))?;
        let target_users = list_users(migrator.target())
            .await
            .map_err(|e| e.with_context("listing target users"))?;
        let mut source_groups = list_groups(migrator.source())
            .await
            .map_err(|e| e.with_context("listing source groups"))?;
        let mut target_groups = list_groups(migrator.target())
            .await
            .map_err(|e| e.with_context("listing target groups"))?;
        if exclude_groups {
            let keep = |g: &Value| !g.str_field("name").map(crate::access::is_excluded_group).unwrap_or(true);
            source_groups.retain(keep);
            target_groups.retain(keep);
        }

        let users = IdMapping::between(&source_users, &target_users, "email", "_id");
        let groups = IdMapping::between(&source_groups, &target_groups, "name", "_id");
        for missing in users.unmapped() {
            debug!(user = %missing.key, "user has no match on the target");
        }
        for missing in groups.unmapped() {
            debug!(group = %missing.key, "group has no match on the target");
        }
        Ok(Self { users, groups })
    }
}

/// A source share re-pointed at the target
#[derive(Debug, Clone, PartialEq)]
struct MappedShare {
    key: String,
    body: Value,
}

fn map_share(share: &Value, principals: &PrincipalMaps) -> Option<MappedShare> {
    let source_id = share.str_field("shareId")?;
    let kind = ShareKind::parse(share.str_field("type")?)?;
    let (mapping, default_rule) = match kind {
        ShareKind::User => (&principals.users, "edit"),
        ShareKind::Group => (&principals.groups, "viewer"),
    };
    let Some(target_id) = mapping.target_id(source_id) else {
        warn!(kind = %kind, source_id, "share principal missing on target, skipping share");
        return None;
    };
    Some(MappedShare {
        key: format!("{}:{}", kind, mapping.key(source_id).unwrap_or(source_id)),
        body: json!({
            "shareId": target_id,
            "type": kind.as_str(),
            "rule": share.string_or("rule", default_rule),
            "subscribe": share.bool_field("subscribe").unwrap_or(false),
        }),
    })
}

/// Dedup key of a share already on the target
fn existing_key(share: &Value) -> Option<String> {
    match ShareKind::parse(share.str_field("type")?)? {
        ShareKind::User => share.str_field("userName").map(|n| format!("user:{}", n)),
        ShareKind::Group => share.str_field("name").map(|n| format!("group:{}", n)),
    }
}

fn shares_endpoint(dashboard_id: &str) -> String {
    format!("/api/shares/dashboard/{}", path_segment(dashboard_id))
}

/// Retry without `adminAccess` when the admin request is refused
async fn get_with_admin_fallback(api: &dyn ApiTransport, base: &str) -> Result<ApiResponse> {
    let response = api.get(&format!("{}?adminAccess=true", base)).await?;
    if response.status == 403 {
        debug!(endpoint = base, "admin access refused, retrying as owner");
        return api.get(base).await;
    }
    Ok(response)
}

async fn post_with_admin_fallback(api: &dyn ApiTransport, base: &str, body: &Value) -> Result<ApiResponse> {
    let response = api.post(&format!("{}?adminAccess=true", base), body).await?;
    if response.status == 403 {
        debug!(endpoint = base, "admin access refused, retrying as owner");
        return api.post(base, body).await;
    }
    Ok(response)
}

impl Migrator {
    /// Copy shares from each source dashboard to its target counterpart.
    ///
    /// `source_ids[i]` pairs with `target_ids[i]`. With `change_ownership`,
    /// the target dashboard is handed to the source owner when that user
    /// exists on the target.
    pub async fn migrate_dashboard_shares(
        &self,
        source_ids: &[String],
        target_ids: &[String],
        change_ownership: bool,
    ) -> Result<ShareMigrationReport> {
        if source_ids.is_empty() || target_ids.is_empty() {
            return Err(SdkError::invalid("source and target dashboard ids are required"));
        }
        if source_ids.len() != target_ids.len() {
            return Err(SdkError::invalid(format!(
                "got {} source ids but {} target ids",
                source_ids.len(),
                target_ids.len()
            )));
        }

        let principals = PrincipalMaps::load(self, false).await?;
        let mut report = ShareMigrationReport {
            total_dashboards: source_ids.len(),
            ..Default::default()
        };

        for (source_id, target_id) in source_ids.iter().zip(target_ids) {
            self.migrate_pair(source_id, target_id, change_ownership, &principals, &mut report)
                .await;
        }

        info!(
            dashboards = report.total_dashboards,
            succeeded = report.shares_succeeded,
            failed = report.shares_failed,
            unmapped = report.shares_unmapped,
            "dashboard share migration finished"
        );
        Ok(report)
    }

    async fn migrate_pair(
        &self,
        source_id: &str,
        target_id: &str,
        change_ownership: bool,
        principals: &PrincipalMaps,
        report: &mut ShareMigrationReport,
    ) {
        let source_endpoint = format!("{}?adminAccess=true", shares_endpoint(source_id));
        let source_state = match self.source().get_json(&source_endpoint).await {
            Ok(state) => state,
            Err(e) => {
                error!(source_id, error = %e, "could not read source shares");
                report.record(source_id, target_id, ShareStatus::Failed, Some(e.to_string()));
                return;
            }
        };

        let source_shares = source_state.array_field("sharesTo");
        if source_shares.is_empty() {
            warn!(source_id, "source dashboard has no shares");
            report.record(source_id, target_id, ShareStatus::Skipped, Some("no shares on source".into()));
            return;
        }
        let new_shares: Vec<MappedShare> = source_shares.iter().filter_map(|s| map_share(s, principals)).collect();
        report.shares_unmapped += source_shares.len() - new_shares.len();

        let target_base = shares_endpoint(target_id);
        let target_state = match get_with_admin_fallback(self.target(), &target_base).await {
            Ok(resp) if resp.status == 200 => resp.value().unwrap_or(Value::Null),
            Ok(resp) => {
                let reason = resp.to_error(&target_base).to_string();
                error!(target_id, %reason, "could not read target shares");
                report.shares_failed += new_shares.len();
                report.record(source_id, target_id, ShareStatus::Failed, Some(reason));
                return;
            }
            Err(e) => {
                error!(target_id, error = %e, "could not read target shares");
                report.shares_failed += new_shares.len();
                report.record(source_id, target_id, ShareStatus::Failed, Some(e.to_string()));
                return;
            }
        };

        let existing = target_state.array_field("sharesTo");
        let mut seen: HashSet<String> = existing.iter().filter_map(existing_key).collect();
        let additions: Vec<Value> = new_shares
            .into_iter()
            .filter(|s| seen.insert(s.key.clone()))
            .map(|s| s.body)
            .collect();

        let mut result = DashboardShareResult {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            shares_added: 0,
            owner_changed: false,
            status: ShareStatus::Skipped,
            reason: None,
        };

        if additions.is_empty() {
            info!(target_id, "target already carries every mappable share");
            result.reason = Some("nothing new to share".into());
        } else {
            let mut all = restore_payload(existing);
            all.extend(additions.iter().cloned());
            match post_with_admin_fallback(self.target(), &target_base, &json!({ "sharesTo": all })).await {
                Ok(resp) if resp.status == 200 || resp.status == 201 => {
                    info!(target_id, added = additions.len(), "shares migrated");
                    report.shares_succeeded += additions.len();
                    result.shares_added = additions.len();
                    result.status = ShareStatus::Migrated;
                }
                Ok(resp) => {
                    let reason = resp.to_error(&target_base).to_string();
                    error!(target_id, %reason, "share update rejected");
                    report.shares_failed += additions.len();
                    result.status = ShareStatus::Failed;
                    result.reason = Some(reason);
                }
                Err(e) => {
                    error!(target_id, error = %e, "share update failed");
                    report.shares_failed += additions.len();
                    result.status = ShareStatus::Failed;
                    result.reason = Some(e.to_string());
                }
            }
        }

        if change_ownership {
            result.owner_changed = self.transfer_owner(&source_state, &target_state, target_id, principals).await;
        }
        report.dashboards.push(result);
    }

    /// Hand the target dashboard to the source owner. Returns whether the owner changed.
    async fn transfer_owner(
        &self,
        source_state: &Value,
        target_state: &Value,
        target_id: &str,
        principals: &PrincipalMaps,
    ) -> bool {
        let owner = source_state.get("owner");
        let owner_name = owner.map(|o| o.string_or("userName", "unknown user")).unwrap_or_default();
        let Some(new_owner) = owner
            .and_then(|o| o.str_field("_id"))
            .and_then(|id| principals.users.target_id(id))
        else {
            warn!(owner = %owner_name, target_id, "source owner missing on target, ownership unchanged");
            return false;
        };

        let current = target_state.get("owner").and_then(|o| o.str_field("_id"));
        if current == Some(new_owner) {
            debug!(target_id, "target already owned by the source owner");
            return false;
        }

        let attempt = change_dashboard_owner(self.target(), target_id, new_owner, PREVIOUS_OWNER_RULE, true).await;
        let outcome = match attempt {
            Err(e) if e.is_forbidden() || e.is_recoverable() => {
                debug!(target_id, error = %e, "owner change with admin access failed, retrying as owner");
                change_dashboard_owner(self.target(), target_id, new_owner, PREVIOUS_OWNER_RULE, false).await
            }
            other => other,
        };
        match outcome {
            Ok(()) => {
                info!(target_id, owner = %owner_name, "ownership transferred");
                true
            }
            Err(e) => {
                error!(target_id, error = %e, "ownership transfer failed");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use std::sync::Arc;

    /// Users and groups on both sides: ana and the Finance group exist on
    /// both, bo only on the source.
    pub(crate) fn principals(source: &MockTransport, target: &MockTransport) {
        source.respond(
            HttpMethod::Get,
            crate::access::USERS_EXPANDED,
            200,
            json!([
                {"_id": "su1", "email": "ana@corp.io", "userName": "ana@corp.io"},
                {"_id": "su2", "email": "bo@corp.io", "userName": "bo@corp.io"}
            ]),
        );
        target.respond(
            HttpMethod::Get,
            crate::access::USERS_EXPANDED,
            200,
            json!([{"_id": "tu1", "email": "ana@corp.io", "userName": "ana@corp.io"}]),
        );
        source.respond(
            HttpMethod::Get,
            "/api/v1/groups",
            200,
            json!([{"_id": "sg1", "name": "Finance"}, {"_id": "sg0", "name": "Everyone"}]),
        );
        target.respond(
            HttpMethod::Get,
            "/api/v1/groups",
            200,
            json!([{"_id": "tg1", "name": "Finance"}, {"_id": "tg0", "name": "Everyone"}]),
        );
    }

    fn source_shares() -> Value {
        json!({
            "owner": {"_id": "su1", "userName": "ana@corp.io"},
            "sharesTo": [
                {"shareId": "su1", "type": "user", "rule": "edit"},
                {"shareId": "su2", "type": "user", "rule": "view"},
                {"shareId": "sg1", "type": "group"}
            ]
        })
    }

    fn setup() -> (Arc<MockTransport>, Arc<MockTransport>, Migrator) {
        let source = Arc::new(MockTransport::new());
        let target = Arc::new(MockTransport::new());
        principals(&source, &target);
        let migrator = Migrator::new(source.clone(), target.clone());
        (source, target, migrator)
    }

    #[tokio::test]
    async fn test_shares_are_mapped_and_deduplicated() {
        let (source, target, migrator) = setup();
        source.respond(HttpMethod::Get, "/api/shares/dashboard/s1?adminAccess=true", 200, source_shares());
        target.respond(
            HttpMethod::Get,
            "/api/shares/dashboard/t1?adminAccess=true",
            200,
            json!({
                "owner": {"_id": "tu9"},
                "sharesTo": [{"shareId": "tg1", "type": "group", "name": "Finance", "rule": "viewer"}]
            }),
        );
        target.respond(HttpMethod::Post, "/api/shares/dashboard/t1?adminAccess=true", 200, json!({}));

        let report = migrator
            .migrate_dashboard_shares(&["s1".into()], &["t1".into()], false)
            .await
            .unwrap();
        assert_eq!(report.shares_succeeded, 1);
        assert_eq!(report.shares_unmapped, 1);
        assert_eq!(report.dashboards[0].status, ShareStatus::Migrated);

        let posted = target
            .calls()
            .into_iter()
            .find(|c| c.method == HttpMethod::Post)
            .and_then(|c| c.body)
            .unwrap();
        let shares = posted["sharesTo"].as_list();
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[1], json!({"shareId": "tu1", "type": "user", "rule": "edit", "subscribe": false}));
    }

    #[tokio::test]
    async fn test_forbidden_target_falls_back_and_changes_owner() {
        let (source, target, migrator) = setup();
        source.respond(HttpMethod::Get, "/api/shares/dashboard/s1?adminAccess=true", 200, source_shares());
        target.respond(HttpMethod::Get, "/api/shares/dashboard/t1?adminAccess=true", 403, json!({}));
        target.respond(
            HttpMethod::Get,
            "/api/shares/dashboard/t1",
            200,
            json!({"owner": {"_id": "tu9"}, "sharesTo": []}),
        );
        target.respond(HttpMethod::Post, "/api/shares/dashboard/t1?adminAccess=true", 201, json!({}));
        target.respond(
            HttpMethod::Post,
            "/api/v1/dashboards/t1/change_owner?adminAccess=true",
            200,
            json!({}),
        );

        let report = migrator
            .migrate_dashboard_shares(&["s1".into()], &["t1".into()], true)
            .await
            .unwrap();
        let result = &report.dashboards[0];
        assert_eq!(result.shares_added, 2);
        assert_eq!(report.shares_unmapped, 1);
        assert!(result.owner_changed);
        assert_eq!(target.count(HttpMethod::Get, "/api/shares/dashboard/t1"), 2);
    }

    #[tokio::test]
    async fn test_unreadable_source_marks_pair_failed() {
        let (_, _, migrator) = setup();
        let report = migrator
            .migrate_dashboard_shares(&["s1".into(), "s2".into()], &["t1".into(), "t2".into()], false)
            .await
            .unwrap();
        assert_eq!(report.total_dashboards, 2);
        assert_eq!(report.failed_dashboards().count(), 2);
    }

    #[tokio::test]
    async fn test_mismatched_lists_rejected() {
        let (_, _, migrator) = setup();
        let err = migrator
            .migrate_dashboard_shares(&["s1".into()], &[], false)
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::InvalidArgument(_)));
    }
}
