//! Dashboard shares, ownership changes and column listings

use super::jaql::{collect_dims, distinct_refs, DimSource};
use super::Dashboards;
use crate::access::{find_group, find_user};
use crate::client::{path_segment, ApiTransport};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Kind of principal a share points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareKind {
    User,
    Group,
}

impl ShareKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
        }
    }

    /// Parse the wire name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

impl fmt::Display for ShareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A share to grant: user email or group name plus an access rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    pub name: String,
    pub kind: ShareKind,
    pub rule: String,
}

impl ShareRequest {
    /// Share with a user, by email
    pub fn user(email: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            name: email.into(),
            kind: ShareKind::User,
            rule: rule.into(),
        }
    }

    /// Share with a group, by name
    pub fn group(name: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ShareKind::Group,
            rule: rule.into(),
        }
    }
}

/// What [`Dashboards::add_dashboard_shares`] changed, as share ids
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShareUpdate {
    pub new_users: Vec<String>,
    pub new_groups: Vec<String>,
    pub updated_users: Vec<String>,
    pub updated_groups: Vec<String>,
    /// Requested names that matched no user or group
    pub unresolved: Vec<String>,
}

impl ShareUpdate {
    /// True when the dashboard was left untouched
    pub fn is_noop(&self) -> bool {
        self.new_users.is_empty()
            && self.new_groups.is_empty()
            && self.updated_users.is_empty()
            && self.updated_groups.is_empty()
    }
}

/// One resolved share of a dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardShareRow {
    #[serde(rename = "type")]
    pub share_type: ShareKind,
    pub name: String,
    pub rule: Option<String>,
}

/// One distinct column referenced by a dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardColumnRow {
    pub dashboard_name: String,
    pub source: DimSource,
    pub widget_id: Option<String>,
    pub table: String,
    pub column: String,
}

fn shares_endpoint(dashboard_id: &str, admin_access: bool) -> String {
    let base = format!("/api/shares/dashboard/{}", path_segment(dashboard_id));
    if admin_access {
        format!("{}?adminAccess=true", base)
    } else {
        base
    }
}

/// Current `sharesTo` list of a dashboard.
///
/// Tries with `adminAccess=true` first and falls back to a plain request.
pub async fn fetch_dashboard_shares(api: &dyn ApiTransport, dashboard_id: &str) -> Result<Vec<Value>> {
    let admin = shares_endpoint(dashboard_id, true);
    let body = match api.get_json(&admin).await {
        Ok(body) => body,
        Err(e) => {
            warn!(dashboard_id, error = %e, "share lookup with admin access failed, retrying without");
            api.get_json(&shares_endpoint(dashboard_id, false)).await?
        }
    };
    Ok(body.array_field("sharesTo").to_vec())
}

/// Replace the share list of a dashboard, with the same admin fallback
pub async fn post_dashboard_shares(api: &dyn ApiTransport, dashboard_id: &str, shares: &[Value]) -> Result<()> {
    let body = json!({ "sharesTo": shares });
    let admin = shares_endpoint(dashboard_id, true);
    let first = match api.post(&admin, &body).await {
        Ok(resp) => resp.expect_status(&admin, &[200]).map(|_| ()),
        Err(e) => Err(e),
    };
    if let Err(e) = first {
        warn!(dashboard_id, error = %e, "share update with admin access failed, retrying without");
        let plain = shares_endpoint(dashboard_id, false);
        api.post(&plain, &body)
            .await?
            .expect_status(&plain, &[200])?;
    }
    Ok(())
}

/// Hand a dashboard to a new owner. The previous owner keeps a share with
/// `original_owner_rule`.
pub async fn change_dashboard_owner(
    api: &dyn ApiTransport,
    dashboard_id: &str,
    owner_id: &str,
    original_owner_rule: &str,
    admin_access: bool,
) -> Result<()> {
    let mut endpoint = format!("/api/v1/dashboards/{}/change_owner", path_segment(dashboard_id));
    if admin_access {
        endpoint.push_str("?adminAccess=true");
    }
    let body = json!({ "ownerId": owner_id, "originalOwnerRule": original_owner_rule });
    api.post(&endpoint, &body)
        .await?
        .expect_status(&endpoint, &[200])?;
    debug!(dashboard_id, owner_id, "dashboard owner changed");
    Ok(())
}

/// Shares in the shape the share endpoint accepts back
pub(crate) fn restore_payload(shares: &[Value]) -> Vec<Value> {
    shares
        .iter()
        .filter_map(|s| {
            let share_id = s.str_field("shareId")?;
            Some(json!({
                "shareId": share_id,
                "type": s.string_or("type", "user"),
                "rule": s.string_or("rule", "edit"),
                "subscribe": s.bool_field("subscribe").unwrap_or(false),
            }))
        })
        .collect()
}

struct ResolvedShare {
    share_id: String,
    kind: ShareKind,
    rule: String,
}

impl Dashboards {
    /// Grant or update shares on a dashboard.
    ///
    /// Existing shares are kept. A requested principal that already has the
    /// same rule is left alone; a different rule replaces the old entry.
    pub async fn add_dashboard_shares(
        &self,
        dashboard_id: &str,
        requests: &[ShareRequest],
    ) -> Result<ShareUpdate> {
        let api = self.api();
        let mut update = ShareUpdate::default();
        info!(dashboard_id, requested = requests.len(), "updating dashboard shares");

        let mut resolved = Vec::new();
        for request in requests {
            let share_id = match request.kind {
                ShareKind::User => find_user(api, &request.name).await.map(|u| u.user_id),
                ShareKind::Group => find_group(api, &request.name).await.map(|g| g.group_id),
            };
            match share_id {
                Ok(share_id) => resolved.push(ResolvedShare {
                    share_id,
                    kind: request.kind,
                    rule: request.rule.clone(),
                }),
                Err(SdkError::NotFound(_)) => {
                    error!(name = %request.name, kind = %request.kind, "share target not found, skipping");
                    update.unresolved.push(request.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let existing = fetch_dashboard_shares(api, dashboard_id).await?;
        // The owner entry carries no rule
        let existing_rules: HashMap<&str, &str> = existing
            .iter()
            .filter_map(|s| Some((s.str_field("shareId")?, s.str_field("rule")?)))
            .collect();
        debug!(dashboard_id, existing = existing.len(), "existing shares");

        let mut changed = Vec::new();
        for share in &resolved {
            let bucket = match (existing_rules.get(share.share_id.as_str()), share.kind) {
                (Some(rule), _) if *rule == share.rule => continue,
                (Some(_), ShareKind::User) => &mut update.updated_users,
                (Some(_), ShareKind::Group) => &mut update.updated_groups,
                (None, ShareKind::User) => &mut update.new_users,
                (None, ShareKind::Group) => &mut update.new_groups,
            };
            bucket.push(share.share_id.clone());
            changed.push(share);
        }

        if update.is_noop() {
            info!(dashboard_id, "all requested principals already have access with the same rule");
            return Ok(update);
        }

        let mut payload: Vec<Value> = existing
            .iter()
            .filter(|s| {
                let id = s.str_field("shareId").unwrap_or_default();
                !changed.iter().any(|c| c.share_id == id)
            })
            .cloned()
            .collect();
        payload.extend(changed.iter().map(|c| {
            json!({
                "shareId": c.share_id,
                "type": c.kind.as_str(),
                "rule": c.rule,
            })
        }));

        post_dashboard_shares(api, dashboard_id, &payload).await?;
        info!(
            dashboard_id,
            new_users = update.new_users.len(),
            new_groups = update.new_groups.len(),
            updated = update.updated_users.len() + update.updated_groups.len(),
            "dashboard shares updated"
        );
        Ok(update)
    }

    /// Users and groups a dashboard is shared with, by email and group name
    pub async fn get_dashboard_share(&self, dashboard_name: &str) -> Result<Vec<DashboardShareRow>> {
        let candidates = self.get_dashboard_by_name(dashboard_name).await?;
        let dashboard = candidates
            .iter()
            .find(|d| {
                d.str_field("title")
                    .map(|t| t.eq_ignore_ascii_case(dashboard_name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| SdkError::not_found(format!("dashboard '{}'", dashboard_name)))?;

        let shares = dashboard.array_field("shares");
        if shares.is_empty() {
            info!(dashboard = dashboard_name, "dashboard has no shares");
            return Ok(Vec::new());
        }

        let api = self.api();
        let users = api.get_json("/api/v1/users").await?;
        let emails: HashMap<&str, &str> = users
            .as_list()
            .iter()
            .filter_map(|u| Some((u.str_field("_id")?, u.str_field("email").unwrap_or("Unknown Email"))))
            .collect();
        let groups = api.get_json("/api/v1/groups").await?;
        let group_names: HashMap<&str, &str> = groups
            .as_list()
            .iter()
            .filter_map(|g| Some((g.str_field("_id")?, g.str_field("name").unwrap_or("Unknown Group"))))
            .collect();

        let rows: Vec<DashboardShareRow> = shares
            .iter()
            .filter_map(|share| {
                let kind = ShareKind::parse(share.str_field("type")?)?;
                let id = share.str_field("shareId")?;
                let name = match kind {
                    ShareKind::User => emails.get(id)?,
                    ShareKind::Group => group_names.get(id)?,
                };
                Some(DashboardShareRow {
                    share_type: kind,
                    name: name.to_string(),
                    rule: share.str_field("rule").map(str::to_string),
                })
            })
            .collect();
        info!(dashboard = dashboard_name, count = rows.len(), "resolved dashboard shares");
        Ok(rows)
    }

    /// Distinct columns a dashboard references in its filters and widgets
    pub async fn get_dashboard_columns(&self, dashboard_name: &str) -> Result<Vec<DashboardColumnRow>> {
        let found = self.get_dashboard_by_name(dashboard_name).await?;
        let dashboard_id = found
            .first()
            .and_then(|d| d.str_field("oid"))
            .ok_or_else(|| SdkError::not_found(format!("dashboard '{}'", dashboard_name)))?;

        let exported = self.export_dashboard(dashboard_id).await?;
        let refs = collect_dims(&exported);
        let total = refs.len();
        let rows: Vec<DashboardColumnRow> = distinct_refs(refs)
            .into_iter()
            .map(|r| DashboardColumnRow {
                dashboard_name: dashboard_name.to_string(),
                source: r.source,
                widget_id: r.widget_id,
                table: r.table,
                column: r.column,
            })
            .collect();
        info!(dashboard = dashboard_name, total, distinct = rows.len(), "extracted dashboard columns");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use std::sync::Arc;

    fn directory(mock: &MockTransport) {
        mock.respond(
            HttpMethod::Get,
            "/api/v1/users?expand=groups,role",
            200,
            json!([
                {"_id": "u1", "userName": "ann", "firstName": "Ann", "email": "ann@corp.com",
                 "active": true, "role": {"_id": "r1", "name": "consumer"}},
                {"_id": "u2", "userName": "bob", "firstName": "Bob", "email": "bob@corp.com",
                 "active": true, "role": {"_id": "r1", "name": "consumer"}}
            ]),
        );
        mock.respond(
            HttpMethod::Get,
            "/api/v1/groups?name=Finance",
            200,
            json!([{"_id": "g1", "name": "Finance"}]),
        );
        mock.respond(HttpMethod::Get, "/api/v1/groups?name=Ghosts", 200, json!([]));
    }

    #[test]
    fn test_share_kind() {
        assert_eq!(ShareKind::parse("group"), Some(ShareKind::Group));
        assert_eq!(ShareKind::parse("team"), None);
        assert_eq!(ShareKind::User.to_string(), "user");
    }

    #[test]
    fn test_restore_payload_defaults() {
        let payload = restore_payload(&[json!({"shareId": "u1", "type": "user"}), json!({"type": "user"})]);
        assert_eq!(
            payload,
            vec![json!({"shareId": "u1", "type": "user", "rule": "edit", "subscribe": false})]
        );
    }

    #[tokio::test]
    async fn test_add_shares_merges_new_and_updated() {
        let mock = Arc::new(MockTransport::new());
        directory(&mock);
        mock.respond(
            HttpMethod::Get,
            "/api/shares/dashboard/d1?adminAccess=true",
            200,
            json!({"sharesTo": [
                {"shareId": "owner", "type": "user"},
                {"shareId": "u1", "type": "user", "rule": "view"},
                {"shareId": "u2", "type": "user", "rule": "view"}
            ]}),
        );
        mock.respond(HttpMethod::Post, "/api/shares/dashboard/d1?adminAccess=true", 200, json!({}));

        let dashboards = Dashboards::new(mock.clone());
        let update = dashboards
            .add_dashboard_shares(
                "d1",
                &[
                    ShareRequest::user("ann@corp.com", "view"),
                    ShareRequest::user("bob@corp.com", "edit"),
                    ShareRequest::group("Finance", "view"),
                    ShareRequest::group("Ghosts", "view"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(update.updated_users, vec!["u2"]);
        assert_eq!(update.new_groups, vec!["g1"]);
        assert!(update.new_users.is_empty());
        assert_eq!(update.unresolved, vec!["Ghosts"]);

        let post = mock
            .calls()
            .into_iter()
            .find(|c| c.method == HttpMethod::Post)
            .unwrap();
        let sent = post.body.unwrap();
        let sent = sent["sharesTo"].as_array().unwrap().clone();
        assert_eq!(sent.len(), 4);
        assert!(sent.contains(&json!({"shareId": "u2", "type": "user", "rule": "edit"})));
    }

    #[tokio::test]
    async fn test_add_shares_noop() {
        let mock = Arc::new(MockTransport::new());
        directory(&mock);
        mock.respond(
            HttpMethod::Get,
            "/api/shares/dashboard/d1?adminAccess=true",
            200,
            json!({"sharesTo": [{"shareId": "u1", "type": "user", "rule": "view"}]}),
        );
        let dashboards = Dashboards::new(mock.clone());
        let update = dashboards
            .add_dashboard_shares("d1", &[ShareRequest::user("ann@corp.com", "view")])
            .await
            .unwrap();
        assert!(update.is_noop());
        assert_eq!(mock.count(HttpMethod::Post, "/api/shares"), 0);
    }

    #[tokio::test]
    async fn test_fetch_shares_falls_back_without_admin() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(HttpMethod::Get, "/api/shares/dashboard/d1?adminAccess=true", 403, json!({}));
        mock.respond(
            HttpMethod::Get,
            "/api/shares/dashboard/d1",
            200,
            json!({"sharesTo": [{"shareId": "u1"}]}),
        );
        let shares = fetch_dashboard_shares(mock.as_ref(), "d1").await.unwrap();
        assert_eq!(shares.len(), 1);
    }

    #[tokio::test]
    async fn test_get_dashboard_share() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            HttpMethod::Get,
            "/api/v1/dashboards/admin?dashboardType=owner&name=Sales",
            200,
            json!([{"oid": "d1", "title": "Sales", "shares": [
                {"shareId": "u1", "type": "user", "rule": "edit"},
                {"shareId": "g1", "type": "group", "rule": "view"},
                {"shareId": "gone", "type": "group"}
            ]}]),
        );
        mock.respond(HttpMethod::Get, "/api/v1/users", 200, json!([{"_id": "u1", "email": "ann@corp.com"}]));
        mock.respond(HttpMethod::Get, "/api/v1/groups", 200, json!([{"_id": "g1", "name": "Finance"}]));

        let dashboards = Dashboards::new(mock.clone());
        let rows = dashboards.get_dashboard_share("Sales").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "ann@corp.com");
        assert_eq!(rows[1].share_type, ShareKind::Group);
        assert_eq!(rows[1].rule.as_deref(), Some("view"));
    }

    #[tokio::test]
    async fn test_get_dashboard_columns() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            HttpMethod::Get,
            "/api/v1/dashboards/admin?dashboardType=owner&name=Sales",
            200,
            json!([{"oid": "d1", "title": "Sales"}]),
        );
        mock.respond(
            HttpMethod::Get,
            "/api/v1/dashboards/export?dashboardIds=d1&adminAccess=true",
            200,
            json!([{
                "title": "Sales",
                "filters": [{"jaql": {"dim": "[Orders.Date (Calendar)]"}}],
                "widgets": [{"oid": "w1", "metadata": {"panels": [{"items": [
                    {"jaql": {"dim": "[Orders.Date]"}},
                    {"jaql": {"dim": "[Orders.Amount]"}}
                ]}]}}]
            }]),
        );
        let dashboards = Dashboards::new(mock.clone());
        let rows = dashboards.get_dashboard_columns("Sales").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source, DimSource::Filter);
        assert_eq!(rows[1].widget_id.as_deref(), Some("w1"));
        assert_eq!(rows[1].column, "Amount");
    }
}
