//! Share report across every dashboard

use super::AccessManagement;
use crate::dashboard::{search_all, ShareKind};
use crate::error::Result;
use crate::utils::ValueExt;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// One share of one dashboard. Dashboards without shares get a single row
/// with empty share fields; shares pointing at deleted principals keep the
/// dashboard but leave the principal empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareRow {
    pub dashboard_id: String,
    pub dashboard_title: String,
    pub share_type: Option<ShareKind>,
    pub share_name: Option<String>,
    pub rule: Option<String>,
}

impl AccessManagement {
    /// Every share of every dashboard, with users shown by email and groups by name
    pub async fn get_all_dashboard_shares(&self) -> Result<Vec<ShareRow>> {
        let api = self.api();
        let dashboards = search_all(api).await?;

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

        let mut rows = Vec::new();
        for dashboard in &dashboards {
            let dashboard_id = dashboard.string_or("oid", "");
            let dashboard_title = dashboard.string_or("title", "");
            let shares = dashboard.array_field("shares");
            if shares.is_empty() {
                rows.push(ShareRow {
                    dashboard_id,
                    dashboard_title,
                    share_type: None,
                    share_name: None,
                    rule: None,
                });
                continue;
            }
            for share in shares {
                let share_id = share.str_field("shareId").unwrap_or_default();
                let resolved = match share.str_field("type").and_then(ShareKind::parse) {
                    Some(ShareKind::User) => emails.get(share_id).map(|e| (ShareKind::User, e.to_string())),
                    Some(ShareKind::Group) => group_names.get(share_id).map(|n| (ShareKind::Group, n.to_string())),
                    None => None,
                };
                let (share_type, share_name) = match resolved {
                    Some((kind, name)) => (Some(kind), Some(name)),
                    None => (None, None),
                };
                rows.push(ShareRow {
                    dashboard_id: dashboard_id.clone(),
                    dashboard_title: dashboard_title.clone(),
                    share_type,
                    share_name,
                    rule: share.str_field("rule").map(str::to_string),
                });
            }
        }

        info!(dashboards = dashboards.len(), rows = rows.len(), "collected dashboard shares");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::{ApiResponse, HttpMethod};
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_all_dashboard_shares() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_with(HttpMethod::Post, "/api/v1/dashboards/searches", |body| {
            let skip = body
                .and_then(|b| b.pointer("/queryOptions/skip"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let items = if skip == 0 {
                json!([
                    {"oid": "d1", "title": "Sales", "shares": [
                        {"shareId": "u1", "type": "user", "rule": "edit"},
                        {"shareId": "g1", "type": "group", "rule": "view"},
                        {"shareId": "gone", "type": "user", "rule": "view"}
                    ]},
                    {"oid": "d2", "title": "Empty"}
                ])
            } else {
                json!([])
            };
            Ok(ApiResponse::new(200, json!({"items": items}).to_string()))
        });
        mock.respond(HttpMethod::Get, "/api/v1/users", 200, json!([{"_id": "u1", "email": "ann@corp.com"}]));
        mock.respond(HttpMethod::Get, "/api/v1/groups", 200, json!([{"_id": "g1", "name": "Finance"}]));

        let access = AccessManagement::new(mock.clone());
        let rows = access.get_all_dashboard_shares().await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].share_name.as_deref(), Some("ann@corp.com"));
        assert_eq!(rows[1].share_type, Some(ShareKind::Group));
        assert_eq!(rows[2].share_type, None);
        assert_eq!(rows[3].dashboard_title, "Empty");
        assert_eq!(rows[3].rule, None);
    }
}
