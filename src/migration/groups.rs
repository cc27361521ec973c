//! Group migration

use super::{MigrationSummary, Migrator};
use crate::access::{is_excluded_group, list_groups};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde_json::Value;
use tracing::{info, warn};

const GROUPS_BULK: &str = "/api/v1/groups/bulk";

/// Server-managed fields that must not be sent back
const SERVER_FIELDS: [&str; 4] = ["created", "lastUpdated", "tenantId", "_id"];

/// Built-in group never copied by [`Migrator::migrate_all_groups`]
pub const ADMINS_GROUP: &str = "Admins";

/// Group body for the bulk endpoint
pub fn group_payload(group: &Value) -> Value {
    let mut payload = group.clone();
    if let Some(fields) = payload.as_object_mut() {
        for field in SERVER_FIELDS {
            fields.remove(field);
        }
    }
    payload
}

impl Migrator {
    /// Copy the named groups. Names missing on the source are reported as failed.
    pub async fn migrate_groups(&self, names: &[String]) -> Result<MigrationSummary> {
        if names.is_empty() {
            return Err(SdkError::invalid("no group names given"));
        }
        info!(count = names.len(), "migrating groups");
        let groups = list_groups(self.source())
            .await
            .map_err(|e| e.with_context("listing source groups"))?;

        let mut summary = MigrationSummary::new();
        let mut payload = Vec::new();
        for name in names {
            match groups.iter().find(|g| g.str_field("name") == Some(name.as_str())) {
                Some(group) => payload.push(group_payload(group)),
                None => summary.fail(name.as_str(), "not found in the source environment"),
            }
        }

        if payload.is_empty() {
            warn!("no matching groups on the source");
            return Ok(summary);
        }
        summary.merge(self.bulk_create(GROUPS_BULK, payload, "name").await);
        Ok(summary)
    }

    /// Copy every group except the built-in ones
    pub async fn migrate_all_groups(&self) -> Result<MigrationSummary> {
        let groups = list_groups(self.source())
            .await
            .map_err(|e| e.with_context("listing source groups"))?;
        let payload: Vec<Value> = groups
            .iter()
            .filter(|g| {
                g.str_field("name")
                    .map(|n| n != ADMINS_GROUP && !is_excluded_group(n))
                    .unwrap_or(false)
            })
            .map(group_payload)
            .collect();

        if payload.is_empty() {
            info!("no groups to migrate");
            return Ok(MigrationSummary::new());
        }
        info!(count = payload.len(), "migrating all groups");
        Ok(self.bulk_create(GROUPS_BULK, payload, "name").await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::{ApiResponse, HttpMethod};
    use serde_json::json;
    use std::sync::Arc;

    fn source_groups() -> Value {
        json!([
            {"_id": "g1", "name": "Finance", "created": "2024-01-01", "tenantId": "t"},
            {"_id": "g2", "name": "Sales", "lastUpdated": "2024-02-01"},
            {"_id": "g3", "name": "Ops"},
            {"_id": "g4", "name": "Admins"},
            {"_id": "g5", "name": "Everyone"}
        ])
    }

    fn setup() -> (Arc<MockTransport>, Arc<MockTransport>, Migrator) {
        let source = Arc::new(MockTransport::new());
        let target = Arc::new(MockTransport::new());
        source.respond(HttpMethod::Get, "/api/v1/groups", 200, source_groups());
        let migrator = Migrator::new(source.clone(), target.clone());
        (source, target, migrator)
    }

    fn echo_names() -> impl Fn(Option<&Value>) -> Result<ApiResponse> + Send + Sync {
        |body: Option<&Value>| {
            let created: Vec<Value> = body
                .map(|b| b.as_list().iter().map(|g| json!({"name": g["name"], "_id": "new"})).collect())
                .unwrap_or_default();
            Ok(ApiResponse::new(201, Value::Array(created).to_string()))
        }
    }

    #[tokio::test]
    async fn test_migrate_three_groups() {
        let (_, target, migrator) = setup();
        target.respond_with(HttpMethod::Post, GROUPS_BULK, echo_names());

        let names: Vec<String> = ["Finance", "Sales", "Ops"].iter().map(|s| s.to_string()).collect();
        let summary = migrator.migrate_groups(&names).await.unwrap();
        assert_eq!(summary.succeeded, names);
        assert!(summary.is_clean());

        let body = target.calls()[0].body.clone().unwrap();
        assert_eq!(body.as_list().len(), 3);
        assert!(body[0].get("_id").is_none());
        assert!(body[0].get("created").is_none());
        assert!(body[0].get("tenantId").is_none());
    }

    #[tokio::test]
    async fn test_missing_group_is_failed() {
        let (_, target, migrator) = setup();
        target.respond_text(HttpMethod::Post, GROUPS_BULK, 201, "created");

        let summary = migrator
            .migrate_groups(&["Finance".to_string(), "Legal".to_string()])
            .await
            .unwrap();
        assert_eq!(summary.succeeded, vec!["Finance"]);
        assert_eq!(summary.failed[0].name, "Legal");
        assert_eq!(summary.total(), 2);
    }

    #[tokio::test]
    async fn test_rejected_bulk_fails_all() {
        let (_, target, migrator) = setup();
        target.respond(HttpMethod::Post, GROUPS_BULK, 400, json!({"error": "bad"}));

        let summary = migrator
            .migrate_groups(&["Finance".to_string(), "Ops".to_string()])
            .await
            .unwrap();
        assert_eq!(summary.failed.len(), 2);
        assert!(summary.failed[0].reason.contains("HTTP 400"));
    }

    #[tokio::test]
    async fn test_migrate_all_skips_builtin_groups() {
        let (_, target, migrator) = setup();
        target.respond_with(HttpMethod::Post, GROUPS_BULK, echo_names());

        let summary = migrator.migrate_all_groups().await.unwrap();
        assert_eq!(summary.succeeded, vec!["Finance", "Sales", "Ops"]);
    }
}
