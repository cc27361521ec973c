//! User migration
//!
//! Roles and groups are re-pointed at the target's own ids by name. A user
//! whose role does not exist on the target is not sent at all; groups that
//! do not exist there are dropped from the user with a warning.

use super::{MigrationSummary, Migrator, NameIndex};
use crate::access::{is_excluded_group, list_groups, list_roles, list_users};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde_json::{json, Value};
use tracing::{info, warn};

const USERS_BULK: &str = "/api/v1/users/bulk";

/// Role name of the built-in super administrator, never copied in bulk
pub const SUPER_ROLE: &str = "super";

fn role_name(user: &Value) -> Option<&str> {
    user.get("role").and_then(|r| r.str_field("name"))
}

/// Bulk-create body for one source user. `Err` carries the reason it cannot be sent.
pub fn user_payload(user: &Value, roles: &NameIndex, groups: &NameIndex) -> std::result::Result<Value, String> {
    let email = user.string_or("email", "");
    let role = role_name(user).ok_or_else(|| "source user has no role".to_string())?;
    let role_id = roles
        .id(role)
        .ok_or_else(|| format!("role '{}' does not exist on the target", role))?;

    let mut group_ids = Vec::new();
    for name in user.array_field("groups").iter().filter_map(|g| g.str_field("name")) {
        if is_excluded_group(name) {
            continue;
        }
        match groups.id(name) {
            Some(id) => group_ids.push(id.to_string()),
            None => warn!(user = %email, group = name, "group missing on target, dropping membership"),
        }
    }

    Ok(json!({
        "email": email,
        "firstName": user.string_or("firstName", ""),
        "lastName": user.string_or("lastName", ""),
        "roleId": role_id,
        "groups": group_ids,
        "preferences": user.get("preferences").cloned().unwrap_or_else(|| json!({"localeId": "en-US"})),
    }))
}

impl Migrator {
    /// Copy the users with the given emails
    pub async fn migrate_users(&self, emails: &[String]) -> Result<MigrationSummary> {
        if emails.is_empty() {
            return Err(SdkError::invalid("no user emails given"));
        }
        let users = list_users(self.source())
            .await
            .map_err(|e| e.with_context("listing source users"))?;

        let mut summary = MigrationSummary::new();
        let mut selected = Vec::new();
        for email in emails {
            match users.iter().find(|u| u.str_field("email") == Some(email.as_str())) {
                Some(user) => selected.push(user),
                None => summary.fail(email.as_str(), "not found in the source environment"),
            }
        }
        summary.merge(self.send_users(&selected).await?);
        Ok(summary)
    }

    /// Copy every user except super administrators
    pub async fn migrate_all_users(&self) -> Result<MigrationSummary> {
        let users = list_users(self.source())
            .await
            .map_err(|e| e.with_context("listing source users"))?;
        let selected: Vec<&Value> = users.iter().filter(|u| role_name(u) != Some(SUPER_ROLE)).collect();
        info!(count = selected.len(), skipped_super = users.len() - selected.len(), "migrating all users");
        self.send_users(&selected).await
    }

    async fn send_users(&self, users: &[&Value]) -> Result<MigrationSummary> {
        let mut summary = MigrationSummary::new();
        if users.is_empty() {
            warn!("no matching users on the source");
            return Ok(summary);
        }

        let roles = list_roles(self.target())
            .await
            .map_err(|e| e.with_context("listing target roles"))?;
        let groups = list_groups(self.target())
            .await
            .map_err(|e| e.with_context("listing target groups"))?;
        let roles = NameIndex::build(&roles, "name", "_id");
        let groups = NameIndex::build(&groups, "name", "_id");

        let mut payload = Vec::with_capacity(users.len());
        for user in users {
            match user_payload(user, &roles, &groups) {
                Ok(body) => payload.push(body),
                Err(reason) => {
                    warn!(user = %user.string_or("email", ""), %reason, "user not migrated");
                    summary.fail(user.string_or("email", ""), reason);
                }
            }
        }

        if !payload.is_empty() {
            summary.merge(self.bulk_create(USERS_BULK, payload, "email").await);
        }
        Ok(summary)
    }
}
