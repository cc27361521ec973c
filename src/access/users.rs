//! Users: lookup, listing, create, update, delete

use super::AccessManagement;
use crate::client::{path_segment, ApiTransport};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

/// User listing with groups and role expanded
pub const USERS_EXPANDED: &str = "/api/v1/users?expand=groups,role";

/// Role names accepted as aliases when creating or updating users
const ROLE_ALIASES: [(&str, &str); 2] = [("VIEWER", "CONSUMER"), ("DESIGNER", "CONTRIBUTOR")];

/// Display name for an internal role name
pub fn display_role(name: &str) -> &str {
    match name {
        "consumer" => "viewer",
        "super" => "sysAdmin",
        "contributor" => "dashboardDesigner",
        other => other,
    }
}

fn canonical_role(name: &str) -> String {
    let upper = name.to_uppercase();
    ROLE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map(|(_, role)| role.to_string())
        .unwrap_or(upper)
}

/// Flat view of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct UserRow {
    pub user_id: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_active: bool,
    pub role_id: String,
    pub role_name: String,
    pub groups: Vec<String>,
}

impl UserRow {
    /// Build from an expanded user object. `None` when id, email or role is missing.
    pub fn from_api(user: &Value) -> Option<Self> {
        let role = user.get("role")?;
        Some(Self {
            user_id: user.str_field("_id")?.to_string(),
            user_name: user.string_or("userName", ""),
            first_name: user.string_or("firstName", ""),
            last_name: user.string_or("lastName", ""),
            email: user.str_field("email")?.to_string(),
            is_active: user.bool_field("active").unwrap_or(false),
            role_id: role.str_field("_id")?.to_string(),
            role_name: display_role(role.str_field("name")?).to_string(),
            groups: user
                .array_field("groups")
                .iter()
                .filter_map(|g| g.str_field("name"))
                .map(str::to_string)
                .collect(),
        })
    }

    /// True when the user's role counts as an administrator
    pub fn is_admin(&self) -> bool {
        super::ADMIN_ROLES.contains(&self.role_name.as_str())
    }
}

/// Every user, with groups and role expanded
pub async fn list_users(api: &dyn ApiTransport) -> Result<Vec<Value>> {
    let users = api.get_json(USERS_EXPANDED).await?;
    Ok(users.as_list().to_vec())
}

/// Every group
pub async fn list_groups(api: &dyn ApiTransport) -> Result<Vec<Value>> {
    let groups = api.get_json("/api/v1/groups").await?;
    Ok(groups.as_list().to_vec())
}

/// Every role
pub async fn list_roles(api: &dyn ApiTransport) -> Result<Vec<Value>> {
    let roles = api.get_json("/api/roles").await?;
    Ok(roles.as_list().to_vec())
}

/// Find a user by email or user name, case-insensitively
pub async fn find_user(api: &dyn ApiTransport, email: &str) -> Result<UserRow> {
    let users = list_users(api).await?;
    debug!(count = users.len(), email, "searching users");
    let matches = |u: &&Value| {
        ["email", "userName"]
            .iter()
            .any(|k| u.str_field(k).map(|v| v.eq_ignore_ascii_case(email)).unwrap_or(false))
    };
    let user = users
        .iter()
        .find(matches)
        .ok_or_else(|| SdkError::not_found(format!("user '{}'", email)))?;
    UserRow::from_api(user)
        .ok_or_else(|| SdkError::unexpected(USERS_EXPANDED, format!("user '{}' is missing id, email or role", email)))
}

/// Role id for a role name. Accepts the VIEWER and DESIGNER aliases.
pub async fn resolve_role(api: &dyn ApiTransport, role: &str) -> Result<String> {
    let wanted = canonical_role(role);
    list_roles(api)
        .await?
        .iter()
        .find(|r| r.str_field("name").map(|n| n.to_uppercase() == wanted).unwrap_or(false))
        .and_then(|r| r.str_field("_id"))
        .map(str::to_string)
        .ok_or_else(|| SdkError::not_found(format!("role '{}'", role)))
}

/// Group ids for group names, matched case-insensitively. Every name must resolve.
pub async fn resolve_groups(api: &dyn ApiTransport, names: &[String]) -> Result<Vec<String>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let groups = list_groups(api).await?;
    names
        .iter()
        .map(|name| {
            groups
                .iter()
                .find(|g| g.str_field("name").map(|n| n.eq_ignore_ascii_case(name)).unwrap_or(false))
                .and_then(|g| g.str_field("_id"))
                .map(str::to_string)
                .ok_or_else(|| SdkError::not_found(format!("group '{}'", name)))
        })
        .collect()
}

/// A user to create
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
    /// Role name, e.g. `viewer`, `designer`, `dataAdmin`
    pub role: String,
    /// Group names
    pub groups: Vec<String>,
    pub preferences: Option<Value>,
}

impl NewUser {
    /// Create with the required fields
    pub fn new(email: impl Into<String>, first_name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: first_name.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    /// Set the last name
    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    /// Set the group names
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Set user preferences such as `{"localeId": "en-US"}`
    pub fn with_preferences(mut self, preferences: Value) -> Self {
        self.preferences = Some(preferences);
        self
    }
}

/// Fields to change on an existing user. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    /// Replaces the user's groups when present
    pub groups: Option<Vec<String>>,
    pub active: Option<bool>,
}

impl UserUpdate {
    /// Change the role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Replace the group memberships
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = Some(groups);
        self
    }

    /// Change the first name
    pub fn with_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }

    /// Change the last name
    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    /// Activate or deactivate
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }
}

impl AccessManagement {
    /// One user by email
    pub async fn get_user(&self, email: &str) -> Result<UserRow> {
        let user = find_user(self.api(), email).await?;
        info!(email, user_id = %user.user_id, "found user");
        Ok(user)
    }

    /// Every user. "Everyone" is dropped from users that belong to other groups too.
    pub async fn get_users_all(&self) -> Result<Vec<UserRow>> {
        let users = list_users(self.api()).await?;
        let mut rows = Vec::with_capacity(users.len());
        for user in &users {
            match UserRow::from_api(user) {
                Some(mut row) => {
                    if row.groups.len() > 1 {
                        row.groups.retain(|g| g != "Everyone");
                    }
                    rows.push(row);
                }
                None => warn!(email = user.str_field("email").unwrap_or("unknown"), "skipping malformed user"),
            }
        }
        if rows.is_empty() {
            warn!("no users found");
        } else {
            info!(count = rows.len(), "retrieved users");
        }
        Ok(rows)
    }

    /// Create a user; returns the created user object
    pub async fn create_user(&self, user: &NewUser) -> Result<Value> {
        let api = self.api();
        let role_id = resolve_role(api, &user.role).await?;
        let group_ids = resolve_groups(api, &user.groups).await?;

        let mut payload = json!({
            "email": user.email,
            "firstName": user.first_name,
            "roleId": role_id,
            "groups": group_ids,
        });
        if let Some(last_name) = &user.last_name {
            payload["lastName"] = json!(last_name);
        }
        if let Some(preferences) = &user.preferences {
            payload["preferences"] = preferences.clone();
        }
        debug!(email = %user.email, "creating user");

        let created = api.post_json("/api/v1/users", &payload).await?;
        info!(email = %user.email, "user created");
        Ok(created)
    }

    /// Patch a user's profile, role or groups
    pub async fn update_user(&self, email: &str, update: &UserUpdate) -> Result<Value> {
        let api = self.api();
        let user = find_user(api, email).await?;

        let mut payload = Map::new();
        if let Some(first_name) = &update.first_name {
            payload.insert("firstName".into(), json!(first_name));
        }
        if let Some(last_name) = &update.last_name {
            payload.insert("lastName".into(), json!(last_name));
        }
        if let Some(active) = update.active {
            payload.insert("active".into(), json!(active));
        }
        if let Some(role) = &update.role {
            payload.insert("roleId".into(), json!(resolve_role(api, role).await?));
        }
        if let Some(groups) = &update.groups {
            payload.insert("groups".into(), json!(resolve_groups(api, groups).await?));
        }
        if payload.is_empty() {
            return Err(SdkError::invalid("user update carries no fields"));
        }

        let endpoint = format!("/api/v1/users/{}", path_segment(&user.user_id));
        let updated = api
            .patch(&endpoint, &Value::Object(payload))
            .await?
            .expect_success(&endpoint)?
            .value()?;
        info!(email, "user updated");
        Ok(updated)
    }

    /// Delete a user by email
    pub async fn delete_user(&self, email: &str) -> Result<()> {
        let api = self.api();
        let user = find_user(api, email).await?;
        let endpoint = format!("/api/v1/users/{}", path_segment(&user.user_id));
        let response = api.delete(&endpoint).await?.expect_success(&endpoint)?;
        if response.status == 204 {
            info!(email, user_id = %user.user_id, "user deleted, no content returned");
        } else {
            info!(email, user_id = %user.user_id, "user deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use std::sync::Arc;

    pub(crate) fn users_fixture() -> Value {
        json!([
            {"_id": "u1", "userName": "ann", "firstName": "Ann", "lastName": "Lee",
             "email": "ann@corp.com", "active": true,
             "role": {"_id": "r-viewer", "name": "consumer"},
             "groups": [{"name": "Everyone"}, {"name": "Finance"}]},
            {"_id": "u2", "userName": "root", "firstName": "Root",
             "email": "root@corp.com", "active": true,
             "role": {"_id": "r-super", "name": "super"},
             "groups": [{"name": "Everyone"}]},
            {"_id": "broken", "email": "broken@corp.com"}
        ])
    }

    fn directory() -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        mock.respond(HttpMethod::Get, USERS_EXPANDED, 200, users_fixture());
        mock.respond(
            HttpMethod::Get,
            "/api/roles",
            200,
            json!([{"_id": "r-viewer", "name": "consumer"}, {"_id": "r-designer", "name": "contributor"}]),
        );
        mock.respond(
            HttpMethod::Get,
            "/api/v1/groups",
            200,
            json!([{"_id": "g1", "name": "Finance"}, {"_id": "g2", "name": "Sales"}]),
        );
        mock
    }

    #[test]
    fn test_display_role() {
        assert_eq!(display_role("consumer"), "viewer");
        assert_eq!(display_role("super"), "sysAdmin");
        assert_eq!(display_role("dataAdmin"), "dataAdmin");
    }

    #[test]
    fn test_canonical_role() {
        assert_eq!(canonical_role("viewer"), "CONSUMER");
        assert_eq!(canonical_role("Designer"), "CONTRIBUTOR");
        assert_eq!(canonical_role("dataAdmin"), "DATAADMIN");
    }

    #[tokio::test]
    async fn test_get_user() {
        let access = AccessManagement::new(directory());
        let user = access.get_user("ANN@corp.com").await.unwrap();
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.role_name, "viewer");
        assert_eq!(user.groups, vec!["Everyone", "Finance"]);

        let missing = access.get_user("nobody@corp.com").await.unwrap_err();
        assert!(matches!(missing, SdkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_users_all_drops_everyone_and_malformed() {
        let access = AccessManagement::new(directory());
        let users = access.get_users_all().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].groups, vec!["Finance"]);
        assert_eq!(users[1].groups, vec!["Everyone"]);
        assert!(users[1].is_admin());
    }

    #[test]
    fn test_user_row_serializes_upper_case() {
        let row = UserRow::from_api(&users_fixture()[0]).unwrap();
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["USER_ID"], "u1");
        assert_eq!(value["ROLE_NAME"], "viewer");
    }

    #[tokio::test]
    async fn test_create_user_resolves_role_and_groups() {
        let mock = directory();
        mock.respond(HttpMethod::Post, "/api/v1/users", 200, json!({"_id": "new"}));
        let access = AccessManagement::new(mock.clone());

        let user = NewUser::new("cy@corp.com", "Cy", "viewer").with_groups(vec!["finance".into()]);
        let created = access.create_user(&user).await.unwrap();
        assert_eq!(created["_id"], "new");

        let post = mock.calls().into_iter().find(|c| c.method == HttpMethod::Post).unwrap();
        let body = post.body.unwrap();
        assert_eq!(body["roleId"], "r-viewer");
        assert_eq!(body["groups"], json!(["g1"]));
    }

    #[tokio::test]
    async fn test_create_user_unknown_group() {
        let access = AccessManagement::new(directory());
        let user = NewUser::new("cy@corp.com", "Cy", "viewer").with_groups(vec!["Ghosts".into()]);
        assert!(matches!(access.create_user(&user).await, Err(SdkError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_user_keeps_groups_when_not_given() {
        let mock = directory();
        mock.respond(HttpMethod::Patch, "/api/v1/users/u1", 200, json!({"_id": "u1"}));
        let access = AccessManagement::new(mock.clone());

        access
            .update_user("ann@corp.com", &UserUpdate::default().with_role("designer"))
            .await
            .unwrap();

        let patch = mock.calls().into_iter().find(|c| c.method == HttpMethod::Patch).unwrap();
        assert_eq!(patch.body, Some(json!({"roleId": "r-designer"})));
    }

    #[tokio::test]
    async fn test_update_user_rejects_empty_update() {
        let access = AccessManagement::new(directory());
        let err = access.update_user("ann@corp.com", &UserUpdate::default()).await.unwrap_err();
        assert!(matches!(err, SdkError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_delete_user() {
        let mock = directory();
        mock.respond_text(HttpMethod::Delete, "/api/v1/users/u1", 204, "");
        let access = AccessManagement::new(mock.clone());
        access.delete_user("ann@corp.com").await.unwrap();
        assert_eq!(mock.count(HttpMethod::Delete, "/api/v1/users/u1"), 1);
    }
}
