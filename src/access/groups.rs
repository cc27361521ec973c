//! Groups and their members

use super::{is_excluded_group, list_groups, AccessManagement};
use crate::client::{with_query, ApiTransport};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Flat view of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRow {
    #[serde(rename = "GROUP_ID")]
    pub group_id: String,
    #[serde(rename = "GROUP_NAME")]
    pub group_name: String,
    #[serde(rename = "defaultRole")]
    pub default_role: String,
}

/// Members of one group, by user name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembers {
    pub group: String,
    pub usernames: Vec<String>,
}

/// Find a group by exact name through the filtered listing
pub async fn find_group(api: &dyn ApiTransport, name: &str) -> Result<GroupRow> {
    let endpoint = with_query("/api/v1/groups", &[("name", name)]);
    let found = api.get_json(&endpoint).await?;
    let group = found
        .as_list()
        .first()
        .ok_or_else(|| SdkError::not_found(format!("group '{}'", name)))?;

    match (group.str_field("_id"), group.str_field("name")) {
        (Some(id), Some(group_name)) => {
            debug!(name, group_id = id, "found group");
            Ok(GroupRow {
                group_id: id.to_string(),
                group_name: group_name.to_string(),
                default_role: group.string_or("defaultRole", ""),
            })
        }
        _ => Err(SdkError::unexpected(
            endpoint,
            format!("group '{}' is missing its id or name", name),
        )),
    }
}

impl AccessManagement {
    /// One group by name
    pub async fn get_group(&self, name: &str) -> Result<GroupRow> {
        find_group(self.api(), name).await
    }

    /// User names of the members of one group
    pub async fn users_per_group(&self, group_name: &str) -> Result<Vec<String>> {
        let group = find_group(self.api(), group_name).await?;
        let endpoint = with_query("/api/v1/users", &[("groupId", group.group_id.as_str())]);
        let users = self.api().get_json(&endpoint).await?;
        let names: Vec<String> = users
            .as_list()
            .iter()
            .filter_map(|u| u.str_field("userName"))
            .map(str::to_string)
            .collect();
        debug!(group = group_name, count = names.len(), "fetched group members");
        Ok(names)
    }

    /// Members of every group.
    ///
    /// The implicit groups are left out. An "Admins" entry always exists and
    /// also lists users whose role is an administrator role. Groups without
    /// members are kept.
    pub async fn users_per_group_all(&self) -> Result<Vec<GroupMembers>> {
        let groups = list_groups(self.api()).await?;
        let users = self.get_users_all().await?;

        let mut result: Vec<GroupMembers> = groups
            .iter()
            .filter_map(|g| g.str_field("name"))
            .filter(|name| !is_excluded_group(name))
            .map(|name| GroupMembers {
                group: name.to_string(),
                usernames: Vec::new(),
            })
            .collect();

        fn entry<'a>(result: &'a mut Vec<GroupMembers>, group: &str) -> &'a mut GroupMembers {
            let idx = match result.iter().position(|m| m.group == group) {
                Some(idx) => idx,
                None => {
                    result.push(GroupMembers {
                        group: group.to_string(),
                        usernames: Vec::new(),
                    });
                    result.len() - 1
                }
            };
            &mut result[idx]
        }

        entry(&mut result, "Admins");

        for user in &users {
            for group in user.groups.iter().filter(|g| !is_excluded_group(g)) {
                entry(&mut result, group).usernames.push(user.user_name.clone());
            }
        }
        for user in users.iter().filter(|u| u.is_admin()) {
            entry(&mut result, "Admins").usernames.push(user.user_name.clone());
        }

        info!(groups = result.len(), "resolved group memberships");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::users::tests::users_fixture;
    use crate::access::USERS_EXPANDED;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_group() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            HttpMethod::Get,
            "/api/v1/groups?name=Sales Team",
            200,
            json!([{"_id": "g9", "name": "Sales Team", "defaultRole": "consumer"}]),
        );
        let access = AccessManagement::new(mock.clone());
        let group = access.get_group("Sales Team").await.unwrap();
        assert_eq!(group.group_id, "g9");
        assert_eq!(group.default_role, "consumer");
    }

    #[tokio::test]
    async fn test_get_group_missing() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(HttpMethod::Get, "/api/v1/groups?name=Nope", 200, json!([]));
        let access = AccessManagement::new(mock.clone());
        assert!(matches!(access.get_group("Nope").await, Err(SdkError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_users_per_group() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(HttpMethod::Get, "/api/v1/groups?name=Finance", 200, json!([{"_id": "g1", "name": "Finance"}]));
        mock.respond(
            HttpMethod::Get,
            "/api/v1/users?groupId=g1",
            200,
            json!([{"userName": "ann"}, {"userName": "bo"}]),
        );
        let access = AccessManagement::new(mock.clone());
        assert_eq!(access.users_per_group("Finance").await.unwrap(), vec!["ann", "bo"]);
    }

    #[tokio::test]
    async fn test_users_per_group_all() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            HttpMethod::Get,
            "/api/v1/groups",
            200,
            json!([{"name": "Everyone"}, {"name": "Finance"}, {"name": "Empty"}]),
        );
        mock.respond(HttpMethod::Get, USERS_EXPANDED, 200, users_fixture());
        let access = AccessManagement::new(mock.clone());

        let members = access.users_per_group_all().await.unwrap();
        let groups: Vec<&str> = members.iter().map(|m| m.group.as_str()).collect();
        assert_eq!(groups, vec!["Finance", "Empty", "Admins"]);
        assert_eq!(members[0].usernames, vec!["ann"]);
        assert!(members[1].usernames.is_empty());
        assert_eq!(members[2].usernames, vec!["root"]);
    }
}
