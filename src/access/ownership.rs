//! Folder and dashboard ownership transfer
//!
//! The navigation tree (`/api/v1/navver`) is searched for folders with the
//! requested name. Each match contributes its own subtree and its parent's
//! subtree (which covers the siblings). Folders the executing user cannot
//! see are unlocked first by sharing their dashboards with that user.

use super::{find_user, AccessManagement};
use crate::client::{path_segment, ApiTransport};
use crate::dashboard::{change_dashboard_owner, post_dashboard_shares, search_all};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// Parameters of an ownership transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipTransfer {
    /// User running the transfer, by email
    pub executing_user: String,
    /// Folder whose tree changes hands
    pub folder_name: String,
    /// Recipient, by email
    pub new_owner: String,
    /// Rule the previous dashboard owner keeps (`edit` or `view`)
    pub original_owner_rule: String,
    /// Also hand over the dashboards inside the folders
    pub change_dashboard_ownership: bool,
}

impl OwnershipTransfer {
    /// Transfer `folder_name` and its dashboards to `new_owner`
    pub fn new(
        executing_user: impl Into<String>,
        folder_name: impl Into<String>,
        new_owner: impl Into<String>,
    ) -> Self {
        Self {
            executing_user: executing_user.into(),
            folder_name: folder_name.into(),
            new_owner: new_owner.into(),
            original_owner_rule: "edit".to_string(),
            change_dashboard_ownership: true,
        }
    }

    /// Rule the previous owner keeps on each dashboard
    pub fn with_original_owner_rule(mut self, rule: impl Into<String>) -> Self {
        self.original_owner_rule = rule.into();
        self
    }

    /// Whether dashboards change owner along with their folders
    pub fn with_dashboard_ownership(mut self, enabled: bool) -> Self {
        self.change_dashboard_ownership = enabled;
        self
    }
}

/// Counts reported by an ownership transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OwnershipChange {
    pub folders_changed: usize,
    pub dashboards_changed: usize,
}

/// Folders and dashboards collected from the navigation tree, in discovery order
#[derive(Debug, Default)]
struct FolderTree {
    folders: Vec<(String, String)>,
    dashboards: Vec<(String, String)>,
    seen_folders: HashSet<String>,
    seen_dashboards: HashSet<String>,
}

impl FolderTree {
    fn visit(&mut self, folder: &Value) {
        let Some(oid) = folder.str_field("oid") else {
            return;
        };
        if !self.seen_folders.insert(oid.to_string()) {
            return;
        }
        self.folders
            .push((oid.to_string(), folder.string_or("name", "")));
        for dash in folder.array_field("dashboards") {
            if let Some(dash_id) = dash.str_field("oid") {
                if self.seen_dashboards.insert(dash_id.to_string()) {
                    self.dashboards
                        .push((dash_id.to_string(), dash.string_or("title", "")));
                }
            }
        }
        for sub in folder.array_field("folders") {
            self.visit(sub);
        }
    }
}

fn index_folders<'a>(
    folders: &'a [Value],
    parent: Option<&'a Value>,
    folder_name: &str,
    parents: &mut HashMap<&'a str, &'a Value>,
    matches: &mut Vec<&'a Value>,
) {
    for folder in folders {
        if let (Some(oid), Some(parent)) = (folder.str_field("oid"), parent) {
            parents.insert(oid, parent);
        }
        if folder.str_field("name") == Some(folder_name) {
            matches.push(folder);
        }
        index_folders(folder.array_field("folders"), Some(folder), folder_name, parents, matches);
    }
}

/// Collect the folder tree around every folder named `folder_name`
fn collect_tree(navver: &Value, folder_name: &str) -> Option<FolderTree> {
    let roots = navver.array_field("folders");
    let mut parents = HashMap::new();
    let mut matches = Vec::new();
    index_folders(roots, None, folder_name, &mut parents, &mut matches);
    if matches.is_empty() {
        return None;
    }

    let mut tree = FolderTree::default();
    for folder in &matches {
        tree.visit(folder);
    }
    for folder in &matches {
        let parent = folder.str_field("oid").and_then(|oid| parents.get(oid));
        if let Some(parent) = parent {
            tree.visit(parent);
            // The parent may already have been visited as part of another match
            for sibling in parent.array_field("folders") {
                tree.visit(sibling);
            }
        }
    }
    info!(folder = folder_name, matches = matches.len(), "matched folders");
    Some(tree)
}

/// Share every dashboard in folders the executing user cannot see with that user
async fn unlock_hidden_folders(api: &dyn ApiTransport, user_id: &str) -> Result<()> {
    let dashboards = search_all(api).await?;
    let parent_ids: HashSet<&str> = dashboards
        .iter()
        .filter_map(|d| d.str_field("parentFolder"))
        .filter(|id| !id.is_empty())
        .collect();
    let visible = api.get_json("/api/v1/folders").await?;
    let visible: HashSet<&str> = visible
        .as_list()
        .iter()
        .filter_map(|f| f.str_field("oid"))
        .collect();
    let hidden: HashSet<&str> = parent_ids.difference(&visible).copied().collect();
    info!(hidden = hidden.len(), "folders not visible to the executing user");

    for dash in &dashboards {
        let in_hidden = dash
            .str_field("parentFolder")
            .map(|p| hidden.contains(p))
            .unwrap_or(false);
        let Some(dash_id) = dash.str_field("oid").filter(|_| in_hidden) else {
            continue;
        };
        let mut shares = dash.array_field("shares").to_vec();
        shares.push(json!({
            "shareId": user_id,
            "type": "user",
            "rule": "edit",
            "subscribe": false
        }));
        match post_dashboard_shares(api, dash_id, &shares).await {
            Ok(()) => info!(dashboard = %dash.string_or("title", dash_id), "shared with executing user"),
            Err(e) => error!(dashboard = dash_id, error = %e, "failed to share dashboard with executing user"),
        }
    }
    Ok(())
}

async fn load_tree(api: &dyn ApiTransport, folder_name: &str) -> Result<Option<FolderTree>> {
    let navver = api.get_json("/api/v1/navver").await?;
    Ok(collect_tree(&navver, folder_name))
}

impl AccessManagement {
    /// Hand a folder tree, and optionally its dashboards, to a new owner
    pub async fn change_folder_and_dashboard_ownership(
        &self,
        transfer: &OwnershipTransfer,
    ) -> Result<OwnershipChange> {
        let api = self.api();
        let executing = find_user(api, &transfer.executing_user).await?;
        let new_owner = find_user(api, &transfer.new_owner).await?;
        let new_owner_id = new_owner.user_id.as_str();

        let tree = match load_tree(api, &transfer.folder_name).await? {
            Some(tree) => tree,
            None => {
                warn!(folder = %transfer.folder_name, "folder not visible, granting access and retrying");
                unlock_hidden_folders(api, &executing.user_id).await?;
                load_tree(api, &transfer.folder_name)
                    .await?
                    .ok_or_else(|| SdkError::not_found(format!("folder '{}'", transfer.folder_name)))?
            }
        };
        info!(
            folders = tree.folders.len(),
            dashboards = tree.dashboards.len(),
            "collected folder tree"
        );

        let mut change = OwnershipChange::default();
        for (folder_id, folder_name) in &tree.folders {
            let endpoint = format!("/api/v1/folders/{}", path_segment(folder_id));
            let outcome = api.patch(&endpoint, &json!({ "owner": new_owner_id })).await;
            let owner = outcome
                .ok()
                .and_then(|r| r.value().ok())
                .and_then(|v| v.str_field("owner").map(str::to_string));
            if owner.as_deref() == Some(new_owner_id) {
                debug!(folder = %folder_name, "folder owner changed");
                change.folders_changed += 1;
            } else {
                error!(folder = %folder_name, "failed to change folder owner");
            }
        }

        if transfer.change_dashboard_ownership {
            for (dash_id, title) in &tree.dashboards {
                let endpoint = format!("/api/v1/dashboards/{}", path_segment(dash_id));
                let current = match api.get_json(&endpoint).await {
                    Ok(current) => current,
                    Err(e) => {
                        error!(dashboard = %title, error = %e, "dashboard not found, skipping");
                        continue;
                    }
                };
                let current_owner = current.str_field("owner").unwrap_or_default();
                if current_owner == new_owner_id {
                    info!(dashboard = %title, "already owned by the new owner");
                    continue;
                }
                let admin_access = current_owner != executing.user_id;
                match change_dashboard_owner(
                    api,
                    dash_id,
                    new_owner_id,
                    &transfer.original_owner_rule,
                    admin_access,
                )
                .await
                {
                    Ok(()) => {
                        info!(dashboard = %title, owner = %transfer.new_owner, "dashboard owner changed");
                        change.dashboards_changed += 1;
                    }
                    Err(e) => error!(dashboard = %title, error = %e, "failed to change dashboard owner"),
                }
            }
        }

        info!(
            folders = change.folders_changed,
            dashboards = change.dashboards_changed,
            "ownership transfer complete"
        );
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::USERS_EXPANDED;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use std::sync::Arc;

    fn navver() -> Value {
        json!({"folders": [
            {"oid": "root", "name": "Root", "dashboards": [{"oid": "d0", "title": "Home"}], "folders": [
                {"oid": "f1", "name": "Finance", "dashboards": [{"oid": "d1", "title": "P&L"}], "folders": [
                    {"oid": "f1a", "name": "Archive", "dashboards": [{"oid": "d2", "title": "Old P&L"}]}
                ]},
                {"oid": "f2", "name": "Marketing", "dashboards": []}
            ]},
            {"oid": "other", "name": "Other", "dashboards": [{"oid": "d9", "title": "Unrelated"}]}
        ]})
    }

    #[test]
    fn test_collect_tree_covers_subtree_parent_and_siblings() {
        let tree = collect_tree(&navver(), "Finance").unwrap();
        let folders: Vec<&str> = tree.folders.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(folders, vec!["f1", "f1a", "root", "f2"]);
        let dashboards: Vec<&str> = tree.dashboards.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(dashboards, vec!["d1", "d2", "d0"]);
    }

    #[test]
    fn test_collect_tree_no_match() {
        assert!(collect_tree(&navver(), "Nowhere").is_none());
    }

    #[test]
    fn test_transfer_builder() {
        let transfer = OwnershipTransfer::new("admin@corp.com", "Finance", "ann@corp.com")
            .with_original_owner_rule("view")
            .with_dashboard_ownership(false);
        assert_eq!(transfer.original_owner_rule, "view");
        assert!(!transfer.change_dashboard_ownership);
    }

    #[tokio::test]
    async fn test_change_ownership() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            HttpMethod::Get,
            USERS_EXPANDED,
            200,
            json!([
                {"_id": "admin", "userName": "admin", "email": "admin@corp.com", "active": true,
                 "role": {"_id": "r", "name": "super"}},
                {"_id": "ann", "userName": "ann", "email": "ann@corp.com", "active": true,
                 "role": {"_id": "r2", "name": "contributor"}}
            ]),
        );
        mock.respond(
            HttpMethod::Get,
            "/api/v1/navver",
            200,
            json!({"folders": [{"oid": "f1", "name": "Finance", "dashboards": [
                {"oid": "d1", "title": "Mine"}, {"oid": "d2", "title": "Theirs"}, {"oid": "d3", "title": "Done"}
            ]}]}),
        );
        mock.respond(HttpMethod::Patch, "/api/v1/folders/f1", 200, json!({"owner": "ann"}));
        mock.respond(HttpMethod::Get, "/api/v1/dashboards/d1", 200, json!({"owner": "admin"}));
        mock.respond(HttpMethod::Get, "/api/v1/dashboards/d2", 200, json!({"owner": "bob"}));
        mock.respond(HttpMethod::Get, "/api/v1/dashboards/d3", 200, json!({"owner": "ann"}));
        mock.respond(HttpMethod::Post, "/api/v1/dashboards/d1/change_owner", 200, json!({}));
        mock.respond(
            HttpMethod::Post,
            "/api/v1/dashboards/d2/change_owner?adminAccess=true",
            200,
            json!({}),
        );

        let access = AccessManagement::new(mock.clone());
        let change = access
            .change_folder_and_dashboard_ownership(&OwnershipTransfer::new(
                "admin@corp.com",
                "Finance",
                "ann@corp.com",
            ))
            .await
            .unwrap();
        assert_eq!(change, OwnershipChange { folders_changed: 1, dashboards_changed: 2 });
        assert_eq!(mock.count(HttpMethod::Post, "/api/v1/dashboards/d3"), 0);
    }
}
