//! Dashboard listings and lookups

use super::Dashboards;
use crate::client::{with_query, ApiTransport};
use crate::error::{Result, SdkError};
use crate::utils::{convert_utc_to_local, ValueExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

const ADMIN_LISTING: &str = "/api/v1/dashboards/admin?dashboardType=owner";
const SEARCH_ENDPOINT: &str = "/api/v1/dashboards/searches";

/// Page size for the dashboard search endpoint
pub const SEARCH_PAGE_SIZE: usize = 50;

/// Flat summary of a dashboard listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardRow {
    pub oid: String,
    pub title: String,
    pub owner: String,
    pub datasource: String,
    pub last_updated: String,
}

impl DashboardRow {
    /// Build a row from an admin listing entry
    pub fn from_listing(dashboard: &Value) -> Self {
        let owner = match dashboard.get("owner") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.string_or("_id", ""),
            None => String::new(),
        };
        Self {
            oid: dashboard.string_or("oid", ""),
            title: dashboard.string_or("title", ""),
            owner,
            datasource: dashboard
                .get("datasource")
                .map(|ds| ds.string_or("title", ""))
                .unwrap_or_default(),
            last_updated: dashboard
                .str_field("lastUpdated")
                .and_then(convert_utc_to_local)
                .unwrap_or_default(),
        }
    }
}

/// True for a 24 character hexadecimal object id
pub fn looks_like_oid(value: &str) -> bool {
    value.len() == 24 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn search_body(skip: usize) -> Value {
    json!({
        "queryParams": {
            "ownershipType": "allRoot",
            "search": "",
            "ownerInfo": true,
            "asObject": true
        },
        "queryOptions": {
            "sort": {"title": 1},
            "limit": SEARCH_PAGE_SIZE,
            "skip": skip
        }
    })
}

/// Page through the dashboard search endpoint, deduplicated by OID.
///
/// A failure on the first page is an error. A failure on a later page ends
/// the listing with what was collected so far.
pub async fn search_all(api: &dyn ApiTransport) -> Result<Vec<Value>> {
    let mut dashboards = Vec::new();
    let mut seen = HashSet::new();
    let mut skip = 0;

    loop {
        let page = match api.post_json(SEARCH_ENDPOINT, &search_body(skip)).await {
            Ok(page) => page,
            Err(e) if skip == 0 => return Err(e.with_context("searching dashboards")),
            Err(e) => {
                warn!(skip, error = %e, "dashboard search stopped early");
                break;
            }
        };

        let items = page.array_field("items");
        if items.is_empty() {
            break;
        }
        debug!(count = items.len(), skip, "fetched dashboard page");
        for item in items {
            let oid = item.string_or("oid", "");
            if seen.insert(oid) {
                dashboards.push(item.clone());
            }
        }
        skip += SEARCH_PAGE_SIZE;
    }

    info!(total = dashboards.len(), "dashboard search complete");
    Ok(dashboards)
}

impl Dashboards {
    /// Every dashboard visible through the admin listing
    pub async fn get_all_dashboards(&self) -> Result<Vec<Value>> {
        let dashboards = self.api.get_json(ADMIN_LISTING).await?;
        let list = dashboards.as_list().to_vec();
        info!(count = list.len(), "retrieved dashboards");
        Ok(list)
    }

    /// One dashboard by OID
    pub async fn get_dashboard_by_id(&self, dashboard_id: &str) -> Result<Value> {
        let endpoint = with_query(ADMIN_LISTING, &[("id", dashboard_id)]);
        let found = self.api.get_json(&endpoint).await?;
        found
            .as_list()
            .first()
            .cloned()
            .ok_or_else(|| SdkError::not_found(format!("dashboard with ID '{}'", dashboard_id)))
    }

    /// Dashboards whose title matches `name`
    pub async fn get_dashboard_by_name(&self, name: &str) -> Result<Vec<Value>> {
        let endpoint = with_query(ADMIN_LISTING, &[("name", name)]);
        let found = self.api.get_json(&endpoint).await?;
        let list = found.as_list().to_vec();
        if list.is_empty() {
            warn!(name, "no dashboard found");
            return Err(SdkError::not_found(format!("dashboard '{}'", name)));
        }
        Ok(list)
    }

    /// Resolve an OID or a title to `(oid, title)`.
    ///
    /// Strings shaped like an OID are looked up by id first. Titles match
    /// case-insensitively; the first match wins.
    pub async fn resolve_reference(&self, reference: &str) -> Result<(String, String)> {
        if looks_like_oid(reference) {
            match self.get_dashboard_by_id(reference).await {
                Ok(found) => {
                    return Ok((reference.to_string(), found.string_or("title", reference)));
                }
                Err(SdkError::NotFound(_)) => {
                    debug!(reference, "no dashboard with that id, trying as a title");
                }
                Err(e) => return Err(e),
            }
        }

        let candidates = self.get_dashboard_by_name(reference).await?;
        let matching: Vec<&Value> = candidates
            .iter()
            .filter(|d| {
                d.str_field("title")
                    .map(|t| t.eq_ignore_ascii_case(reference))
                    .unwrap_or(false)
            })
            .collect();
        if matching.len() > 1 {
            warn!(reference, count = matching.len(), "several dashboards share this title, using the first");
        }
        let chosen = matching
            .first()
            .copied()
            .or_else(|| candidates.first())
            .ok_or_else(|| SdkError::not_found(format!("dashboard '{}'", reference)))?;
        Ok((
            chosen.string_or("oid", ""),
            chosen.string_or("title", reference),
        ))
    }

    /// Full export of one dashboard including widgets
    pub async fn export_dashboard(&self, dashboard_id: &str) -> Result<Value> {
        let endpoint = with_query(
            "/api/v1/dashboards/export",
            &[("dashboardIds", dashboard_id), ("adminAccess", "true")],
        );
        let exported = self.api.get_json(&endpoint).await?;
        exported
            .as_list()
            .first()
            .cloned()
            .ok_or_else(|| SdkError::unexpected(endpoint, "empty export"))
    }
}
