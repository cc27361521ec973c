//! Dashboard and widget scripts
//!
//! Only the owner of a dashboard may change its scripts. When an executing
//! user is given, ownership is borrowed for the duration of the update and
//! handed back together with the original share list, whether or not the
//! update itself went through.

use super::shares::{change_dashboard_owner, fetch_dashboard_shares, restore_payload};
use super::Dashboards;
use crate::access::find_user;
use crate::client::{path_segment, ApiTransport, HttpMethod};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde_json::{json, Value};
use tracing::{debug, error, info};

/// Turn script text into the request body.
///
/// Text starting with `{` must already be a JSON document; anything else is
/// wrapped as `{"script": ...}`.
pub fn script_payload(script: &str) -> Result<Value> {
    if script.trim_start().starts_with('{') {
        serde_json::from_str(script)
            .map_err(|e| SdkError::invalid(format!("script is not valid JSON: {}", e)))
    } else {
        Ok(json!({ "script": script }))
    }
}

/// Ownership taken over from the original owner
struct BorrowedOwnership {
    owner_id: String,
    shares: Vec<Value>,
}

async fn borrow_ownership(
    api: &dyn ApiTransport,
    dashboard_id: &str,
    executing_user: &str,
) -> Result<BorrowedOwnership> {
    let listing = format!(
        "/api/v1/dashboards/admin?dashboardType=owner&id={}&asObject=false",
        path_segment(dashboard_id)
    );
    let found = api.get_json(&listing).await?;
    let owner_id = found
        .as_list()
        .first()
        .and_then(|d| d.str_field("owner"))
        .map(str::to_string)
        .ok_or_else(|| SdkError::not_found(format!("dashboard '{}'", dashboard_id)))?;

    let shares = fetch_dashboard_shares(api, dashboard_id).await?;
    let user = find_user(api, executing_user).await?;

    info!(dashboard_id, user = executing_user, "taking temporary ownership");
    change_dashboard_owner(api, dashboard_id, &user.user_id, "edit", true).await?;
    Ok(BorrowedOwnership { owner_id, shares })
}

async fn return_ownership(
    api: &dyn ApiTransport,
    dashboard_id: &str,
    borrowed: BorrowedOwnership,
) -> Result<()> {
    let endpoint = format!("/api/shares/dashboard/{}", path_segment(dashboard_id));
    let body = json!({ "sharesTo": restore_payload(&borrowed.shares) });
    api.post(&endpoint, &body)
        .await?
        .expect_status(&endpoint, &[200])?;

    change_dashboard_owner(api, dashboard_id, &borrowed.owner_id, "edit", false).await?;
    info!(dashboard_id, owner = %borrowed.owner_id, "original ownership restored");
    Ok(())
}

fn owner_hint(err: SdkError, borrowed: bool) -> SdkError {
    if err.status() == Some(404) && !borrowed {
        err.with_context(
            "only the dashboard owner can modify scripts; pass an executing user to take ownership temporarily",
        )
    } else {
        err
    }
}

impl Dashboards {
    /// Set the script of a dashboard
    pub async fn add_dashboard_script(
        &self,
        dashboard_id: &str,
        script: &str,
        executing_user: Option<&str>,
    ) -> Result<()> {
        self.apply_script(dashboard_id, None, script, executing_user)
            .await
    }

    /// Set the script of one widget, then republish the dashboard
    pub async fn add_widget_script(
        &self,
        dashboard_id: &str,
        widget_id: &str,
        script: &str,
        executing_user: Option<&str>,
    ) -> Result<()> {
        self.apply_script(dashboard_id, Some(widget_id), script, executing_user)
            .await
    }

    async fn apply_script(
        &self,
        dashboard_id: &str,
        widget_id: Option<&str>,
        script: &str,
        executing_user: Option<&str>,
    ) -> Result<()> {
        let payload = script_payload(script)?;
        let api = self.api();

        let borrowed = match executing_user {
            Some(user) => Some(borrow_ownership(api, dashboard_id, user).await?),
            None => {
                debug!(dashboard_id, "no executing user, assuming the caller owns the dashboard");
                None
            }
        };
        let was_borrowed = borrowed.is_some();

        let outcome = self
            .put_script(dashboard_id, widget_id, &payload)
            .await
            .map_err(|e| owner_hint(e, was_borrowed));

        if let Some(borrowed) = borrowed {
            if let Err(e) = return_ownership(api, dashboard_id, borrowed).await {
                error!(dashboard_id, error = %e, "failed to restore dashboard ownership");
                outcome?;
                return Err(e);
            }
        }
        outcome
    }

    async fn put_script(
        &self,
        dashboard_id: &str,
        widget_id: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        let api = self.api();
        let base = format!("/api/dashboards/{}", path_segment(dashboard_id));
        let endpoint = match widget_id {
            Some(widget) => format!("{}/widgets/{}", base, path_segment(widget)),
            None => base,
        };
        api.put(&endpoint, payload)
            .await?
            .expect_status(&endpoint, &[200])?;

        match widget_id {
            Some(widget) => {
                info!(dashboard_id, widget, "widget script updated");
                let publish = format!(
                    "/api/v1/dashboards/{}/publish?force=true",
                    path_segment(dashboard_id)
                );
                api.request(HttpMethod::Post, &publish, None)
                    .await?
                    .expect_status(&publish, &[204])?;
                info!(dashboard_id, "dashboard republished");
            }
            None => info!(dashboard_id, "dashboard script updated"),
        }
        Ok(())
    }
}
