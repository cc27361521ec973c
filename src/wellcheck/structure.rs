//! Structural complexity of a dashboard: pivots, tabbers, accordions and
//! jump-to-dashboard targets

use super::Wellcheck;
use crate::error::Result;
use crate::utils::ValueExt;
use lazy_regex::regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

/// Structure counts of one dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStructure {
    pub dashboard_id: String,
    pub dashboard_title: String,
    pub pivot_count: usize,
    pub tabber_count: usize,
    pub accordion_count: usize,
    /// Distinct jump-to-dashboard targets
    pub jtd_count: usize,
}

/// Drop `/* */` and `//` comments from a widget script
pub fn strip_script_comments(script: &str) -> String {
    let without_blocks = regex!(r"(?s)/\*.*?\*/").replace_all(script, "");
    regex!(r"//.*").replace_all(&without_blocks, "").into_owned()
}

/// Dashboard ids targeted by `prism.jumpToDashboard` calls in a script
pub fn script_jump_targets(script: &str) -> Vec<String> {
    let cleaned = strip_script_comments(script);
    let mut targets = Vec::new();
    for block in regex!(r"prism\.jumpToDashboard\(widget,\s*\{[\s\S]*?\}\s*\);").find_iter(&cleaned) {
        let block = block.as_str();
        let single = regex!(r#"dashboardId\s*:\s*"(\w{24})""#);
        targets.extend(single.captures_iter(block).map(|c| c[1].to_string()));

        if regex!(r"(?s)dashboardIds\s*:\s*\[\s*(\{[^\}]*\}\s*,?\s*)+\]").is_match(block) {
            let listed = regex!(r#"\bid\s*:\s*"(\w{24})""#);
            targets.extend(listed.captures_iter(block).map(|c| c[1].to_string()));
        }

        let pivot = regex!(r#"targetDashboards\s*:\s*\{[^}]*dashboardId\s*:\s*"(\w{24})""#);
        targets.extend(pivot.captures_iter(block).map(|c| c[1].to_string()));
    }
    targets
}

fn is_accordion(widget: &Value) -> bool {
    let Some(config) = widget.get("accordionConfig").filter(|c| c.is_object()) else {
        return false;
    };
    config.bool_field("isEnabled").unwrap_or(false)
        && config
            .str_field("dashboardName")
            .map(|name| !name.trim().is_empty())
            .unwrap_or(false)
}

/// Count structure elements of a full dashboard definition.
///
/// Returns `None` when the definition has no OID or no widgets.
pub fn count_structure(definition: &Value, fallback_title: &str) -> Option<DashboardStructure> {
    let title = definition.string_or("title", fallback_title);
    let Some(oid) = definition.str_field("oid") else {
        warn!(dashboard = %title, "dashboard definition has no OID");
        return None;
    };
    let widgets = definition.array_field("widgets");
    if widgets.is_empty() {
        warn!(dashboard = %title, oid, "dashboard has no widgets");
        return None;
    }

    let mut row = DashboardStructure {
        dashboard_id: oid.to_string(),
        dashboard_title: title.clone(),
        ..Default::default()
    };
    let mut jump_targets: HashSet<String> = HashSet::new();

    for widget in widgets {
        let widget_type = widget.str_field("type").unwrap_or("");
        if widget_type.contains("pivot") {
            row.pivot_count += 1;
        }
        if widget_type.contains("WidgetsTabber") {
            row.tabber_count += 1;
        }
        if is_accordion(widget) {
            row.accordion_count += 1;
        }
        if let Some(target) = widget.get("options").and_then(|o| o.get("drillTarget")).and_then(|d| d.str_field("oid")) {
            jump_targets.insert(target.to_string());
        }
        match widget.get("script") {
            Some(Value::String(script)) => jump_targets.extend(script_jump_targets(script)),
            Some(Value::Null) | None => {}
            Some(_) => warn!(dashboard = %title, widget = %widget.string_or("oid", ""), "widget script is not a string"),
        }
    }

    row.jtd_count = jump_targets.len();
    Some(row)
}

impl Wellcheck {
    /// Pivot, tabber, accordion and jump-to-dashboard counts per dashboard
    pub async fn check_dashboard_structure(&self, refs: &[String]) -> Result<Vec<DashboardStructure>> {
        let rows: Vec<DashboardStructure> = self
            .load_dashboards(refs)
            .await?
            .iter()
            .filter_map(|(title, definition)| count_structure(definition, title))
            .collect();

        info!(
            dashboards = rows.len(),
            pivots = rows.iter().map(|r| r.pivot_count).sum::<usize>(),
            tabbers = rows.iter().map(|r| r.tabber_count).sum::<usize>(),
            accordions = rows.iter().map(|r| r.accordion_count).sum::<usize>(),
            jump_targets = rows.iter().map(|r| r.jtd_count).sum::<usize>(),
            "dashboard structure check complete"
        );
        Ok(rows)
    }
}
