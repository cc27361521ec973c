//! Data model shares and row-level data security

use super::{fetch_datamodel, model_type, DatamodelType, Datamodels};
use crate::client::{path_segment, ApiTransport};
use crate::dashboard::{ShareKind, ShareRequest};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

const PERMISSIONS: [(&str, &str); 3] = [("w", "EDIT"), ("a", "READ"), ("r", "USE")];

/// Display name of a permission code: `w` EDIT, `a` READ, `r` USE.
/// Unknown codes are returned unchanged.
pub fn permission_name(code: &str) -> String {
    let lower = code.to_lowercase();
    PERMISSIONS
        .iter()
        .find(|(c, _)| *c == lower)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Permission code for a display name, the reverse of [`permission_name`]
pub fn permission_code(name: &str) -> String {
    let upper = name.to_uppercase();
    PERMISSIONS
        .iter()
        .find(|(_, n)| *n == upper)
        .map(|(code, _)| code.to_string())
        .unwrap_or_else(|| name.to_lowercase())
}

/// One share of a data model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatamodelShareRow {
    pub datamodel_name: String,
    pub datamodel_id: String,
    pub party_name: Option<String>,
    pub party_type: Option<String>,
    pub permission: String,
}

/// A secured column of a data model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasecurityRow {
    pub datamodel_name: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
}

/// One data security rule as seen by one share
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasecurityDetailRow {
    pub datamodel_name: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    /// Member list, or `"Everything"` / `"Nothing"`
    pub value: Value,
    pub exclusionary: Option<bool>,
    pub share_type: String,
    pub share_name: String,
    pub rule_description: String,
}

impl DatasecurityDetailRow {
    fn blank(datamodel_name: &str) -> Self {
        Self {
            datamodel_name: datamodel_name.to_string(),
            table_name: String::new(),
            column_name: String::new(),
            data_type: String::new(),
            value: Value::String(String::new()),
            exclusionary: None,
            share_type: String::new(),
            share_name: String::new(),
            rule_description: String::new(),
        }
    }
}

/// Interpret a rule's members.
///
/// Members present: the list itself, described by `exclusionary`.
/// No members: `exclusionary == false` grants everything, a missing flag
/// grants nothing.
pub fn describe_members(members: &[Value], exclusionary: Option<bool>) -> (Value, String) {
    if !members.is_empty() {
        let listed = members.iter().map(crate::utils::cell_text).collect::<Vec<_>>().join(", ");
        let description = match exclusionary {
            Some(true) => format!("Can see everything except [{}]", listed),
            Some(false) => format!("Can see only [{}]", listed),
            None => "Unknown rule logic".to_string(),
        };
        return (Value::Array(members.to_vec()), description);
    }
    match exclusionary {
        Some(false) => (json!("Everything"), "Can see all values".to_string()),
        None => (json!("Nothing"), "Cannot see any value".to_string()),
        Some(true) => (json!([]), "Unknown".to_string()),
    }
}

/// Users by id (email) and groups by id (name). A failed listing is logged
/// and leaves its map empty.
async fn principal_names(api: &dyn ApiTransport) -> (HashMap<String, String>, HashMap<String, String>) {
    async fn names(api: &dyn ApiTransport, endpoint: &str, field: &str, fallback: &str) -> HashMap<String, String> {
        match api.get_json(endpoint).await {
            Ok(list) => list
                .as_list()
                .iter()
                .filter_map(|p| Some((p.str_field("_id")?.to_string(), p.string_or(field, fallback))))
                .collect(),
            Err(e) => {
                warn!(endpoint, error = %e, "could not fetch principals for share resolution");
                HashMap::new()
            }
        }
    }
    let users = names(api, "/api/v1/users", "email", "Unknown Email").await;
    let groups = names(api, "/api/v1/groups", "name", "Unknown Group").await;
    (users, groups)
}

fn datasecurity_endpoint(model: &Value) -> Result<String> {
    let title = path_segment(model.str_field("title").unwrap_or_default());
    Ok(match model_type(model)? {
        DatamodelType::Extract => format!("/api/elasticubes/localhost/{}/datasecurity", title),
        DatamodelType::Live => format!("/api/v1/elasticubes/live/{}/datasecurity", title),
    })
}

impl Datamodels {
    /// Shares of a data model with principals resolved to email or group name
    pub async fn get_datamodel_shares(&self, title: &str) -> Result<Vec<DatamodelShareRow>> {
        let model = fetch_datamodel(self.api(), title).await?;
        let datamodel_id = model.string_or("oid", "");
        let (users, groups) = principal_names(self.api()).await;

        let rows: Vec<DatamodelShareRow> = model
            .array_field("shares")
            .iter()
            .map(|share| {
                let party_id = share.str_field("partyId").unwrap_or_default();
                let party_type = share.str_field("type").map(str::to_string);
                let party_name = match party_type.as_deref() {
                    Some("user") => Some(
                        users
                            .get(party_id)
                            .cloned()
                            .unwrap_or_else(|| format!("[Unknown user: {}]", party_id)),
                    ),
                    Some("group") => Some(
                        groups
                            .get(party_id)
                            .cloned()
                            .unwrap_or_else(|| format!("[Unknown group: {}]", party_id)),
                    ),
                    _ => None,
                };
                DatamodelShareRow {
                    datamodel_name: title.to_string(),
                    datamodel_id: datamodel_id.clone(),
                    party_name,
                    party_type,
                    permission: permission_name(share.str_field("permission").unwrap_or_default()),
                }
            })
            .collect();

        info!(datamodel = title, shares = rows.len(), "resolved data model shares");
        Ok(rows)
    }

    /// Append shares to a live data model. The rule of each request is a
    /// permission name (`EDIT`, `READ`, `USE`). Principals that do not
    /// resolve are skipped with a warning.
    pub async fn add_datamodel_shares(&self, title: &str, shares: &[ShareRequest]) -> Result<Value> {
        let model = fetch_datamodel(self.api(), title).await?;
        if model_type(&model)? == DatamodelType::Extract {
            return Err(SdkError::invalid(format!(
                "adding shares to extract data model '{}' is not supported",
                title
            )));
        }
        let datamodel_id = model.string_or("oid", "");
        let (users, groups) = principal_names(self.api()).await;
        let id_by_name = |names: &HashMap<String, String>, wanted: &str| {
            names.iter().find(|(_, name)| name.as_str() == wanted).map(|(id, _)| id.clone())
        };

        let mut payload: Vec<Value> = model.array_field("shares").to_vec();
        for share in shares {
            let party_id = match share.kind {
                ShareKind::User => id_by_name(&users, &share.name),
                ShareKind::Group => id_by_name(&groups, &share.name),
            };
            match party_id {
                Some(party_id) => payload.push(json!({
                    "partyId": party_id,
                    "type": share.kind.as_str(),
                    "permission": permission_code(&share.rule)
                })),
                None => warn!(name = %share.name, kind = %share.kind, "principal not found, skipping share"),
            }
        }

        let endpoint = format!("/api/v1/elasticubes/live/{}/permissions", path_segment(&datamodel_id));
        let updated = self
            .api()
            .patch(&endpoint, &Value::Array(payload))
            .await?
            .expect_status(&endpoint, &[200])?
            .value()?;
        info!(datamodel = title, "data model shares added");
        Ok(updated)
    }

    /// Secured columns of a data model, one row per distinct table and
    /// column. Without rules (or when the rules cannot be read) a single
    /// blank row names the model.
    pub async fn get_datasecurity(&self, title: &str) -> Result<Vec<DatasecurityRow>> {
        let model = fetch_datamodel(self.api(), title).await?;
        let name = model.string_or("title", title);
        let blank = || DatasecurityRow {
            datamodel_name: name.clone(),
            table_name: String::new(),
            column_name: String::new(),
            data_type: String::new(),
        };

        let rules = match self.api().get_json(&datasecurity_endpoint(&model)?).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(datamodel = %name, error = %e, "could not fetch data security");
                return Ok(vec![blank()]);
            }
        };

        let mut seen = HashSet::new();
        let rows: Vec<DatasecurityRow> = rules
            .as_list()
            .iter()
            .map(|rule| DatasecurityRow {
                datamodel_name: name.clone(),
                table_name: rule.string_or("table", "Unknown Table"),
                column_name: rule.string_or("column", "Unknown Column"),
                data_type: rule.string_or("datatype", "Unknown Type"),
            })
            .filter(|row| seen.insert((row.table_name.clone(), row.column_name.clone())))
            .collect();

        if rows.is_empty() {
            info!(datamodel = %name, "no data security rules");
            return Ok(vec![blank()]);
        }
        info!(datamodel = %name, rules = rows.len(), "resolved data security");
        Ok(rows)
    }

    /// Data security rules repeated per share, with the member values
    /// interpreted. The `default` share is shown as Everyone. Sorted by
    /// table, then column.
    pub async fn get_datasecurity_detail(&self, title: &str) -> Result<Vec<DatasecurityDetailRow>> {
        let model = fetch_datamodel(self.api(), title).await?;
        let name = model.string_or("title", title);

        let rules = match self.api().get_json(&datasecurity_endpoint(&model)?).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(datamodel = %name, error = %e, "could not fetch data security");
                return Ok(vec![DatasecurityDetailRow::blank(&name)]);
            }
        };
        if rules.as_list().is_empty() {
            info!(datamodel = %name, "no data security rules");
            return Ok(vec![DatasecurityDetailRow::blank(&name)]);
        }

        let mut rows = Vec::new();
        for rule in rules.as_list() {
            let exclusionary = rule.bool_field("exclusionary");
            let (value, rule_description) = describe_members(rule.array_field("members"), exclusionary);
            let row = |share_type: String, share_name: String| DatasecurityDetailRow {
                datamodel_name: name.clone(),
                table_name: rule.string_or("table", "Unknown Table"),
                column_name: rule.string_or("column", "Unknown Column"),
                data_type: rule.string_or("datatype", "Unknown Type"),
                value: value.clone(),
                exclusionary,
                share_type,
                share_name,
                rule_description: rule_description.clone(),
            };

            let shares = rule.array_field("shares");
            if shares.is_empty() {
                warn!(datamodel = %name, table = rule.str_field("table").unwrap_or_default(), "data security rule without shares");
                rows.push(row("None".to_string(), "None".to_string()));
                continue;
            }
            for share in shares {
                let share_type = share.string_or("type", "Unknown Type");
                if share_type == "default" {
                    rows.push(row("Everyone".to_string(), "Everyone".to_string()));
                } else {
                    rows.push(row(share_type, share.string_or("partyName", "Unknown Share")));
                }
            }
        }

        rows.sort_by(|a, b| (&a.table_name, &a.column_name).cmp(&(&b.table_name, &b.column_name)));
        info!(datamodel = %name, rows = rows.len(), "resolved data security detail");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use crate::datamodel::fixtures::commerce_schema;
    use std::sync::Arc;

    fn principals(mock: &MockTransport) {
        mock.respond(HttpMethod::Get, "/api/v1/users", 200, json!([{"_id": "u1", "email": "ann@corp.com"}]));
        mock.respond(HttpMethod::Get, "/api/v1/groups", 200, json!([{"_id": "g1", "name": "Finance"}]));
    }

    #[test]
    fn test_permission_names() {
        assert_eq!(permission_name("w"), "EDIT");
        assert_eq!(permission_name("R"), "USE");
        assert_eq!(permission_name("x"), "x");
        assert_eq!(permission_code("read"), "a");
        assert_eq!(permission_code("Edit"), "w");
    }

    #[test]
    fn test_describe_members() {
        let (value, text) = describe_members(&[json!("US"), json!("CA")], Some(true));
        assert_eq!(value, json!(["US", "CA"]));
        assert_eq!(text, "Can see everything except [US, CA]");
        assert_eq!(describe_members(&[], Some(false)).0, json!("Everything"));
        assert_eq!(describe_members(&[], None).1, "Cannot see any value");
        assert_eq!(describe_members(&[json!("US")], None).1, "Unknown rule logic");
    }

    #[tokio::test]
    async fn test_get_datamodel_shares() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(HttpMethod::Get, "/api/v2/datamodels/schema?title=Commerce", 200, commerce_schema());
        principals(&mock);

        let rows = Datamodels::new(mock.clone()).get_datamodel_shares("Commerce").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].party_name.as_deref(), Some("ann@corp.com"));
        assert_eq!(rows[0].permission, "EDIT");
        assert_eq!(rows[1].party_name.as_deref(), Some("Finance"));
        assert_eq!(rows[1].permission, "USE");
        assert_eq!(rows[2].party_name.as_deref(), Some("[Unknown user: zz]"));
    }

    #[tokio::test]
    async fn test_add_datamodel_shares() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            HttpMethod::Get,
            "/api/v2/datamodels/schema?title=Live",
            200,
            json!({"oid": "lm1", "title": "Live", "type": "live", "shares": [{"partyId": "g0", "type": "group", "permission": "r"}]}),
        );
        principals(&mock);
        mock.respond(HttpMethod::Patch, "/api/v1/elasticubes/live/lm1/permissions", 200, json!({"ok": true}));

        let models = Datamodels::new(mock.clone());
        let requests = vec![
            ShareRequest::user("ann@corp.com", "EDIT"),
            ShareRequest::group("Ghosts", "READ"),
        ];
        models.add_datamodel_shares("Live", &requests).await.unwrap();

        let patch = mock.calls().into_iter().find(|c| c.method == HttpMethod::Patch).unwrap();
        assert_eq!(
            patch.body.unwrap(),
            json!([
                {"partyId": "g0", "type": "group", "permission": "r"},
                {"partyId": "u1", "type": "user", "permission": "w"}
            ])
        );

        mock.respond(HttpMethod::Get, "/api/v2/datamodels/schema?title=Commerce", 200, commerce_schema());
        assert!(matches!(
            models.add_datamodel_shares("Commerce", &requests).await,
            Err(SdkError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_get_datasecurity() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(HttpMethod::Get, "/api/v2/datamodels/schema?title=Commerce", 200, commerce_schema());
        mock.respond(
            HttpMethod::Get,
            "/api/elasticubes/localhost/Commerce/datasecurity",
            200,
            json!([
                {"table": "Orders", "column": "Region", "datatype": "text", "members": ["US"], "exclusionary": false,
                 "shares": [{"type": "user", "partyName": "ann"}, {"type": "default"}]},
                {"table": "Orders", "column": "Region", "datatype": "text", "members": [],
                 "shares": []},
                {"table": "Customers", "column": "Name", "datatype": "text", "members": [], "exclusionary": false,
                 "shares": [{"type": "group", "partyName": "Finance"}]}
            ]),
        );
        let models = Datamodels::new(mock.clone());

        let rows = models.get_datasecurity("Commerce").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].column_name, "Region");

        let detail = models.get_datasecurity_detail("Commerce").await.unwrap();
        assert_eq!(detail.len(), 4);
        assert_eq!(detail[0].table_name, "Customers");
        assert_eq!(detail[0].value, json!("Everything"));
        assert_eq!(detail[1].rule_description, "Can see only [US]");
        assert_eq!(detail[2].share_name, "Everyone");
        assert_eq!(detail[3].share_type, "None");
        assert_eq!(detail[3].value, json!("Nothing"));
    }

    #[tokio::test]
    async fn test_datasecurity_unavailable() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            HttpMethod::Get,
            "/api/v2/datamodels/schema?title=Live",
            200,
            json!({"oid": "lm1", "title": "Live", "type": "live"}),
        );
        let rows = Datamodels::new(mock.clone()).get_datasecurity("Live").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].datamodel_name, "Live");
        assert!(rows[0].table_name.is_empty());
        assert_eq!(mock.count(HttpMethod::Get, "/api/v1/elasticubes/live/Live/datasecurity"), 1);
    }
}
