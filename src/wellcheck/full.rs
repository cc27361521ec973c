//! Every check in one pass over a set of dashboards and data models

use super::datamodel::{custom_tables, import_queries, island_tables};
use super::{count_structure, count_widgets, pivot_fields, Wellcheck};
use super::{CustomTableRow, DashboardStructure, ImportQueryRow, IslandTableRow, PivotFieldRow};
use super::{RelationshipRow, RlsDatatypeRow, WidgetCountRow};
use crate::access::{AccessManagement, ColumnUsageRow};
use crate::error::{Result, SdkError};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardChecks {
    pub structure: Vec<DashboardStructure>,
    pub widget_counts: Vec<WidgetCountRow>,
    pub pivot_widget_fields: Vec<PivotFieldRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatamodelChecks {
    pub custom_tables: Vec<CustomTableRow>,
    pub island_tables: Vec<IslandTableRow>,
    pub rls_datatypes: Vec<RlsDatatypeRow>,
    pub import_queries: Vec<ImportQueryRow>,
    pub m2m_relationships: Vec<RelationshipRow>,
    pub unused_columns: Vec<ColumnUsageRow>,
}

/// Results of [`Wellcheck::run_full_wellcheck`], one list per check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FullWellcheck {
    pub dashboards: DashboardChecks,
    pub datamodels: DatamodelChecks,
}

impl Wellcheck {
    /// Run every dashboard check on `dashboards` and every data model check
    /// on `datamodels`.
    ///
    /// Each dashboard and data model is fetched once. An empty list skips
    /// its section; both empty is an error.
    pub async fn run_full_wellcheck(
        &self,
        dashboards: &[String],
        datamodels: &[String],
        max_pivot_fields: usize,
    ) -> Result<FullWellcheck> {
        if dashboards.is_empty() && datamodels.is_empty() {
            return Err(SdkError::invalid("at least one dashboard or data model reference is required"));
        }
        let mut report = FullWellcheck::default();

        if !dashboards.is_empty() {
            let section = &mut report.dashboards;
            for (title, definition) in self.load_dashboards(dashboards).await? {
                section.structure.extend(count_structure(&definition, &title));
                section.widget_counts.extend(count_widgets(&definition, &title));
                section
                    .pivot_widget_fields
                    .extend(pivot_fields(&definition, &title, max_pivot_fields));
            }
        }

        if !datamodels.is_empty() {
            let section = &mut report.datamodels;
            let access = AccessManagement::new(self.api.clone());
            for model in self.load_datamodels(datamodels).await? {
                section.custom_tables.extend(custom_tables(&model).0);
                section.island_tables.extend(island_tables(&model));
                section.import_queries.extend(import_queries(&model));
                section.rls_datatypes.extend(self.rls_datatypes(&model).await);
                section.m2m_relationships.extend(self.relationships(&model).await);
                match access.get_unused_columns(&model.title).await {
                    Ok(rows) => section.unused_columns.extend(rows),
                    Err(e) => warn!(datamodel = %model.title, error = %e, "unused column check failed"),
                }
            }
        }

        let d = &report.dashboards;
        let m = &report.datamodels;
        info!(
            dashboards = d.structure.len(),
            large_pivots = d.pivot_widget_fields.len(),
            custom_tables = m.custom_tables.len(),
            island_tables = m.island_tables.len(),
            rls_columns = m.rls_datatypes.len(),
            many_to_many = m.m2m_relationships.iter().filter(|r| r.is_m2m).count(),
            unused_columns = m.unused_columns.iter().filter(|c| !c.used).count(),
            "full wellcheck complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use crate::wellcheck::fixtures::{register, register_model, MODEL_OID, SALES_OID};
    use crate::wellcheck::DEFAULT_MAX_PIVOT_FIELDS;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_full_wellcheck_dashboards_only() {
        let mock = Arc::new(MockTransport::new());
        register(
            &mock,
            json!({"oid": SALES_OID, "title": "Sales", "widgets": [
                {"oid": "w1", "type": "pivot2", "metadata": {"panels": [{"items": [{}, {}, {}]}]}},
                {"oid": "w2", "type": "chart/line"}
            ]}),
        );
        let report = Wellcheck::new(mock.clone())
            .run_full_wellcheck(&[SALES_OID.to_string()], &[], 2)
            .await
            .unwrap();
        assert_eq!(report.dashboards.structure.len(), 1);
        assert_eq!(report.dashboards.structure[0].pivot_count, 1);
        assert_eq!(report.dashboards.widget_counts[0].widget_count, 2);
        assert_eq!(report.dashboards.pivot_widget_fields.len(), 1);
        assert_eq!(report.datamodels, DatamodelChecks::default());
        assert_eq!(mock.count(HttpMethod::Get, "/api/dashboards/"), 1);
    }

    #[tokio::test]
    async fn test_full_wellcheck_datamodels_survive_failing_checks() {
        let mock = Arc::new(MockTransport::new());
        register_model(
            &mock,
            json!({
                "oid": MODEL_OID,
                "title": "Commerce",
                "type": "extract",
                "server": "EC1",
                "datasets": [{"oid": "DS1", "schema": {"tables": [
                    {"name": "Orders", "oid": "T1", "type": "custom", "configOptions": {},
                     "expression": {"expression": "select * from a union all select * from b"}}
                ]}}]
            }),
        );
        let report = Wellcheck::new(mock.clone())
            .run_full_wellcheck(&[], &[MODEL_OID.to_string()], DEFAULT_MAX_PIVOT_FIELDS)
            .await
            .unwrap();
        let m = &report.datamodels;
        assert_eq!(m.custom_tables.len(), 1);
        assert!(m.custom_tables[0].has_union);
        assert_eq!(m.island_tables.len(), 1);
        assert_eq!(m.import_queries.len(), 1);
        assert!(m.rls_datatypes.is_empty());
        assert!(m.m2m_relationships.is_empty());
        assert!(m.unused_columns.is_empty());
        assert_eq!(report.dashboards, DashboardChecks::default());
    }

    #[tokio::test]
    async fn test_full_wellcheck_needs_references() {
        let check = Wellcheck::new(Arc::new(MockTransport::new()));
        assert!(check.run_full_wellcheck(&[], &[], DEFAULT_MAX_PIVOT_FIELDS).await.is_err());
    }
}
