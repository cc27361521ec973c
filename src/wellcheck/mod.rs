//! Read-only dashboard and data model health checks
//!
//! Every check accepts OIDs or titles. A reference that cannot be resolved
//! or fetched is logged and left out of the result, so one broken dashboard
//! or data model does not hide the others.

mod datamodel;
mod full;
mod pivot;
mod structure;
mod widgets;

pub use datamodel::*;
pub use full::*;
pub use pivot::*;
pub use structure::*;
pub use widgets::*;

use crate::client::{path_segment, ApiTransport, SharedTransport};
use crate::dashboard::{looks_like_oid, Dashboards};
use crate::datamodel::datamodel_oid;
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde_json::Value;
use tracing::warn;

/// A data model schema fetched for inspection
pub(crate) struct LoadedDatamodel {
    pub oid: String,
    pub title: String,
    pub schema: Value,
}

/// Health checks against one environment
#[derive(Clone)]
pub struct Wellcheck {
    api: SharedTransport,
}

impl Wellcheck {
    pub fn new(api: SharedTransport) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &dyn ApiTransport {
        self.api.as_ref()
    }

    /// Resolve each reference and fetch its full definition, skipping failures
    async fn load_dashboards(&self, refs: &[String]) -> Result<Vec<(String, Value)>> {
        if refs.is_empty() {
            return Err(SdkError::invalid("at least one dashboard id or title is required"));
        }
        let lookup = Dashboards::new(self.api.clone());
        let mut loaded = Vec::with_capacity(refs.len());
        for reference in refs {
            let (oid, title) = match lookup.resolve_reference(reference).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(reference = %reference, error = %e, "skipping dashboard reference");
                    continue;
                }
            };
            let endpoint = format!("/api/dashboards/{}?adminAccess=true", path_segment(&oid));
            match self.api().get_json(&endpoint).await {
                Ok(definition) => loaded.push((title, definition)),
                Err(e) => warn!(dashboard = %title, oid = %oid, error = %e, "could not fetch dashboard definition"),
            }
        }
        if loaded.is_empty() {
            warn!("no dashboards could be loaded");
        }
        Ok(loaded)
    }

    /// Resolve each data model reference to its schema, skipping failures.
    ///
    /// OID-shaped references are fetched directly, anything else is looked
    /// up by title first.
    async fn load_datamodels(&self, refs: &[String]) -> Result<Vec<LoadedDatamodel>> {
        if refs.is_empty() {
            return Err(SdkError::invalid("at least one data model id or title is required"));
        }
        let mut loaded = Vec::with_capacity(refs.len());
        for reference in refs {
            let oid = if looks_like_oid(reference) {
                reference.clone()
            } else {
                match datamodel_oid(self.api(), reference).await {
                    Ok(oid) => oid,
                    Err(e) => {
                        warn!(reference = %reference, error = %e, "skipping data model reference");
                        continue;
                    }
                }
            };
            let endpoint = format!("/api/v2/datamodels/{}/schema", path_segment(&oid));
            match self.api().get_json(&endpoint).await {
                Ok(schema) => loaded.push(LoadedDatamodel {
                    title: schema.string_or("title", reference),
                    oid,
                    schema,
                }),
                Err(e) => warn!(reference = %reference, oid = %oid, error = %e, "could not fetch data model schema"),
            }
        }
        if loaded.is_empty() {
            warn!("no data models could be loaded");
        }
        Ok(loaded)
    }
}
