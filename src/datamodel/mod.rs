//! Data models: lookup, construction, deployment and inspection
//!
//! Operations address a data model by title. The title is resolved to a
//! schema document once per call through `/api/v2/datamodels/schema`.

mod builder;
mod describe;
mod lookup;
mod schema;
mod security;

pub use builder::*;
pub use describe::*;
pub use lookup::*;
pub use schema::*;
pub use security::*;

use crate::client::{ApiTransport, SharedTransport};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage kind of a data model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatamodelType {
    /// Queries go straight to the source
    Live,
    /// Data is imported into an elasticube
    Extract,
}

impl DatamodelType {
    /// Lower-case name as the API accepts it on creation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Extract => "extract",
        }
    }

    /// Case-insensitive parse of `live` / `extract`
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "live" => Some(Self::Live),
            "extract" => Some(Self::Extract),
            _ => None,
        }
    }
}

impl fmt::Display for DatamodelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data model operations against one environment
#[derive(Clone)]
pub struct Datamodels {
    api: SharedTransport,
}

impl Datamodels {
    /// Wrap a transport
    pub fn new(api: SharedTransport) -> Self {
        Self { api }
    }

    /// Underlying transport
    pub fn api(&self) -> &dyn ApiTransport {
        self.api.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{json, Value};

    /// Schema document for a small extract model with two datasets
    pub(crate) fn commerce_schema() -> Value {
        json!({
            "oid": "dm1",
            "title": "Commerce",
            "type": "extract",
            "lastBuildTime": "2024-03-01T10:00:00Z",
            "lastPublishTime": "2024-02-01T10:00:00Z",
            "lastUpdated": "2024-03-02T08:00:00Z",
            "shares": [
                {"partyId": "u1", "type": "user", "permission": "w"},
                {"partyId": "g1", "type": "group", "permission": "R"},
                {"partyId": "zz", "type": "user", "permission": "a"}
            ],
            "datasets": [
                {
                    "oid": "ds1",
                    "name": "Main",
                    "type": "extract",
                    "database": "shop",
                    "schemaName": "public",
                    "connection": {"name": "Warehouse", "provider": "RedShift"},
                    "schema": {"tables": [
                        {"name": "Orders", "columns": [
                            {"name": "OrderDate", "type": 4},
                            {"name": "Amount", "type": 5},
                            {"name": "Blob", "type": 99}
                        ]},
                        {"name": "Customers", "columns": [{"name": "Name", "type": 18}]}
                    ]}
                },
                {
                    "oid": "ds2",
                    "name": "Side",
                    "type": "extract",
                    "schema": {"tables": [{"name": "Regions", "columns": []}]}
                }
            ]
        })
    }
}
