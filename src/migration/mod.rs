//! Copy users, groups, dashboards and data models between two environments
//!
//! A [`Migrator`] holds one transport per side. Every batch operation
//! returns a [`MigrationSummary`] in which each requested item appears in
//! exactly one of `succeeded`, `skipped` or `failed`; nothing is dropped
//! silently.
//!
//! Entities are matched across environments by natural key (email for
//! users, name for groups, title for dashboards and data models) through
//! [`IdMapping`].

mod batch;
mod dashboards;
mod datamodels;
mod groups;
mod mapping;
mod shares;
mod summary;
mod users;

pub use batch::*;
pub use dashboards::*;
pub use datamodels::*;
pub use groups::*;
pub use mapping::*;
pub use shares::*;
pub use summary::*;
pub use users::*;

use crate::client::{ApiTransport, SharedTransport};
use crate::error::{Result, SdkError};
use crate::utils::ValueExt;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{error, info};

/// Items chosen either by id or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Source OIDs
    Ids(Vec<String>),
    /// Titles on the source
    Names(Vec<String>),
}

/// Dashboards to migrate
pub type DashboardSelection = Selection;

/// Data models to migrate
pub type DatamodelSelection = Selection;

impl Selection {
    /// Exactly one of the two lists must be non-empty
    pub fn from_lists(ids: Vec<String>, names: Vec<String>) -> Result<Self> {
        match (ids.is_empty(), names.is_empty()) {
            (false, true) => Ok(Self::Ids(ids)),
            (true, false) => Ok(Self::Names(names)),
            (false, false) => Err(SdkError::invalid("pass either ids or names, not both")),
            (true, true) => Err(SdkError::invalid("pass at least one id or name")),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Ids(items) | Self::Names(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source and target connections for a migration run
#[derive(Clone)]
pub struct Migrator {
    source: SharedTransport,
    target: SharedTransport,
}

impl Migrator {
    pub fn new(source: SharedTransport, target: SharedTransport) -> Self {
        Self { source, target }
    }

    /// Environment being copied from
    pub fn source(&self) -> &dyn ApiTransport {
        self.source.as_ref()
    }

    /// Environment being copied to
    pub fn target(&self) -> &dyn ApiTransport {
        self.target.as_ref()
    }

    /// POST a list to a bulk-create endpoint and sort the payload by outcome.
    ///
    /// A 201 with a JSON list confirms the entries it names; a 201 with any
    /// other body confirms everything. Any other answer fails the whole batch.
    pub(crate) async fn bulk_create(&self, endpoint: &str, payload: Vec<Value>, key: &str) -> MigrationSummary {
        let names: Vec<String> = payload.iter().map(|item| item.string_or(key, "")).collect();
        let mut summary = MigrationSummary::new();

        let response = match self.target().post(endpoint, &Value::Array(payload)).await {
            Ok(response) => response,
            Err(e) => {
                error!(endpoint, error = %e, "bulk create failed");
                summary.fail_all(names, &e.to_string());
                return summary;
            }
        };
        if response.status != 201 {
            let reason = response.to_error(endpoint).to_string();
            error!(endpoint, status = response.status, "bulk create rejected");
            summary.fail_all(names, &reason);
            return summary;
        }

        match response.value() {
            Ok(Value::Array(created)) => {
                let created: HashSet<&str> = created.iter().filter_map(|c| c.str_field(key)).collect();
                for name in names {
                    if created.contains(name.as_str()) {
                        summary.succeed(name);
                    } else {
                        summary.fail(name, "not listed in the bulk create response");
                    }
                }
            }
            _ => {
                for name in names {
                    summary.succeed(name);
                }
            }
        }
        info!(endpoint, %summary, "bulk create finished");
        summary
    }
}
