//! # sisense-kit - Sisense REST API toolkit
//!
//! sisense-kit is a client SDK for administering a Sisense environment over
//! its REST API, plus a migration orchestrator that copies groups, users,
//! dashboards and data models from one environment to another.
//!
//! ## Features
//!
//! - **Access management**: users, groups, roles, folder and dashboard ownership
//! - **Dashboards**: lookups, shares, script injection, column extraction
//! - **Data models**: creation, deployment, description, data security
//! - **Migration**: name-based ID mapping, batched bulk calls with
//!   per-item salvage on failure
//! - **Wellcheck**: dashboard complexity and data model design checks
//! - **Output**: flattening of nested API payloads into tables and CSV
//!
//! ## Quick Start
//!
//! ```no_run
//! use sisense_kit::{AccessManagement, ConnectionConfig, SisenseClient};
//! use std::sync::Arc;
//!
//! # async fn run() -> sisense_kit::Result<()> {
//! let config = ConnectionConfig::from_yaml_file("source.yaml")?;
//! let client = Arc::new(SisenseClient::new(&config)?);
//!
//! let access = AccessManagement::new(client);
//! for user in access.get_users_all().await? {
//!     println!("{} ({})", user.email, user.role_name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Migrating Between Environments
//!
//! ```no_run
//! use sisense_kit::migration::{DashboardMigrationOptions, Migrator, Selection};
//! use sisense_kit::{ConnectionConfig, SisenseClient};
//! use std::sync::Arc;
//!
//! # async fn run() -> sisense_kit::Result<()> {
//! let source = SisenseClient::new(&ConnectionConfig::from_yaml_file("source.yaml")?)?;
//! let target = SisenseClient::new(&ConnectionConfig::from_yaml_file("target.yaml")?)?;
//! let migrator = Migrator::new(Arc::new(source), Arc::new(target));
//!
//! let summary = migrator.migrate_groups(&["Finance".to_string()]).await?;
//! println!("{}", summary);
//!
//! let selection = Selection::from_lists(vec![], vec!["Sales".to_string()])?;
//! let options = DashboardMigrationOptions::default().with_shares(true, false);
//! let summary = migrator.migrate_dashboards(&selection, &options).await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```
//!
//! ## Dashboard Health Checks
//!
//! ```no_run
//! use sisense_kit::wellcheck::Wellcheck;
//! use sisense_kit::{ConnectionConfig, SisenseClient};
//! use std::sync::Arc;
//!
//! # async fn run() -> sisense_kit::Result<()> {
//! let client = SisenseClient::new(&ConnectionConfig::new("bi.example.com", "token"))?;
//! let check = Wellcheck::new(Arc::new(client));
//!
//! for row in check.check_dashboard_structure(&["Sales".to_string()]).await? {
//!     println!("{}: {} pivots, {} jump targets", row.dashboard_title, row.pivot_count, row.jtd_count);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod access;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod datamodel;
pub mod error;
pub mod migration;
pub mod utils;
pub mod wellcheck;

// Re-export commonly used types
pub use access::AccessManagement;
pub use client::{ApiTransport, SharedTransport, SisenseClient};
pub use config::ConnectionConfig;
pub use dashboard::Dashboards;
pub use datamodel::Datamodels;
pub use error::{Result, SdkError};
pub use migration::{MigrationSummary, Migrator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use sisense_kit::prelude::*;
    //! ```

    pub use crate::access::{AccessManagement, GroupRow, UserRow};
    pub use crate::client::{ApiResponse, ApiTransport, HttpMethod, SharedTransport, SisenseClient};
    pub use crate::config::{ConnectionConfig, DatamodelAction, Dependency, ImportAction};
    pub use crate::dashboard::{Dashboards, ShareKind, ShareRequest};
    pub use crate::datamodel::{DatamodelType, Datamodels};
    pub use crate::error::{Result, SdkError};
    pub use crate::migration::{
        BatchPlan, DashboardMigrationOptions, DatamodelMigrationOptions, MigrationSummary, Migrator,
        Selection,
    };
    pub use crate::utils::{export_to_csv, flatten, to_table, Table};
    pub use crate::wellcheck::Wellcheck;
}
