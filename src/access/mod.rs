//! User, group and permission administration
//!
//! The free functions (`find_user`, `find_group`, ...) are shared with the
//! dashboard and migration modules; [`AccessManagement`] bundles them with
//! the heavier reporting operations behind one handle.

mod columns;
mod groups;
mod ownership;
mod schedule;
mod shares;
mod users;

pub use columns::*;
pub use groups::*;
pub use ownership::*;
pub use schedule::*;
pub use shares::*;
pub use users::*;

use crate::client::{ApiTransport, SharedTransport};

/// Groups that every user belongs to implicitly
pub const EXCLUDED_GROUPS: [&str; 2] = ["Everyone", "All users in system"];

/// Roles reported as members of the "Admins" group
pub const ADMIN_ROLES: [&str; 3] = ["sysAdmin", "dataAdmin", "admin"];

/// True for the implicit groups in [`EXCLUDED_GROUPS`]
pub fn is_excluded_group(name: &str) -> bool {
    EXCLUDED_GROUPS.contains(&name)
}

/// Access management operations against one environment
#[derive(Clone)]
pub struct AccessManagement {
    api: SharedTransport,
}

impl AccessManagement {
    /// Wrap a transport
    pub fn new(api: SharedTransport) -> Self {
        Self { api }
    }

    /// Underlying transport
    pub fn api(&self) -> &dyn ApiTransport {
        self.api.as_ref()
    }
}
