//! Dashboard helpers
//!
//! Lookups over the admin listing, script injection with temporary
//! ownership, share management and column extraction from exported
//! dashboard definitions.

mod jaql;
mod lookup;
mod scripts;
mod shares;

pub use jaql::*;
pub use lookup::*;
pub use scripts::script_payload;
pub use shares::*;

use crate::client::{ApiTransport, SharedTransport};

/// Dashboard operations against one environment
#[derive(Clone)]
pub struct Dashboards {
    api: SharedTransport,
}

impl Dashboards {
    /// Wrap a transport
    pub fn new(api: SharedTransport) -> Self {
        Self { api }
    }

    /// Underlying transport
    pub fn api(&self) -> &dyn ApiTransport {
        self.api.as_ref()
    }
}
