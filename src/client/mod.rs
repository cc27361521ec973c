//! HTTP access to a Sisense environment
//!
//! [`SisenseClient`] is the production transport; everything above it is
//! written against the [`ApiTransport`] trait.

mod http;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use http::SisenseClient;
pub use transport::{path_segment, with_query, ApiResponse, ApiTransport, HttpMethod};

use std::sync::Arc;

/// Shared handle to a transport
pub type SharedTransport = Arc<dyn ApiTransport>;
