//! reqwest-backed Sisense connection

use super::transport::{ApiResponse, ApiTransport, HttpMethod};
use crate::config::ConnectionConfig;
use crate::error::{Result, SdkError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, error, warn};

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Authenticated connection to one Sisense environment
#[derive(Clone)]
pub struct SisenseClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for SisenseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SisenseClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SisenseClient {
    /// Create a client for the given connection
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;

        if !config.verify_ssl {
            warn!(
                domain = %config.domain,
                "TLS certificate verification is disabled"
            );
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| SdkError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url(),
            token: config.token.clone(),
            http,
        })
    }

    /// Create a client from a YAML connection file
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(&ConnectionConfig::from_yaml_file(path)?)
    }

    /// Base URL every endpoint is appended to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

fn log_status(method: HttpMethod, endpoint: &str, status: u16, body: &str) {
    match status {
        200 | 201 | 204 => debug!(%method, endpoint, status, "request succeeded"),
        400 | 404 | 500 => error!(%method, endpoint, status, body, "request failed"),
        _ => warn!(%method, endpoint, status, body, "unexpected status"),
    }
}

#[async_trait]
impl ApiTransport for SisenseClient {
    async fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let url = self.url(endpoint);
        debug!(%method, %url, "sending request");

        let mut request = self
            .http
            .request(method.into(), &url)
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            error!(%method, endpoint, error = %e, "request failed without a response");
            SdkError::transport(endpoint, e.to_string())
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| SdkError::transport(endpoint, format!("reading body: {}", e)))?;

        log_status(method, endpoint, status, &text);
        Ok(ApiResponse::new(status, text))
    }
}
