//! Transport seam between the domain helpers and HTTP
//!
//! Every helper talks to Sisense through [`ApiTransport`], so the
//! orchestration logic can run against an in-memory transport in tests.

use crate::error::{Result, SdkError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// HTTP verbs used by the Sisense API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Upper-case verb
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw answer from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

impl ApiResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// True for any 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body text
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Parse the body as JSON. An empty body reads as `null`.
    pub fn value(&self) -> Result<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Deserialize the body into a typed value
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Turn this response into an [`SdkError::Http`]
    pub fn to_error(&self, endpoint: &str) -> SdkError {
        SdkError::http(endpoint, self.status, self.body.clone())
    }

    /// Fail unless the status is one of `accepted`
    pub fn expect_status(self, endpoint: &str, accepted: &[u16]) -> Result<Self> {
        if accepted.contains(&self.status) {
            Ok(self)
        } else {
            Err(self.to_error(endpoint))
        }
    }

    /// Fail unless the status is 2xx
    pub fn expect_success(self, endpoint: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.to_error(endpoint))
        }
    }
}

/// Minimal HTTP surface the SDK needs from a Sisense connection
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Issue a request. `Err` means no response was received at all.
    async fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse>;

    /// GET an endpoint
    async fn get(&self, endpoint: &str) -> Result<ApiResponse> {
        self.request(HttpMethod::Get, endpoint, None).await
    }

    /// POST a JSON body
    async fn post(&self, endpoint: &str, body: &Value) -> Result<ApiResponse> {
        self.request(HttpMethod::Post, endpoint, Some(body)).await
    }

    /// PUT a JSON body
    async fn put(&self, endpoint: &str, body: &Value) -> Result<ApiResponse> {
        self.request(HttpMethod::Put, endpoint, Some(body)).await
    }

    /// PATCH a JSON body
    async fn patch(&self, endpoint: &str, body: &Value) -> Result<ApiResponse> {
        self.request(HttpMethod::Patch, endpoint, Some(body)).await
    }

    /// DELETE an endpoint
    async fn delete(&self, endpoint: &str) -> Result<ApiResponse> {
        self.request(HttpMethod::Delete, endpoint, None).await
    }

    /// GET and parse a 2xx JSON answer
    async fn get_json(&self, endpoint: &str) -> Result<Value> {
        self.get(endpoint).await?.expect_success(endpoint)?.value()
    }

    /// POST and parse a 2xx JSON answer
    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.post(endpoint, body).await?.expect_success(endpoint)?.value()
    }
}

/// Append url-encoded query pairs to a path
pub fn with_query(path: &str, pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return path.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, separator, query)
}

/// Percent-encode a single path segment such as a data model title
pub fn path_segment(segment: &str) -> String {
    let mut scratch = match url::Url::parse("http://localhost/") {
        Ok(url) => url,
        Err(_) => return segment.to_string(),
    };
    if let Ok(mut segments) = scratch.path_segments_mut() {
        segments.clear().push(segment);
    }
    scratch.path().trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_query() {
        assert_eq!(
            with_query("/api/v1/groups", &[("name", "Sales Team")]),
            "/api/v1/groups?name=Sales+Team"
        );
        assert_eq!(
            with_query("/api/v1/users?expand=groups,role", &[("groupId", "g1")]),
            "/api/v1/users?expand=groups,role&groupId=g1"
        );
        assert_eq!(with_query("/api/roles", &[]), "/api/roles");
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment("Sample ECommerce"), "Sample%20ECommerce");
        assert_eq!(path_segment("a/b"), "a%2Fb");
    }

    #[test]
    fn test_response_helpers() {
        let empty = ApiResponse::new(204, "");
        assert!(empty.is_success());
        assert_eq!(empty.value().unwrap(), Value::Null);

        let denied = ApiResponse::new(403, "{\"message\":\"no\"}");
        let err = denied.expect_status("/x", &[200]).unwrap_err();
        assert!(err.is_forbidden());
    }
}
