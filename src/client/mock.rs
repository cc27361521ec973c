//! In-memory transport for tests

use super::transport::{ApiResponse, ApiTransport, HttpMethod};
use crate::error::{Result, SdkError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

type Handler = Box<dyn Fn(Option<&Value>) -> Result<ApiResponse> + Send + Sync>;

/// A request the mock received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub endpoint: String,
    pub body: Option<Value>,
}

/// Scripted transport. Each route holds a queue of handlers; the last one
/// keeps answering once the others are used up. Unknown routes answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(HttpMethod, String), VecDeque<Handler>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// Decode the query string so tests can register plain endpoints
fn normalize(endpoint: &str) -> String {
    match endpoint.split_once('?') {
        None => endpoint.to_string(),
        Some((path, query)) => {
            let pairs: Vec<String> = url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!("{}?{}", path, pairs.join("&"))
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: HttpMethod, endpoint: &str, handler: Handler) {
        let mut routes = self.routes.lock().unwrap();
        routes
            .entry((method, normalize(endpoint)))
            .or_default()
            .push_back(handler);
    }

    /// Answer with a JSON body
    pub fn respond(&self, method: HttpMethod, endpoint: &str, status: u16, body: Value) {
        let text = body.to_string();
        self.push(
            method,
            endpoint,
            Box::new(move |_| Ok(ApiResponse::new(status, text.clone()))),
        );
    }

    /// Answer with a raw text body
    pub fn respond_text(&self, method: HttpMethod, endpoint: &str, status: u16, body: &str) {
        let text = body.to_string();
        self.push(
            method,
            endpoint,
            Box::new(move |_| Ok(ApiResponse::new(status, text.clone()))),
        );
    }

    /// Answer with a closure over the request body
    pub fn respond_with<F>(&self, method: HttpMethod, endpoint: &str, handler: F)
    where
        F: Fn(Option<&Value>) -> Result<ApiResponse> + Send + Sync + 'static,
    {
        self.push(method, endpoint, Box::new(handler));
    }

    /// Fail the request without a response
    pub fn fail(&self, method: HttpMethod, endpoint: &str) {
        let owned = endpoint.to_string();
        self.push(
            method,
            endpoint,
            Box::new(move |_| Err(SdkError::transport(owned.clone(), "connection reset"))),
        );
    }

    /// Every request received so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests whose normalized endpoint starts with `prefix`
    pub fn count(&self, method: HttpMethod, prefix: &str) -> usize {
        let prefix = normalize(prefix);
        self.calls()
            .iter()
            .filter(|c| c.method == method && normalize(&c.endpoint).starts_with(&prefix))
            .count()
    }
}

#[async_trait]
impl ApiTransport for MockTransport {
    async fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            endpoint: endpoint.to_string(),
            body: body.cloned(),
        });

        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&(method, normalize(endpoint))) {
            Some(queue) if !queue.is_empty() => {
                if queue.len() > 1 {
                    let handler = queue.pop_front().unwrap();
                    handler(body)
                } else {
                    (queue[0])(body)
                }
            }
            _ => Ok(ApiResponse::new(
                404,
                format!("{{\"error\":\"no mock for {} {}\"}}", method, endpoint),
            )),
        }
    }
}
