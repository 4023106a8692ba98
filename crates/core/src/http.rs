// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! The HTTP collaborator.
//!
//! Interface and health checks talk to the memory APIs only through
//! [`HttpProbe`], so tests can swap in [`StubHttpProbe`] or a generated mock.

use crate::error::HttpError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
}

impl HttpMethod {
    /// Method token.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Body text.
    pub body: String,
}

impl HttpResponse {
    /// JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: body.to_string(),
        }
    }

    /// Plain response with no content type.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn body_json(&self) -> Result<serde_json::Value, HttpError> {
        serde_json::from_str(&self.body).map_err(|e| HttpError::Decode(e.to_string()))
    }

    /// Media type without parameters (`application/json; charset=utf-8` → `application/json`).
    pub fn media_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
    }
}

/// Generic request/response client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// GET with extra headers.
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, HttpError>;

    /// POST a JSON body.
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, HttpError>;

    /// Any method, optional JSON body.
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse, HttpError>;
}

type Route = Result<HttpResponse, HttpError>;

/// Route-table double: answers from preset responses, refuses anything else.
#[derive(Debug, Default)]
pub struct StubHttpProbe {
    routes: Mutex<HashMap<(HttpMethod, String), Route>>,
    calls: AtomicU64,
}

impl StubHttpProbe {
    /// Empty route table; every request is refused.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method url` with `response`.
    pub fn route(self, method: HttpMethod, url: impl Into<String>, response: HttpResponse) -> Self {
        self.set(method, url, Ok(response));
        self
    }

    /// Answer `method url` with a JSON body.
    pub fn route_json(
        self,
        method: HttpMethod,
        url: impl Into<String>,
        status: u16,
        body: serde_json::Value,
    ) -> Self {
        self.route(method, url, HttpResponse::json(status, &body))
    }

    /// Fail `method url` with `error`.
    pub fn fail(self, method: HttpMethod, url: impl Into<String>, error: HttpError) -> Self {
        self.set(method, url, Err(error));
        self
    }

    /// Replace a route at runtime.
    pub fn set(&self, method: HttpMethod, url: impl Into<String>, route: Route) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert((method, url.into()), route);
        }
    }

    /// Requests served so far, including refused ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn answer(&self, method: HttpMethod, url: &str) -> Route {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let routes = self
            .routes
            .lock()
            .map_err(|_| HttpError::Request("route table poisoned".to_string()))?;
        routes
            .get(&(method, url.to_string()))
            .cloned()
            .unwrap_or_else(|| Err(HttpError::ConnectionRefused(url.to_string())))
    }
}

#[async_trait]
impl HttpProbe for StubHttpProbe {
    async fn get(&self, url: &str, _headers: &[(String, String)]) -> Result<HttpResponse, HttpError> {
        self.answer(HttpMethod::Get, url)
    }

    async fn post_json(&self, url: &str, _body: &serde_json::Value) -> Result<HttpResponse, HttpError> {
        self.answer(HttpMethod::Post, url)
    }

    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        _body: Option<serde_json::Value>,
    ) -> Result<HttpResponse, HttpError> {
        self.answer(method, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_stub_routes_and_refuses() {
        let probe = StubHttpProbe::new()
            .route_json(HttpMethod::Get, "http://api/health", 200, json!({"status": "ok"}))
            .fail(
                HttpMethod::Post,
                "http://api/memories",
                HttpError::Timeout(std::time::Duration::from_secs(30)),
            );

        let ok = probe.get("http://api/health", &[]).await.unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.body_json().unwrap()["status"], "ok");

        let timeout = probe.post_json("http://api/memories", &json!({})).await;
        assert!(matches!(timeout, Err(HttpError::Timeout(_))));

        let refused = probe.get("http://other/health", &[]).await;
        assert!(matches!(refused, Err(HttpError::ConnectionRefused(_))));
        assert_eq!(probe.calls(), 3);
    }

    #[test]
    fn test_media_type_strips_parameters() {
        let response = HttpResponse {
            status: 200,
            content_type: Some("application/json; charset=utf-8".into()),
            body: "{}".into(),
        };
        assert_eq!(response.media_type(), Some("application/json"));
        assert_eq!(HttpResponse::status(404).media_type(), None);
    }

    #[tokio::test]
    async fn test_mock_probe() {
        let mut mock = MockHttpProbe::new();
        mock.expect_request()
            .withf(|method, url, body| {
                *method == HttpMethod::Delete && url.to_string() == "http://api/x" && body.is_none()
            })
            .times(1)
            .returning(|_, _, _| Ok(HttpResponse::status(204)));

        let response = mock.request(HttpMethod::Delete, "http://api/x", None).await.unwrap();
        assert_eq!(response.status, 204);
    }

    #[test]
    fn test_invalid_json_body_is_decode_error() {
        let response = HttpResponse {
            status: 500,
            content_type: Some("text/html".into()),
            body: "<html>".into(),
        };
        assert!(matches!(response.body_json(), Err(HttpError::Decode(_))));
    }
}
